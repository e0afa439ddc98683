//! Channel-pair byte streams and record framing.
//!
//! Each worker is connected to the supervisor by two unidirectional pipe
//! endpoints (its piped stdin and stdout). Messages are opaque text records
//! terminated by [`RECORD_SEPARATOR`]; inbound bytes are accumulated and cut
//! into complete records, and every read that completes at least one record
//! yields one batch. There is no acknowledgement and no retry at this layer.

use std::io::{self, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Terminates every message on the wire.
pub const RECORD_SEPARATOR: u8 = b'\n';

/// Read chunk size for inbound dispatch.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A pipe endpoint that implements Read/Write with EINTR handling.
pub(crate) struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(self.fd.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Outbound endpoint: appends the separator and flushes per message.
pub(crate) struct RecordWriter {
    writer: BufWriter<PipeFd>,
}

impl RecordWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::new(fd),
        }
    }

    /// Append one record. A separator embedded in `text` splits the record
    /// on the receiving side.
    pub fn send(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(&[RECORD_SEPARATOR])?;
        self.writer.flush()
    }
}

/// Cuts an inbound byte stream into complete records.
#[derive(Default)]
pub(crate) struct RecordSplitter {
    carry: Vec<u8>,
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk; returns every record completed by it, in order.
    /// A trailing partial record stays in the carry buffer.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(bytes);
        let mut records = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == RECORD_SEPARATOR) {
            let mut record: Vec<u8> = self.carry.drain(..=pos).collect();
            record.pop();
            records.push(String::from_utf8_lossy(&record).into_owned());
        }
        records
    }
}

/// Inbound dispatch loop: read chunks, invoke `on_batch` once per batch of
/// completed records, return on EOF or a read error.
pub(crate) fn dispatch_records<F>(mut fd: PipeFd, mut on_batch: F)
where
    F: FnMut(Vec<String>),
{
    let mut splitter = RecordSplitter::new();
    let mut chunk = [0u8; READ_BUFFER_SIZE];
    loop {
        match fd.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                let batch = splitter.push(&chunk[..n]);
                if !batch.is_empty() {
                    on_batch(batch);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "channel read failed, stopping dispatch");
                return;
            }
        }
    }
}
