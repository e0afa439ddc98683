//! End-to-end supervision scenarios.
//!
//! This binary is its own worker host: the engine re-executes it with the
//! worker marker set, and `Supervisor::run()` takes the worker branch. That
//! needs a custom entry point, hence `harness = false` in Cargo.toml. Worker
//! behavior is selected through the data store, which also exercises the
//! copy-on-spawn payload path.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use prefork::{
    Hooks, MessageSource, Pid, SpawnCommand, Supervisor, SupervisorConfig, message_hook,
    parent_hook,
};
use serde_json::json;

const STEP: Duration = Duration::from_millis(25);
const DEADLINE: Duration = Duration::from_secs(10);

fn main() {
    // Worker branch first: every spawned worker re-enters this main.
    if std::env::var_os("PREFORK_WORKER").is_some() {
        run_as_worker();
    }
    if std::env::var("PREFORK_E2E").as_deref() == Ok("shutdown-target") {
        run_shutdown_target();
    }

    scenario_startup_and_scale_down();
    scenario_replacement();
    scenario_no_replacement();
    scenario_message_round_trip();
    scenario_scale_order();
    scenario_data_copy_independence();
    scenario_signal_shutdown();

    println!("all supervision scenarios passed");
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for {what}");
        std::thread::sleep(STEP);
    }
}

fn base_config() -> SupervisorConfig {
    SupervisorConfig::new(SpawnCommand::current_exe(Vec::new()).expect("current_exe"))
}

/// The single worker-side personality shared by all scenarios.
fn run_as_worker() -> ! {
    let config = base_config()
        .with_hooks(Hooks {
            on_message: message_hook(|source, batch| {
                if let MessageSource::Supervisor { worker } = source {
                    for msg in batch {
                        let _ = worker.message(worker.ppid(), &format!("echo:{msg}"));
                    }
                }
            }),
            ..Hooks::default()
        })
        .with_child_fn(|worker| {
            if worker.data_get("mode") == Some(json!("report")) {
                // Prove the snapshot copy: report what the supervisor seeded,
                // then write a key the supervisor must never observe.
                let seeded = worker.data_get("shared").unwrap_or(json!(null));
                worker.data_set("local", "child-only");
                let _ = worker.message(worker.ppid(), &format!("seeded:{seeded}"));
            }
            // Cooperative orphan contract: leave once the supervisor is gone.
            while worker.parent_alive() {
                std::thread::sleep(Duration::from_millis(50));
            }
        });

    match Supervisor::new(config) {
        // Never returns in a worker process.
        Ok(sup) => {
            let _ = sup.run();
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("worker host failed to build config: {e}");
            std::process::exit(1);
        }
    }
}

/// Supervisor process driven from the outside by scenario_signal_shutdown.
fn run_shutdown_target() -> ! {
    let config = base_config()
        .with_workers(3)
        .with_hooks(Hooks {
            on_parent_death: parent_hook(|_| eprintln!("E2E-PARENT-DEATH")),
            on_shutdown: parent_hook(|_| eprintln!("E2E-SHUTDOWN")),
            ..Hooks::default()
        })
        .with_parent_fn(|sup| {
            wait_until("3 workers", || sup.children().len() == 3);
            let pids: Vec<String> = sup.children().iter().map(|p| p.to_string()).collect();
            println!("ready {}", pids.join(" "));
            use std::io::Write;
            let _ = std::io::stdout().flush();
            loop {
                std::thread::sleep(Duration::from_secs(1));
            }
        });

    let result = Supervisor::new(config).expect("shutdown target config").run();
    // Only reached if the parent workload somehow returns.
    result.expect("shutdown target run");
    std::process::exit(0);
}

/// Startup fan-out reaches the desired count; shrink-to-zero blocks until
/// every worker is reaped.
fn scenario_startup_and_scale_down() {
    eprintln!("scenario: startup roster");
    let config = base_config().with_workers(3).with_parent_fn(|sup| {
        wait_until("3 workers", || sup.children().len() == 3);
        sup.adjust_spawn(0).expect("adjust_spawn(0)");
        assert_eq!(sup.children().len(), 0, "shrink must not return early");
    });
    Supervisor::new(config).expect("config").run().expect("run");
}

/// A killed worker is replaced exactly once and the roster recovers.
fn scenario_replacement() {
    eprintln!("scenario: worker replacement");
    let replaced = Arc::new(AtomicUsize::new(0));
    let in_hook = Arc::clone(&replaced);
    let in_parent = Arc::clone(&replaced);

    let config = base_config()
        .with_workers(2)
        .with_hooks(Hooks {
            on_replace_child: parent_hook(move |_| {
                in_hook.fetch_add(1, Ordering::SeqCst);
            }),
            ..Hooks::default()
        })
        .with_parent_fn(move |sup| {
            wait_until("2 workers", || sup.children().len() == 2);
            let first = sup.children()[0];
            kill(first, Signal::SIGKILL).expect("kill worker");

            wait_until("replacement", || {
                in_parent.load(Ordering::SeqCst) == 1 && sup.children().len() == 2
            });
            assert!(!sup.children().contains(&first), "dead pid still tracked");
            assert_eq!(sup.stats().total_replaced, 1);
            sup.adjust_spawn(0).expect("adjust_spawn(0)");
        });
    Supervisor::new(config).expect("config").run().expect("run");
    // The shrink must not have spawned replacements of its own.
    assert_eq!(replaced.load(Ordering::SeqCst), 1);
}

/// With replacement off, a death is a permanent roster shrink.
fn scenario_no_replacement() {
    eprintln!("scenario: no replacement");
    let replaced = Arc::new(AtomicUsize::new(0));
    let in_hook = Arc::clone(&replaced);

    let config = base_config()
        .with_workers(2)
        .with_hooks(Hooks {
            on_replace_child: parent_hook(move |_| {
                in_hook.fetch_add(1, Ordering::SeqCst);
            }),
            ..Hooks::default()
        })
        .with_parent_fn(|sup| {
            wait_until("2 workers", || sup.children().len() == 2);
            sup.set_replace_children(false);
            let first = sup.children()[0];
            kill(first, Signal::SIGKILL).expect("kill worker");

            wait_until("permanent shrink", || sup.children().len() == 1);
            std::thread::sleep(Duration::from_millis(300));
            assert_eq!(sup.children().len(), 1, "worker was replaced anyway");
            sup.adjust_spawn(0).expect("adjust_spawn(0)");
        });
    Supervisor::new(config).expect("config").run().expect("run");
    assert_eq!(replaced.load(Ordering::SeqCst), 0);
}

/// Supervisor-to-worker message comes back through `on_message` once the
/// worker's reader is up; a single later send arrives exactly once.
fn scenario_message_round_trip() {
    eprintln!("scenario: message round trip");
    let inbox: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    let in_parent = Arc::clone(&inbox);

    let config = base_config()
        .with_workers(1)
        .with_hooks(Hooks {
            on_message: message_hook(move |source, batch| {
                if let MessageSource::Worker { .. } = source {
                    sink.lock().unwrap().extend(batch.iter().cloned());
                }
            }),
            ..Hooks::default()
        })
        .with_parent_fn(move |sup| {
            wait_until("1 worker", || sup.children().len() == 1);
            let target = sup.children()[0];

            // Unknown targets fail loudly, live ones deliver silently.
            assert!(sup.message(Pid::from_raw(1), "nope").is_err());

            // There is no ready handshake: resend until the reply shows the
            // worker's reader is installed.
            wait_until("echo reply", || {
                let _ = sup.message(target, "hello");
                in_parent.lock().unwrap().iter().any(|m| m == "echo:hello")
            });

            let _ = sup.message(target, "once-only");
            wait_until("unique reply", || {
                count_equal(&in_parent.lock().unwrap(), "echo:once-only") == 1
            });
            std::thread::sleep(Duration::from_millis(200));
            assert_eq!(
                count_equal(&in_parent.lock().unwrap(), "echo:once-only"),
                1,
                "single send delivered more than once"
            );
            sup.adjust_spawn(0).expect("adjust_spawn(0)");
        });
    Supervisor::new(config).expect("config").run().expect("run");
}

fn count_equal(messages: &[String], wanted: &str) -> usize {
    messages.iter().filter(|m| m.as_str() == wanted).count()
}

/// Growth is applied by the time the call returns; shrink removes the
/// earliest-inserted workers first.
fn scenario_scale_order() {
    eprintln!("scenario: scale order");
    let config = base_config().with_workers(1).with_parent_fn(|sup| {
        wait_until("1 worker", || sup.children().len() == 1);

        sup.adjust_spawn(4).expect("adjust_spawn(4)");
        assert_eq!(sup.children().len(), 4, "growth not applied at return");
        assert_eq!(sup.stats().total_spawned, 4);

        let pids = sup.children();
        sup.adjust_spawn(2).expect("adjust_spawn(2)");
        assert_eq!(
            sup.children(),
            pids[2..].to_vec(),
            "shrink must drop the earliest-inserted workers"
        );
        sup.adjust_spawn(0).expect("adjust_spawn(0)");
    });
    Supervisor::new(config).expect("config").run().expect("run");
}

/// A worker sees the data snapshot taken at spawn time; what it writes
/// afterwards stays invisible to the supervisor.
fn scenario_data_copy_independence() {
    eprintln!("scenario: data copy independence");
    let inbox: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    let in_parent = Arc::clone(&inbox);

    let config = base_config()
        .with_workers(1)
        .with_data_args([
            json!("mode"),
            json!("report"),
            json!("shared"),
            json!("from-parent"),
        ])
        .with_hooks(Hooks {
            on_message: message_hook(move |_, batch| {
                sink.lock().unwrap().extend(batch.iter().cloned());
            }),
            ..Hooks::default()
        })
        .with_parent_fn(move |sup| {
            wait_until("seeded report", || {
                in_parent
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|m| m.contains("from-parent"))
            });
            // The worker wrote "local" into its own copy only.
            assert!(sup.data_get("local").is_none());
            assert_eq!(sup.data_get("shared"), Some(json!("from-parent")));
            sup.adjust_spawn(0).expect("adjust_spawn(0)");
        });
    Supervisor::new(config).expect("config").run().expect("run");
}

/// SIGTERM to a supervising process: death and shutdown hooks fire once
/// each, the process exits 0, and no worker survives.
fn scenario_signal_shutdown() {
    eprintln!("scenario: signal shutdown");
    let exe = std::env::current_exe().expect("current_exe");
    let mut child = Command::new(exe)
        .env("PREFORK_E2E", "shutdown-target")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn shutdown target");

    let mut ready = String::new();
    BufReader::new(child.stdout.take().expect("stdout"))
        .read_line(&mut ready)
        .expect("read ready line");
    let worker_pids: Vec<Pid> = ready
        .trim()
        .strip_prefix("ready ")
        .expect("ready line")
        .split(' ')
        .map(|s| Pid::from_raw(s.parse().expect("pid")))
        .collect();
    assert_eq!(worker_pids.len(), 3);

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).expect("SIGTERM supervisor");
    let status = child.wait().expect("wait supervisor");
    assert!(status.success(), "supervisor exited {status:?}");

    let mut stderr_text = String::new();
    child
        .stderr
        .take()
        .expect("stderr")
        .read_to_string(&mut stderr_text)
        .expect("read stderr");
    assert_eq!(stderr_text.matches("E2E-PARENT-DEATH").count(), 1);
    assert_eq!(stderr_text.matches("E2E-SHUTDOWN").count(), 1);

    for pid in worker_pids {
        wait_until("worker exit", || kill(pid, None).is_err());
    }
}
