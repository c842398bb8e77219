//! Test doubles shared by the module tests: a simulated process table and
//! an in-process daemon speaking the line protocol.

use crate::client::ClientConfig;
use crate::error::{Result, VwError};
use crate::runner::CommandRunner;
use crate::service::ServiceConfig;
use crate::supervisor::{ProbeBudget, ProbeBudgets};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Budgets with millisecond pauses so lifecycle tests run fast
pub fn fast_budgets() -> ProbeBudgets {
    ProbeBudgets {
        pre_start: ProbeBudget::new(2, Duration::from_millis(1)),
        startup: ProbeBudget::new(3, Duration::from_millis(1)),
        stop_verify: ProbeBudget::new(2, Duration::from_millis(1)),
        stop_rounds: 3,
    }
}

/// Service settings with short timeouts and no retire grace
pub fn fast_service_config() -> ServiceConfig {
    ServiceConfig {
        client: ClientConfig {
            io_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::from_millis(200),
            ..Default::default()
        },
        budgets: fast_budgets(),
        retire_grace: Duration::from_millis(1),
        instance: "test".to_string(),
    }
}

/// Simulated process table keyed by daemon port
#[derive(Default)]
pub struct FakeProcessTable {
    pub workers: Mutex<HashMap<u16, usize>>,
    pub spawned: Mutex<Vec<(String, Vec<String>)>>,
    /// Workers a started daemon ends up with instead of `children + 1`
    pub workers_on_start: Option<usize>,
    /// Keep daemons alive when `pkill` runs
    pub ignore_kills: bool,
    /// Number of `pkill` calls the daemons survive before dying
    pub survive_kills: usize,
    /// Daemons started on this port never finish forking their children
    pub stall_port: Option<u16>,
    /// Make the count pipeline print garbage
    pub broken_count: bool,
    pub count_calls: AtomicUsize,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a daemon with `workers` processes already listens on `port`
    pub fn set_workers(&self, port: u16, workers: usize) {
        self.workers.lock().unwrap().insert(port, workers);
    }

    pub fn workers(&self, port: u16) -> usize {
        self.workers.lock().unwrap().get(&port).copied().unwrap_or(0)
    }

    /// Every spawned command as (program, args)
    pub fn spawned(&self) -> Vec<(String, Vec<String>)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.spawned()
            .iter()
            .filter(|(program, _)| program == "pkill")
            .count()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

fn port_after(text: &str, flag: &str) -> Option<u16> {
    let rest = &text[text.find(flag)? + flag.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn arg_value(args: &[String], flag: &str) -> Option<usize> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}

#[async_trait]
impl CommandRunner for FakeProcessTable {
    async fn spawn(&self, program: &str, args: &[String]) -> Result<()> {
        self.spawned
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        if program == "pkill" {
            if !self.ignore_kills && self.kill_count() > self.survive_kills {
                if let Some(port) = args.last().and_then(|p| port_after(p, "--port ")) {
                    self.workers.lock().unwrap().remove(&port);
                }
            }
            return Ok(());
        }

        let port = arg_value(args, "--port").expect("daemon started without --port") as u16;
        let children = arg_value(args, "--num_children").unwrap_or(0);
        let workers = if self.stall_port == Some(port) {
            1
        } else {
            self.workers_on_start.unwrap_or(children + 1)
        };
        self.set_workers(port, workers);
        Ok(())
    }

    async fn output(&self, program: &str, args: &[String]) -> Result<String> {
        assert_eq!(program, "sh");
        self.count_calls.fetch_add(1, Ordering::SeqCst);

        if self.broken_count {
            return Ok("pgrep: not found\n".to_string());
        }

        let script = args.last().cloned().unwrap_or_default();
        let port = port_after(&script, "--port ").ok_or_else(|| VwError::WorkerCount {
            output: script.clone(),
        })?;

        // One extra match for the shell wrapper, like the real pipeline.
        Ok(format!("{}\n", self.workers(port) + 1))
    }
}

/// Reply the way the daemon does: `0.5`, or `0.5 <tag>` for `'tag` requests
pub fn echo_tag(line: &str) -> Option<String> {
    if line.starts_with("save_") {
        return None;
    }

    let tag = line
        .split_whitespace()
        .find_map(|token| token.strip_prefix('\''));
    Some(match tag {
        Some(tag) => format!("0.5 {}", tag),
        None => "0.5".to_string(),
    })
}

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// In-process daemon listening on an ephemeral port
pub struct FakeDaemon {
    pub port: u16,
    lines: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeDaemon {
    pub async fn start() -> Self {
        Self::with_responder(echo_tag).await
    }

    pub async fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let responder: Responder = Arc::new(responder);

        let handle = {
            let lines = lines.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let lines = lines.clone();
                    let responder = responder.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut reader = BufReader::new(read).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            lines.lock().unwrap().push(line.clone());
                            if let Some(reply) = responder(&line) {
                                if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                }
            })
        };

        Self {
            port,
            lines,
            accepted,
            handle,
        }
    }

    /// Every request line received so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
