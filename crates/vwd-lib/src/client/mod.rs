//! Pooled client for the daemon's line protocol
//!
//! Every call checks out its own connection for the whole exchange, so
//! response line *i* always belongs to request line *i*.

mod pool;
mod protocol;

pub use pool::{ConnectionPool, PooledConnection};
pub use protocol::{encode_batch, parse_prediction, save_command, SAVE_PREFIX};

use crate::error::{Result, VwError};
use crate::models::Prediction;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

/// Configuration for the daemon client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon host, empty for localhost
    pub host: String,
    /// Upper bound of pooled connections
    pub max_connections: usize,
    /// Deadline for the write and for each response line
    pub io_timeout: Duration,
    /// How long to wait for a free pooled connection
    pub acquire_timeout: Duration,
    /// Deadline for dialing a new connection
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            max_connections: 2,
            io_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Client bound to one daemon port
#[derive(Debug)]
pub struct Client {
    pool: Arc<ConnectionPool>,
    port: u16,
    io_timeout: Duration,
}

impl Client {
    /// Connect a pool to the daemon listening on `port`
    pub async fn connect(port: u16, config: &ClientConfig) -> Result<Self> {
        let pool = ConnectionPool::connect(
            &config.host,
            port,
            config.max_connections,
            config.acquire_timeout,
            config.connect_timeout,
        )
        .await?;

        Ok(Self {
            pool,
            port,
            io_timeout: config.io_timeout,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Close the pool; later calls fail with `PoolClosed`
    pub fn disconnect(&self) {
        self.pool.close();
    }

    /// Send requests in one write and, if asked to, read one line per request.
    ///
    /// A daemon that closes the connection early leaves the remaining slots
    /// empty instead of failing the call.
    pub async fn ask<S: AsRef<str>>(
        &self,
        wait_response: bool,
        requests: &[S],
    ) -> Result<Vec<String>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let data = encode_batch(requests);
        let mut conn = self.pool.acquire().await?;

        let written = tokio::time::timeout(self.io_timeout, conn.stream().write_all(&data)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                conn.mark_unusable();
                return Err(VwError::Write(e));
            }
            Err(_) => {
                conn.mark_unusable();
                return Err(VwError::Timeout {
                    op: "write",
                    after: self.io_timeout,
                });
            }
        }

        if !wait_response {
            return Ok(Vec::new());
        }

        let mut responses = Vec::with_capacity(requests.len());
        let mut eof = false;
        {
            let mut reader = BufReader::new(conn.stream());
            for _ in 0..requests.len() {
                let mut line = String::new();
                if !eof {
                    match tokio::time::timeout(self.io_timeout, reader.read_line(&mut line)).await {
                        Ok(Ok(0)) => eof = true,
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            drop(reader);
                            conn.mark_unusable();
                            return Err(VwError::Read(e));
                        }
                        Err(_) => {
                            drop(reader);
                            conn.mark_unusable();
                            return Err(VwError::Timeout {
                                op: "read",
                                after: self.io_timeout,
                            });
                        }
                    }
                }
                responses.push(line);
            }
        }

        if eof {
            debug!(port = self.port, "Daemon closed connection mid-response");
            conn.mark_unusable();
        }

        Ok(responses)
    }

    /// Get one prediction per request line.
    ///
    /// Fails on the first unparsable response; no partial results are returned.
    pub async fn predict<S: AsRef<str>>(&self, requests: &[S]) -> Result<Vec<Prediction>> {
        self.ask(true, requests)
            .await?
            .iter()
            .map(|line| parse_prediction(line))
            .collect()
    }

    /// Ask the daemon to save its model to `path` without waiting for it
    pub async fn dump_model(&self, path: &Path) -> Result<()> {
        self.ask(false, &[save_command(path)]).await?;
        Ok(())
    }
}
