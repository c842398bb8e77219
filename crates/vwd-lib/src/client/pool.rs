//! Bounded pool of TCP connections to one daemon port
//!
//! A semaphore caps the number of live connections. Idle connections are
//! kept on a stack and reused; a connection is only put back when the
//! exchange that used it finished cleanly.

use crate::error::{Result, VwError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Connection pool for a single (host, port) pair
#[derive(Debug)]
pub struct ConnectionPool {
    addr: String,
    max_connections: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<TcpStream>>,
    acquire_timeout: Duration,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool, dialing half of `max_connections` up front
    pub async fn connect(
        host: &str,
        port: u16,
        max_connections: usize,
        acquire_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let host = if host.is_empty() { "127.0.0.1" } else { host };
        let addr = format!("{}:{}", host, port);

        if max_connections == 0 {
            return Err(VwError::PoolCreation {
                addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "max connections must be at least 1",
                ),
            });
        }

        let initial = max_connections / 2;
        let mut idle = Vec::with_capacity(max_connections);
        for _ in 0..initial {
            let stream = dial(&addr, connect_timeout)
                .await
                .map_err(|source| VwError::PoolCreation {
                    addr: addr.clone(),
                    source,
                })?;
            idle.push(stream);
        }

        info!(
            addr = %addr,
            initial,
            max = max_connections,
            "Connection pool created"
        );

        Ok(Arc::new(Self {
            addr,
            max_connections,
            permits: Arc::new(Semaphore::new(max_connections)),
            idle: Mutex::new(idle),
            acquire_timeout,
            connect_timeout,
            closed: AtomicBool::new(false),
        }))
    }

    /// Check out a connection for exclusive use
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(VwError::PoolClosed {
                addr: self.addr.clone(),
            });
        }

        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| VwError::PoolExhausted {
                addr: self.addr.clone(),
                max: self.max_connections,
                waited: self.acquire_timeout,
            })?
            .map_err(|_| VwError::PoolClosed {
                addr: self.addr.clone(),
            })?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let stream = match reused {
            Some(stream) => stream,
            None => {
                debug!(addr = %self.addr, "Dialing new pooled connection");
                dial(&self.addr, self.connect_timeout)
                    .await
                    .map_err(|source| VwError::Connect {
                        addr: self.addr.clone(),
                        source,
                    })?
            }
        };

        Ok(PooledConnection {
            stream: Some(stream),
            reusable: true,
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Drop idle connections and refuse new checkouts
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
        info!(addr = %self.addr, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.max_connections - self.permits.available_permits()
    }

    /// Connections waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn put_back(&self, stream: TcpStream) {
        if self.is_closed() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(stream);
        }
    }
}

async fn dial(addr: &str, connect_timeout: Duration) -> std::io::Result<TcpStream> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connection checked out of a [`ConnectionPool`].
///
/// Returned to the pool on drop unless marked unusable.
#[derive(Debug)]
pub struct PooledConnection {
    stream: Option<TcpStream>,
    reusable: bool,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn stream(&mut self) -> &mut TcpStream {
        self.stream
            .as_mut()
            .expect("stream is only taken in drop")
    }

    /// Close the connection instead of returning it to the pool
    pub fn mark_unusable(&mut self) {
        self.reusable = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if self.reusable {
                self.pool.put_back(stream);
            }
        }
    }
}
