//! Connection pooling shared by both backends.
//!
//! A pool owns up to `max_size` connections produced by a
//! [`ConnectionManager`]. Checking out returns a [`PooledConnection`] guard
//! that hands the connection back when dropped. When the pool is exhausted
//! callers wait up to `connection_timeout` for a connection to come back.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Opens and checks connections for a pool.
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send;

    fn connect(&self) -> StorageResult<Self::Connection>;

    /// called when a connection comes back; invalid connections are discarded
    fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }
}

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub max_size: u32,
    /// connections opened eagerly when the pool is built
    pub min_idle: u32,
    pub connection_timeout: Duration,
    /// connections older than this are closed instead of reused
    pub max_lifetime: Option<Duration>,
}

impl PoolSettings {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size: max_size.max(1),
            min_idle: 0,
            connection_timeout: Duration::from_secs(30),
            max_lifetime: None,
        }
    }

    pub fn min_idle(mut self, value: u32) -> Self {
        self.min_idle = value;
        self
    }

    pub fn connection_timeout(mut self, value: Duration) -> Self {
        self.connection_timeout = value;
        self
    }

    pub fn max_lifetime(mut self, value: Duration) -> Self {
        self.max_lifetime = Some(value);
        self
    }
}

struct Idle<C> {
    conn: C,
    born: Instant,
}

struct PoolState<C> {
    idle: VecDeque<Idle<C>>,
    /// connections alive, idle or checked out
    created: u32,
    closed: bool,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    settings: PoolSettings,
    state: Mutex<PoolState<M::Connection>>,
    returned: Condvar,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn expired(&self, born: Instant) -> bool {
        self.settings
            .max_lifetime
            .map(|lifetime| born.elapsed() >= lifetime)
            .unwrap_or(false)
    }
}

/// A bounded pool of connections.
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create a pool and open `min_idle` connections up front.
    ///
    /// A failure to open the warm connections fails construction.
    pub fn new(manager: M, settings: PoolSettings) -> StorageResult<Self> {
        let warm = settings.min_idle.min(settings.max_size);
        let mut idle = VecDeque::with_capacity(warm as usize);
        for _ in 0..warm {
            idle.push_back(Idle {
                conn: manager.connect()?,
                born: Instant::now(),
            });
        }

        debug!(max_size = settings.max_size, warm, "connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                settings,
                state: Mutex::new(PoolState {
                    idle,
                    created: warm,
                    closed: false,
                }),
                returned: Condvar::new(),
            }),
        })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> StorageResult<PooledConnection<M>> {
        let timeout = self.inner.settings.connection_timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(StorageError::Closed);
            }

            // reuse an idle connection, retiring expired ones
            while let Some(idle) = state.idle.pop_front() {
                if self.inner.expired(idle.born) {
                    state.created -= 1;
                    continue;
                }
                return Ok(PooledConnection::new(&self.inner, idle.conn, idle.born));
            }

            // open a new one if under the limit
            if state.created < self.inner.settings.max_size {
                state.created += 1;
                drop(state);
                return match self.inner.manager.connect() {
                    Ok(conn) => Ok(PooledConnection::new(&self.inner, conn, Instant::now())),
                    Err(e) => {
                        self.inner.state.lock().created -= 1;
                        self.inner.returned.notify_one();
                        Err(e)
                    }
                };
            }

            if self.inner.returned.wait_until(&mut state, deadline).timed_out() {
                warn!(
                    max_size = self.inner.settings.max_size,
                    waited_ms = timeout.as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(StorageError::PoolTimeout { waited: timeout });
            }
        }
    }

    /// Close the pool. Idle connections are dropped now, checked-out ones on return.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.idle.len() as u32;
        state.idle.clear();
        state.created -= dropped;
        self.inner.returned.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the number of idle connections.
    pub fn available(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Get the number of live connections, idle or checked out.
    pub fn created(&self) -> usize {
        self.inner.state.lock().created as usize
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

/// A connection checked out of a [`ConnectionPool`].
pub struct PooledConnection<M: ConnectionManager> {
    pool: Arc<PoolInner<M>>,
    conn: Option<M::Connection>,
    born: Instant,
}

impl<M: ConnectionManager> PooledConnection<M> {
    fn new(pool: &Arc<PoolInner<M>>, conn: M::Connection, born: Instant) -> Self {
        Self {
            pool: Arc::clone(pool),
            conn: Some(conn),
            born,
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        // only taken in drop
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let keep = self.pool.manager.is_valid(&mut conn) && !self.pool.expired(self.born);

        let mut state = self.pool.state.lock();
        if keep && !state.closed {
            state.idle.push_back(Idle {
                conn,
                born: self.born,
            });
        } else {
            state.created -= 1;
        }
        self.pool.returned.notify_one();
    }
}
