use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use crate::usecase::ports::data_source::DataSourceError;

type Connect<C> = Box<dyn Fn() -> Result<C, DataSourceError> + Send + Sync>;

/// Keeps up to `max_idle` open connections for reuse. Callers bound the
/// number of connections in use (see `QueryService`), so `get` never waits.
pub struct ConnectionPool<C> {
    idle: Mutex<Vec<C>>,
    max_idle: usize,
    connect: Connect<C>,
}

impl<C> ConnectionPool<C> {
    pub fn new(
        max_idle: usize,
        connect: impl Fn() -> Result<C, DataSourceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            connect: Box::new(connect),
        }
    }

    pub fn get(&self) -> Result<PooledConnection<'_, C>, DataSourceError> {
        let reused = self.lock_idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => (self.connect)()?,
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            broken: false,
        })
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<C>> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, conn: C) {
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// Returns its connection to the pool on drop unless marked broken.
pub struct PooledConnection<'p, C> {
    pool: &'p ConnectionPool<C>,
    conn: Option<C>,
    broken: bool,
}

impl<C> PooledConnection<'_, C> {
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.broken {
                self.pool.release(conn);
            }
        }
    }
}
