//! Reusable transport sessions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::error::TransportError;
use super::transport::{HttpCall, HttpResponse, HttpSession, SessionFactory};

/// Pool of idle sessions, grown on demand.
///
/// A session that failed mid-call is dropped instead of being returned.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    idle: Mutex<Vec<Box<dyn HttpSession>>>,
    max_idle: Option<usize>,
    created: AtomicUsize,
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("idle", &self.idle_count())
            .field("max_idle", &self.max_idle)
            .field("created", &self.created_count())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Create an empty pool. `max_idle` caps how many released sessions are kept.
    pub fn new(factory: Arc<dyn SessionFactory>, max_idle: Option<usize>) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Check out an idle session, or create one.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledSession, TransportError> {
        let existing = self.idle.lock().pop();
        let session = match existing {
            Some(session) => session,
            None => {
                let session = self.factory.create()?;
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(created = self.created_count(), "Created HTTP session");
                session
            }
        };
        Ok(PooledSession {
            session: Some(session),
            pool: Arc::clone(self),
            healthy: true,
        })
    }

    /// Return a session to the pool.
    pub fn release(&self, session: Box<dyn HttpSession>) {
        let mut idle = self.idle.lock();
        if self.max_idle.is_some_and(|cap| idle.len() >= cap) {
            return;
        }
        idle.push(session);
    }

    /// Sessions currently idle.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Sessions created over the pool's lifetime.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

/// A checked-out session, returned to its pool on drop unless it failed.
pub struct PooledSession {
    session: Option<Box<dyn HttpSession>>,
    pool: Arc<SessionPool>,
    healthy: bool,
}

impl PooledSession {
    /// Send `call`. A transport error, or dropping the future before it
    /// completes, marks the session for disposal.
    pub async fn send(&mut self, call: &HttpCall) -> Result<HttpResponse, TransportError> {
        let Some(session) = self.session.as_deref_mut() else {
            return Err(TransportError::Session("session already released".to_string()));
        };
        self.healthy = false;
        let result = session.send(call).await;
        self.healthy = result.is_ok();
        result
    }

    /// Drop the session instead of returning it.
    pub fn discard(mut self) {
        self.healthy = false;
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if self.healthy {
                self.pool.release(session);
            } else {
                tracing::debug!("Discarding failed HTTP session");
            }
        }
    }
}
