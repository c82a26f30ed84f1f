//! Driver session pool
//!
//! Sessions are created on demand and reused after release. Each driver kind
//! has its own slot holding at most `capacity` live sessions. Launches of one
//! kind are serialized, so after `failure_threshold` consecutive launch
//! failures the kind is marked unavailable and nobody launches it again.
//!
//! Closing a session may block (process teardown), so closes run on the
//! blocking thread pool when a runtime is present. `wait_closed` joins them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::model::DriverKind;

/// A live driver session (one browser automation endpoint)
pub trait DriverSession: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> DriverKind;

    /// Base URL of the WebDriver endpoint
    fn endpoint(&self) -> &str;

    /// Tear the session down. Must not fail; may block briefly.
    fn close(&mut self);
}

/// Launches new sessions for the pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn launch(&self, kind: DriverKind) -> Result<Box<dyn DriverSession>, PoolError>;
}

#[derive(Default)]
struct SlotState {
    idle: Vec<Box<dyn DriverSession>>,
    live: usize,
    consecutive_failures: usize,
    unavailable: bool,
}

struct KindSlot {
    kind: DriverKind,
    permits: Arc<Semaphore>,
    // Serializes "reuse or launch" so failures are counted one at a time
    launch: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl KindSlot {
    fn unavailable_error(&self) -> Option<PoolError> {
        let state = self.state.lock();
        state.unavailable.then(|| PoolError::Unavailable {
            kind: self.kind,
            failures: state.consecutive_failures,
        })
    }
}

#[derive(Default)]
struct PoolShared {
    slots: HashMap<DriverKind, Arc<KindSlot>>,
    closed: bool,
    closing: Vec<JoinHandle<()>>,
}

fn close_session(shared: &Mutex<PoolShared>, mut session: Box<dyn DriverSession>) {
    debug!(kind = %session.kind(), session = session.id(), "Closing driver session");
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let task = handle.spawn_blocking(move || session.close());
            shared.lock().closing.push(task);
        }
        Err(_) => session.close(),
    }
}

/// Snapshot of one driver kind's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStats {
    pub live: usize,
    pub idle: usize,
    pub consecutive_failures: usize,
    pub unavailable: bool,
}

/// Bounded pool of driver sessions, keyed by driver kind
pub struct DriverPool {
    factory: Arc<dyn SessionFactory>,
    capacity: usize,
    failure_threshold: usize,
    shared: Arc<Mutex<PoolShared>>,
}

impl DriverPool {
    /// `capacity` is the per-kind cap (the run's worker count), clamped to
    /// what a semaphore can hold
    pub fn new(factory: Arc<dyn SessionFactory>, capacity: usize, failure_threshold: usize) -> Self {
        Self {
            factory,
            capacity: capacity.clamp(1, Semaphore::MAX_PERMITS),
            failure_threshold: failure_threshold.max(1),
            shared: Arc::new(Mutex::new(PoolShared::default())),
        }
    }

    fn slot(&self, kind: DriverKind) -> Result<Arc<KindSlot>, PoolError> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(PoolError::Closed);
        }
        let capacity = self.capacity;
        let slot = shared.slots.entry(kind).or_insert_with(|| {
            Arc::new(KindSlot {
                kind,
                permits: Arc::new(Semaphore::new(capacity)),
                launch: tokio::sync::Mutex::new(()),
                state: Mutex::new(SlotState::default()),
            })
        });
        Ok(slot.clone())
    }

    /// Whether the kind has been given up after repeated launch failures
    pub fn is_unavailable(&self, kind: DriverKind) -> bool {
        self.shared
            .lock()
            .slots
            .get(&kind)
            .map(|slot| slot.state.lock().unavailable)
            .unwrap_or(false)
    }

    /// Get a session of `kind`, waiting for capacity if all are in use
    pub async fn acquire(&self, kind: DriverKind) -> Result<SessionGuard, PoolError> {
        let slot = self.slot(kind)?;
        if let Some(err) = slot.unavailable_error() {
            return Err(err);
        }

        let permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let _launching = slot.launch.lock().await;
        if let Some(err) = slot.unavailable_error() {
            return Err(err);
        }

        let reused = slot.state.lock().idle.pop();
        if let Some(session) = reused {
            debug!(kind = %kind, session = session.id(), "Reusing driver session");
            return Ok(self.guard(slot.clone(), session, permit));
        }

        match self.factory.launch(kind).await {
            Ok(session) => {
                {
                    let mut state = slot.state.lock();
                    state.consecutive_failures = 0;
                    state.live += 1;
                }
                info!(kind = %kind, session = session.id(), endpoint = session.endpoint(), "Driver session started");
                Ok(self.guard(slot.clone(), session, permit))
            }
            Err(e) => {
                let mut state = slot.state.lock();
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold && !state.unavailable {
                    state.unavailable = true;
                    warn!(
                        kind = %kind,
                        failures = state.consecutive_failures,
                        "Driver kind unavailable, remaining work items for it will fail"
                    );
                } else {
                    warn!(kind = %kind, failures = state.consecutive_failures, "Driver launch failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn guard(
        &self,
        slot: Arc<KindSlot>,
        session: Box<dyn DriverSession>,
        permit: OwnedSemaphorePermit,
    ) -> SessionGuard {
        SessionGuard {
            session: Some(session),
            slot,
            shared: self.shared.clone(),
            reusable: true,
            _permit: permit,
        }
    }

    /// Hand a session back. Equivalent to dropping the guard.
    pub fn release(&self, guard: SessionGuard) {
        drop(guard);
    }

    pub fn stats(&self, kind: DriverKind) -> Option<SlotStats> {
        let shared = self.shared.lock();
        shared.slots.get(&kind).map(|slot| {
            let state = slot.state.lock();
            SlotStats {
                live: state.live,
                idle: state.idle.len(),
                consecutive_failures: state.consecutive_failures,
                unavailable: state.unavailable,
            }
        })
    }

    /// Close idle sessions and refuse further acquisitions. Sessions still
    /// checked out are closed when their guards drop.
    pub fn shutdown(&self) {
        let slots: Vec<Arc<KindSlot>> = {
            let mut shared = self.shared.lock();
            if shared.closed {
                return;
            }
            shared.closed = true;
            shared.slots.values().cloned().collect()
        };

        for slot in slots {
            slot.permits.close();
            let idle = {
                let mut state = slot.state.lock();
                let idle = std::mem::take(&mut state.idle);
                state.live = state.live.saturating_sub(idle.len());
                idle
            };
            for session in idle {
                close_session(&self.shared, session);
            }
        }
    }

    /// Wait for every session close started so far to finish
    pub async fn wait_closed(&self) {
        loop {
            let pending = std::mem::take(&mut self.shared.lock().closing);
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    warn!("Driver session close failed: {}", e);
                }
            }
        }
    }
}

impl Drop for DriverPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive use of one session between acquire and release.
///
/// Dropping the guard returns the session to the pool, or closes it when it
/// was discarded, the pool has shut down, or the holder is unwinding from a
/// panic. This runs on every exit path of a worker, including timeouts.
pub struct SessionGuard {
    session: Option<Box<dyn DriverSession>>,
    slot: Arc<KindSlot>,
    shared: Arc<Mutex<PoolShared>>,
    reusable: bool,
    // Dropped after `Drop::drop` has put the session back
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard {
    pub fn session(&self) -> &dyn DriverSession {
        self.session
            .as_deref()
            .expect("session present until the guard drops")
    }

    pub fn id(&self) -> &str {
        self.session().id()
    }

    /// Do not hand this session out again; it is closed on release
    pub fn discard(&mut self) {
        self.reusable = false;
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("kind", &self.slot.kind)
            .field("session", &self.session.as_ref().map(|s| s.id().to_string()))
            .field("reusable", &self.reusable)
            .finish()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let closed = self.shared.lock().closed;
        if self.reusable && !closed && !std::thread::panicking() {
            self.slot.state.lock().idle.push(session);
            return;
        }
        {
            let mut state = self.slot.state.lock();
            state.live = state.live.saturating_sub(1);
        }
        close_session(&self.shared, session);
    }
}
