//! Pool of sessions, one per egress route
//!
//! Every session in the pool is either free, busy with exactly one item, or failed.
//! State lives behind a single lock so that `take_free` can never hand the same
//! session to two workers. Releases and failures wake the dispatcher through a
//! `Notify`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::client::Session;
use crate::app::models::EgressRoute;
use crate::errors::{DownloadError, DownloadResult};

/// Session state as seen by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Free,
    Busy,
    Failed,
}

/// Handle to one pooled session
#[derive(Clone)]
pub struct EgressSession {
    id: usize,
    label: String,
    session: Arc<Session>,
}

impl EgressSession {
    /// Position in the pool
    pub fn id(&self) -> usize {
        self.id
    }

    /// Route label, safe for logs
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl fmt::Debug for EgressSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressSession")
            .field("id", &self.id)
            .field("route", &self.label)
            .finish()
    }
}

/// Error recorded against a failed session
#[derive(Debug)]
pub struct SessionFailure {
    pub session_id: usize,
    pub route: String,
    pub item_id: String,
    pub error: DownloadError,
}

#[derive(Debug)]
struct Slot {
    state: SessionState,
    failure: Option<SessionFailure>,
}

/// Fixed set of sessions bound to distinct egress routes
#[derive(Debug)]
pub struct EgressPool {
    sessions: Vec<EgressSession>,
    slots: Mutex<Vec<Slot>>,
    changed: Notify,
}

impl EgressPool {
    /// Builds the pool from an authenticated primary session
    ///
    /// The primary keeps its own route and becomes session 0. Every other distinct
    /// route in `routes` gets a replica carrying the primary's cookies for each of
    /// `cookie_urls`.
    ///
    /// # Errors
    ///
    /// Returns an error if a replica's client cannot be built for its route.
    pub fn initialize(
        primary: Session,
        routes: &[EgressRoute],
        cookie_urls: &[Url],
    ) -> DownloadResult<Self> {
        let mut seen = vec![primary.route().clone()];
        let mut sessions = Vec::with_capacity(routes.len().max(1));

        for route in routes {
            if seen.contains(route) {
                continue;
            }
            let replica = primary.for_route(route.clone())?;
            primary.copy_cookies_to(&replica, cookie_urls);
            debug!("Replicated session onto route {}", route);
            seen.push(route.clone());
            sessions.push(replica);
        }
        sessions.insert(0, primary);

        info!("Egress pool ready with {} route(s)", sessions.len());
        Ok(Self::from_sessions(sessions))
    }

    /// Pool over already-built sessions, all free
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        let sessions: Vec<EgressSession> = sessions
            .into_iter()
            .enumerate()
            .map(|(id, session)| EgressSession {
                id,
                label: session.route().label(),
                session: Arc::new(session),
            })
            .collect();
        let slots = sessions
            .iter()
            .map(|_| Slot {
                state: SessionState::Free,
                failure: None,
            })
            .collect();

        Self {
            sessions,
            slots: Mutex::new(slots),
            changed: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The primary session, used for discovery and authentication
    pub fn primary(&self) -> Option<&EgressSession> {
        self.sessions.first()
    }

    pub async fn has_free(&self) -> bool {
        let slots = self.slots.lock().await;
        slots.iter().any(|slot| slot.state == SessionState::Free)
    }

    /// Marks the lowest-numbered free session busy and returns it
    pub async fn take_free(&self) -> Option<EgressSession> {
        let mut slots = self.slots.lock().await;
        let (id, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.state == SessionState::Free)?;
        slot.state = SessionState::Busy;
        Some(self.sessions[id].clone())
    }

    /// Returns a busy session to the free set
    pub async fn release(&self, session: &EgressSession) {
        {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get_mut(session.id) {
                if slot.state == SessionState::Busy {
                    slot.state = SessionState::Free;
                }
            }
        }
        self.changed.notify_one();
    }

    /// Records a failure; the session stays out of rotation until `reset_all`
    pub async fn mark_failed(&self, session: &EgressSession, item_id: &str, error: DownloadError) {
        warn!(
            "Egress route {} failed on item {}: {}",
            session.label, item_id, error
        );
        {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get_mut(session.id) {
                slot.state = SessionState::Failed;
                slot.failure = Some(SessionFailure {
                    session_id: session.id,
                    route: session.label.clone(),
                    item_id: item_id.to_string(),
                    error,
                });
            }
        }
        self.changed.notify_one();
    }

    pub async fn has_failure(&self) -> bool {
        let slots = self.slots.lock().await;
        slots.iter().any(|slot| slot.state == SessionState::Failed)
    }

    /// Lowest-numbered failed session
    pub async fn first_failure(&self) -> Option<EgressSession> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .position(|slot| slot.state == SessionState::Failed)
            .map(|id| self.sessions[id].clone())
    }

    /// Moves the first recorded failure out; the session stays failed
    pub async fn take_failure(&self) -> Option<SessionFailure> {
        let mut slots = self.slots.lock().await;
        slots.iter_mut().find_map(|slot| slot.failure.take())
    }

    /// Clears busy and failed states, used before re-draining a whole queue
    pub async fn reset_all(&self) {
        {
            let mut slots = self.slots.lock().await;
            for slot in slots.iter_mut() {
                slot.state = SessionState::Free;
                slot.failure = None;
            }
        }
        debug!("Egress pool reset, {} session(s) free", self.sessions.len());
        self.changed.notify_one();
    }

    pub async fn states(&self) -> Vec<SessionState> {
        let slots = self.slots.lock().await;
        slots.iter().map(|slot| slot.state).collect()
    }

    /// Waits for a release or failure, or at most `poll`
    pub async fn wait_for_change(&self, poll: Duration) {
        tokio::select! {
            _ = self.changed.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}
