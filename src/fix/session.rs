use super::message::{OutboundMessage, SessionRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SessionSendError {
    #[error("session {0} not logged on")]
    NotLoggedOn(String),
    #[error("no session registered for role {0:?}")]
    NoSessionForRole(SessionRole),
}

/// Sends a decoded outbound message on a named session. Framing, sequence
/// numbers, and store-and-forward are the transport's job (spec §1); this
/// trait is the only seam the engine uses to reach it.
#[async_trait]
pub trait FixSessionSender: Send + Sync {
    async fn send(
        &self,
        session_id: &str,
        message: OutboundMessage,
    ) -> Result<(), SessionSendError>;
}

#[derive(Debug, Clone)]
struct SessionHandle {
    role: SessionRole,
    logged_on: bool,
}

/// Registry of known FIX sessions by role. Owns no transport state —
/// logon/logoff notifications update it; the router and engine only read
/// from it.
#[derive(Default)]
pub struct FixSessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl FixSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: impl Into<String>, role: SessionRole) {
        self.sessions.insert(
            session_id.into(),
            SessionHandle {
                role,
                logged_on: false,
            },
        );
    }

    pub fn set_logged_on(&self, session_id: &str, logged_on: bool) {
        if let Some(mut handle) = self.sessions.get_mut(session_id) {
            handle.logged_on = logged_on;
        }
    }

    pub fn role_of(&self, session_id: &str) -> Option<SessionRole> {
        self.sessions.get(session_id).map(|h| h.role)
    }

    /// The first logged-on order-entry (initiator) session, if any.
    pub fn find_logged_on_initiator(&self) -> Option<String> {
        self.sessions
            .iter()
            .find(|e| e.value().role == SessionRole::OrderEntry && e.value().logged_on)
            .map(|e| e.key().clone())
    }

    pub fn enumerate_by_role(&self, role: SessionRole) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|e| e.value().role == role)
            .map(|e| e.key().clone())
            .collect()
    }
}

/// Tracks the "not trade day" paused state described in spec §4.1: on a
/// Logout from the order-entry peer whose text contains "not trade day",
/// the engine stops attempting logons until a scheduled resume. This is
/// normal lifecycle, not an error (spec §7).
#[derive(Default)]
pub struct PausedState {
    paused: AtomicBool,
    resume_at: RwLock<Option<DateTime<Utc>>>,
}

impl PausedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Enter the paused state, scheduling a resume at the given time (the
    /// next configured trading window).
    pub fn pause_until(&self, resume_at: DateTime<Utc>) {
        self.paused.store(true, Ordering::SeqCst);
        *self.resume_at.write() = Some(resume_at);
        info!(resume_at = %resume_at, "session paused: not trade day");
    }

    /// Call periodically (e.g. from the Timeout/Monitor tick) with the
    /// current time; clears the pause once the scheduled window arrives.
    pub fn maybe_resume(&self, now: DateTime<Utc>) -> bool {
        let should_resume = matches!(*self.resume_at.read(), Some(at) if now >= at);
        if should_resume {
            self.paused.store(false, Ordering::SeqCst);
            *self.resume_at.write() = None;
            info!("session resumed at scheduled trading window");
        }
        should_resume
    }

    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        *self.resume_at.read()
    }
}

/// Returns true if a Logout's free text indicates the admin-level
/// "not trade day" condition described in spec §4.1.
pub fn is_not_trade_day(text: &str) -> bool {
    text.to_lowercase().contains("not trade day")
}

pub fn log_send_failure(session_id: &str, err: &SessionSendError) {
    warn!(session_id = %session_id, error = %err, "outbound send failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_logon_state() {
        let reg = FixSessionRegistry::new();
        reg.register("OE1", SessionRole::OrderEntry);
        reg.register("DC1", SessionRole::DropCopy);
        assert!(reg.find_logged_on_initiator().is_none());

        reg.set_logged_on("OE1", true);
        assert_eq!(reg.find_logged_on_initiator(), Some("OE1".to_string()));
        assert_eq!(reg.enumerate_by_role(SessionRole::DropCopy), vec!["DC1"]);
    }

    #[test]
    fn paused_state_resumes_at_scheduled_window() {
        let state = PausedState::new();
        let now = Utc::now();
        state.pause_until(now + chrono::Duration::hours(1));
        assert!(state.is_paused());
        assert!(!state.maybe_resume(now));
        assert!(state.maybe_resume(now + chrono::Duration::hours(2)));
        assert!(!state.is_paused());
    }

    #[test]
    fn detects_not_trade_day_text() {
        assert!(is_not_trade_day("Session closed: not trade day"));
        assert!(!is_not_trade_day("bad password"));
    }
}
