use crate::context::ExecutionContext;
use crate::dispatcher::Dispatcher;
use crate::fix::message::{admin_msg_type, AdminMessage, InboundMessage, SessionRole};
use crate::fix::session::{is_not_trade_day, FixSessionRegistry, PausedState};
use std::sync::Arc;
use tracing::info;

/// Session Router (spec §4.1): owns session role/logon-state tracking and
/// the "not trade day" pause, and hands every decoded inbound message to
/// the dispatcher. It never touches execution-report semantics itself.
pub struct SessionRouter {
    registry: Arc<FixSessionRegistry>,
    paused: Arc<PausedState>,
    dispatcher: Arc<Dispatcher>,
    ctx: ExecutionContext,
    resume_after: chrono::Duration,
}

impl SessionRouter {
    pub fn new(
        registry: Arc<FixSessionRegistry>,
        paused: Arc<PausedState>,
        dispatcher: Arc<Dispatcher>,
        ctx: ExecutionContext,
        resume_after_seconds: i64,
    ) -> Self {
        Self {
            registry,
            paused,
            dispatcher,
            ctx,
            resume_after: chrono::Duration::seconds(resume_after_seconds),
        }
    }

    pub fn register_session(&self, session_id: impl Into<String>, role: SessionRole) {
        self.registry.register(session_id, role);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_paused()
    }

    /// Entry point for every message a session decodes, regardless of
    /// role — the drop-copy acceptor and the order-entry initiator both
    /// funnel through here.
    pub async fn on_inbound(&self, message: InboundMessage) {
        match &message {
            InboundMessage::Admin(admin) => self.handle_admin(admin),
            InboundMessage::ExecutionReport(_) | InboundMessage::QuoteResponse(_) => {
                self.dispatcher.dispatch(message).await;
            }
        }
    }

    /// Drop-copy logon must never be rejected on sequence mismatch here —
    /// that synchronization belongs to the transport (spec §4.1). This only
    /// tracks logged-on state and the order-entry "not trade day" pause.
    fn handle_admin(&self, admin: &AdminMessage) {
        match admin.msg_type {
            admin_msg_type::LOGON => {
                self.registry.set_logged_on(&admin.session_id, true);
                info!(session_id = %admin.session_id, "session logged on");
            }
            admin_msg_type::LOGOUT => {
                self.registry.set_logged_on(&admin.session_id, false);
                let is_order_entry = self.registry.role_of(&admin.session_id) == Some(SessionRole::OrderEntry);
                let text_says_not_trade_day = admin.text.as_deref().map(is_not_trade_day).unwrap_or(false);
                if is_order_entry && text_says_not_trade_day {
                    let resume_at = self.ctx.time.now() + self.resume_after;
                    self.paused.pause_until(resume_at);
                } else {
                    info!(session_id = %admin.session_id, "session logged out");
                }
            }
            admin_msg_type::HEARTBEAT | admin_msg_type::TEST_REQUEST | admin_msg_type::RESEND_REQUEST | admin_msg_type::SEQUENCE_RESET | admin_msg_type::REJECT => {
                // Observed for lifecycle only; sequencing belongs to the transport.
            }
            other => {
                info!(session_id = %admin.session_id, msg_type = %other, "unrecognised admin message type, ignored");
            }
        }
    }

    /// Call periodically (from the Timeout/Monitor tick) so the paused
    /// state clears once the scheduled trading window arrives.
    pub fn maybe_resume(&self) -> bool {
        self.paused.maybe_resume(self.ctx.time.now())
    }

    pub fn find_logged_on_initiator(&self) -> Option<String> {
        self.registry.find_logged_on_initiator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReferenceCache;
    use crate::engine::locate::LocateEngine;
    use crate::engine::replication::ReplicationEngine;
    use crate::fix::message::OutboundMessage;
    use crate::fix::session::{FixSessionSender, SessionSendError};
    use crate::store::event_store::EventStore;
    use crate::store::redb_store::RedbStore;
    use crate::store::wal::WalManager;
    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    struct NullSender;

    #[async_trait]
    impl FixSessionSender for NullSender {
        async fn send(&self, _session_id: &str, _message: OutboundMessage) -> Result<(), SessionSendError> {
            Ok(())
        }
    }

    fn new_router() -> SessionRouter {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let db = Arc::new(RedbStore::new(&path).unwrap());
        std::mem::forget(path);
        let wal = Arc::new(WalManager::new(db.clone()));
        wal.initialize().unwrap();
        let store = Arc::new(EventStore::new(db, wal));
        store.initialize().unwrap();

        let cache = Arc::new(ReferenceCache::empty());
        let ctx = ExecutionContext::new_simulated(0);
        let sender: Arc<dyn FixSessionSender> = Arc::new(NullSender);
        let locate = Arc::new(LocateEngine::new(cache.clone(), store.clone(), sender.clone(), ctx.clone()));
        let replication = Arc::new(ReplicationEngine::new(cache.clone(), store.clone(), sender, locate.clone(), ctx.clone()));
        let dispatcher = Arc::new(Dispatcher::new(cache, store, replication, locate, ctx.clone(), 8));
        let registry = Arc::new(FixSessionRegistry::new());
        let paused = Arc::new(PausedState::new());
        SessionRouter::new(registry, paused, dispatcher, ctx, 3600)
    }

    #[test]
    fn logon_marks_session_logged_on() {
        let router = new_router();
        router.register_session("OE1", SessionRole::OrderEntry);
        router.handle_admin(&AdminMessage {
            msg_type: admin_msg_type::LOGON,
            session_id: "OE1".to_string(),
            text: None,
        });
        assert_eq!(router.find_logged_on_initiator(), Some("OE1".to_string()));
    }

    #[test]
    fn not_trade_day_logout_pauses_order_entry() {
        let router = new_router();
        router.register_session("OE1", SessionRole::OrderEntry);
        router.handle_admin(&AdminMessage {
            msg_type: admin_msg_type::LOGON,
            session_id: "OE1".to_string(),
            text: None,
        });
        router.handle_admin(&AdminMessage {
            msg_type: admin_msg_type::LOGOUT,
            session_id: "OE1".to_string(),
            text: Some("session closed: not trade day".to_string()),
        });
        assert!(router.is_paused());
    }

    #[test]
    fn ordinary_logout_does_not_pause() {
        let router = new_router();
        router.register_session("DC1", SessionRole::DropCopy);
        router.handle_admin(&AdminMessage {
            msg_type: admin_msg_type::LOGOUT,
            session_id: "DC1".to_string(),
            text: Some("bad password".to_string()),
        });
        assert!(!router.is_paused());
    }
}
