use crate::context::ExecutionContext;
use crate::engine::locate::LocateEngine;
use crate::model::LocateStatus;
use crate::store::event_store::EventStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout/Monitor (spec §4.5, §4.9): periodically expires LocateRequests
/// that have sat in PENDING past `locate_timeout_seconds`.
pub struct LocateMonitor {
    store: Arc<EventStore>,
    locate: Arc<LocateEngine>,
    ctx: ExecutionContext,
    timeout: chrono::Duration,
}

impl LocateMonitor {
    pub fn new(store: Arc<EventStore>, locate: Arc<LocateEngine>, ctx: ExecutionContext, timeout_seconds: u64) -> Self {
        Self {
            store,
            locate,
            ctx,
            timeout: chrono::Duration::seconds(timeout_seconds as i64),
        }
    }

    /// Runs forever, scanning every 10s. Intended to be spawned as its own
    /// task; shutdown is handled by dropping the task's JoinHandle.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = self.scan_once() {
                error!(error = %err, "locate monitor scan failed");
            }
        }
    }

    /// One scan pass, exposed separately so tests can drive it without a
    /// real timer.
    pub fn scan_once(&self) -> Result<usize, crate::store::redb_store::StoreError> {
        let now = self.ctx.time.now();
        let pending = self.store.pending_locates()?;
        crate::metrics::set_locates_pending(pending.len() as i64);
        let mut expired = 0;
        for mut locate in pending {
            if now - locate.created_at < self.timeout {
                continue;
            }
            if super::locate_fsm::guard_transition(
                locate.id,
                LocateStatus::Pending,
                LocateStatus::Expired,
                Some("T_locate exceeded"),
            )
            .is_err()
            {
                continue;
            }
            locate.status = LocateStatus::Expired;
            locate.updated_at = now;
            self.store.save_locate(&locate)?;
            crate::metrics::inc_locate_status("expired");
            if let Err(err) = self
                .locate
                .cancel_deferred_shadow(&locate.primary_cl_ord_id, &locate.shadow_account)
            {
                error!(error = %err, locate_id = locate.id, "failed to cancel deferred shadow after locate expiry");
            }
            info!(locate_id = locate.id, primary = %locate.primary_cl_ord_id, shadow = %locate.shadow_account, "locate expired");
            expired += 1;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReferenceCache;
    use crate::engine::locate::LocateEngine;
    use crate::fix::message::OutboundMessage;
    use crate::fix::session::{FixSessionSender, SessionSendError};
    use crate::model::LocateRequest;
    use crate::store::redb_store::RedbStore;
    use crate::store::wal::WalManager;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;

    struct NullSender;

    #[async_trait]
    impl FixSessionSender for NullSender {
        async fn send(&self, _session_id: &str, _message: OutboundMessage) -> Result<(), SessionSendError> {
            Ok(())
        }
    }

    fn new_store() -> Arc<EventStore> {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let db = Arc::new(RedbStore::new(&path).unwrap());
        std::mem::forget(path);
        let wal = Arc::new(WalManager::new(db.clone()));
        wal.initialize().unwrap();
        let store = Arc::new(EventStore::new(db, wal));
        store.initialize().unwrap();
        store
    }

    #[test]
    fn expires_pending_locates_past_timeout() {
        use crate::context::{DeterministicIdProvider, SimulatedTimeProvider};

        let store = new_store();
        let time = Arc::new(SimulatedTimeProvider::new(0));
        let ctx = ExecutionContext {
            time: time.clone(),
            id: Arc::new(DeterministicIdProvider::new()),
        };
        let cache = Arc::new(ReferenceCache::empty());
        let locate_engine = Arc::new(LocateEngine::new(cache, store.clone(), Arc::new(NullSender), ctx.clone()));
        let monitor = LocateMonitor::new(store.clone(), locate_engine, ctx.clone(), 30);

        let locate = LocateRequest {
            id: 1,
            order_id: 1,
            primary_cl_ord_id: "ABC".to_string(),
            shadow_account: "SHAD1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: dec!(100),
            status: LocateStatus::Pending,
            fix_quote_req_id: "Q1".to_string(),
            locate_route: "ROUTE1".to_string(),
            offer_px: None,
            offer_size: None,
            approved_qty: None,
            response_message: None,
            created_at: ctx.time.now(),
            updated_at: ctx.time.now(),
        };
        store.save_locate(&locate).unwrap();

        assert_eq!(monitor.scan_once().unwrap(), 0);

        time.advance(31_000);
        assert_eq!(monitor.scan_once().unwrap(), 1);
        let reloaded = store.get_locate(1).unwrap().unwrap();
        assert_eq!(reloaded.status, LocateStatus::Expired);
    }
}
