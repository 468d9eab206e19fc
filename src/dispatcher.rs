use crate::cache::ReferenceCache;
use crate::classifier::{self, Classification};
use crate::context::ExecutionContext;
use crate::engine::locate::LocateEngine;
use crate::engine::replication::ReplicationEngine;
use crate::errors::{Correlation, EngineError};
use crate::fix::message::{ExecutionReport, InboundMessage, QuoteResponse};
use crate::model::exec_type;
use crate::store::event_store::EventStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Everything a handler needs to decide whether it applies, without
/// re-deriving it from the raw report (spec §4.2).
struct ExecReportContext<'a> {
    report: &'a ExecutionReport,
    classification: Classification,
}

/// The per-(ExecType, OrdStatus) selection predicate from spec §4.2's
/// matrix. `Any` matches regardless of the paired tag.
#[derive(Clone, Copy)]
enum Selector {
    ExecType(char),
    OrdStatus(char),
    ExecTypeEither(char, char),
}

impl Selector {
    fn matches(self, ctx: &ExecReportContext) -> bool {
        match self {
            Selector::ExecType(t) => ctx.report.exec_type == t,
            Selector::OrdStatus(s) => ctx.report.ord_status == s,
            Selector::ExecTypeEither(a, b) => ctx.report.exec_type == a || ctx.report.exec_type == b,
        }
    }
}

/// Serialises handler invocations per `fixOrderId` (falling back to the
/// report's ClOrdID when no OrderID is present yet), per spec §5: cross-key
/// events run in parallel, same-key events never interleave.
#[derive(Default)]
struct KeyedSerializer {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedSerializer {
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn run_exclusive<F, Fut>(&self, key: &str, f: F) -> Result<(), EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), EngineError>>,
    {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        f().await
    }
}

/// Execution-Report Dispatcher (spec §4.2): classifies every inbound
/// message, then runs exactly one handler per event behind the per-key
/// serialisation queue. Errors are logged here and never propagated past
/// the dispatch boundary (spec §7).
pub struct Dispatcher {
    cache: Arc<ReferenceCache>,
    store: Arc<EventStore>,
    replication: Arc<ReplicationEngine>,
    locate: Arc<LocateEngine>,
    serializer: KeyedSerializer,
    ctx: ExecutionContext,
    /// Bounds concurrently-running handlers (spec §5: "a bounded worker
    /// pool, default 8, processes dispatched events"). Cross-key events
    /// still run in parallel up to this limit; the `KeyedSerializer` above
    /// is what keeps same-key events from interleaving.
    workers: Arc<tokio::sync::Semaphore>,
}

impl Dispatcher {
    pub fn new(
        cache: Arc<ReferenceCache>,
        store: Arc<EventStore>,
        replication: Arc<ReplicationEngine>,
        locate: Arc<LocateEngine>,
        ctx: ExecutionContext,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            cache,
            store,
            replication,
            locate,
            serializer: KeyedSerializer::default(),
            ctx,
            workers: Arc::new(tokio::sync::Semaphore::new(worker_pool_size.max(1))),
        }
    }

    pub async fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::Admin(_) => {
                // Admin lifecycle is the Session Router's concern (spec §4.1).
            }
            InboundMessage::ExecutionReport(report) => self.dispatch_execution_report(report).await,
            InboundMessage::QuoteResponse(response) => self.dispatch_quote_response(response).await,
        }
    }

    fn serialization_key(&self, report: &ExecutionReport) -> String {
        report
            .order_id
            .clone()
            .unwrap_or_else(|| report.cl_ord_id.clone())
    }

    async fn dispatch_execution_report(&self, report: ExecutionReport) {
        let key = self.serialization_key(&report);
        let correlation = Correlation {
            session_id: Some(report.session_id.clone()),
            exec_id: Some(report.exec_id.clone()),
            fix_order_id: report.order_id.clone(),
            fix_cl_ord_id: Some(report.cl_ord_id.clone()),
            symbol: Some(report.symbol.clone()),
        };

        let _permit = self.workers.acquire().await.expect("worker semaphore never closes");
        let started = self.ctx.time.now();
        let result = self
            .serializer
            .run_exclusive(&key, || async { self.handle_execution_report(&report).await })
            .await;
        let elapsed = (self.ctx.time.now() - started).num_milliseconds().max(0) as f64 / 1000.0;
        crate::metrics::observe_dispatch_latency(elapsed);

        if let Err(err) = result {
            crate::metrics::inc_dispatch_errors();
            error!(
                error = %err,
                session_id = ?correlation.session_id,
                exec_id = ?correlation.exec_id,
                fix_order_id = ?correlation.fix_order_id,
                fix_cl_ord_id = ?correlation.fix_cl_ord_id,
                symbol = ?correlation.symbol,
                "execution report handler failed, event not retried"
            );
        }
    }

    async fn dispatch_quote_response(&self, response: QuoteResponse) {
        let _permit = self.workers.acquire().await.expect("worker semaphore never closes");
        let key = response.quote_req_id.clone();
        let result = self
            .serializer
            .run_exclusive(&key, || async {
                self.locate.handle_quote_response(&response.session_id, &response).await
            })
            .await;
        if let Err(err) = result {
            error!(error = %err, quote_req_id = %key, "quote response handler failed");
        }
    }

    /// Classifies first (spec §4.3), then selects exactly one handler off
    /// the matrix in §4.2. Shadow and unknown-account events are appended
    /// and materialised but never handed to the Replication Engine, which
    /// is what keeps shadow fills purely observational.
    async fn handle_execution_report(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let classification = classifier::classify(&self.cache, &report.cl_ord_id, report.account.as_deref());
        let ctx = ExecReportContext {
            report,
            classification,
        };

        match classification {
            Classification::Shadow => {
                self.append_only(report);
                return Ok(());
            }
            Classification::UnknownAccount => {
                warn!(cl_ord_id = %report.cl_ord_id, "unknown account on execution report, appending without replication");
                self.append_only(report);
                return Ok(());
            }
            Classification::Primary => {}
        }

        let Some(account) = report.account.as_deref().and_then(|n| self.cache.account(n)) else {
            warn!(cl_ord_id = %report.cl_ord_id, "classified primary but account no longer resolves, appending only");
            self.append_only(report);
            return Ok(());
        };

        // Order mirrors the published selection matrix exactly: first match wins.
        if Selector::ExecType(exec_type::NEW).matches(&ctx) && report.ord_status == exec_type::NEW {
            return self.replication.handle_new_order(&account, report).await;
        }
        if Selector::ExecTypeEither(exec_type::PARTIAL_FILL, exec_type::FILL).matches(&ctx) {
            return self.replication.handle_fill(report).await;
        }
        if Selector::ExecType(exec_type::CANCELLED).matches(&ctx) && report.ord_status == exec_type::CANCELLED {
            return self.replication.handle_cancelled(report).await;
        }
        if Selector::ExecType(exec_type::REPLACED).matches(&ctx) && report.ord_status == exec_type::REPLACED {
            return self.replication.handle_replaced(report).await;
        }
        if Selector::ExecType(exec_type::PENDING_CANCEL).matches(&ctx) && report.ord_status == exec_type::PENDING_CANCEL {
            return self.replication.handle_pending(report).await;
        }
        if Selector::ExecType(exec_type::PENDING_REPLACE).matches(&ctx) && report.ord_status == exec_type::PENDING_REPLACE {
            return self.replication.handle_pending(report).await;
        }
        if Selector::OrdStatus('8').matches(&ctx) {
            return self.replication.handle_rejected(report).await;
        }
        if Selector::OrdStatus('B').matches(&ctx) {
            return self.locate.handle_calculated_report(&report.session_id, report).await;
        }

        warn!(
            exec_type = %report.exec_type,
            ord_status = %report.ord_status,
            cl_ord_id = %report.cl_ord_id,
            "execution report matched no handler, appending only"
        );
        self.append_only(report);
        Ok(())
    }

    fn append_only(&self, report: &ExecutionReport) {
        let event = crate::engine::replication::decode_event(report);
        match self.store.append_event(event) {
            Ok((_is_new, event)) => {
                if let Err(err) = self.store.upsert_order_from_event(&event) {
                    error!(error = %err, exec_id = %event.exec_id, "failed to materialise appended-only event");
                }
            }
            Err(err) => {
                error!(error = %err, exec_id = %report.exec_id, "failed to append execution report");
            }
        }
    }
}
