use crate::cache::ReferenceCache;
use crate::context::ExecutionContext;
use crate::engine::replication::decode_event;
use crate::errors::EngineError;
use crate::fix::message::{ExecutionReport, OutboundMessage, QuoteResponse};
use crate::fix::session::FixSessionSender;
use crate::model::{self, LocateRequest, LocateStatus, OrderLifecycle, Route};
use crate::outbound::OutboundBuilder;
use crate::store::event_store::EventStore;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

const EMBEDDED_PREFIX: &str = "QL_";

fn base36(mut value: u128) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 alphabet is ASCII")
}

fn embedded_quote_req_id(shadow_account: &str, primary_root: &str, route: &str) -> String {
    format!("{EMBEDDED_PREFIX}{shadow_account}_{primary_root}_{route}")
}

fn parse_embedded(quote_req_id: &str) -> Option<(String, String, String)> {
    let rest = quote_req_id.strip_prefix(EMBEDDED_PREFIX)?;
    let mut parts = rest.splitn(3, '_');
    let shadow = parts.next()?.to_string();
    let primary = parts.next()?.to_string();
    let route = parts.next()?.to_string();
    Some((shadow, primary, route))
}

/// Decision point for an unsolicited TYPE_1 offer (spec §4.5). Default
/// policy accepts every offer that carries an OrderID; callers needing a
/// different policy implement this trait and pass it in.
pub trait LocateDecisionService: Send + Sync {
    fn accept(&self, offer: &ExecutionReport) -> bool;
}

pub struct AlwaysAcceptOffers;

impl LocateDecisionService for AlwaysAcceptOffers {
    fn accept(&self, offer: &ExecutionReport) -> bool {
        offer.order_id.is_some()
    }
}

/// One shadow copy awaiting a locate before its order can be released.
pub struct PendingShadowCopy {
    pub shadow_account: String,
    pub copy_qty: rust_decimal::Decimal,
    pub copy_broker: Option<String>,
    pub preferred_locate_route: Option<String>,
}

/// Locate Protocol Engine (spec §4.5). Owns the QuoteReqID mapping
/// (in-memory; re-derivable from the embedded form or from the persisted
/// LocateRequest if ever lost) and drives both route-type variants.
pub struct LocateEngine {
    cache: Arc<ReferenceCache>,
    store: Arc<EventStore>,
    sender: Arc<dyn FixSessionSender>,
    ctx: ExecutionContext,
    decisions: Arc<dyn LocateDecisionService>,
    qrid_mapper: DashMap<String, (String, String, String)>,
}

impl LocateEngine {
    pub fn new(
        cache: Arc<ReferenceCache>,
        store: Arc<EventStore>,
        sender: Arc<dyn FixSessionSender>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            cache,
            store,
            sender,
            ctx,
            decisions: Arc::new(AlwaysAcceptOffers),
            qrid_mapper: DashMap::new(),
        }
    }

    pub fn with_decision_service(mut self, decisions: Arc<dyn LocateDecisionService>) -> Self {
        self.decisions = decisions;
        self
    }

    fn select_route(&self, preferred: Option<&str>, broker_id: u128) -> Option<Route> {
        if let Some(name) = preferred {
            if let Some(route) = self.cache.route(name) {
                if route.is_locate_route {
                    return Some(route);
                }
            }
        }
        self.cache.active_locate_routes(broker_id).into_iter().next()
    }

    /// Begins the locate workflow for one short-sell shadow copy: selects
    /// a route, emits the Quote-Request, persists a PENDING LocateRequest,
    /// and stages a draft shadow Order (spec §4.5 steps 1-4, "deferred
    /// shadow release").
    pub async fn initiate(
        &self,
        session_id: &str,
        primary_root: &str,
        primary_symbol: &str,
        primary_side: char,
        primary_ord_type: char,
        primary_tif: char,
        primary_price: Option<rust_decimal::Decimal>,
        primary_stop_px: Option<rust_decimal::Decimal>,
        broker_id: u128,
        copy: &PendingShadowCopy,
    ) -> Result<(), EngineError> {
        let route = self
            .select_route(copy.preferred_locate_route.as_deref(), broker_id)
            .ok_or_else(|| EngineError::Business(format!("no active locate route for broker {broker_id}")))?;

        let short_qrid = base36(self.ctx.id.new_id());
        self.qrid_mapper.insert(
            short_qrid.clone(),
            (
                copy.shadow_account.clone(),
                primary_root.to_string(),
                route.name.clone(),
            ),
        );

        let request = OutboundBuilder::quote_request(
            &short_qrid,
            &copy.shadow_account,
            primary_symbol,
            copy.copy_qty,
            &route.name,
        );
        self.sender
            .send(session_id, OutboundMessage::QuoteRequest(request))
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        let now = self.ctx.time.now();
        let locate = LocateRequest {
            id: self.ctx.id.new_id(),
            order_id: self
                .store
                .get_order_by_root(primary_root)
                .map_err(EngineError::Persistence)?
                .map(|o| o.id)
                .unwrap_or_default(),
            primary_cl_ord_id: primary_root.to_string(),
            shadow_account: copy.shadow_account.clone(),
            symbol: primary_symbol.to_string(),
            quantity: copy.copy_qty,
            status: LocateStatus::Pending,
            fix_quote_req_id: short_qrid,
            locate_route: route.name.clone(),
            offer_px: None,
            offer_size: None,
            approved_qty: None,
            response_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save_locate(&locate).map_err(EngineError::Persistence)?;
        crate::metrics::inc_locate_status("pending");

        let shadow_root = format!("{}{}-{}", crate::classifier::SHADOW_CL_ORD_ID_PREFIX, copy.shadow_account, primary_root);
        if self
            .store
            .get_order_by_root(&shadow_root)
            .map_err(EngineError::Persistence)?
            .is_none()
        {
            self.store
                .create_shadow_order(
                    &copy.shadow_account,
                    primary_root,
                    &shadow_root,
                    &shadow_root,
                    primary_symbol,
                    primary_side,
                    primary_ord_type,
                    primary_tif,
                    copy.copy_qty,
                    primary_price,
                    primary_stop_px,
                    Some(route.name.clone()),
                    OrderLifecycle::Draft,
                    &self.ctx,
                )
                .map_err(EngineError::Persistence)?;
        }
        info!(shadow = %copy.shadow_account, primary = %primary_root, route = %route.name, "locate initiated, shadow order staged as draft");
        Ok(())
    }

    fn resolve_quote_req_id(
        &self,
        quote_req_id: &str,
    ) -> Option<(String, String, String)> {
        if let Some(mapping) = self.qrid_mapper.get(quote_req_id) {
            return Some(mapping.clone());
        }
        if let Some(parsed) = parse_embedded(quote_req_id) {
            return Some(parsed);
        }
        match self.store.find_locate_by_quote_req_id(quote_req_id) {
            Ok(Some(locate)) => Some((
                locate.shadow_account,
                locate.primary_cl_ord_id,
                locate.locate_route,
            )),
            _ => None,
        }
    }

    /// TYPE_0/TYPE_2 quote-response handler (spec §4.5).
    pub async fn handle_quote_response(
        &self,
        session_id: &str,
        response: &QuoteResponse,
    ) -> Result<(), EngineError> {
        let Some((shadow_account, primary_root, route)) =
            self.resolve_quote_req_id(&response.quote_req_id)
        else {
            warn!(quote_req_id = %response.quote_req_id, "quote response did not resolve to any pending locate");
            return Ok(());
        };

        let mut locate = self
            .store
            .find_locate_by_primary_and_shadow(&primary_root, &shadow_account)
            .map_err(EngineError::Persistence)?
            .ok_or_else(|| EngineError::Business("locate request not found for quote response".into()))?;

        locate.offer_px = Some(response.offer_px);
        locate.offer_size = Some(response.offer_size);
        locate.approved_qty = Some(response.offer_size);
        locate.locate_route = route.clone();
        locate.updated_at = self.ctx.time.now();
        self.store.save_locate(&locate).map_err(EngineError::Persistence)?;

        let shadow_root = format!(
            "{}{}-{}",
            crate::classifier::SHADOW_CL_ORD_ID_PREFIX,
            shadow_account,
            primary_root
        );
        if self
            .store
            .get_order_by_root(&shadow_root)
            .map_err(EngineError::Persistence)?
            .is_none()
        {
            let locate_order = OutboundBuilder::new_order_single(
                &shadow_root,
                &shadow_account,
                &response.symbol,
                model::side::BUY,
                model::ord_type::MARKET,
                Some(model::tif::DAY),
                response.offer_size,
                None,
                None,
                Some(route),
            );
            self.sender
                .send(session_id, OutboundMessage::NewOrderSingle(locate_order))
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;
        }
        info!(shadow = %shadow_account, primary = %primary_root, "locate order emitted from quote response");
        Ok(())
    }

    /// Any ExecutionReport with OrdStatus `B` (Calculated): under TYPE_0/2
    /// this is the confirming report that approves the locate; under
    /// TYPE_1 it may instead be a fresh, unsolicited offer.
    pub async fn handle_calculated_report(
        &self,
        session_id: &str,
        report: &ExecutionReport,
    ) -> Result<(), EngineError> {
        let (is_new, _event) = self
            .store
            .append_event(decode_event(report))
            .map_err(EngineError::Persistence)?;
        if !is_new {
            return Ok(());
        }

        if let Some(quote_req_id) = &report.quote_req_id {
            if let Some((shadow_account, primary_root, _)) = self.resolve_quote_req_id(quote_req_id) {
                return self
                    .approve_and_release(&primary_root, &shadow_account, report.last_qty)
                    .await;
            }
        }

        if self.is_known_locate_cl_ord_id(&report.cl_ord_id) {
            if let Some((primary_root, shadow_account)) = self.split_locate_cl_ord_id(&report.cl_ord_id) {
                return self
                    .approve_and_release(&primary_root, &shadow_account, report.order_qty)
                    .await;
            }
        }

        if self.decisions.accept(report) {
            let order_id = report.order_id.clone().unwrap_or_default();
            let accept = OutboundBuilder::locate_accept(
                report.cl_ord_id.as_str(),
                &order_id,
                report.account.as_deref().unwrap_or_default(),
                &report.symbol,
            );
            self.sender
                .send(session_id, OutboundMessage::LocateAcceptOffer(accept))
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;
        } else {
            let reject = OutboundBuilder::locate_reject(
                report.cl_ord_id.as_str(),
                report.order_id.as_deref().unwrap_or_default(),
                report.account.as_deref().unwrap_or_default(),
                &report.symbol,
                "offer declined",
            );
            self.sender
                .send(session_id, OutboundMessage::LocateRejectOffer(reject))
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;
        }
        Ok(())
    }

    fn is_known_locate_cl_ord_id(&self, cl_ord_id: &str) -> bool {
        crate::classifier::is_shadow_cl_ord_id(cl_ord_id)
    }

    fn split_locate_cl_ord_id(&self, cl_ord_id: &str) -> Option<(String, String)> {
        let rest = cl_ord_id.strip_prefix(crate::classifier::SHADOW_CL_ORD_ID_PREFIX)?;
        let (shadow, primary) = rest.split_once('-')?;
        Some((primary.to_string(), shadow.to_string()))
    }

    async fn approve_and_release(
        &self,
        primary_root: &str,
        shadow_account: &str,
        filled_qty: rust_decimal::Decimal,
    ) -> Result<(), EngineError> {
        let mut locate = self
            .store
            .find_locate_by_primary_and_shadow(primary_root, shadow_account)
            .map_err(EngineError::Persistence)?
            .ok_or_else(|| EngineError::Business("no locate request to approve".into()))?;

        let requested = locate.quantity;
        let status = if filled_qty >= requested {
            LocateStatus::ApprovedFull
        } else {
            LocateStatus::ApprovedPartial
        };
        if let Err(reason) = super::locate_fsm::guard_transition(locate.id, locate.status, status, None) {
            warn!(reason, "locate transition rejected, leaving state unchanged");
            return Ok(());
        }
        locate.status = status;
        locate.approved_qty = Some(filled_qty);
        locate.updated_at = self.ctx.time.now();
        self.store.save_locate(&locate).map_err(EngineError::Persistence)?;
        crate::metrics::inc_locate_status(if status == LocateStatus::ApprovedFull { "approved_full" } else { "approved_partial" });

        self.release_deferred_shadow(primary_root, shadow_account).await
    }

    async fn release_deferred_shadow(
        &self,
        primary_root: &str,
        shadow_account: &str,
    ) -> Result<(), EngineError> {
        let shadow_root = format!(
            "{}{}-{}",
            crate::classifier::SHADOW_CL_ORD_ID_PREFIX,
            shadow_account,
            primary_root
        );
        let Some(draft) = self
            .store
            .get_order_by_root(&shadow_root)
            .map_err(EngineError::Persistence)?
        else {
            return Ok(());
        };
        if draft.lifecycle != OrderLifecycle::Draft {
            return Ok(());
        }

        let order = OutboundBuilder::new_order_single(
            &draft.fix_cl_ord_id,
            shadow_account,
            &draft.symbol,
            draft.side,
            draft.ord_type,
            Some(draft.tif),
            draft.qty,
            draft.price,
            draft.stop_px,
            draft.ex_destination.clone(),
        );
        let session_id = self
            .store
            .get_order_by_root(primary_root)
            .map_err(EngineError::Persistence)?
            .and_then(|o| o.fix_order_id)
            .unwrap_or_default();
        self.sender
            .send(&session_id, OutboundMessage::NewOrderSingle(order))
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        let mut released = draft;
        released.lifecycle = OrderLifecycle::New;
        released.updated_at = self.ctx.time.now();
        self.store
            .save_draft_release(&released)
            .map_err(EngineError::Persistence)?;
        info!(shadow_root = %shadow_root, "deferred shadow order released");
        Ok(())
    }

    /// Called when a rejection ties back to an outstanding locate: marks it
    /// REJECTED before cancelling its staged draft (spec §4.5).
    pub fn reject_and_cancel_deferred(&self, primary_root: &str, shadow_account: &str) -> Result<(), EngineError> {
        if let Some(mut locate) = self
            .store
            .find_locate_by_primary_and_shadow(primary_root, shadow_account)
            .map_err(EngineError::Persistence)?
        {
            if !locate.status.is_terminal() {
                if let Err(reason) =
                    super::locate_fsm::guard_transition(locate.id, locate.status, LocateStatus::Rejected, Some("execution rejected"))
                {
                    warn!(reason, "locate transition rejected, leaving state unchanged");
                } else {
                    locate.status = LocateStatus::Rejected;
                    locate.updated_at = self.ctx.time.now();
                    self.store.save_locate(&locate).map_err(EngineError::Persistence)?;
                    crate::metrics::inc_locate_status("rejected");
                }
            }
        }
        self.cancel_deferred_shadow(primary_root, shadow_account)
    }

    /// Called when a LocateRequest transitions to REJECTED/EXPIRED: cancel
    /// the staged draft instead of releasing it.
    pub fn cancel_deferred_shadow(&self, primary_root: &str, shadow_account: &str) -> Result<(), EngineError> {
        let shadow_root = format!(
            "{}{}-{}",
            crate::classifier::SHADOW_CL_ORD_ID_PREFIX,
            shadow_account,
            primary_root
        );
        if let Some(draft) = self
            .store
            .get_order_by_root(&shadow_root)
            .map_err(EngineError::Persistence)?
        {
            if draft.lifecycle == OrderLifecycle::Draft {
                let mut cancelled = draft;
                cancelled.lifecycle = OrderLifecycle::Cancelled;
                cancelled.updated_at = self.ctx.time.now();
                self.store
                    .save_draft_cancellation(&cancelled)
                    .map_err(EngineError::Persistence)?;
                info!(shadow_root = %shadow_root, "deferred shadow order cancelled, locate did not approve");
            }
        }
        Ok(())
    }
}
