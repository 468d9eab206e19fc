use crate::cache::ReferenceCache;
use crate::context::ExecutionContext;
use crate::copy_rules::{resolve_target_route, CopyRuleEvaluator};
use crate::engine::locate::{LocateEngine, PendingShadowCopy};
use crate::errors::EngineError;
use crate::fix::message::{ExecutionReport, OutboundMessage};
use crate::fix::session::FixSessionSender;
use crate::model::{self, ord_type, side, Account, OrderEvent, OrderLifecycle};
use crate::outbound::OutboundBuilder;
use crate::store::event_store::EventStore;
use std::sync::Arc;
use tracing::{info, warn};

pub const LOCATE_ORDER_CL_ORD_ID_PREFIX: &str = "LOC-";

pub(crate) fn decode_event(report: &ExecutionReport) -> OrderEvent {
    OrderEvent {
        id: 0,
        order_id: None,
        exec_id: report.exec_id.clone(),
        exec_type: report.exec_type,
        ord_status: report.ord_status,
        fix_order_id: report.order_id.clone(),
        fix_cl_ord_id: report.cl_ord_id.clone(),
        fix_orig_cl_ord_id: report.orig_cl_ord_id.clone(),
        account: report.account.clone(),
        symbol: report.symbol.clone(),
        side: report.side,
        qty: report.order_qty,
        price: report.price,
        stop_px: report.stop_px,
        avg_px: report.avg_px,
        last_px: report.last_px,
        last_qty: report.last_qty,
        cum_qty: report.cum_qty,
        leaves_qty: report.leaves_qty,
        transact_time: report.transact_time,
        session_id: report.session_id.clone(),
        raw_message: report.raw_message.clone(),
    }
}

fn is_locate_order(report: &ExecutionReport, cache: &ReferenceCache) -> bool {
    if report.cl_ord_id.starts_with(LOCATE_ORDER_CL_ORD_ID_PREFIX) {
        return true;
    }
    report.side == side::BUY
        && report
            .ex_destination
            .as_deref()
            .map(|dest| cache.route(dest).map(|r| r.is_locate_route).unwrap_or(false))
            .unwrap_or(false)
}

fn shadow_cl_ord_id(shadow_account: &str, primary_root: &str) -> String {
    format!("{}{}-{}", crate::classifier::SHADOW_CL_ORD_ID_PREFIX, shadow_account, primary_root)
}

/// Replication Engine (spec §4.4): the primary-account handlers that fan
/// out copies to shadow accounts and maintain per-primary state.
pub struct ReplicationEngine {
    cache: Arc<ReferenceCache>,
    store: Arc<EventStore>,
    sender: Arc<dyn FixSessionSender>,
    locate: Arc<LocateEngine>,
    ctx: ExecutionContext,
}

impl ReplicationEngine {
    pub fn new(
        cache: Arc<ReferenceCache>,
        store: Arc<EventStore>,
        sender: Arc<dyn FixSessionSender>,
        locate: Arc<LocateEngine>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            cache,
            store,
            sender,
            locate,
            ctx,
        }
    }

    fn append_and_materialise(&self, report: &ExecutionReport) -> Result<(bool, OrderEvent), EngineError> {
        let event = decode_event(report);
        self.store.append_event(event).map_err(EngineError::Persistence)
    }

    /// ExecType=0, OrdStatus=0: a brand-new primary order.
    pub async fn handle_new_order(
        &self,
        account: &Account,
        report: &ExecutionReport,
    ) -> Result<(), EngineError> {
        let (is_new, event) = self.append_and_materialise(report)?;
        if self
            .store
            .get_order_by_root(&report.cl_ord_id)
            .map_err(EngineError::Persistence)?
            .is_none()
        {
            self.store
                .create_primary_order(&event, &self.ctx)
                .map_err(EngineError::Persistence)?;
        }
        if !is_new {
            return Ok(());
        }

        if is_locate_order(report, &self.cache) {
            info!(cl_ord_id = %report.cl_ord_id, "locate order observed, not replicated");
            return Ok(());
        }

        match report.ord_type {
            ord_type::STOP_LIMIT => {
                info!(cl_ord_id = %report.cl_ord_id, "stop-limit primary new order persisted only, not replicated (StopPx unavailable on report)");
                return Ok(());
            }
            ord_type::MARKET | ord_type::LIMIT | ord_type::STOP_MARKET => {}
            other => {
                warn!(ord_type = %other, "unrecognised OrdType, persisting without replication");
                return Ok(());
            }
        }

        let evaluator = CopyRuleEvaluator::new(&self.cache);
        let instructions = evaluator.evaluate(&account.number, report.ord_type, report.order_qty);

        let is_short = side::is_short(report.side);
        for instruction in instructions {
            let target_route = resolve_target_route(
                &instruction,
                report.ex_destination.as_deref().unwrap_or_default(),
                false,
            )
            .to_string();

            if is_short {
                let copy = PendingShadowCopy {
                    shadow_account: instruction.shadow_account.clone(),
                    copy_qty: instruction.copy_qty,
                    copy_broker: instruction.copy_broker.clone(),
                    preferred_locate_route: instruction.locate_route.clone(),
                };
                let broker_id = self
                    .cache
                    .account(&instruction.shadow_account)
                    .map(|a| a.broker_id)
                    .unwrap_or(account.broker_id);
                self.locate
                    .initiate(
                        &report.session_id,
                        &report.cl_ord_id,
                        &report.symbol,
                        report.side,
                        report.ord_type,
                        report.time_in_force.unwrap_or(model::tif::DAY),
                        report.price,
                        report.stop_px,
                        broker_id,
                        &copy,
                    )
                    .await?;
                continue;
            }

            let shadow_id = shadow_cl_ord_id(&instruction.shadow_account, &report.cl_ord_id);
            if self
                .store
                .get_order_by_root(&shadow_id)
                .map_err(EngineError::Persistence)?
                .is_some()
            {
                continue;
            }

            let order = OutboundBuilder::new_order_single(
                &shadow_id,
                &instruction.shadow_account,
                &report.symbol,
                report.side,
                report.ord_type,
                report.time_in_force,
                instruction.copy_qty,
                report.price,
                report.stop_px,
                Some(target_route.clone()),
            );
            self.sender
                .send(&report.session_id, OutboundMessage::NewOrderSingle(order))
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;

            self.store
                .create_shadow_order(
                    &instruction.shadow_account,
                    &report.cl_ord_id,
                    &shadow_id,
                    &shadow_id,
                    &report.symbol,
                    report.side,
                    report.ord_type,
                    report.time_in_force.unwrap_or(model::tif::DAY),
                    instruction.copy_qty,
                    report.price,
                    report.stop_px,
                    Some(target_route),
                    OrderLifecycle::New,
                    &self.ctx,
                )
                .map_err(EngineError::Persistence)?;
            crate::metrics::inc_shadow_orders_emitted();
            info!(shadow = %instruction.shadow_account, primary = %report.cl_ord_id, "shadow order emitted");
        }
        Ok(())
    }

    /// ExecType=5, OrdStatus=5: primary replace.
    pub async fn handle_replaced(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let (is_new, _event) = self.append_and_materialise(report)?;
        // Root must be resolved from OrigClOrdID: report.cl_ord_id is the new
        // literal wire id and has no alias yet the first time it is seen.
        let lookup_key = report.orig_cl_ord_id.as_deref().unwrap_or(report.cl_ord_id.as_str());
        let primary_root = self.store.resolve_root(lookup_key).map_err(EngineError::Persistence)?;
        self.store
            .upsert_order_from_event(&decode_event(report))
            .map_err(EngineError::Persistence)?;
        self.store
            .register_outbound_cl_ord_id(&primary_root, &report.cl_ord_id)
            .map_err(EngineError::Persistence)?;
        if !is_new {
            return Ok(());
        }

        let evaluator = CopyRuleEvaluator::new(&self.cache);
        let account_number = report.account.clone().unwrap_or_default();
        let instructions = evaluator.evaluate(&account_number, report.ord_type, report.order_qty);

        for instruction in instructions {
            let shadow_root = shadow_cl_ord_id(&instruction.shadow_account, &primary_root);
            let Some(shadow_order) = self
                .store
                .get_order_by_root(&shadow_root)
                .map_err(EngineError::Persistence)?
            else {
                continue;
            };
            if shadow_order.lifecycle == OrderLifecycle::Draft {
                continue;
            }

            // OrigClOrdID ≠ ClOrdID is a hard FIX rule (spec §4.8). The
            // shadow's last known wire id never advances past its root once
            // replaced (only an alias is recorded), so the candidate would
            // collide with it on every replace; suffix whenever it would.
            let new_shadow_cl_ord_id = if shadow_root == shadow_order.fix_cl_ord_id {
                let seq = self.store.next_replace_seq(&primary_root).map_err(EngineError::Persistence)?;
                format!("{shadow_root}-R{seq}")
            } else {
                shadow_root.clone()
            };

            let replace = OutboundBuilder::cancel_replace(
                &new_shadow_cl_ord_id,
                &shadow_order.fix_cl_ord_id,
                &instruction.shadow_account,
                &report.symbol,
                report.side,
                report.ord_type,
                report.time_in_force,
                instruction.copy_qty,
                report.price,
                report.stop_px,
                report.ex_destination.clone(),
            );
            self.sender
                .send(&report.session_id, OutboundMessage::CancelReplace(replace))
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;

            self.store
                .register_outbound_cl_ord_id(&shadow_root, &new_shadow_cl_ord_id)
                .map_err(EngineError::Persistence)?;
            info!(shadow = %instruction.shadow_account, new_cl_ord_id = %new_shadow_cl_ord_id, "shadow replace emitted");
        }
        Ok(())
    }

    /// ExecType=4, OrdStatus=4: primary cancel.
    pub async fn handle_cancelled(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let (is_new, _event) = self.append_and_materialise(report)?;
        self.store
            .upsert_order_from_event(&decode_event(report))
            .map_err(EngineError::Persistence)?;
        if !is_new {
            return Ok(());
        }

        let primary_root = self.store.resolve_root(&report.cl_ord_id).map_err(EngineError::Persistence)?;
        let evaluator = CopyRuleEvaluator::new(&self.cache);
        let account_number = report.account.clone().unwrap_or_default();
        let instructions = evaluator.evaluate(&account_number, report.ord_type, report.order_qty);

        for instruction in instructions {
            let shadow_root = shadow_cl_ord_id(&instruction.shadow_account, &primary_root);
            if self
                .store
                .get_order_by_root(&shadow_root)
                .map_err(EngineError::Persistence)?
                .is_none()
            {
                continue;
            }
            let cancel = OutboundBuilder::cancel(
                &shadow_root,
                &shadow_root,
                &instruction.shadow_account,
                &report.symbol,
                report.side,
                instruction.copy_qty,
            );
            self.sender
                .send(&report.session_id, OutboundMessage::Cancel(cancel))
                .await
                .map_err(|e| EngineError::Transient(e.to_string()))?;
            info!(shadow = %instruction.shadow_account, primary = %primary_root, "shadow cancel emitted");
        }
        Ok(())
    }

    /// ExecType 1 or 2: fill / partial fill. Recorded, never replicated
    /// directly — replication already happened at NewOrder.
    pub async fn handle_fill(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let (_is_new, _event) = self.append_and_materialise(report)?;
        self.store
            .upsert_order_from_event(&decode_event(report))
            .map_err(EngineError::Persistence)?;
        Ok(())
    }

    /// Any ExecType with OrdStatus=8: rejection. Classifies the free-text
    /// reason and decides whether to mark an outstanding locate rejected.
    pub async fn handle_rejected(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let (is_new, _event) = self.append_and_materialise(report)?;
        self.store
            .upsert_order_from_event(&decode_event(report))
            .map_err(EngineError::Persistence)?;
        if !is_new {
            return Ok(());
        }

        let text = report.text.clone().unwrap_or_default().to_lowercase();
        if text.contains("locate") {
            crate::metrics::inc_rejection("locate");
            let primary_root = self.store.resolve_root(&report.cl_ord_id).map_err(EngineError::Persistence)?;
            if let Some((shadow, primary)) = crate::classifier::is_shadow_cl_ord_id(&report.cl_ord_id)
                .then(|| split_shadow_root(&report.cl_ord_id))
                .flatten()
            {
                self.locate.reject_and_cancel_deferred(&primary, &shadow)?;
            } else {
                let outstanding = self
                    .store
                    .find_locates_by_primary(&primary_root)
                    .map_err(EngineError::Persistence)?;
                for locate in outstanding {
                    if locate.status.is_terminal() {
                        continue;
                    }
                    self.locate
                        .reject_and_cancel_deferred(&locate.primary_cl_ord_id, &locate.shadow_account)?;
                }
            }
            info!(cl_ord_id = %report.cl_ord_id, "locate-related rejection recorded");
        } else if text.contains("route") {
            crate::metrics::inc_rejection("route");
            info!(cl_ord_id = %report.cl_ord_id, "route rejection recorded, no automatic retry");
        } else {
            crate::metrics::inc_rejection("other");
            let required = report.symbol.is_empty()
                || report.account.is_none()
                || (report.avg_px.is_zero() && report.last_px.is_zero());
            if required {
                info!(cl_ord_id = %report.cl_ord_id, "permanent rejection: required retry fields missing");
            } else {
                info!(cl_ord_id = %report.cl_ord_id, "permanent rejection");
            }
        }
        Ok(())
    }

    /// ExecType/OrdStatus E or 6: intermediate pending states. Append only.
    pub async fn handle_pending(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let (_is_new, _event) = self.append_and_materialise(report)?;
        self.store
            .upsert_order_from_event(&decode_event(report))
            .map_err(EngineError::Persistence)?;
        Ok(())
    }
}

fn split_shadow_root(cl_ord_id: &str) -> Option<(String, String)> {
    let rest = cl_ord_id.strip_prefix(crate::classifier::SHADOW_CL_ORD_ID_PREFIX)?;
    let (shadow, primary) = rest.split_once('-')?;
    Some((shadow.to_string(), primary.to_string()))
}
