use crate::context::ExecutionContext;
use crate::model::{LocateRequest, LocateStatus, Order, OrderAggregate, OrderEvent, OrderLifecycle};
use crate::store::redb_store::{RedbStore, StoreError};
use crate::store::wal::{WalEntry, WalManager};
use redb::{ReadableTable, TableDefinition};
use std::sync::Arc;
use tracing::debug;

const EVENTS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("events_by_exec_id");
const EVENTS_BY_ROOT_TABLE: TableDefinition<&str, Vec<u8>> =
    TableDefinition::new("event_ids_by_root");
const ORDERS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("orders_by_root");
const ALIAS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("cl_ord_id_aliases");
const REPLACE_SEQ_TABLE: TableDefinition<&str, u64> = TableDefinition::new("replace_sequences");
const LOCATES_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("locates_by_id");
const LOCATES_BY_QRID_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("locates_by_quote_req_id");
const LOCATES_BY_PRIMARY_SHADOW_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("locates_by_primary_and_shadow");

fn primary_shadow_key(primary_root: &str, shadow_account: &str) -> String {
    format!("{primary_root}|{shadow_account}")
}

/// Strips a trailing `-R<digits>` replace-chain suffix, recovering the
/// root a shadow ClOrdID was derived from when no alias entry was ever
/// registered for it (e.g. on cold-start before the registering event's
/// own append completed).
fn strip_replace_suffix(cl_ord_id: &str) -> &str {
    if let Some(idx) = cl_ord_id.rfind("-R") {
        let tail = &cl_ord_id[idx + 2..];
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            return &cl_ord_id[..idx];
        }
    }
    cl_ord_id
}

/// Event Store & Order Materialisation (spec §4.7): the durable event log
/// plus the derived Order rows that lookups during dispatch read instead
/// of re-deriving state from the full event history each time.
pub struct EventStore {
    db: Arc<RedbStore>,
    wal: Arc<WalManager>,
}

impl EventStore {
    pub fn new(db: Arc<RedbStore>, wal: Arc<WalManager>) -> Self {
        Self { db, wal }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let _ = txn.open_table(EVENTS_TABLE)?;
            let _ = txn.open_table(EVENTS_BY_ROOT_TABLE)?;
            let _ = txn.open_table(ORDERS_TABLE)?;
            let _ = txn.open_table(ALIAS_TABLE)?;
            let _ = txn.open_table(REPLACE_SEQ_TABLE)?;
            let _ = txn.open_table(LOCATES_TABLE)?;
            let _ = txn.open_table(LOCATES_BY_QRID_TABLE)?;
            let _ = txn.open_table(LOCATES_BY_PRIMARY_SHADOW_TABLE)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Persists a LocateRequest and its lookup indexes (by QuoteReqID, and
    /// by (primary, shadow) pair) in one transaction.
    pub fn save_locate(&self, locate: &LocateRequest) -> Result<(), StoreError> {
        let id_key = locate.id.to_string();
        let pair_key = primary_shadow_key(&locate.primary_cl_ord_id, &locate.shadow_account);
        let txn = self.db.begin_write()?;
        {
            let mut locates = txn.open_table(LOCATES_TABLE)?;
            locates.insert(id_key.as_str(), serde_json::to_vec(locate)?)?;
            let mut by_qrid = txn.open_table(LOCATES_BY_QRID_TABLE)?;
            by_qrid.insert(locate.fix_quote_req_id.as_str(), id_key.as_str())?;
            let mut by_pair = txn.open_table(LOCATES_BY_PRIMARY_SHADOW_TABLE)?;
            by_pair.insert(pair_key.as_str(), id_key.as_str())?;
        }
        txn.commit()?;
        self.wal.append(&WalEntry::LocateStateChanged {
            locate_id: locate.id,
            reason: format!("{:?}", locate.status),
            payload: serde_json::to_value(locate)?,
        })?;
        Ok(())
    }

    pub fn get_locate(&self, locate_id: u128) -> Result<Option<LocateRequest>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOCATES_TABLE)?;
        match table.get(locate_id.to_string().as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_locate_by_quote_req_id(
        &self,
        quote_req_id: &str,
    ) -> Result<Option<LocateRequest>, StoreError> {
        let txn = self.db.begin_read()?;
        let by_qrid = txn.open_table(LOCATES_BY_QRID_TABLE)?;
        let Some(id) = by_qrid.get(quote_req_id)? else {
            return Ok(None);
        };
        let locates = txn.open_table(LOCATES_TABLE)?;
        match locates.get(id.value())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_locate_by_primary_and_shadow(
        &self,
        primary_root: &str,
        shadow_account: &str,
    ) -> Result<Option<LocateRequest>, StoreError> {
        let key = primary_shadow_key(primary_root, shadow_account);
        let txn = self.db.begin_read()?;
        let by_pair = txn.open_table(LOCATES_BY_PRIMARY_SHADOW_TABLE)?;
        let Some(id) = by_pair.get(key.as_str())? else {
            return Ok(None);
        };
        let locates = txn.open_table(LOCATES_TABLE)?;
        match locates.get(id.value())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v.value())?)),
            None => Ok(None),
        }
    }

    /// All LocateRequests in PENDING, for the Timeout/Monitor's expiry
    /// sweep (spec §4.5). A full-table scan is acceptable: the monitor
    /// runs every 10s and pending locates are a small, short-lived set.
    pub fn pending_locates(&self) -> Result<Vec<LocateRequest>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOCATES_TABLE)?;
        let mut out = Vec::new();
        for result in table.iter()? {
            let (_, v) = result?;
            let locate: LocateRequest = serde_json::from_slice(&v.value())?;
            if locate.status == LocateStatus::Pending {
                out.push(locate);
            }
        }
        Ok(out)
    }

    /// All LocateRequests tied to a primary order, across every shadow
    /// account, regardless of which account pairing the caller knows. Used
    /// when a rejection arrives keyed by the primary's own ClOrdID and
    /// every outstanding locate for it must be cancelled (spec §4.5).
    pub fn find_locates_by_primary(&self, primary_root: &str) -> Result<Vec<LocateRequest>, StoreError> {
        let prefix = format!("{primary_root}|");
        let txn = self.db.begin_read()?;
        let by_pair = txn.open_table(LOCATES_BY_PRIMARY_SHADOW_TABLE)?;
        let locates = txn.open_table(LOCATES_TABLE)?;
        let mut out = Vec::new();
        for result in by_pair.iter()? {
            let (key, id) = result?;
            if !key.value().starts_with(prefix.as_str()) {
                continue;
            }
            if let Some(v) = locates.get(id.value())? {
                out.push(serde_json::from_slice(&v.value())?);
            }
        }
        Ok(out)
    }

    /// Resolves a literal wire ClOrdID (or OrigClOrdID) to the stable root
    /// identity an Order row is keyed by. Falls back to stripping a replace
    /// suffix, then to treating the literal as the root itself.
    pub fn resolve_root(&self, literal: &str) -> Result<String, StoreError> {
        let txn = self.db.begin_read()?;
        let aliases = txn.open_table(ALIAS_TABLE)?;
        if let Some(root) = aliases.get(literal)? {
            return Ok(root.value().to_string());
        }
        let stripped = strip_replace_suffix(literal);
        if stripped != literal {
            if let Some(root) = aliases.get(stripped)? {
                return Ok(root.value().to_string());
            }
            return Ok(stripped.to_string());
        }
        Ok(literal.to_string())
    }

    fn register_alias(
        &self,
        txn: &redb::WriteTransaction<'_>,
        literal: &str,
        root: &str,
    ) -> Result<(), StoreError> {
        if literal == root {
            return Ok(());
        }
        let mut table = txn.open_table(ALIAS_TABLE)?;
        table.insert(literal, root)?;
        Ok(())
    }

    /// Appends an event, idempotent on `execId` (spec §7 universal
    /// invariant: "duplicate ExecID ... is a no-op success"). Returns
    /// `(true, event)` if this call performed the insert, `(false,
    /// existing)` if the event was already present.
    pub fn append_event(&self, event: OrderEvent) -> Result<(bool, OrderEvent), StoreError> {
        let txn = self.db.begin_write()?;
        let outcome = {
            let mut events = txn.open_table(EVENTS_TABLE)?;
            if let Some(existing) = events.get(event.exec_id.as_str())? {
                let existing: OrderEvent = serde_json::from_slice(&existing.value())?;
                (false, existing)
            } else {
                let data = serde_json::to_vec(&event)?;
                events.insert(event.exec_id.as_str(), data)?;
                (true, event)
            }
        };
        if outcome.0 {
            let root = self.resolve_root(&outcome.1.fix_cl_ord_id)?;
            let mut by_root = txn.open_table(EVENTS_BY_ROOT_TABLE)?;
            let mut ids: Vec<String> = match by_root.get(root.as_str())? {
                Some(v) => serde_json::from_slice(&v.value())?,
                None => Vec::new(),
            };
            ids.push(outcome.1.exec_id.clone());
            by_root.insert(root.as_str(), serde_json::to_vec(&ids)?)?;
        }
        txn.commit()?;
        if outcome.0 {
            self.wal
                .append(&WalEntry::EventAppended(Box::new(outcome.1.clone())))?;
            debug!(exec_id = %outcome.1.exec_id, "event appended");
            crate::metrics::inc_events_applied();
        } else {
            crate::metrics::inc_events_deduplicated();
        }
        Ok(outcome)
    }

    pub fn get_order_by_root(&self, root: &str) -> Result<Option<Order>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(root)? {
            Some(v) => Ok(Some(serde_json::from_slice(&v.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_order_by_cl_ord_id(&self, cl_ord_id: &str) -> Result<Option<Order>, StoreError> {
        let root = self.resolve_root(cl_ord_id)?;
        self.get_order_by_root(&root)
    }

    fn save_order(&self, txn: &redb::WriteTransaction<'_>, order: &Order) -> Result<(), StoreError> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        table.insert(order.root_cl_ord_id.as_str(), serde_json::to_vec(order)?)?;
        Ok(())
    }

    /// Persists an out-of-band Order mutation not tied to an incoming
    /// event (e.g. transitioning a deferred draft to CANCELLED when its
    /// locate expires or is rejected).
    pub fn save_draft_cancellation(&self, order: &Order) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        self.save_order(&txn, order)?;
        txn.commit()?;
        Ok(())
    }

    /// Persists a deferred draft's transition to live (NEW) once its locate
    /// is approved and the order is released to the broker.
    pub fn save_draft_release(&self, order: &Order) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        self.save_order(&txn, order)?;
        txn.commit()?;
        Ok(())
    }

    /// Creates the Order row for a primary NewOrderSingle's first
    /// ExecutionReport. `root` is the stable identity (the ClOrdID on this
    /// first event).
    pub fn create_primary_order(
        &self,
        event: &OrderEvent,
        ctx: &ExecutionContext,
    ) -> Result<Order, StoreError> {
        let order = Order {
            id: ctx.id.new_id(),
            account_number: event.account.clone().unwrap_or_default(),
            primary_cl_ord_id: None,
            root_cl_ord_id: event.fix_cl_ord_id.clone(),
            fix_order_id: event.fix_order_id.clone(),
            fix_cl_ord_id: event.fix_cl_ord_id.clone(),
            fix_orig_cl_ord_id: event.fix_orig_cl_ord_id.clone(),
            symbol: event.symbol.clone(),
            side: event.side,
            ord_type: crate::model::ord_type::LIMIT,
            tif: crate::model::tif::DAY,
            qty: event.qty,
            price: event.price,
            stop_px: event.stop_px,
            ex_destination: None,
            lifecycle: lifecycle_for(event.ord_status),
            current: aggregate_from(event),
            created_at: event.transact_time,
            updated_at: event.transact_time,
        };
        let txn = self.db.begin_write()?;
        self.save_order(&txn, &order)?;
        self.register_alias(&txn, &order.fix_cl_ord_id, &order.root_cl_ord_id)?;
        txn.commit()?;
        Ok(order)
    }

    /// Creates the Order row for a shadow order. `root` must be the
    /// canonical `COPY-<shadow>-<primary root>` identity; `wire_cl_ord_id`
    /// is the literal ClOrdID sent on the wire (equal to `root` unless a
    /// replace suffix has been appended).
    pub fn create_shadow_order(
        &self,
        account_number: &str,
        primary_root: &str,
        root: &str,
        wire_cl_ord_id: &str,
        symbol: &str,
        side: char,
        ord_type: char,
        tif: char,
        qty: rust_decimal::Decimal,
        price: Option<rust_decimal::Decimal>,
        stop_px: Option<rust_decimal::Decimal>,
        ex_destination: Option<String>,
        lifecycle: OrderLifecycle,
        ctx: &ExecutionContext,
    ) -> Result<Order, StoreError> {
        let now = ctx.time.now();
        let order = Order {
            id: ctx.id.new_id(),
            account_number: account_number.to_string(),
            primary_cl_ord_id: Some(primary_root.to_string()),
            root_cl_ord_id: root.to_string(),
            fix_order_id: None,
            fix_cl_ord_id: wire_cl_ord_id.to_string(),
            fix_orig_cl_ord_id: None,
            symbol: symbol.to_string(),
            side,
            ord_type,
            tif,
            qty,
            price,
            stop_px,
            ex_destination,
            lifecycle,
            current: OrderAggregate::default(),
            created_at: now,
            updated_at: now,
        };
        let txn = self.db.begin_write()?;
        self.save_order(&txn, &order)?;
        self.register_alias(&txn, wire_cl_ord_id, root)?;
        txn.commit()?;
        Ok(order)
    }

    /// Applies an event to an existing Order, honoring the at-most-once
    /// rule: fields only advance if `event.transact_time >= order.updated_at`
    /// (spec §4.7, §7).
    pub fn upsert_order_from_event(&self, event: &OrderEvent) -> Result<Option<Order>, StoreError> {
        let root = self.resolve_root(&event.fix_cl_ord_id)?;
        let Some(mut order) = self.get_order_by_root(&root)? else {
            return Ok(None);
        };
        if event.transact_time < order.updated_at {
            debug!(
                root = %root,
                event_time = %event.transact_time,
                current_time = %order.updated_at,
                "stale event ignored"
            );
            return Ok(Some(order));
        }
        order.fix_cl_ord_id = event.fix_cl_ord_id.clone();
        order.fix_orig_cl_ord_id = event.fix_orig_cl_ord_id.clone();
        if let Some(fix_order_id) = &event.fix_order_id {
            order.fix_order_id = Some(fix_order_id.clone());
        }
        order.lifecycle = lifecycle_for(event.ord_status);
        order.current = aggregate_from(event);
        order.updated_at = event.transact_time;

        let txn = self.db.begin_write()?;
        self.save_order(&txn, &order)?;
        self.register_alias(&txn, &event.fix_cl_ord_id, &root)?;
        if let Some(orig) = &event.fix_orig_cl_ord_id {
            self.register_alias(&txn, orig, &root)?;
        }
        txn.commit()?;
        Ok(Some(order))
    }

    /// Registers a new literal ClOrdID (e.g. the one we are about to send
    /// on an outbound CancelReplace) against an existing root, ahead of
    /// the confirming ExecutionReport arriving.
    pub fn register_outbound_cl_ord_id(&self, root: &str, literal: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        self.register_alias(&txn, literal, root)?;
        txn.commit()?;
        Ok(())
    }

    /// All events linked to the order identified by `cl_ord_id` (which may
    /// be any literal ClOrdID/OrigClOrdID ever used in its replace chain),
    /// ascending by transact time.
    pub fn find_events_for_order(&self, cl_ord_id: &str) -> Result<Vec<OrderEvent>, StoreError> {
        let root = self.resolve_root(cl_ord_id)?;
        let txn = self.db.begin_read()?;
        let by_root = txn.open_table(EVENTS_BY_ROOT_TABLE)?;
        let ids: Vec<String> = match by_root.get(root.as_str())? {
            Some(v) => serde_json::from_slice(&v.value())?,
            None => return Ok(Vec::new()),
        };
        let events_table = txn.open_table(EVENTS_TABLE)?;
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(v) = events_table.get(id.as_str())? {
                events.push(serde_json::from_slice::<OrderEvent>(&v.value())?);
            }
        }
        events.sort_by_key(|e| e.transact_time);
        Ok(events)
    }

    /// The next monotonic replace-sequence number for a root identity,
    /// used to build the `-R<n>` suffix described in spec §4.4 when a
    /// replace leaves the shadow's canonical ClOrdID otherwise unchanged.
    /// Persisted rather than derived from wall-clock time so restarts
    /// cannot reissue a suffix already seen by the counterparty.
    pub fn next_replace_seq(&self, root: &str) -> Result<u64, StoreError> {
        let txn = self.db.begin_write()?;
        let seq = {
            let mut table = txn.open_table(REPLACE_SEQ_TABLE)?;
            let current = table.get(root)?.map(|v| v.value()).unwrap_or(0);
            let next = current + 1;
            table.insert(root, next)?;
            next
        };
        txn.commit()?;
        Ok(seq)
    }
}

fn lifecycle_for(ord_status: char) -> OrderLifecycle {
    use crate::model::exec_type::*;
    match ord_status {
        NEW | REPLACED | PENDING_REPLACE | PENDING_CANCEL => OrderLifecycle::New,
        PARTIAL_FILL => OrderLifecycle::PartiallyFilled,
        FILL => OrderLifecycle::Filled,
        CANCELLED => OrderLifecycle::Cancelled,
        REJECTED => OrderLifecycle::Rejected,
        _ => OrderLifecycle::New,
    }
}

fn aggregate_from(event: &OrderEvent) -> OrderAggregate {
    OrderAggregate {
        exec_type: event.exec_type,
        ord_status: event.ord_status,
        cum_qty: event.cum_qty,
        leaves_qty: event.leaves_qty,
        avg_px: event.avg_px,
        last_px: event.last_px,
        last_qty: event.last_qty,
    }
}
