use async_trait::async_trait;
use fix_replicator::cache::ReferenceCache;
use fix_replicator::context::{DeterministicIdProvider, ExecutionContext, SimulatedTimeProvider};
use fix_replicator::dispatcher::Dispatcher;
use fix_replicator::engine::locate::LocateEngine;
use fix_replicator::engine::monitor::LocateMonitor;
use fix_replicator::engine::replication::ReplicationEngine;
use fix_replicator::fix::message::{ExecutionReport, InboundMessage, OutboundMessage, QuoteResponse};
use fix_replicator::fix::session::{FixSessionSender, SessionSendError};
use fix_replicator::model::{
    exec_type, ord_type, side, tif, Account, AccountType, CopyRule, LocateStatus, RatioType, Route, RouteType,
};
use fix_replicator::store::event_store::EventStore;
use fix_replicator::store::redb_store::RedbStore;
use fix_replicator::store::wal::WalManager;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

fn test_db_path(name: &str) -> String {
    format!("/tmp/fix_replicator_test_{}_{}.redb", name, uuid::Uuid::new_v4())
}

/// Captures every outbound FIX message instead of sending it, so
/// scenarios can assert on what the engine emitted.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSender {
    fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixSessionSender for RecordingSender {
    async fn send(&self, _session_id: &str, message: OutboundMessage) -> Result<(), SessionSendError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

struct Harness {
    store: Arc<EventStore>,
    dispatcher: Arc<Dispatcher>,
    locate: Arc<LocateEngine>,
    sender: Arc<RecordingSender>,
    time: Arc<SimulatedTimeProvider>,
}

fn primary_account() -> Account {
    Account {
        id: 1,
        number: "PRIMARY".to_string(),
        account_type: AccountType::Primary,
        broker_id: 1,
        strategy_key: None,
        active: true,
    }
}

fn locate_route() -> Route {
    Route {
        id: 1,
        name: "LOCATE".to_string(),
        broker_id: 1,
        route_type: RouteType::Type0,
        is_locate_route: true,
        priority: 0,
    }
}

fn multiplier_rule(shadow: &str, ratio: Decimal) -> CopyRule {
    CopyRule {
        id: 1,
        primary_account: "PRIMARY".to_string(),
        shadow_account: shadow.to_string(),
        ratio_type: RatioType::Multiplier,
        ratio_value: ratio,
        order_types: Vec::new(),
        copy_route: None,
        locate_route: Some("LOCATE".to_string()),
        copy_broker: None,
        min_quantity: None,
        max_quantity: None,
        priority: 0,
        active: true,
    }
}

fn build_harness(name: &str, copy_rules: Vec<CopyRule>) -> Harness {
    let path = test_db_path(name);
    let db = Arc::new(RedbStore::new(&path).unwrap());
    let wal = Arc::new(WalManager::new(db.clone()));
    wal.initialize().unwrap();
    let store = Arc::new(EventStore::new(db, wal));
    store.initialize().unwrap();

    let cache = Arc::new(ReferenceCache::new(
        vec![primary_account()],
        Vec::new(),
        vec![locate_route()],
        copy_rules,
    ));

    let time = Arc::new(SimulatedTimeProvider::new(0));
    let ctx = ExecutionContext {
        time: time.clone(),
        id: Arc::new(DeterministicIdProvider::new()),
    };

    let sender = Arc::new(RecordingSender::default());
    let sender_dyn: Arc<dyn FixSessionSender> = sender.clone();
    let locate = Arc::new(LocateEngine::new(cache.clone(), store.clone(), sender_dyn.clone(), ctx.clone()));
    let replication = Arc::new(ReplicationEngine::new(cache.clone(), store.clone(), sender_dyn, locate.clone(), ctx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(cache, store.clone(), replication, locate.clone(), ctx, 8));

    Harness {
        store,
        dispatcher,
        locate,
        sender,
        time,
    }
}

fn base_report(cl_ord_id: &str, exec_id: &str, exec_type: char, ord_status: char) -> ExecutionReport {
    ExecutionReport {
        session_id: "DROPCOPY1".to_string(),
        cl_ord_id: cl_ord_id.to_string(),
        orig_cl_ord_id: None,
        order_id: Some(format!("ORD-{cl_ord_id}")),
        exec_id: exec_id.to_string(),
        exec_type,
        ord_status,
        symbol: "AAPL".to_string(),
        side: side::BUY,
        ord_type: ord_type::MARKET,
        time_in_force: Some(tif::DAY),
        order_qty: dec!(100),
        price: None,
        stop_px: None,
        avg_px: Decimal::ZERO,
        last_px: Decimal::ZERO,
        last_qty: Decimal::ZERO,
        cum_qty: Decimal::ZERO,
        leaves_qty: dec!(100),
        account: Some("PRIMARY".to_string()),
        ex_destination: None,
        transact_time: chrono::Utc.timestamp_millis_opt(0).unwrap(),
        text: None,
        quote_req_id: None,
        raw_message: String::new(),
    }
}

use chrono::TimeZone;

#[tokio::test]
async fn market_order_replication() {
    let h = build_harness("market_order", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let report = base_report("ABC", "E1", exec_type::NEW, exec_type::NEW);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(report)).await;

    let sent = h.sender.messages();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        OutboundMessage::NewOrderSingle(order) => {
            assert_eq!(order.cl_ord_id, "COPY-SHAD1-ABC");
            assert_eq!(order.account, "SHAD1");
            assert_eq!(order.order_qty, dec!(100));
        }
        other => panic!("expected NewOrderSingle, got {other:?}"),
    }

    let primary = h.store.get_order_by_root("ABC").unwrap().expect("primary order persisted");
    assert_eq!(primary.symbol, "AAPL");
    let shadow = h
        .store
        .get_order_by_root("COPY-SHAD1-ABC")
        .unwrap()
        .expect("shadow order persisted");
    assert_eq!(shadow.qty, dec!(100));

    let events = h.store.find_events_for_order("ABC").unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn stop_limit_suppression() {
    let h = build_harness("stop_limit", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let mut report = base_report("STOPORD", "E1", exec_type::NEW, exec_type::NEW);
    report.ord_type = ord_type::STOP_LIMIT;
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(report)).await;

    assert!(h.sender.messages().is_empty());
    assert!(h.store.get_order_by_root("STOPORD").unwrap().is_some());
}

#[tokio::test]
async fn replace_with_unchanged_cl_ord_id() {
    let h = build_harness("replace", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let new_order = base_report("ABC", "E1", exec_type::NEW, exec_type::NEW);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(new_order)).await;

    let mut replace = base_report("ABC", "E2", exec_type::REPLACED, exec_type::REPLACED);
    replace.orig_cl_ord_id = Some("ABC".to_string());
    replace.order_qty = dec!(150);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(replace)).await;

    let sent = h.sender.messages();
    assert_eq!(sent.len(), 2);
    match &sent[1] {
        OutboundMessage::CancelReplace(r) => {
            assert_eq!(r.orig_cl_ord_id, "COPY-SHAD1-ABC");
            assert_eq!(r.cl_ord_id, "COPY-SHAD1-ABC-R1");
        }
        other => panic!("expected CancelReplace, got {other:?}"),
    }
}

#[tokio::test]
async fn short_sell_with_type0_locate() {
    let h = build_harness("short_sell", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let mut new_order = base_report("XYZ", "E1", exec_type::NEW, exec_type::NEW);
    new_order.side = side::SELL_SHORT;
    new_order.order_qty = dec!(200);
    new_order.symbol = "TSLA".to_string();
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(new_order)).await;

    let sent = h.sender.messages();
    assert_eq!(sent.len(), 1);
    let quote_req_id = match &sent[0] {
        OutboundMessage::QuoteRequest(q) => {
            assert_eq!(q.account, "SHAD1");
            q.quote_req_id.clone()
        }
        other => panic!("expected QuoteRequest, got {other:?}"),
    };

    let draft = h
        .store
        .get_order_by_root("COPY-SHAD1-XYZ")
        .unwrap()
        .expect("draft shadow staged");
    assert_eq!(draft.lifecycle, fix_replicator::model::OrderLifecycle::Draft);

    let response = QuoteResponse {
        session_id: "DROPCOPY1".to_string(),
        quote_req_id,
        symbol: "TSLA".to_string(),
        offer_px: dec!(0.10),
        offer_size: dec!(200),
        raw_message: String::new(),
    };
    h.dispatcher.dispatch(InboundMessage::QuoteResponse(response)).await;

    let sent = h.sender.messages();
    assert_eq!(sent.len(), 2);
    match &sent[1] {
        OutboundMessage::NewOrderSingle(order) => {
            assert_eq!(order.cl_ord_id, "COPY-SHAD1-XYZ");
            assert_eq!(order.side, side::BUY);
        }
        other => panic!("expected locate BUY NewOrderSingle, got {other:?}"),
    }

    let mut calculated = base_report("XYZ", "E2", exec_type::CALCULATED, exec_type::CALCULATED);
    calculated.last_qty = dec!(200);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(calculated)).await;

    let sent = h.sender.messages();
    assert_eq!(sent.len(), 3);
    match &sent[2] {
        OutboundMessage::NewOrderSingle(order) => {
            assert_eq!(order.cl_ord_id, "COPY-SHAD1-XYZ");
            assert_eq!(order.side, side::SELL_SHORT);
            assert_eq!(order.order_qty, dec!(200));
        }
        other => panic!("expected deferred sell-short release, got {other:?}"),
    }

    let locate = h
        .store
        .find_locate_by_primary_and_shadow("XYZ", "SHAD1")
        .unwrap()
        .expect("locate request tracked");
    assert_eq!(locate.status, LocateStatus::ApprovedFull);
}

#[tokio::test]
async fn locate_expiry_cancels_draft() {
    let h = build_harness("locate_expiry", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let mut new_order = base_report("P1", "E1", exec_type::NEW, exec_type::NEW);
    new_order.side = side::SELL_SHORT;
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(new_order)).await;
    assert_eq!(h.sender.messages().len(), 1);

    let monitor = LocateMonitor::new(
        h.store.clone(),
        h.locate.clone(),
        ExecutionContext {
            time: h.time.clone(),
            id: Arc::new(DeterministicIdProvider::new()),
        },
        30,
    );

    assert_eq!(monitor.scan_once().unwrap(), 0);
    h.time.advance(31_000);
    assert_eq!(monitor.scan_once().unwrap(), 1);

    let locate = h
        .store
        .find_locate_by_primary_and_shadow("P1", "SHAD1")
        .unwrap()
        .expect("locate request tracked");
    assert_eq!(locate.status, LocateStatus::Expired);

    let draft = h.store.get_order_by_root("COPY-SHAD1-P1").unwrap().unwrap();
    assert_eq!(draft.lifecycle, fix_replicator::model::OrderLifecycle::Cancelled);

    // No sell-short shadow was ever released past the QuoteRequest.
    assert_eq!(h.sender.messages().len(), 1);
}

#[tokio::test]
async fn duplicate_exec_id_applies_once() {
    let h = build_harness("dup_exec_id", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let report = base_report("ABC", "DUP1", exec_type::NEW, exec_type::NEW);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(report.clone())).await;
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(report)).await;

    let events = h.store.find_events_for_order("ABC").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(h.sender.messages().len(), 1);
}

#[tokio::test]
async fn copy_marked_events_are_never_replicated() {
    let h = build_harness("copy_suppressed", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let mut shadow_fill = base_report("COPY-SHAD1-ABC", "E1", exec_type::NEW, exec_type::NEW);
    shadow_fill.account = Some("SHAD1".to_string());
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(shadow_fill)).await;

    assert!(h.sender.messages().is_empty());
    assert!(h.store.get_order_by_root("COPY-SHAD1-ABC").unwrap().is_none());
    let events = h.store.find_events_for_order("COPY-SHAD1-ABC").unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn replace_orig_cl_ord_id_never_equals_cl_ord_id() {
    let h = build_harness("replace_invariant", vec![multiplier_rule("SHAD1", dec!(1.0))]);

    let new_order = base_report("INV1", "E1", exec_type::NEW, exec_type::NEW);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(new_order)).await;

    let mut replace = base_report("INV1-V2", "E2", exec_type::REPLACED, exec_type::REPLACED);
    replace.orig_cl_ord_id = Some("INV1".to_string());
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(replace)).await;

    let sent = h.sender.messages();
    match &sent[1] {
        OutboundMessage::CancelReplace(r) => assert_ne!(r.orig_cl_ord_id, r.cl_ord_id),
        other => panic!("expected CancelReplace, got {other:?}"),
    }
}

#[tokio::test]
async fn outbound_cl_ord_id_and_quote_req_id_respect_length_limits() {
    let h = build_harness("length_limits", vec![multiplier_rule("A_VERY_LONG_SHADOW_ACCOUNT_NAME", dec!(1.0))]);

    let new_order = base_report("A_VERY_LONG_PRIMARY_CLORDID_VALUE", "E1", exec_type::NEW, exec_type::NEW);
    h.dispatcher.dispatch(InboundMessage::ExecutionReport(new_order)).await;

    let sent = h.sender.messages();
    match &sent[0] {
        OutboundMessage::NewOrderSingle(order) => assert!(order.cl_ord_id.len() <= 19),
        other => panic!("expected NewOrderSingle, got {other:?}"),
    }
}
