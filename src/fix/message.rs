use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The session role a decoded message arrived on, or that an outbound
/// message must be sent on — per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    DropCopy,
    OrderEntry,
}

/// Administrative messages (Logon/Logout/Heartbeat/TestRequest/ResendRequest/
/// SequenceReset/Reject) observed for lifecycle only. Sequence synchronization
/// itself is the transport's job; the engine never rejects a Logon here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminMessage {
    pub msg_type: char,
    pub session_id: String,
    pub text: Option<String>,
}

/// FIX MsgType (tag 35) values for administrative messages.
pub mod admin_msg_type {
    pub const HEARTBEAT: char = '0';
    pub const TEST_REQUEST: char = '1';
    pub const RESEND_REQUEST: char = '2';
    pub const REJECT: char = '3';
    pub const SEQUENCE_RESET: char = '4';
    pub const LOGOUT: char = '5';
    pub const LOGON: char = 'A';
}

/// A decoded ExecutionReport (MsgType `8`), with the FIX 4.2 fields named
/// in spec §6 carried verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub session_id: String,
    pub cl_ord_id: String,
    pub orig_cl_ord_id: Option<String>,
    pub order_id: Option<String>,
    pub exec_id: String,
    pub exec_type: char,
    pub ord_status: char,
    pub symbol: String,
    pub side: char,
    pub ord_type: char,
    pub time_in_force: Option<char>,
    pub order_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub avg_px: Decimal,
    pub last_px: Decimal,
    pub last_qty: Decimal,
    pub cum_qty: Decimal,
    pub leaves_qty: Decimal,
    pub account: Option<String>,
    pub ex_destination: Option<String>,
    pub transact_time: DateTime<Utc>,
    pub text: Option<String>,
    /// Populated only when this report is itself a locate confirmation,
    /// carried on ExecutionReports with `ord_status = 'B'` per spec §4.5.
    pub quote_req_id: Option<String>,
    pub raw_message: String,
}

/// A decoded Short-Locate Quote-Response (MsgType `S`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub session_id: String,
    pub quote_req_id: String,
    pub symbol: String,
    pub offer_px: Decimal,
    pub offer_size: Decimal,
    pub raw_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboundMessage {
    Admin(AdminMessage),
    ExecutionReport(ExecutionReport),
    QuoteResponse(QuoteResponse),
}

// --- Outbound messages built by the Outbound Builder (spec §4.8) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderSingle {
    pub cl_ord_id: String,
    pub account: String,
    pub symbol: String,
    pub side: char,
    pub ord_type: char,
    pub time_in_force: char,
    pub order_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub ex_destination: Option<String>,
    pub handl_inst: char,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelReplaceRequest {
    pub cl_ord_id: String,
    pub orig_cl_ord_id: String,
    pub account: String,
    pub symbol: String,
    pub side: char,
    pub ord_type: char,
    pub time_in_force: char,
    pub order_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub ex_destination: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelRequest {
    pub cl_ord_id: String,
    pub orig_cl_ord_id: String,
    pub account: String,
    pub symbol: String,
    pub side: char,
    pub order_qty: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub quote_req_id: String,
    pub account: String,
    pub symbol: String,
    pub order_qty: Decimal,
    pub locate_route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateAcceptOffer {
    pub quote_req_id: String,
    pub order_id: String,
    pub account: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateRejectOffer {
    pub quote_req_id: String,
    pub order_id: String,
    pub account: String,
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundMessage {
    NewOrderSingle(NewOrderSingle),
    CancelReplace(OrderCancelReplaceRequest),
    Cancel(OrderCancelRequest),
    QuoteRequest(QuoteRequest),
    LocateAcceptOffer(LocateAcceptOffer),
    LocateRejectOffer(LocateRejectOffer),
}
