use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 128-bit native identifier, replacing the UUID-as-string convention
/// the legacy schema used for every primary key.
pub type Id = u128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Primary,
    Shadow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub id: Id,
    pub name: String,
    pub code: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub number: String,
    pub account_type: AccountType,
    pub broker_id: Id,
    pub strategy_key: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteType {
    Type0,
    Type1,
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Id,
    pub name: String,
    pub broker_id: Id,
    pub route_type: RouteType,
    pub is_locate_route: bool,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioType {
    Percentage,
    Multiplier,
    FixedQuantity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRule {
    pub id: Id,
    pub primary_account: String,
    pub shadow_account: String,
    pub ratio_type: RatioType,
    pub ratio_value: Decimal,
    /// FIX OrdType codes this rule applies to; empty means "all".
    pub order_types: Vec<char>,
    pub copy_route: Option<String>,
    pub locate_route: Option<String>,
    pub copy_broker: Option<String>,
    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,
    pub priority: i32,
    pub active: bool,
}

impl CopyRule {
    pub fn applies_to_ord_type(&self, ord_type: char) -> bool {
        self.order_types.is_empty() || self.order_types.contains(&ord_type)
    }

    pub fn applies_to_quantity(&self, qty: Decimal) -> bool {
        if let Some(min) = self.min_quantity {
            if qty < min {
                return false;
            }
        }
        if let Some(max) = self.max_quantity {
            if qty > max {
                return false;
            }
        }
        true
    }
}

/// Snapshot of an order's mutable aggregate fields, reflecting the latest
/// applied event. Per spec §4.7, callers computing current status MUST
/// read the latest event, not this struct directly — this is a cache of
/// that computation kept for fast lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAggregate {
    pub exec_type: char,
    pub ord_status: char,
    pub cum_qty: Decimal,
    pub leaves_qty: Decimal,
    pub avg_px: Decimal,
    pub last_px: Decimal,
    pub last_qty: Decimal,
}

impl Default for OrderAggregate {
    fn default() -> Self {
        Self {
            exec_type: '0',
            ord_status: '0',
            cum_qty: Decimal::ZERO,
            leaves_qty: Decimal::ZERO,
            avg_px: Decimal::ZERO,
            last_px: Decimal::ZERO,
            last_qty: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderLifecycle {
    /// Row created, but emission deferred pending a locate response.
    Draft,
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Id,
    pub account_number: String,
    /// Nullable; set on shadow orders, points back to the primary's stable
    /// root identity (the original NewOrder ClOrdID), never the literal
    /// wire ClOrdID of a later replace.
    pub primary_cl_ord_id: Option<String>,
    /// The order's stable identity: for a primary, its original NewOrder
    /// ClOrdID; for a shadow, `COPY-<shadow>-<primary root>`. Used as the
    /// storage key. Distinct from `fix_cl_ord_id`, which is the literal
    /// ClOrdID of the most recent wire message (changes across replaces).
    pub root_cl_ord_id: String,
    pub fix_order_id: Option<String>,
    pub fix_cl_ord_id: String,
    pub fix_orig_cl_ord_id: Option<String>,
    pub symbol: String,
    pub side: char,
    pub ord_type: char,
    pub tif: char,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub ex_destination: Option<String>,
    pub lifecycle: OrderLifecycle,
    pub current: OrderAggregate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_shadow(&self) -> bool {
        self.primary_cl_ord_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: Id,
    /// Best-effort linkage; events may be persisted before their Order row exists.
    pub order_id: Option<Id>,
    pub exec_id: String,
    pub exec_type: char,
    pub ord_status: char,
    pub fix_order_id: Option<String>,
    pub fix_cl_ord_id: String,
    pub fix_orig_cl_ord_id: Option<String>,
    pub account: Option<String>,
    pub symbol: String,
    pub side: char,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub avg_px: Decimal,
    pub last_px: Decimal,
    pub last_qty: Decimal,
    pub cum_qty: Decimal,
    pub leaves_qty: Decimal,
    pub transact_time: DateTime<Utc>,
    pub session_id: String,
    pub raw_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocateStatus {
    Pending,
    ApprovedFull,
    ApprovedPartial,
    Rejected,
    Expired,
    Cancelled,
}

impl LocateStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LocateStatus::Pending)
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, LocateStatus::ApprovedFull | LocateStatus::ApprovedPartial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateRequest {
    pub id: Id,
    /// The primary Order this locate is covering.
    pub order_id: Id,
    pub primary_cl_ord_id: String,
    pub shadow_account: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub status: LocateStatus,
    pub fix_quote_req_id: String,
    pub locate_route: String,
    pub offer_px: Option<Decimal>,
    pub offer_size: Option<Decimal>,
    pub approved_qty: Option<Decimal>,
    pub response_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// FIX Side (tag 54).
pub mod side {
    pub const BUY: char = '1';
    pub const SELL: char = '2';
    pub const SELL_SHORT: char = '5';
    pub const SELL_SHORT_EXEMPT: char = '6';

    pub fn is_short(side: char) -> bool {
        side == SELL_SHORT || side == SELL_SHORT_EXEMPT
    }
}

/// FIX OrdType (tag 40).
pub mod ord_type {
    pub const MARKET: char = '1';
    pub const LIMIT: char = '2';
    pub const STOP_MARKET: char = '3';
    pub const STOP_LIMIT: char = '4';
    pub const LIMIT_ON_CLOSE: char = 'B';
    pub const PEGGED: char = 'P';
}

/// FIX TimeInForce (tag 59).
pub mod tif {
    pub const DAY: char = '0';
    pub const GTC: char = '1';
    pub const IOC: char = '3';
    pub const FOK: char = '4';
}

/// FIX ExecType / OrdStatus (tags 150 / 39).
pub mod exec_type {
    pub const NEW: char = '0';
    pub const PARTIAL_FILL: char = '1';
    pub const FILL: char = '2';
    pub const CANCELLED: char = '4';
    pub const REPLACED: char = '5';
    pub const PENDING_CANCEL: char = '6';
    pub const REJECTED: char = '8';
    pub const PENDING_REPLACE: char = 'E';
    pub const CALCULATED: char = 'B';
}
