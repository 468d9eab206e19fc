use thiserror::Error;

/// Correlation fields attached to every handler-level error, per spec §7.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub session_id: Option<String>,
    pub exec_id: Option<String>,
    pub fix_order_id: Option<String>,
    pub fix_cl_ord_id: Option<String>,
    pub symbol: Option<String>,
}

/// Top-level error taxonomy for handler entry points. No handler ever lets
/// a panic or an unhandled `Result::Err` escape into the dispatcher loop —
/// every variant here is logged and swallowed at the boundary described in
/// spec §7.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Outbound session not logged on, or missing initiator session.
    #[error("transient: {0}")]
    Transient(String),
    /// A mandatory field is missing on a message that requires it.
    #[error("protocol: {0}")]
    Protocol(String),
    /// Business rule rejection: locate rejected, no route, quantity out of bounds.
    #[error("business: {0}")]
    Business(String),
    /// Storage failure that must not crash the session.
    #[error("persistence: {0}")]
    Persistence(#[from] crate::store::redb_store::StoreError),
}
