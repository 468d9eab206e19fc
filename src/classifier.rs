use crate::cache::ReferenceCache;
use crate::model::AccountType;
use tracing::warn;

pub const SHADOW_CL_ORD_ID_PREFIX: &str = "COPY-";

/// Outcome of classifying a decoded ExecutionReport's ClOrdID/Account
/// against the reference cache (spec §4.3). Determines whether the
/// Replication Engine replicates at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A genuine primary order; replicate.
    Primary,
    /// A shadow order (observed via the `COPY-` prefix, or an Account row
    /// typed SHADOW). Append event only, never replicate — this is what
    /// prevents copy-of-copy cycles.
    Shadow,
    /// The Account tag did not resolve to any known Account.
    UnknownAccount,
}

pub fn is_shadow_cl_ord_id(cl_ord_id: &str) -> bool {
    cl_ord_id.starts_with(SHADOW_CL_ORD_ID_PREFIX)
}

/// Primary/Shadow Classifier (spec §4.3). Rules are checked in order:
/// ClOrdID prefix first (authoritative and cheap), then Account lookup.
pub fn classify(cache: &ReferenceCache, cl_ord_id: &str, account: Option<&str>) -> Classification {
    if is_shadow_cl_ord_id(cl_ord_id) {
        return Classification::Shadow;
    }

    match account.and_then(|number| cache.account(number)) {
        Some(acc) if acc.account_type == AccountType::Primary => Classification::Primary,
        Some(_) => Classification::Shadow,
        None => {
            warn!(cl_ord_id = %cl_ord_id, account = ?account, "execution report references an unknown account");
            Classification::UnknownAccount
        }
    }
}
