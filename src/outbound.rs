use crate::fix::message::{
    LocateAcceptOffer, LocateRejectOffer, NewOrderSingle, OrderCancelReplaceRequest,
    OrderCancelRequest, QuoteRequest,
};
use crate::model::{ord_type, tif};
use rust_decimal::Decimal;

/// ClOrdIDs sent to the order-entry peer are capped at 19 characters
/// (spec §4.8); a derived ID over the limit keeps its rightmost 19.
pub const CL_ORD_ID_LIMIT: usize = 19;
/// QuoteReqID uses a separate, longer limit (spec §4.8, §4.5).
pub const QUOTE_REQ_ID_LIMIT: usize = 39;

pub fn truncate_cl_ord_id(id: &str) -> String {
    truncate_rightmost(id, CL_ORD_ID_LIMIT)
}

pub fn truncate_quote_req_id(id: &str) -> String {
    truncate_rightmost(id, QUOTE_REQ_ID_LIMIT)
}

fn truncate_rightmost(id: &str, limit: usize) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= limit {
        id.to_string()
    } else {
        chars[chars.len() - limit..].iter().collect()
    }
}

fn price_applies(ord_type: char) -> bool {
    matches!(
        ord_type,
        ord_type::LIMIT | ord_type::STOP_LIMIT | ord_type::LIMIT_ON_CLOSE | ord_type::PEGGED
    )
}

fn stop_px_applies(ord_type: char) -> bool {
    matches!(ord_type, ord_type::STOP_MARKET | ord_type::STOP_LIMIT)
}

/// Builds legal FIX 4.2 outbound messages, enforcing the hard rules of
/// spec §4.8 so no handler has to reimplement them: ClOrdID/QuoteReqID
/// length limits, field-presence rules tied to OrdType, TIF default, and
/// HandlInst.
pub struct OutboundBuilder;

impl OutboundBuilder {
    pub fn new_order_single(
        cl_ord_id: &str,
        account: &str,
        symbol: &str,
        side: char,
        ord_type: char,
        time_in_force: Option<char>,
        order_qty: Decimal,
        price: Option<Decimal>,
        stop_px: Option<Decimal>,
        ex_destination: Option<String>,
    ) -> NewOrderSingle {
        NewOrderSingle {
            cl_ord_id: truncate_cl_ord_id(cl_ord_id),
            account: account.to_string(),
            symbol: symbol.to_string(),
            side,
            ord_type,
            time_in_force: time_in_force.unwrap_or(tif::DAY),
            order_qty,
            price: if price_applies(ord_type) { price } else { None },
            stop_px: if stop_px_applies(ord_type) { stop_px } else { None },
            ex_destination,
            handl_inst: '1',
        }
    }

    /// Builds a CancelReplaceRequest. Panics if `cl_ord_id == orig_cl_ord_id`
    /// after truncation — callers must ensure the two are already distinct
    /// (spec §4.8 hard rule); the replace-chain suffix logic in the
    /// Replication Engine is responsible for that.
    pub fn cancel_replace(
        cl_ord_id: &str,
        orig_cl_ord_id: &str,
        account: &str,
        symbol: &str,
        side: char,
        ord_type: char,
        time_in_force: Option<char>,
        order_qty: Decimal,
        price: Option<Decimal>,
        stop_px: Option<Decimal>,
        ex_destination: Option<String>,
    ) -> OrderCancelReplaceRequest {
        let cl_ord_id = truncate_cl_ord_id(cl_ord_id);
        let orig_cl_ord_id = truncate_cl_ord_id(orig_cl_ord_id);
        assert_ne!(
            cl_ord_id, orig_cl_ord_id,
            "OrigClOrdID must differ from ClOrdID on a CancelReplaceRequest"
        );
        OrderCancelReplaceRequest {
            cl_ord_id,
            orig_cl_ord_id,
            account: account.to_string(),
            symbol: symbol.to_string(),
            side,
            ord_type,
            time_in_force: time_in_force.unwrap_or(tif::DAY),
            order_qty,
            price: if price_applies(ord_type) { price } else { None },
            stop_px: if stop_px_applies(ord_type) { stop_px } else { None },
            ex_destination,
        }
    }

    pub fn cancel(
        cl_ord_id: &str,
        orig_cl_ord_id: &str,
        account: &str,
        symbol: &str,
        side: char,
        order_qty: Decimal,
    ) -> OrderCancelRequest {
        OrderCancelRequest {
            cl_ord_id: truncate_cl_ord_id(cl_ord_id),
            orig_cl_ord_id: truncate_cl_ord_id(orig_cl_ord_id),
            account: account.to_string(),
            symbol: symbol.to_string(),
            side,
            order_qty,
        }
    }

    pub fn quote_request(
        quote_req_id: &str,
        account: &str,
        symbol: &str,
        order_qty: Decimal,
        locate_route: &str,
    ) -> QuoteRequest {
        QuoteRequest {
            quote_req_id: truncate_quote_req_id(quote_req_id),
            account: account.to_string(),
            symbol: symbol.to_string(),
            order_qty,
            locate_route: locate_route.to_string(),
        }
    }

    pub fn locate_accept(
        quote_req_id: &str,
        order_id: &str,
        account: &str,
        symbol: &str,
    ) -> LocateAcceptOffer {
        LocateAcceptOffer {
            quote_req_id: truncate_quote_req_id(quote_req_id),
            order_id: order_id.to_string(),
            account: account.to_string(),
            symbol: symbol.to_string(),
        }
    }

    pub fn locate_reject(
        quote_req_id: &str,
        order_id: &str,
        account: &str,
        symbol: &str,
        reason: &str,
    ) -> LocateRejectOffer {
        LocateRejectOffer {
            quote_req_id: truncate_quote_req_id(quote_req_id),
            order_id: order_id.to_string(),
            account: account.to_string(),
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn truncation_keeps_rightmost_characters() {
        let long = "COPY-SHADOWACCOUNT-PRIMARYCLORDID123";
        let truncated = truncate_cl_ord_id(long);
        assert_eq!(truncated.chars().count(), CL_ORD_ID_LIMIT);
        assert!(long.ends_with(&truncated));
    }

    #[test]
    fn short_id_is_unchanged() {
        assert_eq!(truncate_cl_ord_id("ABC"), "ABC");
    }

    #[test]
    fn market_order_has_no_price_or_stop() {
        let order = OutboundBuilder::new_order_single(
            "ABC",
            "SHAD1",
            "AAPL",
            crate::model::side::BUY,
            ord_type::MARKET,
            None,
            dec!(100),
            Some(dec!(50)),
            Some(dec!(49)),
            None,
        );
        assert!(order.price.is_none());
        assert!(order.stop_px.is_none());
        assert_eq!(order.time_in_force, tif::DAY);
        assert_eq!(order.handl_inst, '1');
    }

    #[test]
    fn limit_order_keeps_price_only() {
        let order = OutboundBuilder::new_order_single(
            "ABC",
            "SHAD1",
            "AAPL",
            crate::model::side::BUY,
            ord_type::LIMIT,
            None,
            dec!(100),
            Some(dec!(50)),
            Some(dec!(49)),
            None,
        );
        assert_eq!(order.price, Some(dec!(50)));
        assert!(order.stop_px.is_none());
    }

    #[test]
    fn stop_limit_keeps_both() {
        let order = OutboundBuilder::new_order_single(
            "ABC",
            "SHAD1",
            "AAPL",
            crate::model::side::BUY,
            ord_type::STOP_LIMIT,
            None,
            dec!(100),
            Some(dec!(50)),
            Some(dec!(49)),
            None,
        );
        assert_eq!(order.price, Some(dec!(50)));
        assert_eq!(order.stop_px, Some(dec!(49)));
    }

    #[test]
    #[should_panic]
    fn cancel_replace_rejects_unchanged_cl_ord_id() {
        OutboundBuilder::cancel_replace(
            "ABC", "ABC", "SHAD1", "AAPL", crate::model::side::BUY, ord_type::LIMIT, None,
            dec!(100), Some(dec!(50)), None, None,
        );
    }
}
