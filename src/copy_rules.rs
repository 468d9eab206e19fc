use crate::cache::ReferenceCache;
use crate::model::{CopyRule, RatioType};
use rust_decimal::Decimal;

/// One (shadow, copyQty, route) instruction computed for a primary event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInstruction {
    pub shadow_account: String,
    pub copy_qty: Decimal,
    pub copy_route: Option<String>,
    pub locate_route: Option<String>,
    pub copy_broker: Option<String>,
}

fn apply_ratio(ratio_type: RatioType, ratio_value: Decimal, primary_qty: Decimal) -> Decimal {
    match ratio_type {
        RatioType::Percentage => (primary_qty * ratio_value).round(),
        RatioType::Multiplier => (primary_qty * ratio_value).round(),
        RatioType::FixedQuantity => ratio_value,
    }
}

/// Copy-Rule Evaluator (spec §4.6): derives the set of shadow copies a
/// primary order's event should fan out to.
pub struct CopyRuleEvaluator<'a> {
    cache: &'a ReferenceCache,
}

impl<'a> CopyRuleEvaluator<'a> {
    pub fn new(cache: &'a ReferenceCache) -> Self {
        Self { cache }
    }

    pub fn evaluate(
        &self,
        primary_account: &str,
        ord_type: char,
        quantity: Decimal,
    ) -> Vec<CopyInstruction> {
        let mut rules: Vec<CopyRule> = self
            .cache
            .rules_for_primary(primary_account)
            .into_iter()
            .filter(|r| r.applies_to_ord_type(ord_type))
            .filter(|r| r.applies_to_quantity(quantity))
            .collect();

        // `rules_for_primary` already returns priority/shadow-sorted active
        // rules; re-filtering here does not disturb that order.
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.shadow_account.cmp(&b.shadow_account))
        });

        rules
            .into_iter()
            .filter_map(|rule| {
                let copy_qty = apply_ratio(rule.ratio_type, rule.ratio_value, quantity);
                if copy_qty <= Decimal::ZERO {
                    return None;
                }
                Some(CopyInstruction {
                    shadow_account: rule.shadow_account,
                    copy_qty,
                    copy_route: rule.copy_route,
                    locate_route: rule.locate_route,
                    copy_broker: rule.copy_broker,
                })
            })
            .collect()
    }
}

/// Target-route resolution (spec §4.6 final paragraph).
pub fn resolve_target_route<'a>(
    instruction: &'a CopyInstruction,
    original_route: &'a str,
    is_locate_order: bool,
) -> &'a str {
    if is_locate_order {
        instruction
            .locate_route
            .as_deref()
            .or(instruction.copy_route.as_deref())
            .unwrap_or(original_route)
    } else {
        instruction.copy_route.as_deref().unwrap_or(original_route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ord_type;
    use rust_decimal_macros::dec;

    fn rule(shadow: &str, ratio_type: RatioType, ratio_value: Decimal) -> CopyRule {
        CopyRule {
            id: 1,
            primary_account: "PRIMARY1".to_string(),
            shadow_account: shadow.to_string(),
            ratio_type,
            ratio_value,
            order_types: Vec::new(),
            copy_route: None,
            locate_route: None,
            copy_broker: None,
            min_quantity: None,
            max_quantity: None,
            priority: 0,
            active: true,
        }
    }

    #[test]
    fn multiplier_and_percentage_and_fixed_quantity() {
        let cache = ReferenceCache::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![
                rule("SHAD_MULT", RatioType::Multiplier, dec!(2)),
                rule("SHAD_PCT", RatioType::Percentage, dec!(0.5)),
                rule("SHAD_FIXED", RatioType::FixedQuantity, dec!(10)),
            ],
        );
        let evaluator = CopyRuleEvaluator::new(&cache);
        let out = evaluator.evaluate("PRIMARY1", ord_type::MARKET, dec!(100));
        let by_shadow = |name: &str| out.iter().find(|c| c.shadow_account == name).unwrap();
        assert_eq!(by_shadow("SHAD_MULT").copy_qty, dec!(200));
        assert_eq!(by_shadow("SHAD_PCT").copy_qty, dec!(50));
        assert_eq!(by_shadow("SHAD_FIXED").copy_qty, dec!(10));
    }

    #[test]
    fn zero_or_negative_copy_qty_dropped() {
        let cache = ReferenceCache::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![rule("SHAD1", RatioType::FixedQuantity, dec!(0))],
        );
        let evaluator = CopyRuleEvaluator::new(&cache);
        assert!(evaluator
            .evaluate("PRIMARY1", ord_type::MARKET, dec!(100))
            .is_empty());
    }

    #[test]
    fn quantity_bounds_filter_rule_out() {
        let mut bounded = rule("SHAD1", RatioType::Multiplier, dec!(1));
        bounded.min_quantity = Some(dec!(200));
        let cache = ReferenceCache::new(Vec::new(), Vec::new(), Vec::new(), vec![bounded]);
        let evaluator = CopyRuleEvaluator::new(&cache);
        assert!(evaluator
            .evaluate("PRIMARY1", ord_type::MARKET, dec!(100))
            .is_empty());
    }

    #[test]
    fn route_resolution_prefers_locate_route_for_locate_orders() {
        let instruction = CopyInstruction {
            shadow_account: "SHAD1".to_string(),
            copy_qty: dec!(100),
            copy_route: Some("COPY_ROUTE".to_string()),
            locate_route: Some("LOCATE_ROUTE".to_string()),
            copy_broker: None,
        };
        assert_eq!(
            resolve_target_route(&instruction, "ORIGINAL", true),
            "LOCATE_ROUTE"
        );
        assert_eq!(
            resolve_target_route(&instruction, "ORIGINAL", false),
            "COPY_ROUTE"
        );
    }

    #[test]
    fn route_resolution_falls_back_to_original() {
        let instruction = CopyInstruction {
            shadow_account: "SHAD1".to_string(),
            copy_qty: dec!(100),
            copy_route: None,
            locate_route: None,
            copy_broker: None,
        };
        assert_eq!(
            resolve_target_route(&instruction, "ORIGINAL", true),
            "ORIGINAL"
        );
    }
}
