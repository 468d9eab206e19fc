use crate::model::{Account, AccountType, Broker, CopyRule, Route};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// An immutable point-in-time view of all reference data, swapped in as a
/// whole by `ReferenceCache::refresh`. Never mutated in place.
#[derive(Default)]
struct Snapshot {
    accounts_by_number: HashMap<String, Account>,
    brokers_by_id: HashMap<u128, Broker>,
    routes_by_name: HashMap<String, Route>,
    /// Active rules grouped by primary account number, sorted by priority
    /// then shadow account (spec §4.6 step 5).
    rules_by_primary: HashMap<String, Vec<CopyRule>>,
}

fn build_snapshot(
    accounts: Vec<Account>,
    brokers: Vec<Broker>,
    routes: Vec<Route>,
    copy_rules: Vec<CopyRule>,
) -> Snapshot {
    let accounts_by_number = accounts.into_iter().map(|a| (a.number.clone(), a)).collect();
    let brokers_by_id = brokers.into_iter().map(|b| (b.id, b)).collect();
    let routes_by_name = routes.into_iter().map(|r| (r.name.clone(), r)).collect();

    let mut rules_by_primary: HashMap<String, Vec<CopyRule>> = HashMap::new();
    for rule in copy_rules.into_iter().filter(|r| r.active) {
        rules_by_primary
            .entry(rule.primary_account.clone())
            .or_default()
            .push(rule);
    }
    for rules in rules_by_primary.values_mut() {
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.shadow_account.cmp(&b.shadow_account))
        });
    }

    Snapshot {
        accounts_by_number,
        brokers_by_id,
        routes_by_name,
        rules_by_primary,
    }
}

/// Reference Cache (spec §4.9): accounts, brokers, routes and copy-rules
/// loaded at startup and held in memory. Event processing reads only this
/// cache; it never blocks on the database. `refresh()` is the explicit
/// primitive administrative mutations call to pick up changes, and swaps
/// in a whole new snapshot so concurrent readers never observe a torn mix
/// of old and new reference data.
pub struct ReferenceCache {
    snapshot: ArcSwap<Snapshot>,
}

impl ReferenceCache {
    pub fn new(
        accounts: Vec<Account>,
        brokers: Vec<Broker>,
        routes: Vec<Route>,
        copy_rules: Vec<CopyRule>,
    ) -> Self {
        let snapshot = build_snapshot(accounts, brokers, routes, copy_rules);
        info!(
            accounts = snapshot.accounts_by_number.len(),
            routes = snapshot.routes_by_name.len(),
            rules = snapshot.rules_by_primary.values().map(Vec::len).sum::<usize>(),
            "reference cache loaded"
        );
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    /// Atomically replaces the cached reference data. Call after any
    /// administrative mutation to accounts, brokers, routes or copy rules.
    pub fn refresh(
        &self,
        accounts: Vec<Account>,
        brokers: Vec<Broker>,
        routes: Vec<Route>,
        copy_rules: Vec<CopyRule>,
    ) {
        let snapshot = build_snapshot(accounts, brokers, routes, copy_rules);
        info!(
            accounts = snapshot.accounts_by_number.len(),
            rules = snapshot.rules_by_primary.values().map(Vec::len).sum::<usize>(),
            "reference cache refreshed"
        );
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn account(&self, number: &str) -> Option<Account> {
        self.snapshot.load().accounts_by_number.get(number).cloned()
    }

    pub fn is_shadow_account(&self, number: &str) -> bool {
        self.account(number)
            .map(|a| a.account_type == AccountType::Shadow)
            .unwrap_or(false)
    }

    pub fn broker(&self, id: u128) -> Option<Broker> {
        self.snapshot.load().brokers_by_id.get(&id).cloned()
    }

    pub fn route(&self, name: &str) -> Option<Route> {
        self.snapshot.load().routes_by_name.get(name).cloned()
    }

    /// Active locate routes for a broker, ordered by priority asc (spec
    /// §4.5 step 1: "choose the first active route with isLocateRoute=true,
    /// by priority asc, on the configured broker").
    pub fn active_locate_routes(&self, broker_id: u128) -> Vec<Route> {
        let snapshot = self.snapshot.load();
        let mut routes: Vec<Route> = snapshot
            .routes_by_name
            .values()
            .filter(|r| r.is_locate_route && r.broker_id == broker_id)
            .cloned()
            .collect();
        routes.sort_by_key(|r| r.priority);
        routes
    }

    /// Active rules for a primary account, ordered by priority then
    /// shadow-account name (spec §4.6 step 5: deterministic for testing).
    pub fn rules_for_primary(&self, primary_account: &str) -> Vec<CopyRule> {
        self.snapshot
            .load()
            .rules_by_primary
            .get(primary_account)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rule(primary: &str, shadow: &str, priority: i32) -> CopyRule {
        CopyRule {
            id: 1,
            primary_account: primary.to_string(),
            shadow_account: shadow.to_string(),
            ratio_type: crate::model::RatioType::Multiplier,
            ratio_value: dec!(1),
            order_types: Vec::new(),
            copy_route: None,
            locate_route: None,
            copy_broker: None,
            min_quantity: None,
            max_quantity: None,
            priority,
            active: true,
        }
    }

    #[test]
    fn rules_sorted_by_priority_then_shadow_account() {
        let cache = ReferenceCache::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![
                rule("PRIMARY1", "SHAD2", 1),
                rule("PRIMARY1", "SHAD1", 1),
                rule("PRIMARY1", "SHAD0", 0),
            ],
        );
        let rules = cache.rules_for_primary("PRIMARY1");
        let shadows: Vec<&str> = rules.iter().map(|r| r.shadow_account.as_str()).collect();
        assert_eq!(shadows, vec!["SHAD0", "SHAD1", "SHAD2"]);
    }

    #[test]
    fn inactive_rules_excluded() {
        let mut inactive = rule("PRIMARY1", "SHAD1", 0);
        inactive.active = false;
        let cache = ReferenceCache::new(Vec::new(), Vec::new(), Vec::new(), vec![inactive]);
        assert!(cache.rules_for_primary("PRIMARY1").is_empty());
    }

    #[test]
    fn refresh_swaps_snapshot_atomically() {
        let cache = ReferenceCache::empty();
        assert!(cache.rules_for_primary("PRIMARY1").is_empty());
        cache.refresh(Vec::new(), Vec::new(), Vec::new(), vec![rule("PRIMARY1", "SHAD1", 0)]);
        assert_eq!(cache.rules_for_primary("PRIMARY1").len(), 1);
    }
}
