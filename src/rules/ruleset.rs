// src/rules/ruleset.rs

//! Rule-set snapshots and the shared resolution engine.
//!
//! A [`RuleSet`] is an immutable snapshot of every rule plus the prefix
//! index built over their patterns. Exactly one snapshot is current at a
//! time; a refresh builds a whole new snapshot and swaps it in by reference,
//! so concurrent resolver calls never observe a half-updated index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::cdx::canonical;
use crate::error::{AppError, Result};
use crate::models::CdxRule;
use crate::rules::trie::PrefixTrie;

/// Immutable snapshot of the active rules and their prefix index.
pub struct RuleSet {
    rules: BTreeMap<i64, CdxRule>,
    trie: PrefixTrie,
    default_rule: CdxRule,
}

impl RuleSet {
    /// Build a snapshot from a set of rules.
    pub fn build(rules: Vec<CdxRule>) -> RuleSet {
        let mut trie = PrefixTrie::new();
        let mut by_id = BTreeMap::new();
        for rule in rules {
            for pattern in &rule.patterns {
                trie.insert(&canonical::to_prefix(pattern), rule.id);
            }
            by_id.insert(rule.id, rule);
        }
        RuleSet {
            rules: by_id,
            trie,
            default_rule: CdxRule::default_accept(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&CdxRule> {
        self.rules.get(&id)
    }

    /// All rules as a snapshot vector, in id order.
    pub fn rules(&self) -> Vec<CdxRule> {
        self.rules.values().cloned().collect()
    }

    /// Candidate rules for a URL in specificity order (least specific
    /// first). Within one prefix length, lower ids come first.
    pub fn rules_for(&self, url: &str) -> Vec<&CdxRule> {
        let probe = format!("{} ", canonical::to_ssurt(url));
        let mut matches = self.trie.matching(&probe);
        matches.sort_by_key(|&(depth, id)| (depth, id));
        matches
            .into_iter()
            .filter_map(|(_, id)| self.rules.get(&id))
            .collect()
    }

    /// Decide which rule governs a capture of `url` taken at `captured`
    /// and viewed at `accessed`.
    ///
    /// Candidates are walked least-specific first and the last survivor
    /// wins, so the most specific URL pattern decides; equally specific
    /// patterns break the tie toward the highest rule id. When nothing
    /// survives the date/embargo filters the synthetic default-accept rule
    /// (id -1) is returned, so every URL always has a decision.
    pub fn resolve(
        &self,
        url: &str,
        captured: DateTime<Utc>,
        accessed: DateTime<Utc>,
    ) -> &CdxRule {
        let mut winner = &self.default_rule;
        for rule in self.rules_for(url) {
            if rule.matches_times(captured, accessed) {
                winner = rule;
            }
        }
        winner
    }
}

/// Shared handle to the current rule-set snapshot.
///
/// Readers clone the `Arc` under a short read lock; a refresh installs a
/// replacement snapshot with [`RuleEngine::install`]. The lockdown flag is
/// raised when a refresh fails in a way that leaves filtering untrusted and
/// must be cleared manually.
pub struct RuleEngine {
    current: RwLock<Arc<RuleSet>>,
    lockdown: AtomicBool,
}

impl RuleEngine {
    pub fn new(initial: RuleSet) -> RuleEngine {
        RuleEngine {
            current: RwLock::new(Arc::new(initial)),
            lockdown: AtomicBool::new(false),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    /// Atomically replace the current snapshot.
    pub fn install(&self, next: RuleSet) {
        *self.current.write() = Arc::new(next);
    }

    pub fn set_lockdown(&self, on: bool) {
        self.lockdown.store(on, Ordering::SeqCst);
    }

    pub fn is_locked_down(&self) -> bool {
        self.lockdown.load(Ordering::SeqCst)
    }

    /// Resolve against the current snapshot, refusing while locked down.
    pub fn resolve(
        &self,
        url: &str,
        captured: DateTime<Utc>,
        accessed: DateTime<Utc>,
    ) -> Result<CdxRule> {
        if self.is_locked_down() {
            return Err(AppError::Lockdown);
        }
        Ok(self.current().resolve(url, captured, accessed).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessPolicy, DateRange, Period};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn make_rule(id: i64, policy: AccessPolicy, pattern: &str) -> CdxRule {
        CdxRule {
            id,
            policy,
            patterns: vec![pattern.to_string()],
            captured: None,
            accessed: None,
            embargo: None,
            enabled: true,
            created: at(2016, 1, 1),
            modified: at(2016, 1, 1),
        }
    }

    #[test]
    fn test_most_specific_pattern_wins() {
        let ruleset = RuleSet::build(vec![
            make_rule(1, AccessPolicy::Accepted, "http://("),
            make_rule(2, AccessPolicy::RestrictedForBoth, "http://(uk,"),
            make_rule(3, AccessPolicy::Accepted, "http://(uk,fred,"),
        ]);

        let now = at(2020, 1, 1);
        let rule = ruleset.resolve("http://fred.uk/x", now, now);
        assert_eq!(rule.id, 3);

        let rule = ruleset.resolve("http://example.com/x", now, now);
        assert_eq!(rule.id, 1);

        let rule = ruleset.resolve("http://bob.uk/x", now, now);
        assert_eq!(rule.id, 2);
    }

    #[test]
    fn test_equal_specificity_highest_id_wins() {
        let ruleset = RuleSet::build(vec![
            make_rule(5, AccessPolicy::RestrictedForBoth, "*.example.org"),
            make_rule(9, AccessPolicy::Accepted, "*.example.org"),
            make_rule(7, AccessPolicy::RestrictedForDelivery, "*.example.org"),
        ]);
        let now = at(2020, 1, 1);
        assert_eq!(ruleset.resolve("http://example.org/x", now, now).id, 9);
    }

    #[test]
    fn test_no_match_returns_default_accept() {
        let ruleset = RuleSet::build(vec![make_rule(
            1,
            AccessPolicy::RestrictedForBoth,
            "*.example.org",
        )]);
        let now = at(2020, 1, 1);
        let rule = ruleset.resolve("http://other.com/x", now, now);
        assert_eq!(rule.id, -1);
        assert_eq!(rule.policy, AccessPolicy::Accepted);
    }

    #[test]
    fn test_date_filtered_rule_falls_through() {
        let mut restricted = make_rule(2, AccessPolicy::RestrictedForBoth, "*.example.org");
        restricted.captured = Some(DateRange {
            start: Some(at(2016, 8, 21)),
            end: Some(at(2016, 8, 23)),
        });
        let ruleset = RuleSet::build(vec![
            make_rule(1, AccessPolicy::Accepted, "http://("),
            restricted,
        ]);

        let access = at(2020, 1, 1);
        // Captured inside the window: the specific rule applies.
        assert_eq!(
            ruleset.resolve("http://example.org/", at(2016, 8, 22), access).id,
            2
        );
        // Captured outside: falls back to the broad accept rule.
        assert_eq!(
            ruleset.resolve("http://example.org/", at(2016, 8, 25), access).id,
            1
        );
    }

    #[test]
    fn test_embargoed_rule_applies_until_window_ends() {
        let mut embargoed = make_rule(2, AccessPolicy::RestrictedForBoth, "*.example.org");
        embargoed.embargo = Some(Period::days(30));
        let ruleset = RuleSet::build(vec![
            make_rule(1, AccessPolicy::Accepted, "http://("),
            embargoed,
        ]);

        let captured = at(2016, 8, 1);
        // Restricted while the embargo runs, permitted once it lapses.
        assert_eq!(
            ruleset.resolve("http://example.org/", captured, at(2016, 8, 11)).id,
            2
        );
        assert_eq!(
            ruleset.resolve("http://example.org/", captured, at(2016, 9, 15)).id,
            1
        );
    }

    #[test]
    fn test_engine_swap_and_lockdown() {
        let engine = RuleEngine::new(RuleSet::build(vec![make_rule(
            1,
            AccessPolicy::Accepted,
            "http://(",
        )]));
        let now = at(2020, 1, 1);
        assert_eq!(engine.resolve("http://example.org/", now, now).unwrap().id, 1);

        let before = engine.current();
        engine.install(RuleSet::build(vec![make_rule(
            2,
            AccessPolicy::RestrictedForBoth,
            "http://(",
        )]));
        // The old snapshot handle is still intact for in-flight readers.
        assert_eq!(before.resolve("http://example.org/", now, now).id, 1);
        assert_eq!(engine.resolve("http://example.org/", now, now).unwrap().id, 2);

        engine.set_lockdown(true);
        assert!(matches!(
            engine.resolve("http://example.org/", now, now),
            Err(AppError::Lockdown)
        ));
        engine.set_lockdown(false);
        assert!(engine.resolve("http://example.org/", now, now).is_ok());
    }
}
