// src/rules/diff.rs

//! Diff calculation between two rule-set snapshots.
//!
//! Drives incremental reprocessing: only rules that actually changed are
//! re-evaluated. Comparison is by value (timestamps excluded), so an
//! unchanged rule re-imported with fresh timestamps produces no entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::CdxRule;

/// Why a rule appears in the diff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiffReason {
    New,
    Changed,
    Deleted,
}

/// One changed rule, with both sides where they exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub id: i64,
    pub old: Option<CdxRule>,
    pub new: Option<CdxRule>,
    pub reason: DiffReason,
}

/// The ordered set of changes between two rule snapshots.
///
/// Consumed in ascending rule-id order; [`RulesDiff::filter_rules`] supports
/// resuming a crashed reprocessing run past its last completed id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesDiff {
    entries: BTreeMap<i64, DiffEntry>,
}

impl RulesDiff {
    /// Compare two snapshots by stable rule identity.
    pub fn diff(old: &[CdxRule], new: &[CdxRule]) -> RulesDiff {
        let old_by_id: BTreeMap<i64, &CdxRule> = old.iter().map(|r| (r.id, r)).collect();
        let new_by_id: BTreeMap<i64, &CdxRule> = new.iter().map(|r| (r.id, r)).collect();

        let mut entries = BTreeMap::new();

        for (&id, &old_rule) in &old_by_id {
            match new_by_id.get(&id) {
                None => {
                    entries.insert(
                        id,
                        DiffEntry {
                            id,
                            old: Some(old_rule.clone()),
                            new: None,
                            reason: DiffReason::Deleted,
                        },
                    );
                }
                Some(&new_rule) if !old_rule.same_content(new_rule) => {
                    entries.insert(
                        id,
                        DiffEntry {
                            id,
                            old: Some(old_rule.clone()),
                            new: Some(new_rule.clone()),
                            reason: DiffReason::Changed,
                        },
                    );
                }
                Some(_) => {}
            }
        }

        for (&id, &new_rule) in &new_by_id {
            if !old_by_id.contains_key(&id) {
                entries.insert(
                    id,
                    DiffEntry {
                        id,
                        old: None,
                        new: Some(new_rule.clone()),
                        reason: DiffReason::New,
                    },
                );
            }
        }

        RulesDiff { entries }
    }

    /// Drop entries with id <= `after_id`, for crash resume.
    pub fn filter_rules(&self, after_id: i64) -> RulesDiff {
        RulesDiff {
            entries: self
                .entries
                .iter()
                .filter(|&(&id, _)| id > after_id)
                .map(|(&id, entry)| (id, entry.clone()))
                .collect(),
        }
    }

    /// Entries in ascending rule-id order.
    pub fn iter(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessPolicy;
    use chrono::{TimeZone, Utc};

    fn make_rule(id: i64, pattern: &str) -> CdxRule {
        CdxRule {
            id,
            policy: AccessPolicy::Accepted,
            patterns: vec![pattern.to_string()],
            captured: None,
            accessed: None,
            embargo: None,
            enabled: true,
            created: Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            modified: Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_mixed_diff() {
        let old = vec![
            make_rule(1, "a.example.org/*"),
            make_rule(2, "b.example.org/*"),
            make_rule(3, "c.example.org/*"),
        ];
        let new = vec![
            make_rule(2, "b-changed.example.org/*"),
            make_rule(3, "c.example.org/*"),
            make_rule(4, "d.example.org/*"),
        ];

        let diff = RulesDiff::diff(&old, &new);
        assert_eq!(diff.len(), 3);

        let reasons: Vec<(i64, DiffReason)> = diff.iter().map(|e| (e.id, e.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (1, DiffReason::Deleted),
                (2, DiffReason::Changed),
                (4, DiffReason::New),
            ]
        );
    }

    #[test]
    fn test_timestamp_churn_produces_no_entries() {
        let old = vec![make_rule(1, "example.org/*")];
        let mut reimported = make_rule(1, "example.org/*");
        reimported.modified = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();

        let diff = RulesDiff::diff(&old, &[reimported]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_filter_rules_resume() {
        let old = vec![make_rule(1, "a/*"), make_rule(2, "b/*"), make_rule(3, "c/*")];
        let diff = RulesDiff::diff(&old, &[]);
        assert_eq!(diff.len(), 3);

        let resumed = diff.filter_rules(2);
        let ids: Vec<i64> = resumed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_empty_sides() {
        let rules = vec![make_rule(1, "a/*")];
        assert_eq!(RulesDiff::diff(&[], &rules).len(), 1);
        assert_eq!(RulesDiff::diff(&rules, &rules).len(), 0);
    }
}
