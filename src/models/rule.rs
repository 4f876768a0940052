//! Access-control rules and their building blocks.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

/// Synthetic id of the default-accept rule returned when nothing matches.
pub const DEFAULT_RULE_ID: i64 = -1;

/// Access decision attached to a rule.
///
/// Translated once from the upstream access-point flags when rules are
/// pulled, so upstream id churn never triggers spurious reprocessing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Discoverable and deliverable
    Accepted,
    /// Hidden from search, still deliverable by direct URL
    RestrictedForDiscovery,
    /// Discoverable, delivery blocked
    RestrictedForDelivery,
    /// Fully restricted
    RestrictedForBoth,
}

impl AccessPolicy {
    /// Translate an upstream policy's set of access-point names.
    pub fn from_access_points<S: AsRef<str>>(points: &[S]) -> AccessPolicy {
        let mut discovery = false;
        let mut delivery = false;
        for point in points {
            match point.as_ref().to_ascii_lowercase().as_str() {
                "discovery" => discovery = true,
                "delivery" => delivery = true,
                _ => {}
            }
        }
        match (discovery, delivery) {
            (true, true) => AccessPolicy::Accepted,
            (false, true) => AccessPolicy::RestrictedForDiscovery,
            (true, false) => AccessPolicy::RestrictedForDelivery,
            (false, false) => AccessPolicy::RestrictedForBoth,
        }
    }
}

/// A half-open `[start, end)` instant range; either bound may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        if self.start.is_some_and(|s| instant < s) {
            return false;
        }
        if self.end.is_some_and(|e| instant >= e) {
            return false;
        }
        true
    }
}

/// A calendar period used for embargoes.
///
/// Added to a capture instant calendar-aware, so "1 month" from January 31
/// lands at the end of February rather than a fixed number of seconds later.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Period {
    #[serde(default)]
    pub years: u32,
    #[serde(default)]
    pub months: u32,
    #[serde(default)]
    pub days: u32,
}

impl Period {
    pub fn days(days: u32) -> Self {
        Period {
            years: 0,
            months: 0,
            days,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.days == 0
    }

    /// The instant this period ends when started at `from`.
    ///
    /// Saturates at `from` if the checked additions overflow the calendar.
    pub fn end_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = self.years.saturating_mul(12).saturating_add(self.months);
        from.checked_add_months(Months::new(months))
            .and_then(|t| t.checked_add_days(Days::new(u64::from(self.days))))
            .unwrap_or(from)
    }
}

/// An access-control rule pulled from the rule source and stored locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdxRule {
    /// Stable identity across refreshes
    pub id: i64,

    /// Resolved policy (never the upstream policy id)
    pub policy: AccessPolicy,

    /// URL patterns: exact, `*.domain`, or trailing-`*`
    pub patterns: Vec<String>,

    /// Optional capture-time window
    pub captured: Option<DateRange>,

    /// Optional access-time window
    pub accessed: Option<DateRange>,

    /// Optional embargo period after capture
    pub embargo: Option<Period>,

    pub enabled: bool,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl CdxRule {
    /// The synthetic default-accept rule (id -1) returned when no rule matches.
    pub fn default_accept() -> CdxRule {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        CdxRule {
            id: DEFAULT_RULE_ID,
            policy: AccessPolicy::Accepted,
            patterns: Vec::new(),
            captured: None,
            accessed: None,
            embargo: None,
            enabled: true,
            created: epoch,
            modified: epoch,
        }
    }

    /// Whether this rule applies at the given capture/access instants.
    ///
    /// Disabled rules never apply. An embargoed rule applies only while the
    /// access instant still precedes capture + period; once the embargo
    /// lapses the rule stops matching and its restriction falls away.
    pub fn matches_times(&self, captured: DateTime<Utc>, accessed: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.captured.as_ref().is_some_and(|r| !r.contains(captured)) {
            return false;
        }
        if self.accessed.as_ref().is_some_and(|r| !r.contains(accessed)) {
            return false;
        }
        if let Some(embargo) = &self.embargo {
            if !embargo.is_zero() && accessed >= embargo.end_from(captured) {
                return false;
            }
        }
        true
    }

    /// Value equality ignoring the created/modified timestamps, so an
    /// unchanged rule re-imported with fresh timestamps diffs as identical.
    pub fn same_content(&self, other: &CdxRule) -> bool {
        self.id == other.id
            && self.policy == other.policy
            && self.patterns == other.patterns
            && self.captured == other.captured
            && self.accessed == other.accessed
            && self.embargo == other.embargo
            && self.enabled == other.enabled
    }
}
