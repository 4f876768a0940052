// src/rules/refresh.rs

//! Scheduled rule refresh and incremental reprocessing.
//!
//! One cycle pulls policies and rules from the rule source, translates the
//! policy flags, diffs against the previous local snapshot, installs the new
//! snapshot, and reprocesses only the changed rules. The persisted last-run
//! record is the mutual-exclusion and crash-recovery mechanism: designed to
//! be re-invoked from a daily timer, never to run concurrently with itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::models::{AccessPolicy, CdxRule, DateRange, Period};
use crate::rules::diff::{DiffEntry, RulesDiff};
use crate::rules::ruleset::{RuleEngine, RuleSet};
use crate::storage::{MetadataStore, RefreshRun};

/// HTTP client for the external rule source.
pub struct RuleSource {
    client: reqwest::Client,
    base_url: String,
}

/// Upstream policy object: an id and the access points it opens.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyDoc {
    id: i64,
    #[serde(default)]
    access_points: Vec<String>,
}

/// Upstream rule object, still referencing its policy by id.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleDoc {
    id: i64,
    policy_id: i64,
    #[serde(default)]
    url_patterns: Vec<String>,
    captured: Option<DateRange>,
    accessed: Option<DateRange>,
    period: Option<Period>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl RuleSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Pull policies and rules, translating each rule's policy reference
    /// into a resolved [`AccessPolicy`].
    ///
    /// A rule referencing an unknown policy fails the whole fetch; rules
    /// are never persisted half-translated.
    pub async fn fetch(&self) -> Result<Vec<CdxRule>> {
        let policies: Vec<PolicyDoc> = self.get_json("policies").await?;
        let rules: Vec<RuleDoc> = self.get_json("rules").await?;

        let by_id: std::collections::HashMap<i64, AccessPolicy> = policies
            .iter()
            .map(|p| (p.id, AccessPolicy::from_access_points(&p.access_points)))
            .collect();

        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        rules
            .into_iter()
            .map(|doc| {
                let policy = by_id.get(&doc.policy_id).copied().ok_or_else(|| {
                    AppError::rule_source(format!(
                        "rule {} references unknown policy {}",
                        doc.id, doc.policy_id
                    ))
                })?;
                Ok(CdxRule {
                    id: doc.id,
                    policy,
                    patterns: doc.url_patterns,
                    captured: doc.captured,
                    accessed: doc.accessed,
                    embargo: doc.period,
                    enabled: doc.enabled,
                    created: doc.created.unwrap_or(epoch),
                    modified: doc.modified.unwrap_or(epoch),
                })
            })
            .collect()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::rule_source(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::rule_source(format!(
                "GET {url}: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::rule_source(format!("GET {url}: {e}")))
    }
}

/// Re-evaluates the documents affected by one changed rule.
///
/// The document index itself belongs to the query-time service; this seam
/// lets it plug in. Returns the number of documents touched.
#[async_trait]
pub trait Reprocessor: Send + Sync {
    async fn reprocess(&self, entry: &DiffEntry, ruleset: &RuleSet) -> Result<u64>;
}

/// Default reprocessor: logs the change and touches nothing.
pub struct LogReprocessor;

#[async_trait]
impl Reprocessor for LogReprocessor {
    async fn reprocess(&self, entry: &DiffEntry, _ruleset: &RuleSet) -> Result<u64> {
        log::info!("rule {} marked {:?} for re-evaluation", entry.id, entry.reason);
        Ok(0)
    }
}

/// Summary of one refresh cycle.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// True when this cycle resumed a crashed run instead of fetching
    pub recovered: bool,
    /// Diff entries processed
    pub changed: usize,
    /// Documents re-evaluated
    pub documents: u64,
}

/// Runs one rule refresh cycle against the store and engine.
pub struct RuleRefresher {
    source: RuleSource,
    store: Arc<dyn MetadataStore>,
    engine: Arc<RuleEngine>,
    reprocessor: Arc<dyn Reprocessor>,
}

impl RuleRefresher {
    pub fn new(
        source: RuleSource,
        store: Arc<dyn MetadataStore>,
        engine: Arc<RuleEngine>,
        reprocessor: Arc<dyn Reprocessor>,
    ) -> Self {
        Self {
            source,
            store,
            engine,
            reprocessor,
        }
    }

    /// Run one refresh cycle.
    ///
    /// An incomplete previous run forces recovery: the already-persisted
    /// rules and diff are reloaded and reprocessing resumes from the rule-id
    /// checkpoint. A failed fetch leaves the previous snapshot current and
    /// raises the lockdown flag, which must be cleared manually.
    pub async fn run_once(&self) -> Result<RefreshOutcome> {
        if let Some(run) = self.store.last_run().await? {
            if !run.completed {
                log::warn!(
                    "previous refresh incomplete (checkpoint {:?}); entering recovery",
                    run.checkpoint
                );
                return self.resume(run).await;
            }
        }

        let fetched = match self.source.fetch().await {
            Ok(rules) => rules,
            Err(e) => {
                self.engine.set_lockdown(true);
                self.store.set_lockdown(true).await?;
                log::error!("rule refresh failed, entering lockdown: {e}");
                return Err(e);
            }
        };

        let old = self.store.load_rules().await?;
        let diff = RulesDiff::diff(&old, &fetched);
        log::info!(
            "fetched {} rules, {} changed since last refresh",
            fetched.len(),
            diff.len()
        );

        if diff.is_empty() {
            let now = Utc::now();
            self.store
                .save_last_run(&RefreshRun {
                    started: now,
                    finished: Some(now),
                    completed: true,
                    checkpoint: None,
                    diff: RulesDiff::default(),
                })
                .await?;
            self.engine.install(RuleSet::build(fetched));
            return Ok(RefreshOutcome::default());
        }

        // The incomplete marker doubles as the at-most-one-new-snapshot
        // guard: nothing else may start a refresh until this run completes.
        let mut run = RefreshRun {
            started: Utc::now(),
            finished: None,
            completed: false,
            checkpoint: None,
            diff,
        };
        self.store.save_last_run(&run).await?;
        self.store.save_rules(&fetched).await?;
        self.engine.install(RuleSet::build(fetched));

        let documents = self.reprocess(&mut run).await?;
        Ok(RefreshOutcome {
            recovered: false,
            changed: run.diff.len(),
            documents,
        })
    }

    /// Resume a crashed run: the new rules were persisted before
    /// reprocessing began, so rebuild the snapshot and continue the diff.
    async fn resume(&self, mut run: RefreshRun) -> Result<RefreshOutcome> {
        let rules = self.store.load_rules().await?;
        self.engine.install(RuleSet::build(rules));
        let documents = self.reprocess(&mut run).await?;
        Ok(RefreshOutcome {
            recovered: true,
            changed: run.diff.len(),
            documents,
        })
    }

    /// Walk the diff in ascending id order, checkpointing after each rule
    /// so the same rule is never reprocessed twice in one cycle.
    async fn reprocess(&self, run: &mut RefreshRun) -> Result<u64> {
        let ruleset = self.engine.current();
        let pending = match run.checkpoint {
            Some(id) => run.diff.filter_rules(id),
            None => run.diff.clone(),
        };

        let mut documents = 0;
        for entry in pending.iter() {
            documents += self.reprocessor.reprocess(entry, &ruleset).await?;
            run.checkpoint = Some(entry.id);
            self.store.save_last_run(run).await?;
        }

        run.completed = true;
        run.finished = Some(Utc::now());
        self.store.save_last_run(run).await?;
        log::info!(
            "refresh complete: {} rules reprocessed, {} documents touched",
            run.diff.len(),
            documents
        );
        Ok(documents)
    }
}
