//! Cross-referencing: candidate discovery, scoring and merging.
//!
//! An [`Xref`] run builds an [`Index`] over the store's default view and
//! walks its candidate pairs best first. Pairs the resolver has already
//! settled are skipped; the rest are scored, merged automatically above
//! the auto threshold, and otherwise queued as suggestions for review.
//! After the walk, high-scoring candidates are checked for contradicting
//! negative judgements and reported as potential conflicts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use kyro_resolve::{Dataset, MemoryStore, Model, Resolver, StoreContext, Xref, XrefConfig};
//!
//! let resolver = Arc::new(Resolver::new());
//! let store = MemoryStore::new(StoreContext::new(Dataset::new("ds"), Model::builtin(), resolver.clone()));
//! let report = Xref::new(resolver, &store)
//!     .run(&XrefConfig::default().with_auto_threshold(0.99))
//!     .unwrap();
//! println!("{} merged, {} suggested", report.merged.len(), report.suggested);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::XrefConfig;
use crate::entity::CompositeEntity;
use crate::error::{KyroResult, ResolverError};
use crate::identifier::Identifier;
use crate::index::Index;
use crate::judgement::Judgement;
use crate::matching::{LogicV1, ScoringAlgorithm};
use crate::resolver::Resolver;
use crate::storage::{Store, View};

/// Score multiplier for pairs that already share a source dataset.
const SAME_DATASET_PENALTY: f64 = 0.7;

/// Cooperative cancellation flag, checked between candidate pairs.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the run to stop after the pair it is working on.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancellationToken::cancel`] was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running totals of an xref run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct XrefStats {
    /// Candidate pairs taken from the index.
    pub pairs: usize,
    /// Pairs that were scored.
    pub scored: usize,
    pub suggested: usize,
    pub merged: usize,
    /// Mean, min and max over scored pairs.
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    #[serde(skip)]
    sum: f64,
}

impl XrefStats {
    fn record(&mut self, score: f64) {
        if self.scored == 0 {
            self.min = score;
            self.max = score;
        } else {
            self.min = self.min.min(score);
            self.max = self.max.max(score);
        }
        self.scored += 1;
        self.sum += score;
        self.mean = self.sum / self.scored as f64;
    }

    fn log(&self) {
        info!(
            pairs = self.pairs,
            suggested = self.suggested,
            merged = self.merged,
            avg = format_args!("{:.2}", self.mean),
            min = format_args!("{:.2}", self.min),
            max = format_args!("{:.2}", self.max),
            "xref progress"
        );
    }
}

/// Two candidates that both match an anchor closely but were judged to be
/// different entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PotentialConflict {
    pub anchor: Identifier,
    pub left: Identifier,
    pub right: Identifier,
}

/// An auto-merge the resolver refused.
#[derive(Debug, Clone, Serialize)]
pub struct MergeFailure {
    pub left: Identifier,
    pub right: Identifier,
    /// The resolver's refusal, rendered.
    pub error: String,
}

/// One automatic merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoMerge {
    pub left: Identifier,
    pub right: Identifier,
    pub canonical: Identifier,
    pub score: f64,
}

/// Outcome of an xref run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct XrefReport {
    pub stats: XrefStats,
    pub merged: Vec<AutoMerge>,
    /// Pairs queued on the resolver for review.
    pub suggested: usize,
    pub conflicts: Vec<PotentialConflict>,
    pub merge_errors: Vec<MergeFailure>,
    /// True when the run stopped on its cancellation token.
    pub cancelled: bool,
}

/// A configured xref run over one store.
pub struct Xref<'a> {
    resolver: Arc<Resolver>,
    store: &'a dyn Store,
    algorithm: Box<dyn ScoringAlgorithm>,
    cancel: CancellationToken,
    progress: Option<Sender<XrefStats>>,
}

impl<'a> Xref<'a> {
    /// A run over `store`, recording decisions in `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, store: &'a dyn Store) -> Self {
        Self {
            resolver,
            store,
            algorithm: Box::new(LogicV1),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Replaces the default [`LogicV1`] scoring.
    #[must_use]
    pub fn algorithm(mut self, algorithm: impl ScoringAlgorithm + 'static) -> Self {
        self.algorithm = Box::new(algorithm);
        self
    }

    /// Shares a token that stops the run between two pairs.
    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sends a stats snapshot every `stats_interval` pairs and at the end.
    /// Snapshots are dropped when the channel is full.
    #[must_use]
    pub fn progress(mut self, tx: Sender<XrefStats>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn publish(&self, stats: &XrefStats) {
        stats.log();
        let Some(tx) = &self.progress else {
            return;
        };
        match tx.try_send(stats.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("xref progress channel full"),
            Err(TrySendError::Disconnected(_)) => debug!("xref progress receiver gone"),
        }
    }

    /// Walks the index pairs once. Resolver errors other than a refused
    /// auto-merge abort the run; decisions made so far are kept.
    pub fn run(&self, config: &XrefConfig) -> KyroResult<XrefReport> {
        let config = config.clone().validate()?;
        info!(
            dataset = %self.store.dataset().name,
            algorithm = self.algorithm.name(),
            scored = config.scored,
            auto_threshold = ?config.auto_threshold,
            "xref begin"
        );
        let view = self.store.default_view(config.external)?;
        let index = Index::build(&*view)?;
        let negative_check = config.negative_check();
        let user = config.user.as_deref();

        let mut report = XrefReport::default();
        let mut close_matches: BTreeMap<Identifier, BTreeSet<Identifier>> = BTreeMap::new();

        for (idx, ((left_id, right_id), index_score)) in index.pairs().enumerate() {
            if self.cancel.is_cancelled() {
                info!(pairs = idx, "xref cancelled, finishing gracefully");
                report.cancelled = true;
                break;
            }
            if report.suggested >= config.limit {
                break;
            }
            report.stats.pairs = idx + 1;
            if idx > 0 && idx % config.stats_interval == 0 {
                self.publish(&report.stats);
            }

            if !self.resolver.check_candidate(left_id.as_str(), right_id.as_str()) {
                continue;
            }
            let Some(left) = view.get_entity(left_id.as_str())? else {
                continue;
            };
            let Some(right) = view.get_entity(right_id.as_str())? else {
                continue;
            };
            if !left.schema().can_match(right.schema()) {
                continue;
            }
            if let Some(range) = &config.range {
                if !left.schema().is_a(range) && !right.schema().is_a(range) {
                    continue;
                }
            }

            let mut score = if config.scored {
                self.algorithm.compare(&left, &right).score
            } else {
                index_score
            };
            report.stats.record(score);

            if score > negative_check {
                close_matches.entry(left_id.clone()).or_default().insert(right_id.clone());
                close_matches.entry(right_id.clone()).or_default().insert(left_id.clone());
            }

            if !left.datasets.is_disjoint(&right.datasets) {
                score *= SAME_DATASET_PENALTY;
            }

            if config.auto_threshold.is_some_and(|t| score > t) {
                self.auto_merge(&mut report, &left_id, &right_id, score, user)?;
                continue;
            }

            if let Some(focus) = &config.focus_dataset {
                if left.datasets.contains(focus) != right.datasets.contains(focus) {
                    score = (score + 1.0) / 2.0;
                }
            }

            self.resolver.suggest(left_id.as_str(), right_id.as_str(), score, user)?;
            report.suggested += 1;
            report.stats.suggested = report.suggested;
        }
        self.publish(&report.stats);

        report.conflicts = report_potential_conflicts(&*view, &close_matches, &self.resolver)?;
        info!(
            suggested = report.suggested,
            merged = report.merged.len(),
            conflicts = report.conflicts.len(),
            merge_errors = report.merge_errors.len(),
            cancelled = report.cancelled,
            "xref end"
        );
        Ok(report)
    }

    fn auto_merge(
        &self,
        report: &mut XrefReport,
        left: &Identifier,
        right: &Identifier,
        score: f64,
        user: Option<&str>,
    ) -> KyroResult<()> {
        match self
            .resolver
            .decide(left.as_str(), right.as_str(), Judgement::Positive, user, Some(score))
        {
            Ok(canonical) => {
                info!(left = %left, right = %right, score, canonical = %canonical, "auto-merge");
                self.store.update(canonical.as_str())?;
                report.merged.push(AutoMerge {
                    left: left.clone(),
                    right: right.clone(),
                    canonical,
                    score,
                });
                report.stats.merged = report.merged.len();
                Ok(())
            }
            Err(e @ ResolverError::Conflict { .. }) => {
                warn!(left = %left, right = %right, error = %e, "auto-merge refused");
                report.merge_errors.push(MergeFailure {
                    left: left.clone(),
                    right: right.clone(),
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Finds pairs of close matches of the same anchor that carry a negative
/// judgement between them.
pub fn report_potential_conflicts(
    view: &dyn View,
    close_matches: &BTreeMap<Identifier, BTreeSet<Identifier>>,
    resolver: &Resolver,
) -> KyroResult<Vec<PotentialConflict>> {
    let mut conflicts = Vec::new();
    for (anchor, matches) in close_matches {
        let matches: Vec<&Identifier> = matches.iter().collect();
        for (i, left) in matches.iter().enumerate() {
            for right in &matches[i + 1..] {
                if resolver.get_judgement(left.as_str(), right.as_str()) != Judgement::Negative {
                    continue;
                }
                warn!(anchor = %anchor, left = %left, right = %right, "potential conflict");
                for (title, id) in [
                    ("candidate", anchor),
                    ("left side of negative decision", *left),
                    ("right side of negative decision", *right),
                ] {
                    if let Some(entity) = view.resolve_entity(id.as_str())? {
                        log_name_sources(title, &entity);
                    }
                }
                conflicts.push(PotentialConflict {
                    anchor: anchor.clone(),
                    left: (*left).clone(),
                    right: (*right).clone(),
                });
            }
        }
    }
    Ok(conflicts)
}

/// Logs where each name and alias of an entity came from.
fn log_name_sources(title: &str, entity: &CompositeEntity) {
    let mut rows: Vec<_> = entity
        .statements()
        .iter()
        .filter(|s| s.prop == "name" || s.prop == "alias")
        .map(|s| (s.prop != "name", &s.dataset, &s.entity_id, s.lang.as_deref().unwrap_or("-"), &s.value))
        .collect();
    rows.sort();
    for (_, dataset, entity_id, lang, value) in rows {
        info!(
            title,
            entity = entity.id().unwrap_or_default(),
            dataset = %dataset,
            source = %entity_id,
            lang,
            value = %value,
            "name source"
        );
    }
}
