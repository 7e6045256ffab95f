//! The identity-merge graph.
//!
//! The resolver records judgements between entity ids and maintains the
//! clusters formed by positive judgements. Every cluster with more than one
//! member has a canonical id, minted with the `NK-` prefix on first merge;
//! readers use it to assemble one entity out of many source records.
//!
//! The resolver can live purely in memory ([`Resolver::new`]) or be backed by
//! a journal in a locked directory ([`Resolver::open`]), which is replayed on
//! open so edges survive restarts.
//!
//! ```
//! use kyro_resolve::{Judgement, Resolver};
//!
//! let resolver = Resolver::new();
//! let canonical = resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
//! assert!(canonical.is_canonical());
//! assert_eq!(resolver.get_canonical("a"), canonical);
//! assert_eq!(resolver.get_judgement("a", "b"), Judgement::Positive);
//! ```

mod edge;
#[cfg(feature = "persistent")]
mod file_lock;
mod graph;
#[cfg(feature = "persistent")]
mod journal;

use std::collections::BTreeSet;
#[cfg(feature = "persistent")]
use std::path::Path;
#[cfg(feature = "persistent")]
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
#[cfg(feature = "persistent")]
use tracing::warn;

pub use edge::{Edge, EdgeKey};
#[cfg(feature = "persistent")]
pub use file_lock::FileLock;
#[cfg(feature = "persistent")]
pub use journal::{Journal, JournalEntry, JournalRecord};

#[cfg(feature = "persistent")]
use crate::config::ResolverConfig;
use crate::error::ResolverError;
use crate::identifier::Identifier;
use crate::judgement::Judgement;
use graph::Graph;

#[cfg(feature = "persistent")]
struct Durability {
    journal: Journal,
    config: ResolverConfig,
    /// Journal size right after the last compaction.
    compacted_size: AtomicU64,
    compactions: AtomicU64,
    _lock: FileLock,
}

/// Thread-safe identity-merge graph.
///
/// Mutations are serialized by a writer mutex and reach the journal before
/// they are applied; the graph lock is only held for the in-memory apply.
pub struct Resolver {
    graph: RwLock<Graph>,
    writer: Mutex<()>,
    #[cfg(feature = "persistent")]
    durability: Option<Durability>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("edges", &self.read().edge_count())
            .finish()
    }
}

impl Resolver {
    /// Creates an empty in-memory resolver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            writer: Mutex::new(()),
            #[cfg(feature = "persistent")]
            durability: None,
        }
    }

    /// Opens (or creates) a durable resolver in `dir`.
    ///
    /// Takes an exclusive lock on the directory and replays the journal.
    #[cfg(feature = "persistent")]
    pub fn open(dir: impl AsRef<Path>, config: ResolverConfig) -> Result<Self, ResolverError> {
        let dir = dir.as_ref();
        let config = config.validate().map_err(|e| ResolverError::Journal {
            message: e.to_string(),
        })?;
        std::fs::create_dir_all(dir)?;
        let lock = FileLock::acquire(dir)?;
        let journal = Journal::open(&dir.join("edges.journal"), config.sync_on_write)?;

        let mut graph = Graph::default();
        let mut replayed = 0usize;
        for entry in journal.iter()? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, replayed, "stopping journal replay at corrupt entry");
                    break;
                }
            };
            match entry.record {
                JournalRecord::Upsert(edge) => graph.upsert(edge),
                JournalRecord::Remove { source, target } => {
                    graph.remove(&source, &target);
                }
            }
            replayed += 1;
        }
        info!(dir = %dir.display(), replayed, edges = graph.edge_count(), "resolver opened");

        Ok(Self {
            graph: RwLock::new(graph),
            writer: Mutex::new(()),
            durability: Some(Durability {
                journal,
                config,
                compacted_size: AtomicU64::new(0),
                compactions: AtomicU64::new(0),
                _lock: lock,
            }),
        })
    }

    // A panic while holding the lock can only happen between two complete
    // graph mutations, so the inner state is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn order(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journals a batch of mutations, then applies it to the graph.
    /// Callers hold the writer mutex, so the batch was validated against
    /// the state it is applied to.
    fn commit(&self, upserts: Vec<Edge>, removals: &[EdgeKey]) -> Result<(), ResolverError> {
        self.journal_edges(&upserts)?;
        self.journal_removals(removals)?;
        {
            let mut graph = self.write();
            for (source, target) in removals {
                graph.remove(source, target);
            }
            for edge in upserts {
                graph.upsert(edge);
            }
        }
        self.maybe_compact()
    }

    #[cfg(feature = "persistent")]
    fn journal(&self, records: Vec<JournalRecord>) -> Result<(), ResolverError> {
        if let Some(durability) = &self.durability {
            for record in records {
                durability.journal.append(record)?;
            }
        }
        Ok(())
    }

    #[cfg(not(feature = "persistent"))]
    fn journal_edges(&self, _edges: &[Edge]) -> Result<(), ResolverError> {
        Ok(())
    }

    #[cfg(feature = "persistent")]
    fn journal_edges(&self, edges: &[Edge]) -> Result<(), ResolverError> {
        self.journal(edges.iter().cloned().map(JournalRecord::Upsert).collect())
    }

    #[cfg(not(feature = "persistent"))]
    fn journal_removals(&self, _keys: &[EdgeKey]) -> Result<(), ResolverError> {
        Ok(())
    }

    #[cfg(feature = "persistent")]
    fn journal_removals(&self, keys: &[EdgeKey]) -> Result<(), ResolverError> {
        self.journal(
            keys.iter()
                .map(|(source, target)| JournalRecord::Remove {
                    source: source.clone(),
                    target: target.clone(),
                })
                .collect(),
        )
    }

    // Compacts once the journal has grown past the configured size and
    // doubled since the last rewrite, so rewrites stay logarithmic in the
    // number of appends even when the live edge set alone exceeds the limit.
    #[cfg(feature = "persistent")]
    fn maybe_compact(&self) -> Result<(), ResolverError> {
        let Some(durability) = &self.durability else {
            return Ok(());
        };
        let floor = durability
            .config
            .max_journal_size
            .max(durability.compacted_size.load(Ordering::Relaxed).saturating_mul(2));
        if durability.journal.size_bytes()? > floor {
            self.rewrite(durability)?;
        }
        Ok(())
    }

    #[cfg(not(feature = "persistent"))]
    fn maybe_compact(&self) -> Result<(), ResolverError> {
        Ok(())
    }

    #[cfg(feature = "persistent")]
    fn rewrite(&self, durability: &Durability) -> Result<(), ResolverError> {
        let mut edges: Vec<Edge> = self.read().edges().cloned().collect();
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key().cmp(&b.key())));
        let count = edges.len();
        durability
            .journal
            .rewrite(edges.into_iter().map(JournalRecord::Upsert))?;
        let size = durability.journal.size_bytes()?;
        durability.compacted_size.store(size, Ordering::Relaxed);
        let compactions = durability.compactions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(edges = count, size, compactions, "resolver journal compacted");
        Ok(())
    }

    /// Rewrites the journal as one record per live edge.
    #[cfg(feature = "persistent")]
    pub fn compact(&self) -> Result<(), ResolverError> {
        let _order = self.order();
        match &self.durability {
            Some(durability) => self.rewrite(durability),
            None => Ok(()),
        }
    }

    /// Number of journal compactions since the resolver was opened.
    #[cfg(feature = "persistent")]
    #[must_use]
    pub fn compactions(&self) -> u64 {
        self.durability
            .as_ref()
            .map_or(0, |d| d.compactions.load(Ordering::Relaxed))
    }

    /// Records a judgement between two ids and returns the resulting
    /// canonical id of `left`.
    ///
    /// A positive judgement merges the two clusters, minting a canonical id
    /// when neither side has one. It fails with [`ResolverError::Conflict`]
    /// if any member of one cluster was judged negative against any member
    /// of the other. A non-positive judgement inside a cluster is only
    /// accepted as the reversal of a direct positive edge between the same
    /// pair, which splits the cluster.
    pub fn decide(
        &self,
        left: &str,
        right: &str,
        judgement: Judgement,
        user: Option<&str>,
        score: Option<f64>,
    ) -> Result<Identifier, ResolverError> {
        let left = Identifier::from(left);
        let right = Identifier::from(right);
        let _order = self.order();
        let graph = self.read();

        if left == right {
            if judgement == Judgement::Positive {
                return Ok(graph.canonical(&left));
            }
            return Err(ResolverError::SelfJudgement {
                id: left.into_string(),
            });
        }

        let conflict = || ResolverError::Conflict {
            left: left.to_string(),
            right: right.to_string(),
        };

        let mut edges = Vec::new();
        if judgement == Judgement::Positive {
            if graph.same_cluster(&left, &right) {
                return Ok(graph.canonical(&left));
            }
            if graph.cluster_judgement(&left, &right) == Judgement::Negative {
                return Err(conflict());
            }
            let left_canonical = graph.canonical(&left);
            let right_canonical = graph.canonical(&right);
            edges.push(
                Edge::new(left.clone(), right.clone(), Judgement::Positive)
                    .with_user(user)
                    .with_score(score),
            );
            if !left_canonical.is_canonical() && !right_canonical.is_canonical() {
                let target = std::cmp::max(left.clone(), right.clone());
                edges.push(Edge::new(target, Identifier::make(), Judgement::Positive).with_user(user));
            }
        } else {
            if graph.same_cluster(&left, &right) {
                let reversible = graph
                    .edge(&left, &right)
                    .is_some_and(|e| e.judgement == Judgement::Positive);
                if !reversible {
                    return Err(conflict());
                }
            }
            edges.push(
                Edge::new(left.clone(), right.clone(), judgement)
                    .with_user(user)
                    .with_score(score),
            );
        }

        drop(graph);
        self.commit(edges, &[])?;

        let canonical = self.get_canonical(left.as_str());
        info!(
            left = %left,
            right = %right,
            judgement = %judgement,
            canonical = %canonical,
            user = user.unwrap_or(""),
            "judgement recorded"
        );
        Ok(canonical)
    }

    /// Records a scored candidate pair for later review.
    ///
    /// Pairs that already carry any judgement are left untouched.
    pub fn suggest(
        &self,
        left: &str,
        right: &str,
        score: f64,
        user: Option<&str>,
    ) -> Result<(), ResolverError> {
        let left = Identifier::from(left);
        let right = Identifier::from(right);
        let _order = self.order();
        if left == right || self.read().cluster_judgement(&left, &right) != Judgement::NoJudgement {
            return Ok(());
        }
        let edge = Edge::new(left, right, Judgement::NoJudgement)
            .with_user(user)
            .with_score(Some(score));
        debug!(source = %edge.source, target = %edge.target, score, "candidate suggested");
        self.commit(vec![edge], &[])
    }

    /// The canonical id of `id`'s cluster (`id` itself when unmerged).
    #[must_use]
    pub fn get_canonical(&self, id: &str) -> Identifier {
        self.read().canonical(&Identifier::from(id))
    }

    /// Every id in `id`'s cluster, itself included.
    #[must_use]
    pub fn connected(&self, id: &str) -> BTreeSet<Identifier> {
        self.read().members_of(&Identifier::from(id))
    }

    /// The source ids merged into a canonical id. Empty unless
    /// `canonical_id` is the canonical id of its cluster.
    #[must_use]
    pub fn get_referents(&self, canonical_id: &str) -> BTreeSet<Identifier> {
        let id = Identifier::from(canonical_id);
        let graph = self.read();
        if graph.canonical(&id) != id {
            return BTreeSet::new();
        }
        let mut members = graph.members_of(&id);
        members.remove(&id);
        members
    }

    /// Canonical ids of all merged clusters.
    #[must_use]
    pub fn canonicals(&self) -> Vec<Identifier> {
        self.read().canonicals()
    }

    /// The strongest judgement between the clusters of two ids.
    #[must_use]
    pub fn get_judgement(&self, left: &str, right: &str) -> Judgement {
        self.read()
            .cluster_judgement(&Identifier::from(left), &Identifier::from(right))
    }

    /// True when nothing has been decided between the two clusters yet.
    #[must_use]
    pub fn check_candidate(&self, left: &str, right: &str) -> bool {
        self.get_judgement(left, right) == Judgement::NoJudgement
    }

    /// The direct edge between two ids, if any.
    #[must_use]
    pub fn get_edge(&self, left: &str, right: &str) -> Option<Edge> {
        self.read()
            .edge(&Identifier::from(left), &Identifier::from(right))
            .cloned()
    }

    /// All edges, oldest first.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.read().edges().cloned().collect();
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key().cmp(&b.key())));
        edges
    }

    /// Open suggestions, best score first.
    #[must_use]
    pub fn get_candidates(&self, limit: usize) -> Vec<(Identifier, Identifier, f64)> {
        let graph = self.read();
        let mut candidates: Vec<(Identifier, Identifier, f64)> = graph
            .edges()
            .filter(|e| e.judgement == Judgement::NoJudgement)
            .filter_map(|e| Some((e.source.clone(), e.target.clone(), e.score?)))
            .filter(|(s, t, _)| graph.cluster_judgement(s, t) == Judgement::NoJudgement)
            .collect();
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| (&a.0, &a.1).cmp(&(&b.0, &b.1))));
        candidates.truncate(limit);
        candidates
    }

    /// Deletes the direct edge between two ids. Removing a positive edge
    /// may split a cluster.
    pub fn remove(&self, left: &str, right: &str) -> Result<Option<Edge>, ResolverError> {
        let left = Identifier::from(left);
        let right = Identifier::from(right);
        let _order = self.order();
        let Some(edge) = self.read().edge(&left, &right).cloned() else {
            return Ok(None);
        };
        self.commit(Vec::new(), &[edge.key()])?;
        Ok(Some(edge))
    }

    /// Dissolves `id`'s cluster by removing every positive edge inside it.
    /// Returns the former members.
    pub fn explode(&self, id: &str) -> Result<BTreeSet<Identifier>, ResolverError> {
        let id = Identifier::from(id);
        let _order = self.order();
        let (members, keys) = {
            let graph = self.read();
            let members = graph.members_of(&id);
            let keys: Vec<EdgeKey> = graph
                .edges()
                .filter(|e| e.judgement == Judgement::Positive && members.contains(&e.source))
                .map(Edge::key)
                .collect();
            (members, keys)
        };
        self.commit(Vec::new(), &keys)?;
        info!(id = %id, members = members.len(), "cluster exploded");
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_mints_canonical() {
        let resolver = Resolver::new();
        let canonical = resolver
            .decide("a", "b", Judgement::Positive, Some("tester"), None)
            .unwrap();
        assert!(canonical.is_canonical());
        assert_eq!(resolver.get_canonical("b"), canonical);
        assert_eq!(resolver.get_referents(canonical.as_str()).len(), 2);
        assert_eq!(resolver.get_edge("a", "b").unwrap().user.as_deref(), Some("tester"));
    }

    #[test]
    fn test_decide_is_idempotent() {
        let resolver = Resolver::new();
        let first = resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        let second = resolver.decide("b", "a", Judgement::Positive, None, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.canonicals().len(), 1);
    }

    #[test]
    fn test_merging_clusters_keeps_one_canonical_set() {
        let resolver = Resolver::new();
        let ab = resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        let cd = resolver.decide("c", "d", Judgement::Positive, None, None).unwrap();
        let merged = resolver.decide("b", "c", Judgement::Positive, None, None).unwrap();
        assert_eq!(merged, std::cmp::max(ab, cd));
        assert_eq!(resolver.connected("a").len(), 6);
        for id in ["a", "b", "c", "d"] {
            assert_eq!(resolver.get_canonical(id), merged);
        }
    }

    #[test]
    fn test_joining_existing_cluster_mints_nothing() {
        let resolver = Resolver::new();
        let ab = resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        let abc = resolver.decide("c", "a", Judgement::Positive, None, None).unwrap();
        assert_eq!(ab, abc);
        assert_eq!(resolver.canonicals(), vec![ab]);
    }

    #[test]
    fn test_negative_blocks_merge_of_clusters() {
        let resolver = Resolver::new();
        resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        resolver.decide("b", "x", Judgement::Negative, None, None).unwrap();
        let before = resolver.connected("a");

        let err = resolver.decide("a", "x", Judgement::Positive, None, None).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(resolver.connected("a"), before);
        assert_eq!(resolver.connected("x").len(), 1);
        assert_eq!(resolver.get_judgement("a", "x"), Judgement::Negative);
    }

    #[test]
    fn test_negative_inside_cluster_without_direct_edge_conflicts() {
        let resolver = Resolver::new();
        resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        resolver.decide("b", "c", Judgement::Positive, None, None).unwrap();
        let err = resolver.decide("a", "c", Judgement::Negative, None, None).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_reversal_splits_cluster() {
        let resolver = Resolver::new();
        let canonical = resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        resolver.decide("a", "b", Judgement::Negative, None, None).unwrap();
        assert_eq!(resolver.get_judgement("a", "b"), Judgement::Negative);
        assert_ne!(resolver.get_canonical("a"), resolver.get_canonical("b"));
        // the minted id stays with the pair's greater id
        assert_eq!(resolver.get_canonical("b"), canonical);
        assert_eq!(resolver.get_canonical("a"), Identifier::from("a"));
    }

    #[test]
    fn test_self_judgement() {
        let resolver = Resolver::new();
        assert_eq!(
            resolver.decide("a", "a", Judgement::Positive, None, None).unwrap(),
            Identifier::from("a")
        );
        assert!(matches!(
            resolver.decide("a", "a", Judgement::Negative, None, None),
            Err(ResolverError::SelfJudgement { .. })
        ));
    }

    #[test]
    fn test_suggest_never_downgrades() {
        let resolver = Resolver::new();
        resolver.decide("a", "b", Judgement::Unsure, None, None).unwrap();
        resolver.suggest("a", "b", 0.9, None).unwrap();
        assert_eq!(resolver.get_judgement("a", "b"), Judgement::Unsure);
        assert!(resolver.get_edge("a", "b").unwrap().score.is_none());
    }

    #[test]
    fn test_candidates_sorted_and_filtered() {
        let resolver = Resolver::new();
        resolver.suggest("a", "b", 0.5, None).unwrap();
        resolver.suggest("c", "d", 0.9, None).unwrap();
        resolver.suggest("e", "f", 0.7, None).unwrap();
        resolver.decide("e", "f", Judgement::Negative, None, None).unwrap();

        let candidates = resolver.get_candidates(10);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0, "c");
        assert!(resolver.check_candidate("a", "b"));
        assert!(!resolver.check_candidate("e", "f"));
        assert_eq!(resolver.get_candidates(1).len(), 1);
    }

    #[test]
    fn test_explode_dissolves_cluster() {
        let resolver = Resolver::new();
        resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
        resolver.decide("b", "c", Judgement::Positive, None, None).unwrap();
        let members = resolver.explode("a").unwrap();
        assert_eq!(members.len(), 4);
        for id in ["a", "b", "c"] {
            assert_eq!(resolver.get_canonical(id), Identifier::from(id));
        }
        assert!(resolver.canonicals().is_empty());
    }

    #[test]
    fn test_remove_edge() {
        let resolver = Resolver::new();
        resolver.decide("a", "b", Judgement::Negative, None, None).unwrap();
        assert!(resolver.remove("a", "b").unwrap().is_some());
        assert!(resolver.remove("a", "b").unwrap().is_none());
        assert_eq!(resolver.get_judgement("a", "b"), Judgement::NoJudgement);
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_compact_preserves_graph() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolverConfig {
            sync_on_write: false,
            ..ResolverConfig::default()
        };
        let canonical = {
            let resolver = Resolver::open(dir.path(), config.clone()).unwrap();
            let canonical = resolver.decide("a", "b", Judgement::Positive, None, None).unwrap();
            resolver.suggest("c", "d", 0.4, None).unwrap();
            resolver.remove("c", "d").unwrap();
            resolver.compact().unwrap();
            canonical
        };
        let resolver = Resolver::open(dir.path(), config).unwrap();
        assert_eq!(resolver.get_canonical("a"), canonical);
        assert!(resolver.get_edge("c", "d").is_none());
        assert_eq!(resolver.edges().len(), 2);
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_compaction_backs_off_as_live_set_grows() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolverConfig {
            sync_on_write: false,
            max_journal_size: 4096,
        };
        {
            let resolver = Resolver::open(dir.path(), config.clone()).unwrap();
            for i in 0..200 {
                resolver
                    .suggest(&format!("l{i:03}"), &format!("r{i:03}"), 0.5, None)
                    .unwrap();
            }
            // The live set passes the limit early; rewrites must not follow
            // every append from there on.
            let compactions = resolver.compactions();
            assert!(compactions >= 1);
            assert!(compactions <= 8, "{compactions} rewrites for 200 appends");
        }
        let resolver = Resolver::open(dir.path(), config).unwrap();
        assert_eq!(resolver.edges().len(), 200);
        assert_eq!(resolver.get_candidates(usize::MAX).len(), 200);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let resolver = std::sync::Arc::new(Resolver::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let resolver = resolver.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let left = format!("t{t}-{i}");
                        resolver
                            .decide(&left, &format!("{left}-dup"), Judgement::Positive, None, None)
                            .unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let resolver = resolver.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    for canonical in resolver.canonicals() {
                        assert_eq!(resolver.get_referents(canonical.as_str()).len(), 2);
                    }
                }
            })
        };
        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(resolver.canonicals().len(), 100);
        assert_eq!(resolver.edges().len(), 200);
    }
}
