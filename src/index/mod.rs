//! Inverted term index for candidate generation.
//!
//! Postings map each term to the entities containing it together with the
//! term's frequency in that entity. Scores are cosine similarities of TF-IDF
//! vectors, with `tf = count / terms(entity)` and `idf = ln(1 + N / df)`,
//! so two entities with identical terms score 1.0 and rare shared terms
//! weigh more than common ones.
//!
//! An index is rebuilt from a view or loaded from a snapshot; it is never
//! patched in place.

pub mod tokenizer;

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec;
use crate::entity::CompositeEntity;
use crate::error::IndexError;
use crate::identifier::Identifier;
use crate::model::Model;
use crate::storage::View;

/// One frame of an on-disk index. A snapshot is a header followed by any
/// number of schema and posting chunks and a closing `End` frame, so no
/// single frame grows with the corpus.
#[derive(Debug, Serialize, Deserialize)]
enum SnapshotFrame {
    Schemata(Vec<(String, String)>),
    Postings(Vec<(String, BTreeMap<String, f64>)>),
    End,
}

/// A scored candidate pair, lower id first.
pub type ScoredPair = ((Identifier, Identifier), f64);

/// TF-IDF inverted index over matchable entity values.
pub struct Index {
    model: Arc<Model>,
    /// entity id -> schema name
    schemata: BTreeMap<String, String>,
    /// term -> entity id -> term frequency
    postings: BTreeMap<String, BTreeMap<String, f64>>,
    /// entity id -> length of its weight vector
    norms: HashMap<String, f64>,
}

impl Index {
    /// Terms shared by more entities than this generate no pairs.
    pub const MAX_TERM_POSTINGS: usize = 1_000;

    /// Entities or terms per snapshot frame.
    const SNAPSHOT_CHUNK: usize = 4_096;

    /// An index with no entities.
    #[must_use]
    pub fn empty(model: Arc<Model>) -> Self {
        Self {
            model,
            schemata: BTreeMap::new(),
            postings: BTreeMap::new(),
            norms: HashMap::new(),
        }
    }

    /// Indexes every matchable entity of a view.
    pub fn build(view: &dyn View) -> Result<Self, IndexError> {
        let mut index = Self::empty(view.model().clone());
        for entity in view.entities() {
            index.add(&entity?);
        }
        index.compute_norms();
        info!(
            entities = index.entity_count(),
            terms = index.len(),
            "index built"
        );
        Ok(index)
    }

    fn add(&mut self, entity: &CompositeEntity) {
        if !entity.schema().matchable() {
            return;
        }
        let Some(id) = entity.id() else {
            return;
        };
        let tokens = tokenizer::entity_tokens(entity);
        if tokens.is_empty() {
            return;
        }
        let total = tokens.len() as f64;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_default() += 1;
        }
        for (token, count) in counts {
            self.postings
                .entry(token)
                .or_default()
                .insert(id.to_string(), count as f64 / total);
        }
        self.schemata.insert(id.to_string(), entity.schema().name().to_string());
    }

    fn idf(&self, df: usize) -> f64 {
        if df == 0 {
            return 0.0;
        }
        (1.0 + self.schemata.len() as f64 / df as f64).ln()
    }

    fn compute_norms(&mut self) {
        let mut squares: HashMap<String, f64> = HashMap::new();
        for entities in self.postings.values() {
            let idf = self.idf(entities.len());
            for (id, tf) in entities {
                *squares.entry(id.clone()).or_default() += (tf * idf).powi(2);
            }
        }
        self.norms = squares.into_iter().map(|(id, sq)| (id, sq.sqrt())).collect();
    }

    fn cosine(&self, dot: f64, left_norm: f64, right: &str) -> f64 {
        let right_norm = self.norms.get(right).copied().unwrap_or(0.0);
        if left_norm <= 0.0 || right_norm <= 0.0 {
            return 0.0;
        }
        (dot / (left_norm * right_norm)).min(1.0)
    }

    /// Number of distinct terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.schemata.len()
    }

    /// Total number of (term, entity) postings.
    #[must_use]
    pub fn posting_count(&self) -> usize {
        self.postings.values().map(BTreeMap::len).sum()
    }

    /// Every pair of entities sharing at least one term, best first.
    ///
    /// Pairs are unordered (lower id first) and never pair an entity with
    /// itself. Ties are broken by id so the order is stable.
    pub fn pairs(&self) -> impl Iterator<Item = ScoredPair> {
        let mut dots: HashMap<(&str, &str), f64> = HashMap::new();
        for (term, entities) in &self.postings {
            if entities.len() < 2 {
                continue;
            }
            if entities.len() > Self::MAX_TERM_POSTINGS {
                debug!(term = %term, postings = entities.len(), "skipping common term");
                continue;
            }
            let idf = self.idf(entities.len());
            let weighted: Vec<(&str, f64)> = entities.iter().map(|(id, tf)| (id.as_str(), tf * idf)).collect();
            for (i, (left, lw)) in weighted.iter().enumerate() {
                for (right, rw) in &weighted[i + 1..] {
                    *dots.entry((*left, *right)).or_default() += lw * rw;
                }
            }
        }

        let mut pairs: Vec<ScoredPair> = dots
            .into_iter()
            .map(|((left, right), dot)| {
                let left_norm = self.norms.get(left).copied().unwrap_or(0.0);
                let score = self.cosine(dot, left_norm, right);
                ((Identifier::from(left), Identifier::from(right)), score)
            })
            .collect();
        pairs.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| a.cmp(b)));
        pairs.into_iter()
    }

    /// Indexed entities similar to `query`, best first.
    ///
    /// Only entities whose schema can match the query's are returned, and
    /// the query's own id is excluded.
    #[must_use]
    pub fn match_entity(&self, query: &CompositeEntity) -> Vec<(Identifier, f64)> {
        if !query.schema().matchable() {
            return Vec::new();
        }
        let tokens = tokenizer::entity_tokens(query);
        if tokens.is_empty() {
            return Vec::new();
        }
        let total = tokens.len() as f64;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_default() += 1;
        }

        let mut query_sq = 0.0;
        let mut dots: HashMap<&str, f64> = HashMap::new();
        for (token, count) in &counts {
            let Some(entities) = self.postings.get(token) else {
                continue;
            };
            let idf = self.idf(entities.len());
            let weight = *count as f64 / total * idf;
            query_sq += weight * weight;
            for (id, tf) in entities {
                *dots.entry(id.as_str()).or_default() += weight * tf * idf;
            }
        }
        let query_norm = f64::sqrt(query_sq);

        let mut out: Vec<(Identifier, f64)> = dots
            .into_iter()
            .filter(|(id, _)| Some(*id) != query.id())
            .filter(|(id, _)| {
                self.schemata
                    .get(*id)
                    .and_then(|name| self.model.get(name))
                    .is_some_and(|schema| schema.can_match(query.schema()))
            })
            .map(|(id, dot)| (Identifier::from(id), self.cosine(dot, query_norm, id)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        out.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| a.cmp(b)));
        out
    }

    /// Like [`Index::match_entity`], assembling each candidate through
    /// `view`. Candidates merged since the build collapse into their cluster.
    pub fn match_entities(
        &self,
        view: &dyn View,
        query: &CompositeEntity,
    ) -> Result<Vec<(CompositeEntity, f64)>, IndexError> {
        let query_canonical = query.id().map(|id| view.resolver().get_canonical(id));
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for (id, score) in self.match_entity(query) {
            let canonical = view.resolver().get_canonical(id.as_str());
            if Some(&canonical) == query_canonical.as_ref() || !seen.insert(canonical.clone()) {
                continue;
            }
            if let Some(entity) = view.get_entity(canonical.as_str())? {
                out.push((entity, score));
            }
        }
        Ok(out)
    }

    /// Writes a snapshot of the postings.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        self.save_chunked(path, Self::SNAPSHOT_CHUNK)
    }

    fn save_chunked(&self, path: &Path, chunk: usize) -> Result<(), IndexError> {
        let tmp = path.with_extension("tmp");
        let mut frames = 0usize;
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            codec::write_header(&mut writer)?;
            let mut emit = |frame: &SnapshotFrame| -> Result<(), IndexError> {
                writer.write_all(&codec::encode(frame)?)?;
                frames += 1;
                Ok(())
            };
            let schemata: Vec<(String, String)> =
                self.schemata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for part in schemata.chunks(chunk) {
                emit(&SnapshotFrame::Schemata(part.to_vec()))?;
            }
            let postings: Vec<(String, BTreeMap<String, f64>)> =
                self.postings.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for part in postings.chunks(chunk) {
                emit(&SnapshotFrame::Postings(part.to_vec()))?;
            }
            emit(&SnapshotFrame::End)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), terms = self.len(), frames, "index saved");
        Ok(())
    }

    /// Loads a snapshot. A missing or empty file gives an empty index.
    pub fn load(view: &dyn View, path: &Path) -> Result<Self, IndexError> {
        let model = view.model().clone();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no index snapshot, starting empty");
                return Ok(Self::empty(model));
            }
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            info!(path = %path.display(), "empty index snapshot, starting empty");
            return Ok(Self::empty(model));
        }
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        let mut index = Self::empty(model);
        loop {
            match codec::decode(&mut reader)? {
                SnapshotFrame::Schemata(part) => index.schemata.extend(part),
                SnapshotFrame::Postings(part) => index.postings.extend(part),
                SnapshotFrame::End => break,
            }
        }
        index.compute_norms();
        debug!(path = %path.display(), terms = index.len(), "index loaded");
        Ok(index)
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("entities", &self.entity_count())
            .field("terms", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::resolver::Resolver;
    use crate::statement::Statement;
    use crate::storage::{write_with, MemoryStore, Store, StoreContext};

    fn store() -> MemoryStore {
        MemoryStore::new(StoreContext::new(
            Dataset::new("test"),
            Model::builtin(),
            Arc::new(Resolver::new()),
        ))
    }

    fn add(store: &MemoryStore, id: &str, schema: &str, props: &[(&str, &str)]) {
        let model = Model::builtin();
        let s = model.get(schema).unwrap();
        write_with(store, |w| {
            w.add_statement(Statement::base(id, schema, "test"))?;
            for (prop, value) in props {
                w.add_statement(Statement::for_property(id, s, prop, value, "test")?)?;
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_identical_entities_score_one() {
        let store = store();
        add(&store, "a", "Company", &[("name", "Acme Holdings")]);
        add(&store, "b", "Company", &[("name", "ACME holdings")]);
        add(&store, "c", "Company", &[("name", "Globex")]);
        let view = store.default_view(false).unwrap();
        let index = Index::build(&*view).unwrap();

        let pairs: Vec<ScoredPair> = index.pairs().collect();
        assert_eq!(pairs.len(), 1);
        let ((left, right), score) = &pairs[0];
        assert_eq!((left.as_str(), right.as_str()), ("a", "b"));
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rare_terms_rank_higher() {
        let store = store();
        add(&store, "a", "Company", &[("name", "Acme Trading")]);
        add(&store, "b", "Company", &[("name", "Acme Shipping")]);
        add(&store, "c", "Company", &[("name", "Blue Trading")]);
        add(&store, "d", "Company", &[("name", "Red Trading")]);
        let view = store.default_view(false).unwrap();
        let index = Index::build(&*view).unwrap();

        let pairs: Vec<ScoredPair> = index.pairs().collect();
        let (first, _) = &pairs[0];
        assert_eq!((first.0.as_str(), first.1.as_str()), ("a", "b"));
        assert!(pairs.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_unmatchable_schema_not_indexed() {
        let store = store();
        add(&store, "addr1", "Address", &[("full", "1 Main Street")]);
        add(&store, "addr2", "Address", &[("full", "1 Main Street")]);
        let view = store.default_view(false).unwrap();
        let index = Index::build(&*view).unwrap();
        assert_eq!(index.entity_count(), 0);
        assert_eq!(index.pairs().count(), 0);
    }

    #[test]
    fn test_match_excludes_self_and_foreign_schemata() {
        let store = store();
        add(&store, "p1", "Person", &[("name", "Jane Doe")]);
        add(&store, "p2", "Person", &[("name", "Jane Doe")]);
        add(&store, "c1", "Company", &[("name", "Jane Doe")]);
        let view = store.default_view(false).unwrap();
        let index = Index::build(&*view).unwrap();

        let query = view.get_entity("p1").unwrap().unwrap();
        let ids: Vec<String> = index.match_entity(&query).into_iter().map(|(id, _)| id.into_string()).collect();
        assert_eq!(ids, vec!["p2"]);
    }

    #[test]
    fn test_snapshot_spans_many_frames() {
        let store = store();
        add(&store, "a", "Company", &[("name", "Acme Trading")]);
        add(&store, "b", "Company", &[("name", "Acme Shipping")]);
        add(&store, "c", "Company", &[("name", "Blue Trading")]);
        let view = store.default_view(false).unwrap();
        let index = Index::build(&*view).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snap");
        index.save_chunked(&path, 1).unwrap();

        let mut reader = BufReader::new(File::open(&path).unwrap());
        codec::read_header(&mut reader).unwrap();
        let mut frames = 0;
        while !matches!(codec::decode(&mut reader).unwrap(), SnapshotFrame::End) {
            frames += 1;
        }
        assert_eq!(frames, index.entity_count() + index.len());

        let loaded = Index::load(&*view, &path).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.entity_count(), index.entity_count());
        assert_eq!(loaded.pairs().collect::<Vec<_>>(), index.pairs().collect::<Vec<_>>());
    }

    #[test]
    fn test_truncated_snapshot_fails_to_load() {
        let store = store();
        add(&store, "a", "Company", &[("name", "Acme Trading")]);
        let view = store.default_view(false).unwrap();
        let index = Index::build(&*view).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.snap");
        index.save_chunked(&path, 1).unwrap();
        let len = fs::metadata(&path).unwrap().len();
        // Cut off the 14-byte closing frame.
        File::options().write(true).open(&path).unwrap().set_len(len - 14).unwrap();
        assert!(Index::load(&*view, &path).is_err());
    }
}
