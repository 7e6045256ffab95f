//! In-memory judgement graph with union-find over positive edges.
//!
//! Clusters are the connected components of the positive edges. A
//! disjoint-set forest (union by size, path compression on the write path)
//! gives near-constant `find`; each root keeps its member set so the
//! canonical id is simply the greatest member.

use std::collections::{BTreeSet, HashMap};

use super::edge::{edge_key, Edge, EdgeKey};
use crate::identifier::Identifier;
use crate::judgement::Judgement;

#[derive(Debug, Default)]
pub(crate) struct Graph {
    edges: HashMap<EdgeKey, Edge>,
    adjacency: HashMap<Identifier, BTreeSet<Identifier>>,
    parent: HashMap<Identifier, Identifier>,
    size: HashMap<Identifier, usize>,
    /// Members per root, only for ids that take part in a positive edge.
    members: HashMap<Identifier, BTreeSet<Identifier>>,
}

impl Graph {
    pub(crate) fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn edge(&self, left: &Identifier, right: &Identifier) -> Option<&Edge> {
        self.edges.get(&edge_key(left, right))
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub(crate) fn root<'a>(&'a self, id: &'a Identifier) -> &'a Identifier {
        let mut current = id;
        while let Some(parent) = self.parent.get(current) {
            if parent == current {
                break;
            }
            current = parent;
        }
        current
    }

    fn root_mut(&mut self, id: &Identifier) -> Identifier {
        if !self.parent.contains_key(id) {
            self.parent.insert(id.clone(), id.clone());
            self.size.insert(id.clone(), 1);
            self.members.insert(id.clone(), BTreeSet::from([id.clone()]));
            return id.clone();
        }
        let root = self.root(id).clone();
        let mut current = id.clone();
        while current != root {
            let next = self.parent.insert(current, root.clone());
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        root
    }

    pub(crate) fn same_cluster(&self, left: &Identifier, right: &Identifier) -> bool {
        self.root(left) == self.root(right)
    }

    pub(crate) fn members_of(&self, id: &Identifier) -> BTreeSet<Identifier> {
        self.members
            .get(self.root(id))
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([id.clone()]))
    }

    pub(crate) fn canonical(&self, id: &Identifier) -> Identifier {
        self.members
            .get(self.root(id))
            .and_then(|m| m.last())
            .cloned()
            .unwrap_or_else(|| id.clone())
    }

    /// Canonical ids of every cluster with more than one member.
    pub(crate) fn canonicals(&self) -> Vec<Identifier> {
        let mut out: Vec<Identifier> = self
            .members
            .values()
            .filter(|m| m.len() > 1)
            .filter_map(|m| m.last().cloned())
            .collect();
        out.sort();
        out
    }

    fn union(&mut self, left: &Identifier, right: &Identifier) {
        let a = self.root_mut(left);
        let b = self.root_mut(right);
        if a == b {
            return;
        }
        let size_a = self.size.get(&a).copied().unwrap_or(1);
        let size_b = self.size.get(&b).copied().unwrap_or(1);
        let (big, small) = if size_a >= size_b { (a, b) } else { (b, a) };

        self.parent.insert(small.clone(), big.clone());
        self.size.remove(&small);
        self.size.insert(big.clone(), size_a + size_b);
        let moved = self
            .members
            .remove(&small)
            .unwrap_or_else(|| BTreeSet::from([small.clone()]));
        self.members
            .entry(big.clone())
            .or_insert_with(|| BTreeSet::from([big.clone()]))
            .extend(moved);
    }

    /// Inserts or replaces an edge, keeping clusters consistent.
    pub(crate) fn upsert(&mut self, edge: Edge) {
        let key = edge.key();
        let positive = edge.judgement == Judgement::Positive;
        let was_positive = self
            .edges
            .get(&key)
            .is_some_and(|e| e.judgement == Judgement::Positive);

        self.adjacency.entry(key.0.clone()).or_default().insert(key.1.clone());
        self.adjacency.entry(key.1.clone()).or_default().insert(key.0.clone());
        self.edges.insert(key.clone(), edge);

        if positive {
            self.union(&key.0, &key.1);
        } else if was_positive {
            self.rebuild(&key.0);
        }
    }

    pub(crate) fn remove(&mut self, left: &Identifier, right: &Identifier) -> Option<Edge> {
        let key = edge_key(left, right);
        let edge = self.edges.remove(&key)?;
        for (a, b) in [(&key.0, &key.1), (&key.1, &key.0)] {
            if let Some(adj) = self.adjacency.get_mut(a) {
                adj.remove(b);
                if adj.is_empty() {
                    self.adjacency.remove(a);
                }
            }
        }
        if edge.judgement == Judgement::Positive {
            self.rebuild(&key.0);
        }
        Some(edge)
    }

    /// Recomputes the clusters of a former component after a positive edge
    /// was removed or reversed.
    fn rebuild(&mut self, id: &Identifier) {
        let members = self.members_of(id);
        let root = self.root(id).clone();
        self.members.remove(&root);
        for member in &members {
            self.parent.remove(member);
            self.size.remove(member);
        }

        let mut positive = Vec::new();
        for member in &members {
            for other in self.adjacency.get(member).into_iter().flatten() {
                if member < other && self.edge(member, other).is_some_and(|e| e.judgement == Judgement::Positive) {
                    positive.push((member.clone(), other.clone()));
                }
            }
        }
        for (a, b) in positive {
            self.union(&a, &b);
        }
    }

    /// The strongest judgement between two clusters.
    ///
    /// Positive when both ids share a cluster; otherwise the highest-ranked
    /// edge between any member of one and any member of the other.
    pub(crate) fn cluster_judgement(&self, left: &Identifier, right: &Identifier) -> Judgement {
        if self.same_cluster(left, right) {
            return Judgement::Positive;
        }
        let left = self.members_of(left);
        let right = self.members_of(right);
        let (small, large) = if left.len() <= right.len() { (&left, &right) } else { (&right, &left) };

        let mut best = Judgement::NoJudgement;
        for member in small {
            for other in self.adjacency.get(member).into_iter().flatten() {
                if !large.contains(other) {
                    continue;
                }
                if let Some(edge) = self.edge(member, other) {
                    if edge.judgement.rank() > best.rank() {
                        best = edge.judgement;
                    }
                }
            }
        }
        best
    }
}
