//! Revision graph and path resolution
//!
//! Revisions are stored in a `Vec` and addressed by index through a token map; predecessor
//! and successor links are index lists. Building the graph validates the whole chain
//! (duplicate tokens, dangling predecessors, cycles, more than one root) so that a malformed
//! history is rejected before anything touches the datastore.
//!
//! State is a set of applied revisions, always closed under "is an ancestor of". The marker
//! only stores the heads of that set; [`RevisionGraph::applied`] expands them back.

use crate::migration::revision::{Direction, Revision};
use crate::migration::target::Target;
use crate::migration::MigrationError;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug)]
pub struct RevisionGraph {
    revisions: Vec<Revision>,
    index: HashMap<String, usize>,
    parents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    /// Topological order, parents first; ties broken by authoring order
    order: Vec<usize>,
}

impl RevisionGraph {
    /// Build and validate a graph from revisions in authoring order
    ///
    /// # Errors
    ///
    /// `DuplicateRevision`, `ChainBroken`, `Cycle` or `MultipleRoots`.
    pub fn build(revisions: Vec<Revision>) -> Result<Self, MigrationError> {
        let mut index = HashMap::with_capacity(revisions.len());
        for (i, revision) in revisions.iter().enumerate() {
            if index.insert(revision.id().to_string(), i).is_some() {
                return Err(MigrationError::DuplicateRevision(revision.id().to_string()));
            }
        }

        let mut parents = vec![Vec::new(); revisions.len()];
        let mut children = vec![Vec::new(); revisions.len()];
        for (i, revision) in revisions.iter().enumerate() {
            for parent in revision.down_revisions() {
                let p = *index.get(parent).ok_or_else(|| MigrationError::ChainBroken {
                    revision: revision.id().to_string(),
                    missing: parent.clone(),
                })?;
                parents[i].push(p);
                children[p].push(i);
            }
        }

        let order = topological_order(&parents, &children);
        if order.len() < revisions.len() {
            let placed: HashSet<usize> = order.iter().copied().collect();
            let mut stuck: Vec<String> = (0..revisions.len())
                .filter(|i| !placed.contains(i))
                .map(|i| revisions[i].id().to_string())
                .collect();
            stuck.sort();
            return Err(MigrationError::Cycle { revisions: stuck });
        }

        let roots: Vec<String> = revisions
            .iter()
            .filter(|r| r.is_root())
            .map(|r| r.id().to_string())
            .collect();
        if roots.len() > 1 {
            return Err(MigrationError::MultipleRoots { roots });
        }

        log::debug!(
            "Loaded revision graph: {} revision(s), {} head(s)",
            revisions.len(),
            children.iter().filter(|c| c.is_empty()).count()
        );

        Ok(Self {
            revisions,
            index,
            parents,
            children,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Exact lookup by token
    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.index.get(id).map(|&i| &self.revisions[i])
    }

    /// Revisions root first, every revision after all of its predecessors
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Revision> + '_ {
        self.order.iter().map(move |&i| &self.revisions[i])
    }

    pub fn root(&self) -> Option<&Revision> {
        self.order.first().map(|&i| &self.revisions[i])
    }

    /// Revisions without a successor, in graph order
    pub fn heads(&self) -> Vec<&Revision> {
        self.order
            .iter()
            .filter(|&&i| self.children[i].is_empty())
            .map(|&i| &self.revisions[i])
            .collect()
    }

    /// The single head
    ///
    /// # Errors
    ///
    /// `AmbiguousHead` when unmerged branches exist.
    pub fn head(&self) -> Result<Option<&Revision>, MigrationError> {
        let heads = self.heads();
        if heads.len() > 1 {
            return Err(MigrationError::AmbiguousHead {
                heads: heads.iter().map(|r| r.id().to_string()).collect(),
            });
        }
        Ok(heads.into_iter().next())
    }

    pub fn successors(&self, id: &str) -> Vec<&Revision> {
        self.index
            .get(id)
            .map(|&i| self.children[i].iter().map(|&c| &self.revisions[c]).collect())
            .unwrap_or_default()
    }

    /// Look a revision up by full token or unique prefix
    ///
    /// # Errors
    ///
    /// `UnknownRevision` or `AmbiguousRevision`.
    pub fn resolve_id(&self, token: &str) -> Result<&Revision, MigrationError> {
        if let Some(revision) = self.get(token) {
            return Ok(revision);
        }

        let mut candidates: Vec<&Revision> = self
            .iter()
            .filter(|r| r.id().starts_with(token))
            .collect();
        match candidates.len() {
            0 => Err(MigrationError::UnknownRevision(token.to_string())),
            1 => Ok(candidates.remove(0)),
            _ => Err(MigrationError::AmbiguousRevision {
                prefix: token.to_string(),
                candidates: candidates.iter().map(|r| r.id().to_string()).collect(),
            }),
        }
    }

    /// Expand marker heads into the full applied set
    ///
    /// # Errors
    ///
    /// `UnknownRevision` if the marker names a token this graph doesn't have.
    pub fn applied(&self, marker: &[String]) -> Result<HashSet<&str>, MigrationError> {
        let mut starts = Vec::with_capacity(marker.len());
        for token in marker {
            let i = self
                .index
                .get(token)
                .ok_or_else(|| MigrationError::UnknownRevision(token.clone()))?;
            starts.push(*i);
        }
        Ok(self.to_ids(&self.closure(starts)))
    }

    /// Marker value for an applied set: its members that have no applied successor
    pub fn heads_of(&self, applied: &HashSet<&str>) -> Vec<String> {
        self.order
            .iter()
            .filter(|&&i| applied.contains(self.revisions[i].id()))
            .filter(|&&i| {
                !self.children[i]
                    .iter()
                    .any(|&c| applied.contains(self.revisions[c].id()))
            })
            .map(|&i| self.revisions[i].id().to_string())
            .collect()
    }

    /// Applied set that `target` describes on its own (without a current state)
    ///
    /// # Errors
    ///
    /// Lookup errors, `AmbiguousHead` for `head`, or `InvalidTarget` for relative targets.
    pub fn target_set(&self, target: &Target) -> Result<HashSet<&str>, MigrationError> {
        match target {
            Target::Base => Ok(HashSet::new()),
            Target::Head => Ok(match self.head()? {
                Some(head) => self.to_ids(&self.closure(vec![self.index[head.id()]])),
                None => HashSet::new(),
            }),
            Target::Revision(token) => {
                let revision = self.resolve_id(token)?;
                Ok(self.to_ids(&self.closure(vec![self.index[revision.id()]])))
            }
            Target::Relative(_) => Err(MigrationError::InvalidTarget(format!(
                "relative target '{target}' needs a current revision"
            ))),
        }
    }

    /// Ordered revisions that take the partition from `current` to `target`
    ///
    /// Upgrades come back parents first and downgrades children first, so each step's
    /// predecessors (or successors) have already been handled when it runs. Every revision
    /// appears at most once.
    ///
    /// # Errors
    ///
    /// `AmbiguousHead` if the chain has unmerged heads, lookup errors for unknown tokens, and
    /// `InvalidTarget` when the target is not reachable in `direction`.
    pub fn resolve_path(
        &self,
        current: &[String],
        target: &Target,
        direction: Direction,
    ) -> Result<Vec<&Revision>, MigrationError> {
        self.head()?;
        let applied = self.applied(current)?;

        if let Target::Relative(steps) = *target {
            return self.relative_path(&applied, steps, direction);
        }

        let wanted = self.target_set(target)?;
        match direction {
            Direction::Upgrade => {
                if let Some(extra) = self.iter().find(|r| {
                    applied.contains(r.id()) && !wanted.contains(r.id())
                }) {
                    return Err(MigrationError::InvalidTarget(format!(
                        "'{target}' is not an upgrade from the current state; revision {} is \
                         applied but is not an ancestor of the target",
                        extra.id()
                    )));
                }
                Ok(self
                    .iter()
                    .filter(|r| wanted.contains(r.id()) && !applied.contains(r.id()))
                    .collect())
            }
            Direction::Downgrade => {
                if let Some(missing) = self.iter().find(|r| {
                    wanted.contains(r.id()) && !applied.contains(r.id())
                }) {
                    return Err(MigrationError::InvalidTarget(format!(
                        "'{target}' is not a downgrade from the current state; revision {} is \
                         not applied",
                        missing.id()
                    )));
                }
                Ok(self
                    .iter()
                    .rev()
                    .filter(|r| applied.contains(r.id()) && !wanted.contains(r.id()))
                    .collect())
            }
        }
    }

    fn relative_path(
        &self,
        applied: &HashSet<&str>,
        steps: i64,
        direction: Direction,
    ) -> Result<Vec<&Revision>, MigrationError> {
        let candidates: Vec<&Revision> = match (direction, steps > 0) {
            (Direction::Upgrade, true) => {
                self.iter().filter(|r| !applied.contains(r.id())).collect()
            }
            (Direction::Downgrade, false) => {
                self.iter().rev().filter(|r| applied.contains(r.id())).collect()
            }
            _ => {
                return Err(MigrationError::InvalidTarget(format!(
                    "relative target {steps:+} does not match direction {}",
                    direction.as_str()
                )))
            }
        };

        let wanted = usize::try_from(steps.unsigned_abs()).unwrap_or(usize::MAX);
        if wanted > candidates.len() {
            return Err(MigrationError::InvalidTarget(format!(
                "cannot {} {} step(s); only {} available",
                direction.as_str(),
                wanted,
                candidates.len()
            )));
        }
        Ok(candidates.into_iter().take(wanted).collect())
    }

    /// All ancestors of `starts`, the starts included
    fn closure(&self, starts: Vec<usize>) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = starts;
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(self.parents[i].iter().copied());
            }
        }
        seen
    }

    fn to_ids(&self, set: &BTreeSet<usize>) -> HashSet<&str> {
        set.iter().map(|&i| self.revisions[i].id()).collect()
    }
}

/// Kahn's algorithm; returns fewer indices than nodes when a cycle exists
fn topological_order(parents: &[Vec<usize>], children: &[Vec<usize>]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..parents.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(parents.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &child in &children[i] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(id: &str, parents: &[&str]) -> Revision {
        parents
            .iter()
            .fold(Revision::new(id, format!("revision {id}")), |r, p| r.revises(*p))
    }

    fn linear() -> RevisionGraph {
        RevisionGraph::build(vec![
            rev("a1", &[]),
            rev("b2", &["a1"]),
            rev("c3", &["b2"]),
            rev("d4", &["c3"]),
        ])
        .unwrap()
    }

    /// a1 -> b2 -> { c3, x9 } -> m5 -> e6
    fn merged() -> RevisionGraph {
        RevisionGraph::build(vec![
            rev("a1", &[]),
            rev("b2", &["a1"]),
            rev("c3", &["b2"]),
            rev("x9", &["b2"]),
            rev("m5", &["c3", "x9"]),
            rev("e6", &["m5"]),
        ])
        .unwrap()
    }

    fn ids(path: &[&Revision]) -> Vec<String> {
        path.iter().map(|r| r.id().to_string()).collect()
    }

    fn marker(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_root_to_head_visits_each_revision_once_in_order() {
        let graph = linear();
        let path = graph.resolve_path(&[], &Target::Head, Direction::Upgrade).unwrap();
        assert_eq!(ids(&path), vec!["a1", "b2", "c3", "d4"]);
    }

    #[test]
    fn test_authoring_order_does_not_matter() {
        let graph = RevisionGraph::build(vec![
            rev("d4", &["c3"]),
            rev("b2", &["a1"]),
            rev("c3", &["b2"]),
            rev("a1", &[]),
        ])
        .unwrap();
        let path = graph.resolve_path(&[], &Target::Head, Direction::Upgrade).unwrap();
        assert_eq!(ids(&path), vec!["a1", "b2", "c3", "d4"]);
    }

    #[test]
    fn test_merge_path_visits_both_branches_before_merge() {
        let graph = merged();
        let path = graph.resolve_path(&[], &Target::Head, Direction::Upgrade).unwrap();
        let order = ids(&path);
        assert_eq!(order.len(), 6);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("c3") < pos("m5"));
        assert!(pos("x9") < pos("m5"));
        assert_eq!(order.last().unwrap(), "e6");
    }

    #[test]
    fn test_missing_predecessor_is_chain_broken() {
        let err = RevisionGraph::build(vec![rev("a1", &[]), rev("b2", &["a0"])]).unwrap_err();
        match err {
            MigrationError::ChainBroken { revision, missing } => {
                assert_eq!(revision, "b2");
                assert_eq!(missing, "a0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_is_detected() {
        let err = RevisionGraph::build(vec![
            rev("a1", &[]),
            rev("b2", &["a1", "c3"]),
            rev("c3", &["b2"]),
        ])
        .unwrap_err();
        match err {
            MigrationError::Cycle { revisions } => assert_eq!(revisions, vec!["b2", "c3"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_and_multiple_roots() {
        let err = RevisionGraph::build(vec![rev("a1", &[]), rev("a1", &[])]).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateRevision(ref id) if id == "a1"));

        let err = RevisionGraph::build(vec![rev("a1", &[]), rev("z1", &[])]).unwrap_err();
        assert!(matches!(err, MigrationError::MultipleRoots { .. }));
        assert!(err.is_graph_integrity());
    }

    #[test]
    fn test_two_heads_is_ambiguous() {
        let graph = RevisionGraph::build(vec![
            rev("a1", &[]),
            rev("b2", &["a1"]),
            rev("c3", &["a1"]),
        ])
        .unwrap();

        assert_eq!(graph.heads().len(), 2);
        let err = graph
            .resolve_path(&[], &Target::Head, Direction::Upgrade)
            .unwrap_err();
        match err {
            MigrationError::AmbiguousHead { heads } => assert_eq!(heads, vec!["b2", "c3"]),
            other => panic!("unexpected error: {other}"),
        }

        // resolution is refused for every target, not only `head`
        assert!(graph
            .resolve_path(&[], &Target::Revision("b2".into()), Direction::Upgrade)
            .is_err());
    }

    #[test]
    fn test_upgrade_from_middle_and_downgrade() {
        let graph = linear();

        let path = graph
            .resolve_path(&marker(&["b2"]), &Target::Head, Direction::Upgrade)
            .unwrap();
        assert_eq!(ids(&path), vec!["c3", "d4"]);

        let path = graph
            .resolve_path(&marker(&["d4"]), &Target::Revision("b2".into()), Direction::Downgrade)
            .unwrap();
        assert_eq!(ids(&path), vec!["d4", "c3"]);

        let path = graph
            .resolve_path(&marker(&["d4"]), &Target::Base, Direction::Downgrade)
            .unwrap();
        assert_eq!(ids(&path), vec!["d4", "c3", "b2", "a1"]);

        let path = graph
            .resolve_path(&marker(&["d4"]), &Target::Head, Direction::Upgrade)
            .unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_direction_preconditions() {
        let graph = linear();
        let err = graph
            .resolve_path(&marker(&["c3"]), &Target::Revision("a1".into()), Direction::Upgrade)
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTarget(_)));

        let err = graph
            .resolve_path(&marker(&["b2"]), &Target::Revision("d4".into()), Direction::Downgrade)
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTarget(_)));

        let err = graph
            .resolve_path(&marker(&["zz"]), &Target::Head, Direction::Upgrade)
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnknownRevision(_)));
    }

    #[test]
    fn test_relative_targets() {
        let graph = linear();
        let path = graph
            .resolve_path(&marker(&["a1"]), &Target::Relative(2), Direction::Upgrade)
            .unwrap();
        assert_eq!(ids(&path), vec!["b2", "c3"]);

        let path = graph
            .resolve_path(&marker(&["d4"]), &Target::Relative(-1), Direction::Downgrade)
            .unwrap();
        assert_eq!(ids(&path), vec!["d4"]);

        let err = graph
            .resolve_path(&marker(&["c3"]), &Target::Relative(5), Direction::Upgrade)
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTarget(_)));

        let err = graph
            .resolve_path(&marker(&["c3"]), &Target::Relative(1), Direction::Downgrade)
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTarget(_)));
    }

    #[test]
    fn test_prefix_lookup() {
        let graph = RevisionGraph::build(vec![
            rev("ab12", &[]),
            rev("ab34", &["ab12"]),
            rev("cd56", &["ab34"]),
        ])
        .unwrap();
        assert_eq!(graph.resolve_id("cd").unwrap().id(), "cd56");
        assert_eq!(graph.resolve_id("ab12").unwrap().id(), "ab12");
        assert!(matches!(
            graph.resolve_id("ab"),
            Err(MigrationError::AmbiguousRevision { .. })
        ));
        assert!(matches!(
            graph.resolve_id("ef"),
            Err(MigrationError::UnknownRevision(_))
        ));
    }

    #[test]
    fn test_partially_applied_merge_marker() {
        let graph = merged();
        // one branch of the merge applied
        let current = marker(&["c3"]);
        let path = graph
            .resolve_path(&current, &Target::Head, Direction::Upgrade)
            .unwrap();
        assert_eq!(ids(&path), vec!["x9", "m5", "e6"]);

        let mut applied = graph.applied(&current).unwrap();
        applied.insert("x9");
        assert_eq!(graph.heads_of(&applied), vec!["c3", "x9"]);
        applied.insert("m5");
        assert_eq!(graph.heads_of(&applied), vec!["m5"]);

        // downgrading below the merge restores a two-token marker
        let path = graph
            .resolve_path(&marker(&["e6"]), &Target::Revision("b2".into()), Direction::Downgrade)
            .unwrap();
        assert_eq!(ids(&path)[..2], ["e6".to_string(), "m5".to_string()]);
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_empty_graph() {
        let graph = RevisionGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.head().unwrap().is_none());
        assert!(graph
            .resolve_path(&[], &Target::Head, Direction::Upgrade)
            .unwrap()
            .is_empty());
    }
}
