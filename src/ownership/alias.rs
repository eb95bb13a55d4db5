use indexmap::{IndexMap, IndexSet};

use super::types::BorrowKind;

/// Points-to map from reference names to the variable they borrow.
#[derive(Debug, Clone, Default)]
pub struct AliasAnalysis {
    points_to: IndexMap<String, (String, BorrowKind)>,
}

impl AliasAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow_ref(&mut self, reference: &str, target: &str, kind: BorrowKind) {
        self.points_to
            .insert(reference.to_string(), (target.to_string(), kind));
    }

    /// `dst = src`: `dst` now points wherever `src` does. Unknown sources
    /// leave `dst` untouched.
    pub fn assign(&mut self, dst: &str, src: &str) {
        if let Some(entry) = self.points_to.get(src).cloned() {
            self.points_to.insert(dst.to_string(), entry);
        }
    }

    pub fn target_of(&self, reference: &str) -> Option<&str> {
        self.points_to
            .get(reference)
            .map(|(target, _)| target.as_str())
    }

    pub fn kind_of(&self, reference: &str) -> Option<BorrowKind> {
        self.points_to.get(reference).map(|(_, kind)| *kind)
    }

    pub fn may_alias(&self, a: &str, b: &str) -> bool {
        match (self.target_of(a), self.target_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Pairs of references to the same target where at least one is mutable.
    pub fn mutable_alias_conflicts(&self) -> Vec<(String, String)> {
        let refs: Vec<_> = self.points_to.iter().collect();
        let mut conflicts = Vec::new();
        for (idx, (a, (target_a, kind_a))) in refs.iter().enumerate() {
            for (b, (target_b, kind_b)) in &refs[idx + 1..] {
                if target_a == target_b && (kind_a.is_mutable() || kind_b.is_mutable()) {
                    conflicts.push((a.to_string(), b.to_string()));
                }
            }
        }
        conflicts
    }
}

/// Named lifetime variables with "`longer` outlives `shorter`" constraints.
#[derive(Debug, Clone, Default)]
pub struct LifetimeInference {
    vars: IndexSet<String>,
    constraints: Vec<(String, String)>,
}

impl LifetimeInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_lifetime(&mut self, name: &str) {
        self.vars.insert(name.to_string());
    }

    pub fn add_constraint(&mut self, longer: &str, shorter: &str) {
        self.vars.insert(longer.to_string());
        self.vars.insert(shorter.to_string());
        self.constraints
            .push((longer.to_string(), shorter.to_string()));
    }

    /// Adjacency list: each lifetime mapped to the lifetimes it directly
    /// outlives.
    pub fn solve(&self) -> IndexMap<String, Vec<String>> {
        let mut graph: IndexMap<String, Vec<String>> = self
            .vars
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for (longer, shorter) in &self.constraints {
            graph
                .entry(longer.clone())
                .or_default()
                .push(shorter.clone());
        }
        graph
    }

    /// Whether `longer` outlives `shorter` directly or transitively. Every
    /// lifetime outlives itself.
    pub fn outlives(&self, longer: &str, shorter: &str) -> bool {
        if longer == shorter {
            return true;
        }
        let graph = self.solve();
        let mut seen = IndexSet::new();
        let mut pending = vec![longer];
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            for next in graph.get(current).into_iter().flatten() {
                if next == shorter {
                    return true;
                }
                pending.push(next);
            }
        }
        false
    }
}
