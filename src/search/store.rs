//! Where bandit statistics live between iterations: either a tree of nodes
//! keyed by joint action and chance outcome, or a transposition table keyed
//! by a Zobrist hash of the full state. Both sit behind [`Store`], chosen
//! once when the worker is built.

use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::bandit::{BanditParams, JointBandit};
use crate::game::{Game, StateHasher};

/// Descent depth guard for the transposition table, which can contain
/// cycles. Exceeding it caps the engine turn counter and scores the
/// iteration as a tie.
pub const MAX_DEPTH: usize = 100;

/// A joint information set and its lazily created children.
#[derive(Clone, Debug)]
pub struct Node<O> {
    pub stats: JointBandit,
    pub children: FxHashMap<(u8, u8, O), Node<O>>,
}

impl<O: Eq + Hash> Node<O> {
    pub fn new(params: &BanditParams) -> Self {
        Self {
            stats: JointBandit::new(params),
            children: FxHashMap::default(),
        }
    }

    /// Number of nodes in this subtree, including self.
    pub fn count(&self) -> usize {
        1 + self.children.values().map(Node::count).sum::<usize>()
    }
}

/// Bandit records shared between all states with equal hash. Collisions are
/// not detected; colliding states merge their statistics.
#[derive(Clone)]
pub struct Table<G: Game> {
    pub entries: FxHashMap<u64, JointBandit>,
    pub hasher: G::Hasher,
    pub writes: usize,
    pub hits: usize,
}

impl<G: Game> Table<G> {
    pub fn new(seed: u64) -> Self {
        Self {
            entries: FxHashMap::default(),
            hasher: G::Hasher::seeded(seed),
            writes: 0,
            hits: 0,
        }
    }

    #[inline]
    pub fn hash(&self, state: &G) -> u64 {
        self.hasher.full(state)
    }

    /// Entry for `hash`, created uninitialized on first sight.
    pub fn fetch(&mut self, hash: u64, params: &BanditParams) -> &mut JointBandit {
        if self.entries.contains_key(&hash) {
            self.hits += 1;
        } else {
            self.writes += 1;
        }
        self.entries
            .entry(hash)
            .or_insert_with(|| JointBandit::new(params))
    }
}

pub enum Store<G: Game> {
    Tree(Node<G::Obs>),
    Table(Table<G>),
}

impl<G: Game> Store<G> {
    pub fn new(params: &BanditParams, use_table: bool, seed: u64) -> Self {
        if use_table {
            Store::Table(Table::new(seed))
        } else {
            Store::Tree(Node::new(params))
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Store::Table(_))
    }

    /// Fresh store for a new episode. The table's hash tables are reseeded
    /// here and nowhere else.
    pub fn start_episode(&mut self, params: &BanditParams, seed: u64) {
        match self {
            Store::Tree(root) => *root = Node::new(params),
            Store::Table(table) => *table = Table::new(seed),
        }
    }

    /// Move the root past a realized joint action. Returns true when
    /// accumulated statistics survive into the next search: in tree mode
    /// the matching child (if any) is adopted as the new root, in table
    /// mode entries are keyed by state and survive by construction.
    pub fn advance_root(
        &mut self,
        params: &BanditParams,
        keep: bool,
        i: u8,
        j: u8,
        obs: &G::Obs,
    ) -> bool {
        match self {
            Store::Tree(root) => {
                if keep {
                    if let Some(child) = root.children.remove(&(i, j, obs.clone())) {
                        *root = child;
                        return true;
                    }
                }
                *root = Node::new(params);
                false
            }
            Store::Table(_) => keep,
        }
    }

    /// Nodes (tree) or entries (table) currently held.
    pub fn len(&self) -> usize {
        match self {
            Store::Tree(root) => root.count(),
            Store::Table(table) => table.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::JointPick;
    use crate::games::pennies::Pennies;

    fn params() -> BanditParams {
        BanditParams::Ucb { c: 1.0 }
    }

    #[test]
    fn tree_adoption_keeps_statistics() {
        let mut store: Store<Pennies> = Store::new(&params(), false, 0);
        let Store::Tree(root) = &mut store else {
            panic!()
        };
        root.stats.init(2, 2);
        let mut child = Node::new(&params());
        child.stats.init(2, 2);
        child.stats.update(
            JointPick {
                p1: crate::bandit::Pick { index: 1, prob: 1.0 },
                p2: crate::bandit::Pick { index: 0, prob: 1.0 },
            },
            1.0,
            0.0,
        );
        root.children.insert((0, 1, Default::default()), child);

        assert!(store.advance_root(&params(), true, 0, 1, &Default::default()));
        let Store::Tree(root) = &store else { panic!() };
        assert!(root.stats.is_init());
    }

    #[test]
    fn tree_discards_on_mismatch() {
        let mut store: Store<Pennies> = Store::new(&params(), false, 0);
        let Store::Tree(root) = &mut store else {
            panic!()
        };
        root.stats.init(2, 2);
        root.children
            .insert((0, 1, Default::default()), Node::new(&params()));

        assert!(!store.advance_root(&params(), true, 1, 1, &Default::default()));
        let Store::Tree(root) = &store else { panic!() };
        assert!(!root.stats.is_init());
        assert!(root.children.is_empty());
    }

    #[test]
    fn table_reuses_colliding_entries() {
        let mut table: Table<Pennies> = Table::new(7);
        table.fetch(42, &params()).init(3, 3);
        assert_eq!(table.writes, 1);
        assert!(table.fetch(42, &params()).is_init());
        assert_eq!(table.writes, 1);
        assert_eq!(table.hits, 1);
    }
}
