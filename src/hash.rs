//! Zobrist-style full-state hashing for the duel, used to key the
//! transposition table.
//!
//! One random table per feature, XOR-combined: per-slot PP buckets, status
//! index, HP bucket and stat ratios, plus the per-side battlefield state
//! (species and types of the active unit, boost stages, volatile flags,
//! observed confusion, active slot, pending replacement). Turn counter,
//! RNG and the last chance record are deliberately excluded so a no-op
//! advance hashes identically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::encode::status_index;
use crate::game::StateHasher;
use crate::games::duel::{
    Duel, Side, Unit, MOVE_SLOTS, N_SPECIES, N_TYPES, SPECIES, TEAM_SIZE,
};

const PP_BUCKETS: usize = 4;
const PP_KEYS: usize = PP_BUCKETS * PP_BUCKETS * PP_BUCKETS * PP_BUCKETS;
const STATUS_KEYS: usize = 15;
const HP_BUCKETS: usize = 14;
const RATIO_BUCKETS: usize = 13;
const N_STATS: usize = 4;

/// Per-(side, slot) table region: PP key, status key, HP bucket, and a
/// ratio bucket for each of the four battle stats.
const SLOT_REGION: usize = PP_KEYS + STATUS_KEYS + HP_BUCKETS + N_STATS * RATIO_BUCKETS;

const SPECIES_KEYS: usize = N_SPECIES + 1;
const TYPE_KEYS: usize = N_TYPES * N_TYPES;
const BOOST_KEYS: usize = 4 * RATIO_BUCKETS;
const CONFUSION_KEYS: usize = 6;
const FLAG_KEYS: usize = 2 + 2; // reflect, light screen
const SIDE_REGION: usize =
    SPECIES_KEYS + TYPE_KEYS + BOOST_KEYS + CONFUSION_KEYS + FLAG_KEYS + TEAM_SIZE + 2;

const TABLE_LEN: usize = 2 * TEAM_SIZE * SLOT_REGION + 2 * SIDE_REGION;

/// Bucketed ratio of a current stat against its species base, capturing
/// both direction and rough magnitude of any divergence.
fn ratio_bucket(base: u16, current: u16) -> usize {
    if base == current || base == 0 {
        return 6;
    }
    let (low, high, raised) = if current > base {
        (base, current, true)
    } else {
        (current, base, false)
    };
    let halves = (2 * (high - low) as usize / base.max(1) as usize).min(6);
    if raised {
        6 + halves
    } else {
        6 - halves
    }
}

fn hp_bucket(unit: &Unit) -> usize {
    if unit.hp == 0 {
        HP_BUCKETS - 1
    } else {
        (unit.hp as usize * 12 / unit.stats.hp.max(1) as usize).min(12)
    }
}

fn pp_key(unit: &Unit) -> usize {
    let mut key = 0usize;
    for slot in 0..MOVE_SLOTS {
        key = key * PP_BUCKETS + unit.pp[slot].min(3) as usize;
    }
    key
}

#[derive(Clone)]
pub struct DuelHasher {
    table: Vec<u64>,
}

impl DuelHasher {
    fn slot_base(side: usize, slot: usize) -> usize {
        (side * TEAM_SIZE + slot) * SLOT_REGION
    }

    fn side_base(side: usize) -> usize {
        2 * TEAM_SIZE * SLOT_REGION + side * SIDE_REGION
    }

    fn hash_slot(&self, side: usize, slot: usize, unit: &Unit) -> u64 {
        let base = Self::slot_base(side, slot);
        let mut at = base;
        let mut hash = self.table[at + pp_key(unit)];
        at += PP_KEYS;
        let status_key = status_index(unit.status, unit.slept).map_or(0, |i| i + 1);
        hash ^= self.table[at + status_key];
        at += STATUS_KEYS;
        hash ^= self.table[at + hp_bucket(unit)];
        at += HP_BUCKETS;

        let species = &SPECIES[unit.species as usize];
        for (stat_base, current) in [
            (species.atk, unit.stats.atk),
            (species.def, unit.stats.def),
            (species.spe, unit.stats.spe),
            (species.spc, unit.stats.spc),
        ] {
            hash ^= self.table[at + ratio_bucket(stat_base, current)];
            at += RATIO_BUCKETS;
        }
        hash
    }

    fn hash_side(&self, side_index: usize, side: &Side) -> u64 {
        let base = Self::side_base(side_index);
        let mut at = base;
        let unit = side.active_unit();
        let state = &side.active_state;

        let mut hash = self.table[at + unit.species as usize];
        at += SPECIES_KEYS;
        hash ^= self.table[at + unit.types[0] as usize * N_TYPES + unit.types[1] as usize];
        at += TYPE_KEYS;
        for &stage in &state.boosts {
            hash ^= self.table[at + (stage + 6) as usize];
            at += RATIO_BUCKETS;
        }
        let confusion_key = if state.confused {
            1 + state.conf_seen.min(4) as usize
        } else {
            0
        };
        hash ^= self.table[at + confusion_key];
        at += CONFUSION_KEYS;
        hash ^= self.table[at + state.reflect as usize];
        at += 2;
        hash ^= self.table[at + state.light_screen as usize];
        at += 2;
        hash ^= self.table[at + side.active as usize];
        at += TEAM_SIZE;
        hash ^= self.table[at + side.must_switch as usize];
        hash
    }
}

impl StateHasher<Duel> for DuelHasher {
    fn seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let table = (0..TABLE_LEN).map(|_| rng.gen::<u64>()).collect();
        Self { table }
    }

    fn full(&self, state: &Duel) -> u64 {
        let mut hash = 0u64;
        for (side_index, side) in state.sides.iter().enumerate() {
            for slot in 0..side.count as usize {
                hash ^= self.hash_slot(side_index, slot, &side.units[slot]);
            }
            hash ^= self.hash_side(side_index, side);
        }
        hash
    }
}
