//! Fixed-width feature vectors for the neural evaluator.
//!
//! Features are partitioned per unit: numeric stats normalized by known
//! maxima, a multi-hot over the move vocabulary gated on remaining PP, a
//! one-hot over the compact status enumeration, and type bits. The active
//! unit additionally carries boost multipliers, volatile flags and the
//! observed confusion duration. Reserve-unit vectors depend only on the
//! (status, PP) subspace mid-battle, which is what makes the sub-embedding
//! cache possible.

use crate::games::duel::{
    boosted, status, Side, Unit, MAX_HP, MAX_STAT, MOVE_SLOTS, N_MOVES, N_TYPES,
};

pub const STATS_DIM: usize = 5;
pub const MOVES_DIM: usize = N_MOVES - 1;
pub const STATUS_DIM: usize = 14;
pub const TYPES_DIM: usize = N_TYPES;

/// Reserve-unit feature width.
pub const UNIT_DIM: usize = STATS_DIM + MOVES_DIM + STATUS_DIM + TYPES_DIM;

pub const BOOSTS_DIM: usize = 4;
pub const VOLATILES_DIM: usize = 3;
pub const DURATION_DIM: usize = 5;

/// Active-unit feature width: the reserve features plus battle-scoped
/// state.
pub const ACTIVE_DIM: usize = UNIT_DIM + BOOSTS_DIM + VOLATILES_DIM + DURATION_DIM;

/// Number of points in the cacheable (status, PP) subspace per unit:
/// 15 status states (including "ok") times 16 has-PP combinations.
pub const N_STATUS_STATES: usize = STATUS_DIM + 1;
pub const N_PP_STATES: usize = 1 << MOVE_SLOTS;

/// Compact status index in `0..STATUS_DIM`, or `None` for a healthy unit.
///
/// Sleep uses the *observed* turns-asleep counter, which is public, rather
/// than the hidden countdown; rest countdowns are public and use the
/// remaining turns directly.
pub fn status_index(s: u8, slept: u8) -> Option<usize> {
    if s == status::NONE {
        return None;
    }
    if status::is_rest(s) {
        let left = status::sleep_left(s).clamp(1, 3) as usize;
        return Some(10 + left);
    }
    if status::is_sleep(s) {
        return Some(4 + slept.min(6) as usize);
    }
    if s & status::POISON != 0 {
        Some(0)
    } else if s & status::BURN != 0 {
        Some(1)
    } else if s & status::FREEZE != 0 {
        Some(2)
    } else {
        debug_assert!(s & status::PARALYSIS != 0);
        Some(3)
    }
}

/// A synthetic (status byte, slept counter) hitting exactly the given
/// status index; inverse of [`status_index`] over the cache subspace.
pub fn synth_status(index: usize) -> (u8, u8) {
    debug_assert!(index < STATUS_DIM);
    match index {
        0 => (status::POISON, 0),
        1 => (status::BURN, 0),
        2 => (status::FREEZE, 0),
        3 => (status::PARALYSIS, 0),
        4..=10 => (status::with_sleep_left(status::NONE, 1), (index - 4) as u8),
        _ => (
            status::with_sleep_left(status::REST, (index - 10) as u8),
            0,
        ),
    }
}

/// Packed cache key: has-PP bits in the low nibble, status index plus one
/// in the high nibble (zero when healthy). Invertible on the
/// (status, PP) subspace.
pub fn unit_key(unit: &Unit) -> u8 {
    let mut key = 0u8;
    for slot in 0..MOVE_SLOTS {
        if unit.has_pp(slot) {
            key |= 1 << slot;
        }
    }
    if let Some(index) = status_index(unit.status, unit.slept) {
        key |= ((index as u8) + 1) << 4;
    }
    key
}

fn write_stats(out: &mut [f32], hp: u16, atk: u16, def: u16, spe: u16, spc: u16) {
    out[0] = hp as f32 / MAX_HP as f32;
    out[1] = atk as f32 / MAX_STAT as f32;
    out[2] = def as f32 / MAX_STAT as f32;
    out[3] = spe as f32 / MAX_STAT as f32;
    out[4] = spc as f32 / MAX_STAT as f32;
}

fn write_moves(out: &mut [f32], unit: &Unit) {
    for slot in 0..MOVE_SLOTS {
        if unit.has_pp(slot) {
            out[unit.moves[slot] as usize - 1] = 1.0;
        }
    }
}

fn write_status(out: &mut [f32], unit: &Unit) {
    if let Some(index) = status_index(unit.status, unit.slept) {
        out[index] = 1.0;
    }
}

fn write_types(out: &mut [f32], unit: &Unit) {
    out[unit.types[0] as usize] = 1.0;
    out[unit.types[1] as usize] = 1.0;
}

/// Reserve-unit features: stats, moves, status, types.
pub fn encode_unit(unit: &Unit, out: &mut [f32; UNIT_DIM]) {
    out.fill(0.0);
    let (stats, rest) = out.split_at_mut(STATS_DIM);
    let (moves, rest) = rest.split_at_mut(MOVES_DIM);
    let (status, types) = rest.split_at_mut(STATUS_DIM);
    write_stats(
        stats,
        unit.hp,
        unit.stats.atk,
        unit.stats.def,
        unit.stats.spe,
        unit.stats.spc,
    );
    write_moves(moves, unit);
    write_status(status, unit);
    write_types(types, unit);
}

/// Active-unit features: the reserve features under the current boosts,
/// plus boost multipliers, volatile flags and the observed confusion
/// duration.
pub fn encode_active(side: &Side, out: &mut [f32; ACTIVE_DIM]) {
    out.fill(0.0);
    let unit = side.active_unit();
    let state = &side.active_state;

    let (stats, rest) = out.split_at_mut(STATS_DIM);
    let (moves, rest) = rest.split_at_mut(MOVES_DIM);
    let (status, rest) = rest.split_at_mut(STATUS_DIM);
    let (types, rest) = rest.split_at_mut(TYPES_DIM);
    let (boosts, rest) = rest.split_at_mut(BOOSTS_DIM);
    let (volatiles, duration) = rest.split_at_mut(VOLATILES_DIM);

    write_stats(
        stats,
        unit.hp,
        boosted(unit.stats.atk, state.boosts[0]),
        boosted(unit.stats.def, state.boosts[1]),
        boosted(unit.stats.spe, state.boosts[2]),
        boosted(unit.stats.spc, state.boosts[3]),
    );
    write_moves(moves, unit);
    write_status(status, unit);
    write_types(types, unit);

    for (i, &stage) in state.boosts.iter().enumerate() {
        boosts[i] = boost_multiplier(stage) / 4.0;
    }
    volatiles[0] = state.confused as u8 as f32;
    volatiles[1] = state.reflect as u8 as f32;
    volatiles[2] = state.light_screen as u8 as f32;
    if state.confused {
        duration[state.conf_seen.min(DURATION_DIM as u8 - 1) as usize] = 1.0;
    }
}

#[inline]
fn boost_multiplier(stage: i8) -> f32 {
    boosted(100, stage) as f32 / 100.0
}
