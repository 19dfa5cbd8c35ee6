//! Pre-computed sub-embeddings for reserve units.
//!
//! Mid-battle, a reserve unit's feature vector moves only inside the
//! (status, has-PP) subspace, so every point of that subspace is embedded
//! once at episode start. Lookup during search is a single indexed read by
//! the packed [`unit_key`].

use super::nn::{EmbeddingNet, UNIT_EMBED};
use crate::encode::{encode_unit, synth_status, unit_key, N_PP_STATES, N_STATUS_STATES, UNIT_DIM};
use crate::games::duel::{status, Duel, Unit, MOVE_SLOTS, TEAM_SIZE};

/// Keys are a full byte: low nibble PP bits, high nibble status index + 1.
const KEY_SPACE: usize = 256;

pub struct EmbedCache {
    data: Vec<f32>,
}

impl EmbedCache {
    #[inline]
    fn offset(side: usize, slot: usize, key: u8) -> usize {
        ((side * TEAM_SIZE + slot) * KEY_SPACE + key as usize) * UNIT_EMBED
    }

    /// Embed every subspace point of every unit on both teams.
    pub fn fill(net: &mut EmbeddingNet, duel: &Duel) -> Self {
        let mut data = vec![0.0; 2 * TEAM_SIZE * KEY_SPACE * UNIT_EMBED];
        let mut input = [0f32; UNIT_DIM];
        for side in 0..2 {
            for slot in 0..duel.sides[side].count as usize {
                let unit = &duel.sides[side].units[slot];
                for status_key in 0..N_STATUS_STATES {
                    for pp_bits in 0..N_PP_STATES as u8 {
                        let probe = probe_unit(unit, status_key, pp_bits);
                        let key = (pp_bits_of(&probe)) | ((status_key as u8) << 4);
                        encode_unit(&probe, &mut input);
                        let at = Self::offset(side, slot, key);
                        net.propagate(&input, &mut data[at..at + UNIT_EMBED]);
                    }
                }
            }
        }
        Self { data }
    }

    #[inline]
    pub fn get(&self, side: usize, slot: usize, key: u8) -> &[f32] {
        let at = Self::offset(side, slot, key);
        &self.data[at..at + UNIT_EMBED]
    }
}

/// A copy of `unit` moved to the given subspace point.
fn probe_unit(unit: &Unit, status_key: usize, pp_bits: u8) -> Unit {
    let mut probe = unit.clone();
    for slot in 0..MOVE_SLOTS {
        probe.pp[slot] = if pp_bits & (1 << slot) != 0 { 1 } else { 0 };
    }
    if status_key == 0 {
        probe.status = status::NONE;
        probe.slept = 0;
    } else {
        let (s, slept) = synth_status(status_key - 1);
        probe.status = s;
        probe.slept = slept;
    }
    probe
}

/// Realizable PP bits: a slot with no move can never have PP.
fn pp_bits_of(unit: &Unit) -> u8 {
    let mut bits = 0u8;
    for slot in 0..MOVE_SLOTS {
        if unit.has_pp(slot) {
            bits |= 1 << slot;
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::duel::UnitDef;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn sample() -> Duel {
        let team = [
            UnitDef { species: 2, moves: [1, 4, 6, 12] },
            UnitDef { species: 7, moves: [2, 4, 14, 12] },
        ];
        Duel::new(&team, &team, 31)
    }

    #[test]
    fn cache_agrees_with_direct_encoding() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut net = EmbeddingNet::new(UNIT_DIM, 16, UNIT_EMBED);
        net.init_random(&mut rng);
        let duel = sample();
        let cache = EmbedCache::fill(&mut net, &duel);

        for side in 0..2 {
            for slot in 0..duel.sides[side].count as usize {
                for status_key in 0..N_STATUS_STATES {
                    for pp_bits in 0..N_PP_STATES as u8 {
                        let probe = probe_unit(&duel.sides[side].units[slot], status_key, pp_bits);
                        let mut input = [0f32; UNIT_DIM];
                        encode_unit(&probe, &mut input);
                        let mut direct = [0f32; UNIT_EMBED];
                        net.propagate(&input, &mut direct);
                        let cached = cache.get(side, slot, unit_key(&probe));
                        assert_eq!(cached, &direct[..], "side {side} slot {slot}");
                    }
                }
            }
        }
    }

    #[test]
    fn keys_cover_the_subspace_without_collision() {
        let duel = sample();
        let unit = &duel.sides[0].units[0];
        let mut seen = std::collections::HashSet::new();
        for status_key in 0..N_STATUS_STATES {
            for pp_bits in 0..N_PP_STATES as u8 {
                let probe = probe_unit(unit, status_key, pp_bits);
                assert!(seen.insert(unit_key(&probe)));
            }
        }
        assert_eq!(seen.len(), N_STATUS_STATES * N_PP_STATES);
    }
}
