use rand::rngs::SmallRng;

use super::Evaluator;
use crate::game::Game;
use crate::games::duel::{status, Duel, MoveEffect, Side, Unit, MOVES, MOVE_SLOTS};

// material and condition weights
const UNIT_ALIVE: f32 = 30.0;
const UNIT_HP: f32 = 100.0;
const FROZEN: f32 = -40.0;
const ASLEEP: f32 = -25.0;
const PARALYZED: f32 = -25.0;
const POISONED: f32 = -10.0;
const BURNED: f32 = -25.0;
const CONFUSED: f32 = -20.0;
const REFLECT: f32 = 20.0;
const LIGHT_SCREEN: f32 = 20.0;

/// Boost stages weighted so the first stage matters most.
const BOOST_VALUE: [f32; 13] = [
    -3.3, -3.15, -3.0, -2.5, -2.0, -1.0, 0.0, 1.0, 2.0, 2.5, 3.0, 3.15, 3.3,
];

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn burn_weight(unit: &Unit) -> f32 {
    // burn hurts in proportion to the physical attacks the unit carries
    let mut physical = 0.0;
    for slot in 0..MOVE_SLOTS {
        if let MoveEffect::Damage { special: false, .. } = MOVES[unit.moves[slot] as usize].effect {
            physical += 1.0;
        }
    }
    if unit.stats.spc > unit.stats.atk {
        physical *= 0.5;
    }
    physical * BURNED
}

fn status_score(unit: &Unit) -> f32 {
    let s = unit.status;
    if status::is_sleep(s) {
        ASLEEP
    } else if s & status::FREEZE != 0 {
        FROZEN
    } else if s & status::PARALYSIS != 0 {
        PARALYZED
    } else if s & status::POISON != 0 {
        POISONED
    } else if s & status::BURN != 0 {
        burn_weight(unit)
    } else {
        0.0
    }
}

fn unit_score(unit: &Unit) -> f32 {
    if !unit.alive() {
        return 0.0;
    }
    let mut score = UNIT_HP * unit.hp as f32 / unit.stats.hp.max(1) as f32;
    score += status_score(unit);
    score.max(0.0) + UNIT_ALIVE
}

fn side_score(side: &Side) -> f32 {
    let mut score = 0.0;
    for slot in 0..side.count as usize {
        score += unit_score(&side.units[slot]);
    }
    let state = &side.active_state;
    if side.active_unit().alive() {
        if state.confused {
            score += CONFUSED;
        }
        if state.reflect {
            score += REFLECT;
        }
        if state.light_screen {
            score += LIGHT_SCREEN;
        }
        for &stage in &state.boosts {
            score += BOOST_VALUE[(stage + 6) as usize];
        }
    }
    score
}

fn battle_score(duel: &Duel) -> f32 {
    side_score(&duel.sides[0]) - side_score(&duel.sides[1])
}

/// Positional heuristic: each side's material, health, statuses, boosts
/// and screens fold into a scalar, and the leaf value is a sigmoid of the
/// drift from the root score, so "holding the advantage gained" reads as
/// winning.
#[derive(Clone, Debug, Default)]
pub struct Heuristic {
    root_score: f32,
}

impl Evaluator<Duel> for Heuristic {
    fn prepare_root(&mut self, root: &Duel) {
        self.root_score = battle_score(root);
    }

    fn leaf(&mut self, state: &Duel, _rng: &mut SmallRng) -> f32 {
        if let Some((v1, _)) = state.status().scores() {
            return v1;
        }
        sigmoid((battle_score(state) - self.root_score) / 100.0)
    }
}
