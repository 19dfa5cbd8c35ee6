//! A compact Gen-1-flavoured duel engine.
//!
//! Two teams of up to six units trade simultaneous moves: damage with
//! clampable 217..255 rolls, major statuses (sleep with a hidden countdown,
//! paralysis, poison, burn, freeze), confusion with a hidden duration,
//! stat boosts, screens, and forced replacements after a faint. The state
//! serializes to a fixed 384-byte record with an embedded RNG, and every
//! advance produces a 16-byte chance outcome describing the stochastic
//! branch taken.
//!
//! The constants here are this game's own; it is a stand-in with the same
//! shapes as the real thing, not a faithful simulator.

use crate::game::{ActionSet, Game, GameStatus, Player, RollPair};

pub const TEAM_SIZE: usize = 6;
pub const MOVE_SLOTS: usize = 4;
pub const N_SPECIES: usize = 8;
pub const N_MOVES: usize = 17;
pub const N_TYPES: usize = 8;
pub const MAX_STAT: u16 = 400;
pub const MAX_HP: u16 = 400;
pub const TURN_LIMIT: u16 = 1000;

pub const STATE_BYTES: usize = 384;

const LOWEST_ROLL: u8 = 217;
const N_FREE_ROLLS: u64 = 39;

/// Total sleep lasts 1..=MAX_SLEEP turns, uniformly.
pub const MAX_SLEEP: u8 = 7;
/// Total confusion lasts 2..=MAX_CONFUSION action attempts, uniformly.
pub const MAX_CONFUSION: u8 = 5;

// ---------------------------------------------------------------------------
// action tokens

pub const TOKEN_PASS: u8 = 0;

#[inline]
pub fn move_token(slot: usize) -> u8 {
    0x10 | slot as u8
}

#[inline]
pub fn switch_token(unit: usize) -> u8 {
    0x20 | unit as u8
}

#[inline]
pub fn token_kind(token: u8) -> u8 {
    token >> 4
}

#[inline]
pub fn token_arg(token: u8) -> usize {
    (token & 0x0f) as usize
}

// ---------------------------------------------------------------------------
// status byte

pub mod status {
    pub const NONE: u8 = 0;
    pub const SLEEP_MASK: u8 = 0b0000_0111;
    pub const POISON: u8 = 1 << 3;
    pub const BURN: u8 = 1 << 4;
    pub const FREEZE: u8 = 1 << 5;
    pub const PARALYSIS: u8 = 1 << 6;
    /// Self-inflicted sleep; the countdown is public.
    pub const REST: u8 = 1 << 7;

    #[inline]
    pub fn is_sleep(s: u8) -> bool {
        s & SLEEP_MASK != 0
    }

    #[inline]
    pub fn is_rest(s: u8) -> bool {
        s & REST != 0
    }

    #[inline]
    pub fn sleep_left(s: u8) -> u8 {
        s & SLEEP_MASK
    }

    #[inline]
    pub fn with_sleep_left(s: u8, left: u8) -> u8 {
        (s & !SLEEP_MASK) | (left & SLEEP_MASK)
    }
}

// ---------------------------------------------------------------------------
// species and move tables

#[derive(Clone, Copy, Debug)]
pub struct SpeciesData {
    pub name: &'static str,
    pub hp: u16,
    pub atk: u16,
    pub def: u16,
    pub spe: u16,
    pub spc: u16,
    pub types: [u8; 2],
}

/// Index 0 is a blank; species ids run 1..=N_SPECIES.
#[rustfmt::skip]
pub const SPECIES: [SpeciesData; N_SPECIES + 1] = [
    SpeciesData { name: "none",    hp: 0,   atk: 0,   def: 0,   spe: 0,   spc: 0,   types: [0, 0] },
    SpeciesData { name: "ridge",   hp: 340, atk: 180, def: 220, spe: 120, spc: 160, types: [6, 0] },
    SpeciesData { name: "ember",   hp: 280, atk: 200, def: 140, spe: 220, spc: 240, types: [1, 1] },
    SpeciesData { name: "torrent", hp: 300, atk: 160, def: 180, spe: 160, spc: 200, types: [2, 2] },
    SpeciesData { name: "sprout",  hp: 290, atk: 140, def: 160, spe: 140, spc: 220, types: [3, 3] },
    SpeciesData { name: "volt",    hp: 260, atk: 150, def: 120, spe: 260, spc: 180, types: [4, 4] },
    SpeciesData { name: "wisp",    hp: 240, atk: 120, def: 100, spe: 240, spc: 280, types: [7, 5] },
    SpeciesData { name: "brawn",   hp: 320, atk: 240, def: 160, spe: 100, spc: 120, types: [0, 0] },
    SpeciesData { name: "mirage",  hp: 270, atk: 160, def: 140, spe: 200, spc: 200, types: [5, 5] },
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveEffect {
    Nothing,
    Damage { power: u16, special: bool },
    FixedDamage(u16),
    Sleep,
    Confuse,
    Paralyze,
    Poison,
    LightScreen,
    Reflect,
    Heal,
    Rest,
    BoostAtk(i8),
    BoostSpe(i8),
    DropDef(i8),
}

#[derive(Clone, Copy, Debug)]
pub struct MoveData {
    pub name: &'static str,
    /// Accuracy in percent; 100 never misses.
    pub acc: u8,
    pub effect: MoveEffect,
    pub max_pp: u8,
}

#[rustfmt::skip]
pub const MOVES: [MoveData; N_MOVES] = [
    MoveData { name: "pass",     acc: 100, effect: MoveEffect::Nothing, max_pp: 0 },
    MoveData { name: "jab",      acc: 100, effect: MoveEffect::Damage { power: 40, special: false }, max_pp: 32 },
    MoveData { name: "slam",     acc: 85,  effect: MoveEffect::Damage { power: 85, special: false }, max_pp: 16 },
    MoveData { name: "blast",    acc: 70,  effect: MoveEffect::Damage { power: 120, special: true }, max_pp: 8 },
    MoveData { name: "toss",     acc: 100, effect: MoveEffect::FixedDamage(50), max_pp: 16 },
    MoveData { name: "surge",    acc: 100, effect: MoveEffect::Damage { power: 65, special: true }, max_pp: 24 },
    MoveData { name: "hypnosis", acc: 60,  effect: MoveEffect::Sleep, max_pp: 16 },
    MoveData { name: "daze",     acc: 100, effect: MoveEffect::Confuse, max_pp: 16 },
    MoveData { name: "glare",    acc: 75,  effect: MoveEffect::Paralyze, max_pp: 24 },
    MoveData { name: "toxin",    acc: 85,  effect: MoveEffect::Poison, max_pp: 16 },
    MoveData { name: "screen",   acc: 100, effect: MoveEffect::LightScreen, max_pp: 24 },
    MoveData { name: "barrier",  acc: 100, effect: MoveEffect::Reflect, max_pp: 24 },
    MoveData { name: "recover",  acc: 100, effect: MoveEffect::Heal, max_pp: 16 },
    MoveData { name: "rest",     acc: 100, effect: MoveEffect::Rest, max_pp: 16 },
    MoveData { name: "hone",     acc: 100, effect: MoveEffect::BoostAtk(2), max_pp: 24 },
    MoveData { name: "screech",  acc: 85,  effect: MoveEffect::DropDef(2), max_pp: 24 },
    MoveData { name: "dash",     acc: 100, effect: MoveEffect::BoostSpe(2), max_pp: 24 },
];

/// Stage multiplier numerators for boosts -6..=6, over a denominator of 100.
const BOOST_NUM: [u16; 13] = [25, 28, 33, 40, 50, 66, 100, 150, 200, 250, 300, 350, 400];

#[inline]
pub fn boosted(stat: u16, boost: i8) -> u16 {
    let num = BOOST_NUM[(boost + 6) as usize] as u32;
    ((stat as u32 * num / 100) as u16).clamp(1, 999)
}

// ---------------------------------------------------------------------------
// state

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub hp: u16,
    pub atk: u16,
    pub def: u16,
    pub spe: u16,
    pub spc: u16,
}

#[derive(Clone, Debug)]
pub struct Unit {
    pub species: u8,
    pub types: [u8; 2],
    pub stats: Stats,
    pub hp: u16,
    pub status: u8,
    /// Observed turns spent asleep; public information.
    pub slept: u8,
    pub moves: [u8; MOVE_SLOTS],
    pub pp: [u8; MOVE_SLOTS],
}

impl Unit {
    pub fn of_species(id: u8) -> Self {
        let data = &SPECIES[id as usize];
        Self {
            species: id,
            types: data.types,
            stats: Stats {
                hp: data.hp,
                atk: data.atk,
                def: data.def,
                spe: data.spe,
                spc: data.spc,
            },
            hp: data.hp,
            status: status::NONE,
            slept: 0,
            moves: [0; MOVE_SLOTS],
            pp: [0; MOVE_SLOTS],
        }
    }

    pub fn with_moves(id: u8, moves: [u8; MOVE_SLOTS]) -> Self {
        let mut unit = Self::of_species(id);
        unit.moves = moves;
        for slot in 0..MOVE_SLOTS {
            unit.pp[slot] = MOVES[moves[slot] as usize].max_pp;
        }
        unit
    }

    #[inline]
    pub fn alive(&self) -> bool {
        self.hp > 0
    }

    #[inline]
    pub fn has_pp(&self, slot: usize) -> bool {
        self.moves[slot] != 0 && self.pp[slot] > 0
    }
}

/// Battle-scoped state of the unit currently on the field; cleared on
/// switch.
#[derive(Clone, Debug, Default)]
pub struct Active {
    /// atk, def, spe, spc stages in -6..=6.
    pub boosts: [i8; 4],
    pub confused: bool,
    /// Hidden confusion attempts remaining.
    pub conf_left: u8,
    /// Observed confusion attempts so far; public information.
    pub conf_seen: u8,
    pub reflect: bool,
    pub light_screen: bool,
}

#[derive(Clone, Debug)]
pub struct Side {
    pub units: [Unit; TEAM_SIZE],
    pub count: u8,
    pub active: u8,
    pub active_state: Active,
    pub must_switch: bool,
}

impl Side {
    fn blank() -> Self {
        Self {
            units: std::array::from_fn(|_| Unit::of_species(0)),
            count: 0,
            active: 0,
            active_state: Active::default(),
            must_switch: false,
        }
    }

    fn from_defs(defs: &[UnitDef]) -> Self {
        assert!(!defs.is_empty() && defs.len() <= TEAM_SIZE);
        let mut side = Self::blank();
        for (slot, def) in defs.iter().enumerate() {
            side.units[slot] = Unit::with_moves(def.species, def.moves);
        }
        side.count = defs.len() as u8;
        side
    }

    #[inline]
    pub fn active_unit(&self) -> &Unit {
        &self.units[self.active as usize]
    }

    #[inline]
    pub fn active_unit_mut(&mut self) -> &mut Unit {
        &mut self.units[self.active as usize]
    }

    pub fn alive_count(&self) -> u8 {
        self.units[..self.count as usize]
            .iter()
            .filter(|u| u.alive())
            .count() as u8
    }

    /// Effective speed for action ordering.
    pub fn effective_speed(&self) -> u16 {
        let unit = self.active_unit();
        let mut spe = boosted(unit.stats.spe, self.active_state.boosts[2]);
        if unit.status & status::PARALYSIS != 0 {
            spe = (spe / 4).max(1);
        }
        spe
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UnitDef {
    pub species: u8,
    pub moves: [u8; MOVE_SLOTS],
}

#[derive(Clone, Debug)]
pub struct Duel {
    pub sides: [Side; 2],
    pub turn: u16,
    status: GameStatus,
    rng: u64,
    last_obs: [u8; 16],
}

// observation flag bits, byte 0
const OBS_P1_FIRST: u8 = 1 << 0;
const OBS_P1_HIT: u8 = 1 << 1;
const OBS_P2_HIT: u8 = 1 << 2;
const OBS_P1_SELF_HIT: u8 = 1 << 3;
const OBS_P2_SELF_HIT: u8 = 1 << 4;

// byte 1
const OBS_P1_SLEPT: u8 = 1 << 0;
const OBS_P2_SLEPT: u8 = 1 << 1;
const OBS_P1_WOKE: u8 = 1 << 2;
const OBS_P2_WOKE: u8 = 1 << 3;
const OBS_P1_PARA: u8 = 1 << 4;
const OBS_P2_PARA: u8 = 1 << 5;
const OBS_P1_SNAPPED: u8 = 1 << 6;
const OBS_P2_SNAPPED: u8 = 1 << 7;

impl Duel {
    pub fn new(p1: &[UnitDef], p2: &[UnitDef], seed: u64) -> Self {
        Self {
            sides: [Side::from_defs(p1), Side::from_defs(p2)],
            turn: 0,
            status: GameStatus::Ongoing,
            rng: seed | 1,
            last_obs: [0; 16],
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng = x;
        x.wrapping_mul(0x2545f4914f6cdd1d)
    }

    #[inline]
    fn chance(&mut self, percent: u8) -> bool {
        percent >= 100 || self.next() % 100 < percent as u64
    }

    fn roll_byte(&mut self, overridden: u8) -> u8 {
        if overridden != 0 {
            overridden
        } else {
            LOWEST_ROLL + (self.next() % N_FREE_ROLLS) as u8
        }
    }

    fn damage(&self, attacker: usize, power: u16, special: bool, roll: u8) -> u16 {
        let atk_side = &self.sides[attacker];
        let def_side = &self.sides[1 - attacker];
        let unit = atk_side.active_unit();
        let target = def_side.active_unit();

        let mut atk = if special {
            boosted(unit.stats.spc, atk_side.active_state.boosts[3])
        } else {
            boosted(unit.stats.atk, atk_side.active_state.boosts[0])
        };
        if !special && unit.status & status::BURN != 0 {
            atk = (atk / 2).max(1);
        }
        let mut def = if special {
            boosted(target.stats.spc, def_side.active_state.boosts[3])
        } else {
            boosted(target.stats.def, def_side.active_state.boosts[1])
        };
        let screened = if special {
            def_side.active_state.light_screen
        } else {
            def_side.active_state.reflect
        };
        if screened {
            def = def.saturating_mul(2).min(999);
        }

        let base = 42 * power as u32 * atk as u32 / def.max(1) as u32 / 50 + 2;
        ((base * roll as u32 / 255) as u16).max(1)
    }

    fn apply_damage(&mut self, defender: usize, amount: u16) -> u16 {
        let unit = self.sides[defender].active_unit_mut();
        let dealt = amount.min(unit.hp);
        unit.hp -= dealt;
        dealt
    }

    fn do_switch(&mut self, p: usize, unit: usize) {
        let side = &mut self.sides[p];
        debug_assert!(unit < side.count as usize && unit != side.active as usize);
        debug_assert!(side.units[unit].alive());
        side.active = unit as u8;
        side.active_state = Active::default();
        side.must_switch = false;
        self.last_obs[11 + p] = unit as u8 + 1;
    }

    /// Execute one side's move; status conditions may consume the turn
    /// before the move happens.
    fn do_move(&mut self, p: usize, slot: usize, roll_override: u8) {
        let (hit_bit, self_hit_bit) = if p == 0 {
            (OBS_P1_HIT, OBS_P1_SELF_HIT)
        } else {
            (OBS_P2_HIT, OBS_P2_SELF_HIT)
        };
        let (slept_bit, woke_bit, para_bit, snap_bit) = if p == 0 {
            (OBS_P1_SLEPT, OBS_P1_WOKE, OBS_P1_PARA, OBS_P1_SNAPPED)
        } else {
            (OBS_P2_SLEPT, OBS_P2_WOKE, OBS_P2_PARA, OBS_P2_SNAPPED)
        };

        // sleep and freeze consume the turn outright
        {
            let unit = self.sides[p].active_unit_mut();
            if status::is_sleep(unit.status) {
                let left = status::sleep_left(unit.status) - 1;
                unit.status = status::with_sleep_left(unit.status, left);
                if left == 0 {
                    unit.status = status::NONE;
                    unit.slept = 0;
                    self.last_obs[1] |= woke_bit;
                } else {
                    if !status::is_rest(unit.status) {
                        unit.slept += 1;
                    }
                    self.last_obs[1] |= slept_bit;
                }
                // the wake turn is lost as well
                return;
            }
            if unit.status & status::FREEZE != 0 {
                return;
            }
        }

        if self.sides[p].active_unit().status & status::PARALYSIS != 0 && self.next() % 4 == 0 {
            self.last_obs[1] |= para_bit;
            return;
        }

        if self.sides[p].active_state.confused {
            let state = &mut self.sides[p].active_state;
            state.conf_left -= 1;
            if state.conf_left == 0 {
                state.confused = false;
                state.conf_seen = 0;
                self.last_obs[1] |= snap_bit;
                // snapped out; the move goes through
            } else {
                state.conf_seen += 1;
                if self.next() % 2 == 0 {
                    // typeless self-hit against own defense, screens ignored
                    let unit = self.sides[p].active_unit();
                    let atk = boosted(unit.stats.atk, self.sides[p].active_state.boosts[0]);
                    let def = boosted(unit.stats.def, self.sides[p].active_state.boosts[1]);
                    let base = 42 * 40 * atk as u32 / def.max(1) as u32 / 50 + 2;
                    let dealt = self.apply_damage(p, (base * 236 / 255) as u16);
                    self.last_obs[0] |= self_hit_bit;
                    self.last_obs[2 + 2 * p..4 + 2 * p].copy_from_slice(&dealt.to_le_bytes());
                    return;
                }
            }
        }

        let move_id = {
            let unit = self.sides[p].active_unit_mut();
            let id = unit.moves[slot];
            debug_assert!(unit.pp[slot] > 0);
            unit.pp[slot] = unit.pp[slot].saturating_sub(1);
            id
        };
        let data = &MOVES[move_id as usize];

        if !self.chance(data.acc) {
            return;
        }
        self.last_obs[0] |= hit_bit;

        let other = 1 - p;
        match data.effect {
            MoveEffect::Nothing => {}
            MoveEffect::Damage { power, special } => {
                let roll = self.roll_byte(roll_override);
                self.last_obs[6 + p] = roll;
                let amount = self.damage(p, power, special, roll);
                let dealt = self.apply_damage(other, amount);
                self.last_obs[2 + 2 * p..4 + 2 * p].copy_from_slice(&dealt.to_le_bytes());
            }
            MoveEffect::FixedDamage(amount) => {
                let dealt = self.apply_damage(other, amount);
                self.last_obs[2 + 2 * p..4 + 2 * p].copy_from_slice(&dealt.to_le_bytes());
            }
            MoveEffect::Sleep => {
                let can = {
                    let target = self.sides[other].active_unit();
                    target.alive() && target.status == status::NONE
                };
                if can {
                    let left = 1 + (self.next() % MAX_SLEEP as u64) as u8;
                    let target = self.sides[other].active_unit_mut();
                    target.status = status::with_sleep_left(status::NONE, left);
                    target.slept = 0;
                    self.last_obs[8 + p] = 0x01;
                }
            }
            MoveEffect::Confuse => {
                let can = self.sides[other].active_unit().alive()
                    && !self.sides[other].active_state.confused;
                if can {
                    let total = 2 + (self.next() % (MAX_CONFUSION - 1) as u64) as u8;
                    let state = &mut self.sides[other].active_state;
                    state.confused = true;
                    state.conf_left = total;
                    state.conf_seen = 0;
                    self.last_obs[8 + p] = 0x80;
                }
            }
            MoveEffect::Paralyze => {
                let target = self.sides[other].active_unit_mut();
                if target.alive() && target.status == status::NONE {
                    target.status = status::PARALYSIS;
                    self.last_obs[8 + p] = status::PARALYSIS;
                }
            }
            MoveEffect::Poison => {
                let target = self.sides[other].active_unit_mut();
                if target.alive() && target.status == status::NONE {
                    target.status = status::POISON;
                    self.last_obs[8 + p] = status::POISON;
                }
            }
            MoveEffect::LightScreen => self.sides[p].active_state.light_screen = true,
            MoveEffect::Reflect => self.sides[p].active_state.reflect = true,
            MoveEffect::Heal => {
                let unit = self.sides[p].active_unit_mut();
                unit.hp = (unit.hp + unit.stats.hp / 2).min(unit.stats.hp);
            }
            MoveEffect::Rest => {
                let unit = self.sides[p].active_unit_mut();
                if unit.hp < unit.stats.hp {
                    unit.hp = unit.stats.hp;
                    unit.status = status::with_sleep_left(status::REST, 2);
                    unit.slept = 0;
                }
            }
            MoveEffect::BoostAtk(stages) => {
                let boosts = &mut self.sides[p].active_state.boosts;
                boosts[0] = (boosts[0] + stages).clamp(-6, 6);
            }
            MoveEffect::BoostSpe(stages) => {
                let boosts = &mut self.sides[p].active_state.boosts;
                boosts[2] = (boosts[2] + stages).clamp(-6, 6);
            }
            MoveEffect::DropDef(stages) => {
                let boosts = &mut self.sides[other].active_state.boosts;
                boosts[1] = (boosts[1] - stages).clamp(-6, 6);
            }
        }
    }

    fn finish_turn(&mut self) -> GameStatus {
        for p in 0..2 {
            if self.sides[p].active_unit().hp == 0 {
                self.last_obs[10] |= 1 << p;
                if self.sides[p].alive_count() > 0 {
                    self.sides[p].must_switch = true;
                }
            }
        }

        let p1_alive = self.sides[0].alive_count();
        let p2_alive = self.sides[1].alive_count();
        self.status = match (p1_alive, p2_alive) {
            (0, 0) => GameStatus::Tie,
            (_, 0) => GameStatus::Win,
            (0, _) => GameStatus::Loss,
            _ => GameStatus::Ongoing,
        };
        self.turn += 1;
        self.status
    }
}

impl Game for Duel {
    const STATE_BYTES: usize = STATE_BYTES;
    type Obs = [u8; 16];
    type Hasher = crate::hash::DuelHasher;

    fn legal(&self, player: Player) -> ActionSet {
        let p = player.index();
        let side = &self.sides[p];
        let mut set = ActionSet::new();
        if self.status.is_over() {
            return set;
        }

        if side.must_switch {
            for unit in 0..side.count as usize {
                if unit != side.active as usize && side.units[unit].alive() {
                    set.push(switch_token(unit));
                }
            }
            return set;
        }
        if self.sides[1 - p].must_switch {
            // waiting for the opponent's replacement
            set.push(TOKEN_PASS);
            return set;
        }

        let unit = side.active_unit();
        for slot in 0..MOVE_SLOTS {
            if unit.has_pp(slot) {
                set.push(move_token(slot));
            }
        }
        for bench in 0..side.count as usize {
            if bench != side.active as usize && side.units[bench].alive() {
                set.push(switch_token(bench));
            }
        }
        if set.is_empty() {
            set.push(TOKEN_PASS);
        }
        set
    }

    fn advance(&mut self, c1: u8, c2: u8, rolls: RollPair) -> GameStatus {
        if self.status.is_over() {
            return self.status;
        }
        self.last_obs = [0; 16];
        if self.turn >= TURN_LIMIT {
            self.status = GameStatus::Tie;
            return self.status;
        }

        let replacement_turn = self.sides[0].must_switch || self.sides[1].must_switch;
        let tokens = [c1, c2];

        for p in 0..2 {
            if token_kind(tokens[p]) == 2 {
                self.do_switch(p, token_arg(tokens[p]));
            }
        }

        // action order: faster side first, speed ties broken by coin flip
        let spe1 = self.sides[0].effective_speed();
        let spe2 = self.sides[1].effective_speed();
        let p1_first = if spe1 != spe2 {
            spe1 > spe2
        } else {
            self.next() % 2 == 0
        };
        if p1_first {
            self.last_obs[0] |= OBS_P1_FIRST;
        }
        let order = if p1_first { [0, 1] } else { [1, 0] };

        for p in order {
            if token_kind(tokens[p]) != 1 {
                continue;
            }
            if !self.sides[p].active_unit().alive() {
                continue;
            }
            let roll_override = if p == 0 { rolls.p1 } else { rolls.p2 };
            self.do_move(p, token_arg(tokens[p]), roll_override);
        }

        if !replacement_turn {
            for p in 0..2 {
                let unit = self.sides[p].active_unit_mut();
                if unit.alive() && unit.status & (status::POISON | status::BURN) != 0 {
                    let chip = (unit.stats.hp / 16).max(1);
                    unit.hp = unit.hp.saturating_sub(chip);
                }
            }
        }

        self.finish_turn()
    }

    fn status(&self) -> GameStatus {
        self.status
    }

    fn obs(&self) -> Self::Obs {
        self.last_obs
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = seed | 1;
    }

    /// Re-roll the hidden sleep and confusion countdowns, conditioned on
    /// the publicly observed counters, so each search iteration sees a
    /// fresh determinization of what neither player can know.
    fn randomize_hidden(&mut self) {
        for p in 0..2 {
            for slot in 0..self.sides[p].count as usize {
                let s = self.sides[p].units[slot].status;
                if status::is_sleep(s) && !status::is_rest(s) {
                    let slept = self.sides[p].units[slot].slept.min(MAX_SLEEP - 1);
                    let left = 1 + (self.next() % (MAX_SLEEP - slept) as u64) as u8;
                    let unit = &mut self.sides[p].units[slot];
                    unit.status = status::with_sleep_left(unit.status, left);
                }
            }
            if self.sides[p].active_state.confused {
                let seen = self.sides[p].active_state.conf_seen.min(MAX_CONFUSION - 1);
                let left = if seen == 0 {
                    2 + (self.next() % (MAX_CONFUSION - 1) as u64) as u8
                } else {
                    1 + (self.next() % (MAX_CONFUSION - seen) as u64) as u8
                };
                self.sides[p].active_state.conf_left = left;
            }
        }
    }

    fn roll_entropy(&self) -> (u8, u8) {
        ((self.rng >> 48) as u8, (self.rng >> 56) as u8)
    }

    fn cap_turn_counter(&mut self) {
        self.turn = TURN_LIMIT;
    }

    fn to_bytes(&self, out: &mut [u8]) {
        fn put(out: &mut [u8], at: &mut usize, bytes: &[u8]) {
            out[*at..*at + bytes.len()].copy_from_slice(bytes);
            *at += bytes.len();
        }

        assert!(out.len() >= STATE_BYTES);
        let at = &mut 0usize;
        for side in &self.sides {
            for unit in &side.units {
                put(out, at, &[unit.species, unit.types[0], unit.types[1]]);
                for stat in [
                    unit.stats.hp,
                    unit.stats.atk,
                    unit.stats.def,
                    unit.stats.spe,
                    unit.stats.spc,
                    unit.hp,
                ] {
                    put(out, at, &stat.to_le_bytes());
                }
                put(out, at, &[unit.status, unit.slept]);
                put(out, at, &unit.moves);
                put(out, at, &unit.pp);
            }
            let state = &side.active_state;
            put(out, at, &[side.count, side.active, side.must_switch as u8]);
            put(
                out,
                at,
                &[
                    state.boosts[0] as u8,
                    state.boosts[1] as u8,
                    state.boosts[2] as u8,
                    state.boosts[3] as u8,
                ],
            );
            put(
                out,
                at,
                &[
                    state.confused as u8,
                    state.conf_left,
                    state.conf_seen,
                    state.reflect as u8,
                    state.light_screen as u8,
                ],
            );
        }
        put(out, at, &self.turn.to_le_bytes());
        put(out, at, &[self.status.to_byte()]);
        put(out, at, &self.rng.to_le_bytes());
        put(out, at, &self.last_obs);
        out[*at..STATE_BYTES].fill(0);
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        fn take<'a>(bytes: &'a [u8], at: &mut usize, len: usize) -> &'a [u8] {
            let slice = &bytes[*at..*at + len];
            *at += len;
            slice
        }
        fn word(bytes: &[u8], at: &mut usize) -> u16 {
            let slice = take(bytes, at, 2);
            u16::from_le_bytes([slice[0], slice[1]])
        }

        assert!(bytes.len() >= STATE_BYTES);
        let at = &mut 0usize;
        let mut sides: [Side; 2] = std::array::from_fn(|_| Side::blank());
        for side in sides.iter_mut() {
            for unit in side.units.iter_mut() {
                let head = take(bytes, at, 3);
                unit.species = head[0];
                unit.types = [head[1], head[2]];
                unit.stats.hp = word(bytes, at);
                unit.stats.atk = word(bytes, at);
                unit.stats.def = word(bytes, at);
                unit.stats.spe = word(bytes, at);
                unit.stats.spc = word(bytes, at);
                unit.hp = word(bytes, at);
                let tail = take(bytes, at, 2);
                unit.status = tail[0];
                unit.slept = tail[1];
                unit.moves.copy_from_slice(take(bytes, at, 4));
                unit.pp.copy_from_slice(take(bytes, at, 4));
            }
            let head = take(bytes, at, 3);
            side.count = head[0];
            side.active = head[1];
            side.must_switch = head[2] != 0;
            let boosts = take(bytes, at, 4);
            side.active_state.boosts = [
                boosts[0] as i8,
                boosts[1] as i8,
                boosts[2] as i8,
                boosts[3] as i8,
            ];
            let flags = take(bytes, at, 5);
            side.active_state.confused = flags[0] != 0;
            side.active_state.conf_left = flags[1];
            side.active_state.conf_seen = flags[2];
            side.active_state.reflect = flags[3] != 0;
            side.active_state.light_screen = flags[4] != 0;
        }
        let turn = word(bytes, at);
        let status = GameStatus::from_byte(take(bytes, at, 1)[0]).expect("valid status byte");
        let rng = u64::from_le_bytes(take(bytes, at, 8).try_into().unwrap());
        let mut last_obs = [0u8; 16];
        last_obs.copy_from_slice(take(bytes, at, 16));
        Self {
            sides,
            turn,
            status,
            rng,
            last_obs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tosser() -> UnitDef {
        UnitDef {
            species: 3,
            moves: [4, 0, 0, 0],
        }
    }

    fn duel_1v1(p1: UnitDef, p2: UnitDef, seed: u64) -> Duel {
        Duel::new(&[p1], &[p2], seed)
    }

    #[test]
    fn simultaneous_race_is_decided_by_order() {
        let mut duel = duel_1v1(tosser(), tosser(), 7);
        duel.sides[0].units[0].hp = 50;
        duel.sides[1].units[0].hp = 50;
        // both throw a lethal toss; whoever wins the speed tie acts alone
        let status = duel.advance(move_token(0), move_token(0), RollPair::default());
        assert!(matches!(status, GameStatus::Win | GameStatus::Loss));
        let winner = if status == GameStatus::Win { 0 } else { 1 };
        assert_eq!(duel.sides[winner].active_unit().hp, 50);
    }

    #[test]
    fn faster_side_wins_the_race() {
        let mut duel = duel_1v1(tosser(), tosser(), 7);
        duel.sides[0].units[0].stats.spe = 300;
        duel.sides[1].units[0].stats.spe = 100;
        duel.sides[0].units[0].hp = 50;
        duel.sides[1].units[0].hp = 50;
        let status = duel.advance(move_token(0), move_token(0), RollPair::default());
        assert_eq!(status, GameStatus::Win);
    }

    #[test]
    fn sleep_costs_the_wake_turn() {
        let mut duel = duel_1v1(tosser(), tosser(), 7);
        // asleep with exactly one turn left: wakes this turn but loses it
        duel.sides[0].units[0].status = status::with_sleep_left(status::NONE, 1);
        duel.sides[0].units[0].slept = 6;
        duel.sides[0].units[0].stats.spe = 300;
        duel.sides[1].units[0].hp = 50;

        let status = duel.advance(move_token(0), move_token(0), RollPair::default());
        assert_eq!(status, GameStatus::Ongoing);
        assert_eq!(duel.sides[0].units[0].status, super::status::NONE);
        assert!(duel.sides[1].units[0].alive());

        // awake and faster now: the toss lands first
        let status = duel.advance(move_token(0), move_token(0), RollPair::default());
        assert_eq!(status, GameStatus::Win);
    }

    #[test]
    fn hidden_sleep_reroll_respects_observations() {
        let mut duel = duel_1v1(tosser(), tosser(), 7);
        duel.sides[0].units[0].status = status::with_sleep_left(status::NONE, 3);
        duel.sides[0].units[0].slept = 6;
        for seed in 0..32 {
            duel.reseed(seed);
            duel.randomize_hidden();
            // six observed turns asleep leave exactly one possible countdown
            assert_eq!(status::sleep_left(duel.sides[0].units[0].status), 1);
        }

        duel.sides[0].units[0].slept = 3;
        let mut seen = [false; 8];
        for seed in 0..64u64 {
            duel.reseed(seed.wrapping_mul(0x9e3779b97f4a7c15));
            duel.randomize_hidden();
            let left = status::sleep_left(duel.sides[0].units[0].status);
            assert!((1..=4).contains(&left));
            seen[left as usize] = true;
        }
        assert!(seen[1] && seen[2] && seen[3] && seen[4]);
    }

    #[test]
    fn forced_replacement_after_faint() {
        let mut duel = Duel::new(&[tosser(), tosser()], &[tosser()], 7);
        duel.sides[0].units[0].hp = 50;
        duel.sides[0].units[0].stats.spe = 1;
        let status = duel.advance(move_token(0), move_token(0), RollPair::default());
        assert_eq!(status, GameStatus::Ongoing);
        assert!(duel.sides[0].must_switch);

        let p1_legal = duel.legal(Player::P1);
        assert_eq!(p1_legal.as_slice(), &[switch_token(1)]);
        let p2_legal = duel.legal(Player::P2);
        assert_eq!(p2_legal.as_slice(), &[TOKEN_PASS]);

        let status = duel.advance(switch_token(1), TOKEN_PASS, RollPair::default());
        assert_eq!(status, GameStatus::Ongoing);
        assert_eq!(duel.sides[0].active, 1);
        assert!(!duel.sides[0].must_switch);
    }

    #[test]
    fn roll_override_pins_damage() {
        let mut reference = 0u16;
        for seed in 0..8u64 {
            let mut duel = duel_1v1(
                UnitDef {
                    species: 7,
                    moves: [1, 0, 0, 0],
                },
                tosser(),
                seed * 31 + 1,
            );
            duel.sides[0].units[0].stats.spe = 300;
            let hp_before = duel.sides[1].active_unit().hp;
            duel.advance(move_token(0), move_token(0), RollPair { p1: 236, p2: 0 });
            let dealt = hp_before - duel.sides[1].active_unit().hp;
            assert!(dealt > 0);
            if reference == 0 {
                reference = dealt;
            }
            assert_eq!(dealt, reference, "clamped roll must be deterministic");
        }
    }

    #[test]
    fn confusion_can_end_the_confused_side() {
        // P2 confused at 1 hp: a self-hit faints it before it can act
        let mut saw_self_faint = false;
        let mut saw_kill = false;
        for seed in 0..64u64 {
            let mut duel = duel_1v1(tosser(), tosser(), seed * 1031 + 5);
            duel.sides[0].units[0].hp = 50;
            duel.sides[0].units[0].stats.spe = 1;
            duel.sides[1].units[0].hp = 1;
            duel.sides[1].active_state.confused = true;
            duel.sides[1].active_state.conf_left = 3;
            duel.sides[1].active_state.conf_seen = 1;
            match duel.advance(move_token(0), move_token(0), RollPair::default()) {
                GameStatus::Win => saw_self_faint = true,
                GameStatus::Ongoing | GameStatus::Loss => saw_kill = true,
                GameStatus::Tie => {}
            }
        }
        assert!(saw_self_faint && saw_kill);
    }

    #[test]
    fn state_bytes_round_trip() {
        let mut duel = Duel::new(
            &[
                tosser(),
                UnitDef {
                    species: 5,
                    moves: [1, 6, 12, 14],
                },
            ],
            &[UnitDef {
                species: 6,
                moves: [3, 7, 13, 15],
            }],
            99,
        );
        duel.advance(move_token(0), move_token(1), RollPair::default());
        let mut bytes = vec![0u8; STATE_BYTES];
        duel.to_bytes(&mut bytes);
        let copy = Duel::from_bytes(&bytes);
        let mut bytes2 = vec![0u8; STATE_BYTES];
        copy.to_bytes(&mut bytes2);
        assert_eq!(bytes, bytes2);
        assert_eq!(copy.turn, duel.turn);
        assert_eq!(copy.status(), duel.status());
    }

    #[test]
    fn legal_sets_stay_within_bounds() {
        let team: Vec<UnitDef> = (1..=6)
            .map(|species| UnitDef {
                species,
                moves: [1, 2, 3, 4],
            })
            .collect();
        let duel = Duel::new(&team, &team, 5);
        let legal = duel.legal(Player::P1);
        assert_eq!(legal.len(), 9); // 4 moves + 5 bench switches
    }
}
