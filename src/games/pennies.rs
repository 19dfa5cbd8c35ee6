//! A one-shot simultaneous matrix game. Each joint action wins for P1 with
//! a fixed probability, so search output can be checked against the exact
//! solution of the underlying matrix.

use crate::game::{ActionSet, Game, GameStatus, Player, RollPair, StateHasher};

pub const MAX_DIM: usize = 3;

const STATE_BYTES: usize = 2 + MAX_DIM * MAX_DIM + 8 + 1;

#[derive(Clone, Debug)]
pub struct Pennies {
    m: u8,
    n: u8,
    /// Row-major P1 win chance per joint action, in percent.
    percent: [u8; MAX_DIM * MAX_DIM],
    rng: u64,
    status: GameStatus,
    outcome: u8,
}

impl Pennies {
    pub fn from_percent(m: u8, n: u8, cells: &[u8]) -> Self {
        assert!(m >= 1 && n >= 1 && m as usize <= MAX_DIM && n as usize <= MAX_DIM);
        assert_eq!(cells.len(), m as usize * n as usize);
        let mut percent = [0u8; MAX_DIM * MAX_DIM];
        percent[..cells.len()].copy_from_slice(cells);
        Self {
            m,
            n,
            percent,
            rng: 0x9e3779b97f4a7c15,
            status: GameStatus::Ongoing,
            outcome: 0,
        }
    }

    /// Fair matching pennies: match and P1 wins, mismatch and P2 wins.
    pub fn matching() -> Self {
        Self::from_percent(2, 2, &[100, 0, 0, 100])
    }

    fn next(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.rng | 1;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng = x;
        x.wrapping_mul(0x2545f4914f6cdd1d)
    }
}

#[derive(Clone)]
pub struct PenniesHasher {
    seed: u64,
}

impl StateHasher<Pennies> for PenniesHasher {
    fn seeded(seed: u64) -> Self {
        Self { seed }
    }

    // The RNG is excluded: reseeding between iterations must not change
    // the state's identity.
    fn full(&self, state: &Pennies) -> u64 {
        let mut hash = self.seed ^ 0xcbf29ce484222325;
        let mut mix = |byte: u8| {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        };
        mix(state.m);
        mix(state.n);
        for &cell in &state.percent {
            mix(cell);
        }
        mix(state.status.to_byte());
        hash
    }
}

impl Game for Pennies {
    const STATE_BYTES: usize = STATE_BYTES;
    type Obs = [u8; 16];
    type Hasher = PenniesHasher;

    fn legal(&self, player: Player) -> ActionSet {
        let count = match player {
            Player::P1 => self.m,
            Player::P2 => self.n,
        };
        (0..count).collect()
    }

    fn advance(&mut self, c1: u8, c2: u8, _rolls: RollPair) -> GameStatus {
        debug_assert!(!self.status.is_over());
        debug_assert!(c1 < self.m && c2 < self.n);
        let p = self.percent[c1 as usize * self.n as usize + c2 as usize] as u64;
        let won = self.next() % 100 < p;
        self.status = if won { GameStatus::Win } else { GameStatus::Loss };
        self.outcome = self.status.to_byte();
        self.status
    }

    fn status(&self) -> GameStatus {
        self.status
    }

    fn obs(&self) -> Self::Obs {
        let mut obs = [0u8; 16];
        obs[0] = self.outcome;
        obs
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = seed;
    }

    fn cap_turn_counter(&mut self) {
        // single-step game, nothing to wind down
    }

    fn to_bytes(&self, out: &mut [u8]) {
        out[0] = self.m;
        out[1] = self.n;
        out[2..11].copy_from_slice(&self.percent);
        out[11..19].copy_from_slice(&self.rng.to_le_bytes());
        out[19] = self.status.to_byte();
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut percent = [0u8; MAX_DIM * MAX_DIM];
        percent.copy_from_slice(&bytes[2..11]);
        Self {
            m: bytes[0],
            n: bytes[1],
            percent,
            rng: u64::from_le_bytes(bytes[11..19].try_into().unwrap()),
            status: GameStatus::from_byte(bytes[19]).unwrap(),
            outcome: bytes[19],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_rates_track_the_matrix() {
        let mut wins = 0;
        for seed in 0..1000u64 {
            let mut game = Pennies::from_percent(2, 2, &[70, 70, 70, 70]);
            game.reseed(seed.wrapping_mul(0x9e3779b97f4a7c15));
            if game.advance(0, 1, RollPair::default()) == GameStatus::Win {
                wins += 1;
            }
        }
        assert!((650..750).contains(&wins), "wins {wins}");
    }

    #[test]
    fn state_bytes_round_trip() {
        let mut game = Pennies::matching();
        game.advance(1, 0, RollPair::default());
        let mut bytes = [0u8; Pennies::STATE_BYTES];
        game.to_bytes(&mut bytes);
        let copy = Pennies::from_bytes(&bytes);
        assert_eq!(copy.status(), game.status());
        let mut bytes2 = [0u8; Pennies::STATE_BYTES];
        copy.to_bytes(&mut bytes2);
        assert_eq!(bytes, bytes2);
    }
}
