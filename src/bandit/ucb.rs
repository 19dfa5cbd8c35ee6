use rand::Rng;

use super::Pick;
use crate::game::MAX_ACTIONS;

/// UCB with a square-root total-visit exploration term.
///
/// Score `S_i / V_i` plus `c * sqrt(sum V) / (V_i + 1)`. Unvisited arms are
/// taken first, highest index first, so a freshly initialized node sweeps
/// its arms before the exploration term matters.
#[derive(Clone, Debug, Default)]
pub struct Ucb {
    scores: [f32; MAX_ACTIONS],
    visits: [u32; MAX_ACTIONS],
    k: u8,
}

impl Ucb {
    pub fn init(&mut self, k: u8) {
        debug_assert!(k >= 1 && k as usize <= MAX_ACTIONS);
        self.k = k;
        self.scores[..k as usize].fill(0.0);
        self.visits[..k as usize].fill(0);
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.k != 0
    }

    #[inline]
    pub fn visits(&self) -> &[u32] {
        &self.visits[..self.k as usize]
    }

    pub fn select<R: Rng>(&self, _rng: &mut R, c: f32) -> Pick {
        let k = self.k as usize;
        if k == 1 {
            return Pick { index: 0, prob: 1.0 };
        }

        let mut q = [0f32; MAX_ACTIONS];
        let mut total = 0u64;
        for i in (0..k).rev() {
            if self.visits[i] == 0 {
                return Pick {
                    index: i as u8,
                    prob: 1.0,
                };
            }
            q[i] = self.scores[i] / self.visits[i] as f32;
            total += self.visits[i] as u64;
        }

        let sqrt_total = (total as f32).sqrt();
        let mut best = f32::NEG_INFINITY;
        let mut index = 0u8;
        for i in 0..k {
            let explore = c * sqrt_total / (self.visits[i] + 1) as f32;
            let score = q[i] + explore;
            if score > best {
                best = score;
                index = i as u8;
            }
        }
        Pick { index, prob: 1.0 }
    }

    pub fn update(&mut self, index: u8, value: f32) {
        debug_assert!(index < self.k);
        self.scores[index as usize] += value;
        self.visits[index as usize] += 1;
    }
}

/// Classic UCB1: exploration `c * sqrt(ln(sum V) / V_i)`, with one phantom
/// visit per arm so the logarithm and division are always defined.
#[derive(Clone, Debug, Default)]
pub struct Ucb1 {
    scores: [f32; MAX_ACTIONS],
    visits: [u32; MAX_ACTIONS],
    k: u8,
}

impl Ucb1 {
    pub fn init(&mut self, k: u8) {
        debug_assert!(k >= 1 && k as usize <= MAX_ACTIONS);
        self.k = k;
        self.scores[..k as usize].fill(0.0);
        self.visits[..k as usize].fill(1);
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.k != 0
    }

    #[inline]
    pub fn visits(&self) -> &[u32] {
        &self.visits[..self.k as usize]
    }

    pub fn select<R: Rng>(&self, _rng: &mut R, c: f32) -> Pick {
        let k = self.k as usize;
        if k == 1 {
            return Pick { index: 0, prob: 1.0 };
        }

        let mut q = [0f32; MAX_ACTIONS];
        let mut total = 0u64;
        for i in 0..k {
            q[i] = self.scores[i] / self.visits[i] as f32;
            total += self.visits[i] as u64;
        }

        let log_total = (total as f32).ln();
        let mut best = f32::NEG_INFINITY;
        let mut index = 0u8;
        for i in 0..k {
            let explore = c * (log_total / self.visits[i] as f32).sqrt();
            let score = q[i] + explore;
            if score > best {
                best = score;
                index = i as u8;
            }
        }
        Pick { index, prob: 1.0 }
    }

    pub fn update(&mut self, index: u8, value: f32) {
        debug_assert!(index < self.k);
        self.scores[index as usize] += value;
        self.visits[index as usize] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn singleton_is_deterministic() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut bandit = Ucb::default();
        bandit.init(1);
        for _ in 0..10 {
            assert_eq!(bandit.select(&mut rng, 1.0).index, 0);
        }
    }

    #[test]
    fn unvisited_arms_first() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut bandit = Ucb::default();
        bandit.init(3);
        let mut seen = [false; 3];
        for _ in 0..3 {
            let pick = bandit.select(&mut rng, 1.0);
            assert!(!seen[pick.index as usize]);
            seen[pick.index as usize] = true;
            bandit.update(pick.index, 0.5);
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn exploitation_wins_eventually() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut bandit = Ucb1::default();
        bandit.init(2);
        for _ in 0..200 {
            let pick = bandit.select(&mut rng, 0.1);
            let value = if pick.index == 0 { 1.0 } else { 0.0 };
            bandit.update(pick.index, value);
        }
        let visits = bandit.visits();
        assert!(visits[0] > visits[1]);
    }
}
