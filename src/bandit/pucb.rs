use rand::Rng;

use super::{softmax, Pick};
use crate::game::MAX_ACTIONS;

/// Policy-UCB: like [`super::Ucb`] but the exploration term of each arm is
/// weighted by a prior from a policy network, absorbed once when the node is
/// expanded.
#[derive(Clone, Debug, Default)]
pub struct Pucb {
    scores: [f32; MAX_ACTIONS],
    priors: [f32; MAX_ACTIONS],
    visits: [u32; MAX_ACTIONS],
    k: u8,
}

impl Pucb {
    pub fn init(&mut self, k: u8) {
        debug_assert!(k >= 1 && k as usize <= MAX_ACTIONS);
        self.k = k;
        self.scores[..k as usize].fill(0.0);
        // uniform prior until logits are absorbed
        self.priors[..k as usize].fill(1.0 / k as f32);
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

    pub fn absorb_logits(&mut self, logits: &[f32]) {
        let k = self.k as usize;
        debug_assert!(logits.len() >= k);
        softmax(&mut self.priors, &logits[..k], 1.0);
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
            let explore = c * self.priors[i] * sqrt_total / (self.visits[i] + 1) as f32;
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
    fn prior_steers_exploration() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut bandit = Pucb::default();
        bandit.init(3);
        bandit.absorb_logits(&[4.0, 0.0, 0.0]);

        // Visit every arm once, then the prior should dominate ties.
        for _ in 0..3 {
            let pick = bandit.select(&mut rng, 1.0);
            bandit.update(pick.index, 0.5);
        }
        let pick = bandit.select(&mut rng, 1.0);
        assert_eq!(pick.index, 0);
    }

    #[test]
    fn absorbed_priors_are_normalized() {
        let mut bandit = Pucb::default();
        bandit.init(4);
        bandit.absorb_logits(&[1.0, -2.0, 0.5, 3.0]);
        let sum: f32 = bandit.priors[..4].iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
