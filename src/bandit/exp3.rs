use rand::Rng;

use super::{sample_pdf, softmax, Pick};
use crate::game::MAX_ACTIONS;

const NEG_INF: f32 = f32::NEG_INFINITY;

/// Mixing policy shared by EXP3 and PEXP3: `(1 - gamma) * softmax(eta * g)
/// + eta`, with `eta = gamma / k`. Gains beyond `k` sit at negative
/// infinity and contribute zero mass.
fn exp3_policy(gains: &[f32; MAX_ACTIONS], k: usize, gamma: f32, policy: &mut [f32; MAX_ACTIONS]) {
    let eta = gamma / k as f32;
    softmax(policy, &gains[..k], eta);
    for p in policy[..k].iter_mut() {
        *p = (1.0 - gamma) * *p + eta;
    }
}

/// Importance-weighted gain update with the rescale that keeps all gains
/// non-positive. Returns nothing; invalid arms stay at negative infinity.
fn bump_gains(gains: &mut [f32; MAX_ACTIONS], index: u8, delta: f32) {
    let i = index as usize;
    gains[i] += delta;
    if gains[i] >= 0.0 {
        let max = gains[i];
        for g in gains.iter_mut() {
            *g -= max;
        }
    }
}

/// EXP3 adversarial bandit: samples from the mixed policy and reweights the
/// realized value by its selection probability.
#[derive(Clone, Debug)]
pub struct Exp3 {
    gains: [f32; MAX_ACTIONS],
    k: u8,
}

impl Default for Exp3 {
    fn default() -> Self {
        Self {
            gains: [NEG_INF; MAX_ACTIONS],
            k: 0,
        }
    }
}

impl Exp3 {
    pub fn init(&mut self, k: u8) {
        debug_assert!(k >= 1 && k as usize <= MAX_ACTIONS);
        self.k = k;
        self.gains[..k as usize].fill(0.0);
        self.gains[k as usize..].fill(NEG_INF);
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.k != 0
    }

    pub fn select<R: Rng>(&self, rng: &mut R, gamma: f32) -> Pick {
        let k = self.k as usize;
        if k == 1 {
            return Pick { index: 0, prob: 1.0 };
        }
        let mut policy = [0f32; MAX_ACTIONS];
        exp3_policy(&self.gains, k, gamma, &mut policy);
        let index = sample_pdf(&policy[..k], rng);
        Pick {
            index: index as u8,
            prob: policy[index],
        }
    }

    pub fn update(&mut self, pick: Pick, value: f32) {
        debug_assert!(pick.index < self.k);
        bump_gains(&mut self.gains, pick.index, value / pick.prob);
    }
}

/// EXP3 seeded with policy-network logits: the gains start at
/// `logits / eta` so the first selection distribution reproduces the prior,
/// and updates are centred at one half to keep the seed meaningful.
#[derive(Clone, Debug)]
pub struct Pexp3 {
    gains: [f32; MAX_ACTIONS],
    k: u8,
}

impl Default for Pexp3 {
    fn default() -> Self {
        Self {
            gains: [NEG_INF; MAX_ACTIONS],
            k: 0,
        }
    }
}

impl Pexp3 {
    pub fn init(&mut self, k: u8) {
        debug_assert!(k >= 1 && k as usize <= MAX_ACTIONS);
        self.k = k;
        self.gains[..k as usize].fill(0.0);
        self.gains[k as usize..].fill(NEG_INF);
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.k != 0
    }

    pub fn absorb_logits(&mut self, gamma: f32, logits: &[f32]) {
        let k = self.k as usize;
        debug_assert!(logits.len() >= k);
        let eta = gamma / k as f32;
        for i in 0..k {
            self.gains[i] = logits[i] / eta;
        }
    }

    pub fn select<R: Rng>(&self, rng: &mut R, gamma: f32) -> Pick {
        let k = self.k as usize;
        if k == 1 {
            return Pick { index: 0, prob: 1.0 };
        }
        let mut policy = [0f32; MAX_ACTIONS];
        exp3_policy(&self.gains, k, gamma, &mut policy);
        let index = sample_pdf(&policy[..k], rng);
        Pick {
            index: index as u8,
            prob: policy[index],
        }
    }

    pub fn update(&mut self, pick: Pick, value: f32) {
        debug_assert!(pick.index < self.k);
        bump_gains(&mut self.gains, pick.index, (value - 0.5) / pick.prob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn full_gamma_is_uniform() {
        // With gamma = 1 the softmax term is weighted by zero; the policy is
        // exactly 1/k no matter how skewed the gains are.
        let mut bandit = Exp3::default();
        bandit.init(4);
        bandit.gains[..4].copy_from_slice(&[0.0, -50.0, -3.0, -1000.0]);

        let mut policy = [0f32; MAX_ACTIONS];
        exp3_policy(&bandit.gains, 4, 1.0, &mut policy);
        for &p in &policy[..4] {
            assert!((p - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn gains_stay_non_positive() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut bandit = Exp3::default();
        bandit.init(3);
        for _ in 0..500 {
            let pick = bandit.select(&mut rng, 0.1);
            bandit.update(pick, 1.0);
            for &g in &bandit.gains[..3] {
                assert!(g <= 0.0);
            }
        }
        for &g in &bandit.gains[3..] {
            assert_eq!(g, NEG_INF);
        }
    }

    #[test]
    fn seeded_gains_reproduce_prior() {
        let mut bandit = Pexp3::default();
        bandit.init(3);
        let logits = [2.0f32, 0.0, -1.0];
        bandit.absorb_logits(0.3, &logits);

        let mut policy = [0f32; MAX_ACTIONS];
        exp3_policy(&bandit.gains, 3, 0.3, &mut policy);

        let mut prior = [0f32; MAX_ACTIONS];
        softmax(&mut prior, &logits, 1.0);
        for i in 0..3 {
            let expected = 0.7 * prior[i] + 0.1;
            assert!((policy[i] - expected).abs() < 1e-5);
        }
    }
}
