//! Turning search policies into a concrete action choice.
//!
//! The worker picks between the empirical visit distribution, the Nash
//! solution, their weighted mix, or the empirical argmax, then applies a
//! temperature and a probability floor before sampling.

use rand::Rng;

use crate::game::MAX_ACTIONS;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolicyOptions {
    /// `e` empirical, `n` nash, `x` argmax-empirical, `m` mixed.
    pub mode: char,
    /// Exponent applied to each probability before renormalization.
    pub temperature: f64,
    /// Probabilities below `min_prob` times the total mass are zeroed.
    pub min_prob: f64,
    /// Weight on the Nash policy in mode `m`.
    pub nash_weight: f64,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            mode: 'n',
            temperature: 1.0,
            min_prob: 0.0,
            nash_weight: 0.5,
        }
    }
}

impl PolicyOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.mode, 'e' | 'n' | 'x' | 'm') {
            return Err(format!("unknown policy mode `{}`", self.mode));
        }
        if self.temperature <= 0.0 {
            return Err("policy temperature must be positive".into());
        }
        if !(0.0..1.0).contains(&self.min_prob) {
            return Err("policy floor must be in [0, 1)".into());
        }
        if !(0.0..=1.0).contains(&self.nash_weight) {
            return Err("nash weight must be in [0, 1]".into());
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZeroMassPolicy;

impl std::fmt::Display for ZeroMassPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "policy lost all mass after temperature and floor")
    }
}

impl std::error::Error for ZeroMassPolicy {}

/// Shape the selected policy and sample an index from it.
pub fn sample_action<R: Rng>(
    rng: &mut R,
    empirical: &[f32],
    nash: &[f32],
    options: &PolicyOptions,
) -> Result<usize, ZeroMassPolicy> {
    debug_assert_eq!(empirical.len(), nash.len());
    let k = empirical.len();
    debug_assert!(k >= 1 && k <= MAX_ACTIONS);

    if options.mode == 'x' {
        let mut best = 0;
        for i in 1..k {
            if empirical[i] > empirical[best] {
                best = i;
            }
        }
        return Ok(best);
    }

    let mut policy = [0f64; MAX_ACTIONS];
    for i in 0..k {
        policy[i] = match options.mode {
            'e' => empirical[i] as f64,
            'n' => nash[i] as f64,
            _ => {
                options.nash_weight * nash[i] as f64
                    + (1.0 - options.nash_weight) * empirical[i] as f64
            }
        };
    }

    let mut total = 0.0;
    if options.temperature != 1.0 {
        for p in policy[..k].iter_mut() {
            *p = p.powf(options.temperature);
            total += *p;
        }
    } else {
        total = policy[..k].iter().sum();
    }

    if options.min_prob > 0.0 {
        let floor = options.min_prob * total;
        total = 0.0;
        for p in policy[..k].iter_mut() {
            if *p < floor {
                *p = 0.0;
            }
            total += *p;
        }
    }

    if total <= 0.0 {
        return Err(ZeroMassPolicy);
    }

    let mut draw: f64 = rng.gen::<f64>() * total;
    for (i, &p) in policy[..k].iter().enumerate() {
        draw -= p;
        if draw <= 0.0 && p > 0.0 {
            return Ok(i);
        }
    }
    // rounding slack: take the last arm with mass
    Ok(policy[..k]
        .iter()
        .rposition(|&p| p > 0.0)
        .expect("total mass was positive"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn argmax_mode_is_deterministic() {
        let mut rng = SmallRng::seed_from_u64(1);
        let empirical = [0.2, 0.5, 0.3];
        let nash = [1.0, 0.0, 0.0];
        let options = PolicyOptions {
            mode: 'x',
            ..Default::default()
        };
        for _ in 0..10 {
            assert_eq!(sample_action(&mut rng, &empirical, &nash, &options), Ok(1));
        }
    }

    #[test]
    fn floor_removes_rare_arms() {
        let mut rng = SmallRng::seed_from_u64(2);
        let empirical = [0.96, 0.01, 0.03];
        let nash = empirical;
        let options = PolicyOptions {
            mode: 'e',
            min_prob: 0.05,
            ..Default::default()
        };
        for _ in 0..200 {
            let i = sample_action(&mut rng, &empirical, &nash, &options).unwrap();
            assert_ne!(i, 1);
        }
    }

    #[test]
    fn temperature_sharpens_the_policy() {
        let mut rng = SmallRng::seed_from_u64(3);
        let empirical = [0.7, 0.3];
        let nash = empirical;
        let sharp = PolicyOptions {
            mode: 'e',
            temperature: 8.0,
            ..Default::default()
        };
        let hits = (0..500)
            .filter(|_| sample_action(&mut rng, &empirical, &nash, &sharp) == Ok(0))
            .count();
        assert!(hits > 480, "hits {hits}");
    }

    #[test]
    fn zero_mass_is_an_error() {
        let mut rng = SmallRng::seed_from_u64(4);
        let empirical = [0.0, 0.0];
        let nash = empirical;
        let options = PolicyOptions {
            mode: 'e',
            ..Default::default()
        };
        assert_eq!(
            sample_action(&mut rng, &empirical, &nash, &options),
            Err(ZeroMassPolicy)
        );
    }

    #[test]
    fn mixed_mode_interpolates() {
        let mut rng = SmallRng::seed_from_u64(5);
        let empirical = [1.0, 0.0];
        let nash = [0.0, 1.0];
        let options = PolicyOptions {
            mode: 'm',
            nash_weight: 1.0,
            ..Default::default()
        };
        for _ in 0..50 {
            assert_eq!(sample_action(&mut rng, &empirical, &nash, &options), Ok(1));
        }
    }

    #[test]
    fn validation_rejects_bad_options() {
        assert!(PolicyOptions::default().validate().is_ok());
        assert!(PolicyOptions {
            mode: 'q',
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(PolicyOptions {
            temperature: 0.0,
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
