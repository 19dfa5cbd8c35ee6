use rand::rngs::SmallRng;
use rand::Rng;

use super::Evaluator;
use crate::game::{Game, Player, RollPair};

/// Uniform Monte Carlo rollout: sample a joint legal action until the game
/// ends, score win 1, tie one half, loss 0.
#[derive(Clone, Debug, Default)]
pub struct Rollout {
    /// Playouts that outlive this many steps score as a tie.
    pub max_steps: Option<u32>,
}

impl<G: Game> Evaluator<G> for Rollout {
    fn leaf(&mut self, state: &G, rng: &mut SmallRng) -> f32 {
        let mut game = state.clone();
        let mut status = game.status();
        let mut steps = 0u32;
        while !status.is_over() {
            if let Some(limit) = self.max_steps {
                if steps >= limit {
                    return 0.5;
                }
            }
            let p1_legal = game.legal(Player::P1);
            let p2_legal = game.legal(Player::P2);
            let c1 = p1_legal.get(rng.gen_range(0..p1_legal.len() as usize));
            let c2 = p2_legal.get(rng.gen_range(0..p2_legal.len() as usize));
            status = game.advance(c1, c2, RollPair::default());
            steps += 1;
        }
        status.scores().expect("terminal state").0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::pennies::Pennies;
    use rand::SeedableRng;

    #[test]
    fn rollout_value_matches_cell_probability() {
        let mut rng = SmallRng::seed_from_u64(17);
        let mut rollout = Rollout::default();
        // every joint action wins for P1 80% of the time
        let game = Pennies::from_percent(2, 2, &[80, 80, 80, 80]);
        let mean: f32 = (0..2000)
            .map(|_| {
                let mut state = game.clone();
                state.reseed(rng.gen());
                rollout.leaf(&state, &mut rng)
            })
            .sum::<f32>()
            / 2000.0;
        assert!((mean - 0.8).abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn step_limit_scores_a_tie() {
        let mut rng = SmallRng::seed_from_u64(17);
        let mut rollout = Rollout {
            max_steps: Some(0),
        };
        let game = Pennies::matching();
        assert_eq!(rollout.leaf(&game, &mut rng), 0.5);
    }
}
