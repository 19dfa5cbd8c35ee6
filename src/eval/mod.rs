//! Leaf-value estimation at search frontiers.
//!
//! Three estimators share one seam: uniform Monte Carlo rollouts, a
//! hand-tuned positional heuristic, and a two-stage neural network with a
//! cached sub-embedding per reserve unit. The worker picks one per run
//! from the evaluator spec (`mc`, `fp`, or a weights path) and the search
//! driver talks to it through [`Evaluator`].

mod cache;
mod heuristic;
mod nn;
mod rollout;

pub use cache::EmbedCache;
pub use heuristic::Heuristic;
pub use nn::{Affine, EmbeddingNet, MainNet, Network, ACTION_VOCAB};
pub use rollout::Rollout;

use rand::rngs::SmallRng;

use crate::game::{ActionSet, Game, MAX_ACTIONS};
use crate::games::duel::Duel;

/// Leaf evaluation, and optionally joint policy priors, for a game.
///
/// `leaf` returns P1's value in `[0, 1]`. Estimators that can also produce
/// policy logits aligned with the legal-action order implement `policy`;
/// the driver only asks for it when the bandit wants priors.
pub trait Evaluator<G: Game> {
    /// Called once per episode, before the first search.
    fn prepare_episode(&mut self, _root: &G) {}

    /// Called at the start of every search.
    fn prepare_root(&mut self, _root: &G) {}

    fn leaf(&mut self, state: &G, rng: &mut SmallRng) -> f32;

    /// Value plus policy logits over the legal sets, or `None` when this
    /// estimator has no policy head.
    fn policy(
        &mut self,
        _state: &G,
        _p1_legal: &ActionSet,
        _p2_legal: &ActionSet,
        _logits1: &mut [f32; MAX_ACTIONS],
        _logits2: &mut [f32; MAX_ACTIONS],
    ) -> Option<f32> {
        None
    }
}

/// The evaluator variants available to a duel worker, behind one tag so a
/// worker's configuration is a plain value.
pub enum DuelEval {
    Rollout(Rollout),
    Heuristic(Heuristic),
    Network(Box<Network>),
}

impl DuelEval {
    /// Parse an evaluator spec: `mc` for rollouts, `fp` for the positional
    /// heuristic, anything else is a path to network weights.
    pub fn from_spec(spec: &str) -> anyhow::Result<Self> {
        match spec {
            "mc" => Ok(DuelEval::Rollout(Rollout::default())),
            "fp" => Ok(DuelEval::Heuristic(Heuristic::default())),
            path => {
                let network = Network::load(std::path::Path::new(path))?;
                Ok(DuelEval::Network(Box::new(network)))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DuelEval::Rollout(_) => "mc",
            DuelEval::Heuristic(_) => "fp",
            DuelEval::Network(_) => "nn",
        }
    }
}

impl Evaluator<Duel> for DuelEval {
    fn prepare_episode(&mut self, root: &Duel) {
        match self {
            DuelEval::Rollout(e) => Evaluator::<Duel>::prepare_episode(e, root),
            DuelEval::Heuristic(e) => e.prepare_episode(root),
            DuelEval::Network(e) => e.prepare_episode(root),
        }
    }

    fn prepare_root(&mut self, root: &Duel) {
        match self {
            DuelEval::Rollout(e) => Evaluator::<Duel>::prepare_root(e, root),
            DuelEval::Heuristic(e) => e.prepare_root(root),
            DuelEval::Network(e) => e.prepare_root(root),
        }
    }

    fn leaf(&mut self, state: &Duel, rng: &mut SmallRng) -> f32 {
        match self {
            DuelEval::Rollout(e) => e.leaf(state, rng),
            DuelEval::Heuristic(e) => e.leaf(state, rng),
            DuelEval::Network(e) => e.leaf(state, rng),
        }
    }

    fn policy(
        &mut self,
        state: &Duel,
        p1_legal: &ActionSet,
        p2_legal: &ActionSet,
        logits1: &mut [f32; MAX_ACTIONS],
        logits2: &mut [f32; MAX_ACTIONS],
    ) -> Option<f32> {
        match self {
            DuelEval::Rollout(_) | DuelEval::Heuristic(_) => None,
            DuelEval::Network(e) => e.policy(state, p1_legal, p2_legal, logits1, logits2),
        }
    }
}
