//! A self-play reinforcement-learning engine for two-player
//! simultaneous-move stochastic games.
//!
//! Given an engine implementing [`game::Game`], the crate computes an
//! approximate Nash-equilibrium strategy at each decision point by
//! simultaneous-move Monte Carlo tree search: a joint bandit
//! ([`bandit`]) selects an action pair at every visited information set,
//! leaves are scored by an [`eval::Evaluator`], and the root visit and
//! value matrices are solved as a matrix game ([`matrix`]) to extract
//! mixed strategies. The self-play layer ([`selfplay`]) runs one worker
//! per thread, samples joint actions from the searched policies
//! ([`policy`]), and writes compressed per-episode training frames
//! ([`frame`]) to disk.
//!
//! The reference game is a compact Gen-1-flavoured duel
//! ([`games::duel`]) with the feature encoder ([`encode`]), Zobrist
//! hasher ([`hash`]) and neural evaluator bound to it.

pub mod bandit;
pub mod encode;
pub mod eval;
pub mod frame;
pub mod game;
pub mod games;
pub mod hash;
pub mod matrix;
pub mod policy;
pub mod search;
pub mod selfplay;
