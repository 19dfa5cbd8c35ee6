//! One search call: repeated descent of the state store with a bandit at
//! each joint information set, leaf evaluation, and backup, followed by a
//! final root matrix solve that turns the accumulated statistics into
//! mixed strategies.

use std::sync::atomic::Ordering;
use std::time::Instant;

use log::warn;
use rand::rngs::SmallRng;
use rand::Rng;

use super::store::{Node, Store, Table, MAX_DEPTH};
use super::{Budget, MatrixUcbParams, Output, RollOptions, FREE_ROLLS};
use crate::bandit::{sample_pdf, BanditParams, JointBandit};
use crate::eval::Evaluator;
use crate::game::{Game, Player, RollPair, MAX_ACTIONS};
use crate::matrix::{self, discretize};

/// A game state together with the status its last advance reported. The
/// status rides along because forced follow-ups (e.g. replacing a fainted
/// unit) change the legal sets without being visible in a fresh query.
#[derive(Clone, Debug)]
pub struct Position<G: Game> {
    pub game: G,
    pub status: crate::game::GameStatus,
}

impl<G: Game> Position<G> {
    pub fn new(game: G) -> Self {
        let status = game.status();
        Self { game, status }
    }
}

const LOWEST_ROLL: u8 = 217;
const MIDDLE_ROLL: u8 = 236;

/// Damage-roll byte for an `n_rolls` clamp, driven by one byte of the
/// engine's own entropy so different iterations see different rolls.
fn roll_byte(n_rolls: u8, entropy: u8) -> u8 {
    match n_rolls {
        FREE_ROLLS => 0,
        1 => MIDDLE_ROLL,
        n => {
            let step = 38 / (n - 1);
            LOWEST_ROLL + step * (entropy % n)
        }
    }
}

/// The per-worker search driver. Owns its working buffers and Matrix-UCB
/// scratch state; everything is reinitialized at each `run`.
pub struct Search {
    pub rolls: RollOptions,
    pub matrix_ucb: Option<MatrixUcbParams>,

    // matrix-ucb scratch
    initial_solve: bool,
    ucb_weight: f32,
    nash1: [f32; MAX_ACTIONS],
    nash2: [f32; MAX_ACTIONS],

    errors: u64,
    solver_failures: u64,
    total_depth: u64,
}

impl Search {
    pub fn new(rolls: RollOptions, matrix_ucb: Option<MatrixUcbParams>) -> Self {
        Self {
            rolls,
            matrix_ucb,
            initial_solve: false,
            ucb_weight: 0.0,
            nash1: [0.0; MAX_ACTIONS],
            nash2: [0.0; MAX_ACTIONS],
            errors: 0,
            solver_failures: 0,
            total_depth: 0,
        }
    }

    /// Mean leaf depth over the last run's iterations.
    pub fn mean_depth(&self, iterations: u64) -> f64 {
        self.total_depth as f64 / iterations.max(1) as f64
    }

    pub fn run<G: Game, E: Evaluator<G>>(
        &mut self,
        rng: &mut SmallRng,
        budget: &Budget,
        params: &BanditParams,
        store: &mut Store<G>,
        eval: &mut E,
        position: &Position<G>,
    ) -> Output {
        debug_assert!(!position.status.is_over());
        self.initial_solve = false;
        self.errors = 0;
        self.solver_failures = 0;
        self.total_depth = 0;

        let p1_choices = position.game.legal(Player::P1);
        let p2_choices = position.game.legal(Player::P2);
        let mut output = Output::new(p1_choices.len(), p2_choices.len(), p1_choices, p2_choices);
        self.ucb_weight = (2.0 * output.m as f32 * output.n as f32).ln();

        eval.prepare_root(&position.game);

        let start = Instant::now();
        match budget {
            Budget::Iterations(count) => {
                for _ in 0..*count {
                    self.root_iteration(rng, params, store, eval, position, &mut output);
                    output.iterations += 1;
                }
            }
            Budget::Duration(limit) => {
                while start.elapsed() < *limit {
                    self.root_iteration(rng, params, store, eval, position, &mut output);
                    output.iterations += 1;
                }
            }
            Budget::Flag(flag) => {
                while flag.load(Ordering::Relaxed) {
                    self.root_iteration(rng, params, store, eval, position, &mut output);
                    output.iterations += 1;
                }
            }
        }
        output.duration = start.elapsed();
        output.errors = self.errors;

        self.assemble(&mut output);
        output
    }

    fn root_iteration<G: Game, E: Evaluator<G>>(
        &mut self,
        rng: &mut SmallRng,
        params: &BanditParams,
        store: &mut Store<G>,
        eval: &mut E,
        position: &Position<G>,
        output: &mut Output,
    ) {
        let mut copy = position.clone();
        copy.game.reseed(rng.gen());
        copy.game.randomize_hidden();

        if let Some(mu) = self.matrix_ucb {
            if output.iterations >= mu.delay as u64 {
                if let Some((i, j)) = self.solve_root_and_sample(rng, &mu, output) {
                    self.matrix_root_step(rng, params, store, eval, &mut copy, output, i, j);
                    return;
                }
            }
        }

        match store {
            Store::Tree(root) => {
                self.iterate_tree(rng, params, root, eval, &mut copy, 0, output);
            }
            Store::Table(table) => {
                self.iterate_table(rng, params, table, eval, &mut copy, 0, output);
            }
        }
    }

    /// Matrix-UCB root step: the root bandit is bypassed, the joint action
    /// comes from the cached Nash strategies, and the value accumulates
    /// straight into the root matrices.
    #[allow(clippy::too_many_arguments)]
    fn matrix_root_step<G: Game, E: Evaluator<G>>(
        &mut self,
        rng: &mut SmallRng,
        params: &BanditParams,
        store: &mut Store<G>,
        eval: &mut E,
        copy: &mut Position<G>,
        output: &mut Output,
        i: u8,
        j: u8,
    ) {
        let c1 = output.p1_choices.get(i as usize);
        let c2 = output.p2_choices.get(j as usize);
        let rolls = self.roll_pair(&copy.game, 0);
        copy.status = copy.game.advance(c1, c2, rolls);

        let (v1, _) = if let Some(scores) = copy.status.scores() {
            scores
        } else {
            match store {
                Store::Tree(root) => {
                    let obs = copy.game.obs();
                    let child = root
                        .children
                        .entry((i, j, obs))
                        .or_insert_with(|| Node::new(params));
                    self.iterate_tree(rng, params, child, eval, copy, 1, output)
                }
                Store::Table(table) => self.iterate_table(rng, params, table, eval, copy, 1, output),
            }
        };

        output.visits[i as usize][j as usize] += 1;
        output.values[i as usize][j as usize] += v1 as f64;
    }

    fn iterate_tree<G: Game, E: Evaluator<G>>(
        &mut self,
        rng: &mut SmallRng,
        params: &BanditParams,
        node: &mut Node<G::Obs>,
        eval: &mut E,
        position: &mut Position<G>,
        depth: usize,
        output: &mut Output,
    ) -> (f32, f32) {
        if !node.stats.is_init() {
            self.total_depth += depth as u64;
            if let Some(scores) = position.status.scores() {
                return scores;
            }
            return expand_leaf(rng, params, &mut node.stats, eval, position);
        }

        let picks = node.stats.select(rng, params);
        let p1_legal = position.game.legal(Player::P1);
        let p2_legal = position.game.legal(Player::P2);
        let c1 = p1_legal.get((picks.p1.index as usize).min(p1_legal.len() as usize - 1));
        let c2 = p2_legal.get((picks.p2.index as usize).min(p2_legal.len() as usize - 1));
        let rolls = self.roll_pair(&position.game, depth);
        position.status = position.game.advance(c1, c2, rolls);

        let value = if let Some(scores) = position.status.scores() {
            self.total_depth += depth as u64 + 1;
            scores
        } else {
            let obs = position.game.obs();
            let child = node
                .children
                .entry((picks.p1.index, picks.p2.index, obs))
                .or_insert_with(|| Node::new(params));
            self.iterate_tree(rng, params, child, eval, position, depth + 1, output)
        };

        if depth == 0 {
            output.visits[picks.p1.index as usize][picks.p2.index as usize] += 1;
            output.values[picks.p1.index as usize][picks.p2.index as usize] += value.0 as f64;
        }
        node.stats.update(picks, value.0, value.1);
        value
    }

    fn iterate_table<G: Game, E: Evaluator<G>>(
        &mut self,
        rng: &mut SmallRng,
        params: &BanditParams,
        table: &mut Table<G>,
        eval: &mut E,
        position: &mut Position<G>,
        depth: usize,
        output: &mut Output,
    ) -> (f32, f32) {
        if depth >= MAX_DEPTH {
            // A cycle in the hashed graph: force the engine to wind down and
            // score the iteration as a tie.
            position.game.cap_turn_counter();
            self.errors += 1;
            return (0.5, 0.5);
        }

        let hash = table.hash(&position.game);
        let picks = {
            let stats = table.fetch(hash, params);
            if stats.is_init() {
                Some(stats.select(rng, params))
            } else {
                None
            }
        };

        let Some(picks) = picks else {
            self.total_depth += depth as u64;
            if let Some(scores) = position.status.scores() {
                return scores;
            }
            let stats = table.entries.get_mut(&hash).expect("entry just fetched");
            return expand_leaf(rng, params, stats, eval, position);
        };

        let p1_legal = position.game.legal(Player::P1);
        let p2_legal = position.game.legal(Player::P2);
        // A hash collision can pair this entry with a state of different
        // shape; clamping keeps the token lookup in range.
        let c1 = p1_legal.get((picks.p1.index as usize).min(p1_legal.len() as usize - 1));
        let c2 = p2_legal.get((picks.p2.index as usize).min(p2_legal.len() as usize - 1));
        let rolls = self.roll_pair(&position.game, depth);
        position.status = position.game.advance(c1, c2, rolls);

        let value = if let Some(scores) = position.status.scores() {
            self.total_depth += depth as u64 + 1;
            scores
        } else {
            self.iterate_table(rng, params, table, eval, position, depth + 1, output)
        };

        if depth == 0 {
            output.visits[picks.p1.index as usize][picks.p2.index as usize] += 1;
            output.values[picks.p1.index as usize][picks.p2.index as usize] += value.0 as f64;
        }
        let stats = table.entries.get_mut(&hash).expect("entry just fetched");
        stats.update(picks, value.0, value.1);
        value
    }

    fn roll_pair<G: Game>(&self, game: &G, depth: usize) -> RollPair {
        if !self.rolls.clamping() {
            return RollPair::default();
        }
        let n_rolls = if depth == 0 {
            self.rolls.root_rolls
        } else {
            self.rolls.other_rolls
        };
        let (e1, e2) = game.roll_entropy();
        RollPair {
            p1: roll_byte(n_rolls, e1),
            p2: roll_byte(n_rolls, e2),
        }
    }

    /// Build the optimistic/pessimistic UCB matrices, re-solve on schedule,
    /// and sample a root joint action from the cached Nash strategies.
    /// `None` falls back to an ordinary bandit iteration.
    fn solve_root_and_sample(
        &mut self,
        rng: &mut SmallRng,
        mu: &MatrixUcbParams,
        output: &Output,
    ) -> Option<(u8, u8)> {
        let (m, n) = (output.m as usize, output.n as usize);
        let periodic = output.iterations % mu.interval as u64 == 0;
        if periodic || !self.initial_solve {
            let log_t = (output.iterations.max(1) as f32).ln();
            let mut p1_cells = [0i32; MAX_ACTIONS * MAX_ACTIONS];
            let mut p2_cells = [0i32; MAX_ACTIONS * MAX_ACTIONS];
            for i in 0..m {
                for j in 0..n {
                    let visits = output.visits[i][j];
                    if visits < mu.minimum {
                        return Some((i as u8, j as u8));
                    }
                    let (mut e1, mut e2) = if visits > 0 {
                        let mean = output.cell_mean(i, j) as f32;
                        (mean, mean)
                    } else {
                        (0.0, 1.0)
                    };
                    let explore =
                        mu.c * (2.0 * (2.0 * log_t + self.ucb_weight) / (visits + 1) as f32).sqrt();
                    e1 += explore;
                    e2 -= explore;
                    p1_cells[i * n + j] = discretize(e1);
                    p2_cells[i * n + j] = discretize(e2);
                }
            }

            let optimistic = matrix::solve(m, n, &p1_cells[..m * n]);
            let pessimistic = matrix::solve(m, n, &p2_cells[..m * n]);
            match (optimistic, pessimistic) {
                (Ok(for_p1), Ok(for_p2)) => {
                    self.nash1 = for_p1.p1;
                    self.nash2 = for_p2.p2;
                    self.initial_solve = true;
                }
                (r1, r2) => {
                    self.solver_failures += 1;
                    warn!(
                        "matrix-ucb solve failed (p1: {:?}, p2: {:?})",
                        r1.err(),
                        r2.err()
                    );
                    if !self.initial_solve {
                        return None;
                    }
                }
            }
        }

        let i = sample_pdf(&self.nash1[..m], rng);
        let j = sample_pdf(&self.nash2[..n], rng);
        Some((i as u8, j as u8))
    }

    /// Turn the root matrices into the final empirical and Nash policies.
    fn assemble(&mut self, output: &mut Output) {
        output.solver_failures = self.solver_failures;
        let (m, n) = (output.m as usize, output.n as usize);
        let total_visits = output.total_visits();
        if total_visits == 0 {
            // Nothing accumulated (zero budget, or a single iteration that
            // only initialized the root): keep the uniform construction.
            return;
        }

        let mut p1 = [0f32; MAX_ACTIONS];
        let mut p2 = [0f32; MAX_ACTIONS];
        let mut total_value = 0f64;
        let mut cells = [0i32; MAX_ACTIONS * MAX_ACTIONS];
        for i in 0..m {
            for j in 0..n {
                let visits = output.visits[i][j];
                total_value += output.values[i][j];
                p1[i] += visits as f32;
                p2[j] += visits as f32;
                cells[i * n + j] = discretize(output.cell_mean(i, j) as f32);
            }
        }
        for mass in &mut p1[..m] {
            *mass /= total_visits as f32;
        }
        for mass in &mut p2[..n] {
            *mass /= total_visits as f32;
        }
        output.p1_empirical = p1;
        output.p2_empirical = p2;
        output.empirical_value = (total_value / total_visits as f64) as f32;

        match matrix::solve(m, n, &cells[..m * n]) {
            Ok(solution) => {
                output.p1_nash = solution.p1;
                output.p2_nash = solution.p2;
                output.nash_value = solution.value.clamp(0.0, 1.0);
            }
            Err(error) => {
                warn!("root matrix solve failed: {error}");
                output.solver_failures += 1;
                output.p1_nash = output.p1_empirical;
                output.p2_nash = output.p2_empirical;
                output.nash_value = output.empirical_value;
            }
        }
    }
}

/// Initialize a leaf's bandit from the engine's legal counts and evaluate
/// it, absorbing policy logits when the bandit wants them.
fn expand_leaf<G: Game, E: Evaluator<G>>(
    rng: &mut SmallRng,
    params: &BanditParams,
    stats: &mut JointBandit,
    eval: &mut E,
    position: &Position<G>,
) -> (f32, f32) {
    let p1_legal = position.game.legal(Player::P1);
    let p2_legal = position.game.legal(Player::P2);
    assert!(
        !p1_legal.is_empty() && !p2_legal.is_empty(),
        "engine reported an ongoing state with no legal actions"
    );
    stats.init(p1_legal.len(), p2_legal.len());

    let value = if params.wants_logits() {
        let mut logits1 = [0f32; MAX_ACTIONS];
        let mut logits2 = [0f32; MAX_ACTIONS];
        match eval.policy(
            &position.game,
            &p1_legal,
            &p2_legal,
            &mut logits1,
            &mut logits2,
        ) {
            Some(value) => {
                stats.absorb_logits(params, &logits1, &logits2);
                value
            }
            None => eval.leaf(&position.game, rng),
        }
    } else {
        eval.leaf(&position.game, rng)
    };
    (value, 1.0 - value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Rollout;
    use crate::games::pennies::Pennies;

    fn search() -> Search {
        Search::new(RollOptions::new(FREE_ROLLS, FREE_ROLLS).unwrap(), None)
    }

    fn run_pennies(
        game: Pennies,
        budget: Budget,
        params: BanditParams,
        use_table: bool,
        matrix_ucb: Option<MatrixUcbParams>,
        seed: u64,
    ) -> Output {
        use rand::SeedableRng;
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut store = Store::new(&params, use_table, 1);
        let mut eval = Rollout::default();
        let mut driver = search();
        driver.matrix_ucb = matrix_ucb;
        let position = Position::new(game);
        driver.run(&mut rng, &budget, &params, &mut store, &mut eval, &position)
    }

    #[test]
    fn zero_duration_budget_yields_uniform_output() {
        let output = run_pennies(
            Pennies::matching(),
            Budget::Duration(std::time::Duration::ZERO),
            BanditParams::Ucb { c: 1.0 },
            false,
            None,
            1,
        );
        assert_eq!(output.iterations, 0);
        assert!((output.p1_empirical[0] - 0.5).abs() < 1e-6);
        assert!((output.nash_value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_iteration_yields_uniform_policies() {
        let output = run_pennies(
            Pennies::matching(),
            Budget::Iterations(1),
            BanditParams::Ucb { c: 1.0 },
            false,
            None,
            2,
        );
        assert_eq!(output.iterations, 1);
        for i in 0..2 {
            assert!((output.p1_empirical[i] - 0.5).abs() < 1e-6);
            assert!((output.p2_empirical[i] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn policies_normalize_after_search() {
        for use_table in [false, true] {
            let output = run_pennies(
                Pennies::matching(),
                Budget::Iterations(512),
                BanditParams::Exp3 { gamma: 0.1 },
                use_table,
                None,
                3,
            );
            let sums = [
                output.p1_empirical.iter().sum::<f32>(),
                output.p2_empirical.iter().sum::<f32>(),
                output.p1_nash.iter().sum::<f32>(),
                output.p2_nash.iter().sum::<f32>(),
            ];
            for sum in sums {
                assert!((sum - 1.0).abs() < 1e-5, "sum {sum}");
            }
            // every iteration after the initializing one lands in exactly
            // one root cell
            assert_eq!(output.total_visits(), output.iterations - 1);
        }
    }

    #[test]
    fn dominated_game_converges_to_winning_row() {
        // Row 0 wins 90% against either column; row 1 wins 10%.
        let game = Pennies::from_percent(2, 2, &[90, 90, 10, 10]);
        let output = run_pennies(
            game,
            Budget::Iterations(4096),
            BanditParams::Ucb { c: 1.0 },
            false,
            None,
            4,
        );
        assert!(output.p1_empirical[0] > 0.7, "{}", output.p1_empirical[0]);
        assert!(
            (output.empirical_value - 0.9).abs() < 0.1,
            "{}",
            output.empirical_value
        );
    }

    #[test]
    fn matching_pennies_nash_is_mixed() {
        let output = run_pennies(
            Pennies::matching(),
            Budget::Iterations(8192),
            BanditParams::Exp3 { gamma: 0.05 },
            false,
            None,
            5,
        );
        assert!((output.nash_value - 0.5).abs() < 0.1);
        assert!(output.p1_nash[0] > 0.25 && output.p1_nash[0] < 0.75);
    }

    #[test]
    fn matrix_ucb_smoke() {
        let output = run_pennies(
            Pennies::matching(),
            Budget::Iterations(2048),
            BanditParams::Ucb { c: 1.0 },
            false,
            Some(MatrixUcbParams {
                delay: 128,
                interval: 32,
                minimum: 1,
                c: 1.0,
            }),
            6,
        );
        assert_eq!(output.iterations, 2048);
        assert!((output.empirical_value - 0.5).abs() < 0.15);
    }

    #[test]
    fn forced_move_is_deterministic() {
        let game = Pennies::from_percent(1, 1, &[70]);
        let output = run_pennies(
            game,
            Budget::Iterations(256),
            BanditParams::Ucb { c: 1.0 },
            false,
            None,
            7,
        );
        assert_eq!(output.m, 1);
        assert_eq!(output.n, 1);
        assert_eq!(output.p1_nash[0], 1.0);
        assert!((output.empirical_value - 0.7).abs() < 0.12);
    }

    #[test]
    fn flag_budget_stops_immediately_when_cleared() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        let flag = Arc::new(AtomicBool::new(false));
        let output = run_pennies(
            Pennies::matching(),
            Budget::Flag(flag),
            BanditParams::Ucb { c: 1.0 },
            false,
            None,
            8,
        );
        assert_eq!(output.iterations, 0);
    }
}
