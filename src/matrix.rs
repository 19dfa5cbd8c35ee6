//! Mixed-strategy extraction from a zero-sum value matrix.
//!
//! Solves the m x n matrix game (payoffs to the row player, 1 <= m, n <= 9)
//! by the pivot method of Williams' *The Compleat Strategyst*: augment the
//! payoff matrix into a schema, pivot until the bottom margin is
//! non-negative, then read both mixed strategies off the margins. Inputs
//! are discretized to integers at a fixed scale before solving so identical
//! value matrices always produce identical schemas.
//!
//! Failure is an ordinary value here: the caller falls back to the
//! empirical visit distribution and reports the event.

use ndarray::{s, Array2, Axis};
use ordered_float::OrderedFloat;

use crate::game::MAX_ACTIONS;

/// Fixed discretization scale for solver inputs.
pub const SCALE: i32 = 256;

/// Pivot budget; reduction on a 9x9 schema takes far fewer, so hitting
/// this means the schema is cycling.
const MAX_PIVOTS: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveError {
    PivotLimit,
    Degenerate,
    BadShape,
}

impl std::fmt::Display for SolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveError::PivotLimit => write!(f, "pivot limit exceeded"),
            SolveError::Degenerate => write!(f, "degenerate schema"),
            SolveError::BadShape => write!(f, "matrix dimensions outside 1..=9"),
        }
    }
}

impl std::error::Error for SolveError {}

/// Maximin strategy for the row player, minimax strategy for the column
/// player, and the value of the game. Strategy mass beyond `m` (resp. `n`)
/// is zero.
#[derive(Clone, Copy, Debug)]
pub struct Solution {
    pub value: f32,
    pub p1: [f32; MAX_ACTIONS],
    pub p2: [f32; MAX_ACTIONS],
}

#[inline]
pub fn discretize(x: f32) -> i32 {
    (x * SCALE as f32) as i32
}

/// Solve an m x n zero-sum game given row-major discretized payoffs.
pub fn solve(m: usize, n: usize, cells: &[i32]) -> Result<Solution, SolveError> {
    if m < 1 || n < 1 || m > MAX_ACTIONS || n > MAX_ACTIONS || cells.len() < m * n {
        return Err(SolveError::BadShape);
    }

    let payoff = |i: usize, j: usize| cells[i * n + j] as f64 / SCALE as f64;

    // Forced-move games are trivial and common; skip the schema entirely.
    if m == 1 {
        let (j, value) = (0..n)
            .map(|j| (j, payoff(0, j)))
            .min_by_key(|&(_, v)| OrderedFloat(v))
            .unwrap();
        return Ok(pure(0, j, value));
    }
    if n == 1 {
        let (i, value) = (0..m)
            .map(|i| (i, payoff(i, 0)))
            .max_by_key(|&(_, v)| OrderedFloat(v))
            .unwrap();
        return Ok(pure(i, 0, value));
    }

    // A constant matrix (every cell the same after discretization) makes
    // every strategy optimal; the schema method reports it as degenerate,
    // so answer it directly with the uniform pair.
    if cells[..m * n].iter().all(|&c| c == cells[0]) {
        let mut solution = Solution {
            value: payoff(0, 0) as f32,
            p1: [0.0; MAX_ACTIONS],
            p2: [0.0; MAX_ACTIONS],
        };
        solution.p1[..m].fill(1.0 / m as f32);
        solution.p2[..n].fill(1.0 / n as f32);
        return Ok(solution);
    }

    let mut schema = Schema::new(m, n, payoff);
    let mut pivots = 0;
    while let Some(pivot) = schema.find_pivot() {
        if pivots >= MAX_PIVOTS {
            return Err(SolveError::PivotLimit);
        }
        schema.reduce(pivot);
        pivots += 1;
    }
    schema.solution()
}

fn pure(i: usize, j: usize, value: f64) -> Solution {
    let mut solution = Solution {
        value: value as f32,
        p1: [0.0; MAX_ACTIONS],
        p2: [0.0; MAX_ACTIONS],
    };
    solution.p1[i] = 1.0;
    solution.p2[j] = 1.0;
    solution
}

/// The augmented payoff schema. Row/column strategy names migrate between
/// the four margins as pivots exchange basic and non-basic variables.
struct Schema {
    offset: f64,
    d: f64,
    left: Vec<Option<usize>>,
    top: Vec<Option<usize>>,
    right: Vec<Option<usize>>,
    bottom: Vec<Option<usize>>,
    payoffs: Array2<f64>,
}

impl Schema {
    fn new(m: usize, n: usize, payoff: impl Fn(usize, usize) -> f64) -> Self {
        let mut payoffs = Array2::zeros((m + 1, n + 1));
        for i in 0..m {
            for j in 0..n {
                payoffs[(i, j)] = payoff(i, j);
            }
            payoffs[(i, n)] = 1.0;
        }
        for j in 0..n {
            payoffs[(m, j)] = -1.0;
        }

        // Shift all payoffs non-negative; the shift is undone when the game
        // value is read back out.
        let offset = payoffs
            .slice(s![..-1, ..-1])
            .iter()
            .cloned()
            .map(OrderedFloat)
            .min()
            .unwrap()
            .into_inner();
        for p in payoffs.slice_mut(s![..-1, ..-1]).iter_mut() {
            *p -= offset;
        }

        Schema {
            offset,
            d: 1.0,
            left: (0..m).map(Some).collect(),
            top: (0..n).map(Some).collect(),
            right: vec![None; m],
            bottom: vec![None; n],
            payoffs,
        }
    }

    fn find_pivot(&self) -> Option<(usize, usize)> {
        let ps = self.payoffs.slice(s![..-1, ..-1]);
        let (bot, right) = ps.dim();
        ps.axis_iter(Axis(1))
            .enumerate()
            .filter_map(|(c, col)| {
                if self.payoffs[(bot, c)] >= 0.0 {
                    return None;
                }
                col.iter()
                    .enumerate()
                    .filter(|&(_, &p)| p > 0.0)
                    .map(|(r, &p)| {
                        let rp = self.payoffs[(r, right)];
                        let cp = self.payoffs[(bot, c)];
                        ((r, c), -rp * cp / p)
                    })
                    .min_by_key(|&(_, p)| OrderedFloat(p))
            })
            .max_by_key(|&(_, p)| OrderedFloat(p))
            .map(|(p, _)| p)
    }

    fn reduce(&mut self, (pr, pc): (usize, usize)) {
        let (nr, nc) = self.payoffs.dim();
        let p = self.payoffs[(pr, pc)];
        let d = self.d;
        for r in 0..nr {
            for c in 0..nc {
                if r == pr || c == pc {
                    continue;
                }
                let n = self.payoffs[(r, c)];
                let same_col = self.payoffs[(r, pc)];
                let same_row = self.payoffs[(pr, c)];
                self.payoffs[(r, c)] = (n * p - same_col * same_row) / d;
            }
        }
        for r in 0..nr {
            self.payoffs[(r, pc)] = -self.payoffs[(r, pc)];
        }
        self.payoffs[(pr, pc)] = d;
        self.d = p;

        std::mem::swap(&mut self.left[pr], &mut self.bottom[pc]);
        std::mem::swap(&mut self.right[pr], &mut self.top[pc]);
    }

    fn solution(&self) -> Result<Solution, SolveError> {
        let m = self.left.len();
        let n = self.top.len();

        let mut p1 = [0f32; MAX_ACTIONS];
        let mut total1 = 0.0;
        for (r, name) in self.right.iter().enumerate() {
            if let Some(strategy) = name {
                let mass = self.payoffs[(r, n)];
                if mass < 0.0 {
                    return Err(SolveError::Degenerate);
                }
                p1[*strategy] = mass as f32;
                total1 += mass;
            }
        }

        let mut p2 = [0f32; MAX_ACTIONS];
        let mut total2 = 0.0;
        for (c, name) in self.bottom.iter().enumerate() {
            if let Some(strategy) = name {
                let mass = self.payoffs[(m, c)];
                if mass < 0.0 {
                    return Err(SolveError::Degenerate);
                }
                p2[*strategy] = mass as f32;
                total2 += mass;
            }
        }

        let v = self.payoffs[(m, n)];
        if total1 <= 0.0 || total2 <= 0.0 || v <= 0.0 {
            return Err(SolveError::Degenerate);
        }

        for mass in &mut p1 {
            *mass /= total1 as f32;
        }
        for mass in &mut p2 {
            *mass /= total2 as f32;
        }

        Ok(Solution {
            value: (self.d / v + self.offset) as f32,
            p1,
            p2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(m: usize, n: usize, values: &[f32]) -> Vec<i32> {
        assert_eq!(values.len(), m * n);
        values.iter().map(|&v| discretize(v)).collect()
    }

    #[test]
    fn matching_pennies_is_uniform() {
        let cells = cells(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let solution = solve(2, 2, &cells).unwrap();
        assert!((solution.value - 0.5).abs() < 0.01);
        for i in 0..2 {
            assert!((solution.p1[i] - 0.5).abs() < 0.01);
            assert!((solution.p2[i] - 0.5).abs() < 0.01);
        }
    }

    #[test]
    fn rock_paper_scissors_is_uniform() {
        #[rustfmt::skip]
        let cells = cells(3, 3, &[
            0.5, 1.0, 0.0,
            0.0, 0.5, 1.0,
            1.0, 0.0, 0.5,
        ]);
        let solution = solve(3, 3, &cells).unwrap();
        assert!((solution.value - 0.5).abs() < 0.01);
        for i in 0..3 {
            assert!((solution.p1[i] - 1.0 / 3.0).abs() < 0.02);
            assert!((solution.p2[i] - 1.0 / 3.0).abs() < 0.02);
        }
    }

    #[test]
    fn dominant_row_is_pure() {
        #[rustfmt::skip]
        let cells = cells(2, 2, &[
            0.9, 0.8,
            0.2, 0.1,
        ]);
        let solution = solve(2, 2, &cells).unwrap();
        assert!((solution.value - 0.8).abs() < 0.01);
        assert!(solution.p1[0] > 0.99);
        assert!(solution.p2[1] > 0.99);
    }

    #[test]
    fn forced_moves_are_trivial() {
        let row = cells(1, 3, &[0.2, 0.7, 0.4]);
        let solution = solve(1, 3, &row).unwrap();
        assert_eq!(solution.p1[0], 1.0);
        assert_eq!(solution.p2[0], 1.0);
        assert!((solution.value - 0.2).abs() < 0.01);

        let col = cells(3, 1, &[0.2, 0.7, 0.4]);
        let solution = solve(3, 1, &col).unwrap();
        assert_eq!(solution.p2[0], 1.0);
        assert_eq!(solution.p1[1], 1.0);
        assert!((solution.value - 0.7).abs() < 0.01);
    }

    #[test]
    fn strategies_always_normalize() {
        #[rustfmt::skip]
        let cells = cells(3, 2, &[
            0.31, 0.77,
            0.52, 0.48,
            0.95, 0.03,
        ]);
        let solution = solve(3, 2, &cells).unwrap();
        let sum1: f32 = solution.p1.iter().sum();
        let sum2: f32 = solution.p2.iter().sum();
        assert!((sum1 - 1.0).abs() < 1e-5);
        assert!((sum2 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn constant_matrix_solves_uniform() {
        let cells = cells(3, 3, &[0.5; 9]);
        let solution = solve(3, 3, &cells).unwrap();
        assert!((solution.value - 0.5).abs() < 0.01);
        for i in 0..3 {
            assert!((solution.p1[i] - 1.0 / 3.0).abs() < 1e-6);
            assert!((solution.p2[i] - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(matches!(solve(0, 2, &[0; 4]), Err(SolveError::BadShape)));
        assert!(matches!(solve(10, 2, &[0; 20]), Err(SolveError::BadShape)));
        assert!(matches!(solve(2, 2, &[0; 3]), Err(SolveError::BadShape)));
    }
}
