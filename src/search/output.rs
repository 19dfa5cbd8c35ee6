use std::fmt;
use std::time::Duration;

use crate::game::{ActionSet, MAX_ACTIONS};

/// Everything a `search` call produces: the root visit and value matrices,
/// the empirical and Nash mixed strategies, and scalar value estimates.
///
/// A freshly constructed output is already well formed (uniform policies,
/// value one half, zero iterations) so a zero-budget search can hand it
/// back untouched.
#[derive(Clone, Debug)]
pub struct Output {
    pub m: u8,
    pub n: u8,
    pub p1_choices: ActionSet,
    pub p2_choices: ActionSet,

    pub visits: [[u32; MAX_ACTIONS]; MAX_ACTIONS],
    pub values: [[f64; MAX_ACTIONS]; MAX_ACTIONS],

    pub iterations: u64,
    pub duration: Duration,
    pub errors: u64,
    pub solver_failures: u64,

    pub empirical_value: f32,
    pub nash_value: f32,
    pub p1_empirical: [f32; MAX_ACTIONS],
    pub p2_empirical: [f32; MAX_ACTIONS],
    pub p1_nash: [f32; MAX_ACTIONS],
    pub p2_nash: [f32; MAX_ACTIONS],
}

impl Output {
    pub fn new(m: u8, n: u8, p1_choices: ActionSet, p2_choices: ActionSet) -> Self {
        debug_assert!(m >= 1 && n >= 1);
        let mut output = Self {
            m,
            n,
            p1_choices,
            p2_choices,
            visits: [[0; MAX_ACTIONS]; MAX_ACTIONS],
            values: [[0.0; MAX_ACTIONS]; MAX_ACTIONS],
            iterations: 0,
            duration: Duration::ZERO,
            errors: 0,
            solver_failures: 0,
            empirical_value: 0.5,
            nash_value: 0.5,
            p1_empirical: [0.0; MAX_ACTIONS],
            p2_empirical: [0.0; MAX_ACTIONS],
            p1_nash: [0.0; MAX_ACTIONS],
            p2_nash: [0.0; MAX_ACTIONS],
        };
        output.set_uniform();
        output
    }

    fn set_uniform(&mut self) {
        let (m, n) = (self.m as usize, self.n as usize);
        self.p1_empirical[..m].fill(1.0 / m as f32);
        self.p2_empirical[..n].fill(1.0 / n as f32);
        self.p1_nash = self.p1_empirical;
        self.p2_nash = self.p2_empirical;
    }

    pub fn total_visits(&self) -> u64 {
        let mut total = 0u64;
        for row in &self.visits[..self.m as usize] {
            for &v in &row[..self.n as usize] {
                total += v as u64;
            }
        }
        total
    }

    /// Mean value of a cell, guarded against unvisited cells.
    #[inline]
    pub fn cell_mean(&self, i: usize, j: usize) -> f64 {
        self.values[i][j] / self.visits[i][j].max(1) as f64
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (m, n) = (self.m as usize, self.n as usize);
        writeln!(
            f,
            "iterations: {}, time: {:.3}s, errors: {}",
            self.iterations,
            self.duration.as_secs_f64(),
            self.errors
        )?;
        writeln!(
            f,
            "value: {:.3} (nash {:.3})",
            self.empirical_value, self.nash_value
        )?;

        let row = |f: &mut fmt::Formatter<'_>, label: &str, data: &[f32]| {
            write!(f, "{label:>10}")?;
            for v in data {
                write!(f, " {v:>7.3}")?;
            }
            writeln!(f)
        };
        row(f, "p1 emp", &self.p1_empirical[..m])?;
        row(f, "p1 nash", &self.p1_nash[..m])?;
        row(f, "p2 emp", &self.p2_empirical[..n])?;
        row(f, "p2 nash", &self.p2_nash[..n])?;

        writeln!(f, "value / visits:")?;
        for i in 0..m {
            write!(f, "  ")?;
            for j in 0..n {
                if self.visits[i][j] == 0 {
                    write!(f, "   ----      ")?;
                } else {
                    write!(f, " {:5.3}/{:<6}", self.cell_mean(i, j), self.visits[i][j])?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_output_is_uniform_and_normalized() {
        let p1: ActionSet = [0u8, 1, 2].into_iter().collect();
        let p2: ActionSet = [0u8, 1].into_iter().collect();
        let output = Output::new(3, 2, p1, p2);
        assert_eq!(output.iterations, 0);
        let sum1: f32 = output.p1_empirical.iter().sum();
        let sum2: f32 = output.p2_nash.iter().sum();
        assert!((sum1 - 1.0).abs() < 1e-6);
        assert!((sum2 - 1.0).abs() < 1e-6);
        assert!((output.p1_empirical[0] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn cell_mean_survives_unvisited_cells() {
        let p1: ActionSet = [0u8].into_iter().collect();
        let output = Output::new(1, 1, p1, p1);
        assert_eq!(output.cell_mean(0, 0), 0.0);
    }
}
