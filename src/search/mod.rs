//! The simultaneous-move MCTS engine: per-node stores, the iteration
//! driver, and the knobs a worker configures a search with.

mod driver;
mod output;
mod store;

pub use driver::{Position, Search};
pub use output::Output;
pub use store::{Node, Store, Table, MAX_DEPTH};

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// When a single `search` call stops. All three modes produce the same
/// output shape; only the stopping condition differs.
#[derive(Clone, Debug)]
pub enum Budget {
    Iterations(u64),
    Duration(Duration),
    /// Runs until the caller clears the flag.
    Flag(Arc<AtomicBool>),
}

impl Budget {
    pub fn flag(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Relaxed);
        Budget::Flag(flag)
    }
}

impl FromStr for Budget {
    type Err = String;

    /// `"65536"` iterations, `"250ms"` or `"2s"` wall clock.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let bad = || format!("bad search budget `{spec}`");
        if let Some(millis) = spec.strip_suffix("ms") {
            let millis: u64 = millis.parse().map_err(|_| bad())?;
            Ok(Budget::Duration(Duration::from_millis(millis)))
        } else if let Some(secs) = spec.strip_suffix('s') {
            let secs: u64 = secs.parse().map_err(|_| bad())?;
            Ok(Budget::Duration(Duration::from_secs(secs)))
        } else {
            let iterations: u64 = spec.parse().map_err(|_| bad())?;
            Ok(Budget::Iterations(iterations))
        }
    }
}

impl std::fmt::Display for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Budget::Iterations(n) => write!(f, "{n}"),
            Budget::Duration(d) => write!(f, "{}ms", d.as_millis()),
            Budget::Flag(_) => write!(f, "flag"),
        }
    }
}

/// Damage-roll clamp counts for root and interior depths. `1` pins the
/// middle roll, `2`, `3` and `20` sample that many evenly spaced rolls from
/// the engine's own entropy, `39` leaves the engine roll untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RollOptions {
    pub root_rolls: u8,
    pub other_rolls: u8,
}

pub const FREE_ROLLS: u8 = 39;

impl RollOptions {
    pub fn new(root_rolls: u8, other_rolls: u8) -> Result<Self, String> {
        for rolls in [root_rolls, other_rolls] {
            if !matches!(rolls, 1 | 2 | 3 | 20 | FREE_ROLLS) {
                return Err(format!("roll count {rolls} not one of 1, 2, 3, 20, 39"));
            }
        }
        Ok(Self {
            root_rolls,
            other_rolls,
        })
    }

    /// Whether any clamping happens at all.
    #[inline]
    pub fn clamping(&self) -> bool {
        self.root_rolls != FREE_ROLLS || self.other_rolls != FREE_ROLLS
    }

    /// Depth-dependent clamping is only in play when the two counts differ.
    #[inline]
    pub fn depth_dependent(&self) -> bool {
        self.root_rolls != self.other_rolls
    }
}

impl Default for RollOptions {
    fn default() -> Self {
        Self {
            root_rolls: 3,
            other_rolls: 1,
        }
    }
}

/// Root-level Matrix-UCB: after `delay` iterations the root joint action is
/// sampled from the Nash solution of the current value matrix, re-solved
/// every `interval` iterations, with every cell forced to `minimum` visits
/// first. `c` scales the optimistic/pessimistic confidence widths.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatrixUcbParams {
    pub delay: u32,
    pub interval: u32,
    pub minimum: u32,
    pub c: f32,
}

impl FromStr for MatrixUcbParams {
    type Err = String;

    /// `"delay-interval-minimum-c"`, e.g. `"256-64-2-1.5"`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let bad = || format!("bad matrix-ucb spec `{spec}`");
        let parts: Vec<&str> = spec.split('-').collect();
        let [delay, interval, minimum, c] = parts.as_slice() else {
            return Err(bad());
        };
        let params = MatrixUcbParams {
            delay: delay.parse().map_err(|_| bad())?,
            interval: interval.parse().map_err(|_| bad())?,
            minimum: minimum.parse().map_err(|_| bad())?,
            c: c.parse().map_err(|_| bad())?,
        };
        if params.interval == 0 {
            return Err(format!("matrix-ucb interval must be positive in `{spec}`"));
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_specs_parse() {
        assert!(matches!(
            "65536".parse::<Budget>(),
            Ok(Budget::Iterations(65536))
        ));
        assert!(matches!(
            "250ms".parse::<Budget>(),
            Ok(Budget::Duration(d)) if d == Duration::from_millis(250)
        ));
        assert!(matches!(
            "2s".parse::<Budget>(),
            Ok(Budget::Duration(d)) if d == Duration::from_secs(2)
        ));
        assert!("2m".parse::<Budget>().is_err());
        assert!("".parse::<Budget>().is_err());
    }

    #[test]
    fn roll_options_validate() {
        assert!(RollOptions::new(3, 1).is_ok());
        assert!(RollOptions::new(39, 39).is_ok());
        assert!(RollOptions::new(4, 1).is_err());
        assert!(!RollOptions::new(39, 39).unwrap().clamping());
        assert!(RollOptions::new(3, 1).unwrap().depth_dependent());
        assert!(!RollOptions::new(3, 3).unwrap().depth_dependent());
    }

    #[test]
    fn matrix_ucb_specs_parse() {
        let params: MatrixUcbParams = "256-64-2-1.5".parse().unwrap();
        assert_eq!(
            params,
            MatrixUcbParams {
                delay: 256,
                interval: 64,
                minimum: 2,
                c: 1.5
            }
        );
        assert!("256-64-2".parse::<MatrixUcbParams>().is_err());
        assert!("256-0-2-1.5".parse::<MatrixUcbParams>().is_err());
    }
}
