//! Per-node joint-action selection.
//!
//! Each visited joint information set owns a [`JointBandit`]: two
//! independent per-player arms sharing one update, so a single leaf value
//! pair feeds both sides. The algorithm family is a closed set of tagged
//! variants selected once per worker from a spec string such as `ucb-1.0`
//! or `exp3-0.03`.

mod exp3;
mod pucb;
mod ucb;

pub use exp3::{Exp3, Pexp3};
pub use pucb::Pucb;
pub use ucb::{Ucb, Ucb1};

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::game::MAX_ACTIONS;

/// One selected arm together with the probability it was picked with.
/// Deterministic algorithms report probability one.
#[derive(Clone, Copy, Debug)]
pub struct Pick {
    pub index: u8,
    pub prob: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct JointPick {
    pub p1: Pick,
    pub p2: Pick,
}

/// Numerically stable softmax of `exp(eta * x)`, written into `out[..k]`.
pub(crate) fn softmax(out: &mut [f32; MAX_ACTIONS], input: &[f32], eta: f32) {
    let k = input.len();
    debug_assert!(k >= 1 && k <= MAX_ACTIONS);
    let max = input.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(eta * b));
    let mut sum = 0.0;
    for i in 0..k {
        let e = (eta * input[i] - max).exp();
        out[i] = e;
        sum += e;
    }
    for value in out[..k].iter_mut() {
        *value /= sum;
    }
}

/// CDF-walk sampling over a probability vector. The index is clamped into
/// range so accumulated rounding error can never select past the end.
pub(crate) fn sample_pdf<R: Rng>(pdf: &[f32], rng: &mut R) -> usize {
    debug_assert!(!pdf.is_empty());
    let mut p: f32 = rng.gen();
    for (i, &mass) in pdf.iter().enumerate() {
        p -= mass;
        if p <= 0.0 {
            return i;
        }
    }
    pdf.len() - 1
}

/// Algorithm selection plus its tuning constant, parsed from a CLI spec
/// string (`name-param`). The same value parameterizes every node of a
/// worker's store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BanditParams {
    Ucb { c: f32 },
    Ucb1 { c: f32 },
    Pucb { c: f32 },
    Exp3 { gamma: f32 },
    Pexp3 { gamma: f32 },
}

impl BanditParams {
    pub fn name(&self) -> &'static str {
        match self {
            BanditParams::Ucb { .. } => "ucb",
            BanditParams::Ucb1 { .. } => "ucb1",
            BanditParams::Pucb { .. } => "pucb",
            BanditParams::Exp3 { .. } => "exp3",
            BanditParams::Pexp3 { .. } => "pexp3",
        }
    }

    /// Whether nodes under these params want policy-network logits.
    pub fn wants_logits(&self) -> bool {
        matches!(
            self,
            BanditParams::Pucb { .. } | BanditParams::Pexp3 { .. }
        )
    }

    /// A fresh, uninitialized arm of the matching variant.
    fn arm(&self) -> Arm {
        match self {
            BanditParams::Ucb { .. } => Arm::Ucb(Ucb::default()),
            BanditParams::Ucb1 { .. } => Arm::Ucb1(Ucb1::default()),
            BanditParams::Pucb { .. } => Arm::Pucb(Pucb::default()),
            BanditParams::Exp3 { .. } => Arm::Exp3(Exp3::default()),
            BanditParams::Pexp3 { .. } => Arm::Pexp3(Pexp3::default()),
        }
    }
}

impl fmt::Display for BanditParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanditParams::Ucb { c } => write!(f, "ucb-{c}"),
            BanditParams::Ucb1 { c } => write!(f, "ucb1-{c}"),
            BanditParams::Pucb { c } => write!(f, "pucb-{c}"),
            BanditParams::Exp3 { gamma } => write!(f, "exp3-{gamma}"),
            BanditParams::Pexp3 { gamma } => write!(f, "pexp3-{gamma}"),
        }
    }
}

impl FromStr for BanditParams {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (name, rest) = spec
            .split_once('-')
            .ok_or_else(|| format!("bandit spec `{spec}` is missing a parameter"))?;
        let value: f32 = rest
            .parse()
            .map_err(|_| format!("bandit spec `{spec}` has a malformed parameter"))?;
        match name {
            "ucb" => Ok(BanditParams::Ucb { c: value }),
            "ucb1" => Ok(BanditParams::Ucb1 { c: value }),
            "pucb" => Ok(BanditParams::Pucb { c: value }),
            "exp3" => {
                if !(0.0..=1.0).contains(&value) {
                    return Err(format!("exp3 gamma {value} is outside [0, 1]"));
                }
                Ok(BanditParams::Exp3 { gamma: value })
            }
            "pexp3" => {
                if !(0.0..=1.0).contains(&value) {
                    return Err(format!("pexp3 gamma {value} is outside [0, 1]"));
                }
                Ok(BanditParams::Pexp3 { gamma: value })
            }
            other => Err(format!("unknown bandit `{other}`")),
        }
    }
}

/// One player's arm set, tagged by algorithm.
#[derive(Clone, Debug)]
pub enum Arm {
    Ucb(Ucb),
    Ucb1(Ucb1),
    Pucb(Pucb),
    Exp3(Exp3),
    Pexp3(Pexp3),
}

impl Arm {
    fn init(&mut self, k: u8) {
        match self {
            Arm::Ucb(b) => b.init(k),
            Arm::Ucb1(b) => b.init(k),
            Arm::Pucb(b) => b.init(k),
            Arm::Exp3(b) => b.init(k),
            Arm::Pexp3(b) => b.init(k),
        }
    }

    fn is_init(&self) -> bool {
        match self {
            Arm::Ucb(b) => b.is_init(),
            Arm::Ucb1(b) => b.is_init(),
            Arm::Pucb(b) => b.is_init(),
            Arm::Exp3(b) => b.is_init(),
            Arm::Pexp3(b) => b.is_init(),
        }
    }

    fn select<R: Rng>(&self, rng: &mut R, params: &BanditParams) -> Pick {
        match (self, params) {
            (Arm::Ucb(b), BanditParams::Ucb { c }) => b.select(rng, *c),
            (Arm::Ucb1(b), BanditParams::Ucb1 { c }) => b.select(rng, *c),
            (Arm::Pucb(b), BanditParams::Pucb { c }) => b.select(rng, *c),
            (Arm::Exp3(b), BanditParams::Exp3 { gamma }) => b.select(rng, *gamma),
            (Arm::Pexp3(b), BanditParams::Pexp3 { gamma }) => b.select(rng, *gamma),
            _ => unreachable!("bandit variant does not match its params"),
        }
    }

    fn update(&mut self, pick: Pick, value: f32) {
        match self {
            Arm::Ucb(b) => b.update(pick.index, value),
            Arm::Ucb1(b) => b.update(pick.index, value),
            Arm::Pucb(b) => b.update(pick.index, value),
            Arm::Exp3(b) => b.update(pick, value),
            Arm::Pexp3(b) => b.update(pick, value),
        }
    }

    fn absorb_logits(&mut self, params: &BanditParams, logits: &[f32]) {
        match (self, params) {
            (Arm::Pucb(b), BanditParams::Pucb { .. }) => b.absorb_logits(logits),
            (Arm::Pexp3(b), BanditParams::Pexp3 { gamma }) => b.absorb_logits(*gamma, logits),
            // value-only bandits ignore priors
            _ => {}
        }
    }
}

/// The per-node statistics record: two independent arms, one per player,
/// updated together from a single leaf value pair.
#[derive(Clone, Debug)]
pub struct JointBandit {
    pub p1: Arm,
    pub p2: Arm,
}

impl JointBandit {
    pub fn new(params: &BanditParams) -> Self {
        Self {
            p1: params.arm(),
            p2: params.arm(),
        }
    }

    pub fn init(&mut self, m: u8, n: u8) {
        self.p1.init(m);
        self.p2.init(n);
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.p1.is_init()
    }

    pub fn select<R: Rng>(&self, rng: &mut R, params: &BanditParams) -> JointPick {
        JointPick {
            p1: self.p1.select(rng, params),
            p2: self.p2.select(rng, params),
        }
    }

    pub fn update(&mut self, picks: JointPick, v1: f32, v2: f32) {
        self.p1.update(picks.p1, v1);
        self.p2.update(picks.p2, v2);
    }

    pub fn absorb_logits(&mut self, params: &BanditParams, logits1: &[f32], logits2: &[f32]) {
        self.p1.absorb_logits(params, logits1);
        self.p2.absorb_logits(params, logits2);
    }
}
