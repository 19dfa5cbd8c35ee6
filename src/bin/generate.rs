//! Self-play data generation driver.
//!
//! Spawns one worker thread per core (minus one by default), each playing
//! duel episodes with its own search tree and evaluator, and writes
//! compressed frame files plus build trajectories into the output
//! directory. Ctrl-C initiates a clean shutdown: workers finish their
//! current iteration, flush buffers, and the process exits zero.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use log::info;
use serde::Serialize;

use joust::bandit::BanditParams;
use joust::eval::DuelEval;
use joust::policy::PolicyOptions;
use joust::search::{Budget, MatrixUcbParams, RollOptions};
use joust::selfplay::{run_worker, status_loop, RandomTeams, Shared, WorkerConfig};

#[derive(Parser, Serialize)]
#[command(about = "Generate self-play training data for the duel")]
struct Args {
    /// Evaluator: `mc` (rollouts), `fp` (heuristic), or a weights path.
    #[arg(long, default_value = "mc")]
    eval: String,

    /// Bandit spec: `ucb-1.0`, `ucb1-1.5`, `pucb-2`, `exp3-0.1`, `pexp3-0.1`.
    #[arg(long, default_value = "ucb-1.0")]
    bandit: String,

    /// Search budget per decision: iterations (`4096`), `250ms`, or `2s`.
    #[arg(long, default_value = "4096")]
    budget: String,

    /// Enable Matrix-UCB at the root: `delay-interval-minimum-c`.
    #[arg(long)]
    matrix_ucb: Option<String>,

    /// Use a transposition table instead of a tree.
    #[arg(long)]
    use_table: bool,

    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Output directory; defaults to a timestamped name.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Frame buffer size in MiB before a flush.
    #[arg(long, default_value_t = 8)]
    buffer_size: usize,

    /// Stop after this many frames have been generated.
    #[arg(long, default_value_t = 1 << 30)]
    max_samples: u64,

    /// Reuse the matching subtree across root moves.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    keep_node: bool,

    /// Action sampling: `e` empirical, `n` nash, `x` argmax, `m` mixed.
    #[arg(long, default_value_t = 'n')]
    policy_mode: char,

    #[arg(long, default_value_t = 1.0)]
    policy_temp: f64,

    /// Zero out sampled probabilities below this fraction of the mass.
    #[arg(long, default_value_t = 0.0)]
    policy_min: f64,

    #[arg(long, default_value_t = 0.5)]
    policy_nash_weight: f64,

    /// Damage-roll clamp at the root: 1, 2, 3, 20, or 39 (free).
    #[arg(long, default_value_t = 3)]
    root_rolls: u8,

    /// Damage-roll clamp below the root.
    #[arg(long, default_value_t = 1)]
    other_rolls: u8,

    /// Declare lopsided games early at this logit threshold.
    #[arg(long)]
    early_term: Option<f32>,

    /// Episodes exceeding this many updates are dropped.
    #[arg(long)]
    max_episode_len: Option<u32>,

    /// Units per generated team.
    #[arg(long, default_value_t = 3)]
    team_size: usize,

    /// Seconds between status prints.
    #[arg(long, default_value_t = 30)]
    print_interval: u64,
}

fn build_config(args: &Args) -> anyhow::Result<WorkerConfig> {
    let bandit: BanditParams = args.bandit.parse().map_err(anyhow::Error::msg)?;
    let budget: Budget = args.budget.parse().map_err(anyhow::Error::msg)?;
    let rolls = RollOptions::new(args.root_rolls, args.other_rolls).map_err(anyhow::Error::msg)?;
    let matrix_ucb = args
        .matrix_ucb
        .as_deref()
        .map(|spec| spec.parse::<MatrixUcbParams>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let policy = PolicyOptions {
        mode: args.policy_mode,
        temperature: args.policy_temp,
        min_prob: args.policy_min,
        nash_weight: args.policy_nash_weight,
    };
    policy.validate().map_err(anyhow::Error::msg)?;
    // surface a bad evaluator spec (missing weights file, ...) before any
    // thread spawns
    DuelEval::from_spec(&args.eval)?;

    Ok(WorkerConfig {
        bandit,
        budget,
        eval_spec: args.eval.clone(),
        rolls,
        matrix_ucb,
        use_table: args.use_table,
        keep_node: args.keep_node,
        policy,
        buffer_bytes: args.buffer_size << 20,
        max_episode_len: args.max_episode_len,
        early_term: args.early_term,
        max_samples: args.max_samples,
    })
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();
    let args = Args::parse();
    let config = build_config(&args)?;

    let threads = args.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1)
    });
    let seed = args.seed.unwrap_or_else(rand::random);
    let dir = args.dir.clone().unwrap_or_else(|| {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        PathBuf::from(format!("selfplay-{stamp}"))
    });
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    std::fs::write(dir.join("args"), serde_json::to_string_pretty(&args)?)
        .context("writing args file")?;

    info!(
        "generating with {threads} workers, bandit {}, budget {}, seed {seed}, dir {}",
        config.bandit,
        config.budget,
        dir.display()
    );

    let shared = Arc::new(Shared::new(threads, 0));
    {
        let shared = shared.clone();
        ctrlc::set_handler(move || {
            shared.terminate.store(true, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    let provider = Arc::new(RandomTeams {
        team_size: args.team_size,
    });

    std::thread::scope(|scope| {
        for worker_id in 0..threads {
            let config = config.clone();
            let shared = shared.clone();
            let provider = provider.clone();
            let dir = dir.clone();
            let worker_seed = seed.wrapping_add(worker_id as u64).wrapping_mul(0x9e3779b97f4a7c15);
            scope.spawn(move || {
                if let Err(error) =
                    run_worker(worker_id, &config, &shared, provider.as_ref(), &dir, worker_seed)
                {
                    log::error!("worker {worker_id} failed: {error:#}");
                    shared.terminate.store(true, Ordering::Relaxed);
                }
            });
        }
        status_loop(
            &shared,
            Duration::from_secs(args.print_interval.max(1)),
            args.max_samples,
        );
    });

    info!(
        "done: {} episodes, {} frames, {} files, {} errors",
        shared.episodes.load(Ordering::Relaxed),
        shared.frames.load(Ordering::Relaxed),
        shared.battle_files.load(Ordering::Relaxed),
        shared.errors.load(Ordering::Relaxed),
    );
    Ok(())
}
