//! Decode and summarize `.battle.data` files.
//!
//! Replays every episode from its initial state to validate that the
//! recorded action pairs reproduce the recorded terminal result, and
//! prints aggregate statistics. Files decode in parallel.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressStyle};
use rayon::prelude::*;

use joust::frame::Episode;
use joust::games::duel::Duel;

#[derive(Parser)]
#[command(about = "Decode and verify self-play frame files")]
struct Args {
    /// `.battle.data` files or directories containing them.
    paths: Vec<PathBuf>,

    /// Print a line per episode.
    #[arg(long)]
    verbose: bool,

    /// Stop after this many episodes per file in verbose output.
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Default)]
struct Totals {
    files: usize,
    episodes: usize,
    frames: usize,
    wins: usize,
    losses: usize,
    ties: usize,
    replay_mismatches: usize,
    iterations: u64,
}

impl Totals {
    fn merge(mut self, other: Totals) -> Totals {
        self.files += other.files;
        self.episodes += other.episodes;
        self.frames += other.frames;
        self.wins += other.wins;
        self.losses += other.losses;
        self.ties += other.ties;
        self.replay_mismatches += other.replay_mismatches;
        self.iterations += other.iterations;
        self
    }
}

fn collect_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
            {
                let path = entry?.path();
                if path.to_string_lossy().ends_with(".battle.data") {
                    files.push(path);
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    Ok(files)
}

fn inspect_file(path: &PathBuf, verbose: bool, limit: usize) -> anyhow::Result<Totals> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let episodes = Episode::<Duel>::read_all(&bytes)
        .map_err(|e| anyhow::anyhow!("decoding {}: {e}", path.display()))?;

    let mut totals = Totals {
        files: 1,
        ..Totals::default()
    };
    for (index, episode) in episodes.iter().enumerate() {
        totals.episodes += 1;
        totals.frames += episode.updates.len();
        match episode.result {
            joust::game::GameStatus::Win => totals.wins += 1,
            joust::game::GameStatus::Loss => totals.losses += 1,
            joust::game::GameStatus::Tie => totals.ties += 1,
            joust::game::GameStatus::Ongoing => {}
        }
        totals.iterations += episode
            .updates
            .iter()
            .map(|u| u.iterations as u64)
            .sum::<u64>();

        let (frames, replayed) = episode.replay();
        // early-terminated episodes legitimately stop short of a terminal
        // replay, so only a *different* terminal counts as corruption
        if replayed.is_over() && replayed != episode.result {
            totals.replay_mismatches += 1;
        }

        if verbose && index < limit {
            println!(
                "{} #{index}: {} updates, result {:?}, first value {:.3}",
                path.display(),
                episode.updates.len(),
                episode.result,
                frames
                    .first()
                    .map(|f| f.empirical_value)
                    .unwrap_or(f32::NAN),
            );
        }
    }
    Ok(totals)
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    let files = collect_files(&args.paths)?;
    anyhow::ensure!(!files.is_empty(), "no .battle.data files found");

    let style = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}").unwrap();
    let totals = files
        .par_iter()
        .progress_with_style(style)
        .map(|path| inspect_file(path, args.verbose, args.limit))
        .try_reduce(Totals::default, |a, b| Ok(a.merge(b)))?;

    println!(
        "{} files, {} episodes, {} frames",
        totals.files, totals.episodes, totals.frames
    );
    println!(
        "results: {} wins / {} losses / {} ties",
        totals.wins, totals.losses, totals.ties
    );
    if totals.frames > 0 {
        println!(
            "mean episode length: {:.1}, mean iterations: {:.0}",
            totals.frames as f64 / totals.episodes.max(1) as f64,
            totals.iterations as f64 / totals.frames as f64
        );
    }
    if totals.replay_mismatches > 0 {
        anyhow::bail!("{} episodes did not replay to their result", totals.replay_mismatches);
    }
    println!("all episodes replayed to their recorded result");
    Ok(())
}
