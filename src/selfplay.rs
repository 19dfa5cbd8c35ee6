//! The self-play driver: workers that search, sample, advance, and write
//! compressed frames, plus the process-wide shared state they report into.
//!
//! Each worker owns its RNG, store, evaluator, search driver and frame
//! buffer; only atomics and the output directory are shared. Workers poll
//! the terminate flag between search calls and at episode boundaries, and
//! flush their buffers before exiting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, error, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::bandit::BanditParams;
use crate::eval::{DuelEval, Evaluator};
use crate::frame::{quantize, Episode, FrameBuffer};
use crate::game::{Game, GameStatus, RollPair};
use crate::games::duel::{Duel, UnitDef, MOVE_SLOTS, N_MOVES, N_SPECIES};
use crate::policy::{sample_action, PolicyOptions};
use crate::search::{Budget, MatrixUcbParams, Position, RollOptions, Search, Store};

/// Everything a worker needs to run episodes.
#[derive(Clone)]
pub struct WorkerConfig {
    pub bandit: BanditParams,
    pub budget: Budget,
    pub eval_spec: String,
    pub rolls: RollOptions,
    pub matrix_ucb: Option<MatrixUcbParams>,
    pub use_table: bool,
    pub keep_node: bool,
    pub policy: PolicyOptions,
    pub buffer_bytes: usize,
    pub max_episode_len: Option<u32>,
    /// Logit threshold for declaring a run early; `None` disables.
    pub early_term: Option<f32>,
    pub max_samples: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bandit: BanditParams::Ucb { c: 1.0 },
            budget: Budget::Iterations(1024),
            eval_spec: "mc".into(),
            rolls: RollOptions::default(),
            matrix_ucb: None,
            use_table: false,
            keep_node: true,
            policy: PolicyOptions::default(),
            buffer_bytes: 8 << 20,
            max_episode_len: None,
            early_term: None,
            max_samples: u64::MAX,
        }
    }
}

/// Win/visit tallies per unordered team pair, for providers that sample
/// from a fixed team list. Scores are accumulated in halves so ties fit
/// in integers.
pub struct Matchups {
    n_teams: usize,
    games: Vec<AtomicU64>,
    half_points: Vec<AtomicU64>,
}

impl Matchups {
    pub fn new(n_teams: usize) -> Self {
        let entries = n_teams * n_teams;
        Self {
            n_teams,
            games: (0..entries).map(|_| AtomicU64::new(0)).collect(),
            half_points: (0..entries).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn record(&self, p1_team: usize, p2_team: usize, p1_score: f32) {
        if self.n_teams == 0 {
            return;
        }
        let at = p1_team * self.n_teams + p2_team;
        self.games[at].fetch_add(1, Ordering::Relaxed);
        self.half_points[at].fetch_add((p1_score * 2.0) as u64, Ordering::Relaxed);
    }

    /// Mean score of `p1_team` against `p2_team`, if any games finished.
    pub fn mean(&self, p1_team: usize, p2_team: usize) -> Option<f32> {
        let at = p1_team * self.n_teams + p2_team;
        let games = self.games[at].load(Ordering::Relaxed);
        if games == 0 {
            return None;
        }
        Some(self.half_points[at].load(Ordering::Relaxed) as f32 / (2 * games) as f32)
    }

    pub fn n_teams(&self) -> usize {
        self.n_teams
    }
}

/// Process-wide counters and flags shared by all workers.
pub struct Shared {
    pub terminate: AtomicBool,
    pub pause: AtomicBool,
    pub battle_files: AtomicUsize,
    pub build_files: AtomicUsize,
    pub frames: AtomicU64,
    pub episodes: AtomicU64,
    pub updates: AtomicU64,
    pub updates_with_node: AtomicU64,
    pub trajectories: AtomicU64,
    pub errors: AtomicU64,
    pub episode_lengths: Vec<AtomicU64>,
    pub matchups: Matchups,
}

impl Shared {
    pub fn new(threads: usize, n_teams: usize) -> Self {
        Self {
            terminate: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            battle_files: AtomicUsize::new(0),
            build_files: AtomicUsize::new(0),
            frames: AtomicU64::new(0),
            episodes: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            updates_with_node: AtomicU64::new(0),
            trajectories: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            episode_lengths: (0..threads).map(|_| AtomicU64::new(0)).collect(),
            matchups: Matchups::new(n_teams),
        }
    }
}

/// One step of a team-construction trajectory: how many options were
/// legal, which was taken, with what probability.
#[derive(Clone, Copy, Debug)]
pub struct BuildStep {
    pub legal: u8,
    pub chosen: u8,
    pub prob: f32,
}

/// A team-construction record, labelled post hoc with the first turn's
/// search value.
#[derive(Clone, Debug, Default)]
pub struct BuildTrajectory {
    pub steps: Vec<BuildStep>,
    pub value: f32,
}

impl BuildTrajectory {
    fn write(&self, out: &mut Vec<u8>) {
        out.write_u16::<LittleEndian>(self.steps.len() as u16)
            .unwrap();
        for step in &self.steps {
            out.push(step.legal);
            out.push(step.chosen);
            out.write_u16::<LittleEndian>(quantize(step.prob)).unwrap();
        }
        out.write_u16::<LittleEndian>(quantize(self.value)).unwrap();
    }
}

/// What a provider hands the worker for one side of one episode.
pub struct Draw {
    pub team: Vec<UnitDef>,
    /// Index into the provider's fixed team list, when there is one.
    pub index: Option<usize>,
    /// Construction trajectory, when the team was built rather than
    /// sampled.
    pub trajectory: Option<BuildTrajectory>,
}

/// Source of starting teams. External collaborators implement this; the
/// core only consumes the team and, for output, the trajectory record.
pub trait Provider: Send + Sync {
    fn draw(&self, rng: &mut SmallRng) -> Draw;
}

/// Samples uniformly from a fixed list of teams.
pub struct FixedTeams {
    pub teams: Vec<Vec<UnitDef>>,
}

impl Provider for FixedTeams {
    fn draw(&self, rng: &mut SmallRng) -> Draw {
        let index = rng.gen_range(0..self.teams.len());
        Draw {
            team: self.teams[index].clone(),
            index: Some(index),
            trajectory: None,
        }
    }
}

/// Builds a random team of the given size, recording each pick as a
/// trajectory step. The first move slot is always a damaging move so no
/// team is ever harmless.
pub struct RandomTeams {
    pub team_size: usize,
}

const DAMAGING_MOVES: [u8; 5] = [1, 2, 3, 4, 5];

impl Provider for RandomTeams {
    fn draw(&self, rng: &mut SmallRng) -> Draw {
        let mut steps = Vec::new();
        let mut team = Vec::with_capacity(self.team_size);
        for _ in 0..self.team_size {
            let species = rng.gen_range(1..=N_SPECIES as u8);
            steps.push(BuildStep {
                legal: N_SPECIES as u8,
                chosen: species - 1,
                prob: 1.0 / N_SPECIES as f32,
            });

            let mut moves = [0u8; MOVE_SLOTS];
            let damaging = rng.gen_range(0..DAMAGING_MOVES.len());
            moves[0] = DAMAGING_MOVES[damaging];
            steps.push(BuildStep {
                legal: DAMAGING_MOVES.len() as u8,
                chosen: damaging as u8,
                prob: 1.0 / DAMAGING_MOVES.len() as f32,
            });
            for slot in 1..MOVE_SLOTS {
                loop {
                    let candidate = rng.gen_range(1..N_MOVES as u8);
                    if !moves[..slot].contains(&candidate) {
                        moves[slot] = candidate;
                        break;
                    }
                }
                steps.push(BuildStep {
                    legal: (N_MOVES - 1) as u8,
                    chosen: moves[slot] - 1,
                    prob: 1.0 / (N_MOVES - 1) as f32,
                });
            }
            team.push(UnitDef { species, moves });
        }
        Draw {
            team,
            index: None,
            trajectory: Some(BuildTrajectory {
                steps,
                value: 0.5,
            }),
        }
    }
}

const BUILD_FLUSH_COUNT: usize = 1024;

fn flush_builds(
    builds: &mut Vec<BuildTrajectory>,
    dir: &Path,
    counter: &AtomicUsize,
) -> std::io::Result<Option<PathBuf>> {
    if builds.is_empty() {
        return Ok(None);
    }
    let mut bytes = Vec::new();
    for trajectory in builds.iter() {
        trajectory.write(&mut bytes);
    }
    let id = counter.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("{id}.build.data"));
    let staging = dir.join(format!("{id}.build.data.tmp"));
    std::fs::write(&staging, &bytes)?;
    std::fs::rename(&staging, &path)?;
    builds.clear();
    Ok(Some(path))
}

#[inline]
fn logit(v: f32) -> f32 {
    let v = v.clamp(1e-6, 1.0 - 1e-6);
    (v / (1.0 - v)).ln()
}

/// Run self-play episodes until the terminate flag is raised. One call of
/// this is one worker thread's entire life.
pub fn run_worker<P: Provider>(
    worker_id: usize,
    config: &WorkerConfig,
    shared: &Shared,
    provider: &P,
    dir: &Path,
    seed: u64,
) -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut eval = DuelEval::from_spec(&config.eval_spec)?;
    config.policy.validate().map_err(anyhow::Error::msg)?;
    let mut search = Search::new(config.rolls, config.matrix_ucb);
    let mut store: Store<Duel> = Store::new(&config.bandit, config.use_table, rng.gen());
    let mut frames = FrameBuffer::new(config.buffer_bytes);
    let mut builds: Vec<BuildTrajectory> = Vec::new();

    'episodes: loop {
        if shared.terminate.load(Ordering::Relaxed) {
            break;
        }
        while shared.pause.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_secs(1));
            if shared.terminate.load(Ordering::Relaxed) {
                break 'episodes;
            }
        }

        let draw1 = provider.draw(&mut rng);
        let draw2 = provider.draw(&mut rng);
        let duel = Duel::new(&draw1.team, &draw2.team, rng.gen());
        let mut position = Position::new(duel);
        eval.prepare_episode(&position.game);
        store.start_episode(&config.bandit, rng.gen());

        let mut episode = Episode::new(position.game.clone());
        let mut first_value = 0.5f32;
        let mut length = 0u64;
        let mut early: Option<GameStatus> = None;
        let mut previous_extreme = 0i8;
        let mut dropped = false;

        while !position.status.is_over() {
            if shared.terminate.load(Ordering::Relaxed) {
                // prompt stop: the unfinished episode is discarded
                dropped = true;
                break;
            }
            if let Some(limit) = config.max_episode_len {
                if length >= limit as u64 {
                    debug!("worker {worker_id}: episode exceeded {limit} updates, dropping");
                    shared.errors.fetch_add(1, Ordering::Relaxed);
                    dropped = true;
                    break;
                }
            }

            let output = search.run(
                &mut rng,
                &config.budget,
                &config.bandit,
                &mut store,
                &mut eval,
                &position,
            );
            shared.errors.fetch_add(output.errors, Ordering::Relaxed);
            if length == 0 {
                first_value = output.empirical_value;
            }

            let (m, n) = (output.m as usize, output.n as usize);
            let i = match sample_action(
                &mut rng,
                &output.p1_empirical[..m],
                &output.p1_nash[..m],
                &config.policy,
            ) {
                Ok(i) => i,
                Err(e) => {
                    error!("worker {worker_id}: {e}, dropping episode");
                    shared.errors.fetch_add(1, Ordering::Relaxed);
                    dropped = true;
                    break;
                }
            };
            let j = match sample_action(
                &mut rng,
                &output.p2_empirical[..n],
                &output.p2_nash[..n],
                &config.policy,
            ) {
                Ok(j) => j,
                Err(e) => {
                    error!("worker {worker_id}: {e}, dropping episode");
                    shared.errors.fetch_add(1, Ordering::Relaxed);
                    dropped = true;
                    break;
                }
            };

            let c1 = output.p1_choices.get(i);
            let c2 = output.p2_choices.get(j);
            episode.push(&output, c1, c2);
            position.status = position.game.advance(c1, c2, RollPair::default());
            let obs = position.game.obs();

            let kept =
                store.advance_root(&config.bandit, config.keep_node, i as u8, j as u8, &obs);
            shared.updates.fetch_add(1, Ordering::Relaxed);
            if kept {
                shared.updates_with_node.fetch_add(1, Ordering::Relaxed);
            }
            length += 1;
            shared.episode_lengths[worker_id].store(length, Ordering::Relaxed);

            if let Some(threshold) = config.early_term {
                let advantage = logit(output.empirical_value);
                let extreme = if advantage > threshold {
                    1
                } else if advantage < -threshold {
                    -1
                } else {
                    0
                };
                if extreme != 0 && extreme == previous_extreme {
                    early = Some(if extreme > 0 {
                        GameStatus::Win
                    } else {
                        GameStatus::Loss
                    });
                    break;
                }
                previous_extreme = extreme;
            }
        }

        if dropped {
            if shared.terminate.load(Ordering::Relaxed) {
                break;
            }
            continue;
        }

        let result = early.unwrap_or(position.status);
        episode.result = result;
        let n_updates = episode.updates.len() as u64;
        frames.push(&episode);
        shared.frames.fetch_add(n_updates, Ordering::Relaxed);
        shared.episodes.fetch_add(1, Ordering::Relaxed);
        if shared.frames.load(Ordering::Relaxed) >= config.max_samples {
            shared.terminate.store(true, Ordering::Relaxed);
        }
        if frames.should_flush() {
            frames.flush(dir, &shared.battle_files)?;
        }

        let p1_score = result.scores().map_or(0.5, |(v1, _)| v1);
        if let (Some(team1), Some(team2)) = (draw1.index, draw2.index) {
            shared.matchups.record(team1, team2, p1_score);
        }
        if let Some(mut trajectory) = draw1.trajectory {
            trajectory.value = first_value;
            builds.push(trajectory);
            shared.trajectories.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(mut trajectory) = draw2.trajectory {
            trajectory.value = 1.0 - first_value;
            builds.push(trajectory);
            shared.trajectories.fetch_add(1, Ordering::Relaxed);
        }
        if builds.len() >= BUILD_FLUSH_COUNT {
            flush_builds(&mut builds, dir, &shared.build_files)?;
        }
    }

    // cancellation or sample cap: everything buffered still reaches disk
    frames.flush(dir, &shared.battle_files)?;
    flush_builds(&mut builds, dir, &shared.build_files)?;
    Ok(())
}

/// Periodic status print, meant to run on its own thread.
pub fn status_loop(shared: &Shared, interval: Duration, max_samples: u64) {
    let mut last_frames = 0u64;
    let mut last_trajectories = 0u64;
    loop {
        let deadline = std::time::Instant::now() + interval;
        while std::time::Instant::now() < deadline {
            if shared.terminate.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_secs(1).min(interval));
        }

        let frames = shared.frames.load(Ordering::Relaxed);
        let trajectories = shared.trajectories.load(Ordering::Relaxed);
        let updates = shared.updates.load(Ordering::Relaxed);
        let kept = shared.updates_with_node.load(Ordering::Relaxed);
        info!(
            "{:.1} frames/sec, {:.1} build traj/sec",
            (frames - last_frames) as f64 / interval.as_secs_f64(),
            (trajectories - last_trajectories) as f64 / interval.as_secs_f64(),
        );
        if updates > 0 {
            info!("keep-node ratio: {:.3}", kept as f64 / updates as f64);
        }
        if max_samples < u64::MAX {
            info!(
                "progress: {:.2}%",
                frames as f64 / max_samples as f64 * 100.0
            );
        }
        let lengths: Vec<u64> = shared
            .episode_lengths
            .iter()
            .map(|l| l.load(Ordering::Relaxed))
            .collect();
        info!("episode lengths: {lengths:?}");
        if shared.errors.load(Ordering::Relaxed) > 0 {
            warn!("accumulated errors: {}", shared.errors.load(Ordering::Relaxed));
        }

        last_frames = frames;
        last_trajectories = trajectories;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> WorkerConfig {
        WorkerConfig {
            budget: Budget::Iterations(12),
            max_samples: 32,
            buffer_bytes: 1,
            max_episode_len: Some(150),
            policy: PolicyOptions {
                mode: 'e',
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn worker_produces_decodable_frames() {
        let dir = std::env::temp_dir().join("joust-worker-test");
        std::fs::create_dir_all(&dir).ok();
        for entry in std::fs::read_dir(&dir).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).ok();
        }

        let config = quick_config();
        let shared = Shared::new(1, 0);
        let provider = RandomTeams { team_size: 2 };
        run_worker(0, &config, &shared, &provider, &dir, 77).unwrap();

        assert!(shared.frames.load(Ordering::Relaxed) >= config.max_samples);
        assert!(shared.episodes.load(Ordering::Relaxed) > 0);

        let mut decoded = 0usize;
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name.ends_with(".battle.data") {
                let bytes = std::fs::read(&path).unwrap();
                for episode in Episode::<Duel>::read_all(&bytes).unwrap() {
                    assert!(episode.result.is_over());
                    let (frames, replayed) = episode.replay();
                    assert_eq!(frames.len(), episode.updates.len());
                    assert_eq!(replayed, episode.result);
                    decoded += episode.updates.len();
                }
            }
        }
        assert!(decoded as u64 >= config.max_samples);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn worker_writes_build_trajectories_on_shutdown() {
        let dir = std::env::temp_dir().join("joust-worker-builds");
        std::fs::create_dir_all(&dir).ok();
        for entry in std::fs::read_dir(&dir).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).ok();
        }

        let config = WorkerConfig {
            max_samples: 5,
            ..quick_config()
        };
        let shared = Shared::new(1, 0);
        let provider = RandomTeams { team_size: 1 };
        run_worker(0, &config, &shared, &provider, &dir, 13).unwrap();

        let builds = std::fs::read_dir(&dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .to_string_lossy()
                    .ends_with(".build.data")
            })
            .count();
        assert!(builds > 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fixed_teams_record_matchups() {
        let dir = std::env::temp_dir().join("joust-worker-matchups");
        std::fs::create_dir_all(&dir).ok();

        let config = WorkerConfig {
            max_samples: 10,
            ..quick_config()
        };
        let shared = Shared::new(1, 2);
        let tosser = UnitDef {
            species: 3,
            moves: [4, 1, 0, 0],
        };
        let provider = FixedTeams {
            teams: vec![vec![tosser], vec![tosser, tosser]],
        };
        run_worker(0, &config, &shared, &provider, &dir, 21).unwrap();

        let mut recorded = 0u64;
        for i in 0..2 {
            for j in 0..2 {
                if shared.matchups.mean(i, j).is_some() {
                    recorded += 1;
                }
            }
        }
        assert!(recorded > 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn early_termination_short_circuits_lopsided_games() {
        let dir = std::env::temp_dir().join("joust-worker-early");
        std::fs::create_dir_all(&dir).ok();

        let config = WorkerConfig {
            max_samples: 3,
            early_term: Some(0.1),
            budget: Budget::Iterations(64),
            ..quick_config()
        };
        let shared = Shared::new(1, 0);
        // one side massively overmatched: early termination should fire
        let strong = UnitDef {
            species: 7,
            moves: [2, 4, 14, 12],
        };
        let weak = UnitDef {
            species: 6,
            moves: [1, 0, 0, 0],
        };
        let provider = FixedTeams {
            teams: vec![vec![strong, strong, strong], vec![weak]],
        };
        run_worker(0, &config, &shared, &provider, &dir, 5).unwrap();
        assert!(shared.episodes.load(Ordering::Relaxed) > 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
