//! The compressed on-disk format for self-play trajectories.
//!
//! One record per episode, little-endian: a `u32` total length (so a
//! decoder can skip records unparsed), a `u16` update count, the initial
//! engine state, the terminal result byte, then one update per turn with
//! the chosen tokens, iteration count, value estimates and all four mixed
//! strategies quantized to `u16`. Per-turn states are not stored; the
//! decoder reconstructs them by replaying `advance` with the recorded
//! tokens.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::game::{Game, GameStatus, Player, RollPair, MAX_ACTIONS};
use crate::search::Output;

/// Quantize a probability to `u16`, with the guarantee that strictly
/// positive inputs never collapse to zero.
pub fn quantize(x: f32) -> u16 {
    if x <= 0.0 {
        return 0;
    }
    let q = (x * 65535.0).round() as u32;
    q.clamp(1, 65535) as u16
}

#[inline]
pub fn dequantize(q: u16) -> f32 {
    q as f32 / 65535.0
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    Truncated,
    BadLength,
    BadStatus,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "record truncated"),
            CodecError::BadLength => write!(f, "record length inconsistent"),
            CodecError::BadStatus => write!(f, "unknown result byte"),
        }
    }
}

impl std::error::Error for CodecError {}

/// One turn of training data.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub m: u8,
    pub n: u8,
    pub c1: u8,
    pub c2: u8,
    pub iterations: u32,
    pub empirical_value: u16,
    pub nash_value: u16,
    pub p1_empirical: Vec<u16>,
    pub p1_nash: Vec<u16>,
    pub p2_empirical: Vec<u16>,
    pub p2_nash: Vec<u16>,
}

impl Update {
    pub fn from_output(output: &Output, c1: u8, c2: u8) -> Self {
        let (m, n) = (output.m as usize, output.n as usize);
        Self {
            m: output.m,
            n: output.n,
            c1,
            c2,
            iterations: output.iterations.min(u32::MAX as u64) as u32,
            empirical_value: quantize(output.empirical_value),
            nash_value: quantize(output.nash_value),
            p1_empirical: output.p1_empirical[..m].iter().map(|&p| quantize(p)).collect(),
            p1_nash: output.p1_nash[..m].iter().map(|&p| quantize(p)).collect(),
            p2_empirical: output.p2_empirical[..n].iter().map(|&p| quantize(p)).collect(),
            p2_nash: output.p2_nash[..n].iter().map(|&p| quantize(p)).collect(),
        }
    }

    pub fn byte_len(m: usize, n: usize) -> usize {
        1 + 2 + 4 + 2 + 2 + 2 * 2 * (m + n)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push((self.m - 1) | ((self.n - 1) << 4));
        out.push(self.c1);
        out.push(self.c2);
        out.write_u32::<LittleEndian>(self.iterations).unwrap();
        out.write_u16::<LittleEndian>(self.empirical_value).unwrap();
        out.write_u16::<LittleEndian>(self.nash_value).unwrap();
        for field in [
            &self.p1_empirical,
            &self.p1_nash,
            &self.p2_empirical,
            &self.p2_nash,
        ] {
            for &q in field.iter() {
                out.write_u16::<LittleEndian>(q).unwrap();
            }
        }
    }

    fn read(mut bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Truncated);
        }
        let mn = bytes[0];
        let m = (mn & 0x0f) as usize + 1;
        let n = (mn >> 4) as usize + 1;
        let len = Self::byte_len(m, n);
        if bytes.len() < len {
            return Err(CodecError::Truncated);
        }
        bytes = &bytes[1..];
        let c1 = bytes[0];
        let c2 = bytes[1];
        bytes = &bytes[2..];
        let iterations = (&mut bytes).read_u32::<LittleEndian>().unwrap();
        let empirical_value = (&mut bytes).read_u16::<LittleEndian>().unwrap();
        let nash_value = (&mut bytes).read_u16::<LittleEndian>().unwrap();
        let mut take = |count: usize| -> Vec<u16> {
            (0..count)
                .map(|_| (&mut bytes).read_u16::<LittleEndian>().unwrap())
                .collect()
        };
        let p1_empirical = take(m);
        let p1_nash = take(m);
        let p2_empirical = take(n);
        let p2_nash = take(n);
        Ok((
            Self {
                m: m as u8,
                n: n as u8,
                c1,
                c2,
                iterations,
                empirical_value,
                nash_value,
                p1_empirical,
                p1_nash,
                p2_empirical,
                p2_nash,
            },
            len,
        ))
    }
}

/// A decoded per-turn training frame, reconstructed by replay.
#[derive(Clone, Debug)]
pub struct Frame<G> {
    pub state: G,
    pub m: u8,
    pub n: u8,
    pub c1: u8,
    pub c2: u8,
    pub iterations: u32,
    pub empirical_value: f32,
    pub nash_value: f32,
    pub p1_empirical: [f32; MAX_ACTIONS],
    pub p1_nash: [f32; MAX_ACTIONS],
    pub p2_empirical: [f32; MAX_ACTIONS],
    pub p2_nash: [f32; MAX_ACTIONS],
    /// Final episode score from P1's perspective.
    pub score: f32,
}

/// One episode's worth of updates plus its initial state and result.
#[derive(Clone, Debug)]
pub struct Episode<G: Game> {
    pub initial: G,
    pub result: GameStatus,
    pub updates: Vec<Update>,
}

impl<G: Game> Episode<G> {
    pub fn new(initial: G) -> Self {
        Self {
            initial,
            result: GameStatus::Ongoing,
            updates: Vec::new(),
        }
    }

    pub fn push(&mut self, output: &Output, c1: u8, c2: u8) {
        self.updates.push(Update::from_output(output, c1, c2));
    }

    pub fn byte_len(&self) -> usize {
        4 + 2
            + G::STATE_BYTES
            + 1
            + self
                .updates
                .iter()
                .map(|u| Update::byte_len(u.m as usize, u.n as usize))
                .sum::<usize>()
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let len = self.byte_len();
        out.write_u32::<LittleEndian>(len as u32).unwrap();
        out.write_u16::<LittleEndian>(self.updates.len() as u16)
            .unwrap();
        let at = out.len();
        out.resize(at + G::STATE_BYTES, 0);
        self.initial.to_bytes(&mut out[at..at + G::STATE_BYTES]);
        out.push(self.result.to_byte());
        for update in &self.updates {
            update.write(out);
        }
    }

    /// Decode one record from the head of `bytes`; returns the episode and
    /// the record length.
    pub fn read(bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        if bytes.len() < 6 + G::STATE_BYTES + 1 {
            return Err(CodecError::Truncated);
        }
        let total = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if total < 7 + G::STATE_BYTES || bytes.len() < total {
            return Err(CodecError::BadLength);
        }
        let count = u16::from_le_bytes(bytes[4..6].try_into().unwrap()) as usize;
        let mut at = 6;
        let initial = G::from_bytes(&bytes[at..at + G::STATE_BYTES]);
        at += G::STATE_BYTES;
        let result = GameStatus::from_byte(bytes[at]).ok_or(CodecError::BadStatus)?;
        at += 1;

        let mut updates = Vec::with_capacity(count);
        while at < total {
            let (update, len) = Update::read(&bytes[at..total])?;
            updates.push(update);
            at += len;
        }
        if at != total || updates.len() != count {
            return Err(CodecError::BadLength);
        }
        Ok((
            Self {
                initial,
                result,
                updates,
            },
            total,
        ))
    }

    /// Decode every record in a buffer.
    pub fn read_all(mut bytes: &[u8]) -> Result<Vec<Self>, CodecError> {
        let mut episodes = Vec::new();
        while !bytes.is_empty() {
            let (episode, len) = Self::read(bytes)?;
            episodes.push(episode);
            bytes = &bytes[len..];
        }
        Ok(episodes)
    }

    /// Reconstruct the per-turn frames by replaying the recorded joint
    /// actions through the engine. Returns the frames and the terminal
    /// status the replay reached.
    pub fn replay(&self) -> (Vec<Frame<G>>, GameStatus) {
        let mut game = self.initial.clone();
        let mut status = game.status();
        let score = self.result.scores().map_or(0.5, |(v1, _)| v1);
        let mut frames = Vec::with_capacity(self.updates.len());

        for update in &self.updates {
            let mut frame = Frame {
                state: game.clone(),
                m: update.m,
                n: update.n,
                c1: update.c1,
                c2: update.c2,
                iterations: update.iterations,
                empirical_value: dequantize(update.empirical_value),
                nash_value: dequantize(update.nash_value),
                p1_empirical: [0.0; MAX_ACTIONS],
                p1_nash: [0.0; MAX_ACTIONS],
                p2_empirical: [0.0; MAX_ACTIONS],
                p2_nash: [0.0; MAX_ACTIONS],
                score,
            };
            for i in 0..update.m as usize {
                frame.p1_empirical[i] = dequantize(update.p1_empirical[i]);
                frame.p1_nash[i] = dequantize(update.p1_nash[i]);
            }
            for j in 0..update.n as usize {
                frame.p2_empirical[j] = dequantize(update.p2_empirical[j]);
                frame.p2_nash[j] = dequantize(update.p2_nash[j]);
            }
            frames.push(frame);
            status = game.advance(update.c1, update.c2, RollPair::default());
        }
        (frames, status)
    }

    /// Legal sets at each replayed frame, recomputed rather than stored.
    pub fn frame_choices(frame: &Frame<G>) -> (crate::game::ActionSet, crate::game::ActionSet) {
        (frame.state.legal(Player::P1), frame.state.legal(Player::P2))
    }
}

/// A worker's episode accumulator. Owned exclusively by one worker; only
/// the flush to disk crosses the thread boundary, with filenames made
/// unique by the shared counter.
pub struct FrameBuffer {
    buffer: Vec<u8>,
    target: usize,
}

impl FrameBuffer {
    pub fn new(target: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(target + target / 8),
            target,
        }
    }

    pub fn push<G: Game>(&mut self, episode: &Episode<G>) {
        episode.write(&mut self.buffer);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn should_flush(&self) -> bool {
        self.buffer.len() >= self.target
    }

    /// Write the buffer to `<counter>.battle.data` under `dir` via a
    /// temporary file and rename, then clear it.
    pub fn flush(&mut self, dir: &Path, counter: &AtomicUsize) -> io::Result<Option<PathBuf>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let id = counter.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{id}.battle.data"));
        let staging = dir.join(format!("{id}.battle.data.tmp"));
        std::fs::write(&staging, &self.buffer)?;
        std::fs::rename(&staging, &path)?;
        self.buffer.clear();
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ActionSet;
    use crate::games::pennies::Pennies;

    fn fake_output(m: u8, n: u8, iterations: u64) -> Output {
        let p1: ActionSet = (0..m).collect();
        let p2: ActionSet = (0..n).collect();
        let mut output = Output::new(m, n, p1, p2);
        output.iterations = iterations;
        output.empirical_value = 0.625;
        output.nash_value = 0.5;
        output
    }

    #[test]
    fn quantization_preserves_positive_mass() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 65535);
        assert_eq!(quantize(1e-9), 1);
        assert!(dequantize(quantize(0.37)) - 0.37 < 1e-4);
    }

    #[test]
    fn episode_round_trips_through_bytes() {
        let mut game = Pennies::matching();
        game.reseed(55);
        let mut episode = Episode::new(game);
        episode.push(&fake_output(2, 2, 128), 0, 1);
        let mut copy = episode.clone();
        copy.result = GameStatus::Win;

        let mut bytes = Vec::new();
        copy.write(&mut bytes);
        assert_eq!(bytes.len(), copy.byte_len());

        let (decoded, len) = Episode::<Pennies>::read(&bytes).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(decoded.result, GameStatus::Win);
        assert_eq!(decoded.updates, copy.updates);

        let mut reencoded = Vec::new();
        decoded.write(&mut reencoded);
        assert_eq!(reencoded, bytes);
    }

    #[test]
    fn multiple_records_decode_by_offset() {
        let mut bytes = Vec::new();
        for seed in 0..3u64 {
            let mut game = Pennies::matching();
            game.reseed(seed);
            let mut episode = Episode::new(game);
            episode.push(&fake_output(2, 2, 64), 1, 1);
            episode.result = GameStatus::Loss;
            episode.write(&mut bytes);
        }
        let episodes = Episode::<Pennies>::read_all(&bytes).unwrap();
        assert_eq!(episodes.len(), 3);
    }

    #[test]
    fn replay_reaches_the_recorded_result() {
        let mut game = Pennies::matching();
        game.reseed(99);
        let mut episode = Episode::new(game.clone());

        let output = fake_output(2, 2, 32);
        let status = game.advance(0, 0, RollPair::default());
        episode.push(&output, 0, 0);
        episode.result = status;

        let (frames, replayed) = episode.replay();
        assert_eq!(frames.len(), 1);
        assert_eq!(replayed, episode.result);
        let (p1, p2) = Episode::frame_choices(&frames[0]);
        assert_eq!(p1.len(), 2);
        assert_eq!(p2.len(), 2);
    }

    #[test]
    fn truncated_records_are_rejected() {
        let mut game = Pennies::matching();
        game.reseed(5);
        let mut episode = Episode::new(game);
        episode.push(&fake_output(3, 2, 16), 0, 1);
        let mut bytes = Vec::new();
        episode.write(&mut bytes);
        bytes.truncate(bytes.len() - 3);
        assert!(Episode::<Pennies>::read(&bytes).is_err());
    }

    #[test]
    fn buffer_flushes_with_unique_names() {
        let dir = std::env::temp_dir().join("joust-framebuf-test");
        std::fs::create_dir_all(&dir).unwrap();
        let counter = AtomicUsize::new(0);
        let mut buffer = FrameBuffer::new(1);

        let mut game = Pennies::matching();
        game.reseed(1);
        let mut episode = Episode::new(game);
        episode.push(&fake_output(2, 2, 8), 0, 0);
        episode.result = GameStatus::Tie;

        buffer.push(&episode);
        assert!(buffer.should_flush());
        let first = buffer.flush(&dir, &counter).unwrap().unwrap();
        buffer.push(&episode);
        let second = buffer.flush(&dir, &counter).unwrap().unwrap();
        assert_ne!(first, second);
        assert!(buffer.is_empty());

        let bytes = std::fs::read(&first).unwrap();
        assert_eq!(Episode::<Pennies>::read_all(&bytes).unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
