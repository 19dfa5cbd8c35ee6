//! The neural evaluator: a small two-stage MLP stack.
//!
//! Stage one embeds each reserve unit (cacheable, see
//! [`super::EmbedCache`]) and each active unit; stage two maps the
//! concatenated side embeddings to a value and, when asked, policy logits
//! over the global action vocabulary which are gathered onto the current
//! legal sets. Weights stream as raw little-endian f32 in layer order.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::SmallRng;
use rand::Rng;

use super::{EmbedCache, Evaluator};
use crate::encode::{encode_active, encode_unit, unit_key, ACTIVE_DIM, UNIT_DIM};
use crate::game::{ActionSet, Game, MAX_ACTIONS};
use crate::games::duel::{token_arg, token_kind, Duel, Side, N_MOVES, N_SPECIES, TEAM_SIZE};

pub const UNIT_EMBED: usize = 32;
pub const ACTIVE_EMBED: usize = 64;
pub const EMBED_HIDDEN: usize = 128;
pub const SIDE_EMBED: usize = ACTIVE_EMBED + (TEAM_SIZE - 1) * UNIT_EMBED;
pub const MAIN_IN: usize = 2 * SIDE_EMBED;
pub const MAIN_HIDDEN: usize = 256;

/// Global action vocabulary the policy head indexes: pass, every move,
/// and a switch entry per species.
pub const ACTION_VOCAB: usize = 1 + (N_MOVES - 1) + N_SPECIES;

/// Dense layer with an optional clipped-relu.
#[derive(Clone, Debug)]
pub struct Affine {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub clamp: bool,
}

impl Affine {
    pub fn new(in_dim: usize, out_dim: usize, clamp: bool) -> Self {
        Self {
            weights: Array2::zeros((out_dim, in_dim)),
            bias: Array1::zeros(out_dim),
            clamp,
        }
    }

    pub fn init_random(&mut self, rng: &mut SmallRng) {
        let scale = (2.0 / self.weights.ncols() as f32).sqrt();
        for w in self.weights.iter_mut() {
            *w = (rng.gen::<f32>() * 2.0 - 1.0) * scale;
        }
        for b in self.bias.iter_mut() {
            *b = 0.0;
        }
    }

    pub fn propagate(&self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.weights.ncols());
        debug_assert_eq!(out.len(), self.weights.nrows());
        let x = ArrayView1::from(input);
        for (row, (weights, &bias)) in self
            .weights
            .rows()
            .into_iter()
            .zip(self.bias.iter())
            .enumerate()
        {
            let mut y = weights.dot(&x) + bias;
            if self.clamp {
                y = y.clamp(0.0, 1.0);
            }
            out[row] = y;
        }
    }

    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        for w in self.weights.iter_mut() {
            *w = reader.read_f32::<LittleEndian>()?;
        }
        for b in self.bias.iter_mut() {
            *b = reader.read_f32::<LittleEndian>()?;
        }
        Ok(())
    }

    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for &w in self.weights.iter() {
            writer.write_f32::<LittleEndian>(w)?;
        }
        for &b in self.bias.iter() {
            writer.write_f32::<LittleEndian>(b)?;
        }
        Ok(())
    }
}

/// Two dense layers; the sub-embedding stage.
#[derive(Clone, Debug)]
pub struct EmbeddingNet {
    pub fc0: Affine,
    pub fc1: Affine,
    buf: Vec<f32>,
}

impl EmbeddingNet {
    pub fn new(in_dim: usize, hidden: usize, out_dim: usize) -> Self {
        Self {
            fc0: Affine::new(in_dim, hidden, true),
            fc1: Affine::new(hidden, out_dim, true),
            buf: vec![0.0; hidden],
        }
    }

    pub fn init_random(&mut self, rng: &mut SmallRng) {
        self.fc0.init_random(rng);
        self.fc1.init_random(rng);
    }

    pub fn propagate(&mut self, input: &[f32], out: &mut [f32]) {
        let mut buf = std::mem::take(&mut self.buf);
        self.fc0.propagate(input, &mut buf);
        self.fc1.propagate(&buf, out);
        self.buf = buf;
    }

    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        self.fc0.read_parameters(reader)?;
        self.fc1.read_parameters(reader)
    }

    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.fc0.write_parameters(writer)?;
        self.fc1.write_parameters(writer)
    }
}

/// Value and policy heads over the concatenated side embeddings.
#[derive(Clone, Debug)]
pub struct MainNet {
    pub fc0: Affine,
    pub value_fc1: Affine,
    pub value_fc2: Affine,
    pub policy_fc1: Affine,
    pub policy_fc2: Affine,
    trunk: Vec<f32>,
    head: Vec<f32>,
}

impl MainNet {
    pub fn new() -> Self {
        Self {
            fc0: Affine::new(MAIN_IN, MAIN_HIDDEN, true),
            value_fc1: Affine::new(MAIN_HIDDEN, MAIN_HIDDEN, true),
            value_fc2: Affine::new(MAIN_HIDDEN, 1, false),
            policy_fc1: Affine::new(MAIN_HIDDEN, MAIN_HIDDEN, true),
            policy_fc2: Affine::new(MAIN_HIDDEN, ACTION_VOCAB, false),
            trunk: vec![0.0; MAIN_HIDDEN],
            head: vec![0.0; MAIN_HIDDEN],
        }
    }

    pub fn init_random(&mut self, rng: &mut SmallRng) {
        self.fc0.init_random(rng);
        self.value_fc1.init_random(rng);
        self.value_fc2.init_random(rng);
        self.policy_fc1.init_random(rng);
        self.policy_fc2.init_random(rng);
    }

    /// Value in (0, 1); fills `policy` with vocabulary logits when given.
    pub fn propagate(&mut self, input: &[f32], policy: Option<&mut [f32; ACTION_VOCAB]>) -> f32 {
        let mut trunk = std::mem::take(&mut self.trunk);
        let mut head = std::mem::take(&mut self.head);
        self.fc0.propagate(input, &mut trunk);

        self.value_fc1.propagate(&trunk, &mut head);
        let mut value = [0f32];
        self.value_fc2.propagate(&head, &mut value);

        if let Some(policy) = policy {
            self.policy_fc1.propagate(&trunk, &mut head);
            self.policy_fc2.propagate(&head, policy);
        }

        self.trunk = trunk;
        self.head = head;
        1.0 / (1.0 + (-value[0]).exp())
    }

    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        self.fc0.read_parameters(reader)?;
        self.value_fc1.read_parameters(reader)?;
        self.value_fc2.read_parameters(reader)?;
        self.policy_fc1.read_parameters(reader)?;
        self.policy_fc2.read_parameters(reader)
    }

    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.fc0.write_parameters(writer)?;
        self.value_fc1.write_parameters(writer)?;
        self.value_fc2.write_parameters(writer)?;
        self.policy_fc1.write_parameters(writer)?;
        self.policy_fc2.write_parameters(writer)
    }
}

impl Default for MainNet {
    fn default() -> Self {
        Self::new()
    }
}

/// Vocabulary slot for a concrete action token of a side.
pub fn vocab_index(side: &Side, token: u8) -> usize {
    match token_kind(token) {
        1 => side.active_unit().moves[token_arg(token)] as usize,
        2 => N_MOVES - 1 + side.units[token_arg(token)].species as usize,
        _ => 0,
    }
}

pub struct Network {
    pub unit_net: EmbeddingNet,
    pub active_net: EmbeddingNet,
    pub main: MainNet,
    cache: Option<EmbedCache>,
}

impl Network {
    pub fn empty() -> Self {
        Self {
            unit_net: EmbeddingNet::new(UNIT_DIM, EMBED_HIDDEN, UNIT_EMBED),
            active_net: EmbeddingNet::new(ACTIVE_DIM, EMBED_HIDDEN, ACTIVE_EMBED),
            main: MainNet::new(),
            cache: None,
        }
    }

    pub fn random(rng: &mut SmallRng) -> Self {
        let mut network = Self::empty();
        network.unit_net.init_random(rng);
        network.active_net.init_random(rng);
        network.main.init_random(rng);
        network
    }

    /// Load weights, retrying short reads a few times: a training sibling
    /// may be mid-write when we open the file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        const ATTEMPTS: u32 = 3;
        let mut last_error = None;
        for attempt in 0..ATTEMPTS {
            match Self::read_from(path) {
                Ok(network) => return Ok(network),
                Err(error) => {
                    warn!(
                        "reading weights from {} failed (attempt {}/{ATTEMPTS}): {error}",
                        path.display(),
                        attempt + 1
                    );
                    last_error = Some(error);
                    if attempt + 1 < ATTEMPTS {
                        std::thread::sleep(std::time::Duration::from_secs(1));
                    }
                }
            }
        }
        Err(anyhow::anyhow!(
            "could not read network weights from {}: {}",
            path.display(),
            last_error.unwrap()
        ))
    }

    fn read_from(path: &Path) -> io::Result<Self> {
        let mut file = io::BufReader::new(File::open(path)?);
        let mut network = Self::empty();
        network.unit_net.read_parameters(&mut file)?;
        network.active_net.read_parameters(&mut file)?;
        network.main.read_parameters(&mut file)?;
        Ok(network)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut file = io::BufWriter::new(File::create(path)?);
        self.unit_net.write_parameters(&mut file)?;
        self.active_net.write_parameters(&mut file)?;
        self.main.write_parameters(&mut file)?;
        file.flush()
    }

    fn side_embedding(&mut self, duel: &Duel, side_index: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), SIDE_EMBED);
        out.fill(0.0);
        let side = &duel.sides[side_index];

        let mut active_input = [0f32; ACTIVE_DIM];
        encode_active(side, &mut active_input);
        self.active_net
            .propagate(&active_input, &mut out[..ACTIVE_EMBED]);

        let mut reserve = 0usize;
        for slot in 0..side.count as usize {
            if slot == side.active as usize {
                continue;
            }
            let unit = &side.units[slot];
            let at = ACTIVE_EMBED + reserve * UNIT_EMBED;
            let slice = &mut out[at..at + UNIT_EMBED];
            match &self.cache {
                Some(cache) => slice.copy_from_slice(cache.get(side_index, slot, unit_key(unit))),
                None => {
                    let mut input = [0f32; UNIT_DIM];
                    encode_unit(unit, &mut input);
                    self.unit_net.propagate(&input, slice);
                }
            }
            reserve += 1;
        }
    }

    fn forward(&mut self, duel: &Duel, policy: Option<&mut [f32; ACTION_VOCAB]>) -> f32 {
        let mut input = [0f32; MAIN_IN];
        let (p1, p2) = input.split_at_mut(SIDE_EMBED);
        // split the borrow: embed one side at a time
        let mut buf = [0f32; SIDE_EMBED];
        self.side_embedding(duel, 0, &mut buf);
        p1.copy_from_slice(&buf);
        self.side_embedding(duel, 1, &mut buf);
        p2.copy_from_slice(&buf);
        self.main.propagate(&input, policy)
    }
}

impl Evaluator<Duel> for Network {
    fn prepare_episode(&mut self, root: &Duel) {
        self.cache = Some(EmbedCache::fill(&mut self.unit_net, root));
    }

    fn leaf(&mut self, state: &Duel, _rng: &mut SmallRng) -> f32 {
        if let Some((v1, _)) = state.status().scores() {
            return v1;
        }
        self.forward(state, None)
    }

    fn policy(
        &mut self,
        state: &Duel,
        p1_legal: &ActionSet,
        p2_legal: &ActionSet,
        logits1: &mut [f32; MAX_ACTIONS],
        logits2: &mut [f32; MAX_ACTIONS],
    ) -> Option<f32> {
        let mut vocab = [0f32; ACTION_VOCAB];
        let value = self.forward(state, Some(&mut vocab));
        for (i, &token) in p1_legal.as_slice().iter().enumerate() {
            logits1[i] = vocab[vocab_index(&state.sides[0], token)];
        }
        for (j, &token) in p2_legal.as_slice().iter().enumerate() {
            logits2[j] = vocab[vocab_index(&state.sides[1], token)];
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Player;
    use crate::games::duel::UnitDef;
    use rand::SeedableRng;

    fn sample() -> Duel {
        let team = [
            UnitDef { species: 2, moves: [1, 4, 6, 12] },
            UnitDef { species: 7, moves: [2, 4, 14, 12] },
            UnitDef { species: 5, moves: [1, 2, 3, 4] },
        ];
        Duel::new(&team, &team, 21)
    }

    #[test]
    fn forward_value_is_a_probability() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut network = Network::random(&mut rng);
        let duel = sample();
        network.prepare_episode(&duel);
        let value = network.leaf(&duel, &mut rng);
        assert!(value > 0.0 && value < 1.0);
    }

    #[test]
    fn policy_fills_legal_prefixes() {
        let mut rng = SmallRng::seed_from_u64(6);
        let mut network = Network::random(&mut rng);
        let duel = sample();
        network.prepare_episode(&duel);

        let p1 = duel.legal(Player::P1);
        let p2 = duel.legal(Player::P2);
        let mut logits1 = [0f32; MAX_ACTIONS];
        let mut logits2 = [0f32; MAX_ACTIONS];
        let value = network
            .policy(&duel, &p1, &p2, &mut logits1, &mut logits2)
            .unwrap();
        assert!(value > 0.0 && value < 1.0);
        for i in 0..p1.len() as usize {
            assert!(logits1[i].is_finite());
        }
        for j in 0..p2.len() as usize {
            assert!(logits2[j].is_finite());
        }
    }

    #[test]
    fn weights_round_trip_through_disk() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut network = Network::random(&mut rng);
        let duel = sample();

        let dir = std::env::temp_dir();
        let path = dir.join("joust-nn-roundtrip.bin");
        network.save(&path).unwrap();
        let mut loaded = Network::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let a = network.forward(&duel, None);
        let b = loaded.forward(&duel, None);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_weights_are_a_config_error() {
        let path = std::env::temp_dir().join("joust-nn-definitely-missing.bin");
        assert!(Network::load(&path).is_err());
    }
}
