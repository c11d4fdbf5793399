//! Entropy-coded symbol streams
//!
//! A section header is parsed once into an immutable [`CodeSpec`]: optional
//! LZ77 parameters, the cluster map and one distribution per cluster. An
//! [`EntropyStream`] then decodes symbols against that spec, owning the ANS
//! register and the LZ77 history window.

use std::sync::Arc;

use log::{debug, trace};

use crate::ans_decoder::{AnsDistribution, AnsState, ANS_FINAL_STATE};
use crate::bitstream::BitstreamReader;
use crate::cluster_map::{ClusterMap, MAX_CLUSTERS};
use crate::error::{JxlError, JxlResult};
use crate::hybrid_int::HybridIntConfig;
use crate::prefix_code::{read_alphabet_size, PrefixDistribution, PREFIX_MAX_BITS};

/// Entries in the LZ77 history window
pub const WINDOW_SIZE: usize = 1 << 20;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// Raw distances below this are looked up in the special distance table
pub const NUM_SPECIAL_DISTANCES: usize = 120;

const LZ77_LENGTH_LOG_ALPHA_SIZE: u32 = 8;

/// `(dx, dy)` pairs for short 2D distances; the distance is `dx + dy * multiplier`
const SPECIAL_DISTANCES: [(i8, i8); NUM_SPECIAL_DISTANCES] = [
    (0, 1), (1, 0), (1, 1), (-1, 1), (0, 2), (2, 0), (1, 2), (-1, 2),
    (2, 1), (-2, 1), (2, 2), (-2, 2), (0, 3), (3, 0), (1, 3), (-1, 3),
    (3, 1), (-3, 1), (2, 3), (-2, 3), (3, 2), (-3, 2), (0, 4), (4, 0),
    (1, 4), (-1, 4), (4, 1), (-4, 1), (3, 3), (-3, 3), (2, 4), (-2, 4),
    (4, 2), (-4, 2), (0, 5), (3, 4), (-3, 4), (4, 3), (-4, 3), (5, 0),
    (1, 5), (-1, 5), (5, 1), (-5, 1), (2, 5), (-2, 5), (5, 2), (-5, 2),
    (4, 4), (-4, 4), (3, 5), (-3, 5), (5, 3), (-5, 3), (0, 6), (6, 0),
    (1, 6), (-1, 6), (6, 1), (-6, 1), (2, 6), (-2, 6), (6, 2), (-6, 2),
    (4, 5), (-4, 5), (5, 4), (-5, 4), (3, 6), (-3, 6), (6, 3), (-6, 3),
    (0, 7), (7, 0), (1, 7), (-1, 7), (5, 5), (-5, 5), (7, 1), (-7, 1),
    (4, 6), (-4, 6), (6, 4), (-6, 4), (2, 7), (-2, 7), (7, 2), (-7, 2),
    (3, 7), (-3, 7), (7, 3), (-7, 3), (5, 6), (-5, 6), (6, 5), (-6, 5),
    (8, 0), (4, 7), (-4, 7), (7, 4), (-7, 4), (8, 1), (8, 2), (6, 6),
    (-6, 6), (8, 3), (5, 7), (-5, 7), (7, 5), (-7, 5), (8, 4), (6, 7),
    (-6, 7), (7, 6), (-7, 6), (8, 5), (7, 7), (-7, 7), (8, 6), (8, 7),
];

/// LZ77 parameters of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lz77Params {
    /// Tokens at or above this start a back-reference
    pub min_symbol: u32,
    pub min_length: u32,
    pub length_config: HybridIntConfig,
}

/// Distribution of one cluster
#[derive(Debug, Clone)]
pub enum SymbolDistribution {
    Ans(AnsDistribution),
    Prefix(PrefixDistribution),
}

impl SymbolDistribution {
    pub fn config(&self) -> &HybridIntConfig {
        match self {
            SymbolDistribution::Ans(dist) => dist.config(),
            SymbolDistribution::Prefix(dist) => dist.config(),
        }
    }

    pub fn alphabet_size(&self) -> usize {
        match self {
            SymbolDistribution::Ans(dist) => dist.alphabet_size(),
            SymbolDistribution::Prefix(dist) => dist.alphabet_size(),
        }
    }

    /// Read a raw token; prefix codes leave `ans` untouched
    pub fn read_symbol(&self, reader: &mut BitstreamReader, ans: &mut AnsState) -> JxlResult<u32> {
        match self {
            SymbolDistribution::Ans(dist) => dist.read_symbol(reader, ans),
            SymbolDistribution::Prefix(dist) => dist.read_symbol(reader),
        }
    }

    /// Read a token and expand it with this distribution's config
    pub fn read_value(&self, reader: &mut BitstreamReader, ans: &mut AnsState) -> JxlResult<u32> {
        let token = self.read_symbol(reader, ans)?;
        self.config().decode(reader, token)
    }
}

/// Parsed header of an entropy-coded section
#[derive(Debug)]
pub struct CodeSpec {
    num_contexts: usize,
    lz77: Option<Lz77Params>,
    cluster_map: ClusterMap,
    use_prefix_code: bool,
    log_alpha_size: u32,
    distributions: Vec<SymbolDistribution>,
}

impl CodeSpec {
    /// Parse a section header for `num_contexts` caller contexts
    pub fn parse(
        reader: &mut BitstreamReader,
        num_contexts: usize,
        disallow_lz77: bool,
    ) -> JxlResult<Self> {
        if num_contexts == 0 {
            return Err(JxlError::ProtocolViolation(
                "Entropy stream needs at least one context".to_string(),
            ));
        }

        let lz77 = if reader.read_bool()? {
            if disallow_lz77 {
                return Err(JxlError::ProtocolViolation(
                    "Nested distributions cannot use LZ77".to_string(),
                ));
            }
            let min_symbol = reader.read_u32_with_config(224, 0, 512, 0, 4096, 0, 8, 15)?;
            let min_length = reader.read_u32_with_config(3, 0, 4, 0, 5, 2, 9, 8)?;
            let length_config = HybridIntConfig::parse(reader, LZ77_LENGTH_LOG_ALPHA_SIZE)?;
            debug!(
                "LZ77 enabled: min_symbol={}, min_length={}, length_config={:?}",
                min_symbol, min_length, length_config
            );
            Some(Lz77Params { min_symbol, min_length, length_config })
        } else {
            None
        };

        // LZ77 distances get a context of their own after the caller's
        let total_contexts = num_contexts + usize::from(lz77.is_some());
        let cluster_map =
            ClusterMap::parse(reader, total_contexts, total_contexts.min(MAX_CLUSTERS))?;
        let num_clusters = cluster_map.num_clusters();

        let use_prefix_code = reader.read_bool()?;
        let log_alpha_size = if use_prefix_code {
            PREFIX_MAX_BITS
        } else {
            5 + reader.read_bits(2)?
        };
        debug!(
            "code spec: contexts={}, clusters={}, prefix={}, log_alpha_size={}",
            total_contexts, num_clusters, use_prefix_code, log_alpha_size
        );

        let configs = (0..num_clusters)
            .map(|_| HybridIntConfig::parse(reader, log_alpha_size))
            .collect::<JxlResult<Vec<_>>>()?;

        let distributions = if use_prefix_code {
            let alphabet_sizes = (0..num_clusters)
                .map(|_| read_alphabet_size(reader))
                .collect::<JxlResult<Vec<_>>>()?;
            configs
                .into_iter()
                .zip(alphabet_sizes)
                .map(|(config, size)| {
                    PrefixDistribution::parse(reader, size, config).map(SymbolDistribution::Prefix)
                })
                .collect::<JxlResult<Vec<_>>>()?
        } else {
            configs
                .into_iter()
                .map(|config| {
                    AnsDistribution::parse(reader, log_alpha_size, config)
                        .map(SymbolDistribution::Ans)
                })
                .collect::<JxlResult<Vec<_>>>()?
        };

        Ok(Self {
            num_contexts,
            lz77,
            cluster_map,
            use_prefix_code,
            log_alpha_size,
            distributions,
        })
    }

    /// Contexts available to callers (excluding the LZ77 distance context)
    pub fn num_contexts(&self) -> usize {
        self.num_contexts
    }

    pub fn lz77(&self) -> Option<&Lz77Params> {
        self.lz77.as_ref()
    }

    pub fn cluster_map(&self) -> &ClusterMap {
        &self.cluster_map
    }

    pub fn use_prefix_code(&self) -> bool {
        self.use_prefix_code
    }

    pub fn log_alpha_size(&self) -> u32 {
        self.log_alpha_size
    }

    pub fn distributions(&self) -> &[SymbolDistribution] {
        &self.distributions
    }

    fn distribution(&self, ctx: usize) -> JxlResult<&SymbolDistribution> {
        let cluster = self.cluster_map.cluster(ctx).ok_or_else(|| {
            JxlError::ProtocolViolation(format!("Context {} has no cluster", ctx))
        })?;
        self.distributions.get(cluster).ok_or_else(|| {
            JxlError::ProtocolViolation(format!(
                "Cluster map points to nonexistent distribution {} (of {})",
                cluster,
                self.distributions.len()
            ))
        })
    }
}

/// Circular history of decoded values plus the pending copy
#[derive(Debug, Clone)]
struct Lz77Window {
    buffer: Vec<u32>,
    num_decoded: usize,
    copy_pos: usize,
    num_to_copy: u32,
}

impl Lz77Window {
    fn new() -> Self {
        Self {
            buffer: vec![0; WINDOW_SIZE],
            num_decoded: 0,
            copy_pos: 0,
            num_to_copy: 0,
        }
    }

    fn push(&mut self, value: u32) {
        self.buffer[self.num_decoded & WINDOW_MASK] = value;
        self.num_decoded += 1;
    }

    fn start_copy(&mut self, distance: u64, length: u32) {
        let distance = distance.min(self.num_decoded as u64).min(WINDOW_SIZE as u64) as usize;
        self.copy_pos = self.num_decoded - distance;
        self.num_to_copy = length;
    }

    fn next_copy(&mut self) -> Option<u32> {
        if self.num_to_copy == 0 {
            return None;
        }
        self.num_to_copy -= 1;
        let value = self.buffer[self.copy_pos & WINDOW_MASK];
        self.copy_pos += 1;
        self.push(value);
        Some(value)
    }
}

/// Map a raw LZ77 distance to a back-offset in symbols
///
/// With a nonzero multiplier (the image width) small raw values refer to 2D
/// neighbours through the special distance table.
pub fn resolve_distance(raw: u32, multiplier: u32) -> u64 {
    if multiplier == 0 {
        return u64::from(raw) + 1;
    }
    match SPECIAL_DISTANCES.get(raw as usize) {
        Some(&(dx, dy)) => {
            let distance = i64::from(dx) + i64::from(multiplier) * i64::from(dy);
            distance.max(1) as u64
        }
        None => u64::from(raw) - (NUM_SPECIAL_DISTANCES as u64 - 1),
    }
}

/// Symbol decoder for one entropy-coded section
#[derive(Debug, Clone)]
pub struct EntropyStream {
    spec: Arc<CodeSpec>,
    ans_state: AnsState,
    window: Option<Lz77Window>,
}

impl EntropyStream {
    /// Parse the section header and open a stream on it
    pub fn new(
        reader: &mut BitstreamReader,
        num_contexts: usize,
        disallow_lz77: bool,
    ) -> JxlResult<Self> {
        let spec = CodeSpec::parse(reader, num_contexts, disallow_lz77)?;
        Ok(Self::from_spec(Arc::new(spec)))
    }

    /// Open a fresh stream on an already parsed header
    pub fn from_spec(spec: Arc<CodeSpec>) -> Self {
        let window = spec.lz77.map(|_| Lz77Window::new());
        Self {
            spec,
            ans_state: AnsState::new(),
            window,
        }
    }

    pub fn spec(&self) -> &Arc<CodeSpec> {
        &self.spec
    }

    pub fn ans_state(&self) -> &AnsState {
        &self.ans_state
    }

    pub fn read_symbol(&mut self, reader: &mut BitstreamReader, ctx: usize) -> JxlResult<u32> {
        self.read_symbol_with_distance_multiplier(reader, ctx, 0)
    }

    /// Decode one value for context `ctx`
    ///
    /// `distance_multiplier` is the row stride used to interpret short LZ77
    /// distances; 0 disables the special distance table.
    pub fn read_symbol_with_distance_multiplier(
        &mut self,
        reader: &mut BitstreamReader,
        ctx: usize,
        distance_multiplier: u32,
    ) -> JxlResult<u32> {
        if let Some(value) = self.window.as_mut().and_then(Lz77Window::next_copy) {
            return Ok(value);
        }

        let spec = &self.spec;
        if ctx >= spec.num_contexts {
            return Err(JxlError::ProtocolViolation(format!(
                "Context {} too large for {} contexts",
                ctx, spec.num_contexts
            )));
        }
        let dist = spec.distribution(ctx)?;
        let token = dist.read_symbol(reader, &mut self.ans_state)?;

        if let (Some(lz77), Some(window)) = (&spec.lz77, self.window.as_mut()) {
            if token >= lz77.min_symbol {
                let length = lz77
                    .length_config
                    .decode(reader, token - lz77.min_symbol)?
                    .checked_add(lz77.min_length)
                    .ok_or_else(|| {
                        JxlError::ProtocolViolation("LZ77 length overflow".to_string())
                    })?;
                let raw = spec
                    .distribution(spec.num_contexts)?
                    .read_value(reader, &mut self.ans_state)?;
                let distance = resolve_distance(raw, distance_multiplier);
                trace!(
                    "LZ77 copy: length={}, raw distance={}, distance={}, decoded={}",
                    length, raw, distance, window.num_decoded
                );
                window.start_copy(distance, length);
                return window.next_copy().ok_or_else(|| {
                    JxlError::ProtocolViolation("LZ77 copy of zero length".to_string())
                });
            }
        }

        let value = dist.config().decode(reader, token)?;
        if let Some(window) = self.window.as_mut() {
            window.push(value);
        }
        Ok(value)
    }

    /// Check the ANS register against its terminal value
    ///
    /// Prefix-coded streams are always valid. An ANS stream that never decoded
    /// a symbol reads its register now.
    pub fn validate_final_state(mut self, reader: &mut BitstreamReader) -> JxlResult<bool> {
        if self.spec.use_prefix_code {
            return Ok(true);
        }
        let state = self.ans_state.get_or_seed(reader)?;
        if state != ANS_FINAL_STATE {
            debug!("ANS final state 0x{:08x} != 0x{:08x}", state, ANS_FINAL_STATE);
        }
        Ok(state == ANS_FINAL_STATE)
    }
}

/// Map an unsigned value to a signed one (0, -1, 1, -2, 2, ...)
pub fn unpack_signed(x: u32) -> i32 {
    ((x >> 1) as i32) ^ -((x & 1) as i32)
}
