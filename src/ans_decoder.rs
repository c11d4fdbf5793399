//! ANS (Asymmetric Numeral System) distributions and decoder state
//!
//! Each distribution spreads a total mass of `2^12` over its alphabet and is
//! decoded through an alias table of `2^log_alpha_size` equally sized
//! buckets. The 32-bit decoder register lives in [`AnsState`] and is shared by
//! every distribution of one stream.

use log::{debug, trace};

use crate::bitstream::BitstreamReader;
use crate::error::{JxlError, JxlResult};
use crate::hybrid_int::HybridIntConfig;
use crate::vlc::log_count_table;

/// Precision of ANS frequencies
pub const DIST_BITS: u32 = 12;
/// Total mass of every ANS distribution
pub const DIST_SUM: u32 = 1 << DIST_BITS;
/// Register value every well-formed ANS stream ends with
pub const ANS_FINAL_STATE: u32 = 0x130000;

/// Log-count code that introduces a run of repeated frequencies
const RLE_LOG_COUNT: u32 = 13;

/// ANS decoder register, seeded from the stream on first use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnsState {
    state: Option<u32>,
}

impl AnsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn value(&self) -> Option<u32> {
        self.state
    }

    /// Current register, reading the initial 32 bits if not yet seeded
    pub fn get_or_seed(&mut self, reader: &mut BitstreamReader) -> JxlResult<u32> {
        match self.state {
            Some(state) => Ok(state),
            None => {
                let state = reader.read_bits(32)?;
                trace!("ANS state seeded with 0x{:08x} at bit {}", state, reader.bit_position());
                self.state = Some(state);
                Ok(state)
            }
        }
    }

    fn set(&mut self, state: u32) {
        self.state = Some(state);
    }
}

/// One alias table bucket
///
/// Positions below `cutoff` decode to the bucket's own index; the rest decode
/// to `symbol` at `offset + pos`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasBucket {
    pub cutoff: u16,
    pub offset: i16,
    pub symbol: u16,
}

/// ANS distribution with its alias table
#[derive(Debug, Clone)]
pub struct AnsDistribution {
    config: HybridIntConfig,
    log_alpha_size: u32,
    frequencies: Vec<u16>,
    buckets: Vec<AliasBucket>,
}

impl AnsDistribution {
    /// Parse a distribution table from the bitstream
    pub fn parse(
        reader: &mut BitstreamReader,
        log_alpha_size: u32,
        config: HybridIntConfig,
    ) -> JxlResult<Self> {
        let table_size = 1usize << log_alpha_size;

        let frequencies = if reader.read_bool()? {
            if reader.read_bool()? {
                read_dual_peak(reader, table_size)?
            } else {
                let v = reader.read_u8()? as usize;
                check_alphabet_size(v + 1, table_size)?;
                let mut frequencies = vec![0u16; v + 1];
                frequencies[v] = DIST_SUM as u16;
                frequencies
            }
        } else if reader.read_bool()? {
            let alphabet_size = reader.read_u8()? as usize + 1;
            check_alphabet_size(alphabet_size, table_size)?;
            flat_frequencies(alphabet_size)
        } else {
            read_shaped(reader, table_size)?
        };

        debug!(
            "ANS distribution: alphabet_size={}, log_alpha_size={}",
            frequencies.len(),
            log_alpha_size
        );

        Self::from_frequencies(frequencies, log_alpha_size, config)
    }

    /// Build a distribution from explicit frequencies summing to 4096
    pub fn from_frequencies(
        frequencies: Vec<u16>,
        log_alpha_size: u32,
        config: HybridIntConfig,
    ) -> JxlResult<Self> {
        if !(5..=8).contains(&log_alpha_size) {
            return Err(JxlError::MalformedDistribution(format!(
                "ANS log_alpha_size {} outside 5..=8",
                log_alpha_size
            )));
        }
        check_alphabet_size(frequencies.len(), 1 << log_alpha_size)?;
        let total: u32 = frequencies.iter().map(|&f| u32::from(f)).sum();
        if total != DIST_SUM {
            return Err(JxlError::MalformedDistribution(format!(
                "ANS frequencies sum to {} instead of {}",
                total, DIST_SUM
            )));
        }

        let buckets = build_alias_table(&frequencies, log_alpha_size)?;
        Ok(Self {
            config,
            log_alpha_size,
            frequencies,
            buckets,
        })
    }

    pub fn config(&self) -> &HybridIntConfig {
        &self.config
    }

    pub fn log_alpha_size(&self) -> u32 {
        self.log_alpha_size
    }

    pub fn alphabet_size(&self) -> usize {
        self.frequencies.len()
    }

    pub fn frequencies(&self) -> &[u16] {
        &self.frequencies
    }

    pub fn buckets(&self) -> &[AliasBucket] {
        &self.buckets
    }

    /// Map a 12-bit table index to `(symbol, offset within the symbol's range)`
    pub fn lookup(&self, index: u32) -> (u32, u32) {
        let log_bucket_size = DIST_BITS - self.log_alpha_size;
        let index = index & (DIST_SUM - 1);
        let i = (index >> log_bucket_size) as usize;
        let pos = index & ((1 << log_bucket_size) - 1);
        let bucket = &self.buckets[i];

        if pos >= u32::from(bucket.cutoff) {
            let offset = i32::from(bucket.offset) + pos as i32;
            (u32::from(bucket.symbol), offset as u32)
        } else {
            (i as u32, pos)
        }
    }

    /// Decode one token, advancing the shared register
    pub fn read_symbol(&self, reader: &mut BitstreamReader, ans: &mut AnsState) -> JxlResult<u32> {
        let state = ans.get_or_seed(reader)?;
        let (symbol, offset) = self.lookup(state);

        let freq = self
            .frequencies
            .get(symbol as usize)
            .copied()
            .filter(|&f| f != 0)
            .ok_or_else(|| {
                JxlError::MalformedDistribution(format!(
                    "Alias table points at empty symbol {}",
                    symbol
                ))
            })?;

        let next = u64::from(freq) * u64::from(state >> DIST_BITS) + u64::from(offset);
        let mut next = u32::try_from(next).map_err(|_| {
            JxlError::ProtocolViolation(format!("ANS state overflow: 0x{:x}", next))
        })?;
        if next < (1 << 16) {
            next = (next << 16) | reader.read_bits(16)?;
        }
        ans.set(next);

        Ok(symbol)
    }
}

fn check_alphabet_size(alphabet_size: usize, table_size: usize) -> JxlResult<()> {
    if alphabet_size > table_size {
        return Err(JxlError::MalformedDistribution(format!(
            "Illegal alphabet size {} for table of {}",
            alphabet_size, table_size
        )));
    }
    Ok(())
}

/// Two symbols sharing the full mass
fn read_dual_peak(reader: &mut BitstreamReader, table_size: usize) -> JxlResult<Vec<u16>> {
    let v1 = reader.read_u8()? as usize;
    let v2 = reader.read_u8()? as usize;
    if v1 == v2 {
        return Err(JxlError::MalformedDistribution(format!("Overlapping peaks at symbol {}", v1)));
    }
    let alphabet_size = v1.max(v2) + 1;
    check_alphabet_size(alphabet_size, table_size)?;

    let mut frequencies = vec![0u16; alphabet_size];
    let first = reader.read_bits(DIST_BITS as usize)? as u16;
    frequencies[v1] = first;
    frequencies[v2] = DIST_SUM as u16 - first;
    Ok(frequencies)
}

/// Mass spread as evenly as possible, remainder going to the first symbols
fn flat_frequencies(alphabet_size: usize) -> Vec<u16> {
    let base = DIST_SUM as usize / alphabet_size;
    let bias_size = DIST_SUM as usize % alphabet_size;
    (0..alphabet_size)
        .map(|i| (if i < bias_size { base + 1 } else { base }) as u16)
        .collect()
}

enum LogCount {
    Count(u32),
    Repeat(usize),
}

/// Distribution coded as per-symbol log-counts with run-length repeats
fn read_shaped(reader: &mut BitstreamReader, table_size: usize) -> JxlResult<Vec<u16>> {
    let len = if reader.read_bool()? {
        if reader.read_bool()? {
            if reader.read_bool()? { 3 } else { 2 }
        } else {
            1
        }
    } else {
        0
    };
    let shift = reader.read_bits(len)? as i32 + (1 << len) - 1;
    if shift > 13 {
        return Err(JxlError::MalformedDistribution(format!("ANS shift {} > 13", shift)));
    }
    let alphabet_size = reader.read_u8()? as usize + 3;
    check_alphabet_size(alphabet_size, table_size)?;

    let table = log_count_table();
    let mut codes = Vec::with_capacity(alphabet_size);
    let mut covered = 0;
    let mut omit_log = None;
    while covered < alphabet_size {
        let code = table.decode(reader)?;
        if code == RLE_LOG_COUNT {
            let repeat = reader.read_u8()? as usize + 4;
            covered += repeat;
            codes.push(LogCount::Repeat(repeat));
        } else {
            covered += 1;
            omit_log = omit_log.max(Some(code));
            codes.push(LogCount::Count(code));
        }
    }
    if covered != alphabet_size {
        return Err(JxlError::MalformedDistribution(format!(
            "Log-count runs cover {} symbols, alphabet has {}",
            covered, alphabet_size
        )));
    }
    let Some(omit_log) = omit_log else {
        return Err(JxlError::MalformedDistribution(
            "Invalid omit position: no counted symbol".to_string(),
        ));
    };
    trace!(
        "ANS shaped distribution: shift={}, alphabet_size={}, omit_log={}",
        shift, alphabet_size, omit_log
    );

    let mut frequencies = vec![0u16; alphabet_size];
    let mut omit_pos = None;
    let mut total = 0u32;
    let mut n = 0;

    for code in codes {
        match code {
            LogCount::Repeat(repeat) => {
                if n > 0 && omit_pos == Some(n - 1) {
                    return Err(JxlError::MalformedDistribution(
                        "Invalid omit position: repeat follows omitted symbol".to_string(),
                    ));
                }
                let prev = if n > 0 { frequencies[n - 1] } else { 0 };
                frequencies[n..n + repeat].fill(prev);
                total += u32::from(prev) * repeat as u32;
                n += repeat;
            }
            LogCount::Count(code) if omit_pos.is_none() && code == omit_log => {
                omit_pos = Some(n);
                n += 1;
            }
            LogCount::Count(code) if code < 2 => {
                frequencies[n] = code as u16;
                total += code;
                n += 1;
            }
            LogCount::Count(code) => {
                let code = (code - 1) as i32;
                let bitcount = (shift - ((DIST_BITS as i32 - code) >> 1)).clamp(0, code);
                let extra = reader.read_bits(bitcount as usize)? as i32;
                let value = (1 << code) + (extra << (code - bitcount));
                frequencies[n] = value as u16;
                total += value as u32;
                n += 1;
            }
        }
    }

    let omit_pos = omit_pos.ok_or_else(|| {
        JxlError::MalformedDistribution("Invalid omit position".to_string())
    })?;
    if total >= DIST_SUM {
        return Err(JxlError::MalformedDistribution(format!(
            "ANS counts total {} leave nothing for omitted symbol {}",
            total, omit_pos
        )));
    }
    frequencies[omit_pos] = (DIST_SUM - total) as u16;

    Ok(frequencies)
}

/// Build alias table from frequencies, using separate overfull and underfull
/// stacks
fn build_alias_table(frequencies: &[u16], log_alpha_size: u32) -> JxlResult<Vec<AliasBucket>> {
    let log_bucket_size = DIST_BITS - log_alpha_size;
    let bucket_size = 1u16 << log_bucket_size;
    let table_size = 1usize << log_alpha_size;

    // Single symbol: every index decodes to it and the state never changes
    if let Some(symbol) = frequencies.iter().position(|&f| u32::from(f) == DIST_SUM) {
        return Ok((0..table_size)
            .map(|i| AliasBucket {
                cutoff: 0,
                offset: (i << log_bucket_size) as i16,
                symbol: symbol as u16,
            })
            .collect());
    }

    let mut cutoffs: Vec<u16> = (0..table_size)
        .map(|i| frequencies.get(i).copied().unwrap_or(0))
        .collect();
    let mut buckets: Vec<AliasBucket> = (0..table_size)
        .map(|i| AliasBucket { cutoff: 0, offset: 0, symbol: i as u16 })
        .collect();

    let mut overfull = Vec::new();
    let mut underfull = Vec::new();
    for (i, &cutoff) in cutoffs.iter().enumerate() {
        if cutoff > bucket_size {
            overfull.push(i);
        } else if cutoff < bucket_size {
            underfull.push(i);
        }
    }

    while let Some(o) = overfull.pop() {
        let u = underfull.pop().ok_or_else(|| {
            JxlError::MalformedDistribution("Alias table has no underfull bucket left".to_string())
        })?;
        let by = bucket_size - cutoffs[u];
        cutoffs[o] -= by;
        buckets[u].symbol = o as u16;
        buckets[u].offset = cutoffs[o] as i16;

        if cutoffs[o] < bucket_size {
            underfull.push(o);
        } else if cutoffs[o] > bucket_size {
            overfull.push(o);
        }
    }

    for (bucket, (i, &cutoff)) in buckets.iter_mut().zip(cutoffs.iter().enumerate()) {
        if cutoff == bucket_size {
            *bucket = AliasBucket { cutoff: 0, offset: 0, symbol: i as u16 };
        } else {
            bucket.cutoff = cutoff;
            bucket.offset -= cutoff as i16;
        }
    }

    Ok(buckets)
}
