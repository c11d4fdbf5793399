//! Canonical variable-length code tables
//!
//! A `VlcTable` is a flat lookup table indexed by the next `bits` bits of the
//! stream. Because JPEG XL reads bits least-significant first, every codeword
//! is stored at its bit-reversed position, replicated over all values of the
//! unused high bits.

use std::sync::OnceLock;

use log::trace;

use crate::bitstream::BitstreamReader;
use crate::error::{JxlError, JxlResult};

/// Marker for table slots no code maps to
pub const INVALID_SYMBOL: u32 = u32::MAX;

/// Longest code length the table builder accepts
pub const MAX_TABLE_BITS: u32 = 16;

/// One slot of a decode table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlcEntry {
    pub symbol: u32,
    pub length: u8,
}

impl VlcEntry {
    const EMPTY: VlcEntry = VlcEntry { symbol: INVALID_SYMBOL, length: 0 };

    pub fn is_valid(&self) -> bool {
        self.symbol != INVALID_SYMBOL
    }
}

/// Flat decode table of `2^bits` entries
#[derive(Debug, Clone)]
pub struct VlcTable {
    bits: u32,
    entries: Vec<VlcEntry>,
}

impl VlcTable {
    /// Build a table from code lengths given in code order
    ///
    /// Codes are handed out in array order: each positive length takes the
    /// next `length`-bit codeword; a negative length `-l` reserves an `l`-bit
    /// codeword without assigning a symbol; zero lengths are skipped. The
    /// lengths must describe a complete prefix code.
    pub fn new(bits: u32, lengths: &[i32], symbols: Option<&[u32]>) -> JxlResult<Self> {
        if bits > MAX_TABLE_BITS {
            return Err(JxlError::MalformedDistribution(format!(
                "VLC table of {} bits exceeds the {} bit limit",
                bits, MAX_TABLE_BITS
            )));
        }
        if let Some(symbols) = symbols {
            if symbols.len() < lengths.len() {
                return Err(JxlError::MalformedDistribution(format!(
                    "{} symbols given for {} VLC lengths",
                    symbols.len(),
                    lengths.len()
                )));
            }
        }

        const FULL: u64 = 1 << 32;
        let mut entries = vec![VlcEntry::EMPTY; 1usize << bits];
        let mut code: u64 = 0;

        for (i, &raw_len) in lengths.iter().enumerate() {
            if raw_len == 0 {
                continue;
            }
            let assign = raw_len > 0;
            let len = raw_len.unsigned_abs();
            if len > 32 {
                return Err(JxlError::MalformedDistribution(format!("VLC length {} too long", len)));
            }
            let step = 1u64 << (32 - len);
            if code + step > FULL {
                return Err(JxlError::MalformedDistribution("Too many VLC codes".to_string()));
            }

            if assign {
                if len > bits {
                    return Err(JxlError::MalformedDistribution(format!(
                        "VLC table too small: code length {} > {} bits",
                        len, bits
                    )));
                }
                let symbol = symbols.map_or(i as u32, |s| s[i]);
                let codeword = (code >> (32 - len)) as u32;
                let reversed = codeword.reverse_bits() >> (32 - len);
                let entry = VlcEntry { symbol, length: len as u8 };

                for high in 0..(1usize << (bits - len)) {
                    let slot = &mut entries[reversed as usize | (high << len)];
                    if slot.is_valid() && *slot != entry {
                        return Err(JxlError::MalformedDistribution(format!(
                            "Illegal VLC codes: symbol {} collides with symbol {}",
                            symbol, slot.symbol
                        )));
                    }
                    *slot = entry;
                }
            }

            code += step;
        }

        if code < FULL {
            return Err(JxlError::MalformedDistribution("Not enough VLC codes".to_string()));
        }

        Ok(Self { bits, entries })
    }

    /// Build the canonical code for per-symbol lengths (0 = unused symbol)
    pub fn from_code_lengths(code_lengths: &[u8]) -> JxlResult<Self> {
        let mut order: Vec<(u8, u32)> = code_lengths
            .iter()
            .enumerate()
            .filter(|&(_, &len)| len > 0)
            .map(|(sym, &len)| (len, sym as u32))
            .collect();
        order.sort_unstable();

        let bits = order.last().map_or(0, |&(len, _)| u32::from(len));
        let lengths: Vec<i32> = order.iter().map(|&(len, _)| i32::from(len)).collect();
        let symbols: Vec<u32> = order.iter().map(|&(_, sym)| sym).collect();
        trace!("canonical VLC: {} codes, max length {}", lengths.len(), bits);

        Self::new(bits, &lengths, Some(&symbols))
    }

    /// A zero-bit table that always yields `symbol`
    pub fn single(symbol: u32) -> Self {
        Self {
            bits: 0,
            entries: vec![VlcEntry { symbol, length: 0 }],
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Entry for the given lookahead bits (only the low `bits` are used)
    pub fn lookup(&self, peek: u32) -> VlcEntry {
        let mask = (1u32 << self.bits) - 1;
        self.entries[(peek & mask) as usize]
    }

    /// Decode one symbol, consuming exactly its code length
    pub fn decode(&self, reader: &mut BitstreamReader) -> JxlResult<u32> {
        let peek = reader.peek_bits(self.bits as usize)?;
        let entry = self.lookup(peek);
        if !entry.is_valid() {
            return Err(JxlError::MalformedDistribution(format!(
                "No VLC code for bits 0x{:x}",
                peek
            )));
        }
        reader.skip_bits(entry.length as usize)?;
        Ok(entry.symbol)
    }
}

/// Fixed code for ANS log-counts (symbols 0..=13, 13 being the RLE escape),
/// listed in code order.
const LOG_COUNT_LENGTHS: [i32; 14] = [3, 3, 3, 3, 7, 7, 6, 5, 4, 3, 4, 4, 4, 4];
const LOG_COUNT_SYMBOLS: [u32; 14] = [10, 6, 7, 9, 12, 13, 11, 0, 4, 8, 3, 1, 5, 2];

/// Fixed code for prefix-code "code length code" lengths (symbols 0..=5),
/// listed in code order.
const LEVEL0_LENGTHS: [i32; 6] = [2, 2, 2, 3, 4, 4];
const LEVEL0_SYMBOLS: [u32; 6] = [0, 3, 4, 2, 1, 5];

/// 7-bit table for ANS log-counts
pub fn log_count_table() -> &'static VlcTable {
    static TABLE: OnceLock<VlcTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        VlcTable::new(7, &LOG_COUNT_LENGTHS, Some(&LOG_COUNT_SYMBOLS))
            .expect("log-count code is a complete prefix code")
    })
}

/// 4-bit table for level-0 prefix code lengths
pub fn level0_table() -> &'static VlcTable {
    static TABLE: OnceLock<VlcTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        VlcTable::new(4, &LEVEL0_LENGTHS, Some(&LEVEL0_SYMBOLS))
            .expect("level-0 code is a complete prefix code")
    })
}
