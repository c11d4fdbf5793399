//! Brotli-style canonical prefix codes
//!
//! A distribution is either a "simple" code of up to four explicitly listed
//! symbols with fixed length templates, or a "complex" code whose lengths are
//! themselves prefix-coded.

use log::{debug, trace};

use crate::bitstream::BitstreamReader;
use crate::error::{JxlError, JxlResult};
use crate::hybrid_int::{ceil_log2, HybridIntConfig};
use crate::vlc::{level0_table, VlcTable};

/// Longest codeword of a prefix distribution
pub const PREFIX_MAX_BITS: u32 = 15;
/// Largest prefix alphabet
pub const MAX_PREFIX_ALPHABET_SIZE: usize = 1 << PREFIX_MAX_BITS;

/// Order in which code-length code lengths are transmitted
const CODE_LENGTH_ORDER: [usize; 18] =
    [1, 2, 3, 4, 0, 5, 17, 6, 16, 7, 8, 9, 10, 11, 12, 13, 14, 15];
const NUM_CODE_LENGTH_CODES: usize = CODE_LENGTH_ORDER.len();
const DEFAULT_CODE_LENGTH: u8 = 8;
const REPEAT_PREVIOUS_CODE_LENGTH: u32 = 16;
const REPEAT_ZERO_CODE_LENGTH: u32 = 17;

#[derive(Debug, Clone)]
pub enum PrefixCode {
    /// Zero-bit code
    Single(u32),
    Table(VlcTable),
}

/// Prefix-coded distribution
#[derive(Debug, Clone)]
pub struct PrefixDistribution {
    config: HybridIntConfig,
    alphabet_size: usize,
    code: PrefixCode,
}

impl PrefixDistribution {
    /// Parse the code for an alphabet whose size was read beforehand
    pub fn parse(
        reader: &mut BitstreamReader,
        alphabet_size: usize,
        config: HybridIntConfig,
    ) -> JxlResult<Self> {
        if alphabet_size == 0 || alphabet_size > MAX_PREFIX_ALPHABET_SIZE {
            return Err(JxlError::MalformedDistribution(format!(
                "Prefix alphabet size {} out of range",
                alphabet_size
            )));
        }

        let code = if alphabet_size == 1 {
            PrefixCode::Single(0)
        } else {
            let hskip = reader.read_bits(2)? as usize;
            if hskip == 1 {
                read_simple_code(reader, alphabet_size)?
            } else {
                read_complex_code(reader, alphabet_size, hskip)?
            }
        };

        Ok(Self {
            config,
            alphabet_size,
            code,
        })
    }

    pub fn config(&self) -> &HybridIntConfig {
        &self.config
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    pub fn code(&self) -> &PrefixCode {
        &self.code
    }

    /// Decode one token
    pub fn read_symbol(&self, reader: &mut BitstreamReader) -> JxlResult<u32> {
        match &self.code {
            PrefixCode::Single(symbol) => Ok(*symbol),
            PrefixCode::Table(table) => table.decode(reader),
        }
    }
}

/// Read a prefix alphabet size: `1`, or `1 + 2^n + u(n)` with a 4-bit n
pub fn read_alphabet_size(reader: &mut BitstreamReader) -> JxlResult<usize> {
    let size = if reader.read_bool()? {
        let n = reader.read_bits(4)? as usize;
        1 + (1usize << n) + reader.read_bits(n)? as usize
    } else {
        1
    };
    if size > MAX_PREFIX_ALPHABET_SIZE {
        return Err(JxlError::MalformedDistribution(format!(
            "Prefix alphabet size {} exceeds {}",
            size, MAX_PREFIX_ALPHABET_SIZE
        )));
    }
    Ok(size)
}

fn read_simple_code(reader: &mut BitstreamReader, alphabet_size: usize) -> JxlResult<PrefixCode> {
    let nsym = reader.read_bits(2)? as usize + 1;
    let bits_needed = ceil_log2(alphabet_size as u32) as usize;

    let mut symbols = Vec::with_capacity(nsym);
    for i in 0..nsym {
        let symbol = reader.read_bits(bits_needed)? as usize;
        if symbol >= alphabet_size {
            return Err(JxlError::MalformedDistribution(format!(
                "Simple prefix symbol {} out of range (>={})",
                symbol, alphabet_size
            )));
        }
        if let Some(j) = symbols.iter().position(|&s| s == symbol) {
            return Err(JxlError::MalformedDistribution(format!(
                "Duplicate symbol {} at positions {} and {}",
                symbol, j, i
            )));
        }
        symbols.push(symbol);
    }

    let template: &[u8] = match nsym {
        1 => return Ok(PrefixCode::Single(symbols[0] as u32)),
        2 => &[1, 1],
        3 => &[1, 2, 2],
        _ => {
            if reader.read_bool()? {
                &[1, 2, 3, 3]
            } else {
                &[2, 2, 2, 2]
            }
        }
    };
    trace!("simple prefix code: symbols={:?}, lengths={:?}", symbols, template);

    let mut code_lengths = vec![0u8; alphabet_size];
    for (&symbol, &len) in symbols.iter().zip(template) {
        code_lengths[symbol] = len;
    }
    Ok(PrefixCode::Table(VlcTable::from_code_lengths(&code_lengths)?))
}

fn read_complex_code(
    reader: &mut BitstreamReader,
    alphabet_size: usize,
    hskip: usize,
) -> JxlResult<PrefixCode> {
    let level1 = read_code_length_code(reader, hskip)?;

    let mut code_lengths = vec![0u8; alphabet_size];
    let mut symbol = 0;
    let mut prev_code_len = DEFAULT_CODE_LENGTH;
    let mut repeat: usize = 0;
    let mut repeat_code_len = 0u8;
    let mut space: i64 = 1 << PREFIX_MAX_BITS;

    while symbol < alphabet_size && space > 0 {
        let code_len = level1.decode(reader)?;
        if code_len < REPEAT_PREVIOUS_CODE_LENGTH {
            repeat = 0;
            code_lengths[symbol] = code_len as u8;
            if code_len != 0 {
                prev_code_len = code_len as u8;
                space -= (1 << PREFIX_MAX_BITS) >> code_len;
            }
            symbol += 1;
            continue;
        }

        let (extra_bits, new_len) = match code_len {
            REPEAT_PREVIOUS_CODE_LENGTH => (2, prev_code_len),
            REPEAT_ZERO_CODE_LENGTH => (3, 0),
            _ => {
                return Err(JxlError::MalformedDistribution(format!(
                    "Invalid code length symbol {}",
                    code_len
                )))
            }
        };
        if repeat_code_len != new_len {
            repeat = 0;
            repeat_code_len = new_len;
        }
        let old_repeat = repeat;
        if repeat > 0 {
            repeat = (repeat - 2) << extra_bits;
        }
        repeat += reader.read_bits(extra_bits)? as usize + 3;
        let repeat_delta = repeat - old_repeat;

        if symbol + repeat_delta > alphabet_size {
            return Err(JxlError::MalformedDistribution(format!(
                "Code length repeat of {} at symbol {} overflows alphabet of {}",
                repeat_delta, symbol, alphabet_size
            )));
        }
        code_lengths[symbol..symbol + repeat_delta].fill(repeat_code_len);
        symbol += repeat_delta;
        if repeat_code_len != 0 {
            space -= (repeat_delta as i64) << (PREFIX_MAX_BITS - u32::from(repeat_code_len));
        }
    }

    if space != 0 {
        return Err(JxlError::MalformedDistribution(format!(
            "Prefix code lengths leave space {} (symbol {} of {})",
            space, symbol, alphabet_size
        )));
    }
    debug!("complex prefix code: alphabet_size={}, hskip={}", alphabet_size, hskip);

    Ok(PrefixCode::Table(VlcTable::from_code_lengths(&code_lengths)?))
}

/// Read the lengths of the code that codes the code lengths
fn read_code_length_code(reader: &mut BitstreamReader, hskip: usize) -> JxlResult<VlcTable> {
    let mut lengths = [0u8; NUM_CODE_LENGTH_CODES];
    let mut space: i32 = 32;
    let mut num_codes = 0;

    for &symbol in &CODE_LENGTH_ORDER[hskip..] {
        let len = level0_table().decode(reader)?;
        lengths[symbol] = len as u8;
        if len != 0 {
            space -= 32 >> len;
            num_codes += 1;
            if space <= 0 {
                break;
            }
        }
    }

    if num_codes == 1 {
        let symbol = lengths.iter().position(|&l| l != 0).unwrap_or(0);
        return Ok(VlcTable::single(symbol as u32));
    }
    if space != 0 {
        return Err(JxlError::MalformedDistribution(format!(
            "Invalid level-1 prefix codes: space {}, {} codes",
            space, num_codes
        )));
    }

    VlcTable::from_code_lengths(&lengths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::BitWriter;

    fn plain() -> HybridIntConfig {
        HybridIntConfig::new(15, 0, 0).unwrap()
    }

    fn decode_all(dist: &PrefixDistribution, reader: &mut BitstreamReader, n: usize) -> Vec<u32> {
        (0..n).map(|_| dist.read_symbol(reader).unwrap()).collect()
    }

    #[test]
    fn test_alphabet_of_one_reads_nothing() {
        let mut reader = BitstreamReader::new(vec![]);
        let dist = PrefixDistribution::parse(&mut reader, 1, plain()).unwrap();
        assert_eq!(dist.read_symbol(&mut reader).unwrap(), 0);
        assert_eq!(reader.bit_position(), 0);
    }

    #[test]
    fn test_read_alphabet_size() {
        let mut w = BitWriter::new();
        w.write_bool(false);
        w.write_bool(true);
        w.write_bits(3, 4);
        w.write_bits(7, 3);
        let mut reader = BitstreamReader::new(w.finish());
        assert_eq!(read_alphabet_size(&mut reader).unwrap(), 1);
        assert_eq!(read_alphabet_size(&mut reader).unwrap(), 16);

        let mut w = BitWriter::new();
        w.write_bool(true);
        w.write_bits(15, 4);
        w.write_bits(0, 15);
        let mut reader = BitstreamReader::new(w.finish());
        assert!(matches!(
            read_alphabet_size(&mut reader),
            Err(JxlError::MalformedDistribution(_))
        ));
    }

    #[test]
    fn test_simple_single_symbol() {
        let mut w = BitWriter::new();
        w.write_bits(1, 2); // hskip
        w.write_bits(0, 2); // nsym 1
        w.write_bits(5, 3);
        let mut reader = BitstreamReader::new(w.finish());
        let dist = PrefixDistribution::parse(&mut reader, 8, plain()).unwrap();
        let end = reader.bit_position();
        assert_eq!(decode_all(&dist, &mut reader, 3), vec![5, 5, 5]);
        assert_eq!(reader.bit_position(), end);
    }

    #[test]
    fn test_simple_two_symbols_sorted() {
        let mut w = BitWriter::new();
        w.write_bits(1, 2);
        w.write_bits(1, 2); // nsym 2
        w.write_bits(6, 3);
        w.write_bits(2, 3);
        // canonical order puts 2 before 6
        w.write_code("0");
        w.write_code("1");
        let mut reader = BitstreamReader::new(w.finish());
        let dist = PrefixDistribution::parse(&mut reader, 8, plain()).unwrap();
        assert_eq!(decode_all(&dist, &mut reader, 2), vec![2, 6]);
    }

    #[test]
    fn test_simple_four_symbols_tree_select() {
        let mut w = BitWriter::new();
        w.write_bits(1, 2);
        w.write_bits(3, 2); // nsym 4
        for s in [3, 0, 2, 1] {
            w.write_bits(s, 2);
        }
        w.write_bool(true); // lengths 1, 2, 3, 3
        // 3 -> "0", 0 -> "10", 1 -> "110", 2 -> "111"
        w.write_code("111");
        w.write_code("0");
        w.write_code("110");
        w.write_code("10");
        let mut reader = BitstreamReader::new(w.finish());
        let dist = PrefixDistribution::parse(&mut reader, 4, plain()).unwrap();
        assert_eq!(decode_all(&dist, &mut reader, 4), vec![2, 3, 1, 0]);
    }

    #[test]
    fn test_simple_duplicate_symbol() {
        let mut w = BitWriter::new();
        w.write_bits(1, 2);
        w.write_bits(2, 2); // nsym 3
        for s in [1, 4, 1] {
            w.write_bits(s, 3);
        }
        let mut reader = BitstreamReader::new(w.finish());
        let err = PrefixDistribution::parse(&mut reader, 8, plain()).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_simple_symbol_out_of_range() {
        let mut w = BitWriter::new();
        w.write_bits(1, 2);
        w.write_bits(1, 2);
        w.write_bits(0, 3);
        w.write_bits(6, 3);
        let mut reader = BitstreamReader::new(w.finish());
        assert!(matches!(
            PrefixDistribution::parse(&mut reader, 5, plain()),
            Err(JxlError::MalformedDistribution(_))
        ));
    }

    /// Level-0 codes (first-bit-first) for code-length code lengths 0..=5
    const LEVEL0: [&str; 6] = ["00", "1110", "110", "01", "10", "1111"];

    #[test]
    fn test_complex_code() {
        let mut w = BitWriter::new();
        w.write_bits(0, 2); // hskip 0
        // order starts 1, 2, 3: lengths 1, 2, 2 fill the space of 32
        w.write_code(LEVEL0[1]);
        w.write_code(LEVEL0[2]);
        w.write_code(LEVEL0[2]);
        // level-1 code: 1 -> "0", 2 -> "10", 3 -> "11"
        // symbol lengths [1, 2, 3, 3]
        w.write_code("0");
        w.write_code("10");
        w.write_code("11");
        w.write_code("11");
        // symbols 0 -> "0", 1 -> "10", 2 -> "110", 3 -> "111"
        w.write_code("111");
        w.write_code("10");
        w.write_code("0");
        w.write_code("110");
        let mut reader = BitstreamReader::new(w.finish());
        let dist = PrefixDistribution::parse(&mut reader, 4, plain()).unwrap();
        assert_eq!(decode_all(&dist, &mut reader, 4), vec![3, 1, 0, 2]);
    }

    #[test]
    fn test_complex_repeat_previous() {
        let mut w = BitWriter::new();
        w.write_bits(0, 2);
        // lengths: code 1 = 2, code 2 = 2, code 3 = 2 (space 32 - 24 = 8),
        // code 4 = 0, code 0 = 0, code 5 = 0, code 17 = 0, code 6 = 0,
        // code 16 = 2 (space 0)
        for len in [2, 2, 2, 0, 0, 0, 0, 0, 2] {
            w.write_code(LEVEL0[len]);
        }
        // level-1 code: 1 -> "00", 2 -> "01", 3 -> "10", 16 -> "11"
        // lengths 3, 3, then six more 3s (2 extra bits, value 3): eight
        // length-3 codes fill the space
        w.write_code("10");
        w.write_code("10");
        w.write_code("11");
        w.write_bits(3, 2);
        let mut reader = BitstreamReader::new(w.finish());
        let dist = PrefixDistribution::parse(&mut reader, 10, plain()).unwrap();
        match dist.code() {
            PrefixCode::Table(table) => assert_eq!(table.bits(), 3),
            PrefixCode::Single(_) => panic!("expected a table"),
        }
        // symbols 8 and 9 are unused
        let mut w = BitWriter::new();
        w.write_code("111");
        w.write_code("000");
        let mut reader = BitstreamReader::new(w.finish());
        assert_eq!(decode_all(&dist, &mut reader, 2), vec![7, 0]);
    }

    #[test]
    fn test_complex_zero_run() {
        let mut w = BitWriter::new();
        w.write_bits(0, 2);
        // code 1 = 1, code 2 = 0, code 3 = 0, code 4 = 0, code 0 = 0,
        // code 5 = 0, code 17 = 1 (space 0)
        for len in [1, 0, 0, 0, 0, 0, 1] {
            w.write_code(LEVEL0[len]);
        }
        // level-1: 1 -> "0", 17 -> "1"
        // symbol 0 len 1, zeros x 5 (3 extra bits, value 2), symbol 6 len 1
        w.write_code("0");
        w.write_code("1");
        w.write_bits(2, 3);
        w.write_code("0");
        let mut reader = BitstreamReader::new(w.finish());
        let dist = PrefixDistribution::parse(&mut reader, 8, plain()).unwrap();

        let mut w = BitWriter::new();
        w.write_code("1");
        w.write_code("0");
        let mut reader = BitstreamReader::new(w.finish());
        assert_eq!(decode_all(&dist, &mut reader, 2), vec![6, 0]);
    }

    #[test]
    fn test_complex_repeat_overflows_alphabet() {
        let mut w = BitWriter::new();
        w.write_bits(0, 2);
        for len in [1, 0, 0, 0, 0, 0, 1] {
            w.write_code(LEVEL0[len]);
        }
        w.write_code("0");
        w.write_code("1");
        w.write_bits(7, 3); // 10 zeros, only 3 symbols remain
        let mut reader = BitstreamReader::new(w.finish());
        let err = PrefixDistribution::parse(&mut reader, 4, plain()).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_complex_incomplete_lengths() {
        let mut w = BitWriter::new();
        w.write_bits(0, 2);
        w.write_code(LEVEL0[1]);
        w.write_code(LEVEL0[2]);
        w.write_code(LEVEL0[2]);
        // symbol lengths 1, 2, 1 oversubscribe the code
        w.write_code("0");
        w.write_code("10");
        w.write_code("0");
        let mut reader = BitstreamReader::new(w.finish());
        let err = PrefixDistribution::parse(&mut reader, 3, plain()).unwrap_err();
        assert!(matches!(err, JxlError::MalformedDistribution(_)));
    }

    #[test]
    fn test_code_length_code_incomplete() {
        let mut w = BitWriter::new();
        w.write_bits(2, 2); // hskip 2: order starts at code 3
        // two length-2 codes then all zeros: space 16 left
        w.write_code(LEVEL0[2]);
        w.write_code(LEVEL0[2]);
        for _ in 0..14 {
            w.write_code(LEVEL0[0]);
        }
        let mut reader = BitstreamReader::new(w.finish());
        let err = PrefixDistribution::parse(&mut reader, 8, plain()).unwrap_err();
        assert!(err.to_string().contains("level-1"));
    }
}
