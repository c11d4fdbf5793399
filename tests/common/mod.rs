//! Stream builders shared by the integration tests and benches.
//!
//! Mirrors `src/test_util.rs`, which is only compiled into the unit tests.

#![allow(dead_code)]

use jxl_entropy::{AnsDistribution, ANS_FINAL_STATE, DIST_BITS, DIST_SUM};

/// LSB-first bit writer matching `BitstreamReader`
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn write_bits(&mut self, value: u64, n: usize) {
        for i in 0..n {
            if self.bit_pos % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 != 0 {
                *self.bytes.last_mut().unwrap() |= 1 << (self.bit_pos % 8);
            }
            self.bit_pos += 1;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u64, 1);
    }

    /// Codeword written first bit first, e.g. "110"
    pub fn write_code(&mut self, code: &str) {
        for c in code.chars() {
            self.write_bool(c == '1');
        }
    }

    pub fn write_u8(&mut self, value: u32) {
        if value == 0 {
            self.write_bool(false);
            return;
        }
        let n = 31 - value.leading_zeros();
        self.write_bool(true);
        self.write_bits(u64::from(n), 3);
        self.write_bits(u64::from(value - (1 << n)), n as usize);
    }

    pub fn write_ans(&mut self, steps: &[(&AnsDistribution, u32)]) {
        let (state, words) = encode_ans(steps);
        self.write_bits(u64::from(state), 32);
        for word in words {
            self.write_bits(u64::from(word), 16);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reverse-encode symbols so that decoding them ends in the final ANS state
pub fn encode_ans(steps: &[(&AnsDistribution, u32)]) -> (u32, Vec<u16>) {
    let mut state = u64::from(ANS_FINAL_STATE);
    let mut words = Vec::new();

    for &(dist, symbol) in steps.iter().rev() {
        let freq = u64::from(dist.frequencies()[symbol as usize]);
        if state >= freq << (32 - DIST_BITS) {
            words.push((state & 0xffff) as u16);
            state >>= 16;
        }
        let offset = (state % freq) as u32;
        let slot = (0..DIST_SUM)
            .find(|&index| dist.lookup(index) == (symbol, offset))
            .unwrap();
        state = ((state / freq) << DIST_BITS) | u64::from(slot);
    }

    words.reverse();
    (state as u32, words)
}

/// Canonical codewords (first bit first) for per-symbol lengths
pub fn canonical_codes(lengths: &[u8]) -> Vec<Option<String>> {
    let mut order: Vec<(u8, usize)> = lengths
        .iter()
        .enumerate()
        .filter(|&(_, &len)| len > 0)
        .map(|(sym, &len)| (len, sym))
        .collect();
    order.sort_unstable();

    let mut codes = vec![None; lengths.len()];
    let mut code = 0u32;
    let mut prev_len = 0u8;
    for (len, sym) in order {
        code <<= len - prev_len;
        prev_len = len;
        codes[sym] = Some(format!("{:0width$b}", code, width = len as usize));
        code += 1;
    }
    codes
}
