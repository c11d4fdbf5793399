//! Bit-level writers for building test streams
//!
//! `tests/common/mod.rs` carries its own copy: integration tests and benches
//! link the library without `cfg(test)`, so they cannot reach this module.

use crate::ans_decoder::{AnsDistribution, ANS_FINAL_STATE, DIST_BITS, DIST_SUM};

/// Writes bits least-significant first, mirroring `BitstreamReader`
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bits(&mut self, value: u64, n: usize) {
        for i in 0..n {
            if self.bit_pos % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (self.bit_pos % 8);
            }
            self.bit_pos += 1;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u64, 1);
    }

    /// Write a codeword given first-bit-first, e.g. "110"
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

    /// Append ANS-coded symbols: initial state, then the refill words in
    /// decode order
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

/// Encode symbols so that decoding them ends in the final ANS state
///
/// Returns the initial state and the 16-bit refill words in the order the
/// decoder consumes them.
pub fn encode_ans(steps: &[(&AnsDistribution, u32)]) -> (u32, Vec<u16>) {
    let mut state = u64::from(ANS_FINAL_STATE);
    let mut words = Vec::new();

    for &(dist, symbol) in steps.iter().rev() {
        let freq = u64::from(dist.frequencies()[symbol as usize]);
        assert!(freq > 0, "symbol {} has zero frequency", symbol);
        if state >= freq << (32 - DIST_BITS) {
            words.push((state & 0xffff) as u16);
            state >>= 16;
        }
        let offset = (state % freq) as u32;
        let slot = (0..DIST_SUM)
            .find(|&index| dist.lookup(index) == (symbol, offset))
            .expect("alias table covers every offset");
        state = ((state / freq) << DIST_BITS) | u64::from(slot);
    }

    words.reverse();
    (state as u32, words)
}
