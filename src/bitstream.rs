use crate::error::{JxlError, JxlResult};

/// Bitstream reader for JPEG XL entropy-coded sections
///
/// Bits are consumed least-significant first within each byte, which is the
/// order every JPEG XL field uses.
#[derive(Debug, Clone)]
pub struct BitstreamReader {
    data: Vec<u8>,
    bit_position: usize,
}

impl BitstreamReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    /// Get reference to the underlying data
    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    /// Total number of bits consumed so far
    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    /// Get current byte position (rounded up)
    pub fn byte_position(&self) -> usize {
        (self.bit_position + 7) / 8
    }

    /// Get number of bits available for reading
    pub fn bits_available(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_position)
    }

    fn ensure_available(&self, n: usize) -> JxlResult<()> {
        let available = self.bits_available();
        if n > available {
            return Err(JxlError::BitstreamExhausted {
                position: self.bit_position,
                requested: n,
                available,
            });
        }
        Ok(())
    }

    /// Collect up to 64 bits starting at the current position; bits past the
    /// end of the buffer read as zero.
    fn gather(&self, n: usize) -> u64 {
        let mut result = 0u64;
        let mut filled = 0;
        let mut pos = self.bit_position;

        while filled < n {
            let byte_idx = pos / 8;
            let Some(&byte) = self.data.get(byte_idx) else {
                break;
            };
            let bit_idx = pos % 8;
            let take = (8 - bit_idx).min(n - filled);
            let bits = (u64::from(byte) >> bit_idx) & ((1u64 << take) - 1);
            result |= bits << filled;
            filled += take;
            pos += take;
        }

        result
    }

    /// Read n bits from the stream (0 <= n <= 32)
    pub fn read_bits(&mut self, n: usize) -> JxlResult<u32> {
        if n > 32 {
            return Err(JxlError::ProtocolViolation(format!("Invalid bit count: {}", n)));
        }
        Ok(self.read_bits_u64(n)? as u32)
    }

    /// Read n bits from the stream (0 <= n <= 64)
    pub fn read_bits_u64(&mut self, n: usize) -> JxlResult<u64> {
        if n > 64 {
            return Err(JxlError::ProtocolViolation(format!("Invalid bit count: {}", n)));
        }
        if n == 0 {
            return Ok(0);
        }
        self.ensure_available(n)?;
        let value = self.gather(n);
        self.bit_position += n;
        Ok(value)
    }

    /// Look at the next n bits without consuming them (0 <= n <= 32)
    ///
    /// Bits beyond the end of the buffer are returned as zero so that table
    /// lookups near the end of a section still work; the subsequent
    /// `skip_bits` reports exhaustion if the matched code is really missing.
    pub fn peek_bits(&self, n: usize) -> JxlResult<u32> {
        if n > 32 {
            return Err(JxlError::ProtocolViolation(format!("Invalid peek bit count: {}", n)));
        }
        Ok(self.gather(n) as u32)
    }

    /// Consume n bits
    pub fn skip_bits(&mut self, n: usize) -> JxlResult<()> {
        self.ensure_available(n)?;
        self.bit_position += n;
        Ok(())
    }

    /// Read a Bool value (1 bit)
    pub fn read_bool(&mut self) -> JxlResult<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Read a U32 field: a 2-bit selector picks one of four (offset, bits) pairs
    #[allow(clippy::too_many_arguments)]
    pub fn read_u32_with_config(
        &mut self,
        o0: u32,
        n0: usize,
        o1: u32,
        n1: usize,
        o2: u32,
        n2: usize,
        o3: u32,
        n3: usize,
    ) -> JxlResult<u32> {
        let offsets = [o0, o1, o2, o3];
        let nbits = [n0, n1, n2, n3];

        let sel = self.read_bits(2)? as usize;
        let value = self.read_bits(nbits[sel])?;
        value.checked_add(offsets[sel]).ok_or_else(|| {
            JxlError::ProtocolViolation(format!(
                "U32 value {} + {} overflows",
                value, offsets[sel]
            ))
        })
    }

    /// Read a U64 field
    pub fn read_u64(&mut self) -> JxlResult<u64> {
        let selector = self.read_bits(2)?;
        Ok(match selector {
            0 => 0,
            1 => u64::from(self.read_bits(4)?) + 1,
            2 => u64::from(self.read_bits(8)?) + 17,
            _ => {
                let mut value = u64::from(self.read_bits(12)?);
                let mut shift = 12;
                while self.read_bool()? {
                    if shift == 60 {
                        value |= u64::from(self.read_bits(4)?) << shift;
                        break;
                    }
                    value |= u64::from(self.read_bits(8)?) << shift;
                    shift += 8;
                }
                value
            }
        })
    }

    /// Read a U8 field: zero, or `(1 << n) + u(n)` with a 3-bit n
    pub fn read_u8(&mut self) -> JxlResult<u32> {
        if self.read_bool()? {
            let n = self.read_bits(3)? as usize;
            Ok(self.read_bits(n)? + (1 << n))
        } else {
            Ok(0)
        }
    }

    /// Read an IEEE 754 half-precision float and widen it
    pub fn read_f16_as_f32(&mut self) -> JxlResult<f32> {
        let v = self.read_bits(16)?;
        let mantissa = v & 0x3ff;
        let exponent = (v >> 10) & 0x1f;
        let sign = if v & 0x8000 != 0 { 0x8000_0000 } else { 0 };

        if exponent == 0x1f {
            return Err(JxlError::ProtocolViolation(format!("Non-finite f16 value 0x{:04x}", v)));
        }

        if exponent == 0 {
            // Subnormal halves are exact in f32: mantissa * 2^-24
            let magnitude = mantissa as f32 / (1u32 << 24) as f32;
            return Ok(if sign != 0 { -magnitude } else { magnitude });
        }

        let bits = sign | ((exponent + 112) << 23) | (mantissa << 13);
        Ok(f32::from_bits(bits))
    }

    /// Skip to next byte boundary, requiring the skipped bits to be zero
    pub fn zero_pad_to_byte(&mut self) -> JxlResult<()> {
        let pad = (8 - self.bit_position % 8) % 8;
        let bits = self.read_bits(pad)?;
        if bits != 0 {
            return Err(JxlError::ProtocolViolation(format!(
                "Non-zero padding bits 0x{:x} before byte {}",
                bits,
                self.byte_position()
            )));
        }
        Ok(())
    }
}
