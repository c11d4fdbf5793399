use crate::bitstream::BitstreamReader;
use crate::error::{JxlError, JxlResult};

/// Largest split exponent any alphabet allows (prefix codes use 15 bits)
pub const MAX_SPLIT_EXPONENT: u32 = 15;

/// HybridIntConfig - how a decoded token expands into an integer
///
/// Tokens below `2^split_exponent` are literal values. Larger tokens carry
/// the bit width of the value plus its `msb_in_token` leading and
/// `lsb_in_token` trailing bits; the middle bits follow in the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HybridIntConfig {
    pub split_exponent: u32,
    pub msb_in_token: u32,
    pub lsb_in_token: u32,
}

impl HybridIntConfig {
    pub fn new(split_exponent: u32, msb_in_token: u32, lsb_in_token: u32) -> JxlResult<Self> {
        if split_exponent > MAX_SPLIT_EXPONENT {
            return Err(JxlError::MalformedDistribution(format!(
                "split_exponent {} > {}",
                split_exponent, MAX_SPLIT_EXPONENT
            )));
        }
        if msb_in_token > split_exponent {
            return Err(JxlError::MalformedDistribution(format!(
                "msb_in_token {} > split_exponent {}",
                msb_in_token, split_exponent
            )));
        }
        if msb_in_token + lsb_in_token > split_exponent {
            return Err(JxlError::MalformedDistribution(format!(
                "msb_in_token {} + lsb_in_token {} > split_exponent {}",
                msb_in_token, lsb_in_token, split_exponent
            )));
        }
        Ok(Self {
            split_exponent,
            msb_in_token,
            lsb_in_token,
        })
    }

    /// Parse a config for an alphabet of `2^log_alpha_size` tokens
    pub fn parse(reader: &mut BitstreamReader, log_alpha_size: u32) -> JxlResult<Self> {
        let split_exponent = reader.read_bits(ceil_log2(log_alpha_size + 1) as usize)?;
        if split_exponent > log_alpha_size {
            return Err(JxlError::MalformedDistribution(format!(
                "split_exponent {} > log_alpha_size {}",
                split_exponent, log_alpha_size
            )));
        }
        if split_exponent == log_alpha_size {
            return Self::new(split_exponent, 0, 0);
        }

        let msb_in_token = reader.read_bits(ceil_log2(split_exponent + 1) as usize)?;
        if msb_in_token > split_exponent {
            return Err(JxlError::MalformedDistribution(format!(
                "msb_in_token {} > split_exponent {}",
                msb_in_token, split_exponent
            )));
        }
        let lsb_in_token =
            reader.read_bits(ceil_log2(split_exponent - msb_in_token + 1) as usize)?;

        Self::new(split_exponent, msb_in_token, lsb_in_token)
    }

    /// Expand a token, reading its middle bits from the stream
    pub fn decode(&self, reader: &mut BitstreamReader, token: u32) -> JxlResult<u32> {
        let split = 1u32 << self.split_exponent;
        if token < split {
            return Ok(token);
        }

        let bits_in_token = self.msb_in_token + self.lsb_in_token;
        let n = (self.split_exponent - bits_in_token) as u64
            + (u64::from(token - split) >> bits_in_token);
        if n > 32 {
            return Err(JxlError::ProtocolViolation(format!(
                "Hybrid integer token {} needs {} extra bits",
                token, n
            )));
        }

        let mid = reader.read_bits(n as usize)? as u64;
        let token = u64::from(token);
        let top = 1u64 << self.msb_in_token;
        let lo = token & ((1 << self.lsb_in_token) - 1);
        let hi = (token >> self.lsb_in_token) & (top - 1);
        let value = ((top | hi) << (n + u64::from(self.lsb_in_token)))
            | (mid << self.lsb_in_token)
            | lo;

        u32::try_from(value).map_err(|_| {
            JxlError::ProtocolViolation(format!("Hybrid integer value {} too large", value))
        })
    }
}

/// Calculate ceil(log2(n)), returns 0 for n <= 1
pub fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}
