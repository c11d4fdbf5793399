pub mod error;
pub mod bitstream;
pub mod vlc;
pub mod hybrid_int;
pub mod ans_decoder;
pub mod prefix_code;
pub mod cluster_map;
pub mod entropy_code;

#[cfg(test)]
mod test_util;

pub use error::*;
pub use bitstream::*;
pub use vlc::{VlcEntry, VlcTable};
pub use hybrid_int::*;
pub use ans_decoder::*;
pub use prefix_code::{PrefixCode, PrefixDistribution, PREFIX_MAX_BITS};
pub use cluster_map::*;
pub use entropy_code::*;
