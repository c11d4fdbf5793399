//! Context to distribution mapping

use log::debug;

use crate::bitstream::BitstreamReader;
use crate::entropy_code::EntropyStream;
use crate::error::{JxlError, JxlResult};

/// Upper bound on distributions per stream
pub const MAX_CLUSTERS: usize = 256;

/// Cluster index per context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMap {
    map: Vec<u8>,
    num_clusters: usize,
}

impl ClusterMap {
    /// Parse a cluster map (following j40__cluster_map)
    pub fn parse(
        reader: &mut BitstreamReader,
        num_contexts: usize,
        max_clusters: usize,
    ) -> JxlResult<Self> {
        if num_contexts == 0 {
            return Err(JxlError::ProtocolViolation("Cluster map for zero contexts".to_string()));
        }
        if num_contexts == 1 {
            return Ok(Self { map: vec![0], num_clusters: 1 });
        }

        let map = if reader.read_bool()? {
            let nbits = reader.read_bits(2)? as usize;
            (0..num_contexts)
                .map(|_| reader.read_bits(nbits).map(|c| c as u8))
                .collect::<JxlResult<Vec<u8>>>()?
        } else {
            let use_mtf = reader.read_bool()?;
            let mut stream = EntropyStream::new(reader, 1, num_contexts <= 2)?;
            let mut map = Vec::with_capacity(num_contexts);
            for i in 0..num_contexts {
                let index = stream.read_symbol(reader, 0)?;
                let index = u8::try_from(index).map_err(|_| {
                    JxlError::MalformedClusterMap(format!(
                        "Cluster index {} for context {} exceeds 255",
                        index, i
                    ))
                })?;
                map.push(index);
            }
            if !stream.validate_final_state(reader)? {
                return Err(JxlError::MalformedClusterMap(
                    "Nested cluster map stream ended in an invalid ANS state".to_string(),
                ));
            }
            if use_mtf {
                inverse_move_to_front(&mut map);
            }
            map
        };

        let num_clusters = map.iter().copied().max().map_or(1, |m| m as usize + 1);
        if num_clusters > max_clusters {
            return Err(JxlError::MalformedClusterMap(format!(
                "{} clusters exceed the maximum of {}",
                num_clusters, max_clusters
            )));
        }
        debug!("cluster map: {} contexts -> {} clusters", num_contexts, num_clusters);

        Ok(Self { map, num_clusters })
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn num_contexts(&self) -> usize {
        self.map.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn cluster(&self, ctx: usize) -> Option<usize> {
        self.map.get(ctx).map(|&c| c as usize)
    }
}

/// Undo a move-to-front transform over a 256-entry identity permutation
pub fn inverse_move_to_front(values: &mut [u8]) {
    let mut mtf: [u8; 256] = std::array::from_fn(|i| i as u8);
    for value in values.iter_mut() {
        let index = *value as usize;
        let front = mtf[index];
        mtf.copy_within(0..index, 1);
        mtf[0] = front;
        *value = front;
    }
}
