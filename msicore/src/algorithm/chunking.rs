use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Secondary growth applied to horizons that fall short of the minimum sample count.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveGrowth {
    /// depth added per retry, in the same unit as the depth array
    pub resolution: f64,
    pub max_retries: usize,
}

/// Settings of the depth chunker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// physical thickness of one horizon, same unit as the depth array
    pub horizon_size: f64,
    pub min_samples: usize,
    pub adaptive: Option<AdaptiveGrowth>,
}

impl ChunkConfig {
    pub fn new(horizon_size: f64, min_samples: usize) -> Self {
        ChunkConfig { horizon_size, min_samples, adaptive: None }
    }

    pub fn with_adaptive(mut self, resolution: f64, max_retries: usize) -> Self {
        self.adaptive = Some(AdaptiveGrowth { resolution, max_retries });
        self
    }
}

/// A half-open run `[start, end)` of depth-sorted spots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    pub start: usize,
    pub end: usize,
    /// the run only reached `min_samples` through adaptive growth
    pub grown: bool,
}

impl Horizon {
    pub fn new(start: usize, end: usize) -> Self {
        Horizon { start, end, grown: false }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

/// Fail with the first index that breaks ascending order.
pub fn check_sorted(depth: &[f64]) -> Result<()> {
    for (index, window) in depth.windows(2).enumerate() {
        // written as a negation so NaN counts as unsorted
        if !(window[0] <= window[1]) {
            return Err(CoreError::UnsortedInput { index: index + 1 });
        }
    }
    if let Some(index) = depth.iter().position(|d| d.is_nan()) {
        return Err(CoreError::UnsortedInput { index });
    }
    Ok(())
}

/// Split an ascending depth array into horizons.
///
/// # Arguments
///
/// * `depth` - depth of every spot, ascending
/// * `config` - horizon thickness, minimum spots per horizon, optional adaptive growth
///
/// # Returns
///
/// * non-overlapping horizons in increasing order; runs below `min_samples` are dropped
///
pub fn get_chunks(depth: &[f64], config: &ChunkConfig) -> Result<Vec<Horizon>> {
    check_sorted(depth)?;

    let n = depth.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < n {
        let mut end_value = depth[start] + config.horizon_size;
        let mut current = start;
        while current < n && depth[current] <= end_value {
            current += 1;
        }

        if current - start >= config.min_samples {
            chunks.push(Horizon::new(start, current));
        } else if let Some(growth) = config.adaptive {
            let mut retry = 0;
            while current - start < config.min_samples && current < n && retry < growth.max_retries {
                end_value = depth[current] + growth.resolution;
                retry += 1;
                while current < n && depth[current] <= end_value {
                    current += 1;
                }
            }
            if current - start >= config.min_samples {
                chunks.push(Horizon { start, end: current, grown: true });
            }
        }

        start = current;
    }

    Ok(chunks)
}
