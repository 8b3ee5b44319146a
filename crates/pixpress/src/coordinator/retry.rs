use serde::{Deserialize, Serialize};

/// Bounded quality-lowering policy applied when a "compressed" file comes
/// out at least as large as the original.
///
/// Termination is structural: the attempt counter is capped and quality
/// never drops below the floor, so a cycle finishes within
/// `max_attempts + 1` engine invocations regardless of input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of automatic retries per cycle.
    pub max_attempts: u32,
    /// How much to lower quality on each retry.
    pub quality_step: u8,
    /// Quality never goes below this (must stay a valid engine input).
    pub quality_floor: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            quality_step: 10,
            quality_floor: 10,
        }
    }
}

impl RetryPolicy {
    /// Whether a result counts as growth. A zero original size disables the
    /// rule: there is nothing to shrink below.
    pub fn grew(original_size: u64, compressed_size: u64) -> bool {
        original_size > 0 && compressed_size >= original_size
    }

    /// The quality for the next attempt, or `None` once the ceiling or the
    /// floor is reached and the last result must be accepted as final.
    pub fn next_quality(&self, attempts_so_far: u32, current_quality: u8) -> Option<u8> {
        if attempts_so_far >= self.max_attempts {
            return None;
        }
        if current_quality <= self.quality_floor {
            return None;
        }
        Some(
            current_quality
                .saturating_sub(self.quality_step)
                .max(self.quality_floor),
        )
    }
}
