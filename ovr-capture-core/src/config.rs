use serde::{Deserialize, Serialize};
use crate::consts::STREAM_BUFFER_SIZE;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capacity of each of the two per-thread buffers in bytes. A writer blocks when its
    /// cache buffer cannot fit the next packet until the server swaps the buffers.
    pub buffer_size: usize,

    /// Busy-spin iterations before a blocked writer starts yielding.
    pub spin_limit: u32,
    /// Yield iterations before a blocked writer parks on the gate's condition variable.
    pub yield_limit: u32,
}

impl StreamConfig {
    #[must_use]
    pub const fn default() -> Self {
        Self {
            buffer_size: STREAM_BUFFER_SIZE,
            spin_limit: 10,
            yield_limit: 50,
        }
    }
}

impl Default for StreamConfig {
    #[must_use]
    fn default() -> Self {
        Self::default()
    }
}
