extern crate std;

use std::sync::OnceLock;
use std::time::Instant;
use crate::TimestampProvider;

static EPOCH: OnceLock<Instant> = OnceLock::new();

pub struct StdTimestamp;

impl TimestampProvider for StdTimestamp {
    #[inline(always)]
    fn now() -> u64 {
        let epoch = *EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = StdTimestamp::now();
        let b = StdTimestamp::now();
        assert!(b >= a);
    }
}
