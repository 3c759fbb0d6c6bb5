use std::time::Duration;

use backon::BackoffBuilder;

/// Delays applied after the 1st, 2nd, ... consecutive failure of a logical call.
/// The last entry repeats for every further retry.
pub const ROTATION_DELAYS: [Duration; 6] = [
    Duration::from_millis(500),
    Duration::from_millis(750),
    Duration::from_millis(1000),
    Duration::from_millis(1500),
    Duration::from_millis(2000),
    Duration::from_millis(2000),
];

/// Builds a [`RotationBackoff`] yielding `max_retries` delays from [`ROTATION_DELAYS`].
#[derive(Debug, Clone, Copy)]
pub struct RotationBackoffBuilder {
    max_retries: usize,
}

impl RotationBackoffBuilder {
    /// `2 * endpoints` attempts in total, i.e. `2 * endpoints - 1` retries.
    #[must_use]
    pub fn for_endpoints(endpoints: usize) -> Self {
        Self { max_retries: (2 * endpoints).saturating_sub(1) }
    }

    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }
}

impl BackoffBuilder for RotationBackoffBuilder {
    type Backoff = RotationBackoff;

    fn build(self) -> Self::Backoff {
        RotationBackoff { retry: 0, max_retries: self.max_retries }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RotationBackoff {
    retry: usize,
    max_retries: usize,
}

impl Iterator for RotationBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.max_retries {
            return None;
        }
        let delay = ROTATION_DELAYS[self.retry.min(ROTATION_DELAYS.len() - 1)];
        self.retry += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_table_then_saturate() {
        let delays: Vec<_> = RotationBackoffBuilder::for_endpoints(4).build().collect();
        let millis: Vec<_> = delays.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![500, 750, 1000, 1500, 2000, 2000, 2000]);
    }

    #[test]
    fn single_endpoint_gets_one_retry() {
        assert_eq!(RotationBackoffBuilder::for_endpoints(1).build().count(), 1);
    }

    #[test]
    fn empty_pool_never_retries() {
        assert_eq!(RotationBackoffBuilder::for_endpoints(0).build().count(), 0);
    }
}
