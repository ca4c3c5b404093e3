//! Adaptive retransmission timeout.
//!
//! Jacobson/Karels estimation with the classic TCP gains:
//!
//! ```text
//!   EstimatedRTT    = 7/8 · EstimatedRTT + 1/8 · SampleRTT
//!   DevRTT          = 3/4 · DevRTT       + 1/4 · |SampleRTT − EstimatedRTT|
//!   TimeoutInterval = EstimatedRTT + 4 · DevRTT
//! ```
//!
//! `DevRTT` is measured against the freshly updated `EstimatedRTT`.  The
//! first sample seeds `EstimatedRTT` directly with a zero deviation.  There
//! is no exponential back-off: a timeout leaves the interval unchanged.

use std::time::Duration;

/// Default `TimeoutInterval` before any sample has been taken.
pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// RTT / timeout estimator for one sender.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT, `None` until the first sample.
    estimated: Option<Duration>,
    /// Mean deviation of the samples.
    deviation: Duration,
    /// Current retransmission timeout.
    timeout: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_TIMEOUT)
    }
}

impl RttEstimator {
    pub fn new(initial_timeout: Duration) -> Self {
        Self {
            estimated: None,
            deviation: Duration::ZERO,
            timeout: initial_timeout,
        }
    }

    /// Fold one round-trip sample into the estimate.
    ///
    /// Integer `Duration` arithmetic keeps the gains exact at nanosecond
    /// resolution.
    pub fn update(&mut self, sample: Duration) {
        match self.estimated {
            None => {
                self.estimated = Some(sample);
                self.deviation = Duration::ZERO;
            }
            Some(est) => {
                let est = est * 7 / 8 + sample / 8;
                self.deviation = self.deviation * 3 / 4 + sample.abs_diff(est) / 4;
                self.estimated = Some(est);
            }
        }
        self.timeout = self.estimated() + self.deviation * 4;
    }

    /// Smoothed RTT; zero before the first sample.
    pub fn estimated(&self) -> Duration {
        self.estimated.unwrap_or(Duration::ZERO)
    }

    pub fn deviation(&self) -> Duration {
        self.deviation
    }

    /// Current `TimeoutInterval`.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `true` once at least one sample has been recorded.
    pub fn has_sample(&self) -> bool {
        self.estimated.is_some()
    }
}
