//! Retry budgets shared by the connect and publish loops.

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;

use crate::supervisor::Step;
use crate::{Error, Result};

/// How many times to try an operation and how long to wait after a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Attempt budget. For publish, the number of retries after the first try.
    pub attempts: u8,
    /// Wait after each failed attempt.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Wi-Fi default: 5 attempts, 5 s apart.
    pub const WIFI: Self = Self::new(5, Duration::from_millis(5_000));

    /// Broker default: 3 attempts, 5 s apart.
    pub const BROKER: Self = Self::new(3, Duration::from_millis(5_000));

    /// Create a retry policy.
    #[must_use]
    pub const fn new(attempts: u8, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub(crate) const fn validate(self, step: Step) -> Result<Self> {
        if self.attempts == 0 {
            return Err(Error::ZeroRetryBudget { step });
        }
        Ok(self)
    }

    /// Wait out the policy's delay.
    pub(crate) async fn wait<D: DelayNs>(&self, delay: &mut D) {
        let millis = u32::try_from(self.delay.as_millis()).unwrap_or(u32::MAX);
        delay.delay_ms(millis).await;
    }
}
