//! Scheduled re-checks with a deadline and cancellation.
//!
//! Every wait in the coordinator (agent completion, CI settling, successor
//! health) goes through [`poll_until`]. Timers come from `tokio::time`, so
//! tests run these loops on a paused clock.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often to re-check and for how long before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSchedule {
    /// Must be non-zero; a zero interval would re-probe without pausing.
    #[serde(
        serialize_with = "duration_secs::serialize",
        deserialize_with = "duration_secs::deserialize_nonzero"
    )]
    pub interval: Duration,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

/// Result of a single probe.
#[derive(Debug)]
pub enum Probe<T> {
    Done(T),
    Pending,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("gave up after {waited:?} ({attempts} checks)")]
    TimedOut { waited: Duration, attempts: u32 },
    #[error("polling was cancelled after {attempts} checks")]
    Cancelled { attempts: u32 },
}

/// Re-run `probe` every `schedule.interval` until it reports `Done`, the
/// timeout elapses, or `cancel` fires. The first check runs immediately.
pub async fn poll_until<T, F, Fut>(
    schedule: PollSchedule,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let started = Instant::now();
    let deadline = started + schedule.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(PollError::TimedOut { waited: started.elapsed(), attempts });
            }
            outcome = probe() => outcome,
        };

        if let Probe::Done(value) = outcome {
            debug!(attempts, "poll condition satisfied");
            return Ok(value);
        }

        let next = Instant::now() + schedule.interval;
        if next >= deadline {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
                _ = tokio::time::sleep_until(deadline) => {}
            }
            return Err(PollError::TimedOut {
                waited: started.elapsed(),
                attempts,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
            _ = tokio::time::sleep_until(next) => {}
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }

    pub fn deserialize_nonzero<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Err(serde::de::Error::custom(
                "polling interval must be at least one second",
            )),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}
