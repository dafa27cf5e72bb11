//! Pacing & concurrency gate for one batch.
//!
//! A download first takes one of `max_concurrent_downloads` permits, then sleeps the
//! configured delay (fixed, or drawn uniformly from `[min, max]` per download) before
//! its transfer starts. Bad settings are logged and replaced by safe defaults; they
//! never fail a run.

use crate::domain::{ConcurrencySetting, DelaySetting};
use rand::Rng;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::warn;

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Validated delay applied before each transfer starts.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadDelay {
    Fixed(Duration),
    /// Seconds; a fresh value is drawn for every download.
    Range { min: f64, max: f64 },
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

impl DownloadDelay {
    /// Validate a raw setting. Returns `None` (after a warning) when it cannot be used.
    pub fn from_setting(setting: &DelaySetting) -> Option<Self> {
        match setting {
            DelaySetting::Fixed(value) if value.is_finite() => Some(Self::Fixed(secs(*value))),
            DelaySetting::Fixed(value) => {
                warn!(value, "download_delay is not a finite number; downloading without delay");
                None
            }
            DelaySetting::Range(values) => match values.as_slice() {
                [min, max] if min.is_finite() && max.is_finite() => {
                    let (min, max) = (min.max(0.0), max.max(0.0));
                    if min > max {
                        warn!(min, max, "download_delay range has min > max; downloading without delay");
                        return None;
                    }
                    Some(Self::Range { min, max })
                }
                _ => {
                    warn!(
                        len = values.len(),
                        "download_delay must be a number or a [min, max] pair; downloading without delay"
                    );
                    None
                }
            },
            DelaySetting::Malformed(value) => {
                warn!(?value, "download_delay is malformed; downloading without delay");
                None
            }
        }
    }

    /// Delay for one download.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Range { min, max } => secs(rng.gen_range(*min..=*max)),
        }
    }
}

/// Validate `max_concurrent_downloads`; anything but a positive integer falls back to the default.
pub fn resolve_max_concurrent(value: Option<&ConcurrencySetting>) -> usize {
    match value {
        None => DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        Some(ConcurrencySetting::Count(n)) if *n >= 1 => {
            usize::try_from(*n).unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS)
        }
        Some(ConcurrencySetting::Count(n)) => {
            warn!(
                value = n,
                default = DEFAULT_MAX_CONCURRENT_DOWNLOADS,
                "max_concurrent_downloads must be positive; using default"
            );
            DEFAULT_MAX_CONCURRENT_DOWNLOADS
        }
        Some(ConcurrencySetting::Malformed(value)) => {
            warn!(
                ?value,
                default = DEFAULT_MAX_CONCURRENT_DOWNLOADS,
                "max_concurrent_downloads is not an integer; using default"
            );
            DEFAULT_MAX_CONCURRENT_DOWNLOADS
        }
    }
}

/// Bounded-permit gate with optional pacing delay.
#[derive(Debug)]
pub struct PacingGate {
    permits: Semaphore,
    max_concurrent: usize,
    delay: Option<DownloadDelay>,
}

impl PacingGate {
    pub fn new(max_concurrent: usize, delay: Option<DownloadDelay>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            delay,
        }
    }

    /// Build from raw (possibly invalid) settings.
    pub fn from_settings(max_concurrent: Option<&ConcurrencySetting>, delay: Option<&DelaySetting>) -> Self {
        Self::new(
            resolve_max_concurrent(max_concurrent),
            delay.and_then(DownloadDelay::from_setting),
        )
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn delay(&self) -> Option<&DownloadDelay> {
        self.delay.as_ref()
    }

    /// Wait for a permit, then for the pacing delay. Hold the permit for the whole transfer.
    pub async fn admit(&self) -> SemaphorePermit<'_> {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("pacing semaphore is never closed");
        // Draw before awaiting: the thread-local rng must not live across the sleep.
        let delay = self
            .delay
            .as_ref()
            .map(|d| d.sample(&mut rand::thread_rng()));
        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }
        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::time::Instant;

    #[test]
    fn test_delay_from_setting() {
        assert_eq!(
            DownloadDelay::from_setting(&DelaySetting::Fixed(1.5)),
            Some(DownloadDelay::Fixed(Duration::from_millis(1500)))
        );
        assert_eq!(
            DownloadDelay::from_setting(&DelaySetting::Fixed(-3.0)),
            Some(DownloadDelay::Fixed(Duration::ZERO))
        );
        assert_eq!(
            DownloadDelay::from_setting(&DelaySetting::Range(vec![1.0, 5.0])),
            Some(DownloadDelay::Range { min: 1.0, max: 5.0 })
        );
        assert_eq!(
            DownloadDelay::from_setting(&DelaySetting::Range(vec![1.0, 2.0, 3.0])),
            None
        );
        assert_eq!(DownloadDelay::from_setting(&DelaySetting::Range(vec![4.0, 1.0])), None);
        assert_eq!(
            DownloadDelay::from_setting(&DelaySetting::Malformed(serde_yaml::Value::from("soon"))),
            None
        );
    }

    #[test]
    fn test_range_samples_stay_in_bounds() {
        let delay = DownloadDelay::Range { min: 1.0, max: 5.0 };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let d = delay.sample(&mut rng);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(5), "{:?}", d);
        }
    }

    #[test]
    fn test_resolve_max_concurrent() {
        let count = |n| Some(ConcurrencySetting::Count(n));
        assert_eq!(resolve_max_concurrent(None), 4);
        assert_eq!(resolve_max_concurrent(count(2).as_ref()), 2);
        assert_eq!(resolve_max_concurrent(count(0).as_ref()), 4);
        assert_eq!(resolve_max_concurrent(count(-7).as_ref()), 4);
        let malformed = ConcurrencySetting::Malformed(serde_yaml::Value::from("four"));
        assert_eq!(resolve_max_concurrent(Some(&malformed)), 4);
    }

    #[test]
    fn test_gate_from_malformed_settings() {
        let gate = PacingGate::from_settings(Some(&ConcurrencySetting::Count(0)), Some(&DelaySetting::Range(vec![1.0])));
        assert_eq!(gate.max_concurrent(), DEFAULT_MAX_CONCURRENT_DOWNLOADS);
        assert!(gate.delay().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_before_start() {
        let gate = PacingGate::new(2, Some(DownloadDelay::Fixed(Duration::from_millis(1500))));
        for _ in 0..3 {
            let start = Instant::now();
            let _permit = gate.admit().await;
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1510));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_delay_per_download() {
        let gate = PacingGate::new(1, Some(DownloadDelay::Range { min: 1.0, max: 5.0 }));
        for _ in 0..10 {
            let start = Instant::now();
            let permit = gate.admit().await;
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(1) && elapsed <= Duration::from_millis(5010));
            drop(permit);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_without_setting() {
        let gate = PacingGate::new(1, None);
        let start = Instant::now();
        let _permit = gate.admit().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
