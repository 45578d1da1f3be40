use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio::io::{AsyncRead, ReadBuf};

/// Number of throughput samples kept for smoothing.
pub const SAMPLE_WINDOW: usize = 10;

/// Minimum time between two throughput recomputations.
pub const RECOMPUTE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Smoothed throughput in bytes per second.
    pub throughput: f64,
    /// Time left at the current throughput, `None` while it is unknown.
    pub eta: Option<Duration>,
}

/// Moving-average throughput and ETA for a transfer of known size.
#[derive(Debug)]
pub struct ProgressEstimator {
    total: u64,
    last_update: Instant,
    last_bytes: u64,
    samples: VecDeque<f64>,
    throughput: f64,
}

impl ProgressEstimator {
    pub fn new(total: u64) -> Self {
        Self::starting_at(total, Instant::now())
    }

    pub fn starting_at(total: u64, now: Instant) -> Self {
        Self {
            total,
            last_update: now,
            last_bytes: 0,
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            throughput: 0.0,
        }
    }

    pub fn update(&mut self, cumulative: u64) -> Estimate {
        self.update_at(Instant::now(), cumulative)
    }

    /// Record that `cumulative` bytes have been transferred as of `now`.
    ///
    /// Throughput is only recomputed once [`RECOMPUTE_INTERVAL`] has passed since
    /// the previous recomputation; earlier calls return the last smoothed value.
    pub fn update_at(&mut self, now: Instant, cumulative: u64) -> Estimate {
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed >= RECOMPUTE_INTERVAL {
            let rate = cumulative.saturating_sub(self.last_bytes) as f64 / elapsed.as_secs_f64();
            if self.samples.len() == SAMPLE_WINDOW {
                self.samples.pop_front();
            }
            self.samples.push_back(rate);
            self.throughput = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
            self.last_update = now;
            self.last_bytes = cumulative;
        }

        Estimate {
            throughput: self.throughput,
            eta: eta(self.total.saturating_sub(cumulative), self.throughput),
        }
    }

    #[cfg(test)]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

fn eta(remaining: u64, throughput: f64) -> Option<Duration> {
    if !throughput.is_finite() || throughput <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(remaining as f64 / throughput).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartProgress {
    pub number: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub uploaded: u64,
    pub total: u64,
    pub estimate: Estimate,
    /// Set while a chunked upload is sending one of its parts.
    pub part: Option<PartProgress>,
}

/// Receives byte-count updates during a transfer.
///
/// Called inline on the transfer path, so implementations must return promptly.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

/// Reporter for headless use.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Cumulative byte counter for one transfer, shared by every reader streaming it.
pub struct ProgressTracker {
    total: u64,
    uploaded: AtomicU64,
    estimator: Mutex<ProgressEstimator>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ProgressTracker {
    pub fn new(total: u64, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            total,
            uploaded: AtomicU64::new(0),
            estimator: Mutex::new(ProgressEstimator::new(total)),
            reporter,
        }
    }

    pub fn advance(&self, bytes: u64, part: Option<PartProgress>) {
        let uploaded = self.uploaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let estimate = self
            .estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(uploaded);
        self.reporter.on_progress(&ProgressUpdate {
            uploaded,
            total: self.total,
            estimate,
            part,
        });
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }
}

/// Reader that advances a [`ProgressTracker`] by every byte read through it.
pub struct ProgressReader<R> {
    inner: R,
    tracker: Arc<ProgressTracker>,
    part: Option<PartProgress>,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, tracker: Arc<ProgressTracker>, part: Option<PartProgress>) -> Self {
        Self {
            inner,
            tracker,
            part,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = buf.filled().len() - before;
            if read > 0 {
                self.tracker.advance(read as u64, self.part);
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn at(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    #[test]
    fn no_samples_means_unknown_eta() {
        let start = Instant::now();
        let mut estimator = ProgressEstimator::starting_at(1_000, start);
        let estimate = estimator.update_at(at(start, 100), 500);
        assert_eq!(estimate.throughput, 0.0);
        assert_eq!(estimate.eta, None);
        assert_eq!(estimator.sample_count(), 0);
    }

    #[test]
    fn updates_inside_interval_keep_previous_rate() {
        let start = Instant::now();
        let mut estimator = ProgressEstimator::starting_at(10_000, start);
        let first = estimator.update_at(at(start, 1_000), 1_000);
        assert_eq!(first.throughput, 1_000.0);

        let debounced = estimator.update_at(at(start, 1_200), 5_000);
        assert_eq!(debounced.throughput, 1_000.0);
        assert_eq!(estimator.sample_count(), 1);
        assert_eq!(debounced.eta, Some(Duration::from_secs(5)));
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let start = Instant::now();
        let mut estimator = ProgressEstimator::starting_at(u64::MAX, start);
        for step in 1..=50u64 {
            estimator.update_at(at(start, step * 1_000), step * 100);
            assert!(estimator.sample_count() <= SAMPLE_WINDOW);
        }
        assert_eq!(estimator.sample_count(), SAMPLE_WINDOW);
    }

    #[test]
    fn throughput_is_mean_of_recent_samples() {
        let start = Instant::now();
        let mut estimator = ProgressEstimator::starting_at(1_000_000, start);
        // Ten seconds at 100 B/s, then ten at 300 B/s; only the latter should remain.
        let mut bytes = 0;
        for second in 1..=10u64 {
            bytes += 100;
            estimator.update_at(at(start, second * 1_000), bytes);
        }
        for second in 11..=20u64 {
            bytes += 300;
            estimator.update_at(at(start, second * 1_000), bytes);
        }
        let estimate = estimator.update_at(at(start, 20_100), bytes);
        assert!((estimate.throughput - 300.0).abs() < 1e-9);
    }

    #[test]
    fn eta_converges_to_zero_at_completion() {
        let start = Instant::now();
        let total = 10_000;
        let mut estimator = ProgressEstimator::starting_at(total, start);
        let mut previous = Duration::MAX;
        for step in 1..=10u64 {
            let estimate = estimator.update_at(at(start, step * 1_000), step * 1_000);
            assert!(estimate.throughput.is_finite() && estimate.throughput >= 0.0);
            let eta = estimate.eta.expect("throughput is positive");
            assert!(eta <= previous);
            previous = eta;
        }
        assert_eq!(previous, Duration::ZERO);
    }

    #[test]
    fn stalled_or_regressing_counts_never_go_negative() {
        let start = Instant::now();
        let mut estimator = ProgressEstimator::starting_at(1_000, start);
        estimator.update_at(at(start, 1_000), 800);
        let estimate = estimator.update_at(at(start, 2_000), 400);
        assert!(estimate.throughput >= 0.0);
        assert!(!estimate.throughput.is_nan());
    }

    #[test]
    fn fully_stalled_window_reports_unknown_eta() {
        let start = Instant::now();
        let mut estimator = ProgressEstimator::starting_at(1_000, start);
        let mut estimate = estimator.update_at(at(start, 1_000), 0);
        for step in 2..=12u64 {
            estimate = estimator.update_at(at(start, step * 1_000), 0);
        }
        assert_eq!(estimate.throughput, 0.0);
        assert_eq!(estimate.eta, None);
    }

    #[tokio::test]
    async fn reader_reports_every_byte() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let reporter = move |update: &ProgressUpdate| sink.lock().unwrap().push(*update);
        let tracker = Arc::new(ProgressTracker::new(64, Arc::new(reporter)));

        let data = vec![7u8; 64];
        let part = Some(PartProgress {
            number: 1,
            count: 1,
        });
        let mut reader = ProgressReader::new(&data[..], Arc::clone(&tracker), part);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(tracker.uploaded(), 64);
        let updates = updates.lock().unwrap();
        let last = updates.last().unwrap();
        assert_eq!(last.uploaded, 64);
        assert_eq!(last.total, 64);
        assert_eq!(last.part, part);
        assert!(updates.windows(2).all(|w| w[0].uploaded < w[1].uploaded));
    }
}
