use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-wide cancellation flag shared by reference across all testers.
///
/// Set exactly once, by whichever of the deadline timer and the external
/// interrupt fires first; the winner's timestamp is the authoritative
/// end-of-run instant used for throughput math. Testers only ever read it.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    stopped_at: Mutex<Option<Instant>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns true for the first caller only; later
    /// callers neither flip the flag again nor move the timestamp.
    pub fn trigger(&self) -> bool {
        let mut at = self.stopped_at.lock().expect("stop signal poisoned");
        if at.is_some() {
            return false;
        }
        *at = Some(Instant::now());
        self.stopped.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The instant the stop was requested, once triggered.
    pub fn stopped_at(&self) -> Option<Instant> {
        *self.stopped_at.lock().expect("stop signal poisoned")
    }
}

/// Arm the run deadline. Triggers the shared signal when either the
/// wall-clock deadline elapses or Ctrl-C arrives, whichever is first.
/// Cleanup work (return legs) may run long after the stop fires, so the
/// interrupt stays armed: a Ctrl-C during that window ends the process
/// instead of being dropped with the raced future.
pub async fn arm(signal: std::sync::Arc<StopSignal>, duration: Duration) {
    arm_with(signal, duration, tokio::signal::ctrl_c, || {
        std::process::exit(130)
    })
    .await
}

async fn arm_with<F, Fut, X>(
    signal: std::sync::Arc<StopSignal>,
    duration: Duration,
    interrupt: F,
    exit: X,
) where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
    X: FnOnce(),
{
    tokio::select! {
        _ = tokio::time::sleep(duration) => {
            if signal.trigger() {
                tracing::info!(secs = duration.as_secs(), "Run duration elapsed, stopping testers");
            }
        }
        res = interrupt() => {
            if res.is_ok() && signal.trigger() {
                tracing::warn!("Interrupt received, stopping testers");
            }
        }
    }
    if interrupt().await.is_ok() {
        tracing::warn!("Interrupt received during cleanup, exiting");
        exit();
    }
}
