//! Seams to the outside world: the decode collaborator and the clock used
//! to bound it. Both are `?Send` so they run on a single-threaded executor
//! (the browser worker, or `LocalPool` natively).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::imaging::PixelBuffer;

/// Turns a composite into decoded text.
///
/// `encoded` is the composite's portable PNG data URL, for implementations
/// that submit it over the network. Return `NoPatternRecognized` when nothing
/// readable was found and `DecodeServiceUnavailable` for transport failures.
#[async_trait(?Send)]
pub trait Decoder {
    async fn decode(&self, composite: &PixelBuffer, encoded: &str) -> Result<String>;
}

/// Resolves after `duration`; used to cap decoder calls.
#[async_trait(?Send)]
pub trait Timer {
    async fn sleep(&self, duration: Duration);
}

/// Never fires. For decoders that always answer promptly (local recognition).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeadline;

#[async_trait(?Send)]
impl Timer for NoDeadline {
    async fn sleep(&self, _duration: Duration) {
        futures::future::pending::<()>().await
    }
}

/// Sleeps on a helper thread and wakes the task through a oneshot channel.
/// Works without an async runtime; not available on wasm32.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadTimer;

#[cfg(not(target_arch = "wasm32"))]
#[async_trait(?Send)]
impl Timer for ThreadTimer {
    async fn sleep(&self, duration: Duration) {
        let (tx, rx) = futures::channel::oneshot::channel::<()>();
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            let _ = tx.send(());
        });
        // A dropped sender also ends the wait.
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::executor::block_on;
    use std::time::Instant;

    #[test]
    fn no_deadline_stays_pending() {
        let mut fut = NoDeadline.sleep(Duration::from_millis(0));
        assert!((&mut fut).now_or_never().is_none());
    }

    #[test]
    fn thread_timer_waits_at_least_duration() {
        let start = Instant::now();
        block_on(ThreadTimer.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
