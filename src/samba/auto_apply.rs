//! Debounced background apply
//!
//! Waits for dirty marks, lets a burst of changes settle for `delay`, then
//! runs one `write_and_restart`. A failed apply is retried after another
//! delay; once cancelled no new cycle starts.

use super::service::SambaService;
use crate::domain::{ApplyPhase, DirtyData};
use crate::error::Error;
use crate::events::{Event, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct AutoApply {
    service: Arc<SambaService>,
    bus: Arc<EventBus>,
    delay: Duration,
}

impl AutoApply {
    pub fn new(service: Arc<SambaService>, bus: Arc<EventBus>, delay: Duration) -> Self {
        Self { service, bus, delay }
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let tracker = self.service.tracker().clone();
        info!("Auto-apply started (delay {:?})", self.delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tracker.changed() => {}
            }

            // Restart the delay on every new mark
            let settled = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break false,
                    _ = tokio::time::sleep(self.delay) => break true,
                    _ = tracker.changed() => continue,
                }
            };
            if !settled {
                break;
            }
            if tracker.is_clean() {
                continue;
            }

            self.bus.emit_dirty_data(Event::update(DirtyData {
                sections: tracker.snapshot(),
                phase: ApplyPhase::Pending,
            }));

            let service = self.service.clone();
            let result = tokio::task::spawn_blocking(move || service.write_and_restart())
                .await
                .map_err(|e| Error::Internal(format!("apply task failed: {}", e)))
                .and_then(|r| r);

            match result {
                Ok(status) => debug!("Auto-apply done ({} shares)", status.shares),
                Err(e) => {
                    error!("Auto-apply failed, retrying in {:?}: {}", self.delay, e);
                    tracker.poke();
                }
            }
        }

        info!("Auto-apply stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samba::dirty::Section;
    use crate::samba::service::tests::Fixture;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;

    const DELAY: Duration = Duration::from_millis(30);

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_burst_applies_once() {
        let fx = Fixture::new();
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        let _sub = fx.bus.on_dirty_data(move |_, event| {
            sink.lock().push(event.payload.phase);
            Ok(())
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(AutoApply::new(fx.service.clone(), fx.bus.clone(), DELAY).run(cancel.clone()));

        fx.tracker.mark(Section::Shares);
        fx.tracker.mark(Section::Users);
        fx.tracker.mark(Section::Settings);

        assert!(wait_for(|| fx.daemon.reloads.load(Ordering::SeqCst) == 1).await);
        assert!(fx.tracker.is_clean());
        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(fx.daemon.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(*phases.lock(), vec![ApplyPhase::Pending, ApplyPhase::Clean]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_retries() {
        let fx = Fixture::new();
        *fx.daemon.reject.lock() = Some("bad".into());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(AutoApply::new(fx.service.clone(), fx.bus.clone(), DELAY).run(cancel.clone()));

        fx.tracker.mark(Section::Shares);
        assert!(wait_for(|| fx.daemon.tested.lock().len() >= 2).await);
        assert!(fx.tracker.is_dirty(Section::Shares));

        *fx.daemon.reject.lock() = None;
        assert!(wait_for(|| fx.tracker.is_clean()).await);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_cycle() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            AutoApply::new(fx.service.clone(), fx.bus.clone(), Duration::from_secs(60)).run(cancel.clone()),
        );

        fx.tracker.mark(Section::Volumes);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(fx.daemon.reloads.load(Ordering::SeqCst), 0);
        assert!(fx.tracker.is_dirty(Section::Volumes));
    }
}
