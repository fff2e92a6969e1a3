//! Lifecycle Poller
//!
//! Samples the host power state on a fixed interval and keeps the display
//! awake while the host is on external power.

use super::power::{PowerSource, StayAwake};
use dashlink_shared::ChargeSource;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Recurring power-state sampler.
///
/// The timer task is owned through a single cancellation token. Dropping the
/// poller cancels it, so the task cannot outlive its owner.
pub struct LifecyclePoller {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LifecyclePoller {
    /// Start sampling. The first sample is taken one `period` from now.
    pub fn start(
        power: Arc<dyn PowerSource>,
        awake: Arc<dyn StayAwake>,
        period: Duration,
    ) -> Self {
        Self::start_with_token(power, awake, period, CancellationToken::new())
    }

    /// Start sampling under `token`; cancelling it (or a parent) stops the poller
    pub fn start_with_token(
        power: Arc<dyn PowerSource>,
        awake: Arc<dyn StayAwake>,
        period: Duration,
        token: CancellationToken,
    ) -> Self {
        let cancel = token.clone();
        let task = tokio::spawn(async move {
            poll_loop(power, awake.as_ref(), period, cancel).await;
            // Never leave the display pinned on once nobody is deciding
            awake.set_stay_awake(false);
            info!("[POWER] Poller stopped");
        });

        Self {
            token,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop sampling and wait for the timer task to finish. Idempotent.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LifecyclePoller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn poll_loop(
    power: Arc<dyn PowerSource>,
    awake: &dyn StayAwake,
    period: Duration,
    cancel: CancellationToken,
) {
    // Ticks are scheduled at a fixed rate, independent of how long a sample takes
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<bool> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let queried = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    queried = power.current_charge_source() => queried,
                };
                let source = match queried {
                    Ok(source) => source,
                    Err(e) => {
                        debug!("[POWER] Power state unavailable: {}", e);
                        ChargeSource::Unknown
                    }
                };

                let plugged = source.is_plugged();
                if last != Some(plugged) {
                    if source == ChargeSource::Unknown {
                        warn!("[POWER] Power state unknown, treating as unplugged");
                    }
                    info!("[POWER] Charge source {} (stay awake: {})", source, plugged);
                    last = Some(plugged);
                }
                awake.set_stay_awake(plugged);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Power source whose answer the test controls. `None` means the query fails.
    pub(crate) struct FakePower {
        pub source: Mutex<Option<ChargeSource>>,
        pub queries: AtomicUsize,
        /// Queries never return while set
        pub stalled: AtomicBool,
    }

    impl FakePower {
        pub(crate) fn new(source: Option<ChargeSource>) -> Arc<Self> {
            Arc::new(Self {
                source: Mutex::new(source),
                queries: AtomicUsize::new(0),
                stalled: AtomicBool::new(false),
            })
        }

        pub(crate) fn set(&self, source: Option<ChargeSource>) {
            *self.source.lock().unwrap() = source;
        }
    }

    #[async_trait]
    impl PowerSource for FakePower {
        async fn current_charge_source(&self) -> Result<ChargeSource> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let source = *self.source.lock().unwrap();
            source.ok_or_else(|| anyhow!("battery service gone"))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingAwake {
        pub calls: Mutex<Vec<bool>>,
    }

    impl RecordingAwake {
        pub(crate) fn last(&self) -> Option<bool> {
            self.calls.lock().unwrap().last().copied()
        }
    }

    impl StayAwake for RecordingAwake {
        fn set_stay_awake(&self, on: bool) {
            self.calls.lock().unwrap().push(on);
        }
    }

    const PERIOD: Duration = Duration::from_millis(1000);

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_after_one_period() {
        let power = FakePower::new(Some(ChargeSource::Usb));
        let awake = Arc::new(RecordingAwake::default());
        let _poller = LifecyclePoller::start(power.clone(), awake.clone(), PERIOD);

        wait(999).await;
        assert_eq!(power.queries.load(Ordering::SeqCst), 0);
        wait(2).await;
        assert_eq!(power.queries.load(Ordering::SeqCst), 1);
        assert_eq!(awake.last(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_charge_source() {
        let power = FakePower::new(Some(ChargeSource::Ac));
        let awake = Arc::new(RecordingAwake::default());
        let _poller = LifecyclePoller::start(power.clone(), awake.clone(), PERIOD);

        wait(1001).await;
        assert_eq!(awake.last(), Some(true));

        power.set(Some(ChargeSource::None));
        wait(1000).await;
        assert_eq!(awake.last(), Some(false));

        power.set(Some(ChargeSource::Wireless));
        wait(1000).await;
        assert_eq!(awake.last(), Some(true));

        // Unavailable power state is treated as unplugged
        power.set(None);
        wait(1000).await;
        assert_eq!(awake.last(), Some(false));
        assert_eq!(power.queries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_releases() {
        let power = FakePower::new(Some(ChargeSource::Usb));
        let awake = Arc::new(RecordingAwake::default());
        let mut poller = LifecyclePoller::start(power.clone(), awake.clone(), PERIOD);

        wait(1001).await;
        assert!(poller.is_running());
        poller.stop().await;
        poller.stop().await;
        assert!(!poller.is_running());
        assert_eq!(awake.last(), Some(false));

        let queries = power.queries.load(Ordering::SeqCst);
        wait(5000).await;
        assert_eq!(power.queries.load(Ordering::SeqCst), queries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_pending_query() {
        let power = FakePower::new(Some(ChargeSource::Usb));
        power.stalled.store(true, Ordering::SeqCst);
        let awake = Arc::new(RecordingAwake::default());
        let mut poller = LifecyclePoller::start(power.clone(), awake.clone(), PERIOD);

        wait(1001).await;
        assert_eq!(power.queries.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_millis(100), poller.stop())
            .await
            .expect("stop waited for the power query");
        assert!(!poller.is_running());
        assert_eq!(awake.last(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let power = FakePower::new(Some(ChargeSource::Usb));
        let awake = Arc::new(RecordingAwake::default());
        let poller = LifecyclePoller::start(power.clone(), awake.clone(), PERIOD);

        wait(2001).await;
        drop(poller);
        let queries = power.queries.load(Ordering::SeqCst);
        assert_eq!(queries, 2);

        wait(5000).await;
        assert_eq!(power.queries.load(Ordering::SeqCst), queries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_cancels() {
        let parent = CancellationToken::new();
        let power = FakePower::new(Some(ChargeSource::Usb));
        let awake = Arc::new(RecordingAwake::default());
        let poller = LifecyclePoller::start_with_token(
            power.clone(),
            awake.clone(),
            PERIOD,
            parent.child_token(),
        );

        parent.cancel();
        wait(3000).await;
        assert_eq!(power.queries.load(Ordering::SeqCst), 0);
        assert!(!poller.is_running());
    }
}
