use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

struct Schedule {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Poller {
    parent: CancellationToken,
    active: Option<Schedule>,
}

impl Poller {
    pub fn new(parent: CancellationToken) -> Self {
        Self { parent, active: None }
    }

    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let period = period.max(MIN_PERIOD);
        let cancel = self.parent.child_token();
        let live = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = live.cancelled() => break,
                    _ = ticker.tick() => tick(live.clone()).await,
                }
            }
            debug!("poller schedule finished");
        });

        debug!(period_ms = %period.as_millis(), "poller started");
        self.active = Some(Schedule { cancel, handle });
    }

    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(schedule) => {
                schedule.cancel.cancel();
                debug!("poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|schedule| !schedule.cancel.is_cancelled() && !schedule.handle.is_finished())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
