use crate::aggregator::LocalStateAggregator;
use crate::cloud_api::CloudApi;
use crate::error::Result;
use crate::models::{DataPointValue, SiteConfiguration};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shortest period the refresh loop runs at
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// One remote source polled by a [`Coordinator`]
pub trait DataSource: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    /// Runs one complete update cycle against the remote side
    fn fetch(&self) -> impl Future<Output = Result<Self::Data>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// No cycle has finished yet
    Pending,
    Ready,
    /// The last cycle failed; the next scheduled one will try again
    Failed(String),
    /// Credentials were rejected; scheduled refreshes are halted until [`Coordinator::resume`]
    AuthInvalid(String),
}

/// Periodic-refresh owner for one remote source.
///
/// The latest snapshot is published as an `Arc` through a watch channel, so
/// readers either see the previous snapshot or the new one, never a mix. A
/// failed cycle leaves the previous snapshot in place.
pub struct Coordinator<S: DataSource> {
    name: String,
    source: S,
    update_interval: Duration,
    snapshot: watch::Sender<Option<Arc<S::Data>>>,
    status: watch::Sender<UpdateStatus>,
    refresh_requested: Notify,
    /// Bumped by [`Coordinator::resume`]; a 401 from an older generation is stale
    credentials_generation: AtomicU64,
}

pub type CloudCoordinator = Coordinator<CloudApi>;
pub type LocalCoordinator = Coordinator<LocalStateAggregator>;

impl<S: DataSource> Coordinator<S> {
    pub fn new(name: impl Into<String>, source: S, update_interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(None);
        let (status, _) = watch::channel(UpdateStatus::Pending);
        Self {
            name: name.into(),
            source,
            update_interval,
            snapshot,
            status,
            refresh_requested: Notify::new(),
            credentials_generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Latest published snapshot
    pub fn data(&self) -> Option<Arc<S::Data>> {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified whenever a new snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<S::Data>>> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    pub fn is_auth_halted(&self) -> bool {
        matches!(*self.status.borrow(), UpdateStatus::AuthInvalid(_))
    }

    /// Runs one update cycle now and publishes the result on success
    pub async fn refresh(&self) -> Result<Arc<S::Data>> {
        let generation = self.credentials_generation.load(Ordering::SeqCst);
        match self.source.fetch().await {
            Ok(data) => {
                let data = Arc::new(data);
                self.snapshot.send_replace(Some(Arc::clone(&data)));
                self.status.send_replace(UpdateStatus::Ready);
                debug!("{} updated", self.name);
                Ok(data)
            }
            Err(e) if e.is_auth_invalid()
                && generation != self.credentials_generation.load(Ordering::SeqCst) =>
            {
                // Sent before the credentials were replaced; retry with the new ones
                debug!("{} ignoring rejection of replaced credentials: {e}", self.name);
                self.request_refresh();
                Err(e)
            }
            Err(e) if e.is_auth_invalid() => {
                error!("{} halted: {e}", self.name);
                self.status.send_replace(UpdateStatus::AuthInvalid(e.to_string()));
                Err(e)
            }
            Err(e) => {
                warn!("{} update failed: {e}", self.name);
                self.status.send_replace(UpdateStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Asks the refresh loop for an immediate cycle without waiting for it
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Lifts an auth halt after the credentials were replaced and refreshes right away
    pub fn resume(&self) {
        info!("{} resuming", self.name);
        self.credentials_generation.fetch_add(1, Ordering::SeqCst);
        self.status.send_replace(UpdateStatus::Pending);
        self.request_refresh();
    }

    /// Spawns the periodic refresh loop. The first cycle is expected to have
    /// run already, so the loop waits one interval before its first refresh.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        let period = self.update_interval.max(MIN_UPDATE_INTERVAL);
        if period != self.update_interval {
            warn!(
                "{} update interval {:?} is too short, using {:?}",
                self.name, self.update_interval, period
            );
        }
        info!("Starting {} refresh loop every {:?}", self.name, period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh_requested.notified() => {
                    debug!("{} refresh requested", self.name);
                }
            }

            if self.is_auth_halted() {
                debug!("{} skipping refresh until credentials are replaced", self.name);
                continue;
            }

            // Failures are recorded in the status; the next tick retries
            let _ = self.refresh().await;
        }
    }
}

impl Coordinator<CloudApi> {
    pub fn site_id(&self) -> &str {
        self.source.site_id()
    }
}

impl Coordinator<LocalStateAggregator> {
    /// Gateway configuration, once the first cycle has loaded it
    pub fn configuration(&self) -> Option<Arc<SiteConfiguration>> {
        self.source.configuration()
    }

    /// Sends one command to a thing and schedules an immediate refresh on success.
    ///
    /// Errors go back to the caller untouched; there is no retry.
    pub async fn send_command(
        &self,
        thing_id: &str,
        key: &str,
        value: impl Into<DataPointValue>,
    ) -> Result<()> {
        let value = value.into();
        info!("Setting {key} on thing {thing_id} to {value}");
        self.source.api().send_command(thing_id, key, value).await?;
        self.request_refresh();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::time::sleep;

    /// Source that replays a fixed list of outcomes, then keeps returning `Ok(0)`
    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<u32>>>,
    }

    impl Scripted {
        fn with(outcomes: Vec<Result<u32>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(outcomes.into()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DataSource for Scripted {
        type Data = u32;

        async fn fetch(&self) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(0))
        }
    }

    /// First fetch takes 5 s and is rejected; every later one succeeds
    #[derive(Default)]
    struct SlowRejection {
        calls: AtomicUsize,
    }

    impl DataSource for SlowRejection {
        type Data = usize;

        async fn fetch(&self) -> Result<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                sleep(Duration::from_secs(5)).await;
                return Err(Error::AuthInvalid("BEAAM gateway"));
            }
            Ok(call)
        }
    }

    fn failure() -> Error {
        Error::Config("gateway unreachable".to_string())
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let coordinator = Coordinator::new("test", Scripted::with(vec![Ok(7)]), Duration::from_secs(30));
        let mut receiver = coordinator.subscribe();

        assert_eq!(coordinator.status(), UpdateStatus::Pending);
        assert!(coordinator.data().is_none());

        coordinator.refresh().await.unwrap();

        assert_eq!(coordinator.status(), UpdateStatus::Ready);
        assert_eq!(coordinator.data().as_deref(), Some(&7));
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().as_deref(), Some(&7));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_snapshot() {
        let coordinator = Coordinator::new(
            "test",
            Scripted::with(vec![Ok(1), Err(failure())]),
            Duration::from_secs(30),
        );

        coordinator.refresh().await.unwrap();
        assert!(coordinator.refresh().await.is_err());

        assert_eq!(coordinator.data().as_deref(), Some(&1));
        assert!(matches!(coordinator.status(), UpdateStatus::Failed(_)));
        assert!(!coordinator.is_auth_halted());
    }

    #[tokio::test]
    async fn test_auth_failure_keeps_previous_snapshot() {
        let coordinator = Coordinator::new(
            "test",
            Scripted::with(vec![Ok(1), Err(Error::AuthInvalid("BEAAM gateway"))]),
            Duration::from_secs(30),
        );

        coordinator.refresh().await.unwrap();
        let err = coordinator.refresh().await.unwrap_err();

        assert!(err.is_auth_invalid());
        assert_eq!(coordinator.data().as_deref(), Some(&1));
        assert!(coordinator.is_auth_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_on_interval() {
        let coordinator = Arc::new(Coordinator::new(
            "test",
            Scripted::default(),
            Duration::from_secs(10),
        ));
        let handle = Arc::clone(&coordinator).spawn();

        sleep(Duration::from_secs(25)).await;
        assert_eq!(coordinator.source().calls(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_halts_after_auth_failure() {
        let coordinator = Arc::new(Coordinator::new(
            "test",
            Scripted::with(vec![Err(Error::AuthInvalid("Ntuity cloud"))]),
            Duration::from_secs(10),
        ));
        let handle = Arc::clone(&coordinator).spawn();

        sleep(Duration::from_secs(45)).await;
        assert_eq!(coordinator.source().calls(), 1);
        assert!(coordinator.is_auth_halted());

        // Requested refreshes are skipped too
        coordinator.request_refresh();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.source().calls(), 1);

        coordinator.resume();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.source().calls(), 2);
        assert_eq!(coordinator.status(), UpdateStatus::Ready);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_refresh_runs_immediately() {
        let coordinator = Arc::new(Coordinator::new(
            "test",
            Scripted::default(),
            Duration::from_secs(3600),
        ));
        let handle = Arc::clone(&coordinator).spawn();
        sleep(Duration::from_millis(10)).await;

        coordinator.request_refresh();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.source().calls(), 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_during_rejected_refresh() {
        let coordinator = Arc::new(Coordinator::new(
            "test",
            SlowRejection::default(),
            Duration::from_secs(10),
        ));
        let handle = Arc::clone(&coordinator).spawn();

        // The first cycle starts at t=10 and is rejected at t=15
        sleep(Duration::from_secs(12)).await;
        coordinator.resume();

        sleep(Duration::from_secs(120)).await;
        assert_eq!(coordinator.status(), UpdateStatus::Ready);
        assert!(coordinator.source().calls.load(Ordering::SeqCst) >= 2);
        assert!(coordinator.data().is_some());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let coordinator = Arc::new(Coordinator::new(
            "test",
            Scripted::default(),
            Duration::ZERO,
        ));
        let handle = Arc::clone(&coordinator).spawn();

        sleep(Duration::from_millis(3500)).await;
        assert!(!handle.is_finished());
        assert_eq!(coordinator.source().calls(), 3);

        handle.abort();
    }
}
