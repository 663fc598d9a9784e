use crate::error::MeterError;
use crate::meter_client::{DeviceInfo, MeterClient};
use crate::snapshot::Snapshot;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Callback fired after every poll, successful or not.
pub type Observer = Arc<dyn Fn() + Send + Sync>;

/// Polls one meter on a fixed interval and fans the results out to observers.
///
/// Readers always see a whole [`Snapshot`] from a single poll. A failed poll
/// keeps the previous snapshot readable but flips [`Coordinator::is_available`]
/// to `false` until the next successful poll.
pub struct Coordinator {
    inner: Arc<Inner>,
    poller: Mutex<Option<Poller>>,
}

struct Inner {
    client: MeterClient,
    device: DeviceInfo,
    update_interval: Duration,
    state: RwLock<PollState>,
    observers: Mutex<ObserverRegistry>,
    // Serialises polls so a manual refresh never overlaps a timer tick
    poll_lock: tokio::sync::Mutex<()>,
}

struct PollState {
    snapshot: Option<Arc<Snapshot>>,
    last_update_succeeded: bool,
}

#[derive(Default)]
struct ObserverRegistry {
    next_id: u64,
    observers: HashMap<u64, Observer>,
    closed: bool,
}

struct Poller {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Coordinator {
    /// Performs the first poll and starts the periodic one.
    ///
    /// Fails if the first poll fails; no coordinator exists for an unreachable meter.
    pub async fn initialize(
        client: MeterClient,
        device: DeviceInfo,
        update_interval: Duration,
    ) -> Result<Self, MeterError> {
        if update_interval.is_zero() {
            return Err(MeterError::ZeroInterval);
        }
        info!(
            host = client.host(),
            serial = %device.serial,
            interval_secs = update_interval.as_secs(),
            "Initializing coordinator"
        );
        let payload = client.fetch_state().await?;
        let snapshot = Arc::new(Snapshot::from_payload(&payload));
        debug!(measurements = snapshot.len(), "First refresh done");

        let inner = Arc::new(Inner {
            client,
            device,
            update_interval,
            state: RwLock::new(PollState {
                snapshot: Some(snapshot),
                last_update_succeeded: true,
            }),
            observers: Mutex::new(ObserverRegistry::default()),
            poll_lock: tokio::sync::Mutex::new(()),
        });
        let poller = Poller::spawn(inner.clone());

        Ok(Self {
            inner,
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Registers an observer. Dropping the returned [`Subscription`] removes it.
    pub fn subscribe(&self, observer: impl Fn() + Send + Sync + 'static) -> Subscription {
        let mut registry = self.inner.observers.lock();
        if registry.closed {
            debug!("Coordinator is shut down, ignoring subscription");
            return Subscription {
                registry: Weak::new(),
                id: None,
            };
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.insert(id, Arc::new(observer));
        Subscription {
            registry: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Raw value for a key in the last good snapshot.
    pub fn current_value(&self, key: &str) -> Option<i64> {
        self.snapshot()?.raw_value(key)
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.state.read().snapshot.clone()
    }

    /// Whether the most recent poll succeeded.
    pub fn is_available(&self) -> bool {
        self.inner.state.read().last_update_succeeded
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.inner.device
    }

    pub fn host(&self) -> &str {
        self.inner.client.host()
    }

    pub fn update_interval(&self) -> Duration {
        self.inner.update_interval
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().observers.len()
    }

    /// Polls now, outside the regular schedule.
    pub async fn refresh(&self) -> Result<(), MeterError> {
        self.inner.refresh().await
    }

    /// Stops polling and drops every observer. Safe to call more than once.
    pub async fn shutdown(&self) {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            info!(host = self.host(), "Stopping coordinator");
            let _ = poller.shutdown.send(());
            if let Err(err) = poller.handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "Poll task ended abnormally");
                }
            }
        }
        let mut registry = self.inner.observers.lock();
        registry.closed = true;
        registry.observers.clear();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.handle.abort();
        }
    }
}

impl Inner {
    async fn refresh(&self) -> Result<(), MeterError> {
        let _guard = self.poll_lock.lock().await;
        let outcome = match self.client.fetch_state().await {
            Ok(payload) => {
                let snapshot = Arc::new(Snapshot::from_payload(&payload));
                debug!(measurements = snapshot.len(), "Snapshot updated");
                let mut state = self.state.write();
                state.snapshot = Some(snapshot);
                state.last_update_succeeded = true;
                Ok(())
            }
            Err(err) => {
                warn!(host = self.client.host(), error = %err, "Error communicating with meter");
                self.state.write().last_update_succeeded = false;
                Err(err)
            }
        };
        self.notify_observers();
        outcome
    }

    fn notify_observers(&self) {
        // Observers may subscribe or unsubscribe from inside the callback
        let observers: Vec<Observer> = self.observers.lock().observers.values().cloned().collect();
        for observer in observers {
            observer();
        }
    }
}

impl Poller {
    fn spawn(inner: Arc<Inner>) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::run(inner, shutdown_rx));
        Self { shutdown, handle }
    }

    async fn run(inner: Arc<Inner>, mut shutdown: oneshot::Receiver<()>) {
        let period = inner.update_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    // Errors are already logged, the next tick retries
                    let _ = inner.refresh().await;
                }
            }
        }

        debug!(host = inner.client.host(), "Poll task exiting");
    }
}

/// Handle to a registered observer.
#[must_use = "dropping a Subscription removes the observer"]
pub struct Subscription {
    registry: Weak<Inner>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(inner) = self.registry.upgrade() {
            inner.observers.lock().observers.remove(&id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
