//! The delivery queue
//!
//! Every accepted recipient becomes a [`QueueItem`] that moves through
//! `Pending -> InFlight -> {Delivered | Pending | Bounced}`. The scheduler
//! ([`Queue::tick`]) is driven by the time it is handed, so retries and
//! limits can be exercised with a simulated clock; [`Queue::serve`] drives it
//! from a timer.

mod process;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use mailchat_common::{Address, Envelope, Signal, internal};
use mailchat_module::{DeliveryResult, ModuleError, Target};
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, Semaphore, broadcast},
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};

use crate::{
    dsn::DsnConfig,
    error::DeliveryError,
    item::{BodyId, ItemId, ItemState, QueueItem},
    limiter::Limiter,
    limits::DestinationLimits,
    retry::RetryPolicy,
    store::QueueStore,
};

pub(crate) mod defaults {
    use std::time::Duration;

    pub fn max_parallelism() -> usize {
        num_cpus::get().saturating_mul(4).max(1)
    }

    pub const fn tick() -> Duration {
        Duration::from_secs(1)
    }

    pub const fn drain_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

/// Capacity of the event channel; slow subscribers miss older events.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    pub limits: DestinationLimits,
    /// Attempts running at once across every destination.
    pub max_parallelism: usize,
    /// Scheduler period of [`Queue::serve`].
    pub tick: Duration,
    /// How long shutdown waits for in-flight attempts.
    pub drain_timeout: Duration,
    pub dsn: DsnConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            limits: DestinationLimits::default(),
            max_parallelism: defaults::max_parallelism(),
            tick: defaults::tick(),
            drain_timeout: defaults::drain_timeout(),
            dsn: DsnConfig::default(),
        }
    }
}

/// State transitions, published to [`Queue::subscribe`]rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Queued {
        id: ItemId,
    },
    Started {
        id: ItemId,
        /// 1-based number of this attempt.
        attempt: u32,
    },
    Deferred {
        id: ItemId,
        /// Failed attempts so far.
        attempt: u32,
        next_attempt_at: SystemTime,
    },
    Delivered {
        id: ItemId,
        /// Attempts it took, the successful one included.
        attempts: u32,
    },
    Bounced {
        id: ItemId,
        attempts: u32,
        /// Whether a bounce was handed to the bounce target.
        notified: bool,
    },
}

/// Count of running attempts, with a wake-up when it drops to zero.
#[derive(Debug, Default)]
struct Activity {
    running: AtomicUsize,
    idle: Notify,
}

/// Decrements [`Activity::running`] when the attempt task finishes, even if
/// it panicked.
struct Running(Arc<Activity>);

impl Running {
    fn enter(activity: &Arc<Activity>) -> Self {
        activity.running.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(activity))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct Queue {
    name: String,
    config: QueueConfig,
    target: Arc<dyn Target>,
    bounce: Option<Arc<dyn Target>>,
    store: Arc<dyn QueueStore>,
    limiter: Limiter,
    parallelism: Arc<Semaphore>,
    items: DashMap<ItemId, QueueItem>,
    /// Items still referring to each stored body.
    bodies: DashMap<BodyId, usize>,
    tasks: Mutex<JoinSet<()>>,
    activity: Arc<Activity>,
    stopping: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
    shutdown: broadcast::Sender<Signal>,
    serving: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("items", &self.items.len())
            .field("in_flight", &self.in_flight())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Queue {
    /// Open the queue, restoring the items found in `store`.
    ///
    /// Items that were in flight when the process stopped are restored as
    /// pending and retried without counting the interrupted attempt.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read, or a restored item cannot be
    /// written back.
    #[tracing::instrument(level = "debug", skip_all, fields(queue = %name))]
    pub async fn open(
        name: &str,
        config: QueueConfig,
        target: Arc<dyn Target>,
        bounce: Option<Arc<dyn Target>>,
        store: Arc<dyn QueueStore>,
    ) -> Result<Arc<Self>, DeliveryError> {
        let items = DashMap::new();
        let bodies: DashMap<BodyId, usize> = DashMap::new();

        let mut interrupted = 0;
        for mut item in store.load().await? {
            if item.state == ItemState::InFlight {
                item.state = ItemState::Pending;
                store.save(&item).await?;
                interrupted += 1;
            }
            *bodies.entry(item.body).or_default() += 1;
            items.insert(item.id, item);
        }

        if !items.is_empty() {
            internal!(
                level = INFO,
                "Queue {name} restored {} item(s), {interrupted} interrupted in flight",
                items.len()
            );
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            name: name.to_string(),
            limiter: Limiter::new(config.limits.clone()),
            parallelism: Arc::new(Semaphore::new(config.max_parallelism.max(1))),
            config,
            target,
            bounce,
            store,
            items,
            bodies,
            tasks: Mutex::new(JoinSet::new()),
            activity: Arc::new(Activity::default()),
            stopping: AtomicBool::new(false),
            events,
            shutdown,
            serving: Mutex::new(None),
        }))
    }

    /// Accept `envelope` for `recipients`: one pending item per recipient,
    /// due at `now`, all sharing one stored body.
    ///
    /// Accepting does not wait for any attempt. Items keep being accepted
    /// while the queue drains and are picked up after the next start.
    ///
    /// # Errors
    ///
    /// Fails if the body or an item cannot be stored; items stored before
    /// the failure stay queued.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(queue = %self.name, message_id = %envelope.id, recipients = recipients.len())
    )]
    pub async fn enqueue(
        &self,
        envelope: &Envelope,
        recipients: &[Address],
        now: SystemTime,
    ) -> Result<Vec<ItemId>, DeliveryError> {
        if recipients.is_empty() {
            return Ok(Vec::new());
        }

        let body = BodyId::generate();
        self.store.write_body(body, &envelope.body).await?;

        // Counted up front so that an early delivery cannot release the
        // body while later recipients are still being stored.
        self.bodies.insert(body, recipients.len());

        let mut queued = Vec::with_capacity(recipients.len());
        for (stored, recipient) in recipients.iter().enumerate() {
            let item = QueueItem::new(
                envelope.id,
                body,
                envelope.sender.clone(),
                recipient.clone(),
                now,
            );

            if let Err(err) = self.store.save(&item).await {
                let unsaved = recipients.len() - stored;
                for _ in 0..unsaved {
                    self.release_body(body).await;
                }
                return Err(err.into());
            }

            tracing::debug!(
                queue = %self.name,
                id = %item.id,
                recipient = %item.recipient,
                "Queued item"
            );

            let id = item.id;
            self.items.insert(id, item);
            self.emit(QueueEvent::Queued { id });
            queued.push(id);
        }

        Ok(queued)
    }

    /// Drop one reference to `body`, deleting it from the store once no item
    /// refers to it any more.
    async fn release_body(&self, body: BodyId) {
        let unused = match self.bodies.entry(body) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = entry.get().saturating_sub(1);
                if *entry.get() == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => true,
        };

        if unused && let Err(err) = self.store.delete_body(body).await {
            tracing::warn!(queue = %self.name, %body, error = %err, "Failed to delete message body");
        }
    }

    fn emit(&self, event: QueueEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    /// Run the scheduler every `tick` until a shutdown signal arrives.
    #[tracing::instrument(level = "trace", skip_all, fields(queue = %self.name))]
    pub async fn serve(self: Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Queue {} starting", self.name);

        let mut timer = tokio::time::interval(self.config.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let started = self.tick(SystemTime::now());
                    if started > 0 {
                        tracing::debug!(queue = %self.name, started, "Started delivery attempts");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Queue {} received shutdown signal", self.name);
                            break;
                        }
                        Err(e) => {
                            tracing::error!(queue = %self.name, "Queue shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Spawn [`Queue::serve`]; calling it again while serving does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut serving = self.serving.lock();
        if serving.is_some() {
            return;
        }

        self.stopping.store(false, Ordering::SeqCst);
        let receiver = self.shutdown.subscribe();
        *serving = Some(tokio::spawn(Arc::clone(self).serve(receiver)));
    }

    /// Stop starting attempts and wait up to `timeout` for the running ones.
    ///
    /// Returns `false` if attempts were still running at the deadline; their
    /// items are stored as in flight and retried after the next restart.
    #[tracing::instrument(level = "debug", skip(self), fields(queue = %self.name))]
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(Signal::Shutdown);

        let serving = self.serving.lock().take();
        if let Some(handle) = serving
            && let Err(e) = handle.await
        {
            tracing::error!(queue = %self.name, "Queue scheduler failed: {e}");
        }

        let running = self.in_flight();
        if running > 0 {
            internal!(
                level = INFO,
                "Queue {} waiting for {running} in-flight attempt(s)",
                self.name
            );
        }

        if tokio::time::timeout(timeout, self.wait_idle()).await.is_ok() {
            internal!("Queue {} drained", self.name);
            true
        } else {
            tracing::warn!(
                queue = %self.name,
                remaining = self.in_flight(),
                "Drain timeout exceeded, remaining attempts will be retried on restart"
            );
            false
        }
    }

    /// Wait until no attempt is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.activity.idle.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            if self.activity.running.load(Ordering::SeqCst) == 0 {
                return;
            }

            notified.await;
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    #[must_use]
    pub const fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Every live item, oldest first
    #[must_use]
    pub fn items(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .items
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| item.id);
        items
    }

    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<QueueItem> {
        self.items.get(&id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Attempts currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.activity.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Accepting into the queue is the whole delivery from the caller's point of
/// view: every recipient succeeds once its item is stored.
#[async_trait]
impl Target for Queue {
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        match self.enqueue(envelope, recipients, SystemTime::now()).await {
            Ok(_) => recipients.iter().map(|_| Ok(())).collect(),
            Err(err) => {
                tracing::error!(queue = %self.name, error = %err, "Failed to queue message");
                recipients
                    .iter()
                    .map(|_| Err(ModuleError::Temporary(err.to_string())))
                    .collect()
            }
        }
    }
}
