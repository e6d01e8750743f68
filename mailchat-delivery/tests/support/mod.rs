#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use mailchat_common::{Address, EnhancedCode, Envelope, Reply, Status};
use mailchat_delivery::{
    DestinationLimits, DsnConfig, MemoryStore, Queue, QueueConfig, QueueEvent, QueueStore,
    RetryPolicy,
};
use mailchat_module::{DeliveryResult, Instance, ModuleError, Target, testing::MockTarget};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, broadcast};

/// Scripted result of one delivery call
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Temporary,
    Reject(Reply),
}

/// Target answering each call with the next scripted outcome (accepting
/// once the script runs out). With a gate, every call first waits for a
/// permit released by the test.
#[derive(Default)]
pub struct ScriptedTarget {
    script: Mutex<VecDeque<Outcome>>,
    delivered: Mutex<Vec<Envelope>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTarget {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        })
    }

    /// A target holding every call until [`ScriptedTarget::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    /// Let `calls` held calls through.
    pub fn release(&self, calls: usize) {
        self.gate.as_ref().expect("not gated").add_permits(calls);
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(self.gate.as_ref().expect("not gated"))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl Target for ScriptedTarget {
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Accept);
        if matches!(outcome, Outcome::Accept) {
            self.delivered.lock().push(envelope.clone());
        }

        recipients
            .iter()
            .map(|_| match &outcome {
                Outcome::Accept => Ok(()),
                Outcome::Temporary => Err(ModuleError::Rejected(busy())),
                Outcome::Reject(reply) => Err(ModuleError::Rejected(reply.clone())),
            })
            .collect()
    }
}

pub fn busy() -> Reply {
    Reply::new(
        Status::MailboxUnavailable,
        EnhancedCode(4, 2, 1),
        "Mailbox busy",
    )
}

pub fn bounce_target() -> Arc<MockTarget> {
    Arc::new(MockTarget::new(Instance::new("test.target", "bounces")))
}

pub fn start() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

pub fn config() -> QueueConfig {
    QueueConfig {
        retry: RetryPolicy {
            max_tries: 5,
            initial_retry: Duration::from_secs(60),
            max_retry: Duration::from_secs(600),
            jitter: 0.0,
        },
        limits: DestinationLimits::default(),
        max_parallelism: 8,
        tick: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(1),
        dsn: DsnConfig {
            reporting_mta: "mx.example.com".to_string(),
            from_domain: "example.com".to_string(),
        },
    }
}

pub async fn open(
    config: QueueConfig,
    target: Arc<dyn Target>,
    bounce: Option<Arc<MockTarget>>,
) -> Arc<Queue> {
    open_with(config, target, bounce, Arc::new(MemoryStore::new())).await
}

pub async fn open_with(
    config: QueueConfig,
    target: Arc<dyn Target>,
    bounce: Option<Arc<MockTarget>>,
    store: Arc<dyn QueueStore>,
) -> Arc<Queue> {
    let bounce = bounce.map(|target| target as Arc<dyn Target>);
    Queue::open("outbound", config, target, bounce, store)
        .await
        .unwrap()
}

pub fn addrs(addresses: &[&str]) -> Vec<Address> {
    addresses
        .iter()
        .map(|address| Address::parse(address).unwrap())
        .collect()
}

pub fn envelope(sender: &str, recipients: &[&str]) -> Envelope {
    Envelope::new(
        Address::parse(sender).unwrap(),
        addrs(recipients),
        b"From: sender@example.com\r\nSubject: test\r\n\r\nHello\r\n".as_slice(),
    )
}

/// Every event received so far
pub fn events(receiver: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Yield until `condition` holds, failing after a second.
pub async fn until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}
