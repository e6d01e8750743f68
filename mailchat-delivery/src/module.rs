use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use mailchat_common::{Address, Envelope, Event, Node, internal};
use mailchat_module::{
    ConfigError, ConfigMap, DeliveryResult, Instance, Module, ModuleError, Target, parse_duration,
};

use crate::{
    dsn::DsnConfig,
    limits::{DestinationLimits, Limits, Rate},
    queue::{self, Queue, QueueConfig},
    retry::{self, RetryPolicy},
    store::{FileStore, MemoryStore, QueueStore},
};

/// `target.queue`: accepts messages for later delivery to its `target`,
/// retrying temporary failures and bouncing the rest.
pub struct QueueModule {
    instance: Instance,
    queue: OnceLock<Arc<Queue>>,
}

impl QueueModule {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            queue: OnceLock::new(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self::new(instance)))
    }

    /// The queue, once initialized
    pub fn queue(&self) -> Option<&Arc<Queue>> {
        self.queue.get()
    }

    fn parse_config(cfg: &mut ConfigMap<'_>) -> Result<QueueConfig, ConfigError> {
        let retry = RetryPolicy {
            max_tries: cfg.parse("max_tries", retry::defaults::max_tries())?,
            initial_retry: cfg.duration("initial_retry", retry::defaults::initial_retry())?,
            max_retry: cfg.duration("max_retry", retry::defaults::max_retry())?,
            jitter: cfg.parse("retry_jitter", retry::defaults::jitter())?,
        };

        if retry.max_tries == 0 {
            return Err(ConfigError::invalid(
                cfg.location(),
                "max_tries: must be at least 1",
            ));
        }
        if retry.initial_retry.is_zero() {
            return Err(ConfigError::invalid(
                cfg.location(),
                "initial_retry: must be greater than zero",
            ));
        }
        if retry.initial_retry > retry.max_retry {
            return Err(ConfigError::invalid(
                cfg.location(),
                "initial_retry: cannot exceed max_retry",
            ));
        }
        if !(0.0..1.0).contains(&retry.jitter) {
            return Err(ConfigError::invalid(
                cfg.location(),
                format!("retry_jitter: {} is outside [0, 1)", retry.jitter),
            ));
        }

        let max_parallelism = cfg.parse("max_parallelism", queue::defaults::max_parallelism())?;
        if max_parallelism == 0 {
            return Err(ConfigError::invalid(
                cfg.location(),
                "max_parallelism: must be at least 1",
            ));
        }

        let mut default = Limits::default();
        if let Some(node) = cfg.single("destination_concurrency")? {
            default.concurrency = parse_concurrency(node)?;
        }
        if let Some(node) = cfg.single("destination_rate")? {
            default.rate = Some(parse_rate(node)?);
        }

        let mut limits = DestinationLimits::new(default);
        for node in cfg.nodes("destination") {
            let overrides = parse_destination(node, default)?;
            for key in &node.args {
                limits.insert(key, overrides);
            }
        }

        let dsn = DsnConfig {
            reporting_mta: cfg.globals().hostname.clone(),
            from_domain: cfg.globals().generated_domain().to_string(),
        };

        let tick = cfg.duration("tick", queue::defaults::tick())?;
        let drain_timeout = cfg.duration("drain_timeout", queue::defaults::drain_timeout())?;
        for (key, value) in [("tick", tick), ("drain_timeout", drain_timeout)] {
            if value.is_zero() {
                return Err(ConfigError::invalid(
                    cfg.location(),
                    format!("{key}: must be greater than zero"),
                ));
            }
        }

        Ok(QueueConfig {
            retry,
            limits,
            max_parallelism,
            tick,
            drain_timeout,
            dsn,
        })
    }

    async fn open_store(&self, cfg: &mut ConfigMap<'_>) -> Result<Arc<dyn QueueStore>, ConfigError> {
        let location = match cfg.string("location")? {
            Some(location) if location == "memory" => {
                return Ok(Arc::new(MemoryStore::new()));
            }
            Some(location) => PathBuf::from(location),
            None if self.instance.name.is_empty() => {
                return Err(ConfigError::invalid(
                    cfg.location(),
                    "location is required for a queue without a name",
                ));
            }
            None => cfg.globals().state_path("queue", &self.instance.name),
        };

        let store = FileStore::open(&location).await.map_err(|e| {
            ConfigError::invalid(cfg.location(), format!("location: {e}"))
        })?;

        internal!(
            "Queue {} stored in {}",
            self.instance.display_name(),
            location.display()
        );
        Ok(Arc::new(store))
    }
}

fn one_arg<'n>(node: &'n Node) -> Result<&'n str, ConfigError> {
    match node.args.as_slice() {
        [value] => Ok(value.as_str()),
        _ => Err(ConfigError::invalid(
            node.location(),
            format!("{}: expected exactly one argument", node.name),
        )),
    }
}

fn parse_concurrency(node: &Node) -> Result<usize, ConfigError> {
    match one_arg(node)?.parse::<usize>() {
        Ok(concurrency) if concurrency > 0 => Ok(concurrency),
        Ok(_) => Err(ConfigError::invalid(
            node.location(),
            format!("{}: must be at least 1", node.name),
        )),
        Err(e) => Err(ConfigError::invalid(
            node.location(),
            format!("{}: {e}", node.name),
        )),
    }
}

/// `<count> [interval]`; the interval defaults to one second.
fn parse_rate(node: &Node) -> Result<Rate, ConfigError> {
    let invalid = |message: String| ConfigError::invalid(node.location(), message);

    let (count, interval) = match node.args.as_slice() {
        [count] => (count, None),
        [count, interval] => (count, Some(interval)),
        _ => {
            return Err(invalid(format!(
                "{}: expected a count and an optional interval",
                node.name
            )));
        }
    };

    let count: u32 = count
        .parse()
        .map_err(|e| invalid(format!("{}: {e}", node.name)))?;
    if count == 0 {
        return Err(invalid(format!("{}: count must be at least 1", node.name)));
    }

    let interval = match interval {
        Some(value) => parse_duration(value)
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| invalid(format!("{}: invalid interval {value}", node.name)))?,
        None => std::time::Duration::from_secs(1),
    };

    Ok(Rate { count, interval })
}

fn parse_destination(node: &Node, default: Limits) -> Result<Limits, ConfigError> {
    if node.args.is_empty() {
        return Err(ConfigError::invalid(
            node.location(),
            "destination: expected at least one destination key",
        ));
    }

    let mut limits = default;
    for child in &node.children {
        match child.name.as_str() {
            "concurrency" => limits.concurrency = parse_concurrency(child)?,
            "rate" => limits.rate = Some(parse_rate(child)?),
            _ => {
                return Err(ConfigError::UnknownDirective {
                    location: child.location(),
                    name: child.name.clone(),
                });
            }
        }
    }

    Ok(limits)
}

#[async_trait]
impl Module for QueueModule {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let target = cfg.module::<dyn Target>("target").await?;
        let target = cfg.required("target", target)?;
        let bounce = cfg.module::<dyn Target>("bounce").await?;

        let config = Self::parse_config(cfg)?;
        let drain_timeout = config.drain_timeout;
        let store = self.open_store(cfg).await?;

        let queue = Queue::open(self.instance.display_name(), config, target, bounce, store)
            .await
            .map_err(|e| ConfigError::invalid(cfg.location(), e.to_string()))?;

        let ready = Arc::clone(&queue);
        cfg.hooks().add(Event::Ready, move || {
            let queue = Arc::clone(&ready);
            async move {
                queue.start();
                Ok(())
            }
        });

        let stopping = Arc::clone(&queue);
        cfg.hooks().add(Event::Shutdown, move || {
            let queue = Arc::clone(&stopping);
            async move {
                queue.drain(drain_timeout).await;
                Ok(())
            }
        });

        let _ = self.queue.set(queue);
        Ok(())
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        Some(self)
    }
}

#[async_trait]
impl Target for QueueModule {
    async fn deliver(&self, envelope: &Envelope, recipients: &[Address]) -> Vec<DeliveryResult> {
        match self.queue.get() {
            Some(queue) => queue.deliver(envelope, recipients).await,
            None => recipients
                .iter()
                .map(|_| {
                    Err(ModuleError::Temporary(format!(
                        "{} is not initialized",
                        self.instance
                    )))
                })
                .collect(),
        }
    }
}
