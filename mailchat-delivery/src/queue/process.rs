//! Scheduling and outcome handling of delivery attempts

use std::{sync::Arc, time::SystemTime};

use mailchat_common::{
    Envelope,
    tracing::{debug, error, info, warn},
};
use tokio::sync::OwnedSemaphorePermit;

use super::{Queue, QueueEvent, Running};
use crate::{
    dsn::{BounceReason, generate_dsn, should_generate_dsn},
    error::{DeliveryError, SystemError},
    item::{ItemState, QueueItem},
    limiter::{Blocked, Permit},
};

/// Slots held by a running attempt. Released once the item has left the
/// in-flight state.
struct Slots {
    _parallelism: OwnedSemaphorePermit,
    _destination: Permit,
}

impl Queue {
    /// Start every item due at `now` that the limits admit, returning how
    /// many attempts were started.
    ///
    /// Due items are considered earliest first. Items refused by their
    /// destination's limits stay pending and are considered again on the
    /// next tick; nothing starts once the queue is stopping.
    pub fn tick(self: &Arc<Self>, now: SystemTime) -> usize {
        self.reap();
        self.limiter.evict_idle(now);

        if self.is_stopping() {
            return 0;
        }

        let mut due: Vec<_> = self
            .items
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| (entry.next_attempt_at, entry.id))
            .collect();
        due.sort_unstable();

        let mut started = 0;
        for (_, id) in due {
            let Ok(parallelism) = Arc::clone(&self.parallelism).try_acquire_owned() else {
                debug!(queue = %self.name, "Parallelism limit reached");
                break;
            };

            let Some(destination) = self.items.get(&id).map(|item| item.destination.clone())
            else {
                continue;
            };

            let permit = match self.limiter.try_acquire(&destination, now) {
                Ok(permit) => permit,
                Err(Blocked::Concurrency) => {
                    debug!(queue = %self.name, %id, %destination, "Destination busy, item stays pending");
                    continue;
                }
                Err(Blocked::Rate(wait)) => {
                    debug!(
                        queue = %self.name,
                        %id,
                        %destination,
                        wait_seconds = wait.as_secs_f64(),
                        "Destination rate reached, item stays pending"
                    );
                    continue;
                }
            };

            // A concurrent tick may have taken the item in the meantime.
            let item = {
                let Some(mut entry) = self.items.get_mut(&id) else {
                    continue;
                };
                if !entry.is_due(now) {
                    continue;
                }
                entry.state = ItemState::InFlight;
                entry.clone()
            };

            self.emit(QueueEvent::Started {
                id,
                attempt: item.attempt + 1,
            });

            let running = Running::enter(&self.activity);
            let queue = Arc::clone(self);
            let slots = Slots {
                _parallelism: parallelism,
                _destination: permit,
            };
            self.tasks.lock().spawn(async move {
                queue.attempt(item, now, slots).await;
                drop(running);
            });

            started += 1;
        }

        started
    }

    /// Collect finished attempt tasks.
    fn reap(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                error!(queue = %self.name, "Delivery attempt panicked: {e}");
            }
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(queue = %self.name, id = %item.id, recipient = %item.recipient, attempt = item.attempt + 1)
    )]
    async fn attempt(&self, item: QueueItem, now: SystemTime, slots: Slots) {
        if let Err(err) = self.store.save(&item).await {
            warn!(error = %err, "Failed to persist in-flight state");
        }

        let (envelope, result) = match self.store.read_body(item.body).await {
            Ok(body) => {
                let envelope = Envelope {
                    id: item.message_id,
                    sender: item.sender.clone(),
                    recipients: vec![item.recipient.clone()],
                    body,
                    received_at: item.queued_at,
                };
                let result = self.deliver_one(&envelope).await;
                (Some(envelope), result)
            }
            Err(err) => (None, Err(err.into())),
        };

        match result {
            Ok(()) => self.delivered(item, slots).await,
            Err(error) => {
                self.failed(item, envelope.as_ref(), error, now, slots)
                    .await;
            }
        }
    }

    async fn deliver_one(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let mut results = self.target.deliver(envelope, &envelope.recipients).await;
        match results.pop() {
            Some(result) => result.map_err(DeliveryError::from),
            None => Err(SystemError::Internal("target returned no result".to_string()).into()),
        }
    }

    async fn delivered(&self, item: QueueItem, slots: Slots) {
        self.items.remove(&item.id);
        if let Err(err) = self.store.remove(item.id).await {
            warn!(error = %err, "Failed to remove delivered item");
        }
        self.release_body(item.body).await;

        let attempts = item.attempt + 1;
        info!(
            message_id = %item.message_id,
            recipient = %item.recipient,
            attempts,
            "Delivered"
        );

        self.emit(QueueEvent::Delivered {
            id: item.id,
            attempts,
        });
        drop(slots);
    }

    /// Record the failure, then retry or bounce the item.
    ///
    /// Permanent failures bounce at once. Anything else is retried until
    /// `max_tries` attempts have failed, whatever the class of the last
    /// error.
    async fn failed(
        &self,
        mut item: QueueItem,
        envelope: Option<&Envelope>,
        error: DeliveryError,
        now: SystemTime,
        slots: Slots,
    ) {
        item.attempt += 1;
        item.last_error = Some(error.to_string());

        if error.is_permanent() {
            self.bounce(item, envelope, &error, BounceReason::Permanent, now, slots)
                .await;
            return;
        }

        if !self.config.retry.should_retry(item.attempt) {
            warn!(
                message_id = %item.message_id,
                recipient = %item.recipient,
                attempts = item.attempt,
                error = %error,
                "Max attempts reached, bouncing"
            );
            self.bounce(item, envelope, &error, BounceReason::Exhausted, now, slots)
                .await;
            return;
        }

        item.state = ItemState::Pending;
        item.next_attempt_at = self.config.retry.next_attempt_at(now, item.attempt);

        info!(
            message_id = %item.message_id,
            recipient = %item.recipient,
            attempt = item.attempt,
            remaining = self.config.retry.remaining_attempts(item.attempt),
            retry_in_secs = item
                .next_attempt_at
                .duration_since(now)
                .unwrap_or_default()
                .as_secs(),
            error = %error,
            "Delivery deferred"
        );

        if let Err(err) = self.store.save(&item).await {
            warn!(error = %err, "Failed to persist deferred item");
        }

        let event = QueueEvent::Deferred {
            id: item.id,
            attempt: item.attempt,
            next_attempt_at: item.next_attempt_at,
        };
        self.items.insert(item.id, item);
        self.emit(event);
        drop(slots);
    }

    /// Take the item out of the queue and notify its sender.
    ///
    /// Items from the null sender, or from a queue without a bounce target,
    /// are dropped with a log line instead.
    async fn bounce(
        &self,
        item: QueueItem,
        envelope: Option<&Envelope>,
        error: &DeliveryError,
        reason: BounceReason,
        now: SystemTime,
        slots: Slots,
    ) {
        self.items.remove(&item.id);
        if let Err(err) = self.store.remove(item.id).await {
            warn!(error = %err, "Failed to remove bounced item");
        }
        drop(slots);

        let notified = match &self.bounce {
            _ if !should_generate_dsn(&item) => {
                info!(
                    message_id = %item.message_id,
                    recipient = %item.recipient,
                    error = %error,
                    "Dropping failed message from the null sender"
                );
                false
            }
            None => {
                warn!(
                    message_id = %item.message_id,
                    recipient = %item.recipient,
                    error = %error,
                    "No bounce target configured, dropping failed message"
                );
                false
            }
            Some(target) => {
                let headers = envelope.map_or(&[][..], Envelope::header_section);
                let dsn = generate_dsn(&item, headers, error, reason, now, &self.config.dsn);
                let results = target.deliver(&dsn, &dsn.recipients).await;

                let failures: Vec<String> = results
                    .iter()
                    .filter_map(|result| result.as_ref().err().map(ToString::to_string))
                    .collect();
                if failures.is_empty() {
                    true
                } else {
                    error!(
                        message_id = %item.message_id,
                        sender = %item.sender,
                        errors = ?failures,
                        "Failed to route bounce"
                    );
                    false
                }
            }
        };

        self.release_body(item.body).await;
        self.emit(QueueEvent::Bounced {
            id: item.id,
            attempts: item.attempt,
            notified,
        });
    }
}
