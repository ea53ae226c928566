//! Consumer-group workers.
//!
//! Each subscription runs one task per partition. A worker hands the message
//! at its group's offset to the handler and commits on success. Transient
//! failures are retried after a backoff; once the delivery budget is spent,
//! or on a permanent failure, the message is dead-lettered and skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Delivery, EventChannel, Result};

/// What a handler did with a delivery. All variants commit the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// State changed.
    Applied,
    /// The ledger already held a receipt for this message.
    Duplicate,
    /// Valid message that no longer applies.
    Ignored,
}

impl Handled {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handled::Applied => "applied",
            Handled::Duplicate => "duplicate",
            Handled::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Redeliver later.
    #[error("transient: {0}")]
    Transient(String),
    /// Redelivery cannot help.
    #[error("permanent: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Consumer group name, also the ledger consumer key.
    fn name(&self) -> &str;

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<Handled, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Sleep between polls of an empty partition.
    pub poll_interval: Duration,
    /// Sleep before redelivering after a transient failure.
    pub retry_backoff: Duration,
    /// Deliveries of one message before it is dead-lettered.
    pub max_delivery_attempts: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(200),
            max_delivery_attempts: 5,
        }
    }
}

/// Result of one worker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Idle,
    Committed,
    Interrupted,
}

struct PartitionWorker<C> {
    channel: Arc<C>,
    topic: String,
    partition: u32,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl<C: EventChannel> PartitionWorker<C> {
    async fn step(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Step> {
        let group = self.handler.name();
        let Some(mut delivery) = self.channel.fetch(&self.topic, group, self.partition).await?
        else {
            return Ok(Step::Idle);
        };

        loop {
            metrics::counter!("channel_deliveries_total", "topic" => self.topic.clone(), "group" => group.to_string())
                .increment(1);

            match self.handler.handle(&delivery).await {
                Ok(handled) => {
                    tracing::debug!(
                        topic = %self.topic,
                        group,
                        offset = delivery.offset,
                        message_id = %delivery.message_id(),
                        result = handled.as_str(),
                        "delivery handled"
                    );
                    break;
                }
                Err(HandlerError::Permanent(reason)) => {
                    self.dead_letter(&delivery, &reason);
                    break;
                }
                Err(HandlerError::Transient(reason))
                    if delivery.attempt >= self.config.max_delivery_attempts =>
                {
                    self.dead_letter(&delivery, &reason);
                    break;
                }
                Err(HandlerError::Transient(reason)) => {
                    tracing::warn!(
                        topic = %self.topic,
                        group,
                        message_id = %delivery.message_id(),
                        attempt = delivery.attempt,
                        %reason,
                        "transient failure, redelivering"
                    );
                    metrics::counter!("channel_redeliveries_total", "topic" => self.topic.clone())
                        .increment(1);
                    delivery.attempt += 1;

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = shutdown.changed() => return Ok(Step::Interrupted),
                    }
                }
            }
        }

        self.channel
            .commit(&self.topic, group, self.partition, delivery.offset)
            .await?;
        Ok(Step::Committed)
    }

    fn dead_letter(&self, delivery: &Delivery, reason: &str) {
        tracing::error!(
            topic = %self.topic,
            group = self.handler.name(),
            key = %delivery.key,
            message_id = %delivery.message_id(),
            attempt = delivery.attempt,
            %reason,
            "delivery abandoned"
        );
        metrics::counter!("channel_dead_letters_total", "topic" => self.topic.clone())
            .increment(1);
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(topic = %self.topic, group = self.handler.name(), partition = self.partition, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.step(&mut shutdown).await {
                Ok(Step::Committed) => false,
                Ok(Step::Idle) => true,
                Ok(Step::Interrupted) => break,
                Err(e) => {
                    tracing::error!(topic = %self.topic, partition = self.partition, error = %e, "channel error");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
        tracing::debug!(topic = %self.topic, partition = self.partition, "worker stopped");
    }
}

/// Owns the workers of every subscription on one channel.
pub struct ConsumerRuntime<C> {
    channel: Arc<C>,
    config: ConsumerConfig,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: EventChannel + 'static> ConsumerRuntime<C> {
    pub fn new(channel: Arc<C>, config: ConsumerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            channel,
            config,
            shutdown,
            workers: Vec::new(),
        }
    }

    /// Starts one worker per partition of `topic` for the handler's group.
    pub fn subscribe(&mut self, topic: &str, handler: Arc<dyn MessageHandler>) {
        tracing::info!(topic, group = handler.name(), partitions = self.channel.partitions(), "subscribing");
        for partition in 0..self.channel.partitions() {
            let worker = PartitionWorker {
                channel: Arc::clone(&self.channel),
                topic: topic.to_string(),
                partition,
                handler: Arc::clone(&handler),
                config: self.config.clone(),
            };
            self.workers
                .push(tokio::spawn(worker.run(self.shutdown.subscribe())));
        }
    }

    /// Delivers everything currently pending on `topic` to `handler`, inline.
    ///
    /// Same retry and dead-letter rules as the background workers. Returns
    /// the number of committed messages.
    pub async fn drain(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<usize> {
        let mut shutdown = self.shutdown.subscribe();
        let mut committed = 0;
        for partition in 0..self.channel.partitions() {
            let worker = PartitionWorker {
                channel: Arc::clone(&self.channel),
                topic: topic.to_string(),
                partition,
                handler: Arc::clone(&handler),
                config: self.config.clone(),
            };
            while worker.step(&mut shutdown).await? == Step::Committed {
                committed += 1;
            }
        }
        Ok(committed)
    }

    /// Signals every worker and waits for them to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "consumer worker panicked");
            }
        }
    }
}
