//! Kafka-backed queue of thumbnail jobs.
//!
//! The producer is created on first use and then shared by every request.
//! Creating it also declares the job topic, which is idempotent: a broker
//! answering "topic already exists" counts as success.

use crate::config::KafkaConfig;
use crate::job_status::ImageId;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Errors that can occur while dispatching a job
#[derive(Error, Debug)]
pub enum JobQueueError {
    #[error("Failed to create producer: {0}")]
    Connect(String),

    #[error("Failed to declare topic {topic}: {message}")]
    Declare { topic: String, message: String },

    #[error("Failed to send message to topic {topic}: {message}")]
    Send { topic: String, message: String },

    #[error("Job queue call timed out after {0:?}")]
    Timeout(Duration),
}

/// Queue of image ids waiting for thumbnail generation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Deliver one job message carrying `image_id`
    async fn enqueue(&self, image_id: ImageId) -> Result<(), JobQueueError>;
}

/// A handle created at most once and then reused.
///
/// Concurrent first callers wait on a single creation. A failed creation
/// leaves the slot empty so the next caller tries again.
pub struct LazyChannel<T> {
    cell: OnceCell<T>,
}

impl<T> LazyChannel<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the existing handle or create it with `create`
    pub async fn get_or_create<E, F, Fut>(&self, create: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cell.get_or_try_init(create).await
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

impl<T> Default for LazyChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Job queue publishing image ids to a Kafka topic
pub struct KafkaJobQueue {
    config: KafkaConfig,
    producer: LazyChannel<FutureProducer>,
}

impl KafkaJobQueue {
    /// Create the queue; no broker is contacted until the first job
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            producer: LazyChannel::new(),
        }
    }

    fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.config.message_timeout_ms)
    }

    async fn producer(&self) -> Result<&FutureProducer, JobQueueError> {
        self.producer.get_or_create(|| self.connect()).await
    }

    async fn connect(&self) -> Result<FutureProducer, JobQueueError> {
        info!(
            bootstrap_servers = %self.config.bootstrap_servers,
            topic = %self.config.topic,
            "Creating Kafka producer"
        );

        let client_config = build_client_config(&self.config);
        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| JobQueueError::Connect(e.to_string()))?;

        self.declare_topic(&client_config).await?;

        Ok(producer)
    }

    async fn declare_topic(&self, client_config: &ClientConfig) -> Result<(), JobQueueError> {
        let topic = &self.config.topic;
        let declare_error = |message: String| JobQueueError::Declare {
            topic: topic.clone(),
            message,
        };

        let admin: AdminClient<DefaultClientContext> = client_config
            .create()
            .map_err(|e| declare_error(e.to_string()))?;

        let new_topic = NewTopic::new(
            topic,
            self.config.partitions,
            TopicReplication::Fixed(self.config.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.message_timeout()));

        let results = admin
            .create_topics(std::iter::once(&new_topic), &options)
            .await
            .map_err(|e| declare_error(e.to_string()))?;

        check_topic_results(topic, results)
    }
}

/// A topic that already exists counts as declared
fn check_topic_results(topic: &str, results: Vec<TopicResult>) -> Result<(), JobQueueError> {
    for result in results {
        match result {
            Ok(name) => info!(topic = %name, "Created job topic"),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(topic = %name, "Job topic already exists")
            }
            Err((_, code)) => {
                return Err(JobQueueError::Declare {
                    topic: topic.to_string(),
                    message: code.to_string(),
                })
            }
        }
    }

    Ok(())
}

/// Message key and payload: the bare decimal id the worker reads
fn job_payload(image_id: ImageId) -> String {
    image_id.to_string()
}

#[async_trait]
impl JobQueue for KafkaJobQueue {
    #[instrument(skip(self), fields(image_id = %image_id, topic = %self.config.topic))]
    async fn enqueue(&self, image_id: ImageId) -> Result<(), JobQueueError> {
        let producer = self.producer().await?;

        let payload = job_payload(image_id);
        let record = FutureRecord::to(&self.config.topic)
            .key(payload.as_str())
            .payload(payload.as_str());

        let (partition, offset) = producer
            .send(record, Timeout::After(self.message_timeout()))
            .await
            .map_err(|(e, _)| JobQueueError::Send {
                topic: self.config.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Job delivered");

        Ok(())
    }
}

/// Build the librdkafka client configuration for producer and admin clients
fn build_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("message.timeout.ms", config.message_timeout_ms.to_string())
        .set("acks", &config.acks);

    // Configure SSL if enabled
    if config.ssl_enabled {
        client_config.set("security.protocol", "SASL_SSL");
        if let Some(ref ca_location) = config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    // Configure SASL if credentials provided
    if let (Some(ref username), Some(ref password)) =
        (&config.sasl_username, &config.sasl_password)
    {
        client_config
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client_config
}
