//! # Messaging Module
//!
//! Broker-backed job queues: provider abstraction, typed job messages,
//! per-configuration topology, publishing and the consumer dispatcher.

pub mod dispatcher;
pub mod errors;
pub mod message;
pub mod providers;
pub mod publisher;
pub mod service;
pub mod topology;
pub mod types;

pub use dispatcher::{
    ConsumerDispatcher, DeliveryOutcome, DispatcherConfig, DispatcherStats, JobHandler,
};
pub use errors::MessagingError;
pub use message::{
    envelope_config_id, stamp_envelope, DataDeletionJob, DataDownloadJob, DataUploadJob,
    FailedJob, FailureInfo, Job, JobErrorInfo, MetadataDownloadJob, MetadataPayload,
    MetadataUploadJob, RetryContext,
};
pub use providers::{BrokerClient, InMemoryMessagingService, RabbitMqMessagingService};
pub use publisher::Publisher;
pub use service::MessagingService;
pub use topology::{
    queue_name, queue_names, InitializationSummary, QueueBatchReport, QueueOpOutcome, QueueSet,
    TopologyEvent, TopologyManager,
};
pub use types::{Delivery, HeaderValue, MessageHeaders, QueueHealthReport, QueueOptions, ReceiptHandle};
