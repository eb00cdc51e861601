//! Kafka mock broker.
//!
//! Each AsyncAPI service becomes a [`Cluster`] holding topics, partitions and
//! consumer groups. Brokers declared under `servers` are served through
//! [`BrokerHandler`], which speaks the Kafka binary protocol.

pub mod cluster;
pub mod error;
pub mod group;
pub mod handlers;
pub mod partition;
pub mod record;
pub mod server;
pub mod topic;
pub mod validation;

pub use cluster::{Broker, Cluster, MessageEvent};
pub use error::{ErrorCode, KafkaError};
pub use group::{Group, GroupSnapshot, GroupState};
pub use record::Record;
pub use server::BrokerHandler;
pub use topic::Topic;
