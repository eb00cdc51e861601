//! A topic and its partitions. Keyed records are placed with murmur2 like
//! the Java client, keyless ones round robin.

use super::error::KafkaError;
use super::partition::{LogConfig, Partition};
use crate::spec::asyncapi::Channel;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    channel: RwLock<Channel>,
    partitions: RwLock<Vec<Arc<Partition>>>,
    next: AtomicUsize,
    retired: AtomicBool,
}

impl Topic {
    pub fn new(name: &str, channel: Channel, brokers: usize) -> Self {
        let config = log_config(&channel);
        let partitions = (0..channel.partitions().max(1))
            .map(|i| Arc::new(Partition::new(i, leader_for(i, brokers), config)))
            .collect();
        Self {
            name: name.to_string(),
            channel: RwLock::new(channel),
            partitions: RwLock::new(partitions),
            next: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel.read().clone()
    }

    /// Applies a new channel definition. Partitions can only grow; a smaller
    /// count is refused and the current partitions stay.
    pub fn update(&self, channel: Channel, brokers: usize) -> Result<(), KafkaError> {
        let config = log_config(&channel);
        let wanted = channel.partitions().max(1);
        {
            let mut partitions = self.partitions.write();
            let current = partitions.len() as i32;
            if wanted < current {
                return Err(KafkaError::InvalidPartitions {
                    topic: self.name.clone(),
                    current,
                    requested: wanted,
                });
            }
            for p in partitions.iter() {
                p.set_config(config);
            }
            for i in current..wanted {
                partitions.push(Arc::new(Partition::new(i, leader_for(i, brokers), config)));
            }
        }
        *self.channel.write() = channel;
        self.retired.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn partition(&self, index: i32) -> Option<Arc<Partition>> {
        if index < 0 {
            return None;
        }
        self.partitions.read().get(index as usize).cloned()
    }

    pub fn partitions(&self) -> Vec<Arc<Partition>> {
        self.partitions.read().clone()
    }

    pub fn partition_count(&self) -> i32 {
        self.partitions.read().len() as i32
    }

    /// Partition for a record without an explicit partition: murmur2 of the
    /// key like the Java client, round robin for keyless records.
    pub fn select_partition(&self, key: Option<&[u8]>) -> i32 {
        let count = self.partition_count().max(1);
        match key {
            Some(k) if !k.is_empty() => ((murmur2(k) & 0x7fff_ffff) % count as u32) as i32,
            _ => (self.next.fetch_add(1, Ordering::Relaxed) % count as usize) as i32,
        }
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.read().iter().all(|p| p.is_empty())
    }
}

fn log_config(channel: &Channel) -> LogConfig {
    channel
        .bindings
        .kafka
        .as_ref()
        .and_then(|k| k.topic_configuration.as_ref())
        .map(LogConfig::from)
        .unwrap_or_default()
}

fn leader_for(partition: i32, brokers: usize) -> i32 {
    if brokers == 0 {
        0
    } else {
        partition % brokers as i32
    }
}

/// Kafka's murmur2 variant used by the default partitioner.
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let len = data.len();
    let mut h: u32 = SEED ^ len as u32;
    let chunks = data.chunks_exact(4);
    let rest = chunks.remainder();
    for chunk in chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }
    match rest.len() {
        3 => {
            h ^= (rest[2] as u32) << 16;
            h ^= (rest[1] as u32) << 8;
            h ^= rest[0] as u32;
            h = h.wrapping_mul(M);
        }
        2 => {
            h ^= (rest[1] as u32) << 8;
            h ^= rest[0] as u32;
            h = h.wrapping_mul(M);
        }
        1 => {
            h ^= rest[0] as u32;
            h = h.wrapping_mul(M);
        }
        _ => {}
    }
    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
