//! Partition log made of segments.
//!
//! `end_offset == start_offset + number of stored records` holds after every
//! append and every retention pass.

use super::error::KafkaError;
use super::record::Record;
use crate::spec::asyncapi::TopicConfiguration;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Retention and rolling settings of a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LogConfig {
    pub retention_ms: Option<i64>,
    pub retention_bytes: Option<i64>,
    pub segment_ms: Option<i64>,
    pub segment_bytes: Option<i64>,
}

impl From<&TopicConfiguration> for LogConfig {
    fn from(c: &TopicConfiguration) -> Self {
        Self {
            retention_ms: c.retention_ms.filter(|v| *v >= 0),
            retention_bytes: c.retention_bytes.filter(|v| *v >= 0),
            segment_ms: c.segment_ms.filter(|v| *v > 0),
            segment_bytes: c.segment_bytes.filter(|v| *v > 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub base_offset: i64,
    pub log: Vec<Record>,
    pub size: usize,
    pub opened: DateTime<Utc>,
    pub last_write: DateTime<Utc>,
}

impl Segment {
    fn new(base_offset: i64) -> Self {
        let now = Utc::now();
        Self {
            base_offset,
            log: Vec::new(),
            size: 0,
            opened: now,
            last_write: now,
        }
    }

    fn end_offset(&self) -> i64 {
        self.base_offset + self.log.len() as i64
    }
}

#[derive(Debug)]
struct Log {
    start_offset: i64,
    end_offset: i64,
    segments: Vec<Segment>,
    config: LogConfig,
}

#[derive(Debug)]
pub struct Partition {
    pub index: i32,
    pub leader: i32,
    log: RwLock<Log>,
}

impl Partition {
    pub fn new(index: i32, leader: i32, config: LogConfig) -> Self {
        Self {
            index,
            leader,
            log: RwLock::new(Log {
                start_offset: 0,
                end_offset: 0,
                segments: vec![Segment::new(0)],
                config,
            }),
        }
    }

    pub fn set_config(&self, config: LogConfig) {
        self.log.write().config = config;
    }

    pub fn start_offset(&self) -> i64 {
        self.log.read().start_offset
    }

    pub fn end_offset(&self) -> i64 {
        self.log.read().end_offset
    }

    pub fn is_empty(&self) -> bool {
        let log = self.log.read();
        log.start_offset == log.end_offset
    }

    pub fn segment_count(&self) -> usize {
        self.log.read().segments.len()
    }

    /// Appends records and returns the offset of the first one.
    pub fn append(&self, records: Vec<Record>) -> i64 {
        let mut log = self.log.write();
        let base_offset = log.end_offset;
        let now = Utc::now();
        for mut record in records {
            if log.should_roll(now) {
                let next = log.end_offset;
                log.segments.push(Segment::new(next));
            }
            record.offset = log.end_offset;
            let size = record.size();
            if let Some(active) = log.segments.last_mut() {
                active.size += size;
                active.last_write = now;
                active.log.push(record);
            }
            log.end_offset += 1;
        }
        log.apply_retention(now);
        base_offset
    }

    /// Records starting at `offset` within `max_bytes`. The first record is
    /// always returned even if it alone exceeds the budget.
    pub fn read(&self, offset: i64, max_bytes: usize) -> Result<Vec<Record>, KafkaError> {
        let log = self.log.read();
        if offset < log.start_offset || offset > log.end_offset {
            return Err(KafkaError::OffsetOutOfRange {
                offset,
                start: log.start_offset,
                end: log.end_offset,
            });
        }
        let mut out = Vec::new();
        let mut used = 0usize;
        for segment in log.segments.iter().filter(|s| s.end_offset() > offset) {
            let skip = (offset - segment.base_offset).max(0) as usize;
            for record in &segment.log[skip..] {
                let size = record.size();
                if !out.is_empty() && used + size > max_bytes {
                    return Ok(out);
                }
                used += size;
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    pub fn record(&self, offset: i64) -> Option<Record> {
        let log = self.log.read();
        let segment = log
            .segments
            .iter()
            .find(|s| offset >= s.base_offset && offset < s.end_offset())?;
        segment.log.get((offset - segment.base_offset) as usize).cloned()
    }

    /// Resolves a ListOffsets timestamp: `-1` latest, `-2` earliest,
    /// otherwise the first record at or after the timestamp.
    pub fn offset_for_time(&self, timestamp: i64) -> (i64, i64) {
        let log = self.log.read();
        match timestamp {
            -1 => (-1, log.end_offset),
            -2 => (-1, log.start_offset),
            ts => log
                .segments
                .iter()
                .flat_map(|s| s.log.iter())
                .find(|r| r.timestamp_ms() >= ts)
                .map(|r| (r.timestamp_ms(), r.offset))
                .unwrap_or((-1, log.end_offset)),
        }
    }
}

impl Log {
    fn should_roll(&self, now: DateTime<Utc>) -> bool {
        let Some(active) = self.segments.last() else {
            return true;
        };
        if active.log.is_empty() {
            return false;
        }
        if let Some(max) = self.config.segment_bytes {
            if active.size as i64 >= max {
                return true;
            }
        }
        if let Some(ms) = self.config.segment_ms {
            if now - active.opened >= Duration::milliseconds(ms) {
                return true;
            }
        }
        false
    }

    /// Deletes closed segments that exceed the retention limits. The active
    /// segment is never deleted.
    fn apply_retention(&mut self, now: DateTime<Utc>) {
        if let Some(ms) = self.config.retention_ms {
            let cutoff = now - Duration::milliseconds(ms);
            while self.segments.len() > 1 && self.segments[0].last_write < cutoff {
                self.drop_oldest();
            }
        }
        if let Some(max) = self.config.retention_bytes {
            let mut total: usize = self.segments.iter().map(|s| s.size).sum();
            while self.segments.len() > 1 && total as i64 > max {
                total -= self.segments[0].size;
                self.drop_oldest();
            }
        }
    }

    fn drop_oldest(&mut self) {
        let removed = self.segments.remove(0);
        self.start_offset = removed.end_offset();
    }
}
