//! Stored records and conversion from/to the wire record batch format.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Compression, Record as WireRecord, RecordBatchDecoder, RecordBatchEncoder, RecordEncodeOptions,
    TimestampType,
};

// Batches are neither compressed nor decompressed by hand; the crate picks the
// codec from the batch attributes.
type Compressor = fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>;
type Decompressor = fn(&mut Bytes, Compression) -> anyhow::Result<Bytes>;

/// Fixed per-record overhead used for byte budgets.
const RECORD_OVERHEAD: usize = 21;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub offset: i64,
    pub time: DateTime<Utc>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl Record {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            offset: 0,
            time: Utc::now(),
            key,
            value,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &[u8]) -> Self {
        self.headers.push(RecordHeader {
            key: key.to_string(),
            value: Some(Bytes::copy_from_slice(value)),
        });
        self
    }

    /// Approximate encoded size.
    pub fn size(&self) -> usize {
        RECORD_OVERHEAD
            + self.key.as_ref().map_or(0, |k| k.len())
            + self.value.as_ref().map_or(0, |v| v.len())
            + self
                .headers
                .iter()
                .map(|h| h.key.len() + h.value.as_ref().map_or(0, |v| v.len()))
                .sum::<usize>()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

/// Decodes produced record batches. An empty buffer yields no records.
pub fn decode_batch(data: &Bytes) -> anyhow::Result<Vec<Record>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = data.clone();
    let records = RecordBatchDecoder::decode(&mut buf, None::<Decompressor>)?
        .into_iter()
        .map(|r| Record {
            offset: r.offset,
            time: from_millis(r.timestamp),
            key: r.key,
            value: r.value,
            headers: r
                .headers
                .into_iter()
                .map(|(k, v)| RecordHeader {
                    key: k.to_string(),
                    value: v,
                })
                .collect(),
        })
        .collect();
    Ok(records)
}

/// Encodes records as a single v2 batch.
pub fn encode_batch(records: &[Record]) -> anyhow::Result<Bytes> {
    if records.is_empty() {
        return Ok(Bytes::new());
    }
    let wire: Vec<WireRecord> = records
        .iter()
        .map(|r| {
            let mut record = WireRecord {
                transactional: false,
                control: false,
                partition_leader_epoch: 0,
                producer_id: -1,
                producer_epoch: -1,
                timestamp_type: TimestampType::Creation,
                offset: r.offset,
                sequence: r.offset as i32,
                timestamp: r.timestamp_ms(),
                key: r.key.clone(),
                value: r.value.clone(),
                headers: Default::default(),
            };
            for h in &r.headers {
                record
                    .headers
                    .insert(StrBytes::from_string(h.key.clone()), h.value.clone());
            }
            record
        })
        .collect();

    let mut buf = BytesMut::new();
    RecordBatchEncoder::encode(
        &mut buf,
        wire.iter(),
        &RecordEncodeOptions {
            version: 2,
            compression: Compression::None,
        },
        None::<Compressor>,
    )?;
    Ok(buf.freeze())
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
