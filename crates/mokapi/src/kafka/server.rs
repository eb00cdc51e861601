//! Kafka wire protocol listener.
//!
//! Frames are length prefixed (4 bytes, big endian). Requests of one
//! connection are answered strictly in order. Responses are assembled in a
//! pooled `PageBuffer` with the length patched in front.

use super::cluster::Cluster;
use crate::buffer::PageBuffer;
use super::error::ErrorCode;
use super::handlers;
use crate::runtime::listeners::ConnectionHandler;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader};
use kafka_protocol::protocol::{Decodable, Encodable};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, warn};

pub const MAX_FRAME_LENGTH: usize = 100 * 1024 * 1024;

pub const API_PRODUCE: i16 = 0;
pub const API_FETCH: i16 = 1;
pub const API_LIST_OFFSETS: i16 = 2;
pub const API_METADATA: i16 = 3;
pub const API_OFFSET_COMMIT: i16 = 8;
pub const API_OFFSET_FETCH: i16 = 9;
pub const API_FIND_COORDINATOR: i16 = 10;
pub const API_JOIN_GROUP: i16 = 11;
pub const API_HEARTBEAT: i16 = 12;
pub const API_LEAVE_GROUP: i16 = 13;
pub const API_SYNC_GROUP: i16 = 14;
pub const API_DESCRIBE_GROUPS: i16 = 15;
pub const API_LIST_GROUPS: i16 = 16;
pub const API_VERSIONS: i16 = 18;

/// Supported APIs as `(key, min, max)`.
pub const SUPPORTED_APIS: &[(i16, i16, i16)] = &[
    (API_PRODUCE, 3, 9),
    (API_FETCH, 0, 12),
    (API_LIST_OFFSETS, 1, 7),
    (API_METADATA, 0, 9),
    (API_OFFSET_COMMIT, 0, 8),
    (API_OFFSET_FETCH, 0, 7),
    (API_FIND_COORDINATOR, 0, 3),
    (API_JOIN_GROUP, 0, 7),
    (API_HEARTBEAT, 0, 4),
    (API_LEAVE_GROUP, 0, 4),
    (API_SYNC_GROUP, 0, 4),
    (API_DESCRIBE_GROUPS, 0, 5),
    (API_LIST_GROUPS, 0, 4),
    (API_VERSIONS, 0, 3),
];

pub fn api_name(key: i16) -> &'static str {
    match key {
        API_PRODUCE => "Produce",
        API_FETCH => "Fetch",
        API_LIST_OFFSETS => "ListOffsets",
        API_METADATA => "Metadata",
        API_OFFSET_COMMIT => "OffsetCommit",
        API_OFFSET_FETCH => "OffsetFetch",
        API_FIND_COORDINATOR => "FindCoordinator",
        API_JOIN_GROUP => "JoinGroup",
        API_HEARTBEAT => "Heartbeat",
        API_LEAVE_GROUP => "LeaveGroup",
        API_SYNC_GROUP => "SyncGroup",
        API_DESCRIBE_GROUPS => "DescribeGroups",
        API_LIST_GROUPS => "ListGroups",
        API_VERSIONS => "ApiVersions",
        _ => "Unknown",
    }
}

fn flexible_since(key: i16) -> Option<i16> {
    match key {
        API_PRODUCE => Some(9),
        API_FETCH => Some(12),
        API_LIST_OFFSETS => Some(6),
        API_METADATA => Some(9),
        API_OFFSET_COMMIT => Some(8),
        API_OFFSET_FETCH => Some(6),
        API_FIND_COORDINATOR => Some(3),
        API_JOIN_GROUP => Some(6),
        API_HEARTBEAT => Some(4),
        API_LEAVE_GROUP => Some(4),
        API_SYNC_GROUP => Some(4),
        API_DESCRIBE_GROUPS => Some(5),
        API_LIST_GROUPS => Some(3),
        // ApiVersions responses always use header v0
        _ => None,
    }
}

pub fn response_header_version(key: i16, version: i16) -> i16 {
    match flexible_since(key) {
        Some(v) if version >= v => 1,
        _ => 0,
    }
}

pub fn is_supported(key: i16, version: i16) -> bool {
    SUPPORTED_APIS
        .iter()
        .any(|(k, min, max)| *k == key && (*min..=*max).contains(&version))
}

/// Encodes a response header followed by `body`.
pub fn encode_response<T: Encodable>(header: &RequestHeader, body: &T) -> anyhow::Result<BytesMut> {
    let mut buf = BytesMut::new();
    let key = header.request_api_key;
    let version = header.request_api_version;
    ResponseHeader::default()
        .with_correlation_id(header.correlation_id)
        .encode(&mut buf, response_header_version(key, version))?;
    body.encode(&mut buf, version)?;
    Ok(buf)
}

/// Decodes the request header, picking the header version from the api key
/// and version in the first four bytes.
pub fn decode_request_header(frame: &mut BytesMut) -> anyhow::Result<RequestHeader> {
    if frame.len() < 4 {
        anyhow::bail!("request frame of {} bytes has no header", frame.len());
    }
    let key = i16::from_be_bytes([frame[0], frame[1]]);
    let version = i16::from_be_bytes([frame[2], frame[3]]);
    let header_version = match ApiKey::try_from(key) {
        Ok(api) => api.request_header_version(version),
        Err(()) => 1,
    };
    RequestHeader::decode(frame, header_version)
}

/// Writes `payload` as one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let size = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    let mut buf = PageBuffer::new();
    buf.write_at(4, payload);
    buf.write_size_at(0, size);
    buf.write_to_async(w, 0).await?;
    w.flush().await
}

/// Per connection context handed to request handlers.
pub struct Context<'a> {
    pub cluster: &'a Cluster,
    pub broker_id: i32,
    pub client_id: String,
    pub client_host: String,
}

impl Context<'_> {
    /// Counts a failed request of `api` unless `code` is none.
    pub fn track(&self, api: i16, code: ErrorCode) {
        if code.is_ok() {
            return;
        }
        self.cluster
            .monitor()
            .kafka
            .requests_errors_total
            .with_label(&[self.cluster.name.as_str(), api_name(api)])
            .inc();
    }
}

/// Serves the Kafka protocol for one broker of a cluster.
pub struct BrokerHandler {
    cluster: Arc<Cluster>,
    address: String,
}

impl BrokerHandler {
    pub fn new(cluster: Arc<Cluster>, address: &str) -> Self {
        Self {
            cluster,
            address: address.to_string(),
        }
    }

    async fn handle_frame(&self, mut frame: BytesMut, peer: SocketAddr) -> anyhow::Result<Option<BytesMut>> {
        let header = decode_request_header(&mut frame)?;
        let broker_id = self
            .cluster
            .broker_by_address(&self.address)
            .map(|b| b.id)
            .unwrap_or_default();
        let ctx = Context {
            cluster: &self.cluster,
            broker_id,
            client_id: header
                .client_id
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_default(),
            client_host: format!("/{}", peer.ip()),
        };
        debug!(
            "kafka request {} v{} correlation {} from {}",
            api_name(header.request_api_key),
            header.request_api_version,
            header.correlation_id,
            ctx.client_id
        );
        handlers::dispatch(&ctx, &header, &mut frame).await
    }
}

#[async_trait]
impl ConnectionHandler for BrokerHandler {
    fn protocol(&self) -> &'static str {
        "kafka"
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let codec = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(MAX_FRAME_LENGTH)
            .new_codec();
        let (reader, mut writer) = stream.into_split();
        let mut reader = FramedRead::new(reader, codec);

        loop {
            let frame = tokio::select! {
                frame = reader.next() => frame,
                _ = shutdown.recv() => break,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    debug!("kafka connection {} read error: {}", peer, e);
                    break;
                }
                None => break,
            };

            match self.handle_frame(frame, peer).await {
                Ok(Some(response)) => {
                    if let Err(e) = write_frame(&mut writer, &response).await {
                        debug!("kafka connection {} write error: {}", peer, e);
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("kafka connection {}: {}", peer, e);
                    break;
                }
            }
        }
        debug!("kafka connection {} closed", peer);
    }
}
