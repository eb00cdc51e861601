//! Request handlers, one per supported API.

use super::error::ErrorCode;
use super::group::{GroupState, JoinRequest};
use super::record::{decode_batch, encode_batch};
use super::server::*;
use anyhow::bail;
use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::api_versions_response::{ApiVersion, ApiVersionsResponse};
use kafka_protocol::messages::describe_groups_request::DescribeGroupsRequest;
use kafka_protocol::messages::describe_groups_response::{
    DescribeGroupsResponse, DescribedGroup, DescribedGroupMember,
};
use kafka_protocol::messages::fetch_request::FetchRequest;
use kafka_protocol::messages::fetch_response::{FetchResponse, FetchableTopicResponse, PartitionData};
use kafka_protocol::messages::find_coordinator_request::FindCoordinatorRequest;
use kafka_protocol::messages::find_coordinator_response::FindCoordinatorResponse;
use kafka_protocol::messages::heartbeat_request::HeartbeatRequest;
use kafka_protocol::messages::heartbeat_response::HeartbeatResponse;
use kafka_protocol::messages::join_group_request::JoinGroupRequest;
use kafka_protocol::messages::join_group_response::{JoinGroupResponse, JoinGroupResponseMember};
use kafka_protocol::messages::leave_group_request::LeaveGroupRequest;
use kafka_protocol::messages::leave_group_response::{LeaveGroupResponse, MemberResponse};
use kafka_protocol::messages::list_groups_request::ListGroupsRequest;
use kafka_protocol::messages::list_groups_response::{ListGroupsResponse, ListedGroup};
use kafka_protocol::messages::list_offsets_request::ListOffsetsRequest;
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::metadata_request::MetadataRequest;
use kafka_protocol::messages::metadata_response::{
    MetadataResponse, MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::offset_commit_request::OffsetCommitRequest;
use kafka_protocol::messages::offset_commit_response::{
    OffsetCommitResponse, OffsetCommitResponsePartition, OffsetCommitResponseTopic,
};
use kafka_protocol::messages::offset_fetch_request::OffsetFetchRequest;
use kafka_protocol::messages::offset_fetch_response::{
    OffsetFetchResponse, OffsetFetchResponsePartition, OffsetFetchResponseTopic,
};
use kafka_protocol::messages::produce_request::ProduceRequest;
use kafka_protocol::messages::produce_response::{
    PartitionProduceResponse, ProduceResponse, TopicProduceResponse,
};
use kafka_protocol::messages::sync_group_request::SyncGroupRequest;
use kafka_protocol::messages::sync_group_response::SyncGroupResponse;
use kafka_protocol::messages::{BrokerId, GroupId, RequestHeader, ResponseHeader, TopicName};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

fn str_bytes(s: impl Into<String>) -> StrBytes {
    StrBytes::from_string(s.into())
}

pub async fn dispatch(
    ctx: &Context<'_>,
    header: &RequestHeader,
    body: &mut BytesMut,
) -> anyhow::Result<Option<BytesMut>> {
    let key = header.request_api_key;
    let version = header.request_api_version;
    if key == API_VERSIONS {
        return api_versions(header).map(Some);
    }
    if !is_supported(key, version) {
        ctx.track(key, ErrorCode::UNSUPPORTED_VERSION);
        bail!("unsupported {} version {}", api_name(key), version);
    }

    let response = match key {
        API_PRODUCE => {
            let req = ProduceRequest::decode(body, version)?;
            let acks = req.acks;
            let res = produce(ctx, req);
            if acks == 0 {
                return Ok(None);
            }
            encode_response(header, &res)?
        }
        API_FETCH => encode_response(header, &fetch(ctx, FetchRequest::decode(body, version)?).await)?,
        API_LIST_OFFSETS => encode_response(header, &list_offsets(ctx, ListOffsetsRequest::decode(body, version)?))?,
        API_METADATA => encode_response(header, &metadata(ctx, MetadataRequest::decode(body, version)?, version))?,
        API_OFFSET_COMMIT => encode_response(header, &offset_commit(ctx, OffsetCommitRequest::decode(body, version)?))?,
        API_OFFSET_FETCH => encode_response(header, &offset_fetch(ctx, OffsetFetchRequest::decode(body, version)?))?,
        API_FIND_COORDINATOR => encode_response(
            header,
            &find_coordinator(ctx, FindCoordinatorRequest::decode(body, version)?),
        )?,
        API_JOIN_GROUP => encode_response(
            header,
            &join_group(ctx, JoinGroupRequest::decode(body, version)?, version).await,
        )?,
        API_SYNC_GROUP => encode_response(header, &sync_group(ctx, SyncGroupRequest::decode(body, version)?).await)?,
        API_HEARTBEAT => encode_response(header, &heartbeat(ctx, HeartbeatRequest::decode(body, version)?))?,
        API_LEAVE_GROUP => encode_response(header, &leave_group(ctx, LeaveGroupRequest::decode(body, version)?))?,
        API_DESCRIBE_GROUPS => encode_response(
            header,
            &describe_groups(ctx, DescribeGroupsRequest::decode(body, version)?),
        )?,
        API_LIST_GROUPS => encode_response(header, &list_groups(ctx, ListGroupsRequest::decode(body, version)?))?,
        _ => bail!("unsupported api key {}", key),
    };
    Ok(Some(response))
}

// ============================================================================
// ApiVersions & Metadata
// ============================================================================

fn api_versions(header: &RequestHeader) -> anyhow::Result<BytesMut> {
    let mut response = ApiVersionsResponse::default();
    response.api_keys = SUPPORTED_APIS
        .iter()
        .map(|(key, min, max)| {
            let mut v = ApiVersion::default();
            v.api_key = *key;
            v.min_version = *min;
            v.max_version = *max;
            v
        })
        .collect();

    let version = header.request_api_version;
    if is_supported(API_VERSIONS, version) {
        return encode_response(header, &response);
    }
    // clients retry with the version range carried in a v0 answer
    response.error_code = ErrorCode::UNSUPPORTED_VERSION.into();
    let mut buf = BytesMut::new();
    ResponseHeader::default()
        .with_correlation_id(header.correlation_id)
        .encode(&mut buf, 0)?;
    response.encode(&mut buf, 0)?;
    Ok(buf)
}

pub fn metadata(ctx: &Context<'_>, req: MetadataRequest, version: i16) -> MetadataResponse {
    let cluster = ctx.cluster;
    let mut response = MetadataResponse::default();
    response.brokers = cluster
        .brokers()
        .into_iter()
        .map(|b| {
            let mut broker = MetadataResponseBroker::default();
            broker.node_id = BrokerId(b.id);
            broker.host = str_bytes(b.host);
            broker.port = b.port;
            broker.rack = None;
            broker
        })
        .collect();
    response.cluster_id = Some(str_bytes(cluster.name.clone()));
    response.controller_id = BrokerId(0);

    let requested: Option<Vec<String>> = match req.topics {
        None => None,
        Some(t) if t.is_empty() && version == 0 => None,
        Some(t) => Some(
            t.into_iter()
                .filter_map(|t| t.name.map(|n| n.to_string()))
                .collect(),
        ),
    };

    let topics = match requested {
        None => cluster.topics(),
        Some(names) => {
            let mut found = Vec::new();
            for name in names {
                match cluster.topic(&name).filter(|t| !t.is_retired()) {
                    Some(t) => found.push(t),
                    None => {
                        let mut topic = MetadataResponseTopic::default();
                        topic.error_code = ErrorCode::UNKNOWN_TOPIC_OR_PARTITION.into();
                        topic.name = Some(TopicName(str_bytes(name)));
                        response.topics.push(topic);
                        ctx.track(API_METADATA, ErrorCode::UNKNOWN_TOPIC_OR_PARTITION);
                    }
                }
            }
            found
        }
    };

    for t in topics {
        let mut topic = MetadataResponseTopic::default();
        topic.error_code = ErrorCode::NONE.into();
        topic.name = Some(TopicName(str_bytes(t.name.clone())));
        topic.partitions = t
            .partitions()
            .iter()
            .map(|p| {
                let mut partition = MetadataResponsePartition::default();
                partition.error_code = ErrorCode::NONE.into();
                partition.partition_index = p.index;
                partition.leader_id = BrokerId(p.leader);
                partition.replica_nodes = vec![BrokerId(p.leader)];
                partition.isr_nodes = vec![BrokerId(p.leader)];
                partition
            })
            .collect();
        response.topics.push(topic);
    }
    response
}

// ============================================================================
// Produce & Fetch
// ============================================================================

pub fn produce(ctx: &Context<'_>, req: ProduceRequest) -> ProduceResponse {
    let mut response = ProduceResponse::default();
    for topic in req.topic_data {
        let name = topic.name.to_string();
        let mut topic_response = TopicProduceResponse::default();
        topic_response.name = topic.name.clone();

        for data in topic.partition_data {
            let mut p = PartitionProduceResponse::default();
            p.index = data.index;
            p.log_append_time_ms = -1;

            let result = match data.records.as_ref().map(decode_batch).transpose() {
                Ok(records) => ctx
                    .cluster
                    .produce(&name, data.index, records.unwrap_or_default())
                    .map_err(|e| (e.code(), e.to_string())),
                Err(e) => Err((ErrorCode::CORRUPT_MESSAGE, e.to_string())),
            };
            match result {
                Ok(base) => {
                    p.error_code = ErrorCode::NONE.into();
                    p.base_offset = base;
                    p.log_start_offset = ctx
                        .cluster
                        .topic(&name)
                        .and_then(|t| t.partition(data.index))
                        .map(|p| p.start_offset())
                        .unwrap_or(0);
                }
                Err((code, message)) => {
                    info!(
                        "kafka produce to {} partition {} rejected: {}",
                        name, data.index, message
                    );
                    ctx.track(API_PRODUCE, code);
                    p.error_code = code.into();
                    p.base_offset = -1;
                    p.log_start_offset = -1;
                    p.error_message = Some(str_bytes(message));
                }
            }
            topic_response.partition_responses.push(p);
        }
        response.responses.push(topic_response);
    }
    response
}

pub async fn fetch(ctx: &Context<'_>, req: FetchRequest) -> FetchResponse {
    let (mut response, mut size) = read_partitions(ctx, &req);
    if size < req.min_bytes.max(1) as usize && req.max_wait_ms > 0 {
        ctx.cluster
            .wait_for_records(Duration::from_millis(req.max_wait_ms as u64))
            .await;
        (response, size) = read_partitions(ctx, &req);
    }
    debug!("kafka fetch returned {} bytes", size);
    for topic in &response.responses {
        for p in &topic.partitions {
            ctx.track(API_FETCH, ErrorCode(p.error_code));
        }
    }
    response
}

fn read_partitions(ctx: &Context<'_>, req: &FetchRequest) -> (FetchResponse, usize) {
    let mut response = FetchResponse::default();
    let mut remaining = if req.max_bytes > 0 { req.max_bytes as usize } else { usize::MAX };
    let mut total = 0usize;

    for topic in &req.topics {
        let name = topic.topic.to_string();
        let mut topic_response = FetchableTopicResponse::default();
        topic_response.topic = topic.topic.clone();

        for request in &topic.partitions {
            let mut data = PartitionData::default();
            data.partition_index = request.partition;
            data.high_watermark = -1;
            data.last_stable_offset = -1;
            data.log_start_offset = -1;

            let partition = ctx.cluster.topic(&name).and_then(|t| t.partition(request.partition));
            let Some(partition) = partition else {
                data.error_code = ErrorCode::UNKNOWN_TOPIC_OR_PARTITION.into();
                topic_response.partitions.push(data);
                continue;
            };

            let budget = (request.partition_max_bytes.max(0) as usize).min(remaining);
            match partition.read(request.fetch_offset, budget) {
                Ok(records) => {
                    data.error_code = ErrorCode::NONE.into();
                    if !records.is_empty() {
                        let used: usize = records.iter().map(|r| r.size()).sum();
                        remaining = remaining.saturating_sub(used);
                        total += used;
                        data.records = encode_batch(&records).ok();
                    }
                }
                Err(e) => data.error_code = e.code().into(),
            }
            data.high_watermark = partition.end_offset();
            data.last_stable_offset = partition.end_offset();
            data.log_start_offset = partition.start_offset();
            topic_response.partitions.push(data);
        }
        response.responses.push(topic_response);
    }
    (response, total)
}

pub fn list_offsets(ctx: &Context<'_>, req: ListOffsetsRequest) -> ListOffsetsResponse {
    let mut response = ListOffsetsResponse::default();
    for topic in req.topics {
        let name = topic.name.to_string();
        let mut topic_response = ListOffsetsTopicResponse::default();
        topic_response.name = topic.name.clone();
        for p in topic.partitions {
            let mut partition = ListOffsetsPartitionResponse::default();
            partition.partition_index = p.partition_index;
            match ctx.cluster.list_offset(&name, p.partition_index, p.timestamp) {
                Ok((timestamp, offset)) => {
                    partition.error_code = ErrorCode::NONE.into();
                    partition.timestamp = timestamp;
                    partition.offset = offset;
                }
                Err(e) => {
                    ctx.track(API_LIST_OFFSETS, e.code());
                    partition.error_code = e.code().into();
                    partition.timestamp = -1;
                    partition.offset = -1;
                }
            }
            topic_response.partitions.push(partition);
        }
        response.topics.push(topic_response);
    }
    response
}

// ============================================================================
// Offsets
// ============================================================================

fn coordinator_error(ctx: &Context<'_>, group: &str) -> Option<ErrorCode> {
    if group.is_empty() {
        Some(ErrorCode::INVALID_GROUP_ID)
    } else if ctx.cluster.coordinator(group) != ctx.broker_id {
        Some(ErrorCode::NOT_COORDINATOR)
    } else {
        None
    }
}

pub fn offset_commit(ctx: &Context<'_>, req: OffsetCommitRequest) -> OffsetCommitResponse {
    let group_id = req.group_id.to_string();
    let member_id = req.member_id.to_string();
    let failed = coordinator_error(ctx, &group_id);
    let group = failed.is_none().then(|| ctx.cluster.group_or_create(&group_id));

    let mut response = OffsetCommitResponse::default();
    for topic in req.topics {
        let name = topic.name.to_string();
        let mut topic_response = OffsetCommitResponseTopic::default();
        topic_response.name = topic.name.clone();
        for p in topic.partitions {
            let code = match (&group, failed) {
                (Some(group), _) => ctx.cluster.commit(
                    group,
                    &member_id,
                    &name,
                    p.partition_index,
                    p.committed_offset,
                    p.committed_metadata.map(|m| m.to_string()),
                ),
                (None, Some(code)) => code,
                (None, None) => ErrorCode::UNKNOWN_SERVER_ERROR,
            };
            ctx.track(API_OFFSET_COMMIT, code);
            let mut partition = OffsetCommitResponsePartition::default();
            partition.partition_index = p.partition_index;
            partition.error_code = code.into();
            topic_response.partitions.push(partition);
        }
        response.topics.push(topic_response);
    }
    response
}

pub fn offset_fetch(ctx: &Context<'_>, req: OffsetFetchRequest) -> OffsetFetchResponse {
    let group_id = req.group_id.to_string();
    let mut response = OffsetFetchResponse::default();
    if let Some(code) = coordinator_error(ctx, &group_id) {
        ctx.track(API_OFFSET_FETCH, code);
        response.error_code = code.into();
        return response;
    }
    let group = ctx.cluster.group(&group_id);

    let requested: Vec<(String, Vec<i32>)> = match req.topics {
        Some(topics) => topics
            .into_iter()
            .map(|t| (t.name.to_string(), t.partition_indexes))
            .collect(),
        None => {
            let mut all: BTreeMap<String, Vec<i32>> = BTreeMap::new();
            if let Some(group) = &group {
                for (topic, partition) in group.committed_partitions() {
                    all.entry(topic).or_default().push(partition);
                }
            }
            all.into_iter().collect()
        }
    };

    for (topic, partitions) in requested {
        let mut topic_response = OffsetFetchResponseTopic::default();
        topic_response.name = TopicName(str_bytes(topic.clone()));
        for index in partitions {
            let mut partition = OffsetFetchResponsePartition::default();
            partition.partition_index = index;
            partition.committed_leader_epoch = -1;
            match group.as_ref().and_then(|g| g.committed(&topic, index)) {
                Some(commit) => {
                    partition.committed_offset = commit.offset;
                    partition.metadata = Some(str_bytes(commit.metadata.unwrap_or_default()));
                }
                None => {
                    partition.committed_offset = -1;
                    partition.metadata = Some(StrBytes::default());
                }
            }
            partition.error_code = ErrorCode::NONE.into();
            topic_response.partitions.push(partition);
        }
        response.topics.push(topic_response);
    }
    response
}

// ============================================================================
// Groups
// ============================================================================

pub fn find_coordinator(ctx: &Context<'_>, req: FindCoordinatorRequest) -> FindCoordinatorResponse {
    let mut response = FindCoordinatorResponse::default();
    // key type 1 asks for a transaction coordinator
    if req.key_type != 0 {
        ctx.track(API_FIND_COORDINATOR, ErrorCode::COORDINATOR_NOT_AVAILABLE);
        response.error_code = ErrorCode::COORDINATOR_NOT_AVAILABLE.into();
        response.error_message = Some(str_bytes("transactions are not supported"));
        response.node_id = BrokerId(-1);
        response.host = StrBytes::default();
        response.port = -1;
        return response;
    }

    let key = req.key.to_string();
    let id = ctx.cluster.coordinator(&key);
    match ctx.cluster.brokers().into_iter().find(|b| b.id == id) {
        Some(broker) => {
            response.error_code = ErrorCode::NONE.into();
            response.error_message = None;
            response.node_id = BrokerId(broker.id);
            response.host = str_bytes(broker.host);
            response.port = broker.port;
        }
        None => {
            ctx.track(API_FIND_COORDINATOR, ErrorCode::COORDINATOR_NOT_AVAILABLE);
            response.error_code = ErrorCode::COORDINATOR_NOT_AVAILABLE.into();
            response.node_id = BrokerId(-1);
            response.host = StrBytes::default();
            response.port = -1;
        }
    }
    response
}

pub async fn join_group(ctx: &Context<'_>, req: JoinGroupRequest, version: i16) -> JoinGroupResponse {
    let group_id = req.group_id.to_string();
    let mut response = JoinGroupResponse::default();
    // protocol name is nullable from v7 only
    let empty_protocol = (version < 7).then(StrBytes::default);

    if let Some(code) = coordinator_error(ctx, &group_id) {
        ctx.track(API_JOIN_GROUP, code);
        response.error_code = code.into();
        response.generation_id = -1;
        response.protocol_name = empty_protocol;
        response.member_id = req.member_id.clone();
        return response;
    }

    let rebalance_timeout_ms = if req.rebalance_timeout_ms > 0 {
        req.rebalance_timeout_ms
    } else {
        req.session_timeout_ms
    };
    let join = JoinRequest {
        member_id: req.member_id.to_string(),
        group_instance_id: req.group_instance_id.map(|s| s.to_string()),
        client_id: ctx.client_id.clone(),
        client_host: ctx.client_host.clone(),
        session_timeout_ms: req.session_timeout_ms,
        rebalance_timeout_ms,
        protocol_type: req.protocol_type.to_string(),
        protocols: req
            .protocols
            .into_iter()
            .map(|p| (p.name.to_string(), p.metadata))
            .collect(),
    };

    let group = ctx.cluster.group_or_create(&group_id);
    let result = group.join(join).await;
    ctx.track(API_JOIN_GROUP, result.error);

    response.error_code = result.error.into();
    response.generation_id = result.generation_id;
    response.protocol_type = result.protocol_type.map(str_bytes);
    response.protocol_name = result.protocol_name.map(str_bytes).or(empty_protocol);
    response.leader = str_bytes(result.leader);
    response.member_id = str_bytes(result.member_id);
    response.members = result
        .members
        .into_iter()
        .map(|m| {
            let mut member = JoinGroupResponseMember::default();
            member.member_id = str_bytes(m.member_id);
            member.group_instance_id = m.group_instance_id.map(str_bytes);
            member.metadata = m.metadata;
            member
        })
        .collect();
    response
}

pub async fn sync_group(ctx: &Context<'_>, req: SyncGroupRequest) -> SyncGroupResponse {
    let group_id = req.group_id.to_string();
    let mut response = SyncGroupResponse::default();
    if let Some(code) = coordinator_error(ctx, &group_id) {
        ctx.track(API_SYNC_GROUP, code);
        response.error_code = code.into();
        return response;
    }
    let Some(group) = ctx.cluster.group(&group_id) else {
        ctx.track(API_SYNC_GROUP, ErrorCode::UNKNOWN_MEMBER_ID);
        response.error_code = ErrorCode::UNKNOWN_MEMBER_ID.into();
        return response;
    };

    let assignments = req
        .assignments
        .into_iter()
        .map(|a| (a.member_id.to_string(), a.assignment))
        .collect();
    let result = group
        .sync(&req.member_id.to_string(), req.generation_id, assignments)
        .await;
    ctx.track(API_SYNC_GROUP, result.error);

    response.error_code = result.error.into();
    response.assignment = result.assignment;
    response.protocol_type = result.protocol_type.map(str_bytes);
    response.protocol_name = result.protocol_name.map(str_bytes);
    response
}

pub fn heartbeat(ctx: &Context<'_>, req: HeartbeatRequest) -> HeartbeatResponse {
    let group_id = req.group_id.to_string();
    let code = match coordinator_error(ctx, &group_id) {
        Some(code) => code,
        None => match ctx.cluster.group(&group_id) {
            Some(group) => group.heartbeat(&req.member_id.to_string(), req.generation_id),
            None => ErrorCode::UNKNOWN_MEMBER_ID,
        },
    };
    ctx.track(API_HEARTBEAT, code);
    let mut response = HeartbeatResponse::default();
    response.error_code = code.into();
    response
}

pub fn leave_group(ctx: &Context<'_>, req: LeaveGroupRequest) -> LeaveGroupResponse {
    let group_id = req.group_id.to_string();
    let mut response = LeaveGroupResponse::default();
    if let Some(code) = coordinator_error(ctx, &group_id) {
        ctx.track(API_LEAVE_GROUP, code);
        response.error_code = code.into();
        return response;
    }

    // v3 and later list members, earlier versions carry a single member id
    let batched = !req.members.is_empty();
    let ids: Vec<String> = if batched {
        req.members.iter().map(|m| m.member_id.to_string()).collect()
    } else {
        vec![req.member_id.to_string()]
    };
    let codes = match ctx.cluster.group(&group_id) {
        Some(group) => group.leave(&ids),
        None => vec![ErrorCode::UNKNOWN_MEMBER_ID; ids.len()],
    };

    if batched {
        response.error_code = ErrorCode::NONE.into();
        response.members = req
            .members
            .iter()
            .zip(codes.iter())
            .map(|(m, code)| {
                ctx.track(API_LEAVE_GROUP, *code);
                let mut member = MemberResponse::default();
                member.member_id = m.member_id.clone();
                member.group_instance_id = m.group_instance_id.clone();
                member.error_code = (*code).into();
                member
            })
            .collect();
    } else {
        let code = codes.first().copied().unwrap_or(ErrorCode::UNKNOWN_MEMBER_ID);
        ctx.track(API_LEAVE_GROUP, code);
        response.error_code = code.into();
    }
    response
}

pub fn describe_groups(ctx: &Context<'_>, req: DescribeGroupsRequest) -> DescribeGroupsResponse {
    let mut response = DescribeGroupsResponse::default();
    for id in req.groups {
        let name = id.to_string();
        let mut described = DescribedGroup::default();
        described.group_id = id;
        if let Some(code) = coordinator_error(ctx, &name) {
            ctx.track(API_DESCRIBE_GROUPS, code);
            described.error_code = code.into();
            response.groups.push(described);
            continue;
        }
        described.error_code = ErrorCode::NONE.into();
        match ctx.cluster.group(&name) {
            Some(group) => {
                let snapshot = group.snapshot();
                let protocol = snapshot.protocol_name.clone().unwrap_or_default();
                described.group_state = str_bytes(snapshot.state.as_str());
                described.protocol_type = str_bytes(snapshot.protocol_type.clone().unwrap_or_default());
                described.protocol_data = str_bytes(protocol.clone());
                described.members = snapshot
                    .members
                    .iter()
                    .map(|m| {
                        let mut member = DescribedGroupMember::default();
                        member.member_id = str_bytes(m.id.clone());
                        member.group_instance_id = m.group_instance_id.clone().map(str_bytes);
                        member.client_id = str_bytes(m.client_id.clone());
                        member.client_host = str_bytes(m.client_host.clone());
                        member.member_metadata = m
                            .protocols
                            .iter()
                            .find(|(n, _)| *n == protocol)
                            .map(|(_, meta)| meta.clone())
                            .unwrap_or_else(Bytes::new);
                        member.member_assignment = m.assignment.clone();
                        member
                    })
                    .collect();
            }
            None => {
                described.group_state = str_bytes(GroupState::Dead.as_str());
                described.protocol_type = StrBytes::default();
                described.protocol_data = StrBytes::default();
            }
        }
        response.groups.push(described);
    }
    response
}

pub fn list_groups(ctx: &Context<'_>, req: ListGroupsRequest) -> ListGroupsResponse {
    let filter: Vec<String> = req.states_filter.iter().map(|s| s.to_string()).collect();
    let mut response = ListGroupsResponse::default();
    response.error_code = ErrorCode::NONE.into();
    response.groups = ctx
        .cluster
        .groups()
        .into_iter()
        .filter(|g| g.coordinator == ctx.broker_id)
        .map(|g| g.snapshot())
        .filter(|s| filter.is_empty() || filter.iter().any(|f| f.eq_ignore_ascii_case(s.state.as_str())))
        .map(|s| {
            let mut listed = ListedGroup::default();
            listed.group_id = GroupId(str_bytes(s.name));
            listed.protocol_type = str_bytes(s.protocol_type.unwrap_or_default());
            listed.group_state = str_bytes(s.state.as_str());
            listed
        })
        .collect();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventManager;
    use crate::kafka::cluster::Cluster;
    use crate::kafka::record::Record;
    use crate::monitor::Monitor;
    use crate::spec::asyncapi::Document;
    use kafka_protocol::messages::fetch_request::{FetchPartition, FetchTopic};
    use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
    use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
    use std::sync::Arc;

    const DOCUMENT: &str = r#"
asyncapi: 3.0.0
info:
  title: foo
servers:
  broker:
    host: 127.0.0.1:9092
    protocol: kafka
channels:
  topic-1:
    bindings:
      kafka:
        partitions: 2
    messages:
      m:
        payload:
          type: string
"#;

    fn cluster() -> Arc<Cluster> {
        let mut doc: Document = serde_yaml::from_str(DOCUMENT).unwrap();
        doc.normalize().unwrap();
        let cluster = Cluster::new("foo", Arc::new(Monitor::new()), Arc::new(EventManager::new()));
        cluster.update(Arc::new(doc));
        cluster
    }

    fn ctx(cluster: &Cluster) -> Context<'_> {
        Context {
            cluster,
            broker_id: 0,
            client_id: "test".to_string(),
            client_host: "/127.0.0.1".to_string(),
        }
    }

    fn produce_request(value: &str) -> ProduceRequest {
        produce_batch(&[value])
    }

    fn produce_batch(values: &[&str]) -> ProduceRequest {
        let records: Vec<Record> = values
            .iter()
            .map(|v| Record::new(None, Some(Bytes::copy_from_slice(v.as_bytes()))))
            .collect();
        let batch = encode_batch(&records).unwrap();
        let mut data = PartitionProduceData::default();
        data.index = 1;
        data.records = Some(batch);
        let mut topic = TopicProduceData::default();
        topic.name = TopicName(str_bytes("topic-1"));
        topic.partition_data = vec![data];
        let mut req = ProduceRequest::default();
        req.acks = 1;
        req.topic_data = vec![topic];
        req
    }

    #[tokio::test]
    async fn test_metadata_lists_topics_and_brokers() {
        let cluster = cluster();
        let mut req = MetadataRequest::default();
        req.topics = None;
        let response = metadata(&ctx(&cluster), req, 9);
        assert_eq!(response.brokers.len(), 1);
        assert_eq!(response.brokers[0].host.to_string(), "127.0.0.1");
        assert_eq!(response.topics.len(), 1);
        assert_eq!(response.topics[0].partitions.len(), 2);

        let mut req = MetadataRequest::default();
        let mut unknown = MetadataRequestTopic::default();
        unknown.name = Some(TopicName(str_bytes("nope")));
        req.topics = Some(vec![unknown]);
        let response = metadata(&ctx(&cluster), req, 9);
        assert_eq!(response.topics[0].error_code, 3);
    }

    #[tokio::test]
    async fn test_produce_then_fetch() {
        let cluster = cluster();
        let c = ctx(&cluster);
        let response = produce(&c, produce_request(r#""hello""#));
        let p = &response.responses[0].partition_responses[0];
        assert_eq!(p.error_code, 0);
        assert_eq!(p.base_offset, 0);

        let mut partition = FetchPartition::default();
        partition.partition = 1;
        partition.fetch_offset = 0;
        partition.partition_max_bytes = 1024;
        let mut topic = FetchTopic::default();
        topic.topic = TopicName(str_bytes("topic-1"));
        topic.partitions = vec![partition];
        let mut req = FetchRequest::default();
        req.max_bytes = 1024;
        req.topics = vec![topic];

        let response = fetch(&c, req).await;
        let data = &response.responses[0].partitions[0];
        assert_eq!(data.error_code, 0);
        assert_eq!(data.high_watermark, 1);
        let records = decode_batch(data.records.as_ref().unwrap()).unwrap();
        assert_eq!(records[0].value.as_deref(), Some(&b"\"hello\""[..]));
    }

    #[tokio::test]
    async fn test_produce_base_offset_is_previous_end_offset() {
        let cluster = cluster();
        let c = ctx(&cluster);
        let first = produce(&c, produce_batch(&[r#""a""#, r#""b""#, r#""c""#]));
        assert_eq!(first.responses[0].partition_responses[0].base_offset, 0);

        let partition = cluster.topic("topic-1").unwrap().partition(1).unwrap();
        let end = partition.end_offset();
        assert_eq!(end, 3);
        let second = produce(&c, produce_batch(&[r#""d""#, r#""e""#]));
        let p = &second.responses[0].partition_responses[0];
        assert_eq!(p.error_code, 0);
        assert_eq!(p.base_offset, end);
        assert_eq!(partition.end_offset(), 5);
        assert_eq!(partition.record(3).unwrap().value.as_deref(), Some(&b"\"d\""[..]));
    }

    #[tokio::test]
    async fn test_invalid_produce_counts_error() {
        let cluster = cluster();
        let c = ctx(&cluster);
        let response = produce(&c, produce_request("123"));
        assert_eq!(response.responses[0].partition_responses[0].error_code, 2);
        assert_eq!(
            cluster
                .monitor()
                .kafka
                .requests_errors_total
                .value(&["foo", "Produce"]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_find_coordinator_for_group() {
        let cluster = cluster();
        let mut req = FindCoordinatorRequest::default();
        req.key = str_bytes("my-group");
        let response = find_coordinator(&ctx(&cluster), req);
        assert_eq!(response.error_code, 0);
        assert_eq!(response.node_id, BrokerId(0));
        assert_eq!(response.port, 9092);
    }

    #[tokio::test]
    async fn test_offset_commit_and_fetch() {
        let cluster = cluster();
        let c = ctx(&cluster);
        produce(&c, produce_request(r#""a""#));

        let mut req = OffsetCommitRequest::default();
        req.group_id = GroupId(str_bytes("g"));
        let mut topic = kafka_protocol::messages::offset_commit_request::OffsetCommitRequestTopic::default();
        topic.name = TopicName(str_bytes("topic-1"));
        let mut p = kafka_protocol::messages::offset_commit_request::OffsetCommitRequestPartition::default();
        p.partition_index = 1;
        p.committed_offset = 1;
        topic.partitions = vec![p];
        req.topics = vec![topic];
        let response = offset_commit(&c, req);
        assert_eq!(response.topics[0].partitions[0].error_code, 0);

        let mut req = OffsetFetchRequest::default();
        req.group_id = GroupId(str_bytes("g"));
        req.topics = None;
        let response = offset_fetch(&c, req);
        assert_eq!(response.topics.len(), 1);
        assert_eq!(response.topics[0].partitions[0].committed_offset, 1);
    }

    #[tokio::test]
    async fn test_describe_unknown_group_is_dead() {
        let cluster = cluster();
        let mut req = DescribeGroupsRequest::default();
        req.groups = vec![GroupId(str_bytes("nope"))];
        let response = describe_groups(&ctx(&cluster), req);
        assert_eq!(response.groups[0].group_state.to_string(), "Dead");
    }
}
