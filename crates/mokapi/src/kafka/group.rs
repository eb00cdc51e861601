//! Consumer group coordination.
//!
//! A group moves through `Empty -> PreparingRebalance -> CompletingRebalance
//! -> Stable`. JoinGroup requests park on a oneshot channel until the
//! rebalance completes; followers' SyncGroup requests park until the leader
//! delivers the assignment. A monitor task per group drives the rebalance
//! deadline and evicts members whose session expired. It holds only a weak
//! reference and ends with the group.

use super::error::ErrorCode;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

/// Delay before the first rebalance of an empty group completes so that
/// members starting together end up in the same generation.
pub const INITIAL_REBALANCE_DELAY: Duration = Duration::from_millis(200);

const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

impl GroupState {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupState::Empty => "Empty",
            GroupState::PreparingRebalance => "PreparingRebalance",
            GroupState::CompletingRebalance => "CompletingRebalance",
            GroupState::Stable => "Stable",
            GroupState::Dead => "Dead",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: String,
    pub client_id: String,
    pub client_host: String,
    pub group_instance_id: Option<String>,
    pub session_timeout: Duration,
    pub rebalance_timeout: Duration,
    pub protocols: Vec<(String, Bytes)>,
    pub assignment: Bytes,
    /// Assigned partitions decoded from the consumer protocol assignment.
    pub partitions: BTreeMap<String, Vec<i32>>,
    last_heartbeat: Instant,
}

impl Member {
    fn metadata(&self, protocol: &str) -> Bytes {
        self.protocols
            .iter()
            .find(|(name, _)| name == protocol)
            .map(|(_, m)| m.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub client_id: String,
    pub client_host: String,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    pub protocol_type: String,
    pub protocols: Vec<(String, Bytes)>,
}

#[derive(Debug, Clone, Default)]
pub struct JoinMember {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub metadata: Bytes,
}

#[derive(Debug, Clone)]
pub struct JoinResult {
    pub error: ErrorCode,
    pub generation_id: i32,
    pub protocol_type: Option<String>,
    pub protocol_name: Option<String>,
    pub leader: String,
    pub member_id: String,
    /// Filled for the leader only.
    pub members: Vec<JoinMember>,
}

impl JoinResult {
    fn error(error: ErrorCode, member_id: &str) -> Self {
        Self {
            error,
            generation_id: -1,
            protocol_type: None,
            protocol_name: None,
            leader: String::new(),
            member_id: member_id.to_string(),
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub error: ErrorCode,
    pub protocol_type: Option<String>,
    pub protocol_name: Option<String>,
    pub assignment: Bytes,
}

impl SyncResult {
    fn error(error: ErrorCode) -> Self {
        Self {
            error,
            protocol_type: None,
            protocol_name: None,
            assignment: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub offset: i64,
    pub metadata: Option<String>,
}

/// Point-in-time view of a group.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub name: String,
    pub state: GroupState,
    pub generation_id: i32,
    pub protocol_type: Option<String>,
    pub protocol_name: Option<String>,
    pub leader: Option<String>,
    pub coordinator: i32,
    pub members: Vec<Member>,
    pub commits: BTreeMap<(String, i32), i64>,
}

struct Inner {
    state: GroupState,
    generation_id: i32,
    protocol_type: Option<String>,
    protocol_name: Option<String>,
    leader: Option<String>,
    members: BTreeMap<String, Member>,
    join_order: Vec<String>,
    pending_joins: Vec<(String, oneshot::Sender<JoinResult>)>,
    pending_syncs: Vec<(String, oneshot::Sender<SyncResult>)>,
    rebalance_deadline: Option<Instant>,
    initial_delay: bool,
    commits: HashMap<(String, i32), Commit>,
}

pub struct Group {
    pub name: String,
    pub coordinator: i32,
    inner: Mutex<Inner>,
    wake: Notify,
}

impl Group {
    /// Creates the group and starts its monitor task.
    pub fn new(name: &str, coordinator: i32) -> Arc<Self> {
        let group = Arc::new(Self {
            name: name.to_string(),
            coordinator,
            inner: Mutex::new(Inner {
                state: GroupState::Empty,
                generation_id: 0,
                protocol_type: None,
                protocol_name: None,
                leader: None,
                members: BTreeMap::new(),
                join_order: Vec::new(),
                pending_joins: Vec::new(),
                pending_syncs: Vec::new(),
                rebalance_deadline: None,
                initial_delay: false,
                commits: HashMap::new(),
            }),
            wake: Notify::new(),
        });
        tokio::spawn(monitor(Arc::downgrade(&group)));
        group
    }

    pub fn state(&self) -> GroupState {
        self.inner.lock().state
    }

    pub fn generation_id(&self) -> i32 {
        self.inner.lock().generation_id
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        let inner = self.inner.lock();
        GroupSnapshot {
            name: self.name.clone(),
            state: inner.state,
            generation_id: inner.generation_id,
            protocol_type: inner.protocol_type.clone(),
            protocol_name: inner.protocol_name.clone(),
            leader: inner.leader.clone(),
            coordinator: self.coordinator,
            members: inner.members.values().cloned().collect(),
            commits: inner
                .commits
                .iter()
                .map(|(k, c)| (k.clone(), c.offset))
                .collect(),
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub async fn join(&self, req: JoinRequest) -> JoinResult {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.state == GroupState::Dead {
                return JoinResult::error(ErrorCode::COORDINATOR_NOT_AVAILABLE, &req.member_id);
            }
            if req.protocol_type.is_empty() || req.protocols.is_empty() {
                return JoinResult::error(ErrorCode::INCONSISTENT_GROUP_PROTOCOL, &req.member_id);
            }
            if inner.state != GroupState::Empty {
                let type_differs = inner
                    .protocol_type
                    .as_deref()
                    .is_some_and(|t| t != req.protocol_type);
                let shared = inner.members.values().all(|m| {
                    m.protocols
                        .iter()
                        .any(|(name, _)| req.protocols.iter().any(|(n, _)| n == name))
                });
                if type_differs || !shared {
                    return JoinResult::error(ErrorCode::INCONSISTENT_GROUP_PROTOCOL, &req.member_id);
                }
            }

            let member_id = if req.member_id.is_empty() {
                format!("{}-{}", req.client_id, uuid::Uuid::new_v4())
            } else if !inner.members.contains_key(&req.member_id) {
                return JoinResult::error(ErrorCode::UNKNOWN_MEMBER_ID, &req.member_id);
            } else {
                req.member_id.clone()
            };

            let now = Instant::now();
            let member = Member {
                id: member_id.clone(),
                client_id: req.client_id.clone(),
                client_host: req.client_host.clone(),
                group_instance_id: req.group_instance_id.clone(),
                session_timeout: millis(req.session_timeout_ms),
                rebalance_timeout: millis(req.rebalance_timeout_ms),
                protocols: req.protocols.clone(),
                assignment: Bytes::new(),
                partitions: BTreeMap::new(),
                last_heartbeat: now,
            };
            let known = inner.members.insert(member_id.clone(), member).is_some();
            if inner.protocol_type.is_none() || inner.state == GroupState::Empty {
                inner.protocol_type = Some(req.protocol_type.clone());
            }

            match inner.state {
                GroupState::Empty => {
                    self.prepare_rebalance(&mut inner, now + INITIAL_REBALANCE_DELAY);
                    inner.initial_delay = true;
                }
                GroupState::Stable | GroupState::CompletingRebalance => {
                    let timeout = inner
                        .members
                        .values()
                        .map(|m| m.rebalance_timeout)
                        .max()
                        .unwrap_or_default();
                    self.prepare_rebalance(&mut inner, now + timeout);
                }
                GroupState::PreparingRebalance | GroupState::Dead => {}
            }

            inner.pending_joins.retain(|(id, _)| id != &member_id);
            let (tx, rx) = oneshot::channel();
            inner.pending_joins.push((member_id.clone(), tx));
            if !inner.join_order.contains(&member_id) {
                inner.join_order.push(member_id.clone());
            }
            debug!(
                "group {}: member {} joined ({})",
                self.name,
                member_id,
                if known { "rejoin" } else { "new" }
            );

            if !inner.initial_delay && self.all_joined(&inner) {
                self.complete_rebalance(&mut inner);
            }
            rx
        };
        self.wake.notify_one();

        match rx.await {
            Ok(result) => result,
            Err(_) => JoinResult::error(ErrorCode::REBALANCE_IN_PROGRESS, &req.member_id),
        }
    }

    pub async fn sync(
        &self,
        member_id: &str,
        generation_id: i32,
        assignments: Vec<(String, Bytes)>,
    ) -> SyncResult {
        let rx = {
            let mut inner = self.inner.lock();
            if !inner.members.contains_key(member_id) {
                return SyncResult::error(ErrorCode::UNKNOWN_MEMBER_ID);
            }
            if generation_id != inner.generation_id {
                return SyncResult::error(ErrorCode::ILLEGAL_GENERATION);
            }
            touch(&mut inner, member_id);

            match inner.state {
                GroupState::PreparingRebalance | GroupState::Empty | GroupState::Dead => {
                    return SyncResult::error(ErrorCode::REBALANCE_IN_PROGRESS);
                }
                GroupState::Stable => return self.sync_result(&inner, member_id),
                GroupState::CompletingRebalance => {}
            }

            if inner.leader.as_deref() == Some(member_id) {
                for (id, assignment) in assignments {
                    if let Some(m) = inner.members.get_mut(&id) {
                        m.partitions = decode_assignment(&assignment);
                        m.assignment = assignment;
                    }
                }
                inner.state = GroupState::Stable;
                info!(
                    "group {} is stable with generation {} and {} member(s)",
                    self.name,
                    inner.generation_id,
                    inner.members.len()
                );
                let pending = std::mem::take(&mut inner.pending_syncs);
                for (id, tx) in pending {
                    let _ = tx.send(self.sync_result(&inner, &id));
                }
                return self.sync_result(&inner, member_id);
            }

            let (tx, rx) = oneshot::channel();
            inner.pending_syncs.push((member_id.to_string(), tx));
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => SyncResult::error(ErrorCode::REBALANCE_IN_PROGRESS),
        }
    }

    pub fn heartbeat(&self, member_id: &str, generation_id: i32) -> ErrorCode {
        let mut inner = self.inner.lock();
        if !inner.members.contains_key(member_id) {
            return ErrorCode::UNKNOWN_MEMBER_ID;
        }
        if generation_id != inner.generation_id {
            return ErrorCode::ILLEGAL_GENERATION;
        }
        touch(&mut inner, member_id);
        match inner.state {
            GroupState::PreparingRebalance => ErrorCode::REBALANCE_IN_PROGRESS,
            _ => ErrorCode::NONE,
        }
    }

    /// Removes members. Returns an error code per member id.
    pub fn leave(&self, member_ids: &[String]) -> Vec<ErrorCode> {
        let codes = {
            let mut inner = self.inner.lock();
            let codes: Vec<ErrorCode> = member_ids
                .iter()
                .map(|id| {
                    if inner.members.contains_key(id) {
                        self.remove_member(&mut inner, id);
                        ErrorCode::NONE
                    } else {
                        ErrorCode::UNKNOWN_MEMBER_ID
                    }
                })
                .collect();
            if codes.iter().any(|c| c.is_ok()) {
                self.after_membership_change(&mut inner);
            }
            codes
        };
        self.wake.notify_one();
        codes
    }

    // ========================================================================
    // Offsets
    // ========================================================================

    /// Stores a committed offset. Standalone commits (empty member id) are
    /// accepted in any state.
    pub fn commit(&self, member_id: &str, topic: &str, partition: i32, offset: i64, metadata: Option<String>) -> ErrorCode {
        let mut inner = self.inner.lock();
        if inner.state == GroupState::Dead {
            return ErrorCode::COORDINATOR_NOT_AVAILABLE;
        }
        if !member_id.is_empty() {
            if !inner.members.contains_key(member_id) {
                return ErrorCode::UNKNOWN_MEMBER_ID;
            }
            touch(&mut inner, member_id);
        }
        inner
            .commits
            .insert((topic.to_string(), partition), Commit { offset, metadata });
        ErrorCode::NONE
    }

    pub fn committed(&self, topic: &str, partition: i32) -> Option<Commit> {
        self.inner
            .lock()
            .commits
            .get(&(topic.to_string(), partition))
            .cloned()
    }

    pub fn committed_partitions(&self) -> Vec<(String, i32)> {
        let mut keys: Vec<_> = self.inner.lock().commits.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Marks the group dead. Parked requests are released with an error.
    pub fn delete(&self) {
        let mut inner = self.inner.lock();
        inner.state = GroupState::Dead;
        inner.members.clear();
        inner.commits.clear();
        for (id, tx) in inner.pending_joins.drain(..) {
            let _ = tx.send(JoinResult::error(ErrorCode::COORDINATOR_NOT_AVAILABLE, &id));
        }
        for (_, tx) in inner.pending_syncs.drain(..) {
            let _ = tx.send(SyncResult::error(ErrorCode::COORDINATOR_NOT_AVAILABLE));
        }
        drop(inner);
        self.wake.notify_one();
    }

    // ========================================================================
    // Rebalance internals
    // ========================================================================

    fn prepare_rebalance(&self, inner: &mut Inner, deadline: Instant) {
        debug!("group {} preparing rebalance", self.name);
        inner.state = GroupState::PreparingRebalance;
        inner.rebalance_deadline = Some(deadline);
        inner.initial_delay = false;
        inner.join_order.clear();
        for (_, tx) in inner.pending_syncs.drain(..) {
            let _ = tx.send(SyncResult::error(ErrorCode::REBALANCE_IN_PROGRESS));
        }
    }

    fn all_joined(&self, inner: &Inner) -> bool {
        inner
            .members
            .keys()
            .all(|id| inner.pending_joins.iter().any(|(p, _)| p == id))
    }

    /// Ends the join phase: members that did not rejoin are dropped, a
    /// leader is elected and every parked join is answered.
    fn complete_rebalance(&self, inner: &mut Inner) {
        inner.rebalance_deadline = None;
        inner.initial_delay = false;
        let joined: HashSet<String> = inner.pending_joins.iter().map(|(id, _)| id.clone()).collect();
        inner.members.retain(|id, _| joined.contains(id));

        if inner.members.is_empty() {
            inner.state = GroupState::Empty;
            inner.leader = None;
            inner.pending_joins.clear();
            return;
        }

        let leader = inner
            .leader
            .clone()
            .filter(|l| inner.members.contains_key(l))
            .or_else(|| inner.join_order.first().cloned())
            .or_else(|| inner.members.keys().next().cloned())
            .unwrap_or_default();
        let protocol = select_protocol(inner.members.get(&leader), &inner.members);

        inner.generation_id += 1;
        inner.protocol_name = protocol;
        inner.leader = Some(leader.clone());
        inner.state = GroupState::CompletingRebalance;
        let now = Instant::now();
        for m in inner.members.values_mut() {
            m.assignment = Bytes::new();
            m.partitions.clear();
            m.last_heartbeat = now;
        }
        info!(
            "group {} completed join phase: generation {}, leader {}",
            self.name, inner.generation_id, leader
        );

        let protocol_name = inner.protocol_name.clone().unwrap_or_default();
        let members: Vec<JoinMember> = inner
            .members
            .values()
            .map(|m| JoinMember {
                member_id: m.id.clone(),
                group_instance_id: m.group_instance_id.clone(),
                metadata: m.metadata(&protocol_name),
            })
            .collect();

        for (id, tx) in std::mem::take(&mut inner.pending_joins) {
            let result = JoinResult {
                error: ErrorCode::NONE,
                generation_id: inner.generation_id,
                protocol_type: inner.protocol_type.clone(),
                protocol_name: inner.protocol_name.clone(),
                leader: leader.clone(),
                member_id: id.clone(),
                members: if id == leader { members.clone() } else { Vec::new() },
            };
            let _ = tx.send(result);
        }
    }

    fn remove_member(&self, inner: &mut Inner, id: &str) {
        inner.members.remove(id);
        inner.join_order.retain(|m| m != id);
        inner.pending_joins.retain(|(m, _)| m != id);
        inner.pending_syncs.retain(|(m, _)| m != id);
        if inner.leader.as_deref() == Some(id) {
            inner.leader = None;
        }
        debug!("group {}: member {} removed", self.name, id);
    }

    fn after_membership_change(&self, inner: &mut Inner) {
        if inner.members.is_empty() {
            inner.state = GroupState::Empty;
            inner.leader = None;
            inner.rebalance_deadline = None;
            inner.initial_delay = false;
            inner.protocol_name = None;
            return;
        }
        match inner.state {
            GroupState::PreparingRebalance => {
                if !inner.initial_delay && self.all_joined(inner) {
                    self.complete_rebalance(inner);
                }
            }
            GroupState::Stable | GroupState::CompletingRebalance => {
                let timeout = inner
                    .members
                    .values()
                    .map(|m| m.rebalance_timeout)
                    .max()
                    .unwrap_or_default();
                self.prepare_rebalance(inner, Instant::now() + timeout);
            }
            GroupState::Empty | GroupState::Dead => {}
        }
    }

    fn sync_result(&self, inner: &Inner, member_id: &str) -> SyncResult {
        SyncResult {
            error: ErrorCode::NONE,
            protocol_type: inner.protocol_type.clone(),
            protocol_name: inner.protocol_name.clone(),
            assignment: inner
                .members
                .get(member_id)
                .map(|m| m.assignment.clone())
                .unwrap_or_default(),
        }
    }

    /// One pass of the monitor: completes an expired join phase and evicts
    /// expired sessions. Returns the next deadline to wake up at.
    fn tick(&self, now: Instant) -> Option<Instant> {
        let mut inner = self.inner.lock();
        if inner.state == GroupState::Dead {
            return None;
        }

        if inner.state == GroupState::PreparingRebalance {
            if let Some(deadline) = inner.rebalance_deadline {
                if now >= deadline {
                    self.complete_rebalance(&mut inner);
                }
            }
        }

        let waiting: HashSet<String> = inner.pending_joins.iter().map(|(id, _)| id.clone()).collect();
        let expired: Vec<String> = inner
            .members
            .values()
            .filter(|m| !waiting.contains(&m.id) && now.duration_since(m.last_heartbeat) > m.session_timeout)
            .map(|m| m.id.clone())
            .collect();
        if !expired.is_empty() {
            for id in &expired {
                info!("group {}: session of member {} expired", self.name, id);
                self.remove_member(&mut inner, id);
            }
            self.after_membership_change(&mut inner);
        }

        inner.rebalance_deadline
    }
}

fn touch(inner: &mut Inner, member_id: &str) {
    if let Some(m) = inner.members.get_mut(member_id) {
        m.last_heartbeat = Instant::now();
    }
}

fn millis(ms: i32) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// First protocol of the leader that every member supports.
fn select_protocol(leader: Option<&Member>, members: &BTreeMap<String, Member>) -> Option<String> {
    let leader = leader?;
    leader
        .protocols
        .iter()
        .map(|(name, _)| name)
        .find(|name| {
            members
                .values()
                .all(|m| m.protocols.iter().any(|(n, _)| n == *name))
        })
        .cloned()
}

async fn monitor(group: Weak<Group>) {
    loop {
        let next = {
            let Some(group) = group.upgrade() else { return };
            let now = Instant::now();
            if group.state() == GroupState::Dead {
                return;
            }
            let deadline = group.tick(now);
            let next = deadline
                .map(|d| d.min(now + SESSION_CHECK_INTERVAL))
                .unwrap_or(now + SESSION_CHECK_INTERVAL);
            let wake = async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(next) => {}
                    _ = group.wake.notified() => {}
                }
            };
            wake
        };
        next.await;
    }
}

/// Decodes a consumer protocol assignment into topic -> partitions.
/// Unknown or malformed payloads yield an empty map.
pub fn decode_assignment(data: &Bytes) -> BTreeMap<String, Vec<i32>> {
    let mut out = BTreeMap::new();
    let mut buf = data.clone();
    if buf.remaining() < 6 {
        return out;
    }
    let _version = buf.get_i16();
    let topics = buf.get_i32();
    for _ in 0..topics.max(0) {
        if buf.remaining() < 2 {
            return BTreeMap::new();
        }
        let len = buf.get_i16();
        if len < 0 || buf.remaining() < len as usize + 4 {
            return BTreeMap::new();
        }
        let name = String::from_utf8_lossy(&buf.copy_to_bytes(len as usize)).into_owned();
        let count = buf.get_i32();
        if count < 0 || buf.remaining() < count as usize * 4 {
            return BTreeMap::new();
        }
        let partitions = (0..count).map(|_| buf.get_i32()).collect();
        out.insert(name, partitions);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn join_req(member_id: &str) -> JoinRequest {
        JoinRequest {
            member_id: member_id.to_string(),
            group_instance_id: None,
            client_id: "client".to_string(),
            client_host: "/127.0.0.1".to_string(),
            session_timeout_ms: 30_000,
            rebalance_timeout_ms: 1_000,
            protocol_type: "consumer".to_string(),
            protocols: vec![("range".to_string(), Bytes::from_static(b"meta"))],
        }
    }

    fn assignment(topic: &str, partitions: &[i32]) -> Bytes {
        let mut b = bytes::BytesMut::new();
        b.put_i16(0);
        b.put_i32(1);
        b.put_i16(topic.len() as i16);
        b.put_slice(topic.as_bytes());
        b.put_i32(partitions.len() as i32);
        for p in partitions {
            b.put_i32(*p);
        }
        b.put_i32(-1);
        b.freeze()
    }

    #[tokio::test]
    async fn test_single_member_becomes_leader_and_stable() {
        let group = Group::new("g", 0);
        let joined = group.join(join_req("")).await;
        assert!(joined.error.is_ok());
        assert_eq!(joined.generation_id, 1);
        assert_eq!(joined.leader, joined.member_id);
        assert_eq!(joined.members.len(), 1);
        assert_eq!(joined.protocol_name.as_deref(), Some("range"));
        assert_eq!(group.state(), GroupState::CompletingRebalance);

        let synced = group
            .sync(&joined.member_id, 1, vec![(joined.member_id.clone(), assignment("t", &[0, 1]))])
            .await;
        assert!(synced.error.is_ok());
        assert_eq!(group.state(), GroupState::Stable);
        let snapshot = group.snapshot();
        assert_eq!(snapshot.members[0].partitions.get("t"), Some(&vec![0, 1]));
        assert!(group.heartbeat(&joined.member_id, 1).is_ok());
    }

    #[tokio::test]
    async fn test_second_member_triggers_rebalance() {
        let group = Group::new("g", 0);
        let first = group.join(join_req("")).await;
        group
            .sync(&first.member_id, 1, vec![(first.member_id.clone(), Bytes::new())])
            .await;

        let g = Arc::clone(&group);
        let second = tokio::spawn(async move { g.join(join_req("")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(group.state(), GroupState::PreparingRebalance);
        assert_eq!(
            group.heartbeat(&first.member_id, 1),
            ErrorCode::REBALANCE_IN_PROGRESS
        );

        let rejoin = group.join(join_req(&first.member_id)).await;
        let second = second.await.unwrap();
        assert_eq!(rejoin.generation_id, 2);
        assert_eq!(second.generation_id, 2);
        assert_eq!(rejoin.leader, first.member_id);
        assert_eq!(rejoin.members.len(), 2);
        assert!(second.members.is_empty());

        let g = Arc::clone(&group);
        let follower_id = second.member_id.clone();
        let follower = tokio::spawn(async move { g.sync(&follower_id, 2, Vec::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        group
            .sync(
                &first.member_id,
                2,
                vec![
                    (first.member_id.clone(), assignment("t", &[0])),
                    (second.member_id.clone(), assignment("t", &[1])),
                ],
            )
            .await;
        let follower = follower.await.unwrap();
        assert!(follower.error.is_ok());
        assert_eq!(decode_assignment(&follower.assignment).get("t"), Some(&vec![1]));
    }

    #[tokio::test]
    async fn test_unknown_member_and_generation() {
        let group = Group::new("g", 0);
        assert_eq!(
            group.join(join_req("nope")).await.error,
            ErrorCode::UNKNOWN_MEMBER_ID
        );
        let joined = group.join(join_req("")).await;
        assert_eq!(group.heartbeat(&joined.member_id, 7), ErrorCode::ILLEGAL_GENERATION);
        assert_eq!(group.heartbeat("x", 1), ErrorCode::UNKNOWN_MEMBER_ID);
    }

    #[tokio::test]
    async fn test_inconsistent_protocol_is_rejected() {
        let group = Group::new("g", 0);
        group.join(join_req("")).await;
        let mut other = join_req("");
        other.protocols = vec![("sticky".to_string(), Bytes::new())];
        assert_eq!(
            group.join(other).await.error,
            ErrorCode::INCONSISTENT_GROUP_PROTOCOL
        );
    }

    #[tokio::test]
    async fn test_leave_last_member_empties_group_and_keeps_commits() {
        let group = Group::new("g", 0);
        let joined = group.join(join_req("")).await;
        assert!(group.commit("", "t", 0, 5, None).is_ok());
        assert_eq!(group.leave(&[joined.member_id.clone()]), vec![ErrorCode::NONE]);
        assert_eq!(group.state(), GroupState::Empty);
        assert_eq!(group.committed("t", 0).unwrap().offset, 5);
        assert_eq!(group.leave(&["x".to_string()]), vec![ErrorCode::UNKNOWN_MEMBER_ID]);
    }

    #[tokio::test]
    async fn test_expired_session_is_evicted() {
        let group = Group::new("g", 0);
        let mut req = join_req("");
        req.session_timeout_ms = 10;
        let joined = group.join(req).await;
        group
            .sync(&joined.member_id, 1, vec![(joined.member_id.clone(), Bytes::new())])
            .await;
        group.tick(Instant::now() + Duration::from_millis(50));
        assert_eq!(group.state(), GroupState::Empty);
        assert!(group.snapshot().members.is_empty());
    }

    #[tokio::test]
    async fn test_delete_marks_dead() {
        let group = Group::new("g", 0);
        group.commit("", "t", 0, 1, None);
        group.delete();
        assert_eq!(group.state(), GroupState::Dead);
        assert!(group.committed("t", 0).is_none());
    }

    #[test]
    fn test_decode_assignment_malformed() {
        assert!(decode_assignment(&Bytes::from_static(b"\x00")).is_empty());
        assert_eq!(
            decode_assignment(&assignment("topic", &[2])).get("topic"),
            Some(&vec![2])
        );
    }
}
