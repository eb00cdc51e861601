use std::fmt;

/// Kafka protocol error code as carried in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i16);

impl ErrorCode {
    pub const NONE: ErrorCode = ErrorCode(0);
    pub const UNKNOWN_SERVER_ERROR: ErrorCode = ErrorCode(-1);
    pub const OFFSET_OUT_OF_RANGE: ErrorCode = ErrorCode(1);
    pub const CORRUPT_MESSAGE: ErrorCode = ErrorCode(2);
    pub const UNKNOWN_TOPIC_OR_PARTITION: ErrorCode = ErrorCode(3);
    pub const COORDINATOR_NOT_AVAILABLE: ErrorCode = ErrorCode(15);
    pub const NOT_COORDINATOR: ErrorCode = ErrorCode(16);
    pub const ILLEGAL_GENERATION: ErrorCode = ErrorCode(22);
    pub const INCONSISTENT_GROUP_PROTOCOL: ErrorCode = ErrorCode(23);
    pub const INVALID_GROUP_ID: ErrorCode = ErrorCode(24);
    pub const UNKNOWN_MEMBER_ID: ErrorCode = ErrorCode(25);
    pub const REBALANCE_IN_PROGRESS: ErrorCode = ErrorCode(27);
    pub const UNSUPPORTED_VERSION: ErrorCode = ErrorCode(35);
    pub const INVALID_PARTITIONS: ErrorCode = ErrorCode(37);
    pub const GROUP_ID_NOT_FOUND: ErrorCode = ErrorCode(69);
    pub const MEMBER_ID_REQUIRED: ErrorCode = ErrorCode(79);

    pub fn is_ok(self) -> bool {
        self == Self::NONE
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "None",
            -1 => "UnknownServerError",
            1 => "OffsetOutOfRange",
            2 => "CorruptMessage",
            3 => "UnknownTopicOrPartition",
            15 => "CoordinatorNotAvailable",
            16 => "NotCoordinator",
            22 => "IllegalGeneration",
            23 => "InconsistentGroupProtocol",
            24 => "InvalidGroupId",
            25 => "UnknownMemberId",
            27 => "RebalanceInProgress",
            35 => "UnsupportedVersion",
            37 => "InvalidPartitions",
            69 => "GroupIdNotFound",
            79 => "MemberIdRequired",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl From<ErrorCode> for i16 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Broker level failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KafkaError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),

    #[error("unknown partition {partition} of topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("offset {offset} out of range [{start}, {end}]")]
    OffsetOutOfRange { offset: i64, start: i64, end: i64 },

    #[error("no matching message configuration found for the given value: {0}")]
    NoMatchingMessage(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("topic {topic} has {current} partitions, refusing to shrink to {requested}")]
    InvalidPartitions {
        topic: String,
        current: i32,
        requested: i32,
    },

    #[error("unknown member {0}")]
    UnknownMember(String),

    #[error("group {0} not found")]
    GroupNotFound(String),
}

impl KafkaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KafkaError::UnknownTopic(_) | KafkaError::UnknownPartition { .. } => {
                ErrorCode::UNKNOWN_TOPIC_OR_PARTITION
            }
            KafkaError::OffsetOutOfRange { .. } => ErrorCode::OFFSET_OUT_OF_RANGE,
            KafkaError::NoMatchingMessage(_) | KafkaError::InvalidKey(_) => ErrorCode::CORRUPT_MESSAGE,
            KafkaError::InvalidPartitions { .. } => ErrorCode::INVALID_PARTITIONS,
            KafkaError::UnknownMember(_) => ErrorCode::UNKNOWN_MEMBER_ID,
            KafkaError::GroupNotFound(_) => ErrorCode::GROUP_ID_NOT_FOUND,
        }
    }
}
