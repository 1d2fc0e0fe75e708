//! Replication offset conditions.
//!
//! This library holds the data model and decision rules behind the
//! metadata controller's convergence gates. Key concepts:
//!
//! - **Offset**: a node's replication log position for one partition.
//! - **Condition**: a target relationship between two nodes' offsets.
//! - **Verdict**: the result of comparing two fresh offsets against a
//!   condition.
//!
//! # Invariants
//!
//! - Classification is pure and deterministic given the same inputs
//! - Offsets order by file number first, then by in-file offset

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing condition inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The node endpoint is missing the `:` separator.
    #[error("node endpoint missing port: {0}")]
    MissingPort(String),

    /// The port is not a valid u16.
    #[error("invalid port in node endpoint: {0}")]
    InvalidPort(String),

    /// The host part is empty.
    #[error("node endpoint missing host: {0}")]
    MissingHost(String),
}

/// A node's replication log position.
///
/// The derived ordering compares `file_number` first and `offset` second.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeOffset {
    /// Binlog file number.
    pub file_number: u32,

    /// Byte offset within the file.
    pub offset: u64,
}

impl NodeOffset {
    pub const fn new(file_number: u32, offset: u64) -> Self {
        Self {
            file_number,
            offset,
        }
    }
}

impl fmt::Display for NodeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_number, self.offset)
    }
}

/// A cluster node endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node {
    pub ip: String,
    pub port: u16,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Node {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::MissingPort(s.to_string()))?;
        if ip.is_empty() {
            return Err(ParseError::MissingHost(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| ParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(ip, port))
    }
}

/// Relationship the two offsets of a condition must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Left and right offsets are identical.
    Equal,

    /// Same file, left strictly ahead of right, gap within the stuck threshold.
    CloseToNotEqual,

    /// A type code this controller does not understand.
    Unknown(u8),
}

impl ConditionType {
    /// Decode a condition type from its numeric code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Equal,
            1 => Self::CloseToNotEqual,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Equal => 0,
            Self::CloseToNotEqual => 1,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => f.write_str("equal"),
            Self::CloseToNotEqual => f.write_str("close_to_not_equal"),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// Compensating action to take when a condition cannot be satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorRecoveryTag {
    /// Drop the condition silently.
    #[default]
    None,

    /// Set the partition active again.
    RecoverActive,

    /// Release a migration credit, then set the partition active again.
    RecoverMigrate,
}

impl ErrorRecoveryTag {
    /// Decode a recovery tag from its numeric code.
    ///
    /// Unrecognized codes decode to [`ErrorRecoveryTag::None`].
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::RecoverActive,
            2 => Self::RecoverMigrate,
            _ => Self::None,
        }
    }
}

/// A convergence gate between two nodes' offsets on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetCondition {
    pub left: Node,
    pub right: Node,
    pub table: String,
    pub partition_id: u32,
    pub kind: ConditionType,
    pub error_tag: ErrorRecoveryTag,
}

/// Outcome of comparing two offsets against a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The condition holds.
    Met,

    /// The condition does not hold yet but still can.
    NotYet,

    /// The offsets crossed or matched in the wrong direction; the condition
    /// can no longer be met.
    Missed,

    /// The condition type is not understood.
    Unrecognized,
}

/// Classify two fresh offsets against a condition type.
///
/// `stuck_threshold` bounds the allowed gap for
/// [`ConditionType::CloseToNotEqual`].
pub fn classify(
    kind: ConditionType,
    left: NodeOffset,
    right: NodeOffset,
    stuck_threshold: u64,
) -> Verdict {
    match kind {
        ConditionType::Equal => {
            if left == right {
                Verdict::Met
            } else {
                Verdict::NotYet
            }
        }
        ConditionType::CloseToNotEqual => {
            // A left behind right saturates to zero and lands on the Missed branch.
            let gap = left.offset.saturating_sub(right.offset);
            if left.file_number != right.file_number || gap > stuck_threshold {
                Verdict::NotYet
            } else if left <= right {
                Verdict::Missed
            } else {
                Verdict::Met
            }
        }
        ConditionType::Unknown(_) => Verdict::Unrecognized,
    }
}

/// Default stuck offset distance.
pub const DEFAULT_STUCK_OFFSET_DIST: u64 = 100;
