//! ---
//! campus_section: "02-messaging-ipc-data-model"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Message schema helpers and protocol codecs."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
#![warn(missing_docs)]
//! Wire contract shared by brokers, the failover control plane, and faculty clients.
//!
//! Every message is a single JSON object terminated by `\n`. A connection carries
//! strictly alternating request/reply frames.

use std::time::Duration;

pub mod connection;
pub mod decode;
pub mod framing;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failures observed while exchanging frames with a peer.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Transport-level failure (refused, reset, unreachable).
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    /// No reply arrived before the per-operation deadline.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The peer sent something that is not a valid frame or message.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The peer closed the connection before replying.
    #[error("peer closed the connection")]
    Closed,
    /// A frame exceeded the configured size limit.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Wrapper for JSON serialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MessagingError {
    /// `true` for failures where the connection itself is no longer usable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MessagingError::Connection(_) | MessagingError::Closed | MessagingError::FrameTooLarge { .. }
        )
    }

    /// `true` when the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MessagingError::Timeout(_))
    }
}

pub use connection::{ping, Connection};
pub use decode::{decode_inbound, Inbound, ProtocolIssue};
pub use framing::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
pub use types::{
    AllocationRequest, AllocationResponse, AllocationResult, AllocationStatus, BrokerState,
    Command, CommandMessage, ErrorReply, Reply, ResourceCounts, ResourceKind, Shortfall,
    StateReply,
};
