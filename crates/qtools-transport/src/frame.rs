//! Wire frames
//!
//! One JSON object per line. Handles and delivery ids are chosen by the
//! side that sends the attach or transfer; the peer maps them to its own
//! links and deliveries.

use qtools_types::{Error, Message, Outcome, Result, Role, Terminus};
use serde::{Deserialize, Serialize};

/// A protocol frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// Start of a connection
    Open {
        container_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },

    /// Attach a link; `role` is the sender of this frame's role
    Attach {
        handle: u64,
        name: String,
        role: Role,
        source: Terminus,
        target: Terminus,
        /// Transfers on this link arrive settled
        #[serde(default)]
        settled: bool,
    },

    /// Grant `credit` more messages on the link
    Flow { handle: u64, credit: u32 },

    /// Carry one message
    Transfer {
        handle: u64,
        delivery_id: u64,
        #[serde(default)]
        settled: bool,
        message: Message,
    },

    /// Settle a delivery the peer sent
    Disposition { delivery_id: u64, outcome: Outcome },

    /// Detach a link
    Detach { handle: u64 },

    /// End of a connection
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    /// Encode as a single line, without the newline
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| Error::Protocol(format!("Malformed frame: {}", e)))
    }

    /// Short frame name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Attach { .. } => "attach",
            Self::Flow { .. } => "flow",
            Self::Transfer { .. } => "transfer",
            Self::Disposition { .. } => "disposition",
            Self::Detach { .. } => "detach",
            Self::Close { .. } => "close",
        }
    }
}
