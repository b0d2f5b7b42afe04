//! Link vocabulary shared by the transport, the broker and the clients

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies a connection within one container
    ConnectionId,
    "connection"
);

entity_id!(
    /// Identifies a link within one container
    LinkId,
    "link"
);

entity_id!(
    /// Identifies a delivery within one container
    DeliveryId,
    "delivery"
);

/// Direction of a link, from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Messages flow out of this end
    Sender,
    /// Messages flow into this end
    Receiver,
}

impl Role {
    /// The role the other end of the link plays
    pub fn peer(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
        }
    }
}

/// One end point of a link: where messages come from or go to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Ask the peer to assign the address
    #[serde(default)]
    pub dynamic: bool,
}

impl Terminus {
    /// Terminus naming a fixed address
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            dynamic: false,
        }
    }

    /// Terminus whose address the peer generates
    pub fn dynamic() -> Self {
        Self {
            address: None,
            dynamic: true,
        }
    }

    /// Terminus with no address (anonymous relay)
    pub fn none() -> Self {
        Self::default()
    }

    /// Describe the terminus for logs, e.g. `source 'jobs'`
    pub fn summary(&self, kind: TerminusKind) -> String {
        match &self.address {
            Some(address) => format!("{} '{}'", kind, address),
            None if self.dynamic => format!("dynamic {}", kind),
            None => format!("null {}", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminusKind {
    Source,
    Target,
}

impl std::fmt::Display for TerminusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Final state of a delivery as reported by the receiving peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Accepted,
    Rejected,
    Released,
    Modified,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Released => write!(f, "released"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminus_summary() {
        assert_eq!(
            Terminus::address("q0").summary(TerminusKind::Source),
            "source 'q0'"
        );
        assert_eq!(
            Terminus::dynamic().summary(TerminusKind::Source),
            "dynamic source"
        );
        assert_eq!(Terminus::none().summary(TerminusKind::Target), "null target");
    }

    #[test]
    fn test_role_peer() {
        assert_eq!(Role::Sender.peer(), Role::Receiver);
        assert_eq!(Role::Receiver.peer(), Role::Sender);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(LinkId(3).to_string(), "link-3");
        assert_eq!(ConnectionId(1).to_string(), "connection-1");
    }
}
