use waypoint_core::net::protocol::ProtocolError;

use crate::store::StoreError;

#[derive(Debug)]
pub enum ServerError {
    /// The persistence collaborator could not be reached or failed.
    StorageUnavailable(String),
    /// No active player is bound to the given connection or key.
    UnknownPlayer(String),
    /// A reply could not be queued for its connection.
    Delivery(String),
    Protocol(ProtocolError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageUnavailable(m) => write!(f, "storage unavailable: {m}"),
            Self::UnknownPlayer(m) => write!(f, "unknown player: {m}"),
            Self::Delivery(m) => write!(f, "delivery failed: {m}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
