use std::fmt;

/// Error from the underlying socket transport. Wraps whatever concrete
/// error the adapter (axum, tokio-tungstenite, a mock) produces, so the
/// reader/writer loops stay generic over the transport.
#[derive(Debug)]
pub struct SocketError(pub Box<dyn std::error::Error + Send + Sync>);

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket error: {}", self.0)
    }
}

impl std::error::Error for SocketError {}

impl From<axum::Error> for SocketError {
    fn from(e: axum::Error) -> Self {
        SocketError(Box::new(e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[from] redis::RedisError),
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("cluster fabric: {0}")]
    Cluster(#[from] ClusterError),
}
