use agent_protocol::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("timed out connecting to agent")]
    ConnectTimeout,
    #[error("failed to connect to agent: {0}")]
    Connect(#[source] std::io::Error),
    #[error("timed out waiting for agent response")]
    ReadTimeout,
    #[error("agent closed the connection")]
    ConnectionClosed,
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
    #[error("unexpected agent reply: {0}")]
    Protocol(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Transport(err)
        }
    }
}
