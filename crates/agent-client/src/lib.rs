pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod poller;
pub mod session;
pub mod transport;

mod ops;
#[cfg(test)]
mod test_utils;

pub use client::CommandClient;
pub use config::{load_client_config, ClientConfig};
pub use credentials::{CredentialProvider, FileCredentials};
pub use error::ClientError;
pub use poller::{PollOutcome, PollerState, StatusPoller};
pub use session::Session;
pub use transport::{Connection, Connector, TcpConnector, TcpTransport, Transport};
