use agent_protocol::{Command, CredentialVariant};
use bytes::Bytes;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::credentials::{CredentialProvider, FileCredentials};
use crate::error::ClientError;
use crate::session::Session;
use crate::transport::{connect_within, readable_within, Connection, Connector, TcpConnector};

/// Request/response client for the local agent. At most one command is in
/// flight per connection; each exchange waits for exactly one reply frame.
pub struct CommandClient<C = TcpConnector, P = FileCredentials> {
    connector: C,
    credentials: P,
    session: Session,
    config: ClientConfig,
    cancel: CancellationToken,
}

impl CommandClient {
    pub fn from_config(config: ClientConfig) -> Self {
        let connector = TcpConnector::new(config.endpoint.clone());
        let credentials = FileCredentials::new(config.credentials_dir.clone());
        Self::new(connector, credentials, config)
    }
}

impl<C, P> CommandClient<C, P>
where
    C: Connector,
    P: CredentialProvider,
{
    pub fn new(connector: C, credentials: P, config: ClientConfig) -> Self {
        Self {
            connector,
            credentials,
            session: Session::new(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    pub fn has_error(&self) -> bool {
        self.session.has_error()
    }

    pub(crate) fn password(&self, variant: CredentialVariant) -> String {
        self.credentials.credential(variant).unwrap_or_default()
    }

    /// Sends `command` on a fresh connection and closes it after the reply.
    pub async fn send(&self, command: &Command) -> Result<Bytes, ClientError> {
        let (reply, connection) = self.exchange(command, None).await?;
        connection.close().await;
        Ok(reply)
    }

    /// Sends `command` on the connection in `slot`, or on a new one when the slot
    /// is empty or its transport failed. On success the live connection is put
    /// back into `slot`; on failure the slot is left empty.
    pub async fn send_on(
        &self,
        command: &Command,
        slot: &mut Option<Connection<C::Transport>>,
    ) -> Result<Bytes, ClientError> {
        let (reply, connection) = self.exchange(command, slot.take()).await?;
        *slot = Some(connection);
        Ok(reply)
    }

    async fn exchange(
        &self,
        command: &Command,
        reuse: Option<Connection<C::Transport>>,
    ) -> Result<(Bytes, Connection<C::Transport>), ClientError> {
        let started = Instant::now();
        let deadline = started + command.timeout().unwrap_or(self.config.command_timeout());
        let password = self.password(command.credential());
        let _busy = self.session.busy_guard(command.counts_as_busy());

        let result = self.run_exchange(command, &password, reuse, deadline).await;
        match &result {
            Ok((reply, _)) => {
                self.session.clear_error();
                debug!(
                    event = "command.reply",
                    verb = command.verb(),
                    bytes = reply.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "agent replied"
                );
            }
            Err(ClientError::Cancelled) => {
                debug!(event = "command.cancelled", verb = command.verb());
            }
            Err(err) => {
                self.session.latch_error();
                warn!(
                    event = "command.failed",
                    verb = command.verb(),
                    error = %err,
                    "agent command failed"
                );
            }
        }
        result
    }

    async fn run_exchange(
        &self,
        command: &Command,
        password: &str,
        reuse: Option<Connection<C::Transport>>,
        deadline: Instant,
    ) -> Result<(Bytes, Connection<C::Transport>), ClientError> {
        let mut connection = self.open_connection(reuse, deadline).await?;
        connection.reset_frames();
        debug!(event = "command.send", verb = command.verb());

        let payload = command.wire_payload(password);
        timeout_at(deadline, connection.send_payload(&payload))
            .await
            .map_err(|_| ClientError::ReadTimeout)??;

        loop {
            if let Some(reply) = connection.buffered_message()? {
                return Ok((reply, connection));
            }
            readable_within(
                connection.transport_mut(),
                deadline,
                self.config.poll_interval(),
                &self.cancel,
            )
            .await?;
            if let Some(reply) = connection.read_available()? {
                return Ok((reply, connection));
            }
        }
    }

    /// Reuses `reuse` when it is still healthy, otherwise connects to the agent,
    /// polling in `poll_interval` steps until `deadline`.
    pub(crate) async fn open_connection(
        &self,
        reuse: Option<Connection<C::Transport>>,
        deadline: Instant,
    ) -> Result<Connection<C::Transport>, ClientError> {
        if let Some(connection) = reuse {
            if connection.is_usable() {
                return Ok(connection);
            }
            connection.close().await;
        }
        let transport = connect_within(
            &self.connector,
            deadline,
            self.config.poll_interval(),
            &self.cancel,
        )
        .await?;
        Ok(Connection::new(
            transport,
            self.config.max_frame_length,
            self.config.read_chunk_bytes,
        ))
    }
}
