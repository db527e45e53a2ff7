use agent_protocol::{Command, CredentialVariant, StatusSnapshot};
use bytes::Bytes;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::CommandClient;
use crate::credentials::CredentialProvider;
use crate::error::ClientError;
use crate::transport::{Connection, Connector, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Uninitialized,
    Connecting,
    Sent,
    Polling,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    Pending,
    Errored,
}

/// Follows the status line the agent pushes after a single `STATUS`/`FSTATUS`
/// request on a long-lived connection.
///
/// Once errored the poller is inert: the connection is gone, the snapshot is
/// frozen and only a fresh [`StatusPoller::init`] revives it.
pub struct StatusPoller<T> {
    state: PollerState,
    connection: Option<Connection<T>>,
    snapshot: StatusSnapshot,
    deadline: Instant,
    slice: Duration,
    cancel: CancellationToken,
}

impl<T: Transport> StatusPoller<T> {
    pub fn new() -> Self {
        Self {
            state: PollerState::Uninitialized,
            connection: None,
            snapshot: StatusSnapshot::default(),
            deadline: Instant::now(),
            slice: Duration::from_millis(10),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    pub fn has_error(&self) -> bool {
        self.snapshot.error
    }

    pub fn is_connection_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// Hands the live connection back so the next `init` can reuse it.
    pub fn into_connection(mut self) -> Option<Connection<T>> {
        if self.state == PollerState::Errored {
            return None;
        }
        self.connection.take()
    }

    /// Connects (or reuses `last`) and sends the status request without waiting
    /// for a reply. Returns false when the poller ended up errored.
    pub async fn init<C, P>(
        &mut self,
        client: &CommandClient<C, P>,
        last: Option<Connection<T>>,
        fast: bool,
        timeout: Duration,
    ) -> bool
    where
        C: Connector<Transport = T>,
        P: CredentialProvider,
    {
        if let Some(previous) = self.connection.take() {
            previous.close().await;
        }
        self.snapshot = StatusSnapshot::default();
        self.slice = client.config().status_poll_interval();
        self.cancel = client.cancel_token().clone();
        self.state = PollerState::Connecting;
        self.deadline = Instant::now() + timeout;

        let command = Command::new(if fast { "FSTATUS" } else { "STATUS" }).without_busy();
        let password = client.password(CredentialVariant::Current);

        let mut connection = match client.open_connection(last, self.deadline).await {
            Ok(connection) => connection,
            Err(err) => {
                if !matches!(err, ClientError::Cancelled) {
                    client.session().latch_error();
                }
                warn!(event = "status.connect_failed", error = %err, "status connection failed");
                self.fail().await;
                return false;
            }
        };
        connection.reset_frames();

        let payload = command.wire_payload(&password);
        let sent = timeout_at(self.deadline, connection.send_payload(&payload))
            .await
            .unwrap_or(Err(ClientError::ReadTimeout));
        self.connection = Some(connection);
        if let Err(err) = sent {
            client.session().latch_error();
            warn!(event = "status.send_failed", error = %err, "status request failed");
            self.fail().await;
            return false;
        }

        debug!(event = "status.sent", verb = command.verb());
        self.state = PollerState::Sent;
        true
    }

    /// One non-blocking step: returns `Updated` when a new status line was
    /// applied to the snapshot and `Pending` when nothing arrived yet.
    pub async fn poll(&mut self) -> PollOutcome {
        match self.state {
            PollerState::Sent | PollerState::Polling => {}
            PollerState::Errored | PollerState::Uninitialized | PollerState::Connecting => {
                return PollOutcome::Errored;
            }
        }
        self.state = PollerState::Polling;

        if Instant::now() >= self.deadline {
            info!(event = "status.deadline", "status stream deadline reached");
            self.fail().await;
            return PollOutcome::Errored;
        }

        match self.next_message().await {
            Ok(Some(message)) if message.is_empty() => {
                warn!(event = "status.empty_frame", "agent sent an empty status frame");
                self.fail().await;
                PollOutcome::Errored
            }
            Ok(Some(message)) => {
                let line = String::from_utf8_lossy(&message);
                self.snapshot.apply_status_line(&line);
                debug!(
                    event = "status.poll.update",
                    status = %self.snapshot.status,
                    percent_done = %self.snapshot.percent_done,
                    "status updated"
                );
                PollOutcome::Updated
            }
            Ok(None) => PollOutcome::Pending,
            Err(err) => {
                warn!(event = "status.poll.failed", error = %err, "status stream failed");
                self.fail().await;
                PollOutcome::Errored
            }
        }
    }

    async fn next_message(&mut self) -> Result<Option<Bytes>, ClientError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::ConnectionClosed);
        };
        if !connection.is_usable() {
            return Err(ClientError::Transport(std::io::Error::other(
                "transport reported an error",
            )));
        }
        if let Some(message) = connection.buffered_message()? {
            return Ok(Some(message));
        }
        let ready = tokio::select! {
            ready = connection.transport_mut().wait_readable(self.slice) => {
                ready.map_err(ClientError::from_io)?
            }
            _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
        };
        if !ready {
            return Ok(None);
        }
        connection.read_available()
    }

    async fn fail(&mut self) {
        self.state = PollerState::Errored;
        self.snapshot.error = true;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

impl<T: Transport> Default for StatusPoller<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{spawn_agent, test_client, unused_addr, Step};
    use crate::transport::TcpTransport;

    async fn poll_until_update(poller: &mut StatusPoller<TcpTransport>) -> PollOutcome {
        loop {
            match poller.poll().await {
                PollOutcome::Pending => continue,
                outcome => return outcome,
            }
        }
    }

    #[tokio::test]
    async fn pushed_updates_are_applied_in_order() {
        let agent = spawn_agent(|_| {
            vec![
                Step::frame("2024-01-01#BACKUP INCR#10#NP#capa=5&has_server=true"),
                Step::Pause(Duration::from_millis(50)),
                Step::frame("2024-01-01#BACKUP INCR#60#P"),
            ]
        })
        .await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert_eq!(poller.state(), PollerState::Uninitialized);
        assert!(poller.init(&client, None, false, Duration::from_secs(2)).await);
        assert_eq!(poller.state(), PollerState::Sent);

        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poller.state(), PollerState::Polling);
        assert_eq!(poller.snapshot().percent_done, "10");
        assert_eq!(poller.snapshot().capabilities, 5);
        assert!(poller.snapshot().has_server);

        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poller.snapshot().percent_done, "60");
        assert!(poller.snapshot().paused);
        assert_eq!(poller.snapshot().capabilities, 0);
        assert!(poller.snapshot().has_server);

        assert_eq!(agent.requests(), vec!["STATUS#pw=secret".to_string()]);
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn fast_status_and_split_frames() {
        let mut first = agent_protocol::FrameCodec::new()
            .encode(b"d#INCR#5")
            .expect("encode")
            .to_vec();
        let second = agent_protocol::FrameCodec::new()
            .encode(b"d#INCR#6")
            .expect("encode")
            .to_vec();
        let tail = first.split_off(6);
        let agent = spawn_agent(move |_| {
            let mut rest = tail.clone();
            rest.extend_from_slice(&second);
            vec![
                Step::Raw(first.clone()),
                Step::Pause(Duration::from_millis(50)),
                Step::Raw(rest),
            ]
        })
        .await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert!(poller.init(&client, None, true, Duration::from_secs(2)).await);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poller.snapshot().percent_done, "5");
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poller.snapshot().percent_done, "6");
        assert_eq!(agent.requests(), vec!["FSTATUS#pw=secret".to_string()]);
    }

    #[tokio::test]
    async fn empty_frame_is_terminal() {
        let agent = spawn_agent(|_| {
            vec![
                Step::frame("d#IDLE#0"),
                Step::frame(""),
                Step::frame("d#IDLE#99"),
            ]
        })
        .await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert!(poller.init(&client, None, false, Duration::from_secs(2)).await);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Errored);
        assert_eq!(poller.state(), PollerState::Errored);
        assert!(poller.has_error());
        assert!(poller.is_connection_closed());

        let frozen = poller.snapshot().clone();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(poller.poll().await, PollOutcome::Errored);
        assert_eq!(poller.snapshot(), &frozen);
        assert_eq!(frozen.percent_done, "0");
    }

    #[tokio::test]
    async fn agent_hangup_while_polling_is_terminal() {
        let agent = spawn_agent(|_| vec![Step::frame("d#INCR#30"), Step::Hangup]).await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert!(poller.init(&client, None, false, Duration::from_secs(2)).await);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Errored);
        assert_eq!(poller.state(), PollerState::Errored);
        assert!(poller.is_connection_closed());
        assert_eq!(poller.snapshot().percent_done, "30");
    }

    #[tokio::test]
    async fn oversized_frame_while_polling_is_terminal() {
        let agent = spawn_agent(|_| {
            vec![
                Step::frame("d#INCR#30"),
                Step::Raw(u32::MAX.to_le_bytes().to_vec()),
            ]
        })
        .await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert!(poller.init(&client, None, false, Duration::from_secs(2)).await);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Errored);
        assert!(poller.has_error());
        assert!(poller.is_connection_closed());
        assert_eq!(poller.poll().await, PollOutcome::Errored);
    }

    #[tokio::test]
    async fn deadline_ends_the_stream() {
        let agent = spawn_agent(|_| Vec::new()).await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert!(poller.init(&client, None, false, Duration::from_millis(150)).await);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Errored);
        assert!(poller.has_error());
        assert!(poller.is_connection_closed());
        assert!(poller.into_connection().is_none());
    }

    #[tokio::test]
    async fn connect_failure_latches_session_error() {
        let addr = unused_addr().await;
        let client = test_client(&addr);

        let mut poller = StatusPoller::new();
        assert!(!poller.init(&client, None, false, Duration::from_secs(1)).await);
        assert_eq!(poller.state(), PollerState::Errored);
        assert!(poller.has_error());
        assert!(client.has_error());
        assert_eq!(poller.poll().await, PollOutcome::Errored);
    }

    #[tokio::test]
    async fn healthy_connection_is_handed_back() {
        let agent = spawn_agent(|_| vec![Step::frame("d#IDLE#0")]).await;
        let client = test_client(&agent.addr);

        let mut poller = StatusPoller::new();
        assert!(poller.init(&client, None, false, Duration::from_secs(2)).await);
        assert_eq!(poll_until_update(&mut poller).await, PollOutcome::Updated);
        let connection = poller.into_connection();
        assert!(connection.is_some());

        let mut next = StatusPoller::new();
        assert!(next.init(&client, connection, true, Duration::from_secs(2)).await);
        assert_eq!(poll_until_update(&mut next).await, PollOutcome::Updated);
        assert_eq!(agent.connections(), 1);
        assert_eq!(
            agent.requests(),
            vec!["STATUS#pw=secret".to_string(), "FSTATUS#pw=secret".to_string()]
        );
    }

    #[tokio::test]
    async fn uninitialized_poller_reports_error_without_io() {
        let mut poller: StatusPoller<TcpTransport> = StatusPoller::new();
        assert_eq!(poller.poll().await, PollOutcome::Errored);
        assert_eq!(poller.state(), PollerState::Uninitialized);
        assert!(!poller.has_error());
    }
}
