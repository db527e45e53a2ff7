use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agent_protocol::FrameCodec;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::codec::FramedRead;

use crate::client::CommandClient;
use crate::config::ClientConfig;
use crate::credentials::FileCredentials;
use crate::transport::TcpConnector;

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dir.push(format!("{prefix}-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) enum Step {
    Frame(Vec<u8>),
    Raw(Vec<u8>),
    Pause(Duration),
    Hangup,
}

impl Step {
    pub(crate) fn frame(payload: &str) -> Self {
        Self::Frame(payload.as_bytes().to_vec())
    }
}

pub(crate) struct FakeAgent {
    pub(crate) addr: String,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeAgent {
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Loopback agent that answers every request frame with the steps `handler`
/// returns for it.
pub(crate) async fn spawn_agent<F>(handler: F) -> FakeAgent
where
    F: Fn(&str) -> Vec<Step> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind agent");
    let addr = listener.local_addr().expect("agent addr").to_string();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let recorded = Arc::clone(&requests);
    let accepted = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut frames = FramedRead::new(
                    reader,
                    agent_protocol::framing::codec(agent_protocol::framing::MAX_FRAME_LENGTH),
                );
                while let Some(Ok(frame)) = frames.next().await {
                    let request = String::from_utf8_lossy(&frame).into_owned();
                    recorded.lock().expect("requests lock").push(request.clone());
                    for step in handler(&request) {
                        let written = match step {
                            Step::Frame(payload) => {
                                let bytes = FrameCodec::new().encode(&payload).expect("encode");
                                writer.write_all(&bytes).await
                            }
                            Step::Raw(bytes) => writer.write_all(&bytes).await,
                            Step::Pause(delay) => {
                                tokio::time::sleep(delay).await;
                                Ok(())
                            }
                            Step::Hangup => return,
                        };
                        if written.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    FakeAgent {
        addr,
        requests,
        connections,
    }
}

/// An address nothing listens on.
pub(crate) async fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}

pub(crate) fn test_config(addr: &str) -> ClientConfig {
    let dir = temp_dir("agent-client");
    fs::write(dir.join("pw.txt"), "secret").expect("write pw");
    fs::write(dir.join("pw_change.txt"), "change-secret").expect("write pw_change");
    ClientConfig {
        endpoint: addr.to_string(),
        credentials_dir: dir,
        command_timeout_ms: 2_000,
        status_timeout_ms: 2_000,
        ..ClientConfig::default()
    }
}

pub(crate) fn test_client(addr: &str) -> CommandClient {
    let config = test_config(addr);
    CommandClient::new(
        TcpConnector::new(addr),
        FileCredentials::new(config.credentials_dir.clone()),
        config,
    )
}
