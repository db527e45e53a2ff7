use serde::{Deserialize, Serialize};

pub mod command;
pub mod decode;
pub mod framing;

pub use command::{Command, CredentialVariant, ParamMap};
pub use decode::{DecodeError, Sentinel};
pub use framing::{FrameCodec, FrameError};

pub const DEFAULT_AGENT_ADDR: &str = "127.0.0.1:35623";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupDir {
    pub path: String,
    pub name: String,
    pub id: i32,
    pub group: i32,
    pub flags: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: i32,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogLine {
    pub level: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Incremental => "INCR",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Failed,
    Started,
    AlreadyRunning,
    NoServer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningProcess {
    #[serde(default, deserialize_with = "decode::null_default")]
    pub action: String,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub percent_done: i32,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub eta_ms: i64,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub details: String,
    #[serde(default = "default_detail_pc", deserialize_with = "null_detail_pc")]
    pub detail_pc: i32,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub process_id: i64,
}

fn default_detail_pc() -> i32 {
    -1
}

fn null_detail_pc<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<i32>::deserialize(deserializer)?.unwrap_or_else(default_detail_pc))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    #[serde(default, deserialize_with = "decode::null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub internet_connection: bool,
}

/// `STATUS DETAIL` document. `ok` is false whenever the reply could not be
/// decoded, in which case every other field is a default and means "unknown".
/// A field sent as `null` reads as its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusDetails {
    #[serde(default, deserialize_with = "decode::null_default")]
    pub last_backup_time: i64,
    #[serde(default, deserialize_with = "decode::object_list")]
    pub running_processes: Vec<RunningProcess>,
    #[serde(default, deserialize_with = "decode::object_list")]
    pub servers: Vec<ServerInfo>,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub time_since_last_lan_connection: i64,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub internet_connected: bool,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub internet_status: String,
    #[serde(default, deserialize_with = "decode::null_default")]
    pub capability_bits: i32,
    #[serde(skip_deserializing)]
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RestoreAck {
    pub accepted: bool,
    pub process_id: Option<i64>,
    pub ok: bool,
}

/// Mutable view of the pushed `STATUS`/`FSTATUS` line.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub last_backup_date: String,
    pub status: String,
    pub percent_done: String,
    pub paused: bool,
    pub capabilities: i32,
    pub new_server: String,
    pub has_server: bool,
    pub restore_ask: bool,
    pub restore_file: bool,
    pub restore_path: String,
    pub needs_restore_restart: bool,
    pub error: bool,
}
