use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::command::{lenient_int, ParamMap};
use crate::{
    BackupDir, LogEntry, LogLine, RestoreAck, StartOutcome, StatusDetails, StatusSnapshot,
};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty response")]
    Empty,
    #[error("invalid json response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("json response is not an object")]
    NotObject,
}

/// Reads a field that may be `null` as the type's default.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads an array of JSON objects; `null` is an empty list and any element
/// that is not an object fails the field.
pub(crate) fn object_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Option::<Vec<Value>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(|item| {
            if !item.is_object() {
                return Err(D::Error::custom("expected a json object"));
            }
            serde_json::from_value(item).map_err(D::Error::custom)
        })
        .collect()
}

/// Parses `raw` as a JSON object document. Arrays and scalars are rejected
/// even when they would match the target field by position.
fn parse_object<T: DeserializeOwned>(raw: &[u8]) -> Result<T, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }
    let value: Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(DecodeError::NotObject);
    }
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentinel {
    Ok,
    Running,
    NoServer,
    Other(String),
}

impl Sentinel {
    pub fn decode(raw: &[u8]) -> Self {
        match raw {
            b"OK" => Self::Ok,
            b"RUNNING" => Self::Running,
            b"NO SERVER" => Self::NoServer,
            other => Self::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

impl From<Sentinel> for StartOutcome {
    fn from(sentinel: Sentinel) -> Self {
        match sentinel {
            Sentinel::Ok => Self::Started,
            Sentinel::Running => Self::AlreadyRunning,
            Sentinel::NoServer => Self::NoServer,
            Sentinel::Other(_) => Self::Failed,
        }
    }
}

impl StatusSnapshot {
    /// Applies one `date#status#pcdone#pause#params` line. Pause, capabilities and
    /// the restore prompt are reset on every line; the remaining fields keep their
    /// previous value unless the line carries them.
    pub fn apply_status_line(&mut self, line: &str) {
        self.paused = false;
        self.capabilities = 0;
        self.restore_ask = false;

        let tokens: Vec<&str> = line.split('#').collect();
        if let Some(date) = tokens.first() {
            self.last_backup_date = (*date).to_string();
        }
        if let Some(status) = tokens.get(1) {
            self.status = (*status).to_string();
        }
        if let Some(percent) = tokens.get(2) {
            self.percent_done = (*percent).to_string();
        }
        match tokens.get(3).copied() {
            Some("P") => self.paused = true,
            Some("NP") => self.paused = false,
            _ => {}
        }
        if let Some(raw) = tokens.get(4) {
            self.apply_params(&ParamMap::parse(raw));
        }
    }

    fn apply_params(&mut self, params: &ParamMap) {
        if let Some(capa) = params.get_int("capa") {
            self.capabilities = clamp_i32(capa);
        }
        if let Some(ident) = params.get("new_ident") {
            self.new_server = ident.to_string();
        }
        if let Some(has_server) = params.get_flag("has_server") {
            self.has_server = has_server;
        }
        if let Some(ask) = params.get_int("restore_ask") {
            self.restore_ask = ask != 0;
        }
        if let Some(restore_file) = params.get_flag("restore_file") {
            self.restore_file = restore_file;
        }
        if let Some(path) = params.get("restore_path") {
            self.restore_path = path.to_string();
        }
        if let Some(restart) = params.get_int("needs_restore_restart") {
            self.needs_restore_restart = restart != 0;
        }
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn split_record(line: &str) -> (i32, String) {
    match line.split_once('-') {
        Some((prefix, rest)) => (clamp_i32(lenient_int(prefix)), rest.to_string()),
        None => (0, String::new()),
    }
}

fn record_lines(raw: &[u8]) -> Vec<(i32, String)> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(split_record)
        .collect()
}

/// `GET LOGPOINTS` reply: one `<id>-<timestamp>` per line.
pub fn decode_log_entries(raw: &[u8]) -> Vec<LogEntry> {
    record_lines(raw)
        .into_iter()
        .map(|(id, time)| LogEntry { id, time })
        .collect()
}

/// `GET LOGDATA` reply: one `<level>-<message>` per line.
pub fn decode_log_lines(raw: &[u8]) -> Vec<LogLine> {
    record_lines(raw)
        .into_iter()
        .map(|(level, message)| LogLine { level, message })
        .collect()
}

#[derive(Deserialize)]
struct DirsDocument {
    #[serde(default, deserialize_with = "object_list")]
    dirs: Vec<WireDir>,
}

#[derive(Deserialize)]
struct WireDir {
    #[serde(default, deserialize_with = "null_default")]
    path: String,
    #[serde(default, deserialize_with = "null_default")]
    name: String,
    #[serde(default, deserialize_with = "null_default")]
    id: i32,
    #[serde(default, deserialize_with = "null_default")]
    group: i32,
    #[serde(default, deserialize_with = "null_default")]
    flags: String,
    #[serde(default)]
    virtual_client: Option<Value>,
}

/// `GET BACKUP DIRS` reply. Entries that belong to a virtual client are dropped.
pub fn decode_backup_dirs(raw: &[u8]) -> Result<Vec<BackupDir>, DecodeError> {
    let document: DirsDocument = parse_object(raw)?;
    Ok(document
        .dirs
        .into_iter()
        .filter(|dir| dir.virtual_client.is_none())
        .map(|dir| BackupDir {
            path: dir.path,
            name: dir.name,
            id: dir.id,
            group: dir.group,
            flags: dir.flags,
        })
        .collect())
}

impl StatusDetails {
    pub fn try_decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let mut details: StatusDetails = parse_object(raw)?;
        details.ok = true;
        Ok(details)
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self::try_decode(raw).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct WireRestoreAck {
    #[serde(default, deserialize_with = "null_default")]
    accepted: bool,
    #[serde(default, deserialize_with = "null_default")]
    process_id: i64,
    #[serde(default, deserialize_with = "null_default")]
    ok: bool,
}

impl RestoreAck {
    pub fn try_decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireRestoreAck = parse_object(raw)?;
        Ok(Self {
            accepted: wire.accepted,
            process_id: wire.accepted.then_some(wire.process_id),
            ok: wire.ok,
        })
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self::try_decode(raw).unwrap_or_default()
    }
}
