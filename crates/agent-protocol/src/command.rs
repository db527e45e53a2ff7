use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialVariant {
    Current,
    Change,
}

impl CredentialVariant {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Current => "pw.txt",
            Self::Change => "pw_change.txt",
        }
    }
}

impl fmt::Display for CredentialVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Change => f.write_str("change"),
        }
    }
}

/// One request line: `VERB#pw=<password>[&key=value...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    args: Vec<(String, String)>,
    credential: CredentialVariant,
    counts_as_busy: bool,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
            credential: CredentialVariant::Current,
            counts_as_busy: true,
            timeout: None,
        }
    }

    /// Appends `key=value`; the value is escaped for the parameter string.
    pub fn arg(mut self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.args.push((key.into(), escape_param(value.as_ref())));
        self
    }

    /// Appends `key=value` verbatim, for values the agent expects unescaped.
    pub fn raw_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    pub fn change_credential(mut self) -> Self {
        self.credential = CredentialVariant::Change;
        self
    }

    pub fn without_busy(mut self) -> Self {
        self.counts_as_busy = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn credential(&self) -> CredentialVariant {
        self.credential
    }

    pub fn counts_as_busy(&self) -> bool {
        self.counts_as_busy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn encoded_args(&self) -> String {
        self.args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn wire_payload(&self, password: &str) -> String {
        let args = self.encoded_args();
        if args.is_empty() {
            format!("{}#pw={}", self.verb, password)
        } else {
            format!("{}#pw={}&{}", self.verb, password, args)
        }
    }
}

pub fn escape_param(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Escapes free text so it can be carried inside a single command verb.
pub fn escape_client_message(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    for ch in data.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '#' => out.push_str("\\#"),
            other => out.push(other),
        }
    }
    out
}

/// `key=value&key=value` string as found in the last status token.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParamMap {
    values: HashMap<String, String>,
}

impl ParamMap {
    pub fn parse(raw: &str) -> Self {
        let mut values = HashMap::new();
        for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            values.insert(unescape_param(key), unescape_param(value));
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).map(lenient_int)
    }

    pub fn get_flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|value| value == "true")
    }
}

fn unescape_param(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Leading optional sign plus digits; anything unparsable is 0.
pub fn lenient_int(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(digits.len());
    let value = digits[..end].bytes().fold(0i64, |acc, byte| {
        acc.saturating_mul(10).saturating_add(i64::from(byte - b'0'))
    });
    if negative {
        -value
    } else {
        value
    }
}
