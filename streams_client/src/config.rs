use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Failed to load environment file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

/// Where a reader starts (or falls back to) in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OffsetPolicy {
    /// The oldest retained item
    Begin,
    /// Only items written after the session starts
    End,
    /// The latest item already written
    MostRecent,
    /// Just after the receiver's last committed offset
    Stored,
}

impl OffsetPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetPolicy::Begin => "begin",
            OffsetPolicy::End => "end",
            OffsetPolicy::MostRecent => "most-recent",
            OffsetPolicy::Stored => "stored",
        }
    }
}

impl fmt::Display for OffsetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "begin" => Ok(OffsetPolicy::Begin),
            "end" => Ok(OffsetPolicy::End),
            "most-recent" => Ok(OffsetPolicy::MostRecent),
            "stored" => Ok(OffsetPolicy::Stored),
            "" => Err(ConfigError::InvalidValue {
                name: "offset policy".to_string(),
                reason: "must not be empty".to_string(),
            }),
            other => Err(ConfigError::InvalidValue {
                name: "offset policy".to_string(),
                reason: format!(
                    "'{}' is not one of begin, end, most-recent, stored",
                    other
                ),
            }),
        }
    }
}

/// Names the logical series a session reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub cluster_name: String,
    pub stream_id: String,
    /// Only meaningful for packet streams
    #[serde(default)]
    pub event_id: String,
}

impl ChannelIdentity {
    /// Identity of one event's packets
    pub fn event(
        cluster_name: impl Into<String>,
        stream_id: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            stream_id: stream_id.into(),
            event_id: event_id.into(),
        }
    }

    /// Identity of a whole stream, for event updates
    pub fn stream(cluster_name: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            stream_id: stream_id.into(),
            event_id: String::new(),
        }
    }
}

/// Tunables shared by every session. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedOptions {
    /// How often the server promises to send a heartbeat
    pub heartbeat_interval: Duration,
    /// Extra silence tolerated on top of `heartbeat_interval`
    pub heartbeat_grace_period: Duration,
    /// How long the stream may stay open after a writes-done request
    pub writes_done_grace_period: Duration,
    /// Lease requested for controlled reads
    pub lease_term: Duration,
    pub starting_offset: String,
    pub fallback_offset: String,

    /// Longest single wait of the response dispatcher
    pub read_timeout: Duration,
    /// Poll slice of the offset committer
    pub commit_poll_interval: Duration,
    /// How long to wait for a cancelled task before detaching it
    pub shutdown_timeout: Duration,
    /// Items buffered between the dispatcher and `receive`
    pub buffer_capacity: usize,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace_period: Duration::from_secs(5),
            writes_done_grace_period: Duration::from_secs(5),
            lease_term: Duration::from_secs(10),
            starting_offset: OffsetPolicy::MostRecent.to_string(),
            fallback_offset: OffsetPolicy::End.to_string(),
            read_timeout: Duration::from_millis(100),
            commit_poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            buffer_capacity: 16,
        }
    }
}

impl AdvancedOptions {
    /// Defaults overridden by `STREAMS_*` environment variables, loading a
    /// `.env` file first if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading an explicit env file.
    /// Variables in the file win over the process environment.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut file_vars = HashMap::new();
        for item in dotenvy::from_path_iter(path.as_ref())? {
            let (key, value) = item?;
            file_vars.insert(key, value);
        }
        Self::from_lookup(|name| file_vars.get(name).cloned().or_else(|| env::var(name).ok()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();

        if let Some(ms) = millis(&lookup, "STREAMS_HEARTBEAT_INTERVAL_MS")? {
            options.heartbeat_interval = ms;
        }
        if let Some(ms) = millis(&lookup, "STREAMS_HEARTBEAT_GRACE_PERIOD_MS")? {
            options.heartbeat_grace_period = ms;
        }
        if let Some(ms) = millis(&lookup, "STREAMS_WRITES_DONE_GRACE_PERIOD_MS")? {
            options.writes_done_grace_period = ms;
        }
        if let Some(ms) = millis(&lookup, "STREAMS_LEASE_TERM_MS")? {
            options.lease_term = ms;
        }
        if let Some(ms) = millis(&lookup, "STREAMS_READ_TIMEOUT_MS")? {
            options.read_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, "STREAMS_COMMIT_POLL_INTERVAL_MS")? {
            options.commit_poll_interval = ms;
        }
        if let Some(ms) = millis(&lookup, "STREAMS_SHUTDOWN_TIMEOUT_MS")? {
            options.shutdown_timeout = ms;
        }
        if let Some(capacity) = number(&lookup, "STREAMS_BUFFER_CAPACITY")? {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "STREAMS_BUFFER_CAPACITY".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            options.buffer_capacity = capacity as usize;
        }
        if let Some(policy) = lookup("STREAMS_STARTING_OFFSET") {
            options.starting_offset = policy.parse::<OffsetPolicy>()?.to_string();
        }
        if let Some(policy) = lookup("STREAMS_FALLBACK_OFFSET") {
            options.fallback_offset = policy.parse::<OffsetPolicy>()?.to_string();
        }

        Ok(options)
    }

    /// Silence after which the server is considered dead
    pub fn liveness_deadline(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_grace_period
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                reason: format!("'{}' is not a number: {}", raw, e),
            }),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(number(lookup, name)?.map(Duration::from_millis))
}

/// Whether the server tracks this reader's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// No offset tracking; commits are accepted but carry no meaning
    Eager,
    /// Offsets are persisted; starting and fallback policies apply
    #[default]
    Controlled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketReceiverOptions {
    /// Address of the stream server, e.g. "127.0.0.1:50061"
    pub target_address: String,
    pub channel: ChannelIdentity,
    /// Name this reader is known by on the server
    pub receiver_id: String,
    #[serde(default)]
    pub receive_mode: ReceiveMode,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub advanced: AdvancedOptions,
}

impl PacketReceiverOptions {
    pub fn new(
        target_address: impl Into<String>,
        channel: ChannelIdentity,
        receiver_id: impl Into<String>,
    ) -> Self {
        Self {
            target_address: target_address.into(),
            channel,
            receiver_id: receiver_id.into(),
            receive_mode: ReceiveMode::default(),
            connect_timeout: default_connect_timeout(),
            advanced: AdvancedOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUpdateReceiverOptions {
    pub target_address: String,
    pub channel: ChannelIdentity,
    pub receiver_id: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub advanced: AdvancedOptions,
}

impl EventUpdateReceiverOptions {
    pub fn new(
        target_address: impl Into<String>,
        channel: ChannelIdentity,
        receiver_id: impl Into<String>,
    ) -> Self {
        Self {
            target_address: target_address.into(),
            channel,
            receiver_id: receiver_id.into(),
            connect_timeout: default_connect_timeout(),
            advanced: AdvancedOptions::default(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
