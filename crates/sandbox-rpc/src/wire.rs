//! Wire types shared between the client and the command daemon.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// Daemon-assigned identifier of a remote process. Opaque to the client
/// beyond equality comparison.
pub type Pid = u32;

/// Which remote output stream a chunk of bytes belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One event on a `start`/`connect` stream.
///
/// Exactly one `Start` and at most one `End` are delivered per stream;
/// `Output` events are ordered within each stream but unordered between the
/// two streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        pid: Pid,
    },
    Output {
        stream: OutputStream,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    End {
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Termination signals the daemon accepts. Only `Sigkill` is exercised by
/// the session's `kill()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Sigint,
    Sigterm,
    Sigkill,
}

/// A process known to the daemon, as returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub cmd: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Parameters of the `start` RPC. `cmd` is a complete shell line; the
/// daemon runs it through the sandbox shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub envs: HashMap<String, String>,
    /// Whether the client intends to deliver stdin to this process.
    #[serde(default)]
    pub stdin: bool,
}

impl StartRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            cwd: None,
            envs: HashMap::new(),
            stdin: false,
        }
    }
}

/// Delta applied to a running process via the `update` RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Byte payloads travel base64-encoded inside JSON lines.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
