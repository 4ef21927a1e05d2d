//! Provenance log carried by every stack
//!
//! Each pipeline component that mutates a stack appends one [`LogEntry`].
//! On export the log is serialized as the JSON string `{"log": [...]}`
//! under [`EXTRAS_KEY`] in the collection extras, and restored from there
//! on ingestion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StackResult;
use crate::tile::Extras;

/// Reserved collection-extras key holding the serialized log
pub const EXTRAS_KEY: &str = "tessera";

const LOG_FIELD: &str = "log";

/// Anything that records itself in a stack's provenance log
pub trait PipelineComponent {
    /// Name recorded as the entry's method
    fn method_name(&self) -> String;

    /// Arguments the component ran with
    fn arguments(&self) -> Value;
}

/// Host information captured with each entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    /// Operating system family
    pub os: String,
    /// CPU architecture
    pub arch: String,
}

impl OsInfo {
    /// Information about the running host
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// One provenance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Component that ran
    pub method: String,
    /// Its arguments
    pub arguments: Value,
    /// Host it ran on
    pub os: OsInfo,
    /// Library versions
    pub dependencies: BTreeMap<String, String>,
    /// Version of this library
    pub version: String,
}

impl LogEntry {
    /// Entry for a component running now
    pub fn for_component(component: &dyn PipelineComponent) -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let mut dependencies = BTreeMap::new();
        dependencies.insert(env!("CARGO_PKG_NAME").to_string(), version.clone());
        Self {
            method: component.method_name(),
            arguments: component.arguments(),
            os: OsInfo::current(),
            dependencies,
            version,
        }
    }
}

/// Append-only ordered log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceLog {
    entries: Vec<LogEntry>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    log: ProvenanceLog,
}

impl ProvenanceLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Entries in append order
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize as the `{"log": [...]}` JSON string stored in extras
    pub fn encode(&self) -> StackResult<String> {
        Ok(serde_json::to_string(&Envelope { log: self.clone() })?)
    }

    /// Parse the string produced by [`encode`](Self::encode)
    pub fn decode(s: &str) -> StackResult<Self> {
        let envelope: Envelope = serde_json::from_str(s)?;
        Ok(envelope.log)
    }

    /// Restore a log from collection extras, if one is stored there
    pub fn from_extras(extras: &Extras) -> StackResult<Option<Self>> {
        match extras.get(EXTRAS_KEY) {
            Some(Value::String(s)) if s.contains(LOG_FIELD) => Self::decode(s).map(Some),
            _ => Ok(None),
        }
    }

    /// Store the log in collection extras
    pub fn write_extras(&self, extras: &mut Extras) -> StackResult<()> {
        extras.insert(EXTRAS_KEY.to_string(), Value::String(self.encode()?));
        Ok(())
    }
}
