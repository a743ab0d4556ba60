//! Typed network configuration: validated fields, environment presets, a
//! fluent builder, and JSON file load/save — mirroring the teacher's router
//! configuration module.

use crate::error::ConfigError;
use crate::types::{HeartbeatIntervalMs, MaxMessageBytes, QueueCapacity, TaskStoreCapacity};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The network's display name.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Clone, Debug, Eq, PartialEq, Display, Serialize, Deserialize)
)]
pub struct NetworkName(String);

impl Default for NetworkName {
    fn default() -> Self {
        Self::try_new("openagents").expect("literal default is valid")
    }
}

/// One transport's kind and bind configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport implementation this binds.
    pub kind: TransportKind,
    /// Socket address to bind, e.g. `127.0.0.1:8765`.
    pub bind_addr: String,
    /// Optional bearer token required on every request except health checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

/// Which concrete transport a [`TransportConfig`] entry configures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// The streaming (WebSocket) transport.
    Streaming,
    /// The HTTP long-poll transport.
    HttpPoll,
    /// The agent-to-agent JSON-RPC transport.
    JsonRpc,
}

/// One mod's identifier and opaque settings blob; declaration order is pipeline order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModConfig {
    /// Dotted identifier the mod loader resolves (e.g. `thread_messaging`).
    pub id: String,
    /// Mod-specific settings, passed through uninterpreted by the core.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// The fully validated network descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The network's display name.
    pub name: NetworkName,
    /// Directory mods checkpoint state into.
    pub workspace: PathBuf,
    /// Streaming-transport heartbeat interval.
    pub heartbeat_interval: HeartbeatIntervalMs,
    /// Override for the derived (3×) heartbeat timeout; `None` uses the default multiplier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_ms: Option<u64>,
    /// Default per-agent outbound queue capacity.
    pub agent_queue_capacity: QueueCapacity,
    /// Maximum inbound frame size across all transports.
    pub max_message_bytes: MaxMessageBytes,
    /// Transports to bind, in no particular order (each is independent).
    pub transports: Vec<TransportConfig>,
    /// Mods to load, in pipeline order.
    pub mods: Vec<ModConfig>,
    /// JSON-RPC task store capacity before LRU eviction of terminal tasks.
    pub task_store_capacity: TaskStoreCapacity,
}

/// The bundled mods, in pipeline order, both presets load by default.
fn default_mods() -> Vec<ModConfig> {
    vec![
        ModConfig {
            id: "thread_messaging".to_string(),
            settings: serde_json::json!({}),
        },
        ModConfig {
            id: "shared_document".to_string(),
            settings: serde_json::json!({}),
        },
    ]
}

impl NetworkConfig {
    /// The derived heartbeat timeout: the override if set, else 3× the interval.
    #[must_use]
    pub fn heartbeat_timeout_ms(&self) -> u64 {
        self.heartbeat_timeout_ms
            .unwrap_or_else(|| self.heartbeat_interval.timeout().as_millis() as u64)
    }

    /// A small, localhost-bound configuration for interactive development.
    #[must_use]
    pub fn development() -> Self {
        Self {
            name: NetworkName::try_new("openagents-dev").expect("literal is valid"),
            workspace: PathBuf::from("./workspace"),
            heartbeat_interval: HeartbeatIntervalMs::try_new(30_000).expect("in range"),
            heartbeat_timeout_ms: None,
            agent_queue_capacity: QueueCapacity::try_new(100).expect("in range"),
            max_message_bytes: MaxMessageBytes::try_new(10 * 1024 * 1024).expect("in range"),
            transports: vec![TransportConfig {
                kind: TransportKind::HttpPoll,
                bind_addr: "127.0.0.1:8765".to_string(),
                bearer_token: None,
            }],
            mods: default_mods(),
            task_store_capacity: TaskStoreCapacity::try_new(1_000).expect("in range"),
        }
    }

    /// A larger, externally reachable configuration for production deployment.
    #[must_use]
    pub fn production() -> Self {
        Self {
            name: NetworkName::default(),
            workspace: PathBuf::from("/var/lib/openagents/workspace"),
            heartbeat_interval: HeartbeatIntervalMs::try_new(30_000).expect("in range"),
            heartbeat_timeout_ms: None,
            agent_queue_capacity: QueueCapacity::try_new(10_000).expect("in range"),
            max_message_bytes: MaxMessageBytes::try_new(100 * 1024 * 1024).expect("in range"),
            transports: vec![
                TransportConfig {
                    kind: TransportKind::Streaming,
                    bind_addr: "0.0.0.0:8765".to_string(),
                    bearer_token: None,
                },
                TransportConfig {
                    kind: TransportKind::HttpPoll,
                    bind_addr: "0.0.0.0:8766".to_string(),
                    bearer_token: None,
                },
                TransportConfig {
                    kind: TransportKind::JsonRpc,
                    bind_addr: "0.0.0.0:8767".to_string(),
                    bearer_token: None,
                },
            ],
            mods: default_mods(),
            task_store_capacity: TaskStoreCapacity::try_new(100_000).expect("in range"),
        }
    }

    /// A minimal configuration for test harnesses: tiny capacities, a
    /// tempdir-friendly workspace, and real-delay-free defaults left to the
    /// caller's [`crate::time_provider::TimeProvider`] choice.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            name: NetworkName::try_new("openagents-test").expect("literal is valid"),
            workspace: PathBuf::from("./test-workspace"),
            heartbeat_interval: HeartbeatIntervalMs::try_new(1_000).expect("in range"),
            heartbeat_timeout_ms: None,
            agent_queue_capacity: QueueCapacity::try_new(16).expect("in range"),
            max_message_bytes: MaxMessageBytes::try_new(1024 * 1024).expect("in range"),
            transports: vec![TransportConfig {
                kind: TransportKind::HttpPoll,
                bind_addr: "127.0.0.1:0".to_string(),
                bearer_token: None,
            }],
            mods: Vec::new(),
            task_store_capacity: TaskStoreCapacity::try_new(100).expect("in range"),
        }
    }

    /// Cross-field invariants a per-field newtype cannot express alone.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] on the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transports.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "transports".to_string(),
                reason: "at least one transport must be configured".to_string(),
            });
        }
        if self.heartbeat_timeout_ms() < 2 * self.heartbeat_interval.into_inner() {
            return Err(ConfigError::ValidationError {
                field: "heartbeat_timeout_ms".to_string(),
                reason: "must be at least 2x the heartbeat interval".to_string(),
            });
        }
        if !self.mods.is_empty() && self.workspace.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "workspace".to_string(),
                reason: "a workspace path is required when any mod is configured".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for transport in &self.transports {
            if !seen.insert(transport.kind) {
                return Err(ConfigError::ValidationError {
                    field: "transports".to_string(),
                    reason: format!("duplicate transport kind {:?}", transport.kind),
                });
            }
        }
        Ok(())
    }

    /// Load and validate a [`NetworkConfig`] from a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] on a read failure, [`ConfigError::Serialization`]
    /// on malformed JSON, or [`ConfigError::ValidationError`] if the loaded
    /// config fails [`Self::validate`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to a JSON file, pretty-printed for readability.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] on a write failure or [`ConfigError::Serialization`]
    /// if serialization itself fails (should not happen for a valid config).
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Start building a config from scratch via [`NetworkConfigBuilder`].
    #[must_use]
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::new()
    }
}

/// Fluent builder over [`NetworkConfig`], starting from the development preset.
#[derive(Clone, Debug)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl Default for NetworkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkConfigBuilder {
    /// Start from the development preset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: NetworkConfig::development(),
        }
    }

    /// Set the network name.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] if `name` fails [`NetworkName`]'s validation.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self, ConfigError> {
        self.config.name = NetworkName::try_new(name.into()).map_err(|e| ConfigError::ValidationError {
            field: "name".to_string(),
            reason: e.to_string(),
        })?;
        Ok(self)
    }

    /// Set the workspace root.
    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.config.workspace = workspace.into();
        self
    }

    /// Replace the transport list.
    #[must_use]
    pub fn transports(mut self, transports: Vec<TransportConfig>) -> Self {
        self.config.transports = transports;
        self
    }

    /// Append one mod to the (ordered) mod list.
    #[must_use]
    pub fn add_mod(mut self, id: impl Into<String>, settings: serde_json::Value) -> Self {
        self.config.mods.push(ModConfig {
            id: id.into(),
            settings,
        });
        self
    }

    /// Finalize the builder, validating the resulting config.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] per [`NetworkConfig::validate`].
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_preset_validates() {
        assert!(NetworkConfig::development().validate().is_ok());
    }

    #[test]
    fn production_preset_validates() {
        assert!(NetworkConfig::production().validate().is_ok());
    }

    #[test]
    fn testing_preset_validates() {
        assert!(NetworkConfig::testing().validate().is_ok());
    }

    #[test]
    fn empty_transports_rejected() {
        let mut config = NetworkConfig::testing();
        config.transports.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { field, .. }) if field == "transports"
        ));
    }

    #[test]
    fn duplicate_transport_kind_rejected() {
        let mut config = NetworkConfig::testing();
        config.transports.push(config.transports[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_add_mod_preserves_order() {
        let config = NetworkConfig::builder()
            .add_mod("thread_messaging", serde_json::json!({}))
            .add_mod("shared_document", serde_json::json!({}))
            .build()
            .unwrap();
        assert_eq!(config.mods[0].id, "thread_messaging");
        assert_eq!(config.mods[1].id, "shared_document");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = NetworkConfig::testing();
        config.save_to_file(&path).unwrap();
        let loaded = NetworkConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.name, config.name);
        assert_eq!(loaded.transports.len(), config.transports.len());
    }
}
