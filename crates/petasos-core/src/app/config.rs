//! Node configuration.
//!
//! Every section defaults sensibly, so `{}` is a valid standalone config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ClusterMode, NodeAddress, ServiceName, SystemMode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PetasosConfig {
    pub node: NodeConfig,
    pub rpc: RpcConfig,
    pub drain: DrainConfig,
    pub collector: CollectorConfig,
}

/// Identity of this node in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub service_name: String,
    pub address: String,
    pub cluster_mode: ClusterMode,
    pub system_mode: SystemMode,
    /// Service whose first member owns execution grants in clustered mode.
    /// Defaults to this node's own service.
    pub arbiter_service: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_name: "petasos".to_string(),
            address: "petasos-0".to_string(),
            cluster_mode: ClusterMode::Standalone,
            system_mode: SystemMode::Standalone,
            arbiter_service: None,
        }
    }
}

impl NodeConfig {
    pub fn service_name(&self) -> ServiceName {
        ServiceName::new(self.service_name.clone())
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.address.clone())
    }

    pub fn arbiter_service(&self) -> ServiceName {
        match &self.arbiter_service {
            Some(name) => ServiceName::new(name.clone()),
            None => self.service_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Upper bound on one remote call.
    pub call_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
        }
    }
}

impl RpcConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Audit drain tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Queue bound; also the largest batch sent in one call.
    pub capacity: usize,
    /// Delay before the first flush cycle.
    pub initial_delay_ms: u64,
    /// Time between flush cycles.
    pub period_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            initial_delay_ms: 30_000,
            period_ms: 5_000,
        }
    }
}

impl DrainConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Service name the audit/metrics collector advertises.
    pub service_name: String,
    /// Reported as `provider_name` with every audit batch.
    pub provider_name: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            service_name: "petasos.collector".to_string(),
            provider_name: "petasos".to_string(),
        }
    }
}

impl CollectorConfig {
    pub fn service_name(&self) -> ServiceName {
        ServiceName::new(self.service_name.clone())
    }
}

impl PetasosConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("node.service_name is empty".into()));
        }
        if self.node.address.trim().is_empty() {
            return Err(ConfigError::Invalid("node.address is empty".into()));
        }
        if self.collector.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("collector.service_name is empty".into()));
        }
        if self.rpc.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc.call_timeout_ms must be > 0".into()));
        }
        if self.drain.capacity == 0 {
            return Err(ConfigError::Invalid("drain.capacity must be > 0".into()));
        }
        if self.drain.period_ms == 0 {
            return Err(ConfigError::Invalid("drain.period_ms must be > 0".into()));
        }
        if self.node.cluster_mode == ClusterMode::Standalone
            && self.node.system_mode != SystemMode::Standalone
        {
            return Err(ConfigError::Invalid(format!(
                "node.system_mode {:?} requires node.cluster_mode CLUSTERED",
                self.node.system_mode
            )));
        }
        Ok(())
    }
}
