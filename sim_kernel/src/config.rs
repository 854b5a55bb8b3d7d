//! Simulation settings of one execution

use core_types::ExecutionIndex;
use crate::audit::DEFAULT_AUDIT_CAPACITY;
use kernel_api::abi::{CONNECT_TIMEOUT_MS, CPU_CORE_NAME_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Execution index {0} out of range")]
    InvalidExecutionIndex(u8),
}

fn default_core_name() -> String {
    "CortexM4".to_string()
}

fn default_connect_timeout() -> u64 {
    CONNECT_TIMEOUT_MS
}

fn default_audit_capacity() -> usize {
    DEFAULT_AUDIT_CAPACITY
}

/// Settings the embedding harness supplies when it creates an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Index of the simulated execution
    pub execution_index: ExecutionIndex,
    /// CPU core the execution pretends to run on
    #[serde(default = "default_core_name")]
    pub cpu_core_name: String,
    /// Service names resolvable by name-based IPC
    #[serde(default)]
    pub services: BTreeMap<String, ExecutionIndex>,
    /// Reconnect window of `send_message`, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Audit records kept before the oldest is evicted
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl SimulationConfig {
    /// Creates the settings of execution `index` with defaults
    pub fn new(index: ExecutionIndex) -> Self {
        Self {
            execution_index: index,
            cpu_core_name: default_core_name(),
            services: BTreeMap::new(),
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }

    /// Sets the CPU core name, keeping at most 15 characters
    pub fn with_cpu_core(mut self, name: &str) -> Self {
        self.cpu_core_name = name.chars().take(CPU_CORE_NAME_LEN).collect();
        self
    }

    /// Registers a service name
    pub fn with_service(mut self, name: &str, index: ExecutionIndex) -> Self {
        self.services.insert(name.to_string(), index);
        self
    }

    /// Sets the reconnect window of `send_message`
    pub fn with_connect_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Sets how many audit records are kept
    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    /// Loads settings from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: SimulationConfig = serde_json::from_str(json)?;
        if !config.execution_index.is_valid() {
            return Err(ConfigError::InvalidExecutionIndex(config.execution_index.as_u8()));
        }
        config.cpu_core_name = config.cpu_core_name.chars().take(CPU_CORE_NAME_LEN).collect();
        Ok(config)
    }

    /// Resolves `Exec<n>` names and registered service names
    pub fn resolve(&self, name: &str) -> Option<ExecutionIndex> {
        if let Some(index) = self.services.get(name) {
            return Some(*index);
        }
        ExecutionIndex::parse_exec_name(name).filter(|index| index.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_applies_defaults() {
        let config = SimulationConfig::from_json(r#"{"execution_index": 2}"#).unwrap();
        assert_eq!(config.execution_index, ExecutionIndex(2));
        assert_eq!(config.cpu_core_name, "CortexM4");
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.audit_capacity, 1024);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_from_json_truncates_core_name() {
        let json = r#"{"execution_index": 0, "cpu_core_name": "AVeryLongCoreNameIndeed"}"#;
        let config = SimulationConfig::from_json(json).unwrap();
        assert_eq!(config.cpu_core_name, "AVeryLongCoreNa");
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            SimulationConfig::from_json("{"),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json(r#"{"execution_index": 16}"#),
            Err(ConfigError::InvalidExecutionIndex(16))
        ));
    }

    #[test]
    fn test_resolve_names() {
        let config = SimulationConfig::new(ExecutionIndex(0)).with_service("sum", ExecutionIndex(3));
        assert_eq!(config.resolve("sum"), Some(ExecutionIndex(3)));
        assert_eq!(config.resolve("Exec5"), Some(ExecutionIndex(5)));
        assert_eq!(config.resolve("Exec16"), None);
        assert_eq!(config.resolve("crypto"), None);
    }
}
