//! dagstore Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use crate::query::MAX_DEPTH;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DagConfig {
    /// Store connection
    pub store: StoreConfig,

    /// Graph location and traversal settings
    pub graph: GraphConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DagConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override every setting whose variable `lookup` resolves
    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // SurrealDB
        if let Some(url) = lookup("SURREALDB_URL") {
            self.store.url = url;
        }
        if let Some(user) = lookup("SURREALDB_USER") {
            self.store.username = user;
        }
        if let Some(pass) = lookup("SURREALDB_PASS") {
            self.store.password = pass;
        }
        if let Some(namespace) = lookup("SURREALDB_NAMESPACE") {
            self.store.namespace = namespace;
        }

        // Graph
        if let Some(database) = lookup("DAG_DATABASE") {
            self.graph.database = database;
        }
        if let Some(name) = lookup("DAG_NAME") {
            self.graph.name = name;
        }
        if let Some(depth) = lookup("DAG_MAX_DEPTH") {
            self.graph.max_depth = depth.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DAG_MAX_DEPTH".to_string(),
                value: depth,
            })?;
        }
        if let Some(flag) = lookup("DAG_QUERY_LOGGING") {
            self.graph.query_logging = parse_flag("DAG_QUERY_LOGGING", flag)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(flag) = lookup("LOG_JSON") {
            self.logging.json_format = parse_flag("LOG_JSON", flag)?;
        }

        Ok(self)
    }

    /// Check that the settings needed to open a graph are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.url.is_empty() {
            return Err(ConfigError::MissingRequired("store.url".to_string()));
        }
        if self.graph.database.is_empty() {
            return Err(ConfigError::MissingRequired("graph.database".to_string()));
        }
        let named = self.graph.vertex_collection.is_some() && self.graph.edge_collection.is_some();
        if self.graph.name.is_empty() && !named {
            return Err(ConfigError::MissingRequired("graph.name".to_string()));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SurrealDB WebSocket URL
    pub url: String,

    /// SurrealDB username
    pub username: String,

    /// SurrealDB password
    pub password: String,

    /// SurrealDB namespace
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000".to_string(),
            username: "root".to_string(),
            password: "root".to_string(),
            namespace: "dagstore".to_string(),
        }
    }
}

/// Graph location and traversal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Database holding the graph
    pub database: String,

    /// Graph name, used to derive collection names
    pub name: String,

    /// Explicit vertex collection name (defaults to `v_<name>`)
    pub vertex_collection: Option<String>,

    /// Explicit edge collection name (defaults to `e_<name>`)
    pub edge_collection: Option<String>,

    /// Depth bound for ancestor and descendant traversals
    pub max_depth: u32,

    /// Log every query with its bound parameters
    pub query_logging: bool,
}

impl GraphConfig {
    pub fn vertex_collection(&self) -> String {
        self.vertex_collection
            .clone()
            .unwrap_or_else(|| format!("v_{}", self.name))
    }

    pub fn edge_collection(&self) -> String {
        self.edge_collection
            .clone()
            .unwrap_or_else(|| format!("e_{}", self.name))
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            database: "dagstore".to_string(),
            name: "dag".to_string(),
            vertex_collection: None,
            edge_collection: None,
            max_depth: MAX_DEPTH,
            query_logging: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DagConfig::default();
        assert_eq!(config.store.url, "ws://localhost:8000");
        assert_eq!(config.graph.max_depth, 10_000);
        assert!(!config.graph.query_logging);
    }

    #[test]
    fn test_validate_requires_graph_name() {
        let mut config = DagConfig::default();
        assert!(config.validate().is_ok());

        config.graph.name.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(field)) if field == "graph.name"
        ));

        config.graph.vertex_collection = Some("nodes".to_string());
        config.graph.edge_collection = Some("links".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collection_names_derive_from_graph_name() {
        let mut graph = GraphConfig {
            name: "tasks".to_string(),
            ..Default::default()
        };
        assert_eq!(graph.vertex_collection(), "v_tasks");
        assert_eq!(graph.edge_collection(), "e_tasks");

        graph.edge_collection = Some("links".to_string());
        assert_eq!(graph.edge_collection(), "links");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = DagConfig::from_toml_str(
            r#"
            [graph]
            database = "builds"
            name = "deps"
            query_logging = true

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.graph.database, "builds");
        assert_eq!(config.graph.vertex_collection(), "v_deps");
        assert!(config.graph.query_logging);
        assert_eq!(config.graph.max_depth, MAX_DEPTH);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.store.namespace, "dagstore");
    }

    #[test]
    fn test_env_overrides_file_settings() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("DAG_QUERY_LOGGING", "off"),
            ("LOG_JSON", "true"),
            ("DAG_NAME", "dag"),
        ]
        .into();
        let mut config = DagConfig::default();
        config.graph.query_logging = true;
        config.graph.name = "deps".to_string();

        let config = config
            .apply_vars(|key| vars.get(key).map(|value| value.to_string()))
            .unwrap();
        assert!(!config.graph.query_logging);
        assert!(config.logging.json_format);
        // a variable equal to the default still wins over the file
        assert_eq!(config.graph.name, "dag");
        assert_eq!(config.store.url, "ws://localhost:8000");
    }

    #[test]
    fn test_invalid_depth_variable() {
        let err = DagConfig::default()
            .apply_vars(|key| (key == "DAG_MAX_DEPTH").then(|| "deep".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "DAG_MAX_DEPTH"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "TRUE".to_string()).unwrap());
        assert!(!parse_flag("X", "off".to_string()).unwrap());
        assert!(matches!(
            parse_flag("X", "maybe".to_string()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = DagConfig::from_file("/nonexistent/dagstore.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
