//! Config-merge precedence: defaults <- optional YAML file <- environment
//! variables.

use nbase_common::config::DatabaseConfig;
use std::path::Path;

pub const ENV_DB_PATH: &str = "NBASE_DB_PATH";
pub const ENV_PORT: &str = "NBASE_PORT";
pub const ENV_HOST: &str = "NBASE_HOST";
pub const ENV_NODE_ENV: &str = "NODE_ENV";

/// Resolved network binding, separate from `DatabaseConfig` since the
/// database core never looks at host/port; that's purely a server concern.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub host: String,
    pub port: u16,
    pub verbose_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            verbose_errors: false,
        }
    }
}

/// Build the merged config: start from defaults, overlay an optional YAML
/// file at `config_path`, then overlay environment variables.
pub fn load(config_path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Some(path) = config_path {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let file_database: DatabaseConfig = serde_yaml::from_str(&contents)?;
            config.database = file_database;
        }
    }

    if let Ok(db_path) = std::env::var(ENV_DB_PATH) {
        config.database.persistence.db_path = db_path;
    }
    if let Ok(port) = std::env::var(ENV_PORT) {
        config.port = port.parse()?;
    }
    if let Ok(host) = std::env::var(ENV_HOST) {
        config.host = host;
    }
    if let Ok(node_env) = std::env::var(ENV_NODE_ENV) {
        config.verbose_errors = node_env != "production";
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_file_and_no_env() {
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_PORT);
        std::env::remove_var(ENV_HOST);
        std::env::remove_var(ENV_NODE_ENV);
        let config = load(None).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn env_vars_override_defaults() {
        std::env::set_var(ENV_DB_PATH, "/tmp/custom-db");
        std::env::set_var(ENV_PORT, "9090");
        let config = load(None).unwrap();
        assert_eq!(config.database.persistence.db_path, "/tmp/custom-db");
        assert_eq!(config.port, 9090);
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_PORT);
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        std::fs::write(&file_path, "persistence:\n  db_path: \"/from/file\"\n").unwrap();
        std::env::remove_var(ENV_DB_PATH);
        let from_file = load(Some(&file_path)).unwrap();
        assert_eq!(from_file.database.persistence.db_path, "/from/file");

        std::env::set_var(ENV_DB_PATH, "/from/env");
        let from_env = load(Some(&file_path)).unwrap();
        assert_eq!(from_env.database.persistence.db_path, "/from/env");
        std::env::remove_var(ENV_DB_PATH);
    }
}
