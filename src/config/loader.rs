//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, LoadError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Semantic checks serde cannot express.
fn validate(config: &ProxyConfig) -> Result<(), LoadError> {
    for (name, ep) in &config.entry_points {
        if ep.address.parse::<std::net::SocketAddr>().is_err() {
            return Err(LoadError::Validation(format!(
                "entry point \"{name}\" has an invalid address {:?}",
                ep.address
            )));
        }
    }
    for (name, router) in &config.dynamic.routers {
        if router.rule.is_empty() {
            return Err(LoadError::Validation(format!(
                "router \"{name}\" has an empty rule"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_snapshot() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [entry_points.web]
            address = "127.0.0.1:8080"

            [routers.app]
            rule = "Host(`foo.bar`)"
            service = "app"

            [services.app.load_balancer]
            servers = [{ url = "http://127.0.0.1:3000" }]
            "#,
        )
        .unwrap();

        assert!(validate(&config).is_ok());
        assert_eq!(config.dynamic.routers["app"].service, "app");
        let lb = config.dynamic.services["app"].load_balancer.as_ref().unwrap();
        assert_eq!(lb.servers.len(), 1);
        assert_eq!(lb.servers[0].weight, 1);
        assert!(lb.pass_host_header);
    }

    #[test]
    fn rejects_empty_rules() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [routers.broken]
            service = "app"
            "#,
        )
        .unwrap();
        assert!(matches!(validate(&config), Err(LoadError::Validation(_))));
    }
}
