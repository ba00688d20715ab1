use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&content)?;
        Ok(parsed)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            gateway: GatewayConfig {
                host: "0.0.0.0".to_string(),
                port: 9090,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.http.port > 0);
        assert!(config.gateway.port > 0);
        assert_ne!(config.http.port, config.gateway.port);
    }

    #[test]
    fn parse_toml_config() {
        let toml = r#"
[http]
host = "127.0.0.1"
port = 8081

[gateway]
host = "127.0.0.1"
port = 9091
"#;

        let config: ServerConfig = toml::from_str(toml).expect("valid server config");
        assert_eq!(config.http.port, 8081);
        assert_eq!(config.gateway.host, "127.0.0.1");
    }
}
