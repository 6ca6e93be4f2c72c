//! Listener configuration.

/// Webhook listener configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Path the recorder posts to, always with a leading `/`
    pub webhook_path: String,
    /// Shared secret expected in `X-Webhook-Token`
    pub webhook_token: Option<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Expose `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            webhook_path: "/webhook/livestreamdvr".to_string(),
            webhook_token: None,
            max_body_size: 1024 * 1024, // 1MB
            metrics_enabled: false,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("WEBHOOK_HOST")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.host),
            port: std::env::var("WEBHOOK_PORT")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            webhook_path: std::env::var("WEBHOOK_PATH")
                .map(|p| normalize_path(&p))
                .unwrap_or(defaults.webhook_path),
            webhook_token: std::env::var("WEBHOOK_TOKEN")
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            max_body_size: std::env::var("WEBHOOK_MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        }
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Ensure a leading `/`.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("hook"), "/hook");
        assert_eq!(normalize_path(" /hook "), "/hook");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("WEBHOOK_PORT", "9100");
        std::env::set_var("WEBHOOK_PATH", "dvr");
        std::env::set_var("WEBHOOK_TOKEN", "  ");
        std::env::set_var("METRICS_ENABLED", "yes");

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 9100);
        assert_eq!(config.webhook_path, "/dvr");
        assert!(config.webhook_token.is_none());
        assert!(config.metrics_enabled);
        assert_eq!(config.bind_address(), "127.0.0.1:9100");

        for key in ["WEBHOOK_PORT", "WEBHOOK_PATH", "WEBHOOK_TOKEN", "METRICS_ENABLED"] {
            std::env::remove_var(key);
        }
    }
}
