//! Gateway configuration loaded from `.env`.
//!
//! The binary loads `.env` via dotenvy before anything else; this module only
//! reads the process environment. API keys stay on the server side — the call
//! client never sees them.

/// Runtime configuration for the relay gateway.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | GATEWAY_PORT | 8081 | HTTP/WS listen port (loopback only). |
/// | MISTRAL_API_KEY | — | Required for live completion; when absent the gateway runs degraded and chat endpoints answer with the technical-error message. |
/// | MISTRAL_MODEL | mistral-large-latest | Completion model id. |
/// | UPLOADS_DIR | ./uploads | Where medical-image uploads are stored. |
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub port: u16,
    pub mistral_api_key: Option<String>,
    pub mistral_model: String,
    pub uploads_dir: String,
}

impl CoreConfig {
    /// Load from environment. Unset or invalid values fall back to defaults;
    /// the API key stays `None` when absent so callers decide how to fail.
    pub fn from_env() -> Self {
        Self {
            port: env_u16("GATEWAY_PORT", 8081),
            mistral_api_key: env_opt_string("MISTRAL_API_KEY"),
            mistral_model: std::env::var("MISTRAL_MODEL")
                .unwrap_or_else(|_| "mistral-large-latest".to_string()),
            uploads_dir: std::env::var("UPLOADS_DIR").unwrap_or_else(|_| "./uploads".to_string()),
        }
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        std::env::remove_var("GATEWAY_PORT");
        std::env::remove_var("MISTRAL_MODEL");
        let c = CoreConfig::from_env();
        assert_eq!(c.port, 8081);
        assert_eq!(c.mistral_model, "mistral-large-latest");
        assert_eq!(c.uploads_dir, "./uploads");
    }

    #[test]
    fn invalid_port_falls_back() {
        std::env::set_var("GATEWAY_PORT", "not-a-port");
        assert_eq!(env_u16("GATEWAY_PORT", 8081), 8081);
        std::env::remove_var("GATEWAY_PORT");
    }
}
