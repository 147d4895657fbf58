use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Client config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     server_url = "ws://10.0.0.5:8001/chat/ws"
//
//   env var:         COLLOQUY_SERVER_URL=ws://10.0.0.5:8001/chat/ws

/// Tunable client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the chat backend.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Provider used for prompts until the server's list says otherwise.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model override; `None` lets the backend pick its default.
    #[serde(default)]
    pub model: Option<String>,
    /// Page size for `history` requests.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    /// Command channel depth for the client actor.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Event broadcast channel depth.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            provider: default_provider(),
            model: None,
            history_limit: default_history_limit(),
            command_buffer: default_command_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_server_url() -> String {
    "ws://127.0.0.1:8001/chat/ws".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_history_limit() -> u32 {
    50
}

fn default_command_buffer() -> usize {
    32
}

fn default_event_buffer() -> usize {
    128
}

/// Build the config by layering: struct defaults → config.toml →
/// COLLOQUY_* env vars.
pub fn load_config(config_dir: &Path) -> Result<ClientConfig> {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(ClientConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("COLLOQUY_"))
        .extract()
        .context("invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server_url, "ws://127.0.0.1:8001/chat/ws");
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, None);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            r#"
server_url = "ws://example.test/chat/ws"
provider = "mistral"
history_limit = 10
"#,
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server_url, "ws://example.test/chat/ws");
        assert_eq!(config.provider, "mistral");
        assert_eq!(config.history_limit, 10);
        // Untouched fields keep their defaults.
        assert_eq!(config.command_buffer, 32);
    }

    #[test]
    fn env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", "provider = \"mistral\"")?;
            jail.set_env("COLLOQUY_PROVIDER", "anthropic");
            let config = load_config(Path::new(".")).unwrap();
            assert_eq!(config.provider, "anthropic");
            Ok(())
        });
    }
}
