use crate::codec::WireEncoding;
use crate::protocol::EventSubscription;
use crate::state::{ConnectionParams, Scheme};
use crate::store::FileStore;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "OBSWS_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub obs: ObsConfig,
    pub engine: EngineConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObsConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Store key holding the obs-websocket password.
    pub password_key: Option<String>,
    pub encoding: String,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4455,
            password_key: None,
            encoding: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub handshake_timeout_ms: u64,
    pub event_subscriptions: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            event_subscriptions: EventSubscription::ALL.bits(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring unreadable config file");
                }
            }
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        // OBS settings
        if let Ok(val) = env::var(format!("{}OBS_SCHEME", ENV_PREFIX)) {
            self.obs.scheme = val;
        }
        if let Ok(val) = env::var(format!("{}OBS_HOST", ENV_PREFIX)) {
            self.obs.host = val;
        }
        if let Ok(val) = env::var(format!("{}OBS_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.obs.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}OBS_PASSWORD_KEY", ENV_PREFIX)) {
            self.obs.password_key = Some(val);
        }
        if let Ok(val) = env::var(format!("{}OBS_ENCODING", ENV_PREFIX)) {
            self.obs.encoding = val;
        }

        // Engine settings
        if let Ok(val) = env::var(format!("{}HANDSHAKE_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(timeout) = val.parse() {
                self.engine.handshake_timeout_ms = timeout;
            }
        }
        if let Ok(val) = env::var(format!("{}EVENT_SUBSCRIPTIONS", ENV_PREFIX)) {
            if let Ok(mask) = val.parse() {
                self.engine.event_subscriptions = mask;
            }
        }

        // Store settings
        if let Ok(val) = env::var(format!("{}STORE_PATH", ENV_PREFIX)) {
            self.store.path = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.obs.port == 0 {
            return Err("obs.port must be non-zero".into());
        }
        if self.obs.host.trim().is_empty() {
            return Err("obs.host must be set".into());
        }
        if self.obs.scheme.parse::<Scheme>().is_err() {
            return Err(format!("obs.scheme must be ws or wss, got {:?}", self.obs.scheme).into());
        }
        if self.obs.encoding.parse::<WireEncoding>().is_err() {
            return Err(format!(
                "obs.encoding must be json or msgpack, got {:?}",
                self.obs.encoding
            )
            .into());
        }
        if self.engine.handshake_timeout_ms < 100 {
            return Err("engine.handshake_timeout_ms must be >= 100".into());
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.handshake_timeout_ms)
    }

    /// Connection parameters described by this config. The password, if
    /// any, is read from `store` under `obs.password_key`.
    pub fn connection_params(
        &self,
        store: &FileStore,
    ) -> Result<ConnectionParams, Box<dyn std::error::Error>> {
        let mut params = ConnectionParams::new(self.obs.host.trim(), self.obs.port)
            .with_encoding(self.obs.encoding.parse()?)
            .with_event_subscriptions(EventSubscription::from_bits(
                self.engine.event_subscriptions,
            ));
        params.scheme = self.obs.scheme.parse()?;
        if let Some(key) = self.obs.password_key.as_deref() {
            let password = store.get(key)?;
            let password = password.trim();
            if !password.is_empty() {
                params = params.with_password(password);
            }
        }
        Ok(params)
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = active_config_path();
        self.validate()?;
        let data = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
    Path::new(&appdata)
        .join("ObsWebSocketBridge")
        .join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        parsed.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[obs]\nport = 4460\n").unwrap();
        assert_eq!(parsed.obs.port, 4460);
        assert_eq!(parsed.obs.host, "127.0.0.1");
        assert_eq!(parsed.engine.handshake_timeout_ms, 10_000);
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.obs.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_scheme_and_encoding() {
        let mut cfg = Config::default();
        cfg.obs.scheme = "http".to_string();
        assert!(cfg.validate().is_err());

        cfg.obs.scheme = "wss".to_string();
        cfg.obs.encoding = "xml".to_string();
        assert!(cfg.validate().is_err());

        cfg.obs.encoding = "msgpack".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_too_short_handshake_timeout() {
        let mut cfg = Config::default();
        cfg.engine.handshake_timeout_ms = 50;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_on_top_of_file_values() {
        env::set_var("OBSWS_OBS_HOST", "studio.lan");
        env::set_var("OBSWS_OBS_PORT", "4460");
        env::set_var("OBSWS_HANDSHAKE_TIMEOUT_MS", "not-a-number");

        let mut cfg = Config::default();
        cfg.apply_env_overrides();

        env::remove_var("OBSWS_OBS_HOST");
        env::remove_var("OBSWS_OBS_PORT");
        env::remove_var("OBSWS_HANDSHAKE_TIMEOUT_MS");

        assert_eq!(cfg.obs.host, "studio.lan");
        assert_eq!(cfg.obs.port, 4460);
        assert_eq!(cfg.engine.handshake_timeout_ms, 10_000);
    }

    #[test]
    fn connection_params_read_password_from_store() {
        let dir = std::env::temp_dir().join(format!("obsws-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("store.json");
        let store = FileStore::new(path.to_str()).unwrap();
        store.set("obs_password", " hunter2 \n").unwrap();

        let mut cfg = Config::default();
        cfg.obs.scheme = "wss".to_string();
        cfg.obs.encoding = "msgpack".to_string();
        cfg.obs.password_key = Some("obs_password".to_string());
        cfg.engine.event_subscriptions = EventSubscription::SCENES.bits();

        let params = cfg.connection_params(&store).unwrap();
        assert_eq!(params.url(), "wss://127.0.0.1:4455");
        assert_eq!(params.encoding, WireEncoding::MsgPack);
        assert_eq!(params.password.as_deref(), Some("hunter2"));
        assert_eq!(params.event_subscriptions, EventSubscription::SCENES);

        cfg.obs.password_key = Some("missing".to_string());
        assert!(cfg.connection_params(&store).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
