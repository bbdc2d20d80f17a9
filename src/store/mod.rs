use crate::codec::WireEncoding;
use crate::protocol::EventSubscription;
use crate::state::{ConnectionParams, Scheme};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

const KEY_SCHEME: &str = "obs.scheme";
const KEY_HOST: &str = "obs.host";
const KEY_PORT: &str = "obs.port";
const KEY_PASSWORD: &str = "obs.password";
const KEY_ENCODING: &str = "obs.encoding";
const KEY_EVENT_SUBSCRIPTIONS: &str = "obs.event_subscriptions";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is not valid json: {0}")]
    Format(#[from] serde_json::Error),
    #[error("missing store key: {0}")]
    MissingKey(String),
    #[error("store value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Where connection parameters live between runs.
pub trait ConnectionStore: Send + Sync {
    fn load(&self) -> Result<Option<ConnectionParams>, StoreError>;
    fn save(&self, params: &ConnectionParams) -> Result<(), StoreError>;
}

/// JSON file of key to base64 value.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<StoreEntries>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreEntries {
    entries: HashMap<String, String>,
}

impl FileStore {
    pub fn new(path: Option<&str>) -> Result<Self, StoreError> {
        let path = match path {
            Some(p) => PathBuf::from(p),
            None => default_store_path(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreEntries::default()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        entries
            .entries
            .insert(key.to_string(), general_purpose::STANDARD.encode(value));
        persist(&self.path, &entries)
    }

    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        let entries = self.lock();
        let encoded = entries
            .entries
            .get(key)
            .ok_or_else(|| StoreError::MissingKey(key.to_string()))?;
        decode_value(key, encoded)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if entries.entries.remove(key).is_some() {
            persist(&self.path, &entries)?;
        }
        Ok(())
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lookup(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::MissingKey(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreEntries> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ConnectionStore for FileStore {
    fn load(&self) -> Result<Option<ConnectionParams>, StoreError> {
        let Some(host) = self.lookup(KEY_HOST)? else {
            return Ok(None);
        };
        let mut params = ConnectionParams::new(host, ConnectionParams::default().port);
        if let Some(port) = self.lookup(KEY_PORT)? {
            params.port = parse_value(KEY_PORT, &port)?;
        }
        if let Some(scheme) = self.lookup(KEY_SCHEME)? {
            params.scheme = parse_value::<Scheme>(KEY_SCHEME, &scheme)?;
        }
        if let Some(encoding) = self.lookup(KEY_ENCODING)? {
            params.encoding = parse_value::<WireEncoding>(KEY_ENCODING, &encoding)?;
        }
        if let Some(mask) = self.lookup(KEY_EVENT_SUBSCRIPTIONS)? {
            params.event_subscriptions =
                EventSubscription::from_bits(parse_value(KEY_EVENT_SUBSCRIPTIONS, &mask)?);
        }
        params.password = self.lookup(KEY_PASSWORD)?.filter(|p| !p.is_empty());
        Ok(Some(params))
    }

    fn save(&self, params: &ConnectionParams) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if params.password.is_none() {
            entries.entries.remove(KEY_PASSWORD);
        }
        let mut put = |key: &str, value: &str| {
            entries
                .entries
                .insert(key.to_string(), general_purpose::STANDARD.encode(value));
        };
        put(KEY_SCHEME, params.scheme.as_str());
        put(KEY_HOST, &params.host);
        put(KEY_PORT, &params.port.to_string());
        put(KEY_ENCODING, params.encoding.as_str());
        put(
            KEY_EVENT_SUBSCRIPTIONS,
            &params.event_subscriptions.bits().to_string(),
        );
        if let Some(password) = params.password.as_deref() {
            put(KEY_PASSWORD, password);
        }
        persist(&self.path, &entries)
    }
}

/// Store that never touches disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    params: Mutex<Option<ConnectionParams>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionStore for MemoryStore {
    fn load(&self) -> Result<Option<ConnectionParams>, StoreError> {
        Ok(self
            .params
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, params: &ConnectionParams) -> Result<(), StoreError> {
        *self
            .params
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(params.clone());
        Ok(())
    }
}

fn persist(path: &Path, entries: &StoreEntries) -> Result<(), StoreError> {
    let data = serde_json::to_string_pretty(entries)?;
    fs::write(path, data)?;
    Ok(())
}

fn decode_value(key: &str, encoded: &str) -> Result<String, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| corrupt(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| corrupt(err.to_string()))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|err: T::Err| StoreError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn default_store_path() -> PathBuf {
    let base = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
    Path::new(&base).join("ObsWebSocketBridge").join("store.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "obsws-store-{}-{}",
            name,
            uuid::Uuid::new_v4()
        ));
        dir.join("store.json")
    }

    #[test]
    fn values_round_trip_through_the_file() {
        let path = temp_store_path("kv");
        let store = FileStore::new(path.to_str()).unwrap();
        store.set("obs_password", "s3cret").unwrap();

        let reopened = FileStore::new(path.to_str()).unwrap();
        assert_eq!(reopened.get("obs_password").unwrap(), "s3cret");
        assert_eq!(reopened.list_keys(), vec!["obs_password".to_string()]);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn connection_params_round_trip() {
        let path = temp_store_path("params");
        let store = FileStore::new(path.to_str()).unwrap();
        assert!(store.load().unwrap().is_none());

        let mut params = ConnectionParams::new("studio.lan", 4460)
            .with_password("pw")
            .with_encoding(WireEncoding::MsgPack)
            .with_event_subscriptions(EventSubscription::SCENES | EventSubscription::OUTPUTS);
        params.scheme = Scheme::Wss;
        store.save(&params).unwrap();

        let reopened = FileStore::new(path.to_str()).unwrap();
        assert_eq!(reopened.load().unwrap(), Some(params.clone()));

        params.password = None;
        reopened.save(&params).unwrap();
        assert_eq!(reopened.load().unwrap().unwrap().password, None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_key_is_reported() {
        let path = temp_store_path("missing");
        let store = FileStore::new(path.to_str()).unwrap();
        assert!(matches!(store.get("nope"), Err(StoreError::MissingKey(_))));
    }

    #[test]
    fn corrupt_port_is_rejected() {
        let path = temp_store_path("corrupt");
        let store = FileStore::new(path.to_str()).unwrap();
        store.set(KEY_HOST, "localhost").unwrap();
        store.set(KEY_PORT, "not-a-port").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
