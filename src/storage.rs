use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::warn;

use crate::dates::{DEFAULT_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS};

pub const CONFIG_SECTION: &str = "toggl_plugin";
pub const TOKEN_KEY: &str = "api_token";
pub const LOOKBACK_KEY: &str = "lookback_days";
const TOKEN_ENV: &str = "TOGGL_API_TOKEN";

/// Section-scoped key/value persistence supplied by the host.
pub trait ConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<String>;
    fn set(&mut self, section: &str, key: &str, value: &str) -> Result<(), io::Error>;
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Pretty-printed JSON file of `{section: {key: value}}`.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    sections: Sections,
}

impl JsonConfigStore {
    pub fn open_default() -> Result<Self, io::Error> {
        let path = default_config_path()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Config directory not found"))?;
        Self::open(path)
    }

    pub fn open(path: PathBuf) -> Result<Self, io::Error> {
        let sections = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Sections::new(),
            Err(err) => return Err(err),
        };
        Ok(Self { path, sections })
    }

    fn write(&self) -> Result<(), io::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.sections)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        fs::write(&self.path, json)
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section)?.get(key).cloned()
    }

    fn set(&mut self, section: &str, key: &str, value: &str) -> Result<(), io::Error> {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.write()
    }
}

fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("tomate-toggl");
    path.push("config.json");
    Some(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub token: Option<String>,
    pub lookback_days: u32,
}

impl Settings {
    pub fn load(store: &dyn ConfigStore) -> Self {
        Self::resolve(store, Self::env_token())
    }

    pub fn env_token() -> Option<String> {
        env::var(TOKEN_ENV).ok()
    }

    /// Like [`Settings::load`] with the environment token passed in.
    pub fn resolve(store: &dyn ConfigStore, env_token: Option<String>) -> Self {
        let token = env_token
            .filter(|value| !value.trim().is_empty())
            .or_else(|| store.get(CONFIG_SECTION, TOKEN_KEY))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let lookback_days = store
            .get(CONFIG_SECTION, LOOKBACK_KEY)
            .map(|raw| parse_lookback_days(&raw))
            .unwrap_or(DEFAULT_LOOKBACK_DAYS);
        Self {
            token,
            lookback_days,
        }
    }
}

pub fn write_token(store: &mut dyn ConfigStore, token: &str) -> Result<(), io::Error> {
    store.set(CONFIG_SECTION, TOKEN_KEY, token)
}

pub fn write_lookback_days(store: &mut dyn ConfigStore, days: u32) -> Result<(), io::Error> {
    if days > MAX_LOOKBACK_DAYS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Lookback must be between 0 and {MAX_LOOKBACK_DAYS} days."),
        ));
    }
    store.set(CONFIG_SECTION, LOOKBACK_KEY, &days.to_string())
}

fn parse_lookback_days(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(days) if days <= MAX_LOOKBACK_DAYS => days,
        _ => {
            warn!(value = raw, "ignoring invalid lookback setting");
            DEFAULT_LOOKBACK_DAYS
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug, Default)]
    pub struct MemoryStore {
        values: HashMap<(String, String), String>,
    }

    impl MemoryStore {
        pub fn with_token(token: &str) -> Self {
            let mut store = Self::default();
            write_token(&mut store, token).unwrap();
            store
        }
    }

    impl ConfigStore for MemoryStore {
        fn get(&self, section: &str, key: &str) -> Option<String> {
            self.values
                .get(&(section.to_string(), key.to_string()))
                .cloned()
        }

        fn set(&mut self, section: &str, key: &str, value: &str) -> Result<(), io::Error> {
            self.values
                .insert((section.to_string(), key.to_string()), value.to_string());
            Ok(())
        }
    }
}
