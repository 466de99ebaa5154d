//! # Pitter-Patter Configuration Module
//!
//! This module provides configuration management for the player, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use ppconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Access configuration values
//! let lookahead = config.get_prefetch_lookahead()?;
//! let cache_dir = config.get_audio_cache_dir()?;
//!
//! // Update configuration values
//! config.set_continuous_playback(true)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("ppconfig.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load Pitter-Patter configuration"));
}

const ENV_CONFIG_DIR: &str = "PITTER_CONFIG";
const ENV_PREFIX: &str = "PITTER_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pitter";

// Default values for configuration
const DEFAULT_LOOP_COUNT: usize = 1;
const DEFAULT_PREFETCH_LOOKAHEAD: usize = 2;
const DEFAULT_AUTOSAVE_INTERVAL_SECS: usize = 5;
const DEFAULT_FETCH_TIMEOUT_SECS: usize = 30;
const DEFAULT_CONTINUOUS_PLAYBACK: bool = false;
const DEFAULT_MIRROR_ENABLED: bool = false;
const DEFAULT_RATE: f64 = 0.75;
const DEFAULT_LEGACY_RATE: f64 = 1.0;
const DEFAULT_CACHE_POLICY: &str = "cache_on_play";
const DEFAULT_LOCAL_BASE: &str = "audio";
const DEFAULT_INDEX_CURRENT: &str = "audio/index.json";
const DEFAULT_INDEX_LEGACY: &str = "audio/index-old.json";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => Ok(n.as_u64().unwrap_or_default() as usize),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for f64 values with default
///
/// Integers are accepted too, so `legacy_rate: 1` reads as `1.0`.
macro_rules! impl_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<f64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_f64().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for the player
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// # Examples
///
/// ```no_run
/// use ppconfig::get_config;
///
/// let config = get_config();
/// let loops = config.get_loop_count().unwrap();
/// println!("Default loop count: {}", loops);
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

// Implémentation manuelle de Clone
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap_or_else(|p| p.into_inner()).clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("Configuration lock poisoned"))
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("Le chemin spécifié n'est pas un répertoire"));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        // Test read permission
        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PITTER_CONFIG` environment variable
    /// 3. `.pitter` in the current directory
    /// 4. `.pitter` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file=%path, "Loaded config file");
            data
        } else {
            info!(config_file=%path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Merger avec la config par défaut
        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Returns the directory the configuration was loaded from
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.lock_data()?;
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["player", "loop_count"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.lock_data()?;
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data()?;
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif ou absolu par rapport au répertoire de configuration
    pub fn resolve_path(&self, path: &str) -> String {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_string_lossy().to_string()
        } else {
            Path::new(&self.config_dir).join(p).to_string_lossy().to_string()
        }
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let absolute_path = self.resolve_path(dir_path);

        if !Path::new(&absolute_path).exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory=%absolute_path, "Created managed directory");
        }

        Ok(absolute_path)
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de configuration.
    /// Il sera créé s'il n'existe pas.
    ///
    /// # Arguments
    ///
    /// * `path` - Chemin dans l'arbre de configuration (ex: `&["host", "audio_cache", "directory"]`)
    /// * `default` - Nom de répertoire par défaut si non configuré
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Définit un répertoire géré par la configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    /// Répertoire du cache audio persistant
    pub fn get_audio_cache_dir(&self) -> Result<String> {
        self.get_managed_dir(&["host", "audio_cache", "directory"], "cache_audio")
    }

    /// Répertoire de la base d'état (session, temps d'écoute)
    pub fn get_state_dir(&self) -> Result<String> {
        self.get_managed_dir(&["host", "state", "directory"], "state")
    }

    /// Chemin absolu de l'index courant
    pub fn get_index_path(&self) -> Result<String> {
        Ok(self.resolve_path(&self.get_index_current()?))
    }

    /// Chemin absolu de l'index historique, s'il est configuré
    pub fn get_legacy_index_path(&self) -> Result<Option<String>> {
        let legacy = self.get_index_legacy()?;
        if legacy.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.resolve_path(&legacy)))
    }

    impl_usize_config!(
        get_loop_count,
        set_loop_count,
        &["player", "loop_count"],
        DEFAULT_LOOP_COUNT
    );

    impl_usize_config!(
        get_prefetch_lookahead,
        set_prefetch_lookahead,
        &["player", "prefetch_lookahead"],
        DEFAULT_PREFETCH_LOOKAHEAD
    );

    impl_usize_config!(
        get_autosave_interval_secs,
        set_autosave_interval_secs,
        &["player", "autosave_interval_secs"],
        DEFAULT_AUTOSAVE_INTERVAL_SECS
    );

    impl_usize_config!(
        get_fetch_timeout_secs,
        set_fetch_timeout_secs,
        &["sources", "fetch_timeout_secs"],
        DEFAULT_FETCH_TIMEOUT_SECS
    );

    impl_bool_config!(
        get_continuous_playback,
        set_continuous_playback,
        &["player", "continuous_playback"],
        DEFAULT_CONTINUOUS_PLAYBACK
    );

    impl_bool_config!(
        get_mirror_enabled,
        set_mirror_enabled,
        &["sources", "mirror", "enabled"],
        DEFAULT_MIRROR_ENABLED
    );

    impl_f64_config!(
        get_default_rate,
        set_default_rate,
        &["player", "speed", "default_rate"],
        DEFAULT_RATE
    );

    impl_f64_config!(
        get_legacy_rate,
        set_legacy_rate,
        &["player", "speed", "legacy_rate"],
        DEFAULT_LEGACY_RATE
    );

    impl_string_config!(
        get_cache_policy,
        set_cache_policy,
        &["player", "cache_policy"],
        DEFAULT_CACHE_POLICY
    );

    impl_string_config!(
        get_local_base,
        set_local_base,
        &["sources", "local_base"],
        DEFAULT_LOCAL_BASE
    );

    impl_string_config!(
        get_mirror_raw_base,
        set_mirror_raw_base,
        &["sources", "mirror", "raw_base"],
        ""
    );

    impl_string_config!(
        get_mirror_api_base,
        set_mirror_api_base,
        &["sources", "mirror", "api_base"],
        ""
    );

    impl_string_config!(
        get_index_current,
        set_index_current,
        &["index", "current"],
        DEFAULT_INDEX_CURRENT
    );

    impl_string_config!(
        get_index_legacy,
        set_index_legacy,
        &["index", "legacy"],
        DEFAULT_INDEX_LEGACY
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );
}

/// Returns the global configuration instance
///
/// This function provides access to the singleton configuration instance,
/// which is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}
