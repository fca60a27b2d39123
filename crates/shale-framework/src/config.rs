//! Layered, section-based configuration.
//!
//! Two TOML documents are layered: the built-in default document and an
//! optional user file. An explicit setting in the user file wins; otherwise
//! the default applies; otherwise the key is absent. A key or section
//! present only in the user file is warned about but never fatal.
//!
//! Reading rules: values parse to the requested type; `bool` additionally
//! accepts `true/false/yes/no/1/0` case-insensitively; path values resolve
//! relative to an optional base path.

use std::path::{Path, PathBuf};

use thiserror::Error;
use toml::value::Table;
use toml::Value;

/// Error raised by configuration loading or typed lookups.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot parse configuration: {0}")]
    Parse(String),

    #[error("value of {key} is '{value}', which can not be converted to {requested}")]
    TypeMismatch {
        key: String,
        value: String,
        requested: &'static str,
    },
}

/// The whole configuration: user layer over a default layer.
pub struct Configuration {
    user: Table,
    defaults: Table,
    file_path: Option<PathBuf>,
    base_path: Option<PathBuf>,
}

impl Configuration {
    /// Parse from in-memory documents. `default_document` may be empty for
    /// test purposes.
    pub fn from_str(content: &str, default_document: &str) -> Result<Self, ConfigError> {
        let defaults: Table = parse_document(default_document)?;
        let user: Table = parse_document(content)?;
        let configuration = Configuration {
            user,
            defaults,
            file_path: None,
            base_path: None,
        };
        configuration.warn_unknown_entries();
        Ok(configuration)
    }

    /// Load from a file path, falling back to defaults only when the file
    /// does not exist.
    pub fn from_file(path: &Path, default_document: &str) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "configuration file not found, using defaults only");
            let mut configuration = Self::from_str("", default_document)?;
            configuration.file_path = Some(path.to_path_buf());
            return Ok(configuration);
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        let mut configuration = Self::from_str(&content, default_document)?;
        configuration.file_path = Some(path.to_path_buf());
        Ok(configuration)
    }

    /// Look up a section by name.
    ///
    /// Sections are defined by the default document; a name absent from it
    /// is reported and yields none.
    pub fn section(&self, name: &str) -> Option<Section<'_>> {
        let defaults = match self.defaults.get(name) {
            Some(Value::Table(table)) => Some(table),
            _ => None,
        };
        if defaults.is_none() && self.defaults.len() > 0 {
            tracing::error!(section = name, "section not found in the configuration");
            return None;
        }
        let user = match self.user.get(name) {
            Some(Value::Table(table)) => Some(table),
            _ => None,
        };
        Some(Section {
            name: name.to_string(),
            user,
            defaults,
            base_path: self.base_path.as_deref(),
        })
    }

    /// Override a property in the user layer.
    ///
    /// Returns true if a new property was added, false when an existing
    /// value was updated.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> bool {
        let table = self
            .user
            .entry(section.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(table) = table {
            table
                .insert(key.to_string(), Value::String(value.to_string()))
                .is_none()
        } else {
            false
        }
    }

    /// Base directory used to resolve relative path values.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn set_base_path(&mut self, path: PathBuf) {
        self.base_path = Some(path);
    }

    /// Directory of the configuration file, if one was given.
    pub fn directory(&self) -> Option<PathBuf> {
        self.file_path
            .as_ref()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
    }

    // A property or section declared only by the user file is suspicious
    // but kept: warn and continue.
    fn warn_unknown_entries(&self) {
        if self.defaults.is_empty() {
            return;
        }
        for (section_name, section_value) in &self.user {
            let Some(Value::Table(default_section)) = self.defaults.get(section_name) else {
                tracing::warn!(
                    section = %section_name,
                    "section is not in the default configuration"
                );
                continue;
            };
            if let Value::Table(user_section) = section_value {
                for key in user_section.keys() {
                    if !default_section.contains_key(key) {
                        tracing::warn!(
                            section = %section_name,
                            property = %key,
                            "property is not in the default configuration"
                        );
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("sections", &self.defaults.keys().collect::<Vec<_>>())
            .field("file", &self.file_path)
            .finish()
    }
}

fn parse_document(document: &str) -> Result<Table, ConfigError> {
    if document.trim().is_empty() {
        return Ok(Table::new());
    }
    document
        .parse::<Table>()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// One configuration section, layered user-over-default.
pub struct Section<'a> {
    name: String,
    user: Option<&'a Table>,
    defaults: Option<&'a Table>,
    base_path: Option<&'a Path>,
}

impl Section<'_> {
    /// Read a typed property.
    ///
    /// Returns `Ok(None)` when the key is absent from both layers or its
    /// value is empty; `Err` when a present value cannot convert to `T`.
    pub fn get<T: FromConfigValue>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        for layer in [self.user, self.defaults].into_iter().flatten() {
            if let Some(value) = layer.get(key) {
                if value_is_empty(value) {
                    return Ok(None);
                }
                return T::from_config_value(value)
                    .map(Some)
                    .map_err(|requested| ConfigError::TypeMismatch {
                        key: format!("{}.{}", self.name, key),
                        value: display_value(value),
                        requested,
                    });
            }
        }
        Ok(None)
    }

    /// Read a path property, resolving relative values against the base
    /// path when one is set.
    pub fn get_path(&self, key: &str) -> Result<Option<PathBuf>, ConfigError> {
        let Some(raw) = self.get::<PathBuf>(key)? else {
            return Ok(None);
        };
        if raw.is_relative() {
            if let Some(base) = self.base_path {
                return Ok(Some(base.join(raw)));
            }
        }
        Ok(Some(raw))
    }
}

fn value_is_empty(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Conversion from a configuration value into a requested type.
pub trait FromConfigValue: Sized {
    /// Convert, reporting the requested type name on mismatch.
    fn from_config_value(value: &Value) -> Result<Self, &'static str>;
}

impl FromConfigValue for String {
    fn from_config_value(value: &Value) -> Result<Self, &'static str> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Ok(display_value(other)),
        }
    }
}

impl FromConfigValue for bool {
    fn from_config_value(value: &Value) -> Result<Self, &'static str> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Integer(1) => Ok(true),
            Value::Integer(0) => Ok(false),
            Value::String(s) => {
                let lowered = s.to_ascii_lowercase();
                match lowered.as_str() {
                    "true" | "yes" | "1" => Ok(true),
                    "false" | "no" | "0" => Ok(false),
                    _ => Err("bool"),
                }
            }
            _ => Err("bool"),
        }
    }
}

impl FromConfigValue for PathBuf {
    fn from_config_value(value: &Value) -> Result<Self, &'static str> {
        match value {
            Value::String(s) => Ok(PathBuf::from(s)),
            _ => Err("path"),
        }
    }
}

macro_rules! integer_from_config_value {
    ($($ty:ty),*) => {
        $(
            impl FromConfigValue for $ty {
                fn from_config_value(value: &Value) -> Result<Self, &'static str> {
                    match value {
                        Value::Integer(i) => <$ty>::try_from(*i).map_err(|_| stringify!($ty)),
                        Value::String(s) => s.parse::<$ty>().map_err(|_| stringify!($ty)),
                        _ => Err(stringify!($ty)),
                    }
                }
            }
        )*
    };
}

integer_from_config_value!(u8, u16, u32, u64, usize, i32, i64);

impl FromConfigValue for f64 {
    fn from_config_value(value: &Value) -> Result<Self, &'static str> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            Value::String(s) => s.parse::<f64>().map_err(|_| "f64"),
            _ => Err("f64"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const DEFAULTS: &str = r#"
[stream_endpoint]
enabled = true
port = 12345
threads = 104

[ipc_endpoint]
database_name = "shale"
threads = 104
datachannel_buffer_size = 64
max_datachannel_buffers = 16
admin_sessions = 1

[system]
pid_directory = "/tmp"
"#;

    #[test]
    fn test_explicit_setting_wins_over_default() {
        let cfg = Configuration::from_str(
            "[stream_endpoint]\nport = 54321\n",
            DEFAULTS,
        )
        .unwrap();
        let section = cfg.section("stream_endpoint").unwrap();
        assert_eq!(section.get::<u16>("port").unwrap(), Some(54321));
        // untouched keys fall back to the default layer
        assert_eq!(section.get::<u32>("threads").unwrap(), Some(104));
    }

    #[test]
    fn test_absent_key_is_none() {
        let cfg = Configuration::from_str("", DEFAULTS).unwrap();
        let section = cfg.section("system").unwrap();
        assert_eq!(section.get::<String>("no_such_key").unwrap(), None);
    }

    #[test]
    fn test_unknown_section_yields_none() {
        let cfg = Configuration::from_str("", DEFAULTS).unwrap();
        assert!(cfg.section("no_such_section").is_none());
    }

    #[test]
    fn test_bool_accepts_word_forms() {
        let doc = "[stream_endpoint]\nenabled = \"YES\"\n";
        let cfg = Configuration::from_str(doc, DEFAULTS).unwrap();
        let section = cfg.section("stream_endpoint").unwrap();
        assert_eq!(section.get::<bool>("enabled").unwrap(), Some(true));

        let doc = "[stream_endpoint]\nenabled = \"no\"\n";
        let cfg = Configuration::from_str(doc, DEFAULTS).unwrap();
        let section = cfg.section("stream_endpoint").unwrap();
        assert_eq!(section.get::<bool>("enabled").unwrap(), Some(false));

        let doc = "[stream_endpoint]\nenabled = 0\n";
        let cfg = Configuration::from_str(doc, DEFAULTS).unwrap();
        let section = cfg.section("stream_endpoint").unwrap();
        assert_eq!(section.get::<bool>("enabled").unwrap(), Some(false));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let doc = "[stream_endpoint]\nport = \"eighty\"\n";
        let cfg = Configuration::from_str(doc, DEFAULTS).unwrap();
        let section = cfg.section("stream_endpoint").unwrap();
        let err = section.get::<u16>("port").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }

    #[test]
    fn test_empty_value_is_none() {
        let doc = "[ipc_endpoint]\ndatabase_name = \"\"\n";
        let cfg = Configuration::from_str(doc, DEFAULTS).unwrap();
        let section = cfg.section("ipc_endpoint").unwrap();
        assert_eq!(section.get::<String>("database_name").unwrap(), None);
    }

    #[test]
    fn test_unknown_key_is_warned_not_fatal() {
        let doc = "[stream_endpoint]\nmystery_knob = 3\n";
        let cfg = Configuration::from_str(doc, DEFAULTS).unwrap();
        // still loads and serves other keys
        let section = cfg.section("stream_endpoint").unwrap();
        assert_eq!(section.get::<u16>("port").unwrap(), Some(12345));
    }

    #[test]
    fn test_set_overrides_in_user_layer() {
        let mut cfg = Configuration::from_str("", DEFAULTS).unwrap();
        assert!(cfg.set("stream_endpoint", "port", "9999"));
        let section = cfg.section("stream_endpoint").unwrap();
        assert_eq!(section.get::<u16>("port").unwrap(), Some(9999));
        // second set updates in place
        assert!(!cfg.set("stream_endpoint", "port", "8888"));
    }

    #[test]
    fn test_path_resolution_against_base() {
        let mut cfg = Configuration::from_str(
            "[system]\npid_directory = \"run\"\n",
            DEFAULTS,
        )
        .unwrap();
        cfg.set_base_path(PathBuf::from("/var/lib/shale"));
        let section = cfg.section("system").unwrap();
        assert_eq!(
            section.get_path("pid_directory").unwrap(),
            Some(PathBuf::from("/var/lib/shale/run"))
        );
    }

    #[test]
    fn test_missing_file_uses_defaults_only() {
        let cfg =
            Configuration::from_file(Path::new("/nonexistent/shale.conf"), DEFAULTS).unwrap();
        let section = cfg.section("ipc_endpoint").unwrap();
        assert_eq!(
            section.get::<String>("database_name").unwrap(),
            Some("shale".to_string())
        );
    }

    #[test]
    fn test_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ipc_endpoint]").unwrap();
        writeln!(file, "database_name = \"custom\"").unwrap();
        file.flush().unwrap();
        let cfg = Configuration::from_file(file.path(), DEFAULTS).unwrap();
        let section = cfg.section("ipc_endpoint").unwrap();
        assert_eq!(
            section.get::<String>("database_name").unwrap(),
            Some("custom".to_string())
        );
        assert!(cfg.directory().is_some());
    }

    #[test]
    fn test_empty_defaults_serves_user_sections() {
        // default document may be empty for test purposes
        let cfg = Configuration::from_str("[anything]\nkey = 1\n", "").unwrap();
        let section = cfg.section("anything").unwrap();
        assert_eq!(section.get::<u32>("key").unwrap(), Some(1));
    }
}
