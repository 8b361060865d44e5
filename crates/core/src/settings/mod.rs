//! Typed per-transformer settings and their resolution against a config store.
//!
//! A transformer owns a [`SettingList`]. Resolution starts from the backend's
//! default [`BackendSettings`], then walks the list in its sorted order: each
//! persisted string is read (or seeded from the default when missing),
//! deserialized, and applied to the settings object.

mod store;

pub use store::{ConfigStore, MemoryConfigStore, StoreError};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("setting '{param}' is registered twice on {owner}")]
    DuplicateParam { owner: String, param: String },
    #[error("setting param must not be empty")]
    EmptyParam,
    #[error("default for setting '{param}' is invalid: {reason}")]
    InvalidDefault { param: String, reason: String },
    #[error("config store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("'{0}' is not a boolean")]
    NotBoolean(String),
    #[error("'{0}' is not an integer")]
    NotInteger(String),
    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("'{0}' is not one of on/off/default")]
    NotTriState(String),
}

/// Three-way switch; `Default` defers to the backend's own behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    On,
    Off,
    Default,
}

impl TriState {
    pub fn as_str(self) -> &'static str {
        match self {
            TriState::On => "on",
            TriState::Off => "off",
            TriState::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Tri(TriState),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Int(i) => write!(f, "{i}"),
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Tri(t) => f.write_str(t.as_str()),
        }
    }
}

/// Value type of a setting, with the constraints the UI needs to edit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SettingKind {
    Boolean,
    Integer { min: i64, max: i64, step: i64 },
    Text,
    TriState,
}

impl SettingKind {
    pub fn serialize(&self, value: &SettingValue) -> String {
        value.to_string()
    }

    pub fn deserialize(&self, raw: &str) -> Result<SettingValue, ValueError> {
        match self {
            SettingKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(SettingValue::Bool(true)),
                "false" => Ok(SettingValue::Bool(false)),
                _ => Err(ValueError::NotBoolean(raw.to_string())),
            },
            SettingKind::Integer { min, max, .. } => {
                let value: i64 =
                    raw.trim().parse().map_err(|_| ValueError::NotInteger(raw.to_string()))?;
                if value < *min || value > *max {
                    return Err(ValueError::OutOfRange { value, min: *min, max: *max });
                }
                Ok(SettingValue::Int(value))
            }
            SettingKind::Text => Ok(SettingValue::Text(raw.to_string())),
            SettingKind::TriState => match raw.trim().to_ascii_lowercase().as_str() {
                "on" => Ok(SettingValue::Tri(TriState::On)),
                "off" => Ok(SettingValue::Tri(TriState::Off)),
                "default" => Ok(SettingValue::Tri(TriState::Default)),
                _ => Err(ValueError::NotTriState(raw.to_string())),
            },
        }
    }

    fn accepts(&self, value: &SettingValue) -> Result<(), String> {
        match (self, value) {
            (SettingKind::Boolean, SettingValue::Bool(_))
            | (SettingKind::Text, SettingValue::Text(_))
            | (SettingKind::TriState, SettingValue::Tri(_)) => Ok(()),
            (SettingKind::Integer { min, max, step }, SettingValue::Int(v)) => {
                if min > max || *step <= 0 {
                    Err(format!("bad integer bounds {min}..={max} step {step}"))
                } else if v < min || v > max {
                    Err(format!("{v} is outside {min}..={max}"))
                } else {
                    Ok(())
                }
            }
            (kind, value) => Err(format!("{value:?} does not match {kind:?}")),
        }
    }
}

/// Mutable, backend-specific settings object that resolved settings are applied to.
///
/// Backends read typed values back by param; external-tool backends mostly
/// care about `args`, which settings append command-line flags to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendSettings {
    values: BTreeMap<String, SettingValue>,
    args: Vec<String>,
}

impl BackendSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { values: BTreeMap::new(), args: args.into_iter().map(Into::into).collect() }
    }

    pub fn set(&mut self, param: impl Into<String>, value: SettingValue) {
        self.values.insert(param.into(), value);
    }

    pub fn get(&self, param: &str) -> Option<&SettingValue> {
        self.values.get(param)
    }

    pub fn bool(&self, param: &str) -> Option<bool> {
        match self.values.get(param) {
            Some(SettingValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn int(&self, param: &str) -> Option<i64> {
        match self.values.get(param) {
            Some(SettingValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn text(&self, param: &str) -> Option<&str> {
        match self.values.get(param) {
            Some(SettingValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn tri(&self, param: &str) -> Option<TriState> {
        match self.values.get(param) {
            Some(SettingValue::Tri(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn push_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

pub type ApplyFn = Arc<dyn Fn(&mut BackendSettings, &SettingValue) + Send + Sync>;

/// One named, typed configuration datum of a transformer.
#[derive(Clone)]
pub struct Setting {
    param: String,
    desc: String,
    kind: SettingKind,
    default: SettingValue,
    apply: ApplyFn,
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("param", &self.param)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl Setting {
    /// Build a setting whose apply step records the value under its param.
    pub fn new(
        param: impl Into<String>,
        desc: impl Into<String>,
        kind: SettingKind,
        default: SettingValue,
    ) -> Self {
        let param = param.into();
        let key = param.clone();
        Self {
            param,
            desc: desc.into(),
            kind,
            default,
            apply: Arc::new(move |settings, value| settings.set(key.clone(), value.clone())),
        }
    }

    pub fn boolean(param: impl Into<String>, desc: impl Into<String>, default: bool) -> Self {
        Self::new(param, desc, SettingKind::Boolean, SettingValue::Bool(default))
    }

    pub fn integer(
        param: impl Into<String>,
        desc: impl Into<String>,
        default: i64,
        min: i64,
        max: i64,
        step: i64,
    ) -> Self {
        Self::new(param, desc, SettingKind::Integer { min, max, step }, SettingValue::Int(default))
    }

    pub fn text(param: impl Into<String>, desc: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(param, desc, SettingKind::Text, SettingValue::Text(default.into()))
    }

    pub fn tri_state(param: impl Into<String>, desc: impl Into<String>, default: TriState) -> Self {
        Self::new(param, desc, SettingKind::TriState, SettingValue::Tri(default))
    }

    /// Replace the apply step. The value is still recorded under the param first.
    pub fn with_apply<F>(mut self, apply: F) -> Self
    where
        F: Fn(&mut BackendSettings, &SettingValue) + Send + Sync + 'static,
    {
        let key = self.param.clone();
        self.apply = Arc::new(move |settings, value| {
            settings.set(key.clone(), value.clone());
            apply(settings, value);
        });
        self
    }

    /// Convenience apply step for tools taking `--param value` style flags.
    pub fn as_flag(self, flag: impl Into<String>) -> Self {
        let flag = flag.into();
        self.with_apply(move |settings, value| {
            if let SettingValue::Tri(TriState::Default) = value {
                return;
            }
            settings.push_arg(flag.clone());
            settings.push_arg(value.to_string());
        })
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn kind(&self) -> SettingKind {
        self.kind
    }

    pub fn default_value(&self) -> &SettingValue {
        &self.default
    }

    pub fn serialize(&self, value: &SettingValue) -> String {
        self.kind.serialize(value)
    }

    pub fn deserialize(&self, raw: &str) -> Result<SettingValue, ValueError> {
        self.kind.deserialize(raw)
    }

    pub fn apply(&self, settings: &mut BackendSettings, value: &SettingValue) {
        (self.apply)(settings, value)
    }
}

/// Ordered settings of one transformer, kept sorted by param (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct SettingList {
    settings: Vec<Setting>,
}

impl SettingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a setting and re-sort; params must be unique within the list.
    pub fn register(&mut self, owner: &str, setting: Setting) -> Result<(), SettingsError> {
        if setting.param.is_empty() {
            return Err(SettingsError::EmptyParam);
        }
        if self.get(&setting.param).is_some() {
            return Err(SettingsError::DuplicateParam {
                owner: owner.to_string(),
                param: setting.param.clone(),
            });
        }
        setting.kind.accepts(&setting.default).map_err(|reason| {
            SettingsError::InvalidDefault { param: setting.param.clone(), reason }
        })?;
        self.settings.push(setting);
        self.settings.sort_by_key(|s| s.param.to_lowercase());
        Ok(())
    }

    pub fn get(&self, param: &str) -> Option<&Setting> {
        self.settings.iter().find(|s| s.param == param)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Setting> {
        self.settings.iter()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Resolve every setting against `store`, applying onto `defaults`.
    ///
    /// Missing keys are seeded with the serialized default; unreadable stored
    /// values are overwritten with the default as well.
    pub fn resolve(
        &self,
        owner_id: &str,
        defaults: BackendSettings,
        store: &dyn ConfigStore,
    ) -> Result<BackendSettings, SettingsError> {
        let mut settings = defaults;
        for setting in &self.settings {
            let raw = match store.get(owner_id, &setting.param)? {
                Some(raw) => raw,
                None => {
                    let seeded = setting.serialize(&setting.default);
                    store.put(owner_id, &setting.param, &seeded)?;
                    tracing::debug!(transformer = owner_id, param = %setting.param, value = %seeded, "seeded default setting");
                    seeded
                }
            };
            let value = match setting.deserialize(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(transformer = owner_id, param = %setting.param, error = %e, "resetting unreadable setting to default");
                    store.put(owner_id, &setting.param, &setting.serialize(&setting.default))?;
                    setting.default.clone()
                }
            };
            setting.apply(&mut settings, &value);
        }
        Ok(settings)
    }

    /// Persist a user-supplied raw value after validating it.
    pub fn update(
        &self,
        owner_id: &str,
        param: &str,
        raw: &str,
        store: &dyn ConfigStore,
    ) -> Result<SettingValue, UpdateError> {
        let setting =
            self.get(param).ok_or_else(|| UpdateError::UnknownParam(param.to_string()))?;
        let value = setting.deserialize(raw)?;
        store
            .put(owner_id, param, &setting.serialize(&value))
            .map_err(|e| UpdateError::Settings(e.into()))?;
        Ok(value)
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("unknown setting '{0}'")]
    UnknownParam(String),
    #[error("invalid value: {0}")]
    Value(#[from] ValueError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
