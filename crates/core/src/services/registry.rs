use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::classfile;
use crate::model::{Capability, TransformOutput};
use crate::process::ProcessError;
use crate::services::dispatcher::Classpath;
use crate::services::scheduler::CancellationToken;
use crate::settings::{BackendSettings, Setting, SettingList, SettingsError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate transformer {field} '{value}'")]
    DuplicateIdentity { field: &'static str, value: String },
    #[error("invalid transformer id '{0}' (use lowercase letters, digits, '-', '.', '_')")]
    InvalidId(String),
    #[error("transformer name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{tool} is not configured (set {hint})")]
    ToolNotConfigured { tool: String, hint: String },
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

/// Everything a backend receives for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// Canonical name of the member; successful output is keyed by it.
    pub name: &'a str,
    /// Path of the member inside its artifact.
    pub member: &'a str,
    pub input: &'a [u8],
    pub classpath: &'a Classpath,
    pub settings: &'a BackendSettings,
}

/// Implemented by transformation backends (external tools or in-process).
pub trait Backend: Send + Sync {
    /// Settings object resolution starts from.
    fn default_settings(&self) -> BackendSettings {
        BackendSettings::new()
    }

    /// Check that `input` is something this backend can work on.
    fn accepts(&self, capability: Capability, input: &[u8]) -> Result<(), String> {
        default_validation(capability, input)
    }

    fn transform(
        &self,
        request: &TransformRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, BackendError>;
}

/// Validation shared by every backend that does not override `accepts`.
pub fn default_validation(capability: Capability, input: &[u8]) -> Result<(), String> {
    match capability {
        Capability::Decompiler | Capability::Disassembler => classfile::probe(input)
            .map(|_| ())
            .map_err(|_| format!("Could not {} - are you sure that's a class file?", capability.verb())),
        _ if input.is_empty() => Err(format!("Could not {} - the entry is empty", capability.verb())),
        _ => Ok(()),
    }
}

/// Validation for backends consuming dex files.
pub fn dex_validation(capability: Capability, input: &[u8]) -> Result<(), String> {
    if classfile::is_dex(input) {
        Ok(())
    } else {
        Err(format!("Could not {} - are you sure that's a dex file?", capability.verb()))
    }
}

/// A registered backend with its identity and settings.
///
/// Identity is by registry slot: two transformers never compare equal unless
/// they are the same registered instance.
pub struct Transformer {
    id: String,
    name: String,
    capability: Capability,
    settings: SettingList,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("settings", &self.settings.len())
            .finish()
    }
}

impl PartialEq for Transformer {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Transformer {}

impl Transformer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capability: Capability,
        backend: impl Backend + 'static,
    ) -> Result<Self, RegistryError> {
        let id = id.into();
        let name = name.into();
        if !is_valid_slug(&id) {
            return Err(RegistryError::InvalidId(id));
        }
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        Ok(Self { id, name, capability, settings: SettingList::new(), backend: Arc::new(backend) })
    }

    /// Register one setting; duplicates within the transformer are rejected.
    pub fn with_setting(mut self, setting: Setting) -> Result<Self, RegistryError> {
        self.settings.register(&self.id, setting)?;
        Ok(self)
    }

    pub fn with_settings<I>(self, settings: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Setting>,
    {
        settings.into_iter().try_fold(self, Transformer::with_setting)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn settings(&self) -> &SettingList {
        &self.settings
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    pub fn validate(&self, input: &[u8]) -> Result<(), String> {
        self.backend.accepts(self.capability, input)
    }
}

fn is_valid_slug(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'))
}

/// Catalog of transformers in registration order.
///
/// Built once at startup; share it behind an `Arc` afterwards.
#[derive(Debug, Default)]
pub struct TransformerRegistry {
    transformers: Vec<Arc<Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transformer: Transformer) -> Result<Arc<Transformer>, RegistryError> {
        if self.get_by_id(&transformer.id).is_some() {
            return Err(RegistryError::DuplicateIdentity { field: "id", value: transformer.id });
        }
        if self.get_by_name(&transformer.name).is_some() {
            return Err(RegistryError::DuplicateIdentity { field: "name", value: transformer.name });
        }
        tracing::debug!(id = %transformer.id, capability = %transformer.capability, "registered transformer");
        let transformer = Arc::new(transformer);
        self.transformers.push(Arc::clone(&transformer));
        Ok(transformer)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Arc<Transformer>> {
        self.transformers.iter().find(|t| t.id == id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<Transformer>> {
        self.transformers.iter().find(|t| t.name == name)
    }

    /// Lazy filtered view in registration order; clone the iterator to restart it.
    pub fn all<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Arc<Transformer>> + Clone + 'a
    where
        P: Fn(&Transformer) -> bool + Clone + 'a,
    {
        self.transformers.iter().filter(move |t| predicate(t))
    }

    pub fn with_capability(
        &self,
        capabilities: &[Capability],
    ) -> impl Iterator<Item = &Arc<Transformer>> + Clone + '_ {
        let wanted = capabilities.to_vec();
        self.all(move |t| wanted.contains(&t.capability))
    }

    /// First registered transformer of a capability (stable across runs).
    pub fn first(&self, capability: Capability) -> Option<&Arc<Transformer>> {
        self.transformers.iter().find(|t| t.capability == capability)
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransformPayload;

    struct Echo;

    impl Backend for Echo {
        fn transform(
            &self,
            request: &TransformRequest<'_>,
            _cancel: &CancellationToken,
        ) -> Result<TransformOutput, BackendError> {
            Ok(TransformOutput::single(request.name, TransformPayload::Bytes(request.input.to_vec())))
        }
    }

    #[test]
    fn slugs_are_validated() {
        assert!(Transformer::new("cfr-0.152", "CFR", Capability::Decompiler, Echo).is_ok());
        assert!(matches!(
            Transformer::new("CFR", "CFR", Capability::Decompiler, Echo),
            Err(RegistryError::InvalidId(_))
        ));
        assert!(matches!(
            Transformer::new("", "x", Capability::Decompiler, Echo),
            Err(RegistryError::InvalidId(_))
        ));
        assert!(matches!(
            Transformer::new("x", "  ", Capability::Decompiler, Echo),
            Err(RegistryError::EmptyName)
        ));
    }

    #[test]
    fn identity_is_by_slot() {
        let a = Transformer::new("same", "Same", Capability::Viewer, Echo).unwrap();
        let b = Transformer::new("same", "Same", Capability::Viewer, Echo).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn filtered_view_is_restartable() {
        let mut registry = TransformerRegistry::new();
        registry.register(Transformer::new("a", "A", Capability::Decompiler, Echo).unwrap()).unwrap();
        registry.register(Transformer::new("b", "B", Capability::Viewer, Echo).unwrap()).unwrap();
        registry.register(Transformer::new("c", "C", Capability::Disassembler, Echo).unwrap()).unwrap();

        let view = registry.with_capability(&[Capability::Decompiler, Capability::Disassembler]);
        let first: Vec<&str> = view.clone().map(|t| t.id()).collect();
        let second: Vec<&str> = view.map(|t| t.id()).collect();
        assert_eq!(first, vec!["a", "c"]);
        assert_eq!(first, second);
        assert_eq!(registry.first(Capability::Viewer).map(|t| t.id()), Some("b"));
    }

    #[test]
    fn default_validation_messages() {
        assert_eq!(
            default_validation(Capability::Decompiler, b"nope").unwrap_err(),
            "Could not decompile - are you sure that's a class file?"
        );
        assert_eq!(
            default_validation(Capability::Disassembler, b"nope").unwrap_err(),
            "Could not disassemble - are you sure that's a class file?"
        );
        assert_eq!(
            dex_validation(Capability::Disassembler, b"nope").unwrap_err(),
            "Could not disassemble - are you sure that's a dex file?"
        );
        assert!(default_validation(Capability::Viewer, b"anything").is_ok());
        assert!(default_validation(Capability::Assembler, b"").is_err());
    }
}
