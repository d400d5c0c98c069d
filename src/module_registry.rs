// module_registry.rs - Feature module contract and the registry that holds them

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::server::Server;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("module already registered: {0}")]
    Duplicate(String),
    #[error("module name must not be empty")]
    EmptyName,
}

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("module {module} is not configured: {message}")]
    Config { module: String, message: String },
    #[error("module {module} storage failed: {message}")]
    Storage { module: String, message: String },
    #[error("prefix {prefix} is already mounted")]
    PrefixConflict { prefix: String },
    #[error("prefix {prefix} rejected by the router: {reason}")]
    InvalidPrefix { prefix: String, reason: String },
    #[error("module {module} failed: {message}")]
    Other { module: String, message: String },
}

impl ModuleError {
    pub fn config(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn storage(module: impl Into<String>, message: impl ToString) -> Self {
        Self::Storage {
            module: module.into(),
            message: message.to_string(),
        }
    }

    pub fn other(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            module: module.into(),
            message: message.into(),
        }
    }
}

/// A pluggable unit of HTTP functionality.
///
/// Implementors carry no shared base state. The orchestrator calls
/// [`FeatureModule::init_env`] and then [`FeatureModule::mount`] at most once per
/// process run, and only when the module resolves as enabled.
pub trait FeatureModule: Send + Sync {
    /// Unique, case-insensitive name. Also the stem of the `<name>_ENABLED`
    /// and `<name>_PREFIX` overrides.
    fn name(&self) -> &str;

    /// Mount path used when no override applies.
    fn default_prefix(&self) -> &str;

    /// Activation state when neither `MODULES` nor `MODULES_DISABLE` mention the module.
    fn default_enabled(&self) -> bool;

    /// Load module-local configuration. Idempotent; failures are the module's
    /// own business and are never reported to the caller.
    fn init_env(&self);

    /// Attach the module's handlers to `server` under `prefix`, which is
    /// already normalized to a single leading slash.
    fn mount(&self, server: &mut Server, prefix: &str) -> Result<(), ModuleError>;
}

/// Registry of feature modules keyed by lowercase name.
///
/// Built once in the composition root and read-only afterwards.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn FeatureModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its lowercase name.
    ///
    /// A second registration under the same normalized name is rejected and
    /// the first entry is kept.
    pub fn register(&mut self, module: Arc<dyn FeatureModule>) -> Result<(), RegistryError> {
        let name = normalize_name(module.name());
        if name.is_empty() {
            warn!("refusing to register a module without a name");
            return Err(RegistryError::EmptyName);
        }
        if self.modules.contains_key(&name) {
            warn!(module = %name, "duplicate register");
            return Err(RegistryError::Duplicate(name));
        }
        info!(module = %name, "registered module");
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FeatureModule>> {
        self.modules.get(&normalize_name(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(&normalize_name(name))
    }

    /// Registered names in ascending lexical order.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every hook invocation so tests can assert call order.
    pub struct StubModule {
        pub name: String,
        pub prefix: String,
        pub enabled: bool,
        pub fail_mount: bool,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl StubModule {
        pub fn new(name: &str, prefix: &str, calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                prefix: prefix.to_string(),
                enabled: true,
                fail_mount: false,
                calls,
            }
        }
    }

    impl FeatureModule for StubModule {
        fn name(&self) -> &str {
            &self.name
        }

        fn default_prefix(&self) -> &str {
            &self.prefix
        }

        fn default_enabled(&self) -> bool {
            self.enabled
        }

        fn init_env(&self) {
            self.calls.lock().unwrap().push(format!("init:{}", self.name));
        }

        fn mount(&self, _server: &mut Server, prefix: &str) -> Result<(), ModuleError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("mount:{}@{}", self.name, prefix));
            if self.fail_mount {
                return Err(ModuleError::other(&self.name, "stub failure"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubModule;
    use super::*;
    use std::sync::Mutex;

    fn stub(name: &str) -> Arc<dyn FeatureModule> {
        Arc::new(StubModule::new(name, "/x", Arc::new(Mutex::new(Vec::new()))))
    }

    #[test]
    fn lookup_ignores_case() {
        let mut registry = ModuleRegistry::new();
        registry.register(stub("Redirect")).unwrap();

        assert!(registry.get("REDIRECT").is_some());
        assert!(registry.get("redirect").is_some());
        assert_eq!(registry.get("rEdIrEcT").unwrap().name(), "Redirect");
        assert!(registry.get("avatar").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ModuleRegistry::new();
        for name in ["redirect", "Avatar", "aicweb"] {
            registry.register(stub(name)).unwrap();
        }
        assert_eq!(registry.names(), vec!["aicweb", "avatar", "redirect"]);
    }

    #[test]
    fn duplicate_registration_is_rejected_and_first_wins() {
        let mut registry = ModuleRegistry::new();
        let first = Arc::new(StubModule::new("avatar", "/first", Arc::default()));
        let second = Arc::new(StubModule::new("AVATAR", "/second", Arc::default()));

        registry.register(first).unwrap();
        let err = registry.register(second).unwrap_err();

        assert!(matches!(err, RegistryError::Duplicate(ref n) if n == "avatar"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("avatar").unwrap().default_prefix(), "/first");
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut registry = ModuleRegistry::new();
        assert!(matches!(
            registry.register(stub("  ")),
            Err(RegistryError::EmptyName)
        ));
        assert!(registry.is_empty());
    }
}
