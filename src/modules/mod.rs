//! Built-in feature modules.

pub mod aicweb;
pub mod avatar;
pub mod redirect;

use std::sync::Arc;

use crate::module_registry::{ModuleRegistry, RegistryError};

/// Registry holding every module compiled into this binary.
pub fn builtin_registry() -> Result<ModuleRegistry, RegistryError> {
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(redirect::RedirectModule::new()))?;
    registry.register(Arc::new(avatar::AvatarModule::new()))?;
    registry.register(Arc::new(aicweb::AicwebModule::new()))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_under_lowercase_names() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.names(), vec!["aicweb", "avatar", "redirect"]);
        assert_eq!(registry.get("AICWEB").unwrap().default_prefix(), "/api/aicweb");
        assert!(registry.get("redirect").unwrap().default_enabled());
    }
}
