//! Mount orchestration.
//!
//! [`plan`] turns the registry and a snapshot of overrides into an ordered
//! [`ActivationPlan`]; [`mount_all`] executes it against a [`Server`]. Module
//! failures are logged and recorded in the [`MountReport`], never propagated.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::module_registry::{FeatureModule, ModuleRegistry};
use crate::module_resolve::{resolve_enabled, resolve_order, resolve_prefix, EnvSource, MountOverrides, ProcessEnv};
use crate::server::Server;

/// One module scheduled for activation.
#[derive(Clone)]
pub struct PlannedModule {
    pub name: String,
    pub prefix: String,
    pub module: Arc<dyn FeatureModule>,
}

impl std::fmt::Debug for PlannedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedModule")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Ordered activation plan for one orchestrator run.
#[derive(Debug, Default, Clone)]
pub struct ActivationPlan {
    pub entries: Vec<PlannedModule>,
    /// Modules in the order that resolved as disabled.
    pub disabled: Vec<String>,
}

impl ActivationPlan {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountedModule {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedModule {
    pub name: String,
    pub prefix: String,
    pub error: String,
}

/// What happened during [`mount_all`]. Diagnostic only.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MountReport {
    pub mounted: Vec<MountedModule>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedModule>,
}

/// Resolve which modules run, in what order, under which prefix.
pub fn plan(registry: &ModuleRegistry, overrides: &MountOverrides) -> ActivationPlan {
    let mut plan = ActivationPlan::default();
    let allow = overrides.allow_list.as_deref();

    for name in resolve_order(registry, allow) {
        let Some(module) = registry.get(&name) else {
            continue;
        };
        let ov = overrides.for_module(&name);

        let enabled = resolve_enabled(
            &name,
            module.default_enabled(),
            allow,
            &overrides.deny_set,
            ov.enabled.as_deref(),
        );
        if !enabled {
            plan.disabled.push(name);
            continue;
        }

        let prefix = resolve_prefix(
            module.default_prefix(),
            overrides.root_prefix.as_deref(),
            ov.prefix.as_deref(),
        );
        plan.entries.push(PlannedModule { name, prefix, module });
    }
    plan
}

/// Mount every enabled module, reading overrides from the process environment.
pub fn mount_all(registry: &ModuleRegistry, server: &mut Server) -> MountReport {
    mount_all_with(registry, server, &ProcessEnv)
}

/// Mount every enabled module, reading overrides from `env` exactly once.
pub fn mount_all_with(registry: &ModuleRegistry, server: &mut Server, env: &impl EnvSource) -> MountReport {
    let mut report = MountReport::default();
    if registry.is_empty() {
        info!("no modules registered");
        return report;
    }

    let overrides = MountOverrides::capture(env, registry);
    let plan = plan(registry, &overrides);

    for name in plan.disabled {
        info!(module = %name, "skip (disabled)");
        report.skipped.push(name);
    }

    for entry in plan.entries {
        let PlannedModule { name, prefix, module } = entry;

        module.init_env();

        match server.transaction(|s| module.mount(s, &prefix)) {
            Ok(()) => {
                info!(module = %name, prefix = %prefix, "mounted");
                report.mounted.push(MountedModule { name, prefix });
            }
            Err(e) => {
                warn!(module = %name, prefix = %prefix, error = %e, "mount failed");
                report.failed.push(FailedModule {
                    name,
                    prefix,
                    error: e.to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_registry::testing::StubModule;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn setup(specs: &[(&str, &str, bool, bool)]) -> (ModuleRegistry, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::new();
        for (name, prefix, enabled, fail) in specs {
            let mut m = StubModule::new(name, prefix, calls.clone());
            m.enabled = *enabled;
            m.fail_mount = *fail;
            registry.register(Arc::new(m)).unwrap();
        }
        (registry, calls)
    }

    #[test]
    fn empty_registry_is_a_noop() {
        let registry = ModuleRegistry::new();
        let mut server = Server::new();
        let report = mount_all_with(&registry, &mut server, &env(&[("MODULES", "a")]));
        assert_eq!(report, MountReport::default());
    }

    #[test]
    fn init_runs_before_mount_in_sorted_order() {
        let (registry, calls) = setup(&[("b", "/b", true, false), ("a", "/a", true, false)]);
        let mut server = Server::new();
        let report = mount_all_with(&registry, &mut server, &env(&[]));

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["init:a", "mount:a@/a", "init:b", "mount:b@/b"]
        );
        assert_eq!(report.mounted.len(), 2);
    }

    #[test]
    fn failed_mount_does_not_stop_later_modules() {
        let (registry, calls) = setup(&[("a", "/a", true, true), ("b", "/b", true, false)]);
        let mut server = Server::new();
        let report = mount_all_with(&registry, &mut server, &env(&[]));

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "a");
        assert_eq!(report.mounted, vec![MountedModule { name: "b".into(), prefix: "/b".into() }]);
        assert!(calls.lock().unwrap().contains(&"mount:b@/b".to_string()));
    }

    #[test]
    fn disabled_module_has_no_side_effects() {
        let (registry, calls) = setup(&[("a", "/a", false, false), ("b", "/b", true, false)]);
        let mut server = Server::new();
        let report = mount_all_with(&registry, &mut server, &env(&[]));

        assert_eq!(report.skipped, vec!["a"]);
        assert_eq!(*calls.lock().unwrap(), vec!["init:b", "mount:b@/b"]);
    }

    #[test]
    fn plan_follows_allow_list_and_prefix_overrides() {
        let (registry, _) = setup(&[
            ("avatar", "/avatar", true, false),
            ("redirect", "/redirect", true, false),
            ("aicweb", "/aicweb", true, false),
        ]);
        let overrides = MountOverrides::capture(
            &env(&[
                ("MODULES", "redirect,avatar,ghost"),
                ("API_ROOT_PREFIX", "/api/v1"),
                ("avatar_PREFIX", "/custom"),
            ]),
            &registry,
        );
        let plan = plan(&registry, &overrides);

        assert_eq!(plan.names(), vec!["redirect", "avatar"]);
        assert_eq!(plan.entries[0].prefix, "/api/v1/redirect");
        assert_eq!(plan.entries[1].prefix, "/custom");
        assert!(plan.disabled.is_empty());
    }
}
