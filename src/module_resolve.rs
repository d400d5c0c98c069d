//! Override resolution for module activation.
//!
//! Pure functions that decide, per module, whether it is enabled, where it is
//! mounted, and in which order modules are activated. Environment access is
//! funnelled through [`EnvSource`] and snapshotted once in [`MountOverrides`].

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::module_registry::{normalize_name, ModuleRegistry};

pub const MODULES_VAR: &str = "MODULES";
pub const MODULES_DISABLE_VAR: &str = "MODULES_DISABLE";
pub const ROOT_PREFIX_VAR: &str = "API_ROOT_PREFIX";

/// Read access to environment-style key/value configuration.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

/// Per-module overrides taken from `<name>_ENABLED` / `<name>_PREFIX`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModuleOverride {
    pub enabled: Option<String>,
    pub prefix: Option<String>,
}

/// Environment inputs for one orchestrator run, read exactly once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountOverrides {
    /// Explicit allow-list and activation order. `None` when `MODULES` is unset or blank.
    pub allow_list: Option<Vec<String>>,
    pub deny_set: BTreeSet<String>,
    pub root_prefix: Option<String>,
    pub per_module: HashMap<String, ModuleOverride>,
}

impl MountOverrides {
    /// Snapshot the global inputs plus the overrides of every registered module.
    pub fn capture(env: &impl EnvSource, registry: &ModuleRegistry) -> Self {
        let allow = parse_list(env.var(MODULES_VAR).as_deref().unwrap_or_default());
        let deny = parse_list(env.var(MODULES_DISABLE_VAR).as_deref().unwrap_or_default());
        let root_prefix = env
            .var(ROOT_PREFIX_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let per_module = registry
            .names()
            .into_iter()
            .map(|name| {
                let ov = ModuleOverride {
                    enabled: module_var(env, &name, "ENABLED"),
                    prefix: module_var(env, &name, "PREFIX"),
                };
                (name, ov)
            })
            .collect();

        Self {
            allow_list: (!allow.is_empty()).then_some(allow),
            deny_set: deny.into_iter().collect(),
            root_prefix,
            per_module,
        }
    }

    pub fn for_module(&self, name: &str) -> ModuleOverride {
        self.per_module.get(name).cloned().unwrap_or_default()
    }
}

/// `<name>_<suffix>` with the lowercase name first, then the uppercase form.
/// Blank values count as unset.
fn module_var(env: &impl EnvSource, name: &str, suffix: &str) -> Option<String> {
    let lower = format!("{}_{}", name.to_lowercase(), suffix);
    let upper = format!("{}_{}", name.to_uppercase(), suffix);
    env.var(&lower)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env.var(&upper).filter(|v| !v.trim().is_empty()))
}

/// Split a comma-separated list into trimmed, lowercase, non-empty names.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_name)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Recognize a boolean-like token. Unrecognized tokens yield `None`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Decide whether `name` is enabled. The force flag beats everything; an
/// allow-list admits only its members minus the deny-set; otherwise the
/// deny-set and then the module default apply.
pub fn resolve_enabled(
    name: &str,
    default_enabled: bool,
    allow_list: Option<&[String]>,
    deny_set: &BTreeSet<String>,
    force: Option<&str>,
) -> bool {
    if let Some(flag) = force.and_then(parse_flag) {
        return flag;
    }
    if let Some(list) = allow_list {
        return list.iter().any(|n| n == name) && !deny_set.contains(name);
    }
    if deny_set.contains(name) {
        return false;
    }
    default_enabled
}

/// Activation order: the allow-list filtered to registered names, or every
/// registered name ascending.
pub fn resolve_order(registry: &ModuleRegistry, allow_list: Option<&[String]>) -> Vec<String> {
    let Some(list) = allow_list else {
        return registry.names();
    };

    let mut seen = BTreeSet::new();
    let mut order = Vec::with_capacity(list.len());
    for name in list {
        let name = normalize_name(name);
        if !registry.contains(&name) {
            warn!(module = %name, "MODULES includes unknown module");
            continue;
        }
        if !seen.insert(name.clone()) {
            warn!(module = %name, "MODULES lists module more than once");
            continue;
        }
        order.push(name);
    }
    order
}

/// Effective mount prefix: per-module override, else root joined with the
/// default, else the default. Always exactly one leading slash.
pub fn resolve_prefix(default_prefix: &str, root_prefix: Option<&str>, explicit: Option<&str>) -> String {
    if let Some(p) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return normalize_prefix(p);
    }
    match root_prefix.map(str::trim).filter(|r| !r.is_empty()) {
        Some(root) => normalize_prefix(&join_path(root, default_prefix.trim_start_matches('/'))),
        None => normalize_prefix(default_prefix),
    }
}

/// Force exactly one leading slash; empty becomes `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let rest = prefix.trim().trim_start_matches('/');
    format!("/{rest}")
}

/// Join two URL paths and clean the result: repeated slashes and `.` segments
/// collapse, `..` removes the previous segment.
pub fn join_path(base: &str, tail: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in base.split('/').chain(tail.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}
