// paths.rs - Base directory for module config and data files

use std::path::{Path, PathBuf};

pub const PROJECT_ROOT_VAR: &str = "PROJECT_ROOT";

/// Directory that relative config paths hang off.
///
/// `PROJECT_ROOT` wins when it names an existing directory, then the working
/// directory, then the directory holding the executable.
pub fn project_root() -> Option<PathBuf> {
    let explicit = std::env::var(PROJECT_ROOT_VAR).ok();
    resolve_root(
        explicit.as_deref(),
        std::env::current_dir().ok(),
        std::env::current_exe().ok(),
    )
}

pub fn resolve_root(explicit: Option<&str>, cwd: Option<PathBuf>, exe: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(dir) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        let dir = Path::new(dir);
        if dir.is_dir() {
            return Some(dir.to_path_buf());
        }
    }
    if let Some(cwd) = cwd.filter(|p| !p.as_os_str().is_empty()) {
        return Some(cwd);
    }
    exe.and_then(|p| p.parent().map(Path::to_path_buf))
}

/// `path` as-is when absolute, otherwise under [`project_root`].
pub fn under_root(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match project_root() {
        Some(root) => root.join(path),
        None => path.to_path_buf(),
    }
}
