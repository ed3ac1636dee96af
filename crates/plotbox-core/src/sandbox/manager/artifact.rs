//! Containment of output paths under the configured artifact root

use crate::sandbox::{SandboxError, SandboxResult};
use std::path::{Component, Path, PathBuf};

/// Reject `output_path` unless it resolves strictly inside `root`
pub(super) fn check_output_path(root: &Path, output_path: &Path) -> SandboxResult<()> {
    let root = resolve(root)?;
    let path = resolve(output_path)?;
    if path != root && path.starts_with(&root) {
        Ok(())
    } else {
        Err(SandboxError::SecurityRejected(vec![format!(
            "output path '{}' is outside the artifact root '{}'",
            output_path.display(),
            root.display()
        )]))
    }
}

/// Absolute, `..`-free form with symlinks resolved for the part that exists
fn resolve(path: &Path) -> SandboxResult<PathBuf> {
    let normalized = normalize(&std::path::absolute(path)?);

    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }

    let mut resolved = existing.canonicalize()?;
    resolved.extend(rest.iter().rev());
    Ok(resolved)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
