//! Project root discovery

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root configuration document
pub const STACK_FILE: &str = "stack.kdl";

/// Default values file, read when present next to the root document
pub const VALUES_FILE: &str = "stack.values.kdl";

/// Find the project root by walking up from the current directory
pub fn find_project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::IoError {
        path: PathBuf::from("."),
        message: e.to_string(),
    })?;
    find_project_root_from(&cwd)
}

/// Find the project root by walking up from the given directory
pub fn find_project_root_from(start: &Path) -> Result<PathBuf> {
    let mut current = start;
    loop {
        if current.join(STACK_FILE).exists() {
            debug!(root = %current.display(), "Found project root");
            return Ok(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Err(ConfigError::ProjectRootNotFound(start.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_root_from_nested_directory() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(STACK_FILE), "stack \"s\"\n").unwrap();
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let root = find_project_root_from(&nested).unwrap();
        assert_eq!(root, temp.path());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let result = find_project_root_from(temp.path());
        assert!(matches!(result, Err(ConfigError::ProjectRootNotFound(_))));
    }
}
