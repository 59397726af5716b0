use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ORCHESTRATIONS_DIR: &str = ".orchestrations";
pub const CONFIG_FILE: &str = ".orchestrations/config.yaml";
pub const DEFAULT_DATABASE_FILE: &str = ".orchestrations/orchestrations.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn orchestrations_dir(root: &Path) -> PathBuf {
    root.join(ORCHESTRATIONS_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve the database location. Relative paths are taken from `root`.
pub fn database_path(root: &Path, database: &str) -> PathBuf {
    let path = Path::new(database);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Walk up from `start` to the nearest directory containing `.orchestrations/`.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| orchestrations_dir(dir).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn database_path_relative_and_absolute() {
        let root = Path::new("/srv/app");
        assert_eq!(
            database_path(root, DEFAULT_DATABASE_FILE),
            PathBuf::from("/srv/app/.orchestrations/orchestrations.redb")
        );
        assert_eq!(
            database_path(root, "/var/lib/o.redb"),
            PathBuf::from("/var/lib/o.redb")
        );
    }

    #[test]
    fn find_root_walks_ancestors() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(orchestrations_dir(dir.path())).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root(&nested).unwrap(), dir.path());

        let other = TempDir::new().unwrap();
        assert!(find_root(other.path()).is_none());
    }
}
