//! Module loading for `include`

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves an `include "path";` source reference to file contents.
///
/// Kept as a trait (rather than a bare function) so tests can inject an
/// in-memory loader without touching the filesystem.
pub trait ModuleLoader {
    fn load(&self, path: &str) -> io::Result<String>;
}

/// Loads modules from the filesystem, relative to a base directory: the
/// directory containing the script being compiled, or the current working
/// directory for the REPL.
#[derive(Debug)]
pub struct FsModuleLoader {
    base_dir: PathBuf,
}

impl FsModuleLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn cwd() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn for_script(script_path: impl AsRef<Path>) -> Self {
        let base = script_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base)
    }
}

impl ModuleLoader for FsModuleLoader {
    fn load(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.base_dir.join(path))
    }
}

/// An in-memory loader, used by tests to exercise `include` without the
/// filesystem.
#[derive(Debug, Default)]
pub struct InMemoryModuleLoader(pub HashMap<String, String>);

impl ModuleLoader for InMemoryModuleLoader {
    fn load(&self, path: &str) -> io::Result<String> {
        self.0
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such module '{}'", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_is_a_not_found_error() {
        let loader = InMemoryModuleLoader::default();
        assert!(loader.load("missing.gec").is_err());
    }

    #[test]
    fn in_memory_loader_returns_registered_source() {
        let mut map = HashMap::new();
        map.insert("greet.gec".to_owned(), "exp func greet() {}".to_owned());
        let loader = InMemoryModuleLoader(map);
        assert_eq!(loader.load("greet.gec").unwrap(), "exp func greet() {}");
    }

    #[test]
    fn fs_loader_resolves_relative_to_base_dir() {
        let dir = std::env::temp_dir().join("gecco_module_loader_test");
        let _ = fs::create_dir_all(&dir);
        let file = dir.join("greet.gec");
        fs::write(&file, "exp func greet() { print \"hi\"; }").unwrap();

        let loader = FsModuleLoader::new(&dir);
        let contents = loader.load("greet.gec").unwrap();
        assert!(contents.contains("greet"));

        let _ = fs::remove_file(&file);
    }
}
