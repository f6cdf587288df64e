//! Built-in providers

pub mod directory;
pub mod file;

use anyhow::Result;
use declarative::Registry;

pub use directory::DirectoryProvider;
pub use file::FileProvider;

/// A registry holding every built-in kind
pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register(FileProvider)?;
    registry.register(DirectoryProvider)?;
    Ok(registry)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let registry = registry().unwrap();
        assert_eq!(registry.kinds(), vec!["directory", "file"]);
        assert!(registry.get("file").unwrap().input_schema.is_some());
    }
}
