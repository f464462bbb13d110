use std::collections::BTreeSet;

use crate::errors::LabelError;

/// Names used by `Label` and `BlockStart` commands.
///
/// The program store calls `register`/`unregister` at the same places it
/// inserts and removes commands, so a name is present exactly while a command
/// carrying it is in the program.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    names: BTreeSet<String>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) -> Result<(), LabelError> {
        if self.names.contains(name) {
            return Err(LabelError::AlreadyExists(name.to_string()));
        }
        self.names.insert(name.to_string());
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Sorted names, for pick lists.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// `name` if it is free, otherwise the first free `name_N` with N >= 1.
    pub fn free_name(&self, name: &str) -> String {
        if !self.contains(name) {
            return name.to_string();
        }
        (1..)
            .map(|n| format!("{name}_{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut labels = LabelRegistry::new();
        labels.register("start").unwrap();
        assert_eq!(
            labels.register("start"),
            Err(LabelError::AlreadyExists("start".into()))
        );
        assert!(labels.unregister("start"));
        labels.register("start").unwrap();
    }

    #[test]
    fn test_free_name_skips_taken_suffixes() {
        let mut labels = LabelRegistry::new();
        assert_eq!(labels.free_name("loop"), "loop");
        labels.register("loop").unwrap();
        labels.register("loop_1").unwrap();
        assert_eq!(labels.free_name("loop"), "loop_2");
    }
}
