//! Class registry.
//!
//! Deduplicating collector of emitted class descriptors, scoped to one
//! top-level compilation unit. The registry is an explicit object passed by
//! mutable reference into the emission call; independent units run their own
//! instances with no shared state.

use rustc_hash::FxHashMap;

use crate::bytecode::ClassDef;

/// Identity-keyed collector of class definitions.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassDef>,
    by_identity: FxHashMap<String, usize>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Returns false (and drops the definition) when a
    /// class with the same identity was already registered — revisiting the
    /// originating AST node must not emit a duplicate.
    pub fn register(&mut self, class: ClassDef) -> bool {
        if self.by_identity.contains_key(&class.identity) {
            return false;
        }
        self.by_identity
            .insert(class.identity.clone(), self.classes.len());
        self.classes.push(class);
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&ClassDef> {
        self.by_identity.get(identity).map(|&i| &self.classes[i])
    }

    /// Registered classes in registration order.
    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Consume the registry at the end of a compilation unit.
    pub fn into_classes(self) -> Vec<ClassDef> {
        self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::rt;

    fn class(identity: &str) -> ClassDef {
        ClassDef {
            name: identity.to_string(),
            identity: identity.to_string(),
            superclass: rt::OBJECT.to_string(),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    #[test]
    fn test_register_dedups_by_identity() {
        let mut reg = ClassRegistry::new();
        assert!(reg.register(class("user$f__1")));
        assert!(!reg.register(class("user$f__1")));
        assert!(reg.register(class("user$f__2")));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_into_classes_preserves_order() {
        let mut reg = ClassRegistry::new();
        reg.register(class("a"));
        reg.register(class("b"));
        let names: Vec<_> = reg.into_classes().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
