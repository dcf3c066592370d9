//! Class registry: label -> factory table.

use crate::unit::{AllocContext, Args, Unit, UnitError};

/// Factory function of a class.
///
/// Declares the instance's variables on the context and returns the unit.
pub type UnitFactory = fn(&mut AllocContext<'_>, &Args) -> Result<Box<dyn Unit>, UnitError>;

/// Category of a class for listing and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassCategory {
    /// Generates audio (oscillators, players).
    Source,
    /// Transforms audio.
    Processor,
    /// Reads audio and emits control values.
    Analysis,
    /// Control-rate logic.
    Control,
    /// MIDI input handling.
    Midi,
    /// Debugging and inspection.
    Debug,
}

impl ClassCategory {
    /// Returns a human-readable name for the category.
    pub const fn name(&self) -> &'static str {
        match self {
            ClassCategory::Source => "Source",
            ClassCategory::Processor => "Processor",
            ClassCategory::Analysis => "Analysis",
            ClassCategory::Control => "Control",
            ClassCategory::Midi => "MIDI",
            ClassCategory::Debug => "Debug",
        }
    }
}

/// Describes a registered class.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    /// Unique class label used in programs (lowercase, no spaces).
    pub label: &'static str,
    /// Brief description.
    pub description: &'static str,
    /// Category for organization.
    pub category: ClassCategory,
}

/// Index of a class in its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    /// Returns the raw index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

struct RegistryEntry {
    descriptor: ClassDescriptor,
    factory: UnitFactory,
}

/// Table of classes available to a graph.
#[derive(Default)]
pub struct ClassRegistry {
    entries: Vec<RegistryEntry>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class. A class with the same label is replaced in place.
    pub fn register(&mut self, descriptor: ClassDescriptor, factory: UnitFactory) -> ClassId {
        if let Some(id) = self.find(descriptor.label) {
            self.entries[id.0 as usize] = RegistryEntry {
                descriptor,
                factory,
            };
            return id;
        }
        let id = ClassId(self.entries.len() as u32);
        self.entries.push(RegistryEntry {
            descriptor,
            factory,
        });
        id
    }

    /// Finds a class by label.
    pub fn find(&self, label: &str) -> Option<ClassId> {
        self.entries
            .iter()
            .position(|e| e.descriptor.label == label)
            .map(|i| ClassId(i as u32))
    }

    /// Descriptor of a class by label.
    pub fn get(&self, label: &str) -> Option<&ClassDescriptor> {
        self.find(label).and_then(|id| self.descriptor(id))
    }

    /// Descriptor of a class by id.
    pub fn descriptor(&self, id: ClassId) -> Option<&ClassDescriptor> {
        self.entries.get(id.0 as usize).map(|e| &e.descriptor)
    }

    pub(crate) fn factory(&self, id: ClassId) -> Option<UnitFactory> {
        self.entries.get(id.0 as usize).map(|e| e.factory)
    }

    /// Returns descriptors for all registered classes.
    pub fn all_classes(&self) -> Vec<&ClassDescriptor> {
        self.entries.iter().map(|e| &e.descriptor).collect()
    }

    /// Returns descriptors for classes in a specific category.
    pub fn classes_in_category(&self, category: ClassCategory) -> Vec<&ClassDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.category == category)
            .map(|e| &e.descriptor)
            .collect()
    }

    /// Returns the number of registered classes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no classes are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;
    impl Unit for Nop {}

    fn nop(_: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
        Ok(Box::new(Nop))
    }

    fn desc(label: &'static str, description: &'static str) -> ClassDescriptor {
        ClassDescriptor {
            label,
            description,
            category: ClassCategory::Control,
        }
    }

    #[test]
    fn register_and_find() {
        let mut registry = ClassRegistry::new();
        assert!(registry.is_empty());
        let a = registry.register(desc("a", "first"), nop);
        let b = registry.register(desc("b", "second"), nop);
        assert_ne!(a, b);
        assert_eq!(registry.find("b"), Some(b));
        assert_eq!(registry.get("a").unwrap().description, "first");
        assert!(registry.get("c").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut registry = ClassRegistry::new();
        let a = registry.register(desc("a", "old"), nop);
        let again = registry.register(desc("a", "new"), nop);
        assert_eq!(a, again);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptor(a).unwrap().description, "new");
    }

    #[test]
    fn filter_by_category() {
        let mut registry = ClassRegistry::new();
        registry.register(desc("a", ""), nop);
        registry.register(
            ClassDescriptor {
                label: "osc",
                description: "",
                category: ClassCategory::Source,
            },
            nop,
        );
        assert_eq!(registry.classes_in_category(ClassCategory::Source).len(), 1);
        assert_eq!(registry.classes_in_category(ClassCategory::Debug).len(), 0);
        assert_eq!(ClassCategory::Midi.name(), "MIDI");
    }
}
