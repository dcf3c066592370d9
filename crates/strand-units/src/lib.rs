//! Built-in unit classes for strand.
//!
//! This crate provides the classes every strand program can use without
//! registering its own, and [`builtin_registry`] to get a [`ClassRegistry`]
//! with all of them in place.
//!
//! # Classes
//!
//! | Class | Variables | Behavior |
//! |---|---|---|
//! | `sine` | in `freq`, in `gain`, out `out` (audio) | sine oscillator |
//! | `gain` | in `in` (audio), in `gain`, out `out` (audio) | scales audio |
//! | `mixer` | in `in0`/`in1` (audio), in `gain0`/`gain1`, out `out` (audio) | sums two inputs |
//! | `meter` | in `in` (audio), out `rms` | per-cycle RMS |
//! | `number` | in `in`, out `out` | forwards values; not executed |
//! | `counter` | in `period`, out `count` | counts every `period` cycles |
//! | `midi_notes` | out `note`, out `velocity` | note messages from `_midi` |
//! | `probe` | in `in`, out `count`, out `last` | logs and counts values |
//!
//! # Example
//!
//! ```rust
//! use strand_core::{Args, Graph, GraphConfig};
//!
//! let registry = strand_units::builtin_registry();
//! for class in registry.all_classes() {
//!     println!("{}: {}", class.label, class.description);
//! }
//!
//! let mut graph = Graph::new(registry, GraphConfig::default());
//! let osc = graph.allocate_instance("sine", Some("osc"), &Args::new()).unwrap();
//! let meter = graph.allocate_instance("meter", None, &Args::new()).unwrap();
//! let (_, out) = graph.resolve("osc", "out").unwrap();
//! let (_, input) = graph.resolve("meter0", "in").unwrap();
//! graph.connect_audio(osc, out, meter, input).unwrap();
//! graph.finish_load().unwrap();
//! graph.execute_cycle().unwrap();
//! ```

use std::sync::Arc;

use strand_core::{ClassCategory, ClassDescriptor, ClassRegistry, UnitFactory};

pub mod audio;
pub mod control;
pub mod midi;
pub mod source;

pub use audio::{Gain, Meter, Mixer};
pub use control::{Counter, Number, Probe};
pub use midi::MidiNotes;
pub use source::Sine;

const BUILTINS: &[(ClassDescriptor, UnitFactory)] = &[
    (
        ClassDescriptor {
            label: "sine",
            description: "Sine oscillator",
            category: ClassCategory::Source,
        },
        source::sine,
    ),
    (
        ClassDescriptor {
            label: "gain",
            description: "Scales an audio signal",
            category: ClassCategory::Processor,
        },
        audio::gain,
    ),
    (
        ClassDescriptor {
            label: "mixer",
            description: "Sums two audio inputs with per-input gain",
            category: ClassCategory::Processor,
        },
        audio::mixer,
    ),
    (
        ClassDescriptor {
            label: "meter",
            description: "Emits the RMS level of its input every cycle",
            category: ClassCategory::Analysis,
        },
        audio::meter,
    ),
    (
        ClassDescriptor {
            label: "number",
            description: "Holds a value and forwards every update",
            category: ClassCategory::Control,
        },
        control::number,
    ),
    (
        ClassDescriptor {
            label: "counter",
            description: "Counts up every `period` cycles",
            category: ClassCategory::Control,
        },
        control::counter,
    ),
    (
        ClassDescriptor {
            label: "midi_notes",
            description: "Note number and velocity from incoming MIDI",
            category: ClassCategory::Midi,
        },
        midi::midi_notes,
    ),
    (
        ClassDescriptor {
            label: "probe",
            description: "Logs and counts received values",
            category: ClassCategory::Debug,
        },
        control::probe,
    ),
];

/// Registers every built-in class into `registry`.
pub fn register_builtins(registry: &mut ClassRegistry) {
    for (descriptor, factory) in BUILTINS {
        registry.register(descriptor.clone(), *factory);
    }
}

/// Creates a registry holding every built-in class.
pub fn builtin_registry() -> Arc<ClassRegistry> {
    let mut registry = ClassRegistry::new();
    register_builtins(&mut registry);
    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{Args, Graph, GraphConfig};

    #[test]
    fn test_registry_creation() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_get_class() {
        let registry = builtin_registry();
        assert_eq!(registry.get("sine").unwrap().category, ClassCategory::Source);
        assert!(registry.get("theremin").is_none());
    }

    #[test]
    fn test_classes_by_category() {
        let registry = builtin_registry();
        assert_eq!(registry.classes_in_category(ClassCategory::Processor).len(), 2);
        assert_eq!(registry.classes_in_category(ClassCategory::Control).len(), 2);
        assert_eq!(registry.classes_in_category(ClassCategory::Midi).len(), 1);
    }

    #[test]
    fn test_all_classes_can_be_allocated() {
        let registry = builtin_registry();
        let mut graph = Graph::new(Arc::clone(&registry), GraphConfig::default());
        for class in registry.all_classes() {
            let id = graph.allocate_instance(class.label, None, &Args::new());
            assert!(id.is_ok(), "Failed to allocate class: {}", class.label);
        }
        graph.finish_load().unwrap();
        graph.execute_cycle().unwrap();
    }

    #[test]
    fn test_register_into_existing_registry() {
        let mut registry = ClassRegistry::new();
        register_builtins(&mut registry);
        register_builtins(&mut registry);
        assert_eq!(registry.len(), 8);
    }
}
