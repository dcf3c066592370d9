//! Interned labels.
//!
//! Every instance label and broadcast attribute is interned once into the
//! [`SymbolTable`] and referred to by [`SymbolId`] afterwards. The table lives
//! as long as the session that owns it; unloading a graph does not shrink it.

use std::collections::HashMap;
use std::fmt;

/// Attribute broadcast to instances subscribed to incoming MIDI.
pub const MIDI_SYMBOL: &str = "_midi";

/// Attribute broadcast after a successful graph reset.
pub const RESET_SYMBOL: &str = "_reset";

/// Identifier of an interned label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym#{}", self.0)
    }
}

/// Bidirectional label <-> id map. Ids are dense and never reused.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    labels: Vec<String>,
    ids: HashMap<String, SymbolId>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `label`, registering it if it is new.
    pub fn intern(&mut self, label: &str) -> SymbolId {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = SymbolId(self.labels.len() as u32);
        self.labels.push(label.to_owned());
        self.ids.insert(label.to_owned(), id);
        id
    }

    /// Returns the id for `label` without registering it.
    pub fn lookup(&self, label: &str) -> Option<SymbolId> {
        self.ids.get(label).copied()
    }

    /// Returns the label an id was interned from.
    pub fn label(&self, id: SymbolId) -> Option<&str> {
        self.labels.get(id.0 as usize).map(String::as_str)
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
