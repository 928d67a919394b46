use std::collections::HashMap;

use crate::model::document::DocumentState;

/// The local mirror of an ordered query result set.
///
/// Invariant: for every id in the lookup, the document at the recorded index
/// has that id, and vice versa. The lookup is rebuilt after every insertion
/// or removal so positions stay contiguous and accurate.
#[derive(Clone, Debug, Default)]
pub struct CollectionState {
    documents: Vec<DocumentState>,
    index: HashMap<String, usize>,
}

impl CollectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[DocumentState] {
        &self.documents
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&DocumentState> {
        self.position(id).and_then(|i| self.documents.get(i))
    }

    /// Inserts a new document at `index` (clamped to the current length).
    pub fn insert_at(&mut self, index: usize, document: DocumentState) {
        let index = index.min(self.documents.len());
        self.documents.insert(index, document);
        self.reindex();
    }

    /// Moves an already-tracked document to `index`. Used when a duplicate
    /// `added` change arrives for an id we already mirror, e.g. a local
    /// optimistic insertion racing the remote echo.
    pub fn move_to(&mut self, index: usize, id: &str) {
        let Some(current) = self.position(id) else {
            return;
        };
        let document = self.documents.remove(current);
        let index = index.min(self.documents.len());
        self.documents.insert(index, document);
        self.reindex();
    }

    /// Replaces the document at `index` with a freshly materialized state.
    pub fn replace_at(&mut self, index: usize, document: DocumentState) {
        if index >= self.documents.len() {
            return;
        }
        self.documents[index] = document;
        self.reindex();
    }

    /// Removes the document at `index` and drops its id from the lookup.
    pub fn remove_at(&mut self, index: usize) -> Option<DocumentState> {
        if index >= self.documents.len() {
            return None;
        }
        let removed = self.documents.remove(index);
        self.reindex();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.index.clear();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (position, document) in self.documents.iter().enumerate() {
            self.index.insert(document.id().to_string(), position);
        }
    }

    #[cfg(test)]
    pub(crate) fn lookup(&self) -> &HashMap<String, usize> {
        &self.index
    }
}
