//! Ordered, id-unique bookmark collection

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::Bookmark;

/// Bookmarks unique by id, ordered by `created_at` descending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkSet {
    items: Vec<Bookmark>,
}

impl BookmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from store rows
    ///
    /// Rows are re-sorted (stable, so the store's tie order survives) and
    /// later duplicates of an id are dropped.
    pub fn from_rows(rows: Vec<Bookmark>) -> Self {
        let mut seen = HashSet::with_capacity(rows.len());
        let mut items: Vec<Bookmark> = rows.into_iter().filter(|b| seen.insert(b.id)).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self { items }
    }

    /// Insert unless the id is already present
    ///
    /// The row goes in front of every row that is not strictly newer, so a
    /// freshly created row lands at the top. Returns whether it was added.
    pub fn insert(&mut self, bookmark: Bookmark) -> bool {
        if self.contains(bookmark.id) {
            return false;
        }
        let at = self
            .items
            .partition_point(|existing| existing.created_at > bookmark.created_at);
        self.items.insert(at, bookmark);
        true
    }

    /// Remove by id; returns whether a row was removed
    pub fn remove(&mut self, id: Uuid) -> bool {
        match self.items.iter().position(|b| b.id == id) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.iter().any(|b| b.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bookmark> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
