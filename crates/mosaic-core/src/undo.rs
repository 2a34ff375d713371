//! Undo/redo history of tree snapshots.

/// Undo/redo history stack
///
/// Maintains two stacks of `(label, snapshot)` pairs:
/// - `undo`: the state before each accepted edit
/// - `redo`: the state before each undo, so it can be restored
pub struct UndoStack<T> {
    undo: Vec<(String, T)>,
    redo: Vec<(String, T)>,
    /// Maximum number of edits kept in the undo stack
    max_size: usize,
}

impl<T> UndoStack<T> {
    /// Create a new undo stack with default max size
    pub fn new() -> Self {
        Self::with_max_size(100)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            max_size,
        }
    }

    /// Record the state before a new edit. Clears the redo stack.
    pub fn push(&mut self, label: impl Into<String>, before: T) {
        self.redo.clear();
        self.undo.push((label.into(), before));

        if self.undo.len() > self.max_size {
            self.undo.remove(0);
        }
    }

    /// Take the state to restore for undo; `current` becomes redoable.
    pub fn pop_for_undo(&mut self, current: T) -> Option<T> {
        let (label, before) = self.undo.pop()?;
        self.redo.push((label, current));
        Some(before)
    }

    /// Take the state to restore for redo; `current` becomes undoable again.
    pub fn pop_for_redo(&mut self, current: T) -> Option<T> {
        let (label, after) = self.redo.pop()?;
        self.undo.push((label, current));
        Some(after)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Label of the edit the next undo reverts (for UI)
    pub fn next_undo_label(&self) -> Option<&str> {
        self.undo.last().map(|(label, _)| label.as_str())
    }

    /// Label of the edit the next redo reapplies (for UI)
    pub fn next_redo_label(&self) -> Option<&str> {
        self.redo.last().map(|(label, _)| label.as_str())
    }
}

impl<T> Default for UndoStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stack() {
        let stack: UndoStack<u32> = UndoStack::new();
        assert!(!stack.can_undo());
        assert!(!stack.can_redo());
        assert!(stack.next_undo_label().is_none());
    }

    #[test]
    fn undo_then_redo() {
        let mut stack = UndoStack::new();
        stack.push("edit", 1);

        assert_eq!(stack.pop_for_undo(2), Some(1));
        assert_eq!(stack.next_redo_label(), Some("edit"));
        assert_eq!(stack.pop_for_redo(1), Some(2));
        assert!(stack.can_undo());
        assert!(!stack.can_redo());
    }

    #[test]
    fn new_edit_clears_redo_stack() {
        let mut stack = UndoStack::new();
        stack.push("a", 1);
        stack.push("b", 2);
        stack.pop_for_undo(3);
        assert!(stack.can_redo());

        stack.push("c", 2);
        assert!(!stack.can_redo());
    }

    #[test]
    fn max_size_drops_oldest() {
        let mut stack = UndoStack::with_max_size(2);
        stack.push("a", 1);
        stack.push("b", 2);
        stack.push("c", 3);

        assert_eq!(stack.pop_for_undo(4), Some(3));
        assert_eq!(stack.pop_for_undo(3), Some(2));
        assert_eq!(stack.pop_for_undo(2), None);
    }
}
