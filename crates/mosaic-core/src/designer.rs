//! Editable holder of a block tree with undo/redo.

use mosaic_api::ContextVar;
use tracing::debug;

use crate::blocks::{BlockDef, DropSide};
use crate::error::TreeError;
use crate::tree::{
    alter_block, canonicalize_tree, checked_drop_block, duplicate, ensure_unique_ids,
    find_block, remove_block, replace_block, scope_violations,
};
use crate::undo::UndoStack;

/// Configuration for [`DesignerStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct DesignerConfig {
    /// Number of edits kept for undo (default: 100)
    pub undo_depth: usize,
}

impl Default for DesignerConfig {
    fn default() -> Self {
        Self { undo_depth: 100 }
    }
}

impl DesignerConfig {
    pub fn with_undo_depth(mut self, depth: usize) -> Self {
        self.undo_depth = depth;
        self
    }
}

/// Edits a designer applies to the tree it shows.
pub trait BlockStore {
    /// Apply `action` to one block; `None` from the action removes it.
    fn alter_block(
        &mut self,
        block_id: &str,
        action: &mut dyn FnMut(BlockDef) -> Option<BlockDef>,
    ) -> Result<(), TreeError>;

    /// Replace the block with the same id as `block_def`.
    fn replace_block(&mut self, block_def: BlockDef) -> Result<(), TreeError>;

    fn remove_block(&mut self, block_id: &str) -> Result<(), TreeError>;

    /// Move an existing block next to `target_id`.
    fn drag_and_drop_block(
        &mut self,
        source: &BlockDef,
        target_id: &str,
        side: DropSide,
    ) -> Result<(), TreeError>;

    /// Insert a fresh copy of a palette template. The target is ignored when
    /// the tree is empty.
    fn add_from_palette(
        &mut self,
        template: &BlockDef,
        target_id: &str,
        side: DropSide,
    ) -> Result<(), TreeError>;
}

/// Block store for read-only previews.
pub struct NullBlockStore;

impl BlockStore for NullBlockStore {
    fn alter_block(
        &mut self,
        _block_id: &str,
        _action: &mut dyn FnMut(BlockDef) -> Option<BlockDef>,
    ) -> Result<(), TreeError> {
        Err(TreeError::NotAllowed("alter_block".to_string()))
    }

    fn replace_block(&mut self, _block_def: BlockDef) -> Result<(), TreeError> {
        Err(TreeError::NotAllowed("replace_block".to_string()))
    }

    fn remove_block(&mut self, _block_id: &str) -> Result<(), TreeError> {
        Err(TreeError::NotAllowed("remove_block".to_string()))
    }

    fn drag_and_drop_block(
        &mut self,
        _source: &BlockDef,
        _target_id: &str,
        _side: DropSide,
    ) -> Result<(), TreeError> {
        Err(TreeError::NotAllowed("drag_and_drop_block".to_string()))
    }

    fn add_from_palette(
        &mut self,
        _template: &BlockDef,
        _target_id: &str,
        _side: DropSide,
    ) -> Result<(), TreeError> {
        Err(TreeError::NotAllowed("add_from_palette".to_string()))
    }
}

/// Current tree of a designer plus its edit history.
///
/// Every edit is canonicalized and checked before it replaces the tree; a
/// rejected edit leaves the store as it was.
pub struct DesignerStore {
    root: Option<BlockDef>,
    context_vars: Vec<ContextVar>,
    history: UndoStack<Option<BlockDef>>,
}

impl DesignerStore {
    pub fn new(root: Option<BlockDef>, context_vars: Vec<ContextVar>) -> Self {
        Self::with_config(root, context_vars, DesignerConfig::default())
    }

    pub fn with_config(
        root: Option<BlockDef>,
        context_vars: Vec<ContextVar>,
        config: DesignerConfig,
    ) -> Self {
        Self {
            root,
            context_vars,
            history: UndoStack::with_max_size(config.undo_depth),
        }
    }

    pub fn root(&self) -> Option<&BlockDef> {
        self.root.as_ref()
    }

    pub fn context_vars(&self) -> &[ContextVar] {
        &self.context_vars
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn next_undo_label(&self) -> Option<&str> {
        self.history.next_undo_label()
    }

    pub fn undo(&mut self) -> Result<(), TreeError> {
        let previous = self
            .history
            .pop_for_undo(self.root.clone())
            .ok_or(TreeError::NothingToUndo)?;
        self.root = previous;
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), TreeError> {
        let next = self
            .history
            .pop_for_redo(self.root.clone())
            .ok_or(TreeError::NothingToRedo)?;
        self.root = next;
        Ok(())
    }

    /// Replace the whole tree.
    pub fn set_root(&mut self, root: Option<BlockDef>) -> Result<(), TreeError> {
        self.apply("Set root", root)
    }

    fn apply(&mut self, label: &str, candidate: Option<BlockDef>) -> Result<(), TreeError> {
        let candidate = candidate.and_then(|root| canonicalize_tree(&root));

        if let Some(root) = &candidate {
            ensure_unique_ids(root)?;

            // Only references made dangling by this edit are refused
            let existing = self
                .root
                .as_ref()
                .map(|r| scope_violations(r, &self.context_vars))
                .unwrap_or_default();
            if let Some(violation) = scope_violations(root, &self.context_vars)
                .into_iter()
                .find(|v| !existing.contains(v))
            {
                return Err(violation.into());
            }
        }

        if candidate == self.root {
            return Ok(());
        }

        let previous = std::mem::replace(&mut self.root, candidate);
        self.history.push(label, previous);
        debug!("[DesignerStore] Applied edit: {}", label);
        Ok(())
    }

    fn require_root(&self) -> Result<&BlockDef, TreeError> {
        self.root
            .as_ref()
            .ok_or_else(|| TreeError::TargetNotFound("root".to_string()))
    }

    fn require_block(&self, block_id: &str) -> Result<&BlockDef, TreeError> {
        let root = self.require_root()?;
        if find_block(root, block_id).is_none() {
            return Err(TreeError::TargetNotFound(block_id.to_string()));
        }
        Ok(root)
    }
}

impl BlockStore for DesignerStore {
    fn alter_block(
        &mut self,
        block_id: &str,
        action: &mut dyn FnMut(BlockDef) -> Option<BlockDef>,
    ) -> Result<(), TreeError> {
        let root = self.require_block(block_id)?;
        let altered = alter_block(root, block_id, action);
        self.apply("Alter block", altered)
    }

    fn replace_block(&mut self, block_def: BlockDef) -> Result<(), TreeError> {
        let root = self.require_block(block_def.id())?;
        let replaced = replace_block(root, &block_def);
        self.apply("Replace block", Some(replaced))
    }

    fn remove_block(&mut self, block_id: &str) -> Result<(), TreeError> {
        let root = self.require_block(block_id)?;
        let removed = remove_block(root, block_id);
        self.apply("Remove block", removed)
    }

    fn drag_and_drop_block(
        &mut self,
        source: &BlockDef,
        target_id: &str,
        side: DropSide,
    ) -> Result<(), TreeError> {
        if source.id() == target_id {
            return Ok(());
        }
        let root = self.require_root()?;
        // Dragging the root itself would leave nothing to drop onto
        let Some(without_source) = remove_block(root, source.id()) else {
            return Ok(());
        };
        let dropped = checked_drop_block(&without_source, source, target_id, side)?;
        self.apply("Move block", Some(dropped))
    }

    fn add_from_palette(
        &mut self,
        template: &BlockDef,
        target_id: &str,
        side: DropSide,
    ) -> Result<(), TreeError> {
        let fresh = duplicate(template);
        let next = match &self.root {
            None => fresh,
            Some(root) => checked_drop_block(root, &fresh, target_id, side)?,
        };
        self.apply("Add block", Some(next))
    }
}
