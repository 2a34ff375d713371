//! Block tree model for Mosaic.
//!
//! A page is an immutable tree of [`BlockDef`] values. Blocks may introduce
//! context variables visible to their descendants; the tree algorithms in
//! [`tree`] keep ids unique and variable references in scope, and the
//! [`designer`] store layers undo/redo editing on top.

pub mod blocks;
pub mod designer;
pub mod embedded;
pub mod error;
pub mod library;
pub mod tree;
pub mod undo;

pub use blocks::{new_block_id, Block, BlockDef, ChildBlock, DropSide};
pub use designer::{BlockStore, DesignerConfig, DesignerStore, NullBlockStore};
pub use error::TreeError;
pub use library::{ActionDef, ActionLibrary, BlockCtx, NullActionLibrary, WidgetDef, WidgetLibrary};
