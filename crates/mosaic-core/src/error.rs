/// Structural errors from tree edits.
///
/// These are programming errors: an edit that would leave a duplicate id or a
/// dangling variable reference is refused rather than repaired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("Unknown drop side: {0}")]
    UnknownSide(String),

    #[error("Duplicate block id: {0}")]
    DuplicateId(String),

    #[error("Block {block_id} references context variable {variable_id} which is not in scope")]
    VariableOutOfScope {
        block_id: String,
        variable_id: String,
    },

    #[error("Block not found: {0}")]
    TargetNotFound(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}
