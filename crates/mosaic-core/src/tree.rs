//! Whole-tree algorithms over [`BlockDef`] values.
//!
//! Everything here is pure: edits return new trees and the checked entry
//! points refuse to return a tree with duplicate ids or references to
//! variables that are not in scope.

use mosaic_api::{ContextVar, Expr};
use std::collections::{HashMap, HashSet};

use crate::blocks::{new_block_id, BlockDef, ChildBlock, DropSide};
use crate::error::TreeError;
use crate::library::BlockCtx;

/// Pre-order traversal; each entry carries the scope its block sees.
pub fn flatten<'a>(root: &'a BlockDef, context_vars: &[ContextVar]) -> Vec<ChildBlock<'a>> {
    let mut out = Vec::new();
    let mut stack = vec![ChildBlock::new(root, context_vars.to_vec())];
    while let Some(node) = stack.pop() {
        let children = node.block_def.children(&node.context_vars);
        out.push(node);
        stack.extend(children.into_iter().rev());
    }
    out
}

/// Root-first path to `block_id`, with the scope at each depth.
pub fn find_ancestry<'a>(
    root: &'a BlockDef,
    context_vars: &[ContextVar],
    block_id: &str,
) -> Option<Vec<ChildBlock<'a>>> {
    fn walk<'a>(node: ChildBlock<'a>, block_id: &str, path: &mut Vec<ChildBlock<'a>>) -> bool {
        let found = node.block_def.id() == block_id;
        let children = node.block_def.children(&node.context_vars);
        path.push(node);
        if found || children.into_iter().any(|child| walk(child, block_id, path)) {
            return true;
        }
        path.pop();
        false
    }

    let mut path = Vec::new();
    walk(ChildBlock::new(root, context_vars.to_vec()), block_id, &mut path).then_some(path)
}

pub fn find_block<'a>(root: &'a BlockDef, block_id: &str) -> Option<&'a BlockDef> {
    flatten(root, &[])
        .into_iter()
        .map(|child| child.block_def)
        .find(|def| def.id() == block_id)
}

/// Bottom-up canonicalization. `None` when the whole tree collapses.
pub fn canonicalize_tree(root: &BlockDef) -> Option<BlockDef> {
    root.process(&mut |def: BlockDef| def.canonicalize())
}

/// Replace the block whose id matches `replacement`'s.
pub fn replace_block(root: &BlockDef, replacement: &BlockDef) -> BlockDef {
    root.map_tree(&mut |def: BlockDef| {
        if def.id() == replacement.id() {
            replacement.clone()
        } else {
            def
        }
    })
}

/// Remove the block `block_id` and its subtree. `None` when it is the root.
pub fn remove_block(root: &BlockDef, block_id: &str) -> Option<BlockDef> {
    root.process(&mut |def: BlockDef| (def.id() != block_id).then_some(def))
}

/// Apply `action` to the block `block_id` only.
pub fn alter_block(
    root: &BlockDef,
    block_id: &str,
    action: &mut dyn FnMut(BlockDef) -> Option<BlockDef>,
) -> Option<BlockDef> {
    root.process(&mut |def: BlockDef| {
        if def.id() == block_id {
            action(def)
        } else {
            Some(def)
        }
    })
}

/// Deep copy with a fresh id on every block. Variables introduced by the
/// copied blocks are renamed too, so the copy never refers to the original.
pub fn duplicate(root: &BlockDef) -> BlockDef {
    let mut id_map: HashMap<String, String> = HashMap::new();
    let mut var_map: HashMap<String, String> = HashMap::new();

    for node in flatten(root, &[]) {
        let old_id = node.block_def.id().to_string();
        let new_id = new_block_id();
        // Introduced variable ids derive from the id of the block introducing them
        let mut renamed = node.block_def.clone();
        *renamed.id_mut() = new_id.clone();
        var_map.extend(
            node.block_def
                .introduced_var_ids()
                .into_iter()
                .zip(renamed.introduced_var_ids()),
        );
        id_map.insert(old_id, new_id);
    }
    let rename_var = |id: &str| var_map.get(id).cloned().unwrap_or_else(|| id.to_string());

    root.map_tree(&mut |def: BlockDef| {
        let mut def = def.map_var_ids(&rename_var);
        if let Some(new_id) = id_map.get(def.id()) {
            *def.id_mut() = new_id.clone();
        }
        def
    })
}

/// Expressions of `block` evaluated against `context_var`, optionally
/// followed by those of its whole subtree.
pub fn collect_variable_expressions(
    block: &BlockDef,
    context_var: &ContextVar,
    include_children: bool,
    context_vars: &[ContextVar],
    ctx: &BlockCtx<'_>,
) -> Vec<Expr> {
    if include_children {
        collect_subtree_expressions(block, context_var, context_vars, ctx)
    } else {
        block.context_var_exprs(context_var, ctx)
    }
}

/// The block's own expressions for `context_var`, then each child's, depth
/// first and left to right. Duplicates are kept. Contributes nothing when the
/// variable is not in `context_vars`.
pub fn collect_subtree_expressions(
    block: &BlockDef,
    context_var: &ContextVar,
    context_vars: &[ContextVar],
    ctx: &BlockCtx<'_>,
) -> Vec<Expr> {
    if !context_vars.iter().any(|cv| cv.id == context_var.id) {
        return Vec::new();
    }
    if block.behavior().isolates_subtree() {
        return Vec::new();
    }

    let mut exprs = block.context_var_exprs(context_var, ctx);
    for child in block.children(context_vars) {
        exprs.extend(collect_subtree_expressions(
            child.block_def,
            context_var,
            &child.context_vars,
            ctx,
        ));
    }
    exprs
}

pub fn ensure_unique_ids(root: &BlockDef) -> Result<(), TreeError> {
    let mut seen = HashSet::new();
    for node in flatten(root, &[]) {
        if !seen.insert(node.block_def.id()) {
            return Err(TreeError::DuplicateId(node.block_def.id().to_string()));
        }
    }
    Ok(())
}

/// A block referring to a variable it cannot see.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeViolation {
    pub block_id: String,
    pub variable_id: String,
}

impl From<ScopeViolation> for TreeError {
    fn from(v: ScopeViolation) -> Self {
        TreeError::VariableOutOfScope {
            block_id: v.block_id,
            variable_id: v.variable_id,
        }
    }
}

pub fn scope_violations(root: &BlockDef, context_vars: &[ContextVar]) -> Vec<ScopeViolation> {
    flatten(root, context_vars)
        .into_iter()
        .flat_map(|node| {
            node.block_def
                .referenced_var_ids()
                .into_iter()
                .filter(|id| !node.context_vars.iter().any(|cv| &cv.id == id))
                .map(|variable_id| ScopeViolation {
                    block_id: node.block_def.id().to_string(),
                    variable_id,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn ensure_scoped(root: &BlockDef, context_vars: &[ContextVar]) -> Result<(), TreeError> {
    match scope_violations(root, context_vars).into_iter().next() {
        Some(violation) => Err(violation.into()),
        None => Ok(()),
    }
}

/// [`BlockDef::drop_block`] with the target checked to exist and the result
/// checked for duplicate ids.
pub fn checked_drop_block(
    root: &BlockDef,
    dropped: &BlockDef,
    target_id: &str,
    side: DropSide,
) -> Result<BlockDef, TreeError> {
    if find_block(root, target_id).is_none() {
        return Err(TreeError::TargetNotFound(target_id.to_string()));
    }
    let result = root.drop_block(dropped, target_id, side);
    ensure_unique_ids(&result)?;
    Ok(result)
}

/// `(block id, message)` for every block that fails validation.
pub fn validate_tree(
    root: &BlockDef,
    ctx: &BlockCtx<'_>,
    context_vars: &[ContextVar],
) -> Vec<(String, String)> {
    flatten(root, context_vars)
        .into_iter()
        .filter_map(|node| {
            node.block_def
                .validate(ctx, &node.context_vars)
                .map(|message| (node.block_def.id().to_string(), message))
        })
        .collect()
}
