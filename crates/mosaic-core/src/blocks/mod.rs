//! Block definitions.
//!
//! [`BlockDef`] is a closed set of block types tagged by `type`. Behaviour that
//! differs per type lives in each definition's [`Block`] impl and is reached
//! through [`BlockDef::behavior`]; adding a type means adding a variant and an
//! arm to the dispatch macro below.

mod content;
mod data;
mod layout;
mod toc;
mod widget;

pub use content::{
    ButtonBlockDef, CollapsibleBlockDef, ExpressionBlockDef, ImageBlockDef, ImageSizeMode,
    LabeledBlockDef, TextBlockDef, TextStyle,
};
pub use data::{
    AddRowBlockDef, ContextVarExpr, QueryTableBlockDef, QueryTableMode, RowBlockDef,
    SaveCancelBlockDef, SearchBlockDef,
};
pub use layout::{HorizontalAlign, HorizontalBlockDef, PanelBlockDef, VerticalBlockDef};
pub use toc::{TocBlockDef, TocItem};
pub use widget::WidgetBlockDef;

use mosaic_api::{ContextVar, Expr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TreeError;
use crate::library::BlockCtx;

/// Fresh globally unique block id.
pub fn new_block_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BlockDef {
    Horizontal(HorizontalBlockDef),
    Vertical(VerticalBlockDef),
    Text(TextBlockDef),
    Expression(ExpressionBlockDef),
    Labeled(LabeledBlockDef),
    Collapsible(CollapsibleBlockDef),
    QueryTable(QueryTableBlockDef),
    Row(RowBlockDef),
    AddRow(AddRowBlockDef),
    Search(SearchBlockDef),
    SaveCancel(SaveCancelBlockDef),
    Widget(WidgetBlockDef),
    Button(ButtonBlockDef),
    Panel(PanelBlockDef),
    Toc(TocBlockDef),
    Image(ImageBlockDef),
}

macro_rules! dispatch {
    ($def:expr, $b:ident => $body:expr) => {
        match $def {
            BlockDef::Horizontal($b) => $body,
            BlockDef::Vertical($b) => $body,
            BlockDef::Text($b) => $body,
            BlockDef::Expression($b) => $body,
            BlockDef::Labeled($b) => $body,
            BlockDef::Collapsible($b) => $body,
            BlockDef::QueryTable($b) => $body,
            BlockDef::Row($b) => $body,
            BlockDef::AddRow($b) => $body,
            BlockDef::Search($b) => $body,
            BlockDef::SaveCancel($b) => $body,
            BlockDef::Widget($b) => $body,
            BlockDef::Button($b) => $body,
            BlockDef::Panel($b) => $body,
            BlockDef::Toc($b) => $body,
            BlockDef::Image($b) => $body,
        }
    };
}

/// A child of a block together with the context variables in scope for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildBlock<'a> {
    pub block_def: &'a BlockDef,
    pub context_vars: Vec<ContextVar>,
}

impl<'a> ChildBlock<'a> {
    pub fn new(block_def: &'a BlockDef, context_vars: Vec<ContextVar>) -> Self {
        Self {
            block_def,
            context_vars,
        }
    }
}

/// Per-type behaviour of a block definition. Defaults describe a leaf that
/// references and introduces nothing.
pub trait Block {
    /// Direct children, each with its scope. A block introducing a variable
    /// appends it to the scope of the children that can see it.
    fn children(&self, _context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        Vec::new()
    }

    /// Rebuild this block with every child replaced by `action(child)`.
    /// `None` from the action empties that slot. Leaves return `None`.
    fn process_children(
        &self,
        _action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        None
    }

    /// Expressions of this block alone that are evaluated against `context_var`.
    fn context_var_exprs(&self, _context_var: &ContextVar, _ctx: &BlockCtx<'_>) -> Vec<Expr> {
        Vec::new()
    }

    /// Ids of the variables this block introduces to its descendants.
    fn introduced_var_ids(&self) -> Vec<String> {
        Vec::new()
    }

    /// Ids of the outer variables this block refers to.
    fn referenced_var_ids(&self) -> Vec<String> {
        Vec::new()
    }

    /// Copy of this block with its own variable references rewritten.
    /// Children are left alone. `None` when there is nothing to rewrite.
    fn map_var_ids(&self, _map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        None
    }

    /// User-facing reason this block is not usable yet.
    fn validate(&self, _ctx: &BlockCtx<'_>, _context_vars: &[ContextVar]) -> Option<String> {
        None
    }

    /// Whether the subtree evaluates on its own and contributes no
    /// expressions to outer variables.
    fn isolates_subtree(&self) -> bool {
        false
    }
}

impl BlockDef {
    pub fn behavior(&self) -> &dyn Block {
        dispatch!(self, b => b as &dyn Block)
    }

    pub fn id(&self) -> &str {
        dispatch!(self, b => &b.id)
    }

    pub fn id_mut(&mut self) -> &mut String {
        dispatch!(self, b => &mut b.id)
    }

    pub fn block_type(&self) -> &'static str {
        match self {
            BlockDef::Horizontal(_) => "horizontal",
            BlockDef::Vertical(_) => "vertical",
            BlockDef::Text(_) => "text",
            BlockDef::Expression(_) => "expression",
            BlockDef::Labeled(_) => "labeled",
            BlockDef::Collapsible(_) => "collapsible",
            BlockDef::QueryTable(_) => "queryTable",
            BlockDef::Row(_) => "row",
            BlockDef::AddRow(_) => "addRow",
            BlockDef::Search(_) => "search",
            BlockDef::SaveCancel(_) => "saveCancel",
            BlockDef::Widget(_) => "widget",
            BlockDef::Button(_) => "button",
            BlockDef::Panel(_) => "panel",
            BlockDef::Toc(_) => "toc",
            BlockDef::Image(_) => "image",
        }
    }

    pub fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        self.behavior().children(context_vars)
    }

    /// Post-order rewrite. Children are processed first, then `action` sees
    /// this block rebuilt with the processed children. Returning `None`
    /// removes the block from its parent.
    pub fn process<F>(&self, action: &mut F) -> Option<BlockDef>
    where
        F: FnMut(BlockDef) -> Option<BlockDef>,
    {
        let rebuilt = self
            .behavior()
            .process_children(&mut |child: &BlockDef| child.process(&mut *action))
            .unwrap_or_else(|| self.clone());
        action(rebuilt)
    }

    /// Post-order rewrite that keeps every node.
    pub fn map_tree<F>(&self, f: &mut F) -> BlockDef
    where
        F: FnMut(BlockDef) -> BlockDef,
    {
        let rebuilt = self
            .behavior()
            .process_children(&mut |child: &BlockDef| Some(child.map_tree(&mut *f)))
            .unwrap_or_else(|| self.clone());
        f(rebuilt)
    }

    /// Node-local normalization: empty containers disappear and containers
    /// with one item are replaced by that item.
    pub fn canonicalize(&self) -> Option<BlockDef> {
        let items = match self {
            BlockDef::Horizontal(b) => &b.items,
            BlockDef::Vertical(b) => &b.items,
            _ => return Some(self.clone()),
        };
        match items.len() {
            0 => None,
            1 => Some(items[0].clone()),
            _ => Some(self.clone()),
        }
    }

    /// Place `dropped` next to the block `target_id`.
    ///
    /// A target directly inside a container of the matching axis gets the
    /// dropped block spliced in beside it. Otherwise the target is wrapped in a
    /// new container: left/right make a horizontal one, top/bottom a vertical
    /// one, with the dropped block first for left/top.
    pub fn drop_block(&self, dropped: &BlockDef, target_id: &str, side: DropSide) -> BlockDef {
        if self.id() == target_id {
            return wrap(self, dropped, side);
        }

        if let Some(spliced) = self.splice(dropped, target_id, side) {
            return spliced;
        }

        self.behavior()
            .process_children(&mut |child: &BlockDef| {
                Some(child.drop_block(dropped, target_id, side))
            })
            .unwrap_or_else(|| self.clone())
    }

    fn splice(&self, dropped: &BlockDef, target_id: &str, side: DropSide) -> Option<BlockDef> {
        let insert = |items: &[BlockDef]| -> Option<Vec<BlockDef>> {
            let index = items.iter().position(|item| item.id() == target_id)?;
            let at = match side {
                DropSide::Left | DropSide::Top => index,
                DropSide::Right | DropSide::Bottom => index + 1,
            };
            let mut items = items.to_vec();
            items.insert(at, dropped.clone());
            Some(items)
        };

        match (self, side) {
            (BlockDef::Horizontal(b), DropSide::Left | DropSide::Right) => {
                Some(BlockDef::Horizontal(HorizontalBlockDef {
                    id: b.id.clone(),
                    items: insert(&b.items)?,
                    align: b.align,
                }))
            }
            (BlockDef::Vertical(b), DropSide::Top | DropSide::Bottom) => {
                Some(BlockDef::Vertical(VerticalBlockDef {
                    id: b.id.clone(),
                    items: insert(&b.items)?,
                }))
            }
            _ => None,
        }
    }

    pub fn context_var_exprs(&self, context_var: &ContextVar, ctx: &BlockCtx<'_>) -> Vec<Expr> {
        self.behavior().context_var_exprs(context_var, ctx)
    }

    pub fn introduced_var_ids(&self) -> Vec<String> {
        self.behavior().introduced_var_ids()
    }

    pub fn referenced_var_ids(&self) -> Vec<String> {
        self.behavior().referenced_var_ids()
    }

    pub fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> BlockDef {
        self.behavior()
            .map_var_ids(map)
            .unwrap_or_else(|| self.clone())
    }

    pub fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        self.behavior().validate(ctx, context_vars)
    }
}

fn wrap(target: &BlockDef, dropped: &BlockDef, side: DropSide) -> BlockDef {
    let (target, dropped) = (target.clone(), dropped.clone());
    match side {
        DropSide::Left => BlockDef::Horizontal(HorizontalBlockDef::new(vec![dropped, target])),
        DropSide::Right => BlockDef::Horizontal(HorizontalBlockDef::new(vec![target, dropped])),
        DropSide::Top => BlockDef::Vertical(VerticalBlockDef::new(vec![dropped, target])),
        DropSide::Bottom => BlockDef::Vertical(VerticalBlockDef::new(vec![target, dropped])),
    }
}

/// Side of a target block a dragged block is dropped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropSide {
    Top,
    Bottom,
    Left,
    Right,
}

impl FromStr for DropSide {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top" => Ok(DropSide::Top),
            "bottom" => Ok(DropSide::Bottom),
            "left" => Ok(DropSide::Left),
            "right" => Ok(DropSide::Right),
            _ => Err(TreeError::UnknownSide(s.to_string())),
        }
    }
}

impl fmt::Display for DropSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropSide::Top => "Top",
            DropSide::Bottom => "Bottom",
            DropSide::Left => "Left",
            DropSide::Right => "Right",
        };
        f.write_str(name)
    }
}

/// Run `action` over an optional single-child slot.
pub(crate) fn process_slot(
    slot: &Option<Box<BlockDef>>,
    action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
) -> Option<Box<BlockDef>> {
    slot.as_deref().and_then(|child| action(child)).map(Box::new)
}

/// Scope entry for an optional single-child slot.
pub(crate) fn slot_child<'a>(
    slot: &'a Option<Box<BlockDef>>,
    context_vars: Vec<ContextVar>,
) -> Option<ChildBlock<'a>> {
    slot.as_deref().map(|child| ChildBlock::new(child, context_vars))
}

/// Rewrite the variable ids of an optional expression.
pub(crate) fn map_expr(expr: &Option<Expr>, map: &dyn Fn(&str) -> String) -> Option<Expr> {
    expr.as_ref().map(|e| e.map_variables(map))
}

/// Variable ids referenced by a set of optional expressions.
pub(crate) fn expr_var_ids<'a>(exprs: impl IntoIterator<Item = &'a Option<Expr>>) -> Vec<String> {
    exprs
        .into_iter()
        .flatten()
        .flat_map(|e| e.variable_ids())
        .map(str::to_string)
        .collect()
}

pub(crate) fn find_context_var<'a>(
    context_vars: &'a [ContextVar],
    id: Option<&String>,
) -> Option<&'a ContextVar> {
    let id = id?;
    context_vars.iter().find(|cv| &cv.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(id: &str) -> BlockDef {
        BlockDef::Text(TextBlockDef::new(id, id))
    }

    #[test]
    fn drop_left_wraps_horizontally_dropped_first() {
        let result = text("b").drop_block(&text("a"), "b", DropSide::Left);
        let BlockDef::Horizontal(h) = result else {
            panic!("expected horizontal");
        };
        let ids: Vec<&str> = h.items.iter().map(BlockDef::id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn drop_bottom_wraps_vertically_target_first() {
        let result = text("b").drop_block(&text("a"), "b", DropSide::Bottom);
        let BlockDef::Vertical(v) = result else {
            panic!("expected vertical");
        };
        let ids: Vec<&str> = v.items.iter().map(BlockDef::id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn drop_splices_into_matching_container() {
        let root = BlockDef::Horizontal(HorizontalBlockDef {
            id: "h".into(),
            items: vec![text("x"), text("y")],
            align: HorizontalAlign::default(),
        });
        let result = root.drop_block(&text("a"), "y", DropSide::Left);
        let BlockDef::Horizontal(h) = result else {
            panic!("expected horizontal");
        };
        assert_eq!(h.id, "h");
        let ids: Vec<&str> = h.items.iter().map(BlockDef::id).collect();
        assert_eq!(ids, vec!["x", "a", "y"]);
    }

    #[test]
    fn drop_across_axis_wraps_the_item() {
        let root = BlockDef::Horizontal(HorizontalBlockDef {
            id: "h".into(),
            items: vec![text("x"), text("y")],
            align: HorizontalAlign::default(),
        });
        let result = root.drop_block(&text("a"), "y", DropSide::Top);
        let BlockDef::Horizontal(h) = result else {
            panic!("expected horizontal");
        };
        let BlockDef::Vertical(v) = &h.items[1] else {
            panic!("expected vertical wrapper");
        };
        let ids: Vec<&str> = v.items.iter().map(BlockDef::id).collect();
        assert_eq!(ids, vec!["a", "y"]);
    }

    #[test]
    fn side_names_parse_and_reject_unknown() {
        assert_eq!("Left".parse::<DropSide>().unwrap(), DropSide::Left);
        assert_eq!("bottom".parse::<DropSide>().unwrap(), DropSide::Bottom);
        assert_eq!(
            "middle".parse::<DropSide>(),
            Err(TreeError::UnknownSide("middle".into()))
        );
    }

    #[test]
    fn serde_uses_type_tag() {
        let json = serde_json::json!({
            "type": "vertical",
            "id": "v",
            "items": [{ "type": "text", "id": "t", "text": "hi" }]
        });
        let def: BlockDef = serde_json::from_value(json).unwrap();
        assert_eq!(def.block_type(), "vertical");
        assert_eq!(def.children(&[])[0].block_def.id(), "t");
    }
}
