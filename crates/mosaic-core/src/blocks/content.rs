use mosaic_api::{AggrStatus, ContextVar, Expr, ExprUtils};
use serde::{Deserialize, Serialize};

use super::{
    expr_var_ids, find_context_var, map_expr, process_slot, slot_child, Block, BlockDef,
    ChildBlock,
};
use crate::embedded::{validate_embedded_exprs, EmbeddedExpr};
use crate::library::{ActionDef, BlockCtx};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStyle {
    #[default]
    Div,
    P,
    H1,
    H2,
    H3,
    H4,
}

/// Static text with optional `{N}` placeholders backed by embedded expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlockDef {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default)]
    pub embedded_exprs: Vec<EmbeddedExpr>,
}

impl TextBlockDef {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            style: TextStyle::default(),
            embedded_exprs: Vec::new(),
        }
    }
}

impl Block for TextBlockDef {
    fn context_var_exprs(&self, context_var: &ContextVar, _ctx: &BlockCtx<'_>) -> Vec<Expr> {
        self.embedded_exprs
            .iter()
            .filter(|e| e.context_var_id.as_deref() == Some(context_var.id.as_str()))
            .filter_map(|e| e.expr.clone())
            .collect()
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .embedded_exprs
            .iter()
            .filter_map(|e| e.context_var_id.clone())
            .collect();
        ids.extend(expr_var_ids(self.embedded_exprs.iter().map(|e| &e.expr)));
        ids
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        let embedded_exprs = self
            .embedded_exprs
            .iter()
            .map(|e| EmbeddedExpr {
                context_var_id: e.context_var_id.as_deref().map(map),
                expr: map_expr(&e.expr, map),
                format: e.format.clone(),
            })
            .collect();
        Some(BlockDef::Text(Self {
            embedded_exprs,
            ..self.clone()
        }))
    }

    fn validate(&self, _ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        validate_embedded_exprs(&self.embedded_exprs, context_vars)
    }
}

/// Displays the value of one expression evaluated against a row or rowset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionBlockDef {
    pub id: String,
    pub context_var_id: Option<String>,
    pub expr: Option<Expr>,
    #[serde(default)]
    pub format: Option<String>,
}

impl Block for ExpressionBlockDef {
    fn context_var_exprs(&self, context_var: &ContextVar, _ctx: &BlockCtx<'_>) -> Vec<Expr> {
        if self.context_var_id.as_deref() != Some(context_var.id.as_str()) {
            return Vec::new();
        }
        self.expr.iter().cloned().collect()
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.context_var_id.iter().cloned().collect();
        ids.extend(expr_var_ids([&self.expr]));
        ids
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        Some(BlockDef::Expression(Self {
            id: self.id.clone(),
            context_var_id: self.context_var_id.as_deref().map(map),
            expr: map_expr(&self.expr, map),
            format: self.format.clone(),
        }))
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        let Some(context_var) = find_context_var(context_vars, self.context_var_id.as_ref())
        else {
            return Some("Context variable required".to_string());
        };
        let Some(expr) = &self.expr else {
            return Some("Expression required".to_string());
        };

        let utils = ExprUtils::new(ctx.schema, context_vars);
        if context_var.is_rowset() && utils.aggr_status(expr) == AggrStatus::Individual {
            return Some("Expression must be aggregate for a rowset".to_string());
        }
        None
    }
}

/// A child with a caption above it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledBlockDef {
    pub id: String,
    pub label: String,
    pub child: Option<Box<BlockDef>>,
}

impl Block for LabeledBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        slot_child(&self.child, context_vars.to_vec())
            .into_iter()
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        Some(BlockDef::Labeled(Self {
            id: self.id.clone(),
            label: self.label.clone(),
            child: process_slot(&self.child, action),
        }))
    }
}

/// Header block that shows or hides a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollapsibleBlockDef {
    pub id: String,
    pub label: Option<Box<BlockDef>>,
    pub content: Option<Box<BlockDef>>,
    #[serde(default)]
    pub initially_collapsed: bool,
}

impl Block for CollapsibleBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        slot_child(&self.label, context_vars.to_vec())
            .into_iter()
            .chain(slot_child(&self.content, context_vars.to_vec()))
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        let label = process_slot(&self.label, action);
        let content = process_slot(&self.content, action);
        Some(BlockDef::Collapsible(Self {
            id: self.id.clone(),
            label,
            content,
            initially_collapsed: self.initially_collapsed,
        }))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSizeMode {
    /// At most the available width
    #[default]
    Normal,
    /// Stretched to the available width
    Fullwidth,
    /// Stretched past the page margins
    Banner,
}

/// Static image, optionally performing an action when clicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlockDef {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub click_action: Option<ActionDef>,
    #[serde(default)]
    pub size_mode: ImageSizeMode,
}

impl Block for ImageBlockDef {
    fn context_var_exprs(&self, context_var: &ContextVar, ctx: &BlockCtx<'_>) -> Vec<Expr> {
        match &self.click_action {
            Some(action) => ctx.action_library.context_var_exprs(action, context_var),
            None => Vec::new(),
        }
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        if self.url.as_deref().map_or(true, str::is_empty) {
            return Some("URL required".to_string());
        }
        let action = self.click_action.as_ref()?;
        ctx.action_library.validate(action, context_vars)
    }
}

/// Button that performs an action from the action library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonBlockDef {
    pub id: String,
    pub label: String,
    pub action: Option<ActionDef>,
}

impl Block for ButtonBlockDef {
    fn context_var_exprs(&self, context_var: &ContextVar, ctx: &BlockCtx<'_>) -> Vec<Expr> {
        match &self.action {
            Some(action) => ctx.action_library.context_var_exprs(action, context_var),
            None => Vec::new(),
        }
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        if self.label.is_empty() {
            return Some("Label required".to_string());
        }
        let action = self.action.as_ref()?;
        ctx.action_library.validate(action, context_vars)
    }
}
