use mosaic_api::{ContextVar, Expr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Block, BlockDef};
use crate::library::BlockCtx;
use crate::tree::flatten;

/// Embeds a widget from the library. `context_var_map` maps each of the
/// widget's inner variable ids to an outer variable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetBlockDef {
    pub id: String,
    pub widget_id: Option<String>,
    #[serde(default)]
    pub context_var_map: BTreeMap<String, String>,
}

impl WidgetBlockDef {
    fn inner_to_outer(&self, expr: &Expr) -> Expr {
        expr.map_variables(&|inner| {
            self.context_var_map
                .get(inner)
                .cloned()
                .unwrap_or_else(|| inner.to_string())
        })
    }
}

impl Block for WidgetBlockDef {
    fn context_var_exprs(&self, context_var: &ContextVar, ctx: &BlockCtx<'_>) -> Vec<Expr> {
        let Some(widget) = self
            .widget_id
            .as_deref()
            .and_then(|id| ctx.widget_library.get(id))
        else {
            return Vec::new();
        };
        let Some(inner_root) = &widget.block_def else {
            return Vec::new();
        };
        let Some(inner_var) = widget
            .context_vars
            .iter()
            .find(|cv| self.context_var_map.get(&cv.id) == Some(&context_var.id))
        else {
            return Vec::new();
        };

        flatten(inner_root, &widget.context_vars)
            .iter()
            .flat_map(|child| child.block_def.context_var_exprs(inner_var, ctx))
            .map(|expr| self.inner_to_outer(&expr))
            .collect()
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        self.context_var_map.values().cloned().collect()
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        Some(BlockDef::Widget(Self {
            id: self.id.clone(),
            widget_id: self.widget_id.clone(),
            context_var_map: self
                .context_var_map
                .iter()
                .map(|(inner, outer)| (inner.clone(), map(outer)))
                .collect(),
        }))
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        let Some(widget_id) = &self.widget_id else {
            return Some("Widget required".to_string());
        };
        if ctx.widget_library.get(widget_id).is_none() {
            return Some("Invalid widget".to_string());
        }
        let all_mapped = self
            .context_var_map
            .values()
            .all(|outer| context_vars.iter().any(|cv| &cv.id == outer));
        if !all_mapped {
            return Some("Missing context variable in mapping".to_string());
        }
        None
    }
}
