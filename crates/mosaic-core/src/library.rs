//! Widget and action libraries, passed to tree operations inside [`BlockCtx`].

use async_trait::async_trait;
use mosaic_api::{ContextVar, ContextVarValues, Expr, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::blocks::BlockDef;

pub type ActionResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Reusable block tree with its own declared context variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDef {
    pub id: String,
    pub name: String,
    pub block_def: Option<BlockDef>,
    /// Variables the widget expects from whoever embeds it
    #[serde(default)]
    pub context_vars: Vec<ContextVar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetLibrary {
    pub widgets: HashMap<String, WidgetDef>,
}

impl WidgetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_widget(mut self, widget: WidgetDef) -> Self {
        self.widgets.insert(widget.id.clone(), widget);
        self
    }

    pub fn get(&self, id: &str) -> Option<&WidgetDef> {
        self.widgets.get(id)
    }
}

/// Serialized action attached to a button or a table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ActionDef {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Hooks for actions: which expressions they need, and their effect.
#[async_trait]
pub trait ActionLibrary: Send + Sync {
    /// Expressions the action evaluates against `context_var` when performed.
    fn context_var_exprs(&self, action: &ActionDef, context_var: &ContextVar) -> Vec<Expr>;

    fn validate(&self, _action: &ActionDef, _context_vars: &[ContextVar]) -> Option<String> {
        None
    }

    async fn perform_action(
        &self,
        action: &ActionDef,
        context_vars: &[ContextVar],
        context_var_values: &ContextVarValues,
    ) -> ActionResult<()>;
}

/// Library with no actions; every action is unknown.
pub struct NullActionLibrary;

#[async_trait]
impl ActionLibrary for NullActionLibrary {
    fn context_var_exprs(&self, _action: &ActionDef, _context_var: &ContextVar) -> Vec<Expr> {
        Vec::new()
    }

    fn validate(&self, action: &ActionDef, _context_vars: &[ContextVar]) -> Option<String> {
        Some(format!("Unknown action {}", action.action_type))
    }

    async fn perform_action(
        &self,
        action: &ActionDef,
        _context_vars: &[ContextVar],
        _context_var_values: &ContextVarValues,
    ) -> ActionResult<()> {
        Err(format!("Unknown action {}", action.action_type).into())
    }
}

/// Environment threaded through block operations.
#[derive(Clone, Copy)]
pub struct BlockCtx<'a> {
    pub schema: &'a Schema,
    pub widget_library: &'a WidgetLibrary,
    pub action_library: &'a dyn ActionLibrary,
}

impl<'a> BlockCtx<'a> {
    pub fn new(
        schema: &'a Schema,
        widget_library: &'a WidgetLibrary,
        action_library: &'a dyn ActionLibrary,
    ) -> Self {
        Self {
            schema,
            widget_library,
            action_library,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_library_rejects_actions() -> anyhow::Result<()> {
        let action = ActionDef::new("open").with_param("page", serde_json::json!("home"));

        assert_eq!(
            NullActionLibrary.validate(&action, &[]),
            Some("Unknown action open".to_string())
        );
        let result = NullActionLibrary
            .perform_action(&action, &[], &ContextVarValues::new())
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn action_params_flatten_beside_type() {
        let action = ActionDef::new("open").with_param("page", serde_json::json!("home"));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json, serde_json::json!({"type": "open", "page": "home"}));
    }
}
