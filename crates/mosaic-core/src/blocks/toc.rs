use mosaic_api::ContextVar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{new_block_id, process_slot, slot_child, Block, BlockDef, ChildBlock};
use crate::library::BlockCtx;

/// Entry of a table of contents. Selecting it shows `widget_id` in the main
/// area with the widget's variables bound through `context_var_map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub widget_id: Option<String>,
    #[serde(default)]
    pub context_var_map: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<TocItem>,
}

impl TocItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: new_block_id(),
            label: label.into(),
            widget_id: None,
            context_var_map: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_widget(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }

    pub fn with_mapping(mut self, inner: impl Into<String>, outer: impl Into<String>) -> Self {
        self.context_var_map.insert(inner.into(), outer.into());
        self
    }

    pub fn with_children(mut self, children: Vec<TocItem>) -> Self {
        self.children = children;
        self
    }
}

/// Table of contents with nested items, each showing a widget in the main
/// area. Header and footer are the only child blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocBlockDef {
    pub id: String,
    #[serde(default)]
    pub items: Vec<TocItem>,
    #[serde(default)]
    pub header: Option<Box<BlockDef>>,
    #[serde(default)]
    pub footer: Option<Box<BlockDef>>,
}

impl TocBlockDef {
    pub fn new(items: Vec<TocItem>) -> Self {
        Self {
            id: new_block_id(),
            items,
            header: None,
            footer: None,
        }
    }

    /// Every item, parents before their children.
    pub fn iter_items(&self) -> Vec<&TocItem> {
        fn walk<'a>(items: &'a [TocItem], out: &mut Vec<&'a TocItem>) {
            for item in items {
                out.push(item);
                walk(&item.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.items, &mut out);
        out
    }

    /// Rewrite the item tree. `action` returns the replacement items for each
    /// item: none deletes it, several split it. Children of the replacements
    /// are visited afterwards.
    pub fn alter_items(&self, action: &mut dyn FnMut(TocItem) -> Vec<TocItem>) -> Self {
        fn alter(items: &[TocItem], action: &mut dyn FnMut(TocItem) -> Vec<TocItem>) -> Vec<TocItem> {
            let mut altered = Vec::new();
            for item in items {
                for mut replacement in action(item.clone()) {
                    replacement.children = alter(&replacement.children, action);
                    altered.push(replacement);
                }
            }
            altered
        }
        Self {
            items: alter(&self.items, action),
            ..self.clone()
        }
    }
}

impl Block for TocBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        slot_child(&self.header, context_vars.to_vec())
            .into_iter()
            .chain(slot_child(&self.footer, context_vars.to_vec()))
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        let header = process_slot(&self.header, action);
        let footer = process_slot(&self.footer, action);
        Some(BlockDef::Toc(Self {
            header,
            footer,
            ..self.clone()
        }))
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        self.iter_items()
            .into_iter()
            .flat_map(|item| item.context_var_map.values().cloned())
            .collect()
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        let mapped = self.alter_items(&mut |mut item| {
            item.context_var_map = item
                .context_var_map
                .iter()
                .map(|(inner, outer)| (inner.clone(), map(outer)))
                .collect();
            vec![item]
        });
        Some(BlockDef::Toc(mapped))
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        for item in self.iter_items() {
            let Some(widget_id) = &item.widget_id else {
                continue;
            };
            if ctx.widget_library.get(widget_id).is_none() {
                return Some(format!("Invalid widget for {}", item.label));
            }
            let all_mapped = item
                .context_var_map
                .values()
                .all(|outer| context_vars.iter().any(|cv| &cv.id == outer));
            if !all_mapped {
                return Some(format!("Missing context variable in mapping for {}", item.label));
            }
        }
        None
    }
}
