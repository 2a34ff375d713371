use mosaic_api::ContextVar;
use serde::{Deserialize, Serialize};

use super::{new_block_id, process_slot, slot_child, Block, BlockDef, ChildBlock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAlign {
    #[default]
    Justify,
    Left,
    Center,
    Right,
}

/// Items laid out side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizontalBlockDef {
    pub id: String,
    #[serde(default)]
    pub items: Vec<BlockDef>,
    #[serde(default)]
    pub align: HorizontalAlign,
}

impl HorizontalBlockDef {
    pub fn new(items: Vec<BlockDef>) -> Self {
        Self {
            id: new_block_id(),
            items,
            align: HorizontalAlign::default(),
        }
    }
}

impl Block for HorizontalBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        self.items
            .iter()
            .map(|item| ChildBlock::new(item, context_vars.to_vec()))
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        Some(BlockDef::Horizontal(Self {
            id: self.id.clone(),
            items: self.items.iter().filter_map(|item| action(item)).collect(),
            align: self.align,
        }))
    }
}

/// Items stacked top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerticalBlockDef {
    pub id: String,
    #[serde(default)]
    pub items: Vec<BlockDef>,
}

impl VerticalBlockDef {
    pub fn new(items: Vec<BlockDef>) -> Self {
        Self {
            id: new_block_id(),
            items,
        }
    }
}

impl Block for VerticalBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        self.items
            .iter()
            .map(|item| ChildBlock::new(item, context_vars.to_vec()))
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        Some(BlockDef::Vertical(Self {
            id: self.id.clone(),
            items: self.items.iter().filter_map(|item| action(item)).collect(),
        }))
    }
}

/// Main content with an optional header and footer.
///
/// An empty slot is still shown in the designer while its `show_` flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelBlockDef {
    pub id: String,
    pub main: Option<Box<BlockDef>>,
    #[serde(default)]
    pub header: Option<Box<BlockDef>>,
    #[serde(default)]
    pub footer: Option<Box<BlockDef>>,
    #[serde(default)]
    pub show_header: bool,
    #[serde(default)]
    pub show_footer: bool,
}

impl PanelBlockDef {
    pub fn new(main: Option<BlockDef>) -> Self {
        Self {
            id: new_block_id(),
            main: main.map(Box::new),
            header: None,
            footer: None,
            show_header: false,
            show_footer: false,
        }
    }

    pub fn with_header(mut self, header: BlockDef) -> Self {
        self.header = Some(Box::new(header));
        self.show_header = true;
        self
    }

    pub fn with_footer(mut self, footer: BlockDef) -> Self {
        self.footer = Some(Box::new(footer));
        self.show_footer = true;
        self
    }
}

impl Block for PanelBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        [&self.main, &self.header, &self.footer]
            .into_iter()
            .filter_map(|slot| slot_child(slot, context_vars.to_vec()))
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        let main = process_slot(&self.main, action);
        let header = process_slot(&self.header, action);
        let footer = process_slot(&self.footer, action);
        Some(BlockDef::Panel(Self {
            main,
            header,
            footer,
            ..self.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::TextBlockDef;

    fn text(id: &str) -> BlockDef {
        BlockDef::Text(TextBlockDef::new(id, id))
    }

    #[test]
    fn panel_children_follow_slot_order() {
        let panel = BlockDef::Panel(
            PanelBlockDef::new(Some(text("main")))
                .with_header(text("head"))
                .with_footer(text("foot")),
        );
        let ids: Vec<&str> = panel.children(&[]).iter().map(|c| c.block_def.id()).collect();
        assert_eq!(ids, vec!["main", "head", "foot"]);
    }

    #[test]
    fn removing_a_slot_child_keeps_it_shown() {
        let panel = BlockDef::Panel(PanelBlockDef::new(Some(text("main"))).with_header(text("head")));

        let processed = panel.process(&mut |def: BlockDef| {
            if def.id() == "head" {
                None
            } else {
                Some(def)
            }
        });

        let Some(BlockDef::Panel(p)) = processed else {
            panic!("expected panel");
        };
        assert!(p.header.is_none());
        assert!(p.show_header);
        assert_eq!(p.main.as_deref(), Some(&text("main")));
        assert_eq!(BlockDef::Panel(p.clone()).canonicalize(), Some(BlockDef::Panel(p)));
    }
}
