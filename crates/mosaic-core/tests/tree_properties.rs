use std::collections::{HashMap, HashSet};

use mosaic_api::{ContextVar, Expr};
use mosaic_core::blocks::{
    ExpressionBlockDef, HorizontalBlockDef, LabeledBlockDef, QueryTableBlockDef, RowBlockDef,
    TextBlockDef, VerticalBlockDef,
};
use mosaic_core::tree::{canonicalize_tree, duplicate, ensure_scoped, find_ancestry, flatten};
use mosaic_core::{BlockDef, DropSide};
use proptest::prelude::*;

fn rowset() -> ContextVar {
    ContextVar::rowset("rs", "Tasks", "t1")
}

fn arb_tree() -> impl Strategy<Value = BlockDef> {
    let leaf = prop_oneof![
        Just(BlockDef::Text(TextBlockDef::new("", "leaf"))),
        // Bound to the innermost variable in scope once ids are assigned
        Just(BlockDef::Expression(ExpressionBlockDef {
            id: String::new(),
            context_var_id: None,
            expr: Some(Expr::field("t1", "name")),
            format: None,
        })),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4)
                .prop_map(|items| BlockDef::Horizontal(HorizontalBlockDef::new(items))),
            prop::collection::vec(inner.clone(), 0..4)
                .prop_map(|items| BlockDef::Vertical(VerticalBlockDef::new(items))),
            prop::option::of(inner.clone()).prop_map(|child| {
                BlockDef::Labeled(LabeledBlockDef {
                    id: String::new(),
                    label: "label".into(),
                    child: child.map(Box::new),
                })
            }),
            prop::option::of(inner.clone()).prop_map(|content| {
                BlockDef::Row(RowBlockDef {
                    id: String::new(),
                    name: None,
                    table: Some("t1".into()),
                    filter: None,
                    content: content.map(Box::new),
                })
            }),
            prop::collection::vec(prop::option::of(inner), 0..3).prop_map(|contents| {
                BlockDef::QueryTable(QueryTableBlockDef {
                    id: String::new(),
                    mode: Default::default(),
                    headers: vec![None; contents.len()],
                    contents,
                    rowset_context_var_id: Some("rs".into()),
                    limit: None,
                    where_: None,
                    order_by: vec![],
                    row_click_action: None,
                })
            }),
        ]
    })
    .prop_map(|tree| {
        // Deterministic unique ids
        let mut next = 0;
        let tree = tree.map_tree(&mut |mut def: BlockDef| {
            *def.id_mut() = format!("b{}", next);
            next += 1;
            def
        });
        bind_expressions(tree)
    })
}

/// Points every expression block at the innermost variable in its scope.
fn bind_expressions(tree: BlockDef) -> BlockDef {
    let bindings: HashMap<String, String> = flatten(&tree, &[rowset()])
        .iter()
        .filter(|node| matches!(node.block_def, BlockDef::Expression(_)))
        .filter_map(|node| {
            let innermost = node.context_vars.last()?;
            Some((node.block_def.id().to_string(), innermost.id.clone()))
        })
        .collect();
    tree.map_tree(&mut |def: BlockDef| match def {
        BlockDef::Expression(mut expr) => {
            expr.context_var_id = bindings.get(&expr.id).cloned();
            BlockDef::Expression(expr)
        }
        other => other,
    })
}

/// Tree shape with ids erased.
fn shape(def: &BlockDef) -> String {
    let children: Vec<String> = def.children(&[]).iter().map(|c| shape(c.block_def)).collect();
    format!("{}({})", def.block_type(), children.join(","))
}

fn ids(def: &BlockDef) -> HashSet<String> {
    flatten(def, &[])
        .iter()
        .map(|c| c.block_def.id().to_string())
        .collect()
}

proptest! {
    #[test]
    fn duplicate_is_isomorphic_and_shares_no_id(tree in arb_tree()) {
        let copy = duplicate(&tree);
        prop_assert_eq!(shape(&copy), shape(&tree));

        let original = ids(&tree);
        let copied = ids(&copy);
        prop_assert_eq!(copied.len(), original.len());
        prop_assert!(original.is_disjoint(&copied));
    }

    #[test]
    fn duplicate_keeps_variable_references_in_scope(tree in arb_tree()) {
        prop_assert_eq!(ensure_scoped(&tree, &[rowset()]), Ok(()));
        prop_assert_eq!(ensure_scoped(&duplicate(&tree), &[rowset()]), Ok(()));
    }

    #[test]
    fn canonicalize_is_idempotent(tree in arb_tree()) {
        let once = canonicalize_tree(&tree);
        let twice = once.as_ref().and_then(canonicalize_tree);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn ancestry_ends_at_the_target(tree in arb_tree(), pick in any::<prop::sample::Index>()) {
        let all: Vec<String> = flatten(&tree, &[])
            .iter()
            .map(|c| c.block_def.id().to_string())
            .collect();
        let target = &all[pick.index(all.len())];

        let path = find_ancestry(&tree, &[], target).unwrap();
        prop_assert_eq!(path[0].block_def.id(), tree.id());
        prop_assert_eq!(path.last().unwrap().block_def.id(), target.as_str());
        prop_assert!(find_ancestry(&tree, &[], "absent").is_none());
    }
}

#[test]
fn drop_tie_breaks() {
    let a = BlockDef::Text(TextBlockDef::new("a", "A"));
    let b = BlockDef::Text(TextBlockDef::new("b", "B"));

    let BlockDef::Horizontal(h) = b.drop_block(&a, "b", DropSide::Left) else {
        panic!("left drop must produce a horizontal container");
    };
    assert_eq!(h.items, vec![a.clone(), b.clone()]);

    let BlockDef::Vertical(v) = b.drop_block(&a, "b", DropSide::Bottom) else {
        panic!("bottom drop must produce a vertical container");
    };
    assert_eq!(v.items, vec![b, a]);
}
