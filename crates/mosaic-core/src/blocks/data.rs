//! Blocks bound to table data: tables, single rows, inserts, search and the
//! save/cancel editing boundary.

use mosaic_api::{
    ContextVar, ContextVarType, Expr, ExprUtils, Filter, OrderBy, QueryOptions, ValueType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    expr_var_ids, find_context_var, map_expr, process_slot, slot_child, Block, BlockDef,
    ChildBlock,
};
use crate::library::{ActionDef, BlockCtx};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryTableMode {
    /// One table row per database row
    #[default]
    SingleRow,
    /// One table row per group of database rows
    MultiRow,
}

/// Table over a rowset. Each content cell sees a row variable `<id>_row`
/// bound to the row it renders; header cells do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTableBlockDef {
    pub id: String,
    #[serde(default)]
    pub mode: QueryTableMode,
    #[serde(default)]
    pub headers: Vec<Option<BlockDef>>,
    #[serde(default)]
    pub contents: Vec<Option<BlockDef>>,
    pub rowset_context_var_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(rename = "where", default)]
    pub where_: Option<Expr>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub row_click_action: Option<ActionDef>,
}

impl QueryTableBlockDef {
    pub fn row_context_var_id(&self) -> String {
        format!("{}_row", self.id)
    }

    /// Variable introduced to the content cells, given the rowset it iterates.
    pub fn row_context_var(&self, rowset: &ContextVar) -> ContextVar {
        ContextVar {
            id: self.row_context_var_id(),
            name: "Table row".to_string(),
            var_type: match self.mode {
                QueryTableMode::SingleRow => ContextVarType::Row,
                QueryTableMode::MultiRow => ContextVarType::Rowset,
            },
            table: rowset.table.clone(),
            aggr_only: None,
            selectable: None,
        }
    }

    /// Query fetching the table's rows: the primary key as `id` plus one
    /// `e<N>` column per row expression.
    pub fn rows_query(&self, rowset: &ContextVar, row_exprs: &[Expr]) -> Option<QueryOptions> {
        let table = rowset.table.clone()?;
        let mut options = QueryOptions::new(table.clone()).select("id", Expr::id(table));
        for (index, expr) in row_exprs.iter().enumerate() {
            options = options.select(format!("e{}", index), expr.clone());
        }
        let filters: Vec<Expr> = std::iter::once(Expr::variable(rowset.id.clone()))
            .chain(self.where_.clone())
            .collect();
        options.where_ = Expr::and(filters);
        options.order_by = self.order_by.clone();
        options.limit = self.limit;
        Some(options)
    }

    fn cell_children<'a>(
        cells: &'a [Option<BlockDef>],
        context_vars: &[ContextVar],
    ) -> impl Iterator<Item = ChildBlock<'a>> {
        let context_vars = context_vars.to_vec();
        cells
            .iter()
            .flatten()
            .map(move |cell| ChildBlock::new(cell, context_vars.clone()))
    }
}

impl Block for QueryTableBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        let mut content_vars = context_vars.to_vec();
        if let Some(rowset) = find_context_var(context_vars, self.rowset_context_var_id.as_ref()) {
            content_vars.push(self.row_context_var(rowset));
        }
        Self::cell_children(&self.headers, context_vars)
            .chain(Self::cell_children(&self.contents, &content_vars))
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        let mut process_cells = |cells: &[Option<BlockDef>]| -> Vec<Option<BlockDef>> {
            cells
                .iter()
                .map(|cell| cell.as_ref().and_then(|c| action(c)))
                .collect()
        };
        let headers = process_cells(&self.headers);
        let contents = process_cells(&self.contents);
        Some(BlockDef::QueryTable(Self {
            headers,
            contents,
            ..self.clone()
        }))
    }

    fn introduced_var_ids(&self) -> Vec<String> {
        vec![self.row_context_var_id()]
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rowset_context_var_id.iter().cloned().collect();
        ids.extend(expr_var_ids([&self.where_]));
        ids.extend(
            self.order_by
                .iter()
                .flat_map(|o| o.expr.variable_ids())
                .map(str::to_string),
        );
        ids
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        Some(BlockDef::QueryTable(Self {
            rowset_context_var_id: self.rowset_context_var_id.as_deref().map(map),
            where_: map_expr(&self.where_, map),
            order_by: self
                .order_by
                .iter()
                .map(|o| OrderBy {
                    expr: o.expr.map_variables(map),
                    dir: o.dir,
                })
                .collect(),
            ..self.clone()
        }))
    }

    fn validate(&self, _ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        match find_context_var(context_vars, self.rowset_context_var_id.as_ref()) {
            Some(cv) if cv.is_rowset() && cv.table.is_some() => {}
            _ => return Some("Rowset required".to_string()),
        }
        if self.headers.len() != self.contents.len() {
            return Some("Headers and contents must have the same number of columns".to_string());
        }
        None
    }
}

/// Binds a row variable (id = block id) to the single row matching `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBlockDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub table: Option<String>,
    #[serde(default)]
    pub filter: Option<Expr>,
    pub content: Option<Box<BlockDef>>,
}

impl RowBlockDef {
    pub fn context_var(&self) -> Option<ContextVar> {
        let table = self.table.clone()?;
        Some(ContextVar::row(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| "Unnamed".to_string()),
            table,
        ))
    }

    /// Query finding the primary key of the bound row.
    pub fn row_query(&self) -> Option<QueryOptions> {
        let table = self.table.clone()?;
        let mut options = QueryOptions::new(table.clone())
            .select("id", Expr::id(table))
            .limit(1);
        options.where_ = self.filter.clone();
        Some(options)
    }
}

impl Block for RowBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        let mut scope = context_vars.to_vec();
        scope.extend(self.context_var());
        slot_child(&self.content, scope).into_iter().collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        Some(BlockDef::Row(Self {
            content: process_slot(&self.content, action),
            ..self.clone()
        }))
    }

    fn introduced_var_ids(&self) -> Vec<String> {
        vec![self.id.clone()]
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        expr_var_ids([&self.filter])
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        Some(BlockDef::Row(Self {
            filter: map_expr(&self.filter, map),
            ..self.clone()
        }))
    }

    fn validate(&self, ctx: &BlockCtx<'_>, _context_vars: &[ContextVar]) -> Option<String> {
        match &self.table {
            Some(table) if ctx.schema.table(table).is_some() => None,
            _ => Some("Missing table".to_string()),
        }
    }
}

/// Value for one column of an inserted row: an expression evaluated against a
/// context variable, or a literal when no variable is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextVarExpr {
    pub context_var_id: Option<String>,
    pub expr: Option<Expr>,
}

/// Adds a row when instantiated and binds a row variable (id = block id) to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRowBlockDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub table: Option<String>,
    #[serde(default)]
    pub column_values: BTreeMap<String, ContextVarExpr>,
    pub content: Option<Box<BlockDef>>,
}

impl AddRowBlockDef {
    pub fn context_var(&self) -> Option<ContextVar> {
        let table = self.table.clone()?;
        Some(ContextVar::row(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| "Added row".to_string()),
            table,
        ))
    }

    fn validate_column(
        &self,
        ctx: &BlockCtx<'_>,
        context_vars: &[ContextVar],
        table: &str,
        column_id: &str,
        value: &ContextVarExpr,
    ) -> Option<String> {
        let Some(column) = ctx.schema.column(table, column_id) else {
            return Some("Column not found".to_string());
        };

        match &value.context_var_id {
            Some(cv_id) => {
                let found = context_vars
                    .iter()
                    .any(|cv| &cv.id == cv_id && cv.table.is_some());
                if !found {
                    return Some("Context variable not found".to_string());
                }
            }
            None => {
                if !matches!(value.expr, None | Some(Expr::Literal { .. })) {
                    return Some("Literal value required".to_string());
                }
            }
        }

        let expr = value.expr.as_ref()?;
        let utils = ExprUtils::new(ctx.schema, context_vars);
        match utils.expr_type(expr) {
            Some(t) if t != column.column_type && column.column_type != ValueType::Id => {
                Some(format!("Expected {} value", column.column_type))
            }
            _ => None,
        }
    }
}

impl Block for AddRowBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        let mut scope = context_vars.to_vec();
        scope.extend(self.context_var());
        slot_child(&self.content, scope).into_iter().collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        Some(BlockDef::AddRow(Self {
            content: process_slot(&self.content, action),
            ..self.clone()
        }))
    }

    fn context_var_exprs(&self, context_var: &ContextVar, _ctx: &BlockCtx<'_>) -> Vec<Expr> {
        self.column_values
            .values()
            .filter(|v| v.context_var_id.as_deref() == Some(context_var.id.as_str()))
            .filter_map(|v| v.expr.clone())
            .collect()
    }

    fn introduced_var_ids(&self) -> Vec<String> {
        vec![self.id.clone()]
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .column_values
            .values()
            .filter_map(|v| v.context_var_id.clone())
            .collect();
        ids.extend(expr_var_ids(self.column_values.values().map(|v| &v.expr)));
        ids
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        let column_values = self
            .column_values
            .iter()
            .map(|(column, v)| {
                let mapped = ContextVarExpr {
                    context_var_id: v.context_var_id.as_deref().map(map),
                    expr: map_expr(&v.expr, map),
                };
                (column.clone(), mapped)
            })
            .collect();
        Some(BlockDef::AddRow(Self {
            column_values,
            ..self.clone()
        }))
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        let table = match &self.table {
            Some(table) if ctx.schema.table(table).is_some() => table,
            _ => return Some("Table required".to_string()),
        };
        self.column_values.iter().find_map(|(column_id, value)| {
            self.validate_column(ctx, context_vars, table, column_id, value)
        })
    }
}

/// Text box that filters a rowset by a case-insensitive match on its search
/// expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBlockDef {
    pub id: String,
    #[serde(default)]
    pub placeholder: Option<String>,
    pub rowset_context_var_id: Option<String>,
    #[serde(default)]
    pub search_exprs: Vec<Option<Expr>>,
}

impl SearchBlockDef {
    /// Filter for the rowset, keyed by this block's id. Empty text filters
    /// nothing.
    pub fn filter_for(&self, search_text: &str) -> Option<Filter> {
        if search_text.is_empty() {
            return None;
        }
        let pattern = escape_regex(search_text);
        let matches: Vec<Expr> = self
            .search_exprs
            .iter()
            .flatten()
            .map(|e| Expr::op("~*", vec![e.clone(), Expr::text(pattern.clone())]))
            .collect();
        Some(Filter {
            id: self.id.clone(),
            memo: serde_json::Value::String(search_text.to_string()),
            expr: Some(Expr::op("or", matches)),
        })
    }
}

fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Block for SearchBlockDef {
    fn referenced_var_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rowset_context_var_id.iter().cloned().collect();
        ids.extend(expr_var_ids(&self.search_exprs));
        ids
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        Some(BlockDef::Search(Self {
            rowset_context_var_id: self.rowset_context_var_id.as_deref().map(map),
            search_exprs: self.search_exprs.iter().map(|e| map_expr(e, map)).collect(),
            ..self.clone()
        }))
    }

    fn validate(&self, ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        let rowset = match find_context_var(context_vars, self.rowset_context_var_id.as_ref()) {
            Some(cv) if cv.is_rowset() => cv,
            _ => return Some("Rowset required".to_string()),
        };
        if self.search_exprs.is_empty() {
            return Some("Search expression required".to_string());
        }

        let utils = ExprUtils::new(ctx.schema, context_vars);
        for search_expr in &self.search_exprs {
            let Some(expr) = search_expr else {
                return Some("Search expression required".to_string());
            };
            if let Expr::Field { table, .. } = expr {
                if rowset.table.as_ref() != Some(table) {
                    return Some("Search expression must be on the rowset table".to_string());
                }
            }
            if utils.expr_type(expr) != Some(ValueType::Text) {
                return Some("Search expression must be text".to_string());
            }
        }
        None
    }
}

/// Editing boundary: the child runs against a staging overlay until the user
/// saves or cancels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCancelBlockDef {
    pub id: String,
    pub save_label: String,
    pub cancel_label: String,
    pub child: Option<Box<BlockDef>>,
    #[serde(default)]
    pub confirm_discard_message: String,
    /// Row variable whose row the delete button removes
    #[serde(default)]
    pub delete_context_var_id: Option<String>,
    #[serde(default)]
    pub delete_label: Option<String>,
    #[serde(default)]
    pub confirm_delete_message: Option<String>,
}

impl Block for SaveCancelBlockDef {
    fn children(&self, context_vars: &[ContextVar]) -> Vec<ChildBlock<'_>> {
        slot_child(&self.child, context_vars.to_vec())
            .into_iter()
            .collect()
    }

    fn process_children(
        &self,
        action: &mut dyn FnMut(&BlockDef) -> Option<BlockDef>,
    ) -> Option<BlockDef> {
        Some(BlockDef::SaveCancel(Self {
            child: process_slot(&self.child, action),
            ..self.clone()
        }))
    }

    fn referenced_var_ids(&self) -> Vec<String> {
        self.delete_context_var_id.iter().cloned().collect()
    }

    fn map_var_ids(&self, map: &dyn Fn(&str) -> String) -> Option<BlockDef> {
        Some(BlockDef::SaveCancel(Self {
            delete_context_var_id: self.delete_context_var_id.as_deref().map(map),
            ..self.clone()
        }))
    }

    fn validate(&self, _ctx: &BlockCtx<'_>, context_vars: &[ContextVar]) -> Option<String> {
        if self.save_label.is_empty() {
            return Some("Save label required".to_string());
        }
        if self.cancel_label.is_empty() {
            return Some("Cancel label required".to_string());
        }
        if self.confirm_discard_message.is_empty() {
            return Some("Confirm discard message required".to_string());
        }
        if let Some(delete_id) = &self.delete_context_var_id {
            if self.delete_label.as_deref().unwrap_or_default().is_empty() {
                return Some("Delete label required".to_string());
            }
            match context_vars.iter().find(|cv| &cv.id == delete_id) {
                None => return Some("Delete context variable not found".to_string()),
                Some(cv) if !cv.is_row() => {
                    return Some("Delete context variable wrong type".to_string())
                }
                Some(_) => {}
            }
        }
        None
    }

    fn isolates_subtree(&self) -> bool {
        true
    }
}
