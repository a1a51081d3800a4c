//! SQL rendering of query plans and result streaming.

use itertools::Itertools;
use rusqlite::types::Value;

use crate::db::schema::SchemaDb;
use crate::filters::Session;
use crate::query::plan::QueryPlan;

/// Rendering switches for the row-identity machinery.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Omit the concatenated `_rowid` column.
    pub no_row_ids: bool,
    /// Push NULL row-id parts to the end of the result.
    pub sort_row_ids: bool,
    /// Emit each row-id part as its own `_rowid_N` column.
    pub split_row_ids: bool,
}

/// Render a plan to SQL text.
///
/// Unless disabled, the statement carries a trailing `_rowid` column
/// concatenating each contributing alias's identity columns; the executor
/// uses it to de-duplicate result rows.
pub fn query_text(plan: &QueryPlan, options: RenderOptions) -> String {
    let mut sql = String::from("SELECT ");
    sql.push_str(
        &plan
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} AS {}",
                    plan.select
                        .get(column)
                        .cloned()
                        .flatten()
                        .unwrap_or_else(|| "NULL".to_string()),
                    column
                )
            })
            .join(",\n  "),
    );
    sql.push('\n');

    let mut row_ids = Vec::new();
    let mut order_by = plan.order_by.clone();
    for (alias, columns) in &plan.rowids {
        for column in columns {
            row_ids.push(format!("COALESCE({}.{},'')", alias, column));
            if options.sort_row_ids {
                order_by.push(format!("({}.{} IS NULL)", alias, column));
            }
        }
    }
    if options.split_row_ids {
        for (n, row_id) in row_ids.iter().enumerate() {
            sql.push_str(&format!("  , {} AS _rowid_{}\n", row_id, n));
        }
    }
    if !options.no_row_ids {
        sql.push_str(&format!("  , ({}) AS _rowid\n", row_ids.join("||'_'||")));
    }

    if !plan.from.is_empty() {
        let tables = plan
            .from
            .iter()
            .sorted_by_key(|alias| alias.to_string())
            .map(|alias| {
                let (db, table) = alias.table();
                format!("`{}`.`{}` AS {}", db, table, alias)
            })
            .join(",\n  ");
        sql.push_str(&format!("FROM {}\n", tables));
    }
    for (alias, conds) in &plan.left_join {
        let (db, table) = alias.table();
        sql.push_str(&format!("LEFT JOIN `{}`.`{}` AS {}\n", db, table, alias));
        if !conds.is_empty() {
            sql.push_str(&format!("  ON {}\n", conds.iter().join("\n  AND ")));
        }
    }
    if !plan.where_conds.is_empty() {
        sql.push_str(&format!("WHERE {}\n", plan.where_conds.iter().join("\n  AND ")));
    }
    if !plan.group_by.is_empty() {
        sql.push_str(&format!("GROUP BY {}\n", plan.group_by.join(", ")));
    }
    if !plan.having.is_empty() {
        sql.push_str(&format!("HAVING {}\n", plan.having.iter().join("\n  AND ")));
    }
    if !order_by.is_empty() {
        sql.push_str(&format!("ORDER BY {}\n", order_by.join(", ")));
    }
    if let Some(limit) = plan.limit {
        sql.push_str(&format!("LIMIT {}\n", limit));
    }
    sql
}

impl Session {
    /// Make sure the session-side tables a plan touches have their indices
    /// in place.
    pub fn prepare_tables_for_plan(&self, plan: &QueryPlan) -> Result<(), anyhow::Error> {
        for alias in plan.from.iter().chain(plan.left_join.keys()) {
            let (db, table) = alias.table();
            if db != SchemaDb::Know {
                self.db().prepare_table_for_query(db, table)?;
            }
        }
        Ok(())
    }

    /// Execute a plan (and an optional parallel plan over the same
    /// columns) and collect the result rows.
    ///
    /// The trailing `_rowid` column drives de-duplication and is stripped
    /// from the returned rows; with `allow_dupes` only consecutive
    /// duplicates collapse.
    pub fn execute_plan(
        &self,
        plan: &QueryPlan,
        allow_dupes: bool,
        bindings: &[i64],
        second_plan: Option<&QueryPlan>,
    ) -> Result<Vec<Vec<Value>>, anyhow::Error> {
        self.prepare_tables_for_plan(plan)?;
        if let Some(second) = second_plan {
            self.prepare_tables_for_plan(second)?;
        }
        let mut result = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        self.collect_plan_rows(plan, allow_dupes, bindings, &mut seen, &mut result)?;
        if let Some(second) = second_plan {
            self.collect_plan_rows(second, allow_dupes, bindings, &mut seen, &mut result)?;
        }
        Ok(result)
    }

    fn collect_plan_rows(
        &self,
        plan: &QueryPlan,
        allow_dupes: bool,
        bindings: &[i64],
        seen: &mut std::collections::HashSet<String>,
        result: &mut Vec<Vec<Value>>,
    ) -> Result<(), anyhow::Error> {
        let sql = query_text(plan, RenderOptions::default());
        tracing::debug!("executing query:\n{}", sql);
        let conn = self.db().connection();
        let mut stmt = conn.prepare(&sql)?;
        let column_count = stmt.column_count();
        let mut last: Option<String> = None;
        let mut rows = stmt.query(rusqlite::params_from_iter(bindings.iter()))?;
        while let Some(row) = rows.next()? {
            let row_id = value_to_string(&row.get::<_, Value>(column_count - 1)?);
            if allow_dupes {
                if last.as_deref() == Some(row_id.as_str()) {
                    continue;
                }
                last = Some(row_id);
            } else {
                if seen.contains(&row_id) {
                    continue;
                }
                seen.insert(row_id);
            }
            let mut cells = Vec::with_capacity(column_count - 1);
            for index in 0..column_count - 1 {
                cells.push(row.get::<_, Value>(index)?);
            }
            result.push(cells);
        }
        Ok(())
    }
}

/// Render a result cell for tab-separated output; NULL renders empty.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(value) => value.clone(),
        Value::Blob(value) => String::from_utf8_lossy(value).into_owned(),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::db::schema::SchemaDb;
    use crate::filters::test_support::fixture_session;
    use crate::query::catalog::Column;
    use crate::query::plan::{Focus, QueryMode, QueryRequest};

    use super::RenderOptions;

    #[test]
    fn rendered_sql_has_expected_shape() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::SnpLabel, Column::GeneLabel],
            ))
            .unwrap();
        let sql = super::query_text(&plan, RenderOptions::default());
        assert!(sql.starts_with("SELECT "));
        assert!(sql.contains("AS snp_label"));
        assert!(sql.contains("AS gene_label"));
        assert!(sql.contains("AS _rowid"));
        assert!(sql.contains("FROM "));
        assert!(sql.contains("`main`.`snp` AS m_s"));
        assert!(sql.contains("WHERE "));
    }

    #[test]
    fn snp_to_gene_filter_round_trip() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(SchemaDb::Main, &[(1001, None), (1003, None)], None)
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::SnpLabel, Column::GeneLabel],
            ))
            .unwrap();
        let rows = session.execute_plan(&plan, false, &[], None).unwrap();
        let mut pairs: Vec<(String, String)> = rows
            .iter()
            .map(|row| {
                (
                    super::value_to_string(&row[0]),
                    super::value_to_string(&row[1]),
                )
            })
            .collect();
        pairs.sort();
        // rs1001 lies in ALPHA, rs1003 in GAMMA
        assert_eq!(
            vec![
                ("rs1001".to_string(), "ALPHA".to_string()),
                ("rs1003".to_string(), "GAMMA".to_string()),
            ],
            pairs
        );
    }

    #[test]
    fn snp_outside_any_gene_is_filtered_out() {
        let (mut session, _tmp_dir) = fixture_session();
        // rs1002 at 1:155000 is inside BETA; rs1004 at 3:42 hits nothing
        session
            .union_snps(SchemaDb::Main, &[(1002, None), (1004, None)], None)
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::SnpLabel, Column::GeneLabel],
            ))
            .unwrap();
        let rows = session.execute_plan(&plan, false, &[], None).unwrap();
        assert_eq!(1, rows.len());
        assert_eq!("rs1002", super::value_to_string(&rows[0][0]));
        assert_eq!("BETA", super::value_to_string(&rows[0][1]));
    }

    #[test]
    fn group_outputs_via_gene_filter() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_genes(
                SchemaDb::Main,
                &[crate::db::lookup::Identifier::new("symbol", "GAMMA", None)],
                None,
            )
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::GroupLabel],
            ))
            .unwrap();
        let rows = session.execute_plan(&plan, false, &[], None).unwrap();
        let labels: Vec<String> = rows
            .iter()
            .map(|row| super::value_to_string(&row[0]))
            .collect();
        assert_eq!(vec!["PATH_B".to_string()], labels);
    }

    #[test]
    fn duplicate_rows_collapse_on_row_identity() {
        let (mut session, _tmp_dir) = fixture_session();
        // ALPHA belongs to both pathways; with a two-group filter the join
        // yields it twice under the same row identity
        session
            .union_groups(
                SchemaDb::Main,
                &[
                    crate::db::lookup::Identifier::new("pathway", "PATH_A", None),
                    crate::db::lookup::Identifier::new("pathway", "PATH_B", None),
                ],
                None,
            )
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::GeneLabel],
            ))
            .unwrap();
        let rows = session.execute_plan(&plan, false, &[], None).unwrap();
        let mut labels: Vec<String> = rows
            .iter()
            .map(|row| super::value_to_string(&row[0]))
            .collect();
        labels.sort();
        assert_eq!(
            vec!["ALPHA".to_string(), "BETA".to_string(), "GAMMA".to_string()],
            labels
        );
    }
}
