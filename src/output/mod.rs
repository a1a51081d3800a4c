//! Output generation: filter, annotation and model row streams.
//!
//! All three modes share the planner.  Filtering runs one query (plus an
//! optional user-knowledge twin).  Annotation runs a filter query whose
//! split row-ids parameterize a second LEFT JOIN query so base rows are
//! never dropped.  Modeling computes candidate tables, scores gene-gene
//! pairs through shared groups, then expands each pair through per-side
//! filter queries.

use std::collections::HashSet;
use std::str::FromStr;

use rusqlite::types::Value;
use thousands::Separable;

use crate::db::schema::SchemaDb;
use crate::filters::{GeneModel, Session};
use crate::query::catalog::{column_sources, Column};
use crate::query::plan::{Focus, QueryMode, QueryRequest, TableMask};
use crate::query::sql::{query_text, value_to_string, RenderOptions};

/// Pairwise models are restricted to gene-typed biopolymers.
const ONLY_GENE_MODELS: bool = true;

/// A complete output table: header plus rows of rendered cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Map requested output types onto header fields and logical columns; a
/// bare column name is also accepted.
pub fn columns_for_types(
    types: &[String],
) -> Result<(Vec<String>, Vec<Column>), anyhow::Error> {
    let mut header = Vec::new();
    let mut columns = Vec::new();
    for t in types {
        match t.as_str() {
            "snp" => {
                header.push("snp".to_string());
                columns.push(Column::SnpLabel);
            }
            "position" => {
                header.extend(["chr", "position", "pos"].map(String::from));
                columns.extend([
                    Column::PositionChr,
                    Column::PositionLabel,
                    Column::PositionPos,
                ]);
            }
            "gene" => {
                header.push("gene".to_string());
                columns.push(Column::GeneLabel);
            }
            "generegion" => {
                header.extend(["chr", "gene", "start", "stop"].map(String::from));
                columns.extend([
                    Column::BiopolymerChr,
                    Column::GeneLabel,
                    Column::BiopolymerStart,
                    Column::BiopolymerStop,
                ]);
            }
            "upstream" => {
                header.extend(["upstream", "distance"].map(String::from));
                columns.extend([Column::UpstreamLabel, Column::UpstreamDistance]);
            }
            "downstream" => {
                header.extend(["downstream", "distance"].map(String::from));
                columns.extend([Column::DownstreamLabel, Column::DownstreamDistance]);
            }
            "region" => {
                header.extend(["chr", "region", "start", "stop"].map(String::from));
                columns.extend([
                    Column::RegionChr,
                    Column::RegionLabel,
                    Column::RegionStart,
                    Column::RegionStop,
                ]);
            }
            "group" => {
                header.push("group".to_string());
                columns.push(Column::GroupLabel);
            }
            "source" => {
                header.push("source".to_string());
                columns.push(Column::SourceLabel);
            }
            "gwas" => {
                header.extend(
                    ["trait", "snps", "OR/beta", "allele95%CI", "riskAfreq", "pubmed"]
                        .map(String::from),
                );
                columns.extend([
                    Column::GwasTrait,
                    Column::GwasSnps,
                    Column::GwasOrbeta,
                    Column::GwasAllele95Ci,
                    Column::GwasRiskAfreq,
                    Column::GwasPubmed,
                ]);
            }
            "snpinput" => {
                header.push("user_input".to_string());
                columns.push(Column::SnpLabel);
            }
            "positioninput" => {
                header.push("user_input".to_string());
                columns.push(Column::PositionLabel);
            }
            "geneinput" => {
                header.push("user_input".to_string());
                columns.push(Column::GeneLabel);
            }
            "regioninput" => {
                header.push("user_input".to_string());
                columns.push(Column::RegionLabel);
            }
            "groupinput" => {
                header.push("user_input".to_string());
                columns.push(Column::GroupLabel);
            }
            "sourceinput" => {
                header.push("user_input".to_string());
                columns.push(Column::SourceLabel);
            }
            "disease" => {
                header.extend(["disease", "disease_category"].map(String::from));
                columns.extend([Column::DiseaseLabel, Column::DiseaseCategory]);
            }
            other => match Column::from_str(other) {
                Ok(column) => {
                    header.push(other.to_string());
                    columns.push(column);
                }
                Err(_) => anyhow::bail!("unsupported output type '{}'", other),
            },
        }
    }
    Ok((header, columns))
}

fn render_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| row.iter().map(value_to_string).collect())
        .collect()
}

impl Session {
    /// Produce the filtered row stream for the requested output types.
    pub fn generate_filter_output(
        &self,
        types: &[String],
        apply_offset: bool,
    ) -> Result<OutputTable, anyhow::Error> {
        let (mut header, columns) = columns_for_types(types)?;
        if header.is_empty() {
            anyhow::bail!("filtering with empty column list");
        }
        header[0] = format!("#{}", header[0]);
        let mut request = QueryRequest::new(QueryMode::Filter, Focus::Main, columns.clone());
        request.apply_offset = apply_offset;
        let plan = self.build_query(&request)?;
        let second_plan = if self.filter_count(SchemaDb::User, "source") > 0 {
            let mut user_request = request.clone();
            user_request.user_knowledge = true;
            Some(self.build_query(&user_request)?)
        } else {
            None
        };
        let rows = self.execute_plan(
            &plan,
            self.options().allow_duplicate_output,
            &[],
            second_plan.as_ref(),
        )?;
        Ok(OutputTable {
            header,
            rows: render_rows(rows),
        })
    }

    /// Produce filter rows annotated with additional columns.
    ///
    /// Annotation columns may repeat a filter row once per match; a filter
    /// row without any annotation match is emitted once with empty cells.
    pub fn generate_annotation_output(
        &self,
        filter_types: &[String],
        annotation_types: &[String],
        apply_offset: bool,
    ) -> Result<OutputTable, anyhow::Error> {
        let (mut header_f, columns_f) = columns_for_types(filter_types)?;
        if header_f.is_empty() {
            anyhow::bail!("annotation with no starting columns");
        }
        let (header_a, columns_a) = columns_for_types(annotation_types)?;
        if header_a.is_empty() {
            anyhow::bail!("annotation with no extra columns");
        }

        let mut request_f =
            QueryRequest::new(QueryMode::Filter, Focus::Main, columns_f.clone());
        request_f.apply_offset = apply_offset;
        let plan_f = self.build_query(&request_f)?;
        let len_f = plan_f.columns.len();
        let sql_f = query_text(
            &plan_f,
            RenderOptions {
                split_row_ids: true,
                ..Default::default()
            },
        );
        self.prepare_tables_for_plan(&plan_f)?;

        // each filter row-id component becomes a bound condition of the
        // annotation query
        let mut request_a =
            QueryRequest::new(QueryMode::Annotate, Focus::Alt, columns_a.clone());
        request_a.apply_offset = apply_offset;
        let mut n = len_f;
        for (alias, rowid_columns) in &plan_f.rowids {
            for rowid_column in rowid_columns {
                n += 1;
                request_a
                    .where_conds
                    .push((*alias, *rowid_column, format!("= ?{}", n)));
            }
        }
        let plan_a = self.build_query(&request_a)?;
        let len_a = plan_a.columns.len();
        let sql_a = query_text(
            &plan_a,
            RenderOptions {
                no_row_ids: true,
                sort_row_ids: true,
                split_row_ids: true,
            },
        );
        self.prepare_tables_for_plan(&plan_a)?;

        header_f[0] = format!("#{}", header_f[0]);
        let mut table = OutputTable {
            header: header_f.into_iter().chain(header_a).collect(),
            rows: Vec::new(),
        };

        let conn = self.db().connection();
        let mut stmt_f = conn.prepare(&sql_f)?;
        let count_f = stmt_f.column_count();
        let mut stmt_a = conn.prepare(&sql_a)?;
        let count_a = stmt_a.column_count();
        let allow_dupes = self.options().allow_duplicate_output;

        let mut rows_f = stmt_f.query([])?;
        let mut last_f: Option<Value> = None;
        while let Some(row_f) = rows_f.next()? {
            let mut cells_f = Vec::with_capacity(count_f);
            for index in 0..count_f {
                cells_f.push(row_f.get::<_, Value>(index)?);
            }
            if allow_dupes {
                let row_id = cells_f.last().expect("filter rows carry a _rowid").clone();
                if last_f.as_ref() == Some(&row_id) {
                    continue;
                }
                last_f = Some(row_id);
            }

            // bind the visible columns plus the split row-id parts
            let bindings: Vec<Value> = cells_f[..count_f - 1].to_vec();
            let mut ids_a: HashSet<Vec<String>> = HashSet::new();
            let mut matched = false;
            let mut rows_a = stmt_a.query(rusqlite::params_from_iter(bindings.iter()))?;
            while let Some(row_a) = rows_a.next()? {
                let mut cells_a = Vec::with_capacity(count_a);
                for index in 0..count_a {
                    cells_a.push(row_a.get::<_, Value>(index)?);
                }
                let row_id_a: Vec<String> =
                    cells_a[len_a..].iter().map(value_to_string).collect();
                if ids_a.contains(&row_id_a) {
                    continue;
                }
                // suppress any later match that only differs by dropping
                // components to NULL
                let mut combos: Vec<Vec<String>> = vec![Vec::new()];
                for component in &row_id_a {
                    let mut next = Vec::new();
                    for combo in combos {
                        if component.is_empty() {
                            let mut with = combo.clone();
                            with.push(String::new());
                            next.push(with);
                        } else {
                            let mut with = combo.clone();
                            with.push(component.clone());
                            next.push(with);
                            let mut without = combo;
                            without.push(String::new());
                            next.push(without);
                        }
                    }
                    combos = next;
                }
                ids_a.extend(combos);
                matched = true;
                let mut row = Vec::with_capacity(len_f + len_a);
                row.extend(cells_f[..len_f].iter().map(value_to_string));
                row.extend(cells_a[..len_a].iter().map(value_to_string));
                table.rows.push(row);
            }
            if !matched {
                let mut row = Vec::with_capacity(len_f + len_a);
                row.extend(cells_f[..len_f].iter().map(value_to_string));
                row.extend(std::iter::repeat(String::new()).take(len_a));
                table.rows.push(row);
            }
        }
        Ok(table)
    }

    /// Rebuild the candidate biopolymer tables from whichever input
    /// filters have data.
    pub fn identify_candidate_biopolymers(&mut self) -> Result<(), anyhow::Error> {
        self.set_filter(SchemaDb::Cand, "main_biopolymer", 0);
        self.db()
            .prepare_table_for_update(SchemaDb::Cand, "main_biopolymer")?;
        self.db()
            .connection()
            .execute("DELETE FROM `cand`.`main_biopolymer`", [])?;
        self.set_filter(SchemaDb::Cand, "alt_biopolymer", 0);
        self.db()
            .prepare_table_for_update(SchemaDb::Cand, "alt_biopolymer")?;
        self.db()
            .connection()
            .execute("DELETE FROM `cand`.`alt_biopolymer`", [])?;

        let id_column = if ONLY_GENE_MODELS {
            Column::GeneId
        } else {
            Column::BiopolymerId
        };
        for (focus, table) in [
            (Focus::Main, "main_biopolymer"),
            (Focus::Alt, "alt_biopolymer"),
        ] {
            let focus_db = focus.schema_db();
            let has_filters = crate::filters::FILTER_TABLES
                .iter()
                .filter(|t| !matches!(**t, "group" | "source"))
                .any(|t| self.filter_count(focus_db, t) > 0);
            if !has_filters {
                continue;
            }
            tracing::info!("identifying {} model candidates", focus_db);
            let request = QueryRequest::new(QueryMode::ModelGene, focus, vec![id_column]);
            let plan = self.build_query(&request)?;
            let rows = self.execute_plan(&plan, true, &[], None)?;
            {
                let conn = self.db().connection();
                let mut stmt = conn.prepare(&format!(
                    "INSERT OR IGNORE INTO `cand`.`{}` (biopolymer_id, flag) VALUES (?, 0)",
                    table
                ))?;
                for row in &rows {
                    if let Value::Integer(id) = row[0] {
                        stmt.execute([id])?;
                    }
                }
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT() FROM `cand`.`{}`", table),
                    [],
                    |row| row.get(0),
                )?;
                tracing::info!("OK: {} candidates", count.separate_with_commas());
            }
            self.set_filter(SchemaDb::Cand, table, 1);
        }
        Ok(())
    }

    /// Rebuild the candidate group table: groups surviving the group and
    /// source filters with a workable number of member genes.
    pub fn identify_candidate_groups(&mut self) -> Result<(), anyhow::Error> {
        tracing::info!("identifying candidate model groups");
        self.set_filter(SchemaDb::Cand, "group", 0);
        self.db().prepare_table_for_update(SchemaDb::Cand, "group")?;
        self.db()
            .connection()
            .execute("DELETE FROM `cand`.`group`", [])?;

        for focus in [Focus::Main, Focus::Alt] {
            let focus_db = focus.schema_db();
            let has_filters = ["group", "source"]
                .iter()
                .any(|t| self.filter_count(focus_db, t) > 0);
            if !has_filters {
                continue;
            }
            let request = QueryRequest::new(QueryMode::ModelGroup, focus, vec![Column::GroupId]);
            let plan = self.build_query(&request)?;
            let rows = self.execute_plan(&plan, true, &[], None)?;
            self.reduce_candidate_groups(&rows)?;
        }

        // restrict by group size
        let id_column = if ONLY_GENE_MODELS {
            Column::GeneId
        } else {
            Column::BiopolymerId
        };
        let mut request =
            QueryRequest::new(QueryMode::ModelGroup, Focus::Cand, vec![Column::GroupId]);
        request
            .having
            .insert(id_column, vec!["!= 0".to_string()]);
        let mut plan = self.build_query(&request)?;
        for source in column_sources(Column::GroupId) {
            if plan.from.contains(&source.alias) {
                plan.group_by
                    .push(format!("{}.{}", source.alias, source.rowid));
                break;
            }
        }
        let params = self.plan_params(false)?;
        for source in column_sources(id_column) {
            if plan.from.contains(&source.alias) {
                let expr = params.fill(&source.expr, None, None);
                let max_size = self.options().maximum_model_group_size;
                if max_size > 0 {
                    plan.having.insert(format!(
                        "(COUNT(DISTINCT {}) BETWEEN 2 AND {})",
                        expr, max_size
                    ));
                } else {
                    plan.having
                        .insert(format!("COUNT(DISTINCT {}) >= 2", expr));
                }
                break;
            }
        }
        let rows = self.execute_plan(&plan, true, &[], None)?;
        self.reduce_candidate_groups(&rows)?;

        let count: i64 =
            self.db()
                .connection()
                .query_row("SELECT COUNT() FROM `cand`.`group`", [], |row| row.get(0))?;
        tracing::info!("OK: {} groups", count.separate_with_commas());
        Ok(())
    }

    /// Insert or intersect one round of candidate group ids.
    fn reduce_candidate_groups(&mut self, rows: &[Vec<Value>]) -> Result<(), anyhow::Error> {
        {
            let conn = self.db().connection();
            if self.filter_count(SchemaDb::Cand, "group") > 0 {
                conn.execute("UPDATE `cand`.`group` SET flag = 0", [])?;
                let mut stmt =
                    conn.prepare("UPDATE `cand`.`group` SET flag = 1 WHERE group_id = ?")?;
                for row in rows {
                    if let Value::Integer(id) = row[0] {
                        stmt.execute([id])?;
                    }
                }
                conn.execute("DELETE FROM `cand`.`group` WHERE flag = 0", [])?;
            } else {
                let mut stmt = conn
                    .prepare("INSERT OR IGNORE INTO `cand`.`group` (group_id, flag) VALUES (?, 0)")?;
                for row in rows {
                    if let Value::Integer(id) = row[0] {
                        stmt.execute([id])?;
                    }
                }
            }
        }
        self.set_filter(SchemaDb::Cand, "group", 1);
        Ok(())
    }

    /// Compute (or return the cached) baseline gene models: candidate
    /// pairs scored by the count of distinct supporting sources and
    /// groups.
    pub fn gene_models(&mut self) -> Result<Vec<GeneModel>, anyhow::Error> {
        if let Some(models) = self.gene_models.borrow().as_ref() {
            return Ok(models.clone());
        }
        self.identify_candidate_biopolymers()?;
        self.identify_candidate_groups()?;

        let request = QueryRequest::new(
            QueryMode::Model,
            Focus::Cand,
            vec![
                Column::BiopolymerIdLeft,
                Column::BiopolymerIdRight,
                Column::SourceId,
                Column::GroupId,
            ],
        );
        let mut plan = self.build_query(&request)?;
        let expr_left = plan
            .select
            .get(&Column::BiopolymerIdLeft)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("model query missing left gene column"))?;
        let expr_right = plan
            .select
            .get(&Column::BiopolymerIdRight)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("model query missing right gene column"))?;
        let expr_source = plan
            .select
            .get(&Column::SourceId)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("model query missing source column"))?;
        let expr_group = plan
            .select
            .get(&Column::GroupId)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("model query missing group column"))?;
        plan.group_by
            .push(format!("MIN({}, {})", expr_left, expr_right));
        plan.group_by
            .push(format!("MAX({}, {})", expr_left, expr_right));
        let agg_source = format!("COUNT(DISTINCT {})", expr_source);
        let agg_group = format!("COUNT(DISTINCT {})", expr_group);
        plan.select
            .insert(Column::BiopolymerIdLeft, Some(format!("MIN({})", expr_left)));
        plan.select
            .insert(Column::BiopolymerIdRight, Some(format!("MAX({})", expr_right)));
        plan.select.insert(Column::SourceId, Some(agg_source.clone()));
        plan.select.insert(Column::GroupId, Some(agg_group.clone()));
        if self.options().minimum_model_score > 0 {
            plan.having.insert(format!(
                "{} >= {}",
                agg_source,
                self.options().minimum_model_score
            ));
        }
        if self.options().sort_models {
            plan.order_by.push(format!("{} DESC", agg_source));
            plan.order_by.push(format!("{} DESC", agg_group));
        }
        if self.options().maximum_model_count > 0 {
            plan.limit = Some(self.options().maximum_model_count);
        }

        tracing::info!("calculating baseline models");
        // the GROUP BY already prevents duplicates
        let rows = self.execute_plan(&plan, true, &[], None)?;
        let models: Vec<GeneModel> = rows
            .iter()
            .map(|row| -> Result<GeneModel, anyhow::Error> {
                Ok(GeneModel {
                    biopolymer_id_left: as_integer(&row[0])?,
                    biopolymer_id_right: as_integer(&row[1])?,
                    source_count: as_integer(&row[2])?,
                    group_count: as_integer(&row[3])?,
                })
            })
            .collect::<Result<_, _>>()?;
        tracing::info!("OK: {} models", models.len().separate_with_commas());
        *self.gene_models.borrow_mut() = Some(models.clone());
        Ok(models)
    }

    /// Produce gene-gene model rows over the requested left- and
    /// right-hand output types.
    pub fn generate_model_output(
        &mut self,
        types_left: &[String],
        types_right: &[String],
        apply_offset: bool,
    ) -> Result<OutputTable, anyhow::Error> {
        let limit = self.options().maximum_model_count as usize;
        let all_pairwise = self.options().all_pairwise_models;

        let models = if all_pairwise {
            Vec::new()
        } else {
            self.gene_models()?
        };

        let (header_l, columns_l) = columns_for_types(types_left)?;
        let (header_r, columns_r) = columns_for_types(types_right)?;
        if header_l.is_empty() || header_r.is_empty() {
            anyhow::bail!("model generation with empty column list");
        }
        let mut header: Vec<String> = header_l.iter().map(|h| format!("{}1", h)).collect();
        header[0] = format!("#{}", header[0]);
        let mut header_r: Vec<String> = header_r.iter().map(|h| format!("{}2", h)).collect();

        let id_column = if ONLY_GENE_MODELS {
            Column::GeneId
        } else {
            Column::BiopolymerId
        };
        let mut request_l = QueryRequest::new(QueryMode::Filter, Focus::Main, columns_l.clone());
        request_l.apply_offset = apply_offset;
        let mut request_r = QueryRequest::new(QueryMode::Filter, Focus::Alt, columns_r.clone());
        request_r.apply_offset = apply_offset;
        if !all_pairwise {
            // the CASE keeps all four model parameters bound on each side
            request_l.having.insert(
                id_column,
                vec!["= (CASE WHEN 1 THEN ?1 ELSE 0*?2*?3*?4 END)".to_string()],
            );
            request_r.having.insert(
                id_column,
                vec!["= (CASE WHEN 1 THEN ?2 ELSE 0*?1*?3*?4 END)".to_string()],
            );
        }
        let plan_l = self.build_query(&request_l)?;
        let plan_r = self.build_query(&request_r)?;
        self.prepare_tables_for_plan(&plan_l)?;
        self.prepare_tables_for_plan(&plan_r)?;
        let sql_l = query_text(&plan_l, RenderOptions::default());
        let sql_r = query_text(&plan_r, RenderOptions::default());
        let conn = self.db().connection();

        let mut table = OutputTable::default();
        if !all_pairwise {
            let diff_types = types_left != types_right;
            header_r.push("score(src-grp)".to_string());
            table.header = header.into_iter().chain(header_r).collect();

            let mut stmt_l = conn.prepare(&sql_l)?;
            let mut stmt_r = conn.prepare(&sql_r)?;
            let count_l = stmt_l.column_count();
            let count_r = stmt_r.column_count();
            let mut model_ids: HashSet<(String, String)> = HashSet::new();
            for model in &models {
                let bindings = [
                    model.biopolymer_id_left,
                    model.biopolymer_id_right,
                    model.source_count,
                    model.group_count,
                ];
                let score = format!("{}-{}", model.source_count, model.group_count);
                // store the expanded right-hand side, then pair it with
                // each expanded left-hand row
                let mut list_r: Vec<Vec<Value>> = Vec::new();
                let mut rows_r = stmt_r.query(rusqlite::params_from_iter(bindings.iter()))?;
                while let Some(row) = rows_r.next()? {
                    let mut cells = Vec::with_capacity(count_r);
                    for index in 0..count_r {
                        cells.push(row.get::<_, Value>(index)?);
                    }
                    list_r.push(cells);
                }
                let mut rows_l = stmt_l.query(rusqlite::params_from_iter(bindings.iter()))?;
                while let Some(row) = rows_l.next()? {
                    let mut cells_l = Vec::with_capacity(count_l);
                    for index in 0..count_l {
                        cells_l.push(row.get::<_, Value>(index)?);
                    }
                    let rowid_l = value_to_string(&cells_l[count_l - 1]);
                    for cells_r in &list_r {
                        let rowid_r = value_to_string(&cells_r[count_r - 1]);
                        if !diff_types && rowid_l == rowid_r {
                            continue;
                        }
                        let model_id = if diff_types || rowid_l <= rowid_r {
                            (rowid_l.clone(), rowid_r.clone())
                        } else {
                            (rowid_r.clone(), rowid_l.clone())
                        };
                        if model_ids.contains(&model_id) {
                            continue;
                        }
                        model_ids.insert(model_id);
                        let mut out: Vec<String> =
                            cells_l[..count_l - 1].iter().map(value_to_string).collect();
                        out.extend(cells_r[..count_r - 1].iter().map(value_to_string));
                        out.push(score.clone());
                        table.rows.push(out);
                        if limit > 0 && table.rows.len() >= limit {
                            return Ok(table);
                        }
                    }
                }
            }
        } else {
            table.header = header.into_iter().chain(header_r).collect();
            let diff_cols = columns_l != columns_r;
            let rows_r = self.execute_plan_raw(&sql_r)?;
            let rows_l = self.execute_plan_raw(&sql_l)?;
            for row_l in &rows_l {
                let rowid_l = value_to_string(row_l.last().expect("rows carry a _rowid"));
                for row_r in &rows_r {
                    let rowid_r = value_to_string(row_r.last().expect("rows carry a _rowid"));
                    if diff_cols || rowid_l != rowid_r {
                        let mut out: Vec<String> = row_l[..row_l.len() - 1]
                            .iter()
                            .map(value_to_string)
                            .collect();
                        out.extend(row_r[..row_r.len() - 1].iter().map(value_to_string));
                        table.rows.push(out);
                        if limit > 0 && table.rows.len() >= limit {
                            return Ok(table);
                        }
                    }
                }
            }
        }
        Ok(table)
    }

    /// Execute rendered SQL, de-duplicating on the trailing `_rowid`.
    fn execute_plan_raw(&self, sql: &str) -> Result<Vec<Vec<Value>>, anyhow::Error> {
        let conn = self.db().connection();
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut seen: HashSet<String> = HashSet::new();
        let mut result = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let row_id = value_to_string(&row.get::<_, Value>(column_count - 1)?);
            if seen.contains(&row_id) {
                continue;
            }
            seen.insert(row_id);
            let mut cells = Vec::with_capacity(column_count);
            for index in 0..column_count {
                cells.push(row.get::<_, Value>(index)?);
            }
            result.push(cells);
        }
        Ok(result)
    }

    /// Build the `from`/`join` masks for a query restricted to specific
    /// filter tables, as the PARIS paths use.
    pub fn mask_for(&self, entries: &[(SchemaDb, &'static str)]) -> TableMask {
        let mut mask = TableMask::default();
        for (db, table) in entries {
            mask.set(*db, table, true);
        }
        mask
    }
}

fn as_integer(value: &Value) -> Result<i64, anyhow::Error> {
    match value {
        Value::Integer(value) => Ok(*value),
        other => anyhow::bail!("expected integer value, got {:?}", other),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::db::lookup::Identifier;
    use crate::db::schema::SchemaDb;
    use crate::filters::test_support::fixture_session;

    #[test]
    fn filter_output_has_hash_prefixed_header() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let table = session
            .generate_filter_output(&["snp".to_string(), "gene".to_string()], false)
            .unwrap();
        assert_eq!(vec!["#snp".to_string(), "gene".to_string()], table.header);
        assert_eq!(vec![vec!["rs1001".to_string(), "ALPHA".to_string()]], table.rows);
    }

    #[test]
    fn annotation_keeps_unmatched_rows() {
        let (mut session, _tmp_dir) = fixture_session();
        // rs1004 hits no gene and must still appear, with empty cells
        session
            .union_snps(SchemaDb::Main, &[(1001, None), (1004, None)], None)
            .unwrap();
        let table = session
            .generate_annotation_output(&["snp".to_string()], &["gene".to_string()], false)
            .unwrap();
        assert_eq!(vec!["#snp".to_string(), "gene".to_string()], table.header);
        let mut rows = table.rows.clone();
        rows.sort();
        assert_eq!(
            vec![
                vec!["rs1001".to_string(), "ALPHA".to_string()],
                vec!["rs1004".to_string(), "".to_string()],
            ],
            rows
        );
    }

    #[test]
    fn gene_models_score_by_shared_groups() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_genes(
                SchemaDb::Main,
                &[
                    Identifier::new("symbol", "ALPHA", None),
                    Identifier::new("symbol", "BETA", None),
                    Identifier::new("symbol", "GAMMA", None),
                ],
                None,
            )
            .unwrap();
        session.options_mut().minimum_model_score = 1;
        let models = session.gene_models().unwrap();
        // ALPHA+BETA share PATH_A, ALPHA+GAMMA share PATH_B
        assert_eq!(2, models.len());
        for model in &models {
            assert!(model.biopolymer_id_left < model.biopolymer_id_right);
            assert_eq!(1, model.source_count);
            assert_eq!(1, model.group_count);
        }
    }

    #[test]
    fn model_output_pairs_genes() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_genes(
                SchemaDb::Main,
                &[
                    Identifier::new("symbol", "ALPHA", None),
                    Identifier::new("symbol", "BETA", None),
                ],
                None,
            )
            .unwrap();
        session.options_mut().minimum_model_score = 1;
        let table = session
            .generate_model_output(&["gene".to_string()], &["gene".to_string()], false)
            .unwrap();
        assert_eq!(
            vec![
                "#gene1".to_string(),
                "gene2".to_string(),
                "score(src-grp)".to_string()
            ],
            table.header
        );
        assert_eq!(1, table.rows.len());
        let row = &table.rows[0];
        assert!(row[0] == "ALPHA" || row[0] == "BETA");
        assert!(row[1] == "ALPHA" || row[1] == "BETA");
        assert_ne!(row[0], row[1]);
        assert_eq!("1-1", row[2]);
    }
}
