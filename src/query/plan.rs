//! Query plan construction.
//!
//! Given requested output columns and the current filter state, the
//! planner selects table aliases, finds a join path over the alias
//! adjacency graph, and distributes predicates over WHERE and LEFT JOIN ON
//! clauses.  The result is a structured [`QueryPlan`]; SQL text is only
//! produced at the rendering boundary.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use indexmap::IndexMap;
use strum::IntoEnumIterator;

use crate::db::schema::SchemaDb;
use crate::filters::Session;
use crate::query::catalog::{
    column_sources, Alias, Column, PlanParams, ALIAS_RULES, JOIN_RULES, PAIR_RULES,
};
use crate::query::schema::ReduceMode;

/// Construction mode; annotation covers columns with LEFT JOINs so base
/// rows are never dropped, the model modes restrict the starting alias
/// set to one side of the candidate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Filter,
    Annotate,
    ModelGene,
    ModelGroup,
    Model,
}

/// Focus database seeding the FROM set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Main,
    Alt,
    Cand,
}

impl Focus {
    pub fn schema_db(&self) -> SchemaDb {
        match self {
            Focus::Main => SchemaDb::Main,
            Focus::Alt => SchemaDb::Alt,
            Focus::Cand => SchemaDb::Cand,
        }
    }
}

/// A `database.table -> enabled` mask.
#[derive(Debug, Clone, Default)]
pub struct TableMask(HashMap<(SchemaDb, &'static str), bool>);

impl TableMask {
    pub fn set(&mut self, schema_db: SchemaDb, table: &'static str, enabled: bool) {
        self.0.insert((schema_db, table), enabled);
    }

    pub fn get(&self, schema_db: SchemaDb, table: &str) -> bool {
        self.0
            .iter()
            .any(|((db, tbl), enabled)| *db == schema_db && *tbl == table && *enabled)
    }
}

/// A fully specified query request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub mode: QueryMode,
    pub focus: Focus,
    pub select: Vec<Column>,
    /// Conditions on output columns, e.g. `>= 2` or `= ?1`.
    pub having: IndexMap<Column, Vec<String>>,
    /// Conditions on explicit alias columns, e.g. `(d_b, biopolymer_id, "= 7")`.
    pub where_conds: Vec<(Alias, &'static str, String)>,
    /// Apply the configured coordinate base and half-open offsets to
    /// emitted coordinates.
    pub apply_offset: bool,
    /// Which input-filter tables seed the FROM set; defaults to every
    /// filter table with data.
    pub from_filter: Option<TableMask>,
    /// Which input-filter tables may be joined through; defaults like
    /// `from_filter`.
    pub join_filter: Option<TableMask>,
    /// Swap the knowledge group tables for their user-knowledge
    /// counterparts.
    pub user_knowledge: bool,
}

impl QueryRequest {
    pub fn new(mode: QueryMode, focus: Focus, select: Vec<Column>) -> Self {
        Self {
            mode,
            focus,
            select,
            having: IndexMap::new(),
            where_conds: Vec::new(),
            apply_offset: false,
            from_filter: None,
            join_filter: None,
            user_knowledge: false,
        }
    }
}

/// A structured query ready for rendering.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    /// Output columns in request order.
    pub columns: Vec<Column>,
    /// Expression per output column; `None` renders as NULL.
    pub select: IndexMap<Column, Option<String>>,
    /// Row-identity columns per contributing alias, concatenated into the
    /// `_rowid` de-duplication column.
    pub rowids: IndexMap<Alias, BTreeSet<&'static str>>,
    pub from: BTreeSet<Alias>,
    /// LEFT JOIN aliases with their ON conditions, in dependency order.
    pub left_join: IndexMap<Alias, BTreeSet<String>>,
    pub where_conds: BTreeSet<String>,
    pub group_by: Vec<String>,
    pub having: BTreeSet<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
}

impl Session {
    /// Resolve the option values substituted into predicate templates.
    pub(crate) fn plan_params(&self, apply_offset: bool) -> Result<PlanParams, anyhow::Error> {
        let options = self.options();
        let ld_profile = options.ld_profile.clone().unwrap_or_default();
        let ldprofile_id = self.db().ldprofile_id(&ld_profile)?.ok_or_else(|| {
            anyhow::anyhow!(
                "LD profile record '{}' not found in the knowledge database",
                ld_profile
            )
        })?;
        let (rm_bases, rm_percent) = options.effective_region_match();
        let (gb_column1, gb_column2) = match options.reduce_ambiguous_knowledge {
            ReduceMode::No => ("specificity", "specificity"),
            ReduceMode::Implication => ("implication", "implication"),
            ReduceMode::Quality => ("quality", "quality"),
            ReduceMode::Any => ("implication", "quality"),
        };
        let gb_condition = if options.allow_ambiguous_knowledge {
            "> 0"
        } else {
            ">= 100"
        };
        let mut p_min_offset = String::new();
        let mut p_max_offset = String::new();
        if apply_offset {
            if options.coordinate_base != 1 {
                p_min_offset = format!("+ {}", options.coordinate_base - 1);
            }
            if options.coordinate_base != 1 || options.regions_half_open {
                p_max_offset = format!(
                    "+ {}",
                    options.coordinate_base - 1 + i64::from(options.regions_half_open)
                );
            }
        }
        Ok(PlanParams {
            ldprofile_id,
            zone_size: self.db().zone_size()?,
            rp_margin: options.region_position_margin,
            rm_bases: rm_bases
                .map(|bases| bases.to_string())
                .unwrap_or_else(|| "NULL".to_string()),
            rm_percent: rm_percent
                .map(|percent| percent.to_string())
                .unwrap_or_else(|| "NULL".to_string()),
            type_id_gene: self.db().type_id("gene")?,
            namespace_id_symbol: self.db().namespace_id("symbol")?,
            gb_column1,
            gb_column2,
            gb_condition,
            p_min_offset,
            p_max_offset,
        })
    }

    /// The default filter mask: every input-filter table that holds data.
    pub fn default_table_mask(&self) -> TableMask {
        let mut mask = TableMask::default();
        for schema_db in [SchemaDb::Main, SchemaDb::Alt] {
            for table in crate::filters::FILTER_TABLES {
                mask.set(schema_db, table, self.filter_count(schema_db, table) > 0);
            }
        }
        for table in ["main_biopolymer", "alt_biopolymer", "group"] {
            mask.set(
                SchemaDb::Cand,
                table,
                self.filter_count(SchemaDb::Cand, table) > 0,
            );
        }
        mask
    }

    /// Build a query plan for the request; see the module docs for the
    /// overall procedure.
    pub fn build_query(&self, request: &QueryRequest) -> Result<QueryPlan, anyhow::Error> {
        let params = self.plan_params(request.apply_offset)?;
        let from_filter = request
            .from_filter
            .clone()
            .unwrap_or_else(|| self.default_table_mask());
        let join_filter = request
            .join_filter
            .clone()
            .unwrap_or_else(|| self.default_table_mask());

        // knowledge tables are always joinable; user knowledge swaps the
        // knowledge group tables for their user counterparts
        let mut know_filter = TableMask::default();
        for alias in Alias::iter() {
            let (db, table) = alias.table();
            if db == SchemaDb::Know {
                know_filter.set(SchemaDb::Know, table, true);
            }
        }
        if request.user_knowledge {
            for alias in Alias::iter() {
                let (db, table) = alias.table();
                if db == SchemaDb::User && know_filter.get(SchemaDb::Know, table) {
                    know_filter.set(SchemaDb::Know, table, false);
                    know_filter.set(SchemaDb::User, table, true);
                }
            }
        }

        let usable = |alias: Alias| -> bool {
            let (db, table) = alias.filter_table();
            know_filter.get(db, table) || join_filter.get(db, table)
        };

        // alias adjacency, pruned down to usable aliases
        let mut adjacent: BTreeMap<Alias, BTreeSet<Alias>> = BTreeMap::new();
        for rule in JOIN_RULES {
            for &left in rule.left {
                for &right in rule.right {
                    if left != right && usable(left) && usable(right) {
                        adjacent.entry(left).or_default().insert(right);
                        adjacent.entry(right).or_default().insert(left);
                    }
                }
            }
        }

        // which adjacency-reachable aliases can supply each column
        let mut column_aliases: IndexMap<Column, Vec<Alias>> = IndexMap::new();
        let mut alias_columns: BTreeMap<Alias, BTreeSet<Column>> = BTreeMap::new();
        for column in request.select.iter().chain(request.having.keys()) {
            if column_aliases.contains_key(column) {
                continue;
            }
            let mut aliases = Vec::new();
            for source in column_sources(*column) {
                if adjacent.contains_key(&source.alias) {
                    aliases.push(source.alias);
                    alias_columns.entry(source.alias).or_default().insert(*column);
                }
            }
            column_aliases.insert(*column, aliases);
        }
        if column_aliases.is_empty() {
            anyhow::bail!("internal query with no outputs or conditions");
        }

        let mut plan = QueryPlan::default();
        for column in &request.select {
            plan.columns.push(*column);
            plan.select.insert(*column, None);
        }

        // primary FROM set: aliases with explicit conditions plus the
        // focus-matching input-filter tables holding data
        for (alias, _col, _cond) in &request.where_conds {
            plan.from.insert(*alias);
        }
        for alias in Alias::iter() {
            let (db, table) = alias.table();
            let (filter_db, filter_table) = alias.filter_table();
            if !from_filter.get(filter_db, filter_table) {
                continue;
            }
            let focus_db = request.focus.schema_db();
            let alt_includes_main = db == SchemaDb::Main
                && request.focus == Focus::Alt
                && request.mode != QueryMode::Annotate
                && !self.options().alternate_model_filtering;
            if db != focus_db && !alt_includes_main {
                continue;
            }
            if request.mode == QueryMode::ModelGene && matches!(table, "group" | "source") {
                continue;
            }
            if request.mode == QueryMode::ModelGroup && !matches!(table, "group" | "source") {
                continue;
            }
            // only re-use the main gene candidates on the right if necessary
            if alias == Alias::CandMainBioRight
                && (self.options().alternate_model_filtering
                    || from_filter.get(SchemaDb::Cand, "alt_biopolymer"))
            {
                continue;
            }
            plan.from.insert(alias);
        }

        // fall back to the last knowledge-side source of the first column
        if plan.from.is_empty() {
            let column = request
                .select
                .iter()
                .chain(request.having.keys())
                .next()
                .expect("verified above");
            let mut fallback = None;
            for source in column_sources(*column) {
                let (db, table) = source.alias.table();
                if know_filter.get(db, table) {
                    fallback = Some(source.alias);
                }
            }
            let alias = fallback
                .ok_or_else(|| anyhow::anyhow!("no source available for column {}", column))?;
            plan.from.insert(alias);
        }

        // connect the FROM set into one component
        if plan.from.len() > 1 {
            let mut remaining = plan.from.clone();
            let start = *remaining.iter().next().expect("from is non-empty");
            remaining.remove(&start);
            let mut inside: BTreeSet<Alias> = BTreeSet::from([start]);
            let mut outside: BTreeSet<Alias> = adjacent.keys().copied().collect();
            outside.remove(&start);
            let mut queue = VecDeque::new();
            queue.push_back((inside.clone(), outside.clone(), remaining.clone()));
            let mut connected = false;
            while let Some((q_inside, q_outside, q_remaining)) = queue.pop_front() {
                if q_remaining.is_empty() {
                    inside = q_inside;
                    connected = true;
                    break;
                }
                for alias in &q_outside {
                    if adjacent
                        .get(alias)
                        .map(|peers| peers.intersection(&q_inside).next().is_some())
                        .unwrap_or(false)
                    {
                        let mut next_inside = q_inside.clone();
                        next_inside.insert(*alias);
                        let mut next_outside = q_outside.clone();
                        next_outside.remove(alias);
                        let mut next_remaining = q_remaining.clone();
                        next_remaining.remove(alias);
                        queue.push_back((next_inside, next_outside, next_remaining));
                    }
                }
            }
            if !connected {
                anyhow::bail!(
                    "could not find a join path for starting tables: {:?}",
                    plan.from
                );
            }
            plan.from.extend(inside);
        }

        // cover remaining output columns
        let mut columns_remaining: BTreeSet<Column> = column_aliases
            .iter()
            .filter(|(_col, aliases)| !aliases.iter().any(|alias| plan.from.contains(alias)))
            .map(|(col, _aliases)| *col)
            .collect();
        if request.mode == QueryMode::Annotate {
            // LEFT JOIN a path to the most-preferred source of each column,
            // in request order
            while !columns_remaining.is_empty() {
                let target = *request
                    .select
                    .iter()
                    .chain(request.having.keys())
                    .find(|col| columns_remaining.contains(*col))
                    .expect("remaining columns all come from the request");
                let alias = *column_aliases
                    .get(&target)
                    .and_then(|aliases| aliases.first())
                    .ok_or_else(|| {
                        anyhow::anyhow!("could not find source table for output column {}", target)
                    })?;
                let mut queue: VecDeque<Vec<Alias>> = VecDeque::new();
                queue.push_back(vec![alias]);
                let mut found = None;
                while let Some(mut path) = queue.pop_front() {
                    let last = *path.last().expect("paths are never empty");
                    if plan.from.contains(&last) || plan.left_join.contains_key(&last) {
                        path.pop();
                        found = Some(path);
                        break;
                    }
                    if let Some(peers) = adjacent.get(&last) {
                        for peer in peers {
                            if !path.contains(peer) {
                                let mut next = path.clone();
                                next.push(*peer);
                                queue.push_back(next);
                            }
                        }
                    }
                }
                let mut path = found.ok_or_else(|| {
                    anyhow::anyhow!(
                        "could not join source table {} for output column {}",
                        alias,
                        target
                    )
                })?;
                while let Some(alias) = path.pop() {
                    if let Some(covered) = alias_columns.get(&alias) {
                        for column in covered {
                            columns_remaining.remove(column);
                        }
                    }
                    plan.left_join.entry(alias).or_default();
                }
            }
        } else if !columns_remaining.is_empty() {
            // expand the FROM set over knowledge tables until every column
            // has a source
            let inside = plan.from.clone();
            let outside: BTreeSet<Alias> = Alias::iter()
                .filter(|alias| {
                    let (db, table) = alias.table();
                    !inside.contains(alias)
                        && !plan.left_join.contains_key(alias)
                        && (know_filter.get(db, table) || table == "region_zone")
                })
                .collect();
            let mut queue = VecDeque::new();
            queue.push_back((inside, outside, columns_remaining.clone()));
            let mut covered = None;
            while let Some((q_inside, q_outside, q_remaining)) = queue.pop_front() {
                if q_remaining.is_empty() {
                    covered = Some(q_inside);
                    break;
                }
                for alias in &q_outside {
                    if adjacent
                        .get(alias)
                        .map(|peers| peers.intersection(&q_inside).next().is_some())
                        .unwrap_or(false)
                    {
                        let mut next_inside = q_inside.clone();
                        next_inside.insert(*alias);
                        let mut next_outside = q_outside.clone();
                        next_outside.remove(alias);
                        let mut next_remaining = q_remaining.clone();
                        if let Some(columns) = alias_columns.get(alias) {
                            for column in columns {
                                next_remaining.remove(column);
                            }
                        }
                        queue.push_back((next_inside, next_outside, next_remaining));
                    }
                }
            }
            let inside = covered.ok_or_else(|| {
                anyhow::anyhow!(
                    "could not find a source table for output columns: {:?}",
                    columns_remaining
                )
            })?;
            plan.from.extend(inside);
        }

        // assign output column expressions
        for column in &request.select {
            if plan.select.get(column).map(Option::is_some).unwrap_or(false) {
                continue;
            }
            for source in column_sources(*column) {
                let in_from = plan.from.contains(&source.alias);
                let in_join = plan.left_join.contains_key(&source.alias);
                if in_from || in_join {
                    plan.rowids
                        .entry(source.alias)
                        .or_default()
                        .insert(source.rowid);
                    plan.select
                        .insert(*column, Some(params.fill(&source.expr, None, None)));
                    for cond in &source.conds {
                        let cond = params.fill(cond, None, None);
                        if in_from {
                            plan.where_conds.insert(cond);
                        } else {
                            plan.left_join
                                .get_mut(&source.alias)
                                .expect("alias is in left_join")
                                .insert(cond);
                        }
                    }
                    break;
                }
            }
        }

        // attach conditions on output columns
        for (column, conds) in &request.having {
            for source in column_sources(*column) {
                let in_from = plan.from.contains(&source.alias);
                let in_join = plan.left_join.contains_key(&source.alias);
                if in_from || in_join {
                    let expr = params.fill(&source.expr, None, None);
                    for cond in conds {
                        let cond = format!("({} {})", expr, cond);
                        if in_from {
                            plan.where_conds.insert(cond);
                        } else {
                            plan.left_join
                                .get_mut(&source.alias)
                                .expect("alias is in left_join")
                                .insert(cond);
                        }
                    }
                    for cond in &source.conds {
                        let cond = params.fill(cond, None, None);
                        if in_from {
                            plan.where_conds.insert(cond);
                        } else {
                            plan.left_join
                                .get_mut(&source.alias)
                                .expect("alias is in left_join")
                                .insert(cond);
                        }
                    }
                    break;
                }
            }
        }

        // attach explicit alias-column conditions
        for (alias, column, cond) in &request.where_conds {
            plan.where_conds
                .insert(format!("{}.{} {}", alias, column, params.fill(cond, None, None)));
        }

        // per-alias constraints
        for rule in ALIAS_RULES {
            for alias in rule.aliases {
                if plan.from.contains(alias) {
                    for cond in rule.conds {
                        plan.where_conds.insert(params.fill(cond, Some(*alias), None));
                    }
                } else if let Some(join_conds) = plan.left_join.get_mut(alias) {
                    for cond in rule.conds {
                        join_conds.insert(params.fill(cond, Some(*alias), None));
                    }
                }
            }
        }
        // stated directly rather than as a template to keep the covering
        // index on snp_locus usable
        if !self.options().allow_unvalidated_snp_positions {
            if plan.from.contains(&Alias::KnowSnpLocus) {
                plan.where_conds.insert("d_sl.validated > 0".to_string());
            }
            if let Some(join_conds) = plan.left_join.get_mut(&Alias::KnowSnpLocus) {
                join_conds.insert("d_sl.validated > 0".to_string());
            }
        }

        // pairwise join and pair constraints
        for rule in JOIN_RULES.iter().chain(PAIR_RULES) {
            for &left in rule.left {
                for &right in rule.right {
                    if left == right {
                        continue;
                    }
                    let left_from = plan.from.contains(&left);
                    let right_from = plan.from.contains(&right);
                    let left_join = plan.left_join.get_index_of(&left);
                    let right_join = plan.left_join.get_index_of(&right);
                    let target = if left_from && right_from {
                        None
                    } else if left_from && right_join.is_some() {
                        Some(right)
                    } else if left_join.is_some() && right_from {
                        Some(left)
                    } else if let (Some(left_idx), Some(right_idx)) = (left_join, right_join) {
                        // attach to whichever side joined later to keep the
                        // dependency order valid
                        Some(if left_idx > right_idx { left } else { right })
                    } else {
                        continue;
                    };
                    for cond in rule.conds {
                        let cond = params.fill(cond, Some(left), Some(right));
                        match target {
                            None => {
                                plan.where_conds.insert(cond);
                            }
                            Some(alias) => {
                                plan.left_join
                                    .get_mut(&alias)
                                    .expect("alias is in left_join")
                                    .insert(cond);
                            }
                        }
                    }
                }
            }
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::db::schema::SchemaDb;
    use crate::filters::test_support::fixture_session;
    use crate::query::catalog::{Alias, Column};

    use super::{Focus, QueryMode, QueryRequest};

    #[test]
    fn snp_filter_reaches_genes_through_zones() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::GeneLabel, Column::PositionChr, Column::PositionPos],
            ))
            .unwrap();
        // the SNP filter seeds the query, loci and gene regions connect
        // through the zone index
        assert!(plan.from.contains(&Alias::MainSnp));
        assert!(plan.from.contains(&Alias::KnowSnpLocus));
        assert!(plan.from.contains(&Alias::KnowBioZone));
        assert!(plan.from.contains(&Alias::KnowBioRegion));
        assert!(plan.from.contains(&Alias::KnowBio));
        assert!(plan
            .where_conds
            .iter()
            .any(|cond| cond.contains("m_s.rs = d_sl.rs") || cond.contains("d_sl.rs = m_s.rs")));
        assert!(plan
            .where_conds
            .iter()
            .any(|cond| cond.contains("zone")));
    }

    #[test]
    fn empty_filters_fall_back_to_knowledge_source() {
        let (session, _tmp_dir) = fixture_session();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::GeneLabel],
            ))
            .unwrap();
        assert!(plan.from.contains(&Alias::KnowBio));
        // gene output from the knowledge table carries its type restriction
        assert!(plan
            .where_conds
            .iter()
            .any(|cond| cond.contains("d_b.type_id = 1")));
    }

    #[test]
    fn annotate_covers_columns_with_left_joins() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let mut request = QueryRequest::new(
            QueryMode::Annotate,
            Focus::Alt,
            vec![Column::GeneLabel],
        );
        request.where_conds = vec![(Alias::MainSnp, "rowid", "= ?1".to_string())];
        let plan = session.build_query(&request).unwrap();
        assert!(plan.from.contains(&Alias::MainSnp));
        assert!(!plan.left_join.is_empty());
        // annotation join path must end at a gene source
        assert!(plan.left_join.contains_key(&Alias::KnowBio));
    }

    #[test]
    fn ld_profile_is_applied_to_gene_regions() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::GeneLabel, Column::PositionPos],
            ))
            .unwrap();
        assert!(plan
            .where_conds
            .iter()
            .any(|cond| cond.contains("d_br.ldprofile_id = 1")));
    }

    #[test]
    fn group_filter_joins_through_membership() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_groups(
                SchemaDb::Main,
                &[crate::db::lookup::Identifier::new("pathway", "PATH_A", None)],
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
        assert!(plan.from.contains(&Alias::MainGroup));
        assert!(plan.from.contains(&Alias::KnowGroupBio));
        assert!(plan.from.contains(&Alias::KnowBio));
        // ambiguity threshold on group membership
        assert!(plan
            .where_conds
            .iter()
            .any(|cond| cond.contains("d_gb.specificity >= 100")));
    }

    #[test]
    fn unvalidated_snp_positions_can_be_excluded() {
        let (mut session, _tmp_dir) = fixture_session();
        session.options_mut().allow_unvalidated_snp_positions = false;
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let plan = session
            .build_query(&QueryRequest::new(
                QueryMode::Filter,
                Focus::Main,
                vec![Column::PositionChr, Column::PositionPos],
            ))
            .unwrap();
        assert!(plan.where_conds.contains("d_sl.validated > 0"));
    }

    #[test]
    fn user_knowledge_swaps_group_tables() {
        let (mut session, _tmp_dir) = fixture_session();
        let usid = session.add_user_source("mylab", "curation").unwrap();
        let ugid = session.add_user_group(usid, "my-set", "genes").unwrap();
        session
            .add_user_group_members(
                ugid,
                &[crate::db::lookup::Identifier::new("symbol", "ALPHA", None)],
                None,
            )
            .unwrap();
        session
            .union_genes(
                SchemaDb::Main,
                &[crate::db::lookup::Identifier::new("symbol", "ALPHA", None)],
                None,
            )
            .unwrap();
        let mut request = QueryRequest::new(
            QueryMode::Filter,
            Focus::Main,
            vec![Column::GroupId, Column::GeneLabel],
        );
        request.user_knowledge = true;
        let plan = session.build_query(&request).unwrap();
        assert!(plan.from.contains(&Alias::UserGroupBio));
        assert!(!plan.from.contains(&Alias::KnowGroupBio));
    }

    #[test]
    fn offsets_are_applied_to_coordinates() {
        let (mut session, _tmp_dir) = fixture_session();
        session.options_mut().coordinate_base = 0;
        session
            .union_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        let mut request = QueryRequest::new(
            QueryMode::Filter,
            Focus::Main,
            vec![Column::PositionPos],
        );
        request.apply_offset = true;
        let plan = session.build_query(&request).unwrap();
        let expr = plan.select.get(&Column::PositionPos).unwrap().clone().unwrap();
        assert_eq!("d_sl.pos + -1", expr);
    }
}
