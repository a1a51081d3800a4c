//! Session state and input-filter accumulation.
//!
//! A [`Session`] owns the storage handle, the effective options, and the
//! per-table input-filter counters the planner consults.  Each filter kind
//! supports two operations: `union` adds rows, `intersect` reduces the
//! existing rows to those matching the input through the flag-column
//! lifecycle (clear flags, mark matches, delete unmarked).

use std::cell::RefCell;
use std::collections::HashMap;

use thousands::Separable;

use crate::db::lookup::{ErrorCallback, Identifier, MatchTally, MergeTally};
use crate::db::schema::SchemaDb;
use crate::db::Database;
use crate::query::schema::QueryOptions;

/// Why an input row was skipped during normalization; rendered into the
/// per-kind invalid-input report.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    /// Missing or malformed chromosome/position data.
    #[error("invalid data at index {0}")]
    Data(usize),
    /// A source name matching neither knowledge nor user sources.
    #[error("invalid source at index {0}")]
    Source(usize),
}

/// A position input row after normalization; `None` coordinates mark
/// invalid input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocusInput {
    pub label: String,
    pub chrom: Option<u8>,
    pub pos: Option<i64>,
    pub extra: Option<String>,
}

/// A region input row after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionInput {
    pub label: String,
    pub chrom: Option<u8>,
    pub pos_min: Option<i64>,
    pub pos_max: Option<i64>,
    pub extra: Option<String>,
}

/// A pairwise gene model with its `(source, group)` support counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneModel {
    pub biopolymer_id_left: i64,
    pub biopolymer_id_right: i64,
    pub source_count: i64,
    pub group_count: i64,
}

/// One worker session: storage handle, options, and filter state.
pub struct Session {
    db: Database,
    options: QueryOptions,
    input_filters: HashMap<(SchemaDb, &'static str), u32>,
    pub(crate) gene_models: RefCell<Option<Vec<GeneModel>>>,
}

/// The tables carrying input filters per focus database.
pub const FILTER_TABLES: &[&str] = &[
    "snp",
    "locus",
    "region",
    "region_zone",
    "gene",
    "group",
    "source",
];

impl Session {
    /// Wrap an open database into a session with the given options.
    pub fn new(db: Database, options: QueryOptions) -> Self {
        let mut input_filters = HashMap::new();
        for schema_db in [SchemaDb::Main, SchemaDb::Alt] {
            for table in FILTER_TABLES {
                input_filters.insert((schema_db, *table), 0);
            }
        }
        for table in ["main_biopolymer", "alt_biopolymer", "group"] {
            input_filters.insert((SchemaDb::Cand, table), 0);
        }
        for table in ["source", "group", "group_biopolymer"] {
            input_filters.insert((SchemaDb::User, table), 0);
        }
        Self {
            db,
            options,
            input_filters,
            gene_models: RefCell::new(None),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    /// How many times a filter table has been restricted.
    pub fn filter_count(&self, schema_db: SchemaDb, table: &str) -> u32 {
        self.input_filters
            .get(&(schema_db, table))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn bump_filter(&mut self, schema_db: SchemaDb, table: &'static str) {
        *self
            .input_filters
            .entry((schema_db, table))
            .or_insert(0) += 1;
    }

    pub(crate) fn set_filter(&mut self, schema_db: SchemaDb, table: &'static str, count: u32) {
        self.input_filters.insert((schema_db, table), count);
    }

    fn assert_focus(focus: SchemaDb) {
        assert!(
            matches!(focus, SchemaDb::Main | SchemaDb::Alt),
            "input filters exist only for main and alt"
        );
    }

    /// Resolve merges and, unless ambiguous SNPs are allowed, keep only
    /// RS numbers with at most one locus.  Returns `(input_rs, extra,
    /// current_rs)` rows ready for insertion.
    fn merged_filtered_snps(
        &self,
        snps: &[(i64, Option<String>)],
        merge_tally: &mut MergeTally,
        locus_tally: &mut MatchTally,
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<Vec<(i64, Option<String>, i64)>, anyhow::Error> {
        let merged = self.db.current_rses(snps, Some(merge_tally))?;
        if self.options.allow_ambiguous_snps {
            return Ok(merged);
        }
        // thread the original input through the locus lookup's extra slot
        let inputs: Vec<(i64, Option<String>)> = merged
            .iter()
            .map(|(old, extra, new)| {
                (
                    *new,
                    Some(format!("{}\t{}", old, extra.as_deref().unwrap_or(""))),
                )
            })
            .collect();
        let validated = if self.options.allow_unvalidated_snp_positions {
            None
        } else {
            Some(true)
        };
        let loci = self.db.snp_loci(
            &inputs,
            0,
            Some(1),
            validated,
            Some(locus_tally),
            error_callback,
        )?;
        Ok(loci
            .into_iter()
            .filter_map(|locus| {
                let passthrough = locus.extra.unwrap_or_default();
                let (old, extra) = match passthrough.split_once('\t') {
                    Some((old, "")) => (old.parse().ok()?, None),
                    Some((old, extra)) => (old.parse().ok()?, Some(extra.to_string())),
                    None => (passthrough.parse().ok()?, None),
                };
                Some((old, extra, locus.rs))
            })
            .collect())
    }

    /// Add SNPs to the RS-number filter.
    pub fn union_snps(
        &mut self,
        focus: SchemaDb,
        snps: &[(i64, Option<String>)],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} SNP filter", focus);
        self.db.prepare_table_for_update(focus, "snp")?;
        let mut merge_tally = MergeTally::default();
        let mut locus_tally = MatchTally::default();
        let rows =
            self.merged_filtered_snps(snps, &mut merge_tally, &mut locus_tally, error_callback)?;
        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`snp` (label, extra, rs) VALUES ('rs'||?1, ?2, ?3)",
                focus
            ))?;
            for (old, extra, new) in &rows {
                stmt.execute(rusqlite::params![old, extra, new])?;
            }
        }
        tx.commit()?;
        tracing::info!(
            "added {} SNPs ({} merged, {} ambiguous)",
            rows.len().separate_with_commas(),
            merge_tally.merged,
            locus_tally.many
        );
        self.bump_filter(focus, "snp");
        Ok(())
    }

    /// Reduce the RS-number filter to SNPs matching the input.
    pub fn intersect_snps(
        &mut self,
        focus: SchemaDb,
        snps: &[(i64, Option<String>)],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        if self.filter_count(focus, "snp") == 0 {
            return self.union_snps(focus, snps, error_callback);
        }
        tracing::info!("reducing {} SNP filter", focus);
        self.db.prepare_table_for_query(focus, "snp")?;
        let mut tally = MergeTally::default();
        // ambiguity filtering is unnecessary, this only reduces loaded rows
        let rows = self.db.current_rses(snps, Some(&mut tally))?;
        let tx = self.db.connection().unchecked_transaction()?;
        let before = tx.execute(&format!("UPDATE `{}`.`snp` SET flag = 0", focus), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE `{}`.`snp` SET flag = 1 WHERE rs = ?",
                focus
            ))?;
            for (_old, _extra, new) in &rows {
                stmt.execute([new])?;
            }
        }
        let dropped = tx.execute(&format!("DELETE FROM `{}`.`snp` WHERE flag = 0", focus), [])?;
        tx.commit()?;
        tracing::info!(
            "kept {} SNPs ({} dropped, {} merged)",
            before - dropped,
            dropped,
            tally.merged
        );
        self.bump_filter(focus, "snp");
        Ok(())
    }

    /// Add positions to the position filter.
    pub fn union_loci(
        &mut self,
        focus: SchemaDb,
        loci: &[LocusInput],
        mut error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} position filter", focus);
        self.db.prepare_table_for_update(focus, "locus")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let mut added = 0usize;
        let mut invalid = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`locus` (label, chr, pos, extra) VALUES (?1, ?2, ?3, ?4)",
                focus
            ))?;
            for (index, locus) in loci.iter().enumerate() {
                match (locus.chrom, locus.pos) {
                    (Some(chrom), Some(pos)) => {
                        stmt.execute(rusqlite::params![locus.label, chrom, pos, locus.extra])?;
                        added += 1;
                    }
                    _ => {
                        invalid += 1;
                        if let Some(callback) = error_callback.as_deref_mut() {
                            callback(
                                &locus.label,
                                &InvalidInput::Data(index + 1).to_string(),
                            );
                        }
                    }
                }
            }
        }
        tx.commit()?;
        if invalid > 0 {
            tracing::warn!("ignored {} invalid positions", invalid);
        }
        tracing::info!("added {} positions", added.separate_with_commas());
        self.bump_filter(focus, "locus");
        Ok(())
    }

    /// Reduce the position filter to positions matching the input.
    pub fn intersect_loci(
        &mut self,
        focus: SchemaDb,
        loci: &[LocusInput],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        if self.filter_count(focus, "locus") == 0 {
            return self.union_loci(focus, loci, error_callback);
        }
        tracing::info!("reducing {} position filter", focus);
        self.db.prepare_table_for_query(focus, "locus")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let before = tx.execute(&format!("UPDATE `{}`.`locus` SET flag = 0", focus), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE `{}`.`locus` SET flag = 1 WHERE chr = ? AND pos = ?",
                focus
            ))?;
            for locus in loci {
                if let (Some(chrom), Some(pos)) = (locus.chrom, locus.pos) {
                    stmt.execute(rusqlite::params![chrom, pos])?;
                }
            }
        }
        let dropped = tx.execute(
            &format!("DELETE FROM `{}`.`locus` WHERE flag = 0", focus),
            [],
        )?;
        tx.commit()?;
        tracing::info!("kept {} positions ({} dropped)", before - dropped, dropped);
        self.bump_filter(focus, "locus");
        Ok(())
    }

    /// Add regions to the region filter; swapped bounds are corrected.
    pub fn union_regions(
        &mut self,
        focus: SchemaDb,
        regions: &[RegionInput],
        mut error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} region filter", focus);
        self.db.prepare_table_for_update(focus, "region")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let mut added = 0usize;
        let mut invalid = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`region` (label, chr, posMin, posMax, extra) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                focus
            ))?;
            for (index, region) in regions.iter().enumerate() {
                match (region.chrom, region.pos_min, region.pos_max) {
                    (Some(chrom), Some(pos_min), Some(pos_max)) => {
                        let (pos_min, pos_max) = if pos_min > pos_max {
                            (pos_max, pos_min)
                        } else {
                            (pos_min, pos_max)
                        };
                        stmt.execute(rusqlite::params![
                            region.label,
                            chrom,
                            pos_min,
                            pos_max,
                            region.extra
                        ])?;
                        added += 1;
                    }
                    _ => {
                        invalid += 1;
                        if let Some(callback) = error_callback.as_deref_mut() {
                            callback(
                                &region.label,
                                &InvalidInput::Data(index + 1).to_string(),
                            );
                        }
                    }
                }
            }
        }
        tx.commit()?;
        if invalid > 0 {
            tracing::warn!("ignored {} invalid regions", invalid);
        }
        tracing::info!("added {} regions", added.separate_with_commas());
        self.bump_filter(focus, "region");
        Ok(())
    }

    /// Reduce the region filter to regions matching the input.
    pub fn intersect_regions(
        &mut self,
        focus: SchemaDb,
        regions: &[RegionInput],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        if self.filter_count(focus, "region") == 0 {
            return self.union_regions(focus, regions, error_callback);
        }
        tracing::info!("reducing {} region filter", focus);
        self.db.prepare_table_for_query(focus, "region")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let before = tx.execute(&format!("UPDATE `{}`.`region` SET flag = 0", focus), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE `{}`.`region` SET flag = 1 WHERE chr = ? AND posMin = ? AND posMax = ?",
                focus
            ))?;
            for region in regions {
                if let (Some(chrom), Some(pos_min), Some(pos_max)) =
                    (region.chrom, region.pos_min, region.pos_max)
                {
                    let (pos_min, pos_max) = if pos_min > pos_max {
                        (pos_max, pos_min)
                    } else {
                        (pos_min, pos_max)
                    };
                    stmt.execute(rusqlite::params![chrom, pos_min, pos_max])?;
                }
            }
        }
        let dropped = tx.execute(
            &format!("DELETE FROM `{}`.`region` WHERE flag = 0", focus),
            [],
        )?;
        tx.commit()?;
        tracing::info!("kept {} regions ({} dropped)", before - dropped, dropped);
        self.bump_filter(focus, "region");
        Ok(())
    }

    /// Rebuild the zone coverage of a region filter table.
    ///
    /// Regions with swapped bounds are corrected first; each region then
    /// appears in every zone its interval intersects.
    pub fn update_region_zones(&mut self, focus: SchemaDb) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("calculating {} region zone coverage", focus);
        let zone_size = self.db.zone_size()?;
        self.db.prepare_table_for_query(focus, "region")?;
        self.db.prepare_table_for_update(focus, "region_zone")?;
        let tx = self.db.connection().unchecked_transaction()?;
        tx.execute(
            &format!(
                "UPDATE `{}`.`region` SET posMin = posMax, posMax = posMin WHERE posMin > posMax",
                focus
            ),
            [],
        )?;
        tx.execute(&format!("DELETE FROM `{}`.`region_zone`", focus), [])?;
        {
            let mut select = tx.prepare(&format!(
                "SELECT rowid, chr, posMin, posMax FROM `{}`.`region`",
                focus
            ))?;
            let mut insert = tx.prepare(&format!(
                "INSERT OR IGNORE INTO `{}`.`region_zone` (region_rowid, chr, zone) \
                 VALUES (?1, ?2, ?3)",
                focus
            ))?;
            let mut rows = select.query([])?;
            while let Some(row) = rows.next()? {
                let rowid: i64 = row.get(0)?;
                let chrom: u8 = row.get(1)?;
                let pos_min: i64 = row.get(2)?;
                let pos_max: i64 = row.get(3)?;
                for zone in (pos_min / zone_size)..=(pos_max / zone_size) {
                    insert.execute(rusqlite::params![rowid, chrom, zone])?;
                }
            }
        }
        tx.commit()?;
        self.db.prepare_table_for_query(focus, "region_zone")?;
        let count = self.filter_count(focus, "region");
        self.set_filter(focus, "region_zone", count);
        Ok(())
    }

    /// Add genes to the gene filter via identifier lookup.
    pub fn union_genes(
        &mut self,
        focus: SchemaDb,
        names: &[Identifier],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} gene filter", focus);
        let type_id = self
            .db
            .type_id("gene")?
            .ok_or_else(|| anyhow::anyhow!("knowledge database contains no gene data"))?;
        let max_match = if self.options.allow_ambiguous_genes {
            None
        } else {
            Some(1)
        };
        let mut tally = MatchTally::default();
        let resolved = self.db.biopolymer_ids_by_identifiers(
            Some(type_id),
            names,
            1,
            max_match,
            Some(&mut tally),
            error_callback,
        )?;
        self.db.prepare_table_for_update(focus, "gene")?;
        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`gene` (label, extra, biopolymer_id) VALUES (?1, ?2, ?3)",
                focus
            ))?;
            for row in &resolved {
                if let Some(entity_id) = row.entity_id {
                    stmt.execute(rusqlite::params![
                        row.identifier.name,
                        row.identifier.extra,
                        entity_id
                    ])?;
                }
            }
        }
        tx.commit()?;
        if tally.zero > 0 {
            tracing::warn!("ignored {} unrecognized gene identifier(s)", tally.zero);
        }
        if tally.many > 0 {
            tracing::warn!("{} ambiguous gene identifier(s)", tally.many);
        }
        tracing::info!("added {} genes", resolved.len().separate_with_commas());
        self.bump_filter(focus, "gene");
        Ok(())
    }

    /// Reduce the gene filter to genes matching the input.
    pub fn intersect_genes(
        &mut self,
        focus: SchemaDb,
        names: &[Identifier],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        if self.filter_count(focus, "gene") == 0 {
            return self.union_genes(focus, names, error_callback);
        }
        tracing::info!("reducing {} gene filter", focus);
        let type_id = self
            .db
            .type_id("gene")?
            .ok_or_else(|| anyhow::anyhow!("knowledge database contains no gene data"))?;
        let max_match = if self.options.allow_ambiguous_genes {
            None
        } else {
            Some(1)
        };
        let mut tally = MatchTally::default();
        let resolved = self.db.biopolymer_ids_by_identifiers(
            Some(type_id),
            names,
            1,
            max_match,
            Some(&mut tally),
            error_callback,
        )?;
        self.db.prepare_table_for_query(focus, "gene")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let before = tx.execute(&format!("UPDATE `{}`.`gene` SET flag = 0", focus), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE `{}`.`gene` SET flag = 1 WHERE biopolymer_id = ?",
                focus
            ))?;
            for row in &resolved {
                if let Some(entity_id) = row.entity_id {
                    stmt.execute([entity_id])?;
                }
            }
        }
        let dropped = tx.execute(&format!("DELETE FROM `{}`.`gene` WHERE flag = 0", focus), [])?;
        tx.commit()?;
        tracing::info!("kept {} genes ({} dropped)", before - dropped, dropped);
        self.bump_filter(focus, "gene");
        Ok(())
    }

    /// Add genes to the gene filter by free-text search.
    pub fn union_gene_search(
        &mut self,
        focus: SchemaDb,
        texts: &[(String, Option<String>)],
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} gene filter by text search", focus);
        let type_id = self.db.type_id("gene")?;
        let hits = self.db.biopolymer_ids_by_search(type_id, texts)?;
        self.db.prepare_table_for_update(focus, "gene")?;
        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`gene` (extra, label, biopolymer_id) VALUES (?1, ?2, ?3)",
                focus
            ))?;
            for (extra, label, id) in &hits {
                stmt.execute(rusqlite::params![extra, label, id])?;
            }
        }
        tx.commit()?;
        tracing::info!("added {} genes", hits.len().separate_with_commas());
        self.bump_filter(focus, "gene");
        Ok(())
    }

    /// Add groups to the group filter via identifier lookup.
    pub fn union_groups(
        &mut self,
        focus: SchemaDb,
        names: &[Identifier],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} group filter", focus);
        let max_match = if self.options.allow_ambiguous_groups {
            None
        } else {
            Some(1)
        };
        let mut tally = MatchTally::default();
        let resolved = self.db.group_ids_by_identifiers(
            None,
            names,
            1,
            max_match,
            Some(&mut tally),
            error_callback,
        )?;
        self.db.prepare_table_for_update(focus, "group")?;
        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`group` (label, extra, group_id) VALUES (?1, ?2, ?3)",
                focus
            ))?;
            for row in &resolved {
                if let Some(entity_id) = row.entity_id {
                    stmt.execute(rusqlite::params![
                        row.identifier.name,
                        row.identifier.extra,
                        entity_id
                    ])?;
                }
            }
        }
        tx.commit()?;
        if tally.zero > 0 {
            tracing::warn!("ignored {} unrecognized group identifier(s)", tally.zero);
        }
        tracing::info!("added {} groups", resolved.len().separate_with_commas());
        self.bump_filter(focus, "group");
        Ok(())
    }

    /// Reduce the group filter to groups matching the input.
    pub fn intersect_groups(
        &mut self,
        focus: SchemaDb,
        names: &[Identifier],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        if self.filter_count(focus, "group") == 0 {
            return self.union_groups(focus, names, error_callback);
        }
        tracing::info!("reducing {} group filter", focus);
        let max_match = if self.options.allow_ambiguous_groups {
            None
        } else {
            Some(1)
        };
        let resolved =
            self.db
                .group_ids_by_identifiers(None, names, 1, max_match, None, error_callback)?;
        self.db.prepare_table_for_query(focus, "group")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let before = tx.execute(&format!("UPDATE `{}`.`group` SET flag = 0", focus), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE `{}`.`group` SET flag = 1 WHERE group_id = ?",
                focus
            ))?;
            for row in &resolved {
                if let Some(entity_id) = row.entity_id {
                    stmt.execute([entity_id])?;
                }
            }
        }
        let dropped = tx.execute(
            &format!("DELETE FROM `{}`.`group` WHERE flag = 0", focus),
            [],
        )?;
        tx.commit()?;
        tracing::info!("kept {} groups ({} dropped)", before - dropped, dropped);
        self.bump_filter(focus, "group");
        Ok(())
    }

    /// Add groups to the group filter by free-text search.
    pub fn union_group_search(
        &mut self,
        focus: SchemaDb,
        texts: &[(String, Option<String>)],
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} group filter by text search", focus);
        let hits = self.db.group_ids_by_search(None, texts)?;
        self.db.prepare_table_for_update(focus, "group")?;
        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO `{}`.`group` (extra, label, group_id) VALUES (?1, ?2, ?3)",
                focus
            ))?;
            for (extra, label, id) in &hits {
                stmt.execute(rusqlite::params![extra, label, id])?;
            }
        }
        tx.commit()?;
        tracing::info!("added {} groups", hits.len().separate_with_commas());
        self.bump_filter(focus, "group");
        Ok(())
    }

    /// Add sources to the source filter; names resolve against the
    /// knowledge sources first, then user-defined sources.
    pub fn union_sources(
        &mut self,
        focus: SchemaDb,
        names: &[String],
        mut error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        tracing::info!("adding to {} source filter", focus);
        self.db.prepare_table_for_update(focus, "source")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let mut added = 0usize;
        let mut invalid = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO `{}`.`source` (label, source_id) VALUES (?1, ?2)",
                focus
            ))?;
            for (index, name) in names.iter().enumerate() {
                let source_id = match self.db.source_ids(Some(&[name.as_str()]))?.swap_remove(name.as_str()).flatten()
                {
                    Some(id) => Some(id),
                    None => self.user_source_id(name)?,
                };
                match source_id {
                    Some(source_id) => {
                        stmt.execute(rusqlite::params![name, source_id])?;
                        added += 1;
                    }
                    None => {
                        invalid += 1;
                        if let Some(callback) = error_callback.as_deref_mut() {
                            callback(name, &InvalidInput::Source(index + 1).to_string());
                        }
                    }
                }
            }
        }
        tx.commit()?;
        if invalid > 0 {
            tracing::warn!("ignored {} unrecognized source identifier(s)", invalid);
        }
        tracing::info!("added {} sources", added);
        self.bump_filter(focus, "source");
        Ok(())
    }

    /// Reduce the source filter to sources matching the input.
    pub fn intersect_sources(
        &mut self,
        focus: SchemaDb,
        names: &[String],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        Self::assert_focus(focus);
        if self.filter_count(focus, "source") == 0 {
            return self.union_sources(focus, names, error_callback);
        }
        tracing::info!("reducing {} source filter", focus);
        self.db.prepare_table_for_query(focus, "source")?;
        let tx = self.db.connection().unchecked_transaction()?;
        let before = tx.execute(&format!("UPDATE `{}`.`source` SET flag = 0", focus), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE `{}`.`source` SET flag = 1 WHERE source_id = ?",
                focus
            ))?;
            for name in names {
                let source_id = match self.db.source_ids(Some(&[name.as_str()]))?.swap_remove(name.as_str()).flatten()
                {
                    Some(id) => Some(id),
                    None => self.user_source_id(name)?,
                };
                if let Some(source_id) = source_id {
                    stmt.execute([source_id])?;
                }
            }
        }
        let dropped = tx.execute(
            &format!("DELETE FROM `{}`.`source` WHERE flag = 0", focus),
            [],
        )?;
        tx.commit()?;
        tracing::info!("kept {} sources ({} dropped)", before - dropped, dropped);
        self.bump_filter(focus, "source");
        Ok(())
    }

    /// Register a user-defined knowledge source; user sources get negative
    /// ids so they can never collide with knowledge sources.
    pub fn add_user_source(&mut self, label: &str, description: &str) -> Result<i64, anyhow::Error> {
        tracing::info!("adding user-defined source '{}'", label);
        self.bump_filter(SchemaDb::User, "source");
        let source_id = -i64::from(self.filter_count(SchemaDb::User, "source"));
        self.db.connection().execute(
            "INSERT INTO `user`.`source` (source_id, source, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![source_id, label, description],
        )?;
        Ok(source_id)
    }

    /// Register a user-defined group under a user source.
    pub fn add_user_group(
        &mut self,
        user_source_id: i64,
        label: &str,
        description: &str,
    ) -> Result<i64, anyhow::Error> {
        tracing::info!("adding user-defined group '{}'", label);
        self.bump_filter(SchemaDb::User, "group");
        let group_id = -i64::from(self.filter_count(SchemaDb::User, "group"));
        self.db.connection().execute(
            "INSERT INTO `user`.`group` (group_id, label, description, source_id) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![group_id, label, description, user_source_id],
        )?;
        Ok(group_id)
    }

    /// Attach member genes to a user-defined group; ambiguous names add
    /// all of their matches.
    pub fn add_user_group_members(
        &mut self,
        user_group_id: i64,
        members: &[Identifier],
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<(), anyhow::Error> {
        tracing::info!("adding genes to user-defined group");
        let type_id = self
            .db
            .type_id("gene")?
            .ok_or_else(|| anyhow::anyhow!("knowledge database contains no gene data"))?;
        let mut tally = MatchTally::default();
        let resolved = self.db.biopolymer_ids_by_identifiers(
            Some(type_id),
            members,
            1,
            None,
            Some(&mut tally),
            error_callback,
        )?;
        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO `user`.`group_biopolymer` (group_id, biopolymer_id) \
                 VALUES (?1, ?2)",
            )?;
            for row in &resolved {
                if let Some(entity_id) = row.entity_id {
                    stmt.execute(rusqlite::params![user_group_id, entity_id])?;
                }
            }
        }
        tx.commit()?;
        if tally.zero > 0 {
            tracing::warn!("ignored {} unrecognized gene identifier(s)", tally.zero);
        }
        self.bump_filter(SchemaDb::User, "group_biopolymer");
        Ok(())
    }

    /// Look up a user-defined source id by name.
    pub fn user_source_id(&self, source: &str) -> Result<Option<i64>, anyhow::Error> {
        use rusqlite::OptionalExtension;
        Ok(self
            .db
            .connection()
            .query_row(
                "SELECT source_id FROM `user`.`source` WHERE LOWER(source) = LOWER(?)",
                [source],
                |row| row.get::<_, i64>(0),
            )
            .optional()?)
    }

    /// Turn user knowledge into a main gene (or group) filter: every gene
    /// mentioned by a user group, or every knowledge group sharing a gene
    /// with one.
    pub fn apply_user_knowledge_filter(&mut self, group_level: bool) -> Result<(), anyhow::Error> {
        let conn = self.db.connection();
        if group_level {
            tracing::info!("applying user-defined knowledge to main group filter");
            assert_eq!(0, self.filter_count(SchemaDb::Main, "group"));
            conn.execute_batch(
                "INSERT INTO `main`.`group` (label, group_id, extra) \
                 SELECT DISTINCT u_g.label, u_g.group_id, u_g.extra FROM `user`.`group` AS u_g \
                 UNION \
                 SELECT DISTINCT d_g.label, d_g.group_id, NULL AS extra \
                 FROM `user`.`group_biopolymer` AS u_gb \
                 JOIN `db`.`group_biopolymer` AS d_gb \
                   ON d_gb.biopolymer_id = u_gb.biopolymer_id \
                 JOIN `db`.`group` AS d_g ON d_g.group_id = d_gb.group_id",
            )?;
            self.bump_filter(SchemaDb::Main, "group");
        } else {
            tracing::info!("applying user-defined knowledge to main gene filter");
            assert_eq!(0, self.filter_count(SchemaDb::Main, "gene"));
            conn.execute_batch(
                "INSERT INTO `main`.`gene` (label, biopolymer_id, extra) \
                 SELECT DISTINCT d_b.label, d_b.biopolymer_id, NULL AS extra \
                 FROM `user`.`group_biopolymer` AS u_gb \
                 JOIN `db`.`biopolymer` AS d_b ON d_b.biopolymer_id = u_gb.biopolymer_id",
            )?;
            self.bump_filter(SchemaDb::Main, "gene");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::db::test_support::{knowledge_db, seed_minimal_meta};
    use crate::query::schema::QueryOptions;

    use super::Session;

    /// A session over a knowledge fixture with genes, groups, SNPs and
    /// regions good enough to exercise filtering and planning.
    pub fn fixture_session() -> (Session, tempfile::TempDir) {
        let (db, tmp_dir) = knowledge_db(|conn| {
            seed_minimal_meta(conn);
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`biopolymer` (biopolymer_id, type_id, label, description, source_id)
                  VALUES (10, 1, 'ALPHA', 'alpha gene', 1),
                         (11, 1, 'BETA', 'beta gene', 1),
                         (12, 1, 'GAMMA', 'gamma gene', 1);
                INSERT INTO `db`.`biopolymer_name` (biopolymer_id, namespace_id, name, source_id)
                  VALUES (10, 1, 'ALPHA', 1), (11, 1, 'BETA', 1), (12, 1, 'GAMMA', 1);
                INSERT INTO `db`.`biopolymer_region`
                  (biopolymer_id, ldprofile_id, chr, posMin, posMax, source_id)
                  VALUES (10, 1, 1, 1000, 4000, 1),
                         (11, 1, 1, 150000, 160000, 1),
                         (12, 1, 2, 500, 900, 1);
                INSERT INTO `db`.`biopolymer_zone` (biopolymer_id, chr, zone)
                  VALUES (10, 1, 0), (11, 1, 1), (12, 2, 0);
                INSERT INTO `db`.`snp_locus` (rs, chr, pos, validated, source_id)
                  VALUES (1001, 1, 2000, 1, 1),
                         (1002, 1, 155000, 1, 1),
                         (1003, 2, 700, 1, 1),
                         (1004, 3, 42, 1, 1);
                INSERT INTO `db`.`group` (group_id, type_id, subtype_id, label, description, source_id)
                  VALUES (500, 2, 1, 'PATH_A', 'alpha/beta pathway', 1),
                         (501, 2, 1, 'PATH_B', 'gamma pathway', 1);
                INSERT INTO `db`.`group_name` (group_id, namespace_id, name, source_id)
                  VALUES (500, 3, 'PATH_A', 1), (501, 3, 'PATH_B', 1);
                INSERT INTO `db`.`group_biopolymer`
                  (group_id, biopolymer_id, specificity, implication, quality, source_id)
                  VALUES (500, 10, 100, 100, 100, 1),
                         (500, 11, 100, 100, 100, 1),
                         (501, 12, 100, 100, 100, 1),
                         (501, 10, 100, 100, 100, 1);
                "#,
            )
            .unwrap();
        });
        (Session::new(db, QueryOptions::default()), tmp_dir)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::test_support::fixture_session;
    use super::{LocusInput, RegionInput};
    use crate::db::schema::SchemaDb;

    fn count(session: &super::Session, db: SchemaDb, table: &str) -> i64 {
        session
            .db()
            .connection()
            .query_row(&format!("SELECT COUNT() FROM `{}`.`{}`", db, table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn union_then_intersect_snps() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_snps(
                SchemaDb::Main,
                &[
                    (1001, Some("a".to_string())),
                    (1002, Some("b".to_string())),
                    (1003, Some("c".to_string())),
                ],
                None,
            )
            .unwrap();
        assert_eq!(3, count(&session, SchemaDb::Main, "snp"));
        assert_eq!(1, session.filter_count(SchemaDb::Main, "snp"));

        session
            .intersect_snps(SchemaDb::Main, &[(1002, None), (4040, None)], None)
            .unwrap();
        assert_eq!(1, count(&session, SchemaDb::Main, "snp"));
        assert_eq!(2, session.filter_count(SchemaDb::Main, "snp"));
        let rs: i64 = session
            .db()
            .connection()
            .query_row("SELECT rs FROM `main`.`snp`", [], |row| row.get(0))
            .unwrap();
        assert_eq!(1002, rs);
    }

    #[test]
    fn intersect_on_empty_filter_falls_back_to_union() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .intersect_snps(SchemaDb::Main, &[(1001, None)], None)
            .unwrap();
        assert_eq!(1, count(&session, SchemaDb::Main, "snp"));
        assert_eq!(1, session.filter_count(SchemaDb::Main, "snp"));
    }

    #[test]
    fn invalid_loci_hit_the_callback() {
        let (mut session, _tmp_dir) = fixture_session();
        let mut dropped = Vec::new();
        let mut callback = |line: &str, err: &str| dropped.push((line.to_string(), err.to_string()));
        session
            .union_loci(
                SchemaDb::Main,
                &[
                    LocusInput {
                        label: "chr1:2000".to_string(),
                        chrom: Some(1),
                        pos: Some(2000),
                        extra: None,
                    },
                    LocusInput {
                        label: "bad".to_string(),
                        chrom: None,
                        pos: Some(5),
                        extra: None,
                    },
                ],
                Some(&mut callback),
            )
            .unwrap();
        assert_eq!(1, count(&session, SchemaDb::Main, "locus"));
        assert_eq!(1, dropped.len());
        assert!(dropped[0].1.contains("index 2"));
    }

    #[test]
    fn region_zones_cover_interval() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_regions(
                SchemaDb::Main,
                &[RegionInput {
                    label: "r1".to_string(),
                    chrom: Some(1),
                    pos_min: Some(99950),
                    pos_max: Some(100050),
                    extra: None,
                }],
                None,
            )
            .unwrap();
        session.update_region_zones(SchemaDb::Main).unwrap();
        let mut zones = Vec::new();
        let conn = session.db().connection();
        let mut stmt = conn
            .prepare("SELECT chr, zone FROM `main`.`region_zone` ORDER BY zone")
            .unwrap();
        let mut rows = stmt.query([]).unwrap();
        while let Some(row) = rows.next().unwrap() {
            zones.push((row.get::<_, u8>(0).unwrap(), row.get::<_, i64>(1).unwrap()));
        }
        assert_eq!(vec![(1, 0), (1, 1)], zones);
        assert_eq!(
            session.filter_count(SchemaDb::Main, "region"),
            session.filter_count(SchemaDb::Main, "region_zone")
        );
    }

    #[test]
    fn swapped_region_bounds_are_normalized() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_regions(
                SchemaDb::Main,
                &[RegionInput {
                    label: "r1".to_string(),
                    chrom: Some(1),
                    pos_min: Some(500),
                    pos_max: Some(100),
                    extra: None,
                }],
                None,
            )
            .unwrap();
        let (pos_min, pos_max): (i64, i64) = session
            .db()
            .connection()
            .query_row("SELECT posMin, posMax FROM `main`.`region`", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((100, 500), (pos_min, pos_max));
    }

    #[test]
    fn gene_filter_via_identifiers() {
        let (mut session, _tmp_dir) = fixture_session();
        session
            .union_genes(
                SchemaDb::Main,
                &[
                    crate::db::lookup::Identifier::new("symbol", "ALPHA", None),
                    crate::db::lookup::Identifier::new("-", "BETA", None),
                ],
                None,
            )
            .unwrap();
        assert_eq!(2, count(&session, SchemaDb::Main, "gene"));
        session
            .intersect_genes(
                SchemaDb::Main,
                &[crate::db::lookup::Identifier::new("symbol", "ALPHA", None)],
                None,
            )
            .unwrap();
        assert_eq!(1, count(&session, SchemaDb::Main, "gene"));
    }

    #[test]
    fn source_filter_knows_user_sources() {
        let (mut session, _tmp_dir) = fixture_session();
        let usid = session.add_user_source("mylab", "in-house curation").unwrap();
        assert_eq!(-1, usid);
        session
            .union_sources(
                SchemaDb::Main,
                &["test".to_string(), "mylab".to_string(), "nope".to_string()],
                None,
            )
            .unwrap();
        assert_eq!(2, count(&session, SchemaDb::Main, "source"));
    }

    #[test]
    fn user_knowledge_gene_filter() {
        let (mut session, _tmp_dir) = fixture_session();
        let usid = session.add_user_source("mylab", "curation").unwrap();
        let ugid = session.add_user_group(usid, "my-genes", "set one").unwrap();
        assert_eq!(-1, ugid);
        session
            .add_user_group_members(
                ugid,
                &[
                    crate::db::lookup::Identifier::new("symbol", "ALPHA", None),
                    crate::db::lookup::Identifier::new("symbol", "GAMMA", None),
                ],
                None,
            )
            .unwrap();
        session.apply_user_knowledge_filter(false).unwrap();
        assert_eq!(2, count(&session, SchemaDb::Main, "gene"));
        assert_eq!(1, session.filter_count(SchemaDb::Main, "gene"));
    }
}
