//! Static catalog backing the query planner: table aliases, per-alias and
//! pairwise predicates, and the sources that can supply each output column.
//!
//! Every role a table can play in a query is a distinct alias (the
//! knowledge-side group membership table appears as `d_gb`, `d_gb_L` and
//! `d_gb_R`, for instance).  Predicate templates carry `{L}`/`{R}`
//! placeholders for the alias pair plus named placeholders for runtime
//! values; see [`PlanParams::fill`].
//!
//! The SQLite optimizer will not use an index on a column that appears
//! inside an expression, so every arithmetic predicate is stated twice,
//! once solved for each side, keeping one unmodified column per form.

use strum_macros::{Display, EnumIter, EnumString};

use crate::db::schema::SchemaDb;

/// A table alias usable in planned queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumString,
)]
pub enum Alias {
    #[strum(serialize = "m_s")]
    MainSnp,
    #[strum(serialize = "m_l")]
    MainLocus,
    #[strum(serialize = "m_r")]
    MainRegion,
    #[strum(serialize = "m_rz")]
    MainRegionZone,
    #[strum(serialize = "m_bg")]
    MainGene,
    #[strum(serialize = "m_g")]
    MainGroup,
    #[strum(serialize = "m_c")]
    MainSource,
    #[strum(serialize = "a_s")]
    AltSnp,
    #[strum(serialize = "a_l")]
    AltLocus,
    #[strum(serialize = "a_r")]
    AltRegion,
    #[strum(serialize = "a_rz")]
    AltRegionZone,
    #[strum(serialize = "a_bg")]
    AltGene,
    #[strum(serialize = "a_g")]
    AltGroup,
    #[strum(serialize = "a_c")]
    AltSource,
    #[strum(serialize = "c_mb_L")]
    CandMainBioLeft,
    #[strum(serialize = "c_mb_R")]
    CandMainBioRight,
    #[strum(serialize = "c_ab_R")]
    CandAltBioRight,
    #[strum(serialize = "c_g")]
    CandGroup,
    #[strum(serialize = "u_gb")]
    UserGroupBio,
    #[strum(serialize = "u_gb_L")]
    UserGroupBioLeft,
    #[strum(serialize = "u_gb_R")]
    UserGroupBioRight,
    #[strum(serialize = "u_g")]
    UserGroup,
    #[strum(serialize = "u_c")]
    UserSource,
    #[strum(serialize = "d_sl")]
    KnowSnpLocus,
    #[strum(serialize = "d_br")]
    KnowBioRegion,
    #[strum(serialize = "d_bz")]
    KnowBioZone,
    #[strum(serialize = "d_b")]
    KnowBio,
    #[strum(serialize = "d_gb")]
    KnowGroupBio,
    #[strum(serialize = "d_gb_L")]
    KnowGroupBioLeft,
    #[strum(serialize = "d_gb_R")]
    KnowGroupBioRight,
    #[strum(serialize = "d_g")]
    KnowGroup,
    #[strum(serialize = "d_c")]
    KnowSource,
    #[strum(serialize = "d_w")]
    KnowGwas,
}

impl Alias {
    /// The `(database, table)` this alias stands for.
    pub fn table(&self) -> (SchemaDb, &'static str) {
        use Alias::*;
        match self {
            MainSnp => (SchemaDb::Main, "snp"),
            MainLocus => (SchemaDb::Main, "locus"),
            MainRegion => (SchemaDb::Main, "region"),
            MainRegionZone => (SchemaDb::Main, "region_zone"),
            MainGene => (SchemaDb::Main, "gene"),
            MainGroup => (SchemaDb::Main, "group"),
            MainSource => (SchemaDb::Main, "source"),
            AltSnp => (SchemaDb::Alt, "snp"),
            AltLocus => (SchemaDb::Alt, "locus"),
            AltRegion => (SchemaDb::Alt, "region"),
            AltRegionZone => (SchemaDb::Alt, "region_zone"),
            AltGene => (SchemaDb::Alt, "gene"),
            AltGroup => (SchemaDb::Alt, "group"),
            AltSource => (SchemaDb::Alt, "source"),
            CandMainBioLeft => (SchemaDb::Cand, "main_biopolymer"),
            CandMainBioRight => (SchemaDb::Cand, "main_biopolymer"),
            CandAltBioRight => (SchemaDb::Cand, "alt_biopolymer"),
            CandGroup => (SchemaDb::Cand, "group"),
            UserGroupBio => (SchemaDb::User, "group_biopolymer"),
            UserGroupBioLeft => (SchemaDb::User, "group_biopolymer"),
            UserGroupBioRight => (SchemaDb::User, "group_biopolymer"),
            UserGroup => (SchemaDb::User, "group"),
            UserSource => (SchemaDb::User, "source"),
            KnowSnpLocus => (SchemaDb::Know, "snp_locus"),
            KnowBioRegion => (SchemaDb::Know, "biopolymer_region"),
            KnowBioZone => (SchemaDb::Know, "biopolymer_zone"),
            KnowBio => (SchemaDb::Know, "biopolymer"),
            KnowGroupBio => (SchemaDb::Know, "group_biopolymer"),
            KnowGroupBioLeft => (SchemaDb::Know, "group_biopolymer"),
            KnowGroupBioRight => (SchemaDb::Know, "group_biopolymer"),
            KnowGroup => (SchemaDb::Know, "group"),
            KnowSource => (SchemaDb::Know, "source"),
            KnowGwas => (SchemaDb::Know, "gwas"),
        }
    }

    /// The table name used when consulting filter masks; a zone table
    /// stands in for its region table.
    pub fn filter_table(&self) -> (SchemaDb, &'static str) {
        let (db, table) = self.table();
        match table {
            "region_zone" => (db, "region"),
            _ => (db, table),
        }
    }
}

/// Per-alias predicates, applied whenever any alias of the set is in the
/// query.
pub struct AliasRule {
    pub aliases: &'static [Alias],
    pub conds: &'static [&'static str],
}

/// Predicates attached to pairs of aliases.  When `left` and `right` name
/// the same set, the rule covers all distinct pairs within it.
pub struct PairRule {
    pub left: &'static [Alias],
    pub right: &'static [Alias],
    pub conds: &'static [&'static str],
}

use Alias::*;

/// Constraints on single aliases.
///
/// The `snp_locus.validated` constraint cannot live here: stating it as a
/// template would defeat the covering index, so the planner adds it
/// directly.
pub const ALIAS_RULES: &[AliasRule] = &[
    AliasRule {
        aliases: &[KnowBioRegion],
        conds: &["{L}.ldprofile_id = {ldprofileID}"],
    },
    AliasRule {
        aliases: &[KnowGroupBio, KnowGroupBioLeft, KnowGroupBioRight],
        conds: &[
            "{L}.biopolymer_id != 0",
            "({L}.{gbColumn1} {gbCondition} OR {L}.{gbColumn2} {gbCondition})",
        ],
    },
];

/// Join predicates; a pair of aliases may be joined directly iff some rule
/// covers it, which also defines the alias adjacency graph.
pub const JOIN_RULES: &[PairRule] = &[
    PairRule {
        left: &[MainSnp, AltSnp, KnowSnpLocus],
        right: &[MainSnp, AltSnp, KnowSnpLocus],
        conds: &["{L}.rs = {R}.rs"],
    },
    PairRule {
        left: &[MainSnp, AltSnp],
        right: &[KnowGwas],
        conds: &["{L}.rs = {R}.rs"],
    },
    PairRule {
        left: &[KnowSnpLocus],
        right: &[KnowGwas],
        conds: &["(({L}.rs = {R}.rs) OR ({L}.chr = {R}.chr AND {L}.pos = {R}.pos))"],
    },
    PairRule {
        left: &[MainLocus, AltLocus, KnowSnpLocus],
        right: &[MainLocus, AltLocus, KnowSnpLocus],
        conds: &["{L}.chr = {R}.chr", "{L}.pos = {R}.pos"],
    },
    PairRule {
        left: &[MainLocus, AltLocus],
        right: &[KnowGwas],
        conds: &["{L}.chr = {R}.chr", "{L}.pos = {R}.pos"],
    },
    PairRule {
        left: &[MainLocus, AltLocus, KnowSnpLocus],
        right: &[MainRegionZone, AltRegionZone, KnowBioZone],
        conds: &[
            "{L}.chr = {R}.chr",
            "{L}.pos >= (({R}.zone * {zoneSize}) - {rpMargin})",
            "{L}.pos < ((({R}.zone + 1) * {zoneSize}) + {rpMargin})",
            "(({L}.pos + {rpMargin}) / {zoneSize}) >= {R}.zone",
            "(({L}.pos - {rpMargin}) / {zoneSize}) <= {R}.zone",
        ],
    },
    // the zone/region coverage conditions are guaranteed by the rowid match
    // for session zone tables, which are rebuilt with the regions
    PairRule {
        left: &[MainRegionZone],
        right: &[MainRegion],
        conds: &["{L}.region_rowid = {R}.rowid"],
    },
    PairRule {
        left: &[AltRegionZone],
        right: &[AltRegion],
        conds: &["{L}.region_rowid = {R}.rowid"],
    },
    PairRule {
        left: &[KnowBioZone],
        right: &[KnowBioRegion],
        conds: &[
            "{L}.biopolymer_id = {R}.biopolymer_id",
            "{L}.chr = {R}.chr",
            // verify the zone/region coverage in case there are two regions
            // on the same chromosome
            "(({L}.zone + 1) * {zoneSize}) > {R}.posMin",
            "({L}.zone * {zoneSize}) <= {R}.posMax",
            "{L}.zone >= ({R}.posMin / {zoneSize})",
            "{L}.zone <= ({R}.posMax / {zoneSize})",
        ],
    },
    PairRule {
        left: &[MainRegionZone, AltRegionZone, KnowBioZone],
        right: &[MainRegionZone, AltRegionZone, KnowBioZone],
        conds: &[
            "{L}.chr = {R}.chr",
            "{L}.zone >= ({R}.zone + (MIN(0,{rmBases}) - {zoneSize}) / {zoneSize})",
            "{L}.zone <= ({R}.zone - (MIN(0,{rmBases}) - {zoneSize}) / {zoneSize})",
            "{R}.zone >= ({L}.zone + (MIN(0,{rmBases}) - {zoneSize}) / {zoneSize})",
            "{R}.zone <= ({L}.zone - (MIN(0,{rmBases}) - {zoneSize}) / {zoneSize})",
        ],
    },
    PairRule {
        left: &[MainGene, AltGene, KnowBioRegion, KnowBio],
        right: &[MainGene, AltGene, KnowBioRegion, KnowBio],
        conds: &["{L}.biopolymer_id = {R}.biopolymer_id"],
    },
    PairRule {
        left: &[MainGene, AltGene, KnowBio],
        right: &[UserGroupBio, KnowGroupBio],
        conds: &["{L}.biopolymer_id = {R}.biopolymer_id"],
    },
    PairRule {
        left: &[KnowGroupBioLeft, KnowGroupBioRight],
        right: &[KnowGroupBioLeft, KnowGroupBioRight],
        conds: &["{L}.biopolymer_id != {R}.biopolymer_id"],
    },
    PairRule {
        left: &[UserGroupBioLeft, UserGroupBioRight],
        right: &[UserGroupBioLeft, UserGroupBioRight],
        conds: &["{L}.biopolymer_id != {R}.biopolymer_id"],
    },
    PairRule {
        left: &[MainGroup, AltGroup, KnowGroupBio, KnowGroup],
        right: &[MainGroup, AltGroup, KnowGroupBio, KnowGroup],
        conds: &["{L}.group_id = {R}.group_id"],
    },
    PairRule {
        left: &[MainGroup, AltGroup, UserGroupBio, UserGroup],
        right: &[MainGroup, AltGroup, UserGroupBio, UserGroup],
        conds: &["{L}.group_id = {R}.group_id"],
    },
    PairRule {
        left: &[MainSource, AltSource, KnowGroup, KnowSource],
        right: &[MainSource, AltSource, KnowGroup, KnowSource],
        conds: &["{L}.source_id = {R}.source_id"],
    },
    PairRule {
        left: &[MainSource, AltSource, UserGroup, UserSource],
        right: &[MainSource, AltSource, UserGroup, UserSource],
        conds: &["{L}.source_id = {R}.source_id"],
    },
    PairRule {
        left: &[CandMainBioLeft],
        right: &[UserGroupBioLeft, KnowGroupBioLeft],
        conds: &["{L}.biopolymer_id = {R}.biopolymer_id"],
    },
    PairRule {
        left: &[CandMainBioRight, CandAltBioRight],
        right: &[UserGroupBioRight, KnowGroupBioRight],
        conds: &["{L}.biopolymer_id = {R}.biopolymer_id"],
    },
    PairRule {
        left: &[CandGroup, KnowGroup],
        right: &[KnowGroupBio, KnowGroupBioLeft, KnowGroupBioRight, KnowGroup],
        conds: &["{L}.group_id = {R}.group_id"],
    },
    PairRule {
        left: &[CandGroup, UserGroup],
        right: &[UserGroupBio, UserGroupBioLeft, UserGroupBioRight, UserGroup],
        conds: &["{L}.group_id = {R}.group_id"],
    },
];

/// Constraints on alias pairs that need not be directly joined; these
/// carry the point-in-region and region-overlap semantics.
pub const PAIR_RULES: &[PairRule] = &[
    PairRule {
        left: &[MainLocus, AltLocus, KnowSnpLocus],
        right: &[MainRegion, AltRegion, KnowBioRegion],
        conds: &[
            "{L}.chr = {R}.chr",
            "{L}.pos >= ({R}.posMin - {rpMargin})",
            "{L}.pos <= ({R}.posMax + {rpMargin})",
            "({L}.pos + {rpMargin}) >= {R}.posMin",
            "({L}.pos - {rpMargin}) <= {R}.posMax",
        ],
    },
    PairRule {
        left: &[MainRegion, AltRegion, KnowBioRegion],
        right: &[MainRegion, AltRegion, KnowBioRegion],
        conds: &[
            "{L}.chr = {R}.chr",
            "({L}.posMax - {L}.posMin + 1) >= {rmBases}",
            "({R}.posMax - {R}.posMin + 1) >= {rmBases}",
            "((({L}.posMin >= {R}.posMin) AND \
({L}.posMin <= {R}.posMax + 1 - MAX({rmBases}, COALESCE((MIN({L}.posMax - {L}.posMin, {R}.posMax - {R}.posMin) + 1) * {rmPercent} / 100.0, {rmBases})))) OR \
(({R}.posMin >= {L}.posMin) AND \
({R}.posMin <= {L}.posMax + 1 - MAX({rmBases}, COALESCE((MIN({L}.posMax - {L}.posMin, {R}.posMax - {R}.posMin) + 1) * {rmPercent} / 100.0, {rmBases})))))",
        ],
    },
];

/// Runtime values substituted into predicate and expression templates.
#[derive(Debug, Clone, Default)]
pub struct PlanParams {
    pub ldprofile_id: i64,
    pub zone_size: i64,
    pub rp_margin: i64,
    /// Rendered value or `NULL`.
    pub rm_bases: String,
    /// Rendered value or `NULL`.
    pub rm_percent: String,
    pub type_id_gene: Option<i64>,
    pub namespace_id_symbol: Option<i64>,
    pub gb_column1: &'static str,
    pub gb_column2: &'static str,
    pub gb_condition: &'static str,
    /// Output offset applied to point and start coordinates, e.g. `+ -1`.
    pub p_min_offset: String,
    /// Output offset applied to stop coordinates.
    pub p_max_offset: String,
}

impl PlanParams {
    /// Substitute `{L}`/`{R}` and the named parameters into a template.
    pub fn fill(&self, template: &str, left: Option<Alias>, right: Option<Alias>) -> String {
        let mut text = template.to_string();
        if let Some(left) = left {
            text = text.replace("{L}", &left.to_string());
        }
        if let Some(right) = right {
            text = text.replace("{R}", &right.to_string());
        }
        text = text
            .replace("{ldprofileID}", &self.ldprofile_id.to_string())
            .replace("{zoneSize}", &self.zone_size.to_string())
            .replace("{rpMargin}", &self.rp_margin.to_string())
            .replace("{rmBases}", &self.rm_bases)
            .replace("{rmPercent}", &self.rm_percent)
            .replace(
                "{typeID_gene}",
                &self
                    .type_id_gene
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "NULL".to_string()),
            )
            .replace(
                "{namespaceID_symbol}",
                &self
                    .namespace_id_symbol
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "NULL".to_string()),
            )
            .replace("{gbColumn1}", self.gb_column1)
            .replace("{gbColumn2}", self.gb_column2)
            .replace("{gbCondition}", self.gb_condition)
            .replace("{pMinOffset}", &self.p_min_offset)
            .replace("{pMaxOffset}", &self.p_max_offset);
        text.trim().to_string()
    }
}

/// A logical output column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Column {
    SnpId,
    SnpLabel,
    SnpExtra,
    SnpFlag,
    PositionId,
    PositionLabel,
    PositionChr,
    PositionPos,
    PositionExtra,
    PositionFlag,
    RegionId,
    RegionLabel,
    RegionChr,
    RegionZone,
    RegionStart,
    RegionStop,
    RegionExtra,
    RegionFlag,
    BiopolymerId,
    #[strum(serialize = "biopolymer_id_L")]
    BiopolymerIdLeft,
    #[strum(serialize = "biopolymer_id_R")]
    BiopolymerIdRight,
    BiopolymerLabel,
    BiopolymerDescription,
    BiopolymerIdentifiers,
    BiopolymerChr,
    BiopolymerZone,
    BiopolymerStart,
    BiopolymerStop,
    BiopolymerExtra,
    BiopolymerFlag,
    GeneId,
    GeneLabel,
    GeneDescription,
    GeneIdentifiers,
    GeneSymbols,
    GeneExtra,
    GeneFlag,
    UpstreamId,
    UpstreamLabel,
    UpstreamDistance,
    UpstreamStart,
    UpstreamStop,
    DownstreamId,
    DownstreamLabel,
    DownstreamDistance,
    DownstreamStart,
    DownstreamStop,
    GroupId,
    GroupLabel,
    GroupDescription,
    GroupIdentifiers,
    GroupExtra,
    GroupFlag,
    SourceId,
    SourceLabel,
    GwasRs,
    GwasChr,
    GwasPos,
    GwasTrait,
    GwasSnps,
    GwasOrbeta,
    #[strum(serialize = "gwas_allele95ci")]
    GwasAllele95Ci,
    #[strum(serialize = "gwas_riskAfreq")]
    GwasRiskAfreq,
    GwasPubmed,
    DiseaseLabel,
    DiseaseCategory,
}

/// One way to produce a column: the alias that supplies it, the column
/// whose values uniquify that alias's contribution, the SQL expression,
/// and any extra conditions the source requires.
#[derive(Debug, Clone)]
pub struct ColumnSource {
    pub alias: Alias,
    pub rowid: &'static str,
    pub expr: String,
    pub conds: Vec<&'static str>,
}

impl ColumnSource {
    fn new(alias: Alias, rowid: &'static str, expr: impl Into<String>) -> Self {
        Self {
            alias,
            rowid,
            expr: expr.into(),
            conds: Vec::new(),
        }
    }

    fn with_conds(mut self, conds: &[&'static str]) -> Self {
        self.conds = conds.to_vec();
        self
    }
}

/// Render internal chromosome numbers back to their textual names.
fn chr_expr(alias: Alias) -> String {
    format!(
        "(CASE {a}.chr WHEN 23 THEN 'X' WHEN 24 THEN 'Y' WHEN 25 THEN 'XY' \
         WHEN 26 THEN 'MT' ELSE {a}.chr END)",
        a = alias
    )
}

/// All `namespace:name` identifiers of a biopolymer or group.
fn identifiers_expr(name_table: &str, id_col: &str, alias: Alias) -> String {
    format!(
        "(SELECT GROUP_CONCAT(namespace||':'||name,'|') FROM `db`.`{names}` AS d_xn \
         JOIN `db`.`namespace` AS d_n USING (namespace_id) WHERE d_xn.{id} = {a}.{id})",
        names = name_table,
        id = id_col,
        a = alias
    )
}

/// Symbol-namespace names of a biopolymer.
fn symbols_expr(alias: Alias) -> String {
    format!(
        "(SELECT GROUP_CONCAT(name,'|') FROM `db`.`biopolymer_name` AS d_bn \
         WHERE d_bn.biopolymer_id = {a}.biopolymer_id \
         AND d_bn.namespace_id = {{namespaceID_symbol}})",
        a = alias
    )
}

/// The nearest gene region upstream or downstream of a point.
fn stream_expr(alias: Alias, select: &str, upstream: bool) -> String {
    if upstream {
        format!(
            "(SELECT {select} FROM `db`.`biopolymer` AS d_b \
             JOIN `db`.`biopolymer_region` AS d_br USING (biopolymer_id) \
             WHERE d_b.type_id = {{typeID_gene}} AND d_br.ldprofile_id = {{ldprofileID}} \
             AND d_br.chr = {a}.chr AND d_br.posMax < {a}.pos - {{rpMargin}} \
             ORDER BY d_br.posMax DESC LIMIT 1)",
            select = select,
            a = alias
        )
    } else {
        format!(
            "(SELECT {select} FROM `db`.`biopolymer` AS d_b \
             JOIN `db`.`biopolymer_region` AS d_br USING (biopolymer_id) \
             WHERE d_b.type_id = {{typeID_gene}} AND d_br.ldprofile_id = {{ldprofileID}} \
             AND d_br.chr = {a}.chr AND d_br.posMin > {a}.pos + {{rpMargin}} \
             ORDER BY d_br.posMin LIMIT 1)",
            select = select,
            a = alias
        )
    }
}

/// Distance from a point to the nearest gene region bound.
fn stream_distance_expr(alias: Alias, upstream: bool) -> String {
    if upstream {
        format!(
            "{a}.pos - (SELECT MAX(d_br.posMax) FROM `db`.`biopolymer` AS d_b \
             JOIN `db`.`biopolymer_region` AS d_br USING (biopolymer_id) \
             WHERE d_b.type_id = {{typeID_gene}} AND d_br.ldprofile_id = {{ldprofileID}} \
             AND d_br.chr = {a}.chr AND d_br.posMax < {a}.pos - {{rpMargin}})",
            a = alias
        )
    } else {
        format!(
            "-{a}.pos + (SELECT MIN(d_br.posMin) FROM `db`.`biopolymer` AS d_b \
             JOIN `db`.`biopolymer_region` AS d_br USING (biopolymer_id) \
             WHERE d_b.type_id = {{typeID_gene}} AND d_br.ldprofile_id = {{ldprofileID}} \
             AND d_br.chr = {a}.chr AND d_br.posMin > {a}.pos + {{rpMargin}})",
            a = alias
        )
    }
}

/// A group name in the `disease` namespace.
fn disease_label_expr(alias: Alias) -> String {
    format!(
        "(SELECT name FROM `db`.`group_name` AS d_gn \
         JOIN `db`.`namespace` AS d_n USING (namespace_id) \
         WHERE d_gn.group_id = {a}.group_id AND d_n.namespace = 'disease')",
        a = alias
    )
}

/// The subtype of a disease-typed group.
fn disease_category_expr(alias: Alias) -> String {
    format!(
        "(SELECT subtype FROM `db`.`subtype` AS d_s \
         JOIN `db`.`group` AS dg USING (subtype_id) \
         JOIN `db`.`type` AS d_t USING (type_id) \
         WHERE dg.group_id = {a}.group_id AND d_t.type = 'disease')",
        a = alias
    )
}

const GENE_TYPE_COND: &[&str] = &["d_b.type_id = {typeID_gene}"];

/// The sources able to supply each column, in order of preference.
pub fn column_sources(column: Column) -> Vec<ColumnSource> {
    use Alias::*;
    use Column::*;
    match column {
        SnpId => vec![
            ColumnSource::new(AltSnp, "rowid", "a_s.rs"),
            ColumnSource::new(MainSnp, "rowid", "m_s.rs"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "d_sl.rs"),
        ],
        SnpLabel => vec![
            ColumnSource::new(AltSnp, "rowid", "a_s.label"),
            ColumnSource::new(MainSnp, "rowid", "m_s.label"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "'rs'||d_sl.rs"),
        ],
        SnpExtra => vec![
            ColumnSource::new(AltSnp, "rowid", "a_s.extra"),
            ColumnSource::new(MainSnp, "rowid", "m_s.extra"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "NULL"),
        ],
        SnpFlag => vec![
            ColumnSource::new(AltSnp, "rowid", "a_s.flag"),
            ColumnSource::new(MainSnp, "rowid", "m_s.flag"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "NULL"),
        ],
        PositionId => vec![
            ColumnSource::new(AltLocus, "rowid", "a_l.rowid"),
            ColumnSource::new(MainLocus, "rowid", "m_l.rowid"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "d_sl._ROWID_"),
        ],
        PositionLabel => vec![
            ColumnSource::new(AltLocus, "rowid", "a_l.label"),
            ColumnSource::new(MainLocus, "rowid", "m_l.label"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "'rs'||d_sl.rs"),
        ],
        PositionChr => vec![
            ColumnSource::new(AltLocus, "rowid", chr_expr(AltLocus)),
            ColumnSource::new(MainLocus, "rowid", chr_expr(MainLocus)),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", chr_expr(KnowSnpLocus)),
        ],
        PositionPos => vec![
            ColumnSource::new(AltLocus, "rowid", "a_l.pos {pMinOffset}"),
            ColumnSource::new(MainLocus, "rowid", "m_l.pos {pMinOffset}"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "d_sl.pos {pMinOffset}"),
        ],
        PositionExtra => vec![
            ColumnSource::new(AltLocus, "rowid", "a_l.extra"),
            ColumnSource::new(MainLocus, "rowid", "m_l.extra"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "NULL"),
        ],
        PositionFlag => vec![
            ColumnSource::new(AltLocus, "rowid", "a_l.flag"),
            ColumnSource::new(MainLocus, "rowid", "m_l.flag"),
            ColumnSource::new(KnowSnpLocus, "_ROWID_", "NULL"),
        ],
        RegionId => vec![
            ColumnSource::new(AltRegion, "rowid", "a_r.rowid"),
            ColumnSource::new(MainRegion, "rowid", "m_r.rowid"),
            ColumnSource::new(KnowBioRegion, "_ROWID_", "d_br._ROWID_"),
        ],
        RegionLabel => vec![
            ColumnSource::new(AltRegion, "rowid", "a_r.label"),
            ColumnSource::new(MainRegion, "rowid", "m_r.label"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.label"),
        ],
        RegionChr => vec![
            ColumnSource::new(AltRegion, "rowid", chr_expr(AltRegion)),
            ColumnSource::new(MainRegion, "rowid", chr_expr(MainRegion)),
            ColumnSource::new(KnowBioRegion, "_ROWID_", chr_expr(KnowBioRegion)),
        ],
        RegionZone => vec![
            ColumnSource::new(AltRegionZone, "zone", "a_rz.zone"),
            ColumnSource::new(MainRegionZone, "zone", "m_rz.zone"),
            ColumnSource::new(KnowBioZone, "zone", "d_bz.zone"),
        ],
        RegionStart => vec![
            ColumnSource::new(AltRegion, "rowid", "a_r.posMin {pMinOffset}"),
            ColumnSource::new(MainRegion, "rowid", "m_r.posMin {pMinOffset}"),
            ColumnSource::new(KnowBioRegion, "_ROWID_", "d_br.posMin {pMinOffset}"),
        ],
        RegionStop => vec![
            ColumnSource::new(AltRegion, "rowid", "a_r.posMax {pMaxOffset}"),
            ColumnSource::new(MainRegion, "rowid", "m_r.posMax {pMaxOffset}"),
            ColumnSource::new(KnowBioRegion, "_ROWID_", "d_br.posMax {pMaxOffset}"),
        ],
        RegionExtra => vec![
            ColumnSource::new(AltRegion, "rowid", "a_r.extra"),
            ColumnSource::new(MainRegion, "rowid", "m_r.extra"),
            ColumnSource::new(KnowBioRegion, "_ROWID_", "NULL"),
        ],
        RegionFlag => vec![
            ColumnSource::new(AltRegion, "rowid", "a_r.flag"),
            ColumnSource::new(MainRegion, "rowid", "m_r.flag"),
            ColumnSource::new(KnowBioRegion, "_ROWID_", "NULL"),
        ],
        BiopolymerId => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.biopolymer_id"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.biopolymer_id"),
            ColumnSource::new(CandMainBioLeft, "biopolymer_id", "c_mb_L.biopolymer_id"),
            ColumnSource::new(CandMainBioRight, "biopolymer_id", "c_mb_R.biopolymer_id"),
            ColumnSource::new(CandAltBioRight, "biopolymer_id", "c_ab_R.biopolymer_id"),
            ColumnSource::new(UserGroupBio, "biopolymer_id", "u_gb.biopolymer_id"),
            ColumnSource::new(KnowBioRegion, "biopolymer_id", "d_br.biopolymer_id"),
            ColumnSource::new(KnowGroupBio, "biopolymer_id", "d_gb.biopolymer_id"),
            ColumnSource::new(KnowGroupBioLeft, "biopolymer_id", "d_gb_L.biopolymer_id"),
            ColumnSource::new(KnowGroupBioRight, "biopolymer_id", "d_gb_R.biopolymer_id"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.biopolymer_id"),
        ],
        BiopolymerIdLeft => vec![
            ColumnSource::new(CandMainBioLeft, "biopolymer_id", "c_mb_L.biopolymer_id"),
            ColumnSource::new(UserGroupBioLeft, "biopolymer_id", "u_gb_L.biopolymer_id"),
            ColumnSource::new(KnowGroupBioLeft, "biopolymer_id", "d_gb_L.biopolymer_id"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.biopolymer_id"),
        ],
        BiopolymerIdRight => vec![
            ColumnSource::new(CandMainBioRight, "biopolymer_id", "c_mb_R.biopolymer_id"),
            ColumnSource::new(CandAltBioRight, "biopolymer_id", "c_ab_R.biopolymer_id"),
            ColumnSource::new(UserGroupBioRight, "biopolymer_id", "u_gb_R.biopolymer_id"),
            ColumnSource::new(KnowGroupBioRight, "biopolymer_id", "d_gb_R.biopolymer_id"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.biopolymer_id"),
        ],
        BiopolymerLabel => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.label"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.label"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.label"),
        ],
        BiopolymerDescription => vec![ColumnSource::new(
            KnowBio,
            "biopolymer_id",
            "d_b.description",
        )],
        BiopolymerIdentifiers => vec![
            ColumnSource::new(
                AltGene,
                "biopolymer_id",
                identifiers_expr("biopolymer_name", "biopolymer_id", AltGene),
            ),
            ColumnSource::new(
                MainGene,
                "biopolymer_id",
                identifiers_expr("biopolymer_name", "biopolymer_id", MainGene),
            ),
            ColumnSource::new(
                KnowBio,
                "biopolymer_id",
                identifiers_expr("biopolymer_name", "biopolymer_id", KnowBio),
            ),
        ],
        BiopolymerChr => vec![ColumnSource::new(
            KnowBioRegion,
            "_ROWID_",
            chr_expr(KnowBioRegion),
        )],
        BiopolymerZone => vec![ColumnSource::new(KnowBioZone, "zone", "d_bz.zone")],
        BiopolymerStart => vec![ColumnSource::new(
            KnowBioRegion,
            "_ROWID_",
            "d_br.posMin {pMinOffset}",
        )],
        BiopolymerStop => vec![ColumnSource::new(
            KnowBioRegion,
            "_ROWID_",
            "d_br.posMax {pMaxOffset}",
        )],
        BiopolymerExtra => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.extra"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.extra"),
            ColumnSource::new(KnowBio, "biopolymer_id", "NULL"),
        ],
        BiopolymerFlag => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.flag"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.flag"),
            ColumnSource::new(KnowBio, "biopolymer_id", "NULL"),
        ],
        GeneId => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.biopolymer_id"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.biopolymer_id"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.biopolymer_id")
                .with_conds(GENE_TYPE_COND),
        ],
        GeneLabel => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.label"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.label"),
            ColumnSource::new(KnowBio, "biopolymer_id", "d_b.label").with_conds(GENE_TYPE_COND),
        ],
        GeneDescription => vec![ColumnSource::new(
            KnowBio,
            "biopolymer_id",
            "d_b.description",
        )
        .with_conds(GENE_TYPE_COND)],
        GeneIdentifiers => vec![
            ColumnSource::new(
                AltGene,
                "biopolymer_id",
                identifiers_expr("biopolymer_name", "biopolymer_id", AltGene),
            ),
            ColumnSource::new(
                MainGene,
                "biopolymer_id",
                identifiers_expr("biopolymer_name", "biopolymer_id", MainGene),
            ),
            ColumnSource::new(
                KnowBio,
                "biopolymer_id",
                identifiers_expr("biopolymer_name", "biopolymer_id", KnowBio),
            )
            .with_conds(GENE_TYPE_COND),
        ],
        GeneSymbols => vec![
            ColumnSource::new(AltGene, "biopolymer_id", symbols_expr(AltGene)),
            ColumnSource::new(MainGene, "biopolymer_id", symbols_expr(MainGene)),
            ColumnSource::new(KnowBio, "biopolymer_id", symbols_expr(KnowBio))
                .with_conds(GENE_TYPE_COND),
        ],
        GeneExtra => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.extra"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.extra"),
            ColumnSource::new(KnowBio, "biopolymer_id", "NULL").with_conds(GENE_TYPE_COND),
        ],
        GeneFlag => vec![
            ColumnSource::new(AltGene, "biopolymer_id", "a_bg.flag"),
            ColumnSource::new(MainGene, "biopolymer_id", "m_bg.flag"),
            ColumnSource::new(KnowBio, "biopolymer_id", "NULL").with_conds(GENE_TYPE_COND),
        ],
        UpstreamId => stream_sources("d_b.biopolymer_id", true),
        UpstreamLabel => stream_sources("d_b.label", true),
        UpstreamDistance => vec![
            ColumnSource::new(AltLocus, "rowid", stream_distance_expr(AltLocus, true)),
            ColumnSource::new(MainLocus, "rowid", stream_distance_expr(MainLocus, true)),
            ColumnSource::new(
                KnowSnpLocus,
                "_ROWID_",
                stream_distance_expr(KnowSnpLocus, true),
            ),
        ],
        UpstreamStart => stream_sources("d_br.posMin {pMinOffset}", true),
        UpstreamStop => stream_sources("d_br.posMax {pMaxOffset}", true),
        DownstreamId => stream_sources("d_b.biopolymer_id", false),
        DownstreamLabel => stream_sources("d_b.label", false),
        DownstreamDistance => vec![
            ColumnSource::new(AltLocus, "rowid", stream_distance_expr(AltLocus, false)),
            ColumnSource::new(MainLocus, "rowid", stream_distance_expr(MainLocus, false)),
            ColumnSource::new(
                KnowSnpLocus,
                "_ROWID_",
                stream_distance_expr(KnowSnpLocus, false),
            ),
        ],
        DownstreamStart => stream_sources("d_br.posMin {pMinOffset}", false),
        DownstreamStop => stream_sources("d_br.posMax {pMaxOffset}", false),
        GroupId => vec![
            ColumnSource::new(AltGroup, "group_id", "a_g.group_id"),
            ColumnSource::new(MainGroup, "group_id", "m_g.group_id"),
            ColumnSource::new(CandGroup, "group_id", "c_g.group_id"),
            ColumnSource::new(UserGroupBio, "group_id", "u_gb.group_id"),
            ColumnSource::new(UserGroupBioLeft, "group_id", "u_gb_L.group_id"),
            ColumnSource::new(UserGroupBioRight, "group_id", "u_gb_R.group_id"),
            ColumnSource::new(UserGroup, "group_id", "u_g.group_id"),
            ColumnSource::new(KnowGroupBio, "group_id", "d_gb.group_id"),
            ColumnSource::new(KnowGroupBioLeft, "group_id", "d_gb_L.group_id"),
            ColumnSource::new(KnowGroupBioRight, "group_id", "d_gb_R.group_id"),
            ColumnSource::new(KnowGroup, "group_id", "d_g.group_id"),
        ],
        GroupLabel => vec![
            ColumnSource::new(AltGroup, "group_id", "a_g.label"),
            ColumnSource::new(MainGroup, "group_id", "m_g.label"),
            ColumnSource::new(UserGroup, "group_id", "u_g.label"),
            ColumnSource::new(KnowGroup, "group_id", "d_g.label"),
        ],
        GroupDescription => vec![
            ColumnSource::new(UserGroup, "group_id", "u_g.description"),
            ColumnSource::new(KnowGroup, "group_id", "d_g.description"),
        ],
        GroupIdentifiers => vec![
            ColumnSource::new(
                AltGroup,
                "group_id",
                identifiers_expr("group_name", "group_id", AltGroup),
            ),
            ColumnSource::new(
                MainGroup,
                "group_id",
                identifiers_expr("group_name", "group_id", MainGroup),
            ),
            ColumnSource::new(UserGroup, "group_id", "u_g.label"),
            ColumnSource::new(
                KnowGroup,
                "group_id",
                identifiers_expr("group_name", "group_id", KnowGroup),
            ),
        ],
        GroupExtra => vec![
            ColumnSource::new(AltGroup, "group_id", "a_g.extra"),
            ColumnSource::new(MainGroup, "group_id", "m_g.extra"),
            ColumnSource::new(UserGroup, "group_id", "NULL"),
            ColumnSource::new(KnowGroup, "group_id", "NULL"),
        ],
        GroupFlag => vec![
            ColumnSource::new(AltGroup, "group_id", "a_g.flag"),
            ColumnSource::new(MainGroup, "group_id", "m_g.flag"),
            ColumnSource::new(UserGroup, "group_id", "NULL"),
            ColumnSource::new(KnowGroup, "group_id", "NULL"),
        ],
        SourceId => vec![
            ColumnSource::new(AltSource, "source_id", "a_c.source_id"),
            ColumnSource::new(MainSource, "source_id", "m_c.source_id"),
            ColumnSource::new(UserGroup, "source_id", "u_g.source_id"),
            ColumnSource::new(UserSource, "source_id", "u_c.source_id"),
            ColumnSource::new(KnowGroup, "source_id", "d_g.source_id"),
            ColumnSource::new(KnowSource, "source_id", "d_c.source_id"),
        ],
        SourceLabel => vec![
            ColumnSource::new(AltSource, "source_id", "a_c.label"),
            ColumnSource::new(MainSource, "source_id", "m_c.label"),
            ColumnSource::new(UserSource, "source_id", "u_c.source"),
            ColumnSource::new(KnowSource, "source_id", "d_c.source"),
        ],
        GwasRs => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.rs")],
        GwasChr => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.chr")],
        GwasPos => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.pos {pMinOffset}")],
        GwasTrait => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.trait")],
        GwasSnps => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.snps")],
        GwasOrbeta => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.orbeta")],
        GwasAllele95Ci => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.allele95ci")],
        GwasRiskAfreq => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.riskAfreq")],
        GwasPubmed => vec![ColumnSource::new(KnowGwas, "_ROWID_", "d_w.pubmed_id")],
        DiseaseLabel => vec![
            ColumnSource::new(AltGroup, "group_id", disease_label_expr(AltGroup)),
            ColumnSource::new(MainGroup, "group_id", disease_label_expr(MainGroup)),
            ColumnSource::new(KnowGroup, "group_id", disease_label_expr(KnowGroup)),
        ],
        DiseaseCategory => vec![
            ColumnSource::new(AltGroup, "group_id", disease_category_expr(AltGroup)),
            ColumnSource::new(MainGroup, "group_id", disease_category_expr(MainGroup)),
            ColumnSource::new(KnowGroup, "group_id", disease_category_expr(KnowGroup)),
        ],
    }
}

fn stream_sources(select: &str, upstream: bool) -> Vec<ColumnSource> {
    use Alias::*;
    vec![
        ColumnSource::new(AltLocus, "rowid", stream_expr(AltLocus, select, upstream)),
        ColumnSource::new(MainLocus, "rowid", stream_expr(MainLocus, select, upstream)),
        ColumnSource::new(
            KnowSnpLocus,
            "_ROWID_",
            stream_expr(KnowSnpLocus, select, upstream),
        ),
    ]
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::{Alias, Column, PlanParams};

    #[test]
    fn alias_names_round_trip() {
        for alias in Alias::iter() {
            assert_eq!(alias, Alias::from_str(&alias.to_string()).unwrap());
        }
        assert_eq!(Alias::KnowSnpLocus, Alias::from_str("d_sl").unwrap());
        assert_eq!(Alias::CandMainBioLeft, Alias::from_str("c_mb_L").unwrap());
    }

    #[test]
    fn column_names_round_trip() {
        for column in Column::iter() {
            assert_eq!(column, Column::from_str(&column.to_string()).unwrap());
        }
        assert_eq!(Column::GeneLabel, Column::from_str("gene_label").unwrap());
        assert_eq!(
            Column::BiopolymerIdLeft,
            Column::from_str("biopolymer_id_L").unwrap()
        );
        assert_eq!(
            Column::GwasRiskAfreq,
            Column::from_str("gwas_riskAfreq").unwrap()
        );
    }

    #[test]
    fn every_column_has_a_source() {
        for column in Column::iter() {
            assert!(
                !super::column_sources(column).is_empty(),
                "column {} has no sources",
                column
            );
        }
    }

    #[test]
    fn join_rules_reference_catalogued_aliases() {
        for rule in super::JOIN_RULES.iter().chain(super::PAIR_RULES) {
            for alias in rule.left.iter().chain(rule.right) {
                // every alias resolves to a database and table
                let (_db, table) = alias.table();
                assert!(!table.is_empty());
            }
            assert!(!rule.conds.is_empty());
        }
    }

    #[test]
    fn fill_substitutes_placeholders() {
        let params = PlanParams {
            ldprofile_id: 3,
            zone_size: 100_000,
            rp_margin: 500,
            rm_bases: "0".to_string(),
            rm_percent: "100".to_string(),
            gb_column1: "specificity",
            gb_column2: "specificity",
            gb_condition: ">= 100",
            ..Default::default()
        };
        assert_eq!(
            "m_l.pos >= ((d_bz.zone * 100000) - 500)",
            params.fill(
                "{L}.pos >= (({R}.zone * {zoneSize}) - {rpMargin})",
                Some(Alias::MainLocus),
                Some(Alias::KnowBioZone),
            )
        );
        assert_eq!(
            "d_b.type_id = NULL",
            params.fill("d_b.type_id = {typeID_gene}", None, None)
        );
        assert_eq!(
            "(d_gb.specificity >= 100 OR d_gb.specificity >= 100)",
            params.fill(
                "({L}.{gbColumn1} {gbCondition} OR {L}.{gbColumn2} {gbCondition})",
                Some(Alias::KnowGroupBio),
                None,
            )
        );
    }
}
