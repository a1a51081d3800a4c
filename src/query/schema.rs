//! Supporting code for query job definition.
//!
//! A query job is the JSON document handed to the worker: the tuning
//! options, the input filters to accumulate, and the requested output
//! columns.  All options carry serde defaults so a job document only needs
//! to state what it changes.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Policy for reducing ambiguous group-gene associations.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReduceMode {
    /// Keep ambiguous associations subject to the specificity threshold.
    #[default]
    No,
    /// Prefer associations flagged by implication.
    Implication,
    /// Prefer associations flagged by quality.
    Quality,
    /// Accept either implication or quality support.
    Any,
}

/// Interpretation of p-values equal to zero in PARIS input.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ZeroPValues {
    Significant,
    Insignificant,
    #[default]
    Ignore,
}

/// Tuning options for query planning and output generation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct QueryOptions {
    /// LD profile used to expand gene regions; `None` selects the
    /// knowledge database's default (empty-name) profile.
    pub ld_profile: Option<String>,
    /// Use SNP positions that are not flagged as validated.
    pub allow_unvalidated_snp_positions: bool,
    /// Keep SNPs with more than one locus.
    pub allow_ambiguous_snps: bool,
    /// Use group-gene associations below maximum specificity.
    pub allow_ambiguous_knowledge: bool,
    /// Reduction strategy for ambiguous group-gene associations.
    pub reduce_ambiguous_knowledge: ReduceMode,
    /// Keep gene identifiers that match several genes.
    pub allow_ambiguous_genes: bool,
    /// Keep group identifiers that match several groups.
    pub allow_ambiguous_groups: bool,
    /// Do not de-duplicate output rows.
    pub allow_duplicate_output: bool,
    /// Base of input and output coordinates; stored data is 1-based.
    pub coordinate_base: i64,
    /// Input and output regions use half-open intervals.
    pub regions_half_open: bool,
    /// Margin in bases around regions for position matching.
    pub region_position_margin: i64,
    /// Minimum share of the smaller region that must overlap, percent.
    pub region_match_percent: Option<f64>,
    /// Minimum number of overlapping bases for region matching.
    pub region_match_bases: Option<i64>,
    /// Cap on generated models, 0 for no limit.
    pub maximum_model_count: u64,
    /// Apply the alternate input filters to both sides of a model.
    pub alternate_model_filtering: bool,
    /// Generate all pairwise models instead of knowledge-supported ones.
    pub all_pairwise_models: bool,
    /// Ignore groups with more genes than this when modeling, 0 for no cap.
    pub maximum_model_group_size: u64,
    /// Minimum source-count score for a model to be reported.
    pub minimum_model_score: u64,
    /// Sort models by score.
    pub sort_models: bool,
    /// Significance threshold for PARIS result loci.
    pub paris_p_value: f64,
    /// Interpretation of zero p-values in PARIS input.
    pub paris_zero_p_values: ZeroPValues,
    /// Stop permuting once this empirical p-value is exceeded.
    pub paris_max_p_value: Option<f64>,
    /// Drop PARIS loci whose annotated chromosome disagrees.
    pub paris_enforce_input_chromosome: bool,
    /// Number of PARIS permutations.
    pub paris_permutation_count: u64,
    /// Target feature count per PARIS bin.
    pub paris_bin_size: u64,
    /// Emit per-gene PARIS detail rows.
    pub paris_details: bool,
    /// Seed for the permutation RNG; a fixed seed makes output
    /// reproducible.
    pub rng_seed: Option<u64>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            ld_profile: None,
            allow_unvalidated_snp_positions: true,
            allow_ambiguous_snps: false,
            allow_ambiguous_knowledge: false,
            reduce_ambiguous_knowledge: ReduceMode::No,
            allow_ambiguous_genes: false,
            allow_ambiguous_groups: false,
            allow_duplicate_output: false,
            coordinate_base: 1,
            regions_half_open: false,
            region_position_margin: 0,
            region_match_percent: None,
            region_match_bases: None,
            maximum_model_count: 0,
            alternate_model_filtering: false,
            all_pairwise_models: false,
            maximum_model_group_size: 30,
            minimum_model_score: 2,
            sort_models: true,
            paris_p_value: 0.05,
            paris_zero_p_values: ZeroPValues::Ignore,
            paris_max_p_value: None,
            paris_enforce_input_chromosome: true,
            paris_permutation_count: 1000,
            paris_bin_size: 10000,
            paris_details: false,
            rng_seed: None,
        }
    }
}

impl QueryOptions {
    /// Effective region-match thresholds.
    ///
    /// Left unset, the defaults are 0 bases and 100 percent; setting only a
    /// base count disables the percent rule.
    pub fn effective_region_match(&self) -> (Option<i64>, Option<f64>) {
        match (self.region_match_bases, self.region_match_percent) {
            (None, None) => (Some(0), Some(100.0)),
            (Some(bases), None) => (Some(bases), None),
            (bases, percent @ Some(_)) => (Some(bases.unwrap_or(0)), percent),
        }
    }
}

/// A SNP input row: a bare RS number, or an RS number with an extra
/// payload (PARIS reads chromosome and p-value annotations from it).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum SnpSpec {
    Rs(i64),
    Full {
        rs: i64,
        #[serde(default)]
        extra: Option<String>,
    },
}

impl SnpSpec {
    pub fn rs(&self) -> i64 {
        match self {
            SnpSpec::Rs(rs) => *rs,
            SnpSpec::Full { rs, .. } => *rs,
        }
    }

    pub fn extra(&self) -> Option<&str> {
        match self {
            SnpSpec::Rs(_) => None,
            SnpSpec::Full { extra, .. } => extra.as_deref(),
        }
    }
}

/// A position input row; the chromosome is textual and normalized during
/// loading, rows that fail normalization go to the invalid-input report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PositionSpec {
    pub label: String,
    pub chrom: String,
    pub pos: Option<i64>,
    pub extra: Option<String>,
}

/// A region input row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RegionSpec {
    pub label: String,
    pub chrom: String,
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub extra: Option<String>,
}

/// A namespace-qualified name input row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NameSpec {
    pub namespace: String,
    pub name: String,
    pub extra: Option<String>,
}

/// A user-defined group with its member gene names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct UserGroupSpec {
    pub label: String,
    pub description: String,
    pub members: Vec<NameSpec>,
}

/// Input filters for one focus database (`main` or `alt`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FilterSpec {
    pub snps: Vec<SnpSpec>,
    pub positions: Vec<PositionSpec>,
    pub regions: Vec<RegionSpec>,
    pub genes: Vec<NameSpec>,
    pub gene_search: Vec<String>,
    pub groups: Vec<NameSpec>,
    pub group_search: Vec<String>,
    pub sources: Vec<String>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self.snps.is_empty()
            && self.positions.is_empty()
            && self.regions.is_empty()
            && self.genes.is_empty()
            && self.gene_search.is_empty()
            && self.groups.is_empty()
            && self.group_search.is_empty()
            && self.sources.is_empty()
    }
}

/// The kind of output a job requests.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobMode {
    /// One row stream restricted by the filters.
    #[default]
    Filter,
    /// Filter rows annotated with additional columns via LEFT JOIN.
    Annotate,
    /// Pairwise gene-gene models.
    Model,
    /// PARIS permutation analysis.
    Paris,
}

/// A query job document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct QueryJob {
    pub mode: JobMode,
    pub options: QueryOptions,
    /// Primary input filters.
    pub filters: FilterSpec,
    /// Alternate input filters (annotation sources, model right side).
    pub alt_filters: FilterSpec,
    /// User-defined knowledge groups.
    pub user_groups: Vec<UserGroupSpec>,
    /// Requested output types, e.g. `["snp", "gene"]`.
    pub outputs: Vec<String>,
    /// Annotation output types (annotate mode) or right-hand model side
    /// (model mode); defaults to `outputs` for models.
    pub annotations: Vec<String>,
    /// Genome build of positions and regions in this job, as UCSC hg
    /// number; mapped to the knowledge build via liftOver when they differ.
    pub ucschg: Option<i64>,
    /// Genome build as GRCh number, alternative to `ucschg`.
    pub grch: Option<i64>,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_round_trip() {
        let options: QueryOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(QueryOptions::default(), options);
        assert_eq!(1, options.coordinate_base);
        assert!(options.allow_unvalidated_snp_positions);
        assert_eq!(2, options.minimum_model_score);
        assert_eq!(10000, options.paris_bin_size);
    }

    #[test]
    fn effective_region_match_defaults() {
        let mut options = QueryOptions::default();
        assert_eq!((Some(0), Some(100.0)), options.effective_region_match());
        options.region_match_bases = Some(1000);
        assert_eq!((Some(1000), None), options.effective_region_match());
        options.region_match_percent = Some(50.0);
        assert_eq!((Some(1000), Some(50.0)), options.effective_region_match());
    }

    #[test]
    fn job_document_parses() {
        let job: QueryJob = serde_json::from_str(
            r#"{
                "mode": "filter",
                "filters": {"snps": [12345], "genes": [{"namespace": "symbol", "name": "ABC1"}]},
                "outputs": ["gene"],
                "options": {"region_position_margin": 5000, "paris_zero_p_values": "significant"}
            }"#,
        )
        .unwrap();
        assert_eq!(JobMode::Filter, job.mode);
        assert_eq!(vec![SnpSpec::Rs(12345)], job.filters.snps);
        assert_eq!(12345, job.filters.snps[0].rs());
        assert_eq!(5000, job.options.region_position_margin);
        assert_eq!(ZeroPValues::Significant, job.options.paris_zero_p_values);
        assert!(job.alt_filters.is_empty());
    }
}
