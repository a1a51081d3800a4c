//! PARIS permutation analysis: bin features by hit count, score observed
//! group significance against randomized draws from the same bins.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_core::SeedableRng;
use rusqlite::types::Value;

use crate::common::chrom_to_num;
use crate::db::schema::SchemaDb;
use crate::filters::Session;
use crate::query::catalog::{Alias, Column};
use crate::query::plan::{Focus, QueryMode, QueryRequest};
use crate::query::schema::ZeroPValues;

/// Zone size used for the in-memory feature index; independent of the
/// knowledge database's zone_size.
const PARIS_ZONE_SIZE: i64 = 100_000;

/// Summary row for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParisGroupRow {
    pub group_id: i64,
    pub label: String,
    pub description: String,
    pub gene_count: usize,
    pub feature_count: usize,
    pub simple: usize,
    pub simple_sig: usize,
    pub complex: usize,
    pub complex_sig: usize,
    pub pvalue: String,
}

/// Detail row for one gene of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParisGeneRow {
    pub group_id: i64,
    pub group_label: String,
    pub gene_label: String,
    pub feature_count: usize,
    pub simple: usize,
    pub simple_sig: usize,
    pub complex: usize,
    pub complex_sig: usize,
    pub pvalue: String,
}

/// The two PARIS output streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParisResult {
    pub groups: Vec<ParisGroupRow>,
    pub genes: Vec<ParisGeneRow>,
}

/// Counters from scanning result loci against the feature regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LocusScanTally {
    matched: usize,
    singletons: usize,
    ignored: usize,
}

/// Per-feature hit counts: total loci and significant loci.
type FeatureData = HashMap<i64, (u64, u64)>;

struct FeatureIndex {
    data: FeatureData,
    bounds: HashMap<i64, (u8, i64, i64)>,
    zones: HashMap<(u8, i64), HashSet<i64>>,
}

impl FeatureIndex {
    fn insert(&mut self, fid: i64, chrom: u8, pos_min: i64, pos_max: i64, data: (u64, u64)) {
        self.data.insert(fid, data);
        self.bounds.insert(fid, (chrom, pos_min, pos_max));
        for zone in (pos_min / PARIS_ZONE_SIZE)..=(pos_max / PARIS_ZONE_SIZE) {
            self.zones.entry((chrom, zone)).or_default().insert(fid);
        }
    }
}

/// Draw `count` permutations; each draws the observed number of features
/// from every bin and counts significant ones.  Returns how many
/// permutations met or beat the observed score, stopping early at
/// `max_score` when set.
#[allow(clippy::too_many_arguments)]
fn permutation_score(
    feature_data: &FeatureData,
    feature_bin: &HashMap<i64, usize>,
    bin_features: &BTreeMap<usize, Vec<i64>>,
    real_features: &HashSet<i64>,
    permutations: u64,
    max_score: Option<u64>,
    rng: &mut StdRng,
) -> u64 {
    let real_score = real_features
        .iter()
        .filter(|fid| {
            feature_bin.contains_key(*fid)
                && feature_data.get(*fid).map(|data| data.1 > 0).unwrap_or(false)
        })
        .count();
    if real_score < 1 {
        return permutations;
    }

    let mut bin_draws: BTreeMap<usize, usize> = BTreeMap::new();
    for fid in real_features {
        if let Some(bin) = feature_bin.get(fid) {
            *bin_draws.entry(*bin).or_insert(0) += 1;
        }
    }
    let mut total_score = 0;
    for _ in 0..permutations {
        let mut perm_score = 0;
        for (bin, draws) in &bin_draws {
            let features = &bin_features[bin];
            perm_score += features
                .choose_multiple(rng, *draws)
                .filter(|fid| feature_data.get(*fid).map(|data| data.1 > 0).unwrap_or(false))
                .count();
        }
        if perm_score >= real_score {
            total_score += 1;
            if let Some(max_score) = max_score {
                if total_score >= max_score {
                    break;
                }
            }
        }
    }
    total_score
}

/// Distribute features into bins: all zero-count features share bin 0,
/// all single-hit features bin 1, and the rest spread over
/// `ceil(n / bin_size)` bins of near-equal size in descending hit order.
fn bin_features(
    feature_data: &FeatureData,
    bin_size: u64,
    rng: &mut StdRng,
) -> (HashMap<i64, usize>, BTreeMap<usize, Vec<i64>>) {
    let mut size_features: BTreeMap<u64, Vec<i64>> = BTreeMap::new();
    for (fid, data) in feature_data {
        size_features.entry(data.0).or_default().push(*fid);
    }
    // randomize within each size while building a descending master list
    let mut list = Vec::with_capacity(feature_data.len());
    for (_size, mut features) in size_features.into_iter().rev() {
        features.sort_unstable();
        features.shuffle(rng);
        list.extend(features);
    }

    let mut feature_bin = HashMap::new();
    let mut bins: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
    for bin in [0u64, 1u64] {
        while list
            .last()
            .map(|fid| feature_data[fid].0 == bin)
            .unwrap_or(false)
        {
            let fid = list.pop().expect("list is non-empty");
            feature_bin.insert(fid, bin as usize);
            bins.entry(bin as usize).or_default().push(fid);
        }
    }
    if !list.is_empty() {
        let bin_size = bin_size.max(1) as usize;
        let count = (list.len() + bin_size - 1) / bin_size;
        let size = list.len() / count;
        let extra = list.len() % count;
        for offset in 0..count {
            let bin = 2 + offset;
            let take = size + usize::from(offset < extra);
            for _ in 0..take {
                let fid = list.pop().expect("count covers the whole list");
                feature_bin.insert(fid, bin);
                bins.entry(bin).or_default().push(fid);
            }
        }
    }
    (feature_bin, bins)
}

fn value_to_chrom(value: &Value) -> Option<u8> {
    match value {
        Value::Integer(num) if (1..=26).contains(num) => Some(*num as u8),
        Value::Text(text) => chrom_to_num(text),
        _ => None,
    }
}

fn value_to_pos(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(num) => Some(*num),
        _ => None,
    }
}

impl Session {
    /// Run the PARIS analysis over the current `main` filters.
    ///
    /// Feature regions come from the region filter; result loci with their
    /// p-value annotations come from the SNP and position filters.
    pub fn generate_paris_results(&mut self) -> Result<ParisResult, anyhow::Error> {
        tracing::info!("running PARIS");
        if self.filter_count(SchemaDb::Main, "region") == 0 {
            anyhow::bail!("PARIS requires input feature regions");
        }
        let mut rng = match self.options().rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(rand::thread_rng())?,
        };
        let rp_margin = self.options().region_position_margin;
        self.db()
            .prepare_table_for_update(SchemaDb::Main, "region")?;

        tracing::info!("scanning feature regions");
        let mut index = FeatureIndex {
            data: HashMap::new(),
            bounds: HashMap::new(),
            zones: HashMap::new(),
        };
        {
            let conn = self.db().connection();
            let mut stmt =
                conn.prepare("SELECT rowid, chr, posMin, posMax FROM `main`.`region`")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let fid: i64 = row.get(0)?;
                let chrom: u8 = row.get(1)?;
                let pos_min: i64 = row.get::<_, i64>(2)? - rp_margin;
                let pos_max: i64 = row.get::<_, i64>(3)? + rp_margin;
                index.insert(fid, chrom, pos_min, pos_max, (0, 0));
            }
        }
        tracing::info!("OK: {} regions", index.data.len());

        if self.filter_count(SchemaDb::Main, "snp") > 0 {
            tracing::info!("mapping SNP results to feature regions");
            let tally = self.scan_filter_loci(
                &[Column::PositionChr, Column::PositionPos, Column::SnpExtra],
                "snp",
                &mut index,
            )?;
            tracing::info!(
                "OK: {} in feature regions, {} singletons ({} ignored)",
                tally.matched,
                tally.singletons,
                tally.ignored
            );
        }
        if self.filter_count(SchemaDb::Main, "locus") > 0 {
            tracing::info!("mapping position results to feature regions");
            let tally = self.scan_filter_loci(
                &[Column::PositionChr, Column::PositionPos, Column::PositionExtra],
                "locus",
                &mut index,
            )?;
            tracing::info!(
                "OK: {} in feature regions, {} singletons ({} ignored)",
                tally.matched,
                tally.singletons,
                tally.ignored
            );
        }

        let FeatureIndex {
            data: feature_data, ..
        } = index;

        tracing::info!("binning feature regions");
        let (feature_bin, bins) = bin_features(
            &feature_data,
            self.options().paris_bin_size,
            &mut rng,
        );
        for (bin, features) in &bins {
            let significant = features
                .iter()
                .filter(|fid| feature_data[fid].1 > 0)
                .count();
            tracing::info!(
                "bin #{}: {} features ({} significant)",
                bin,
                features.len(),
                significant
            );
        }

        // cull empty feature regions to speed up later region matching
        if let Some(empties) = bins.get(&0) {
            tracing::info!("culling {} empty feature regions", empties.len());
            let conn = self.db().connection();
            let mut stmt = conn.prepare("DELETE FROM `main`.`region` WHERE rowid = ?")?;
            for fid in empties {
                stmt.execute([fid])?;
            }
        }

        tracing::info!("mapping pathway genes");
        let group_mask = self.mask_for_counts(&[
            (SchemaDb::Main, "group"),
            (SchemaDb::Main, "source"),
        ]);
        let mut request = QueryRequest::new(
            QueryMode::Filter,
            Focus::Main,
            vec![
                Column::GroupId,
                Column::GroupLabel,
                Column::GroupDescription,
                Column::GeneId,
                Column::GeneLabel,
                Column::GeneDescription,
            ],
        );
        request.from_filter = Some(group_mask.clone());
        request.join_filter = Some(group_mask);
        let plan = self.build_query(&request)?;
        let second_plan = if self.filter_count(SchemaDb::User, "source") > 0 {
            let mut user_request = request.clone();
            user_request.user_knowledge = true;
            Some(self.build_query(&user_request)?)
        } else {
            None
        };
        let rows = self.execute_plan(&plan, true, &[], second_plan.as_ref())?;

        // group -> (label, description, genes); gene -> label
        let mut group_data: IndexMap<i64, (String, String, Vec<i64>)> = IndexMap::new();
        let mut gene_labels: IndexMap<i64, String> = IndexMap::new();
        for row in &rows {
            let (Some(group_id), Some(gene_id)) =
                (value_to_pos(&row[0]), value_to_pos(&row[3]))
            else {
                continue;
            };
            let entry = group_data.entry(group_id).or_insert_with(|| {
                (
                    crate::query::sql::value_to_string(&row[1]),
                    crate::query::sql::value_to_string(&row[2]),
                    Vec::new(),
                )
            });
            if !entry.2.contains(&gene_id) {
                entry.2.push(gene_id);
            }
            gene_labels
                .entry(gene_id)
                .or_insert_with(|| crate::query::sql::value_to_string(&row[4]));
        }
        tracing::info!("OK: {} pathways, {} genes", group_data.len(), gene_labels.len());

        tracing::info!("mapping gene features");
        self.db().prepare_table_for_query(SchemaDb::Main, "region")?;
        let region_mask = self.mask_for(&[
            (SchemaDb::Main, "region"),
            (SchemaDb::Main, "region_zone"),
        ]);
        let mut gene_features: IndexMap<i64, HashSet<i64>> = IndexMap::new();
        for gene_id in gene_labels.keys() {
            let mut request =
                QueryRequest::new(QueryMode::Filter, Focus::Main, vec![Column::RegionId]);
            request.where_conds = vec![(
                Alias::KnowBio,
                "biopolymer_id",
                format!("= {}", gene_id),
            )];
            request.from_filter = Some(region_mask.clone());
            request.join_filter = Some(region_mask.clone());
            let plan = self.build_query(&request)?;
            let rows = self.execute_plan(&plan, true, &[], None)?;
            let features: HashSet<i64> = rows
                .iter()
                .filter_map(|row| value_to_pos(&row[0]))
                .collect();
            gene_features.insert(*gene_id, features);
        }

        tracing::info!("mapping pathway features");
        let mut group_features: IndexMap<i64, HashSet<i64>> = IndexMap::new();
        for (group_id, (_label, _description, genes)) in &group_data {
            let mut features = HashSet::new();
            for gene_id in genes {
                if let Some(gene_feats) = gene_features.get(gene_id) {
                    features.extend(gene_feats.iter().copied());
                }
            }
            group_features.insert(*group_id, features);
        }

        let permutations = self.options().paris_permutation_count;
        let max_score = self
            .options()
            .paris_max_p_value
            .map(|p| (p * permutations as f64 + 0.5) as u64);
        let mut gene_pval_cache: HashMap<i64, String> = HashMap::new();
        let mut render_pval = |features: &HashSet<i64>,
                               gene_id: Option<i64>,
                               rng: &mut StdRng|
         -> String {
            if let Some(gene_id) = gene_id {
                if let Some(cached) = gene_pval_cache.get(&gene_id) {
                    return cached.clone();
                }
            }
            let score = permutation_score(
                &feature_data,
                &feature_bin,
                &bins,
                features,
                permutations,
                max_score,
                rng,
            );
            let rendered = if score < 1 {
                format!("< {}", 1.0 / permutations as f64)
            } else {
                let value = format!("{}", score as f64 / permutations as f64);
                match max_score {
                    Some(max_score) if score >= max_score => format!(">= {}", value),
                    _ => value,
                }
            };
            if let Some(gene_id) = gene_id {
                gene_pval_cache.insert(gene_id, rendered.clone());
            }
            rendered
        };

        let count_features = |features: &HashSet<i64>| -> (usize, usize, usize, usize) {
            let mut simple = 0;
            let mut simple_sig = 0;
            let mut complex = 0;
            let mut complex_sig = 0;
            for fid in features {
                let (hits, sig_hits) = feature_data.get(fid).copied().unwrap_or((0, 0));
                if hits == 1 {
                    simple += 1;
                    if sig_hits > 0 {
                        simple_sig += 1;
                    }
                } else if hits > 1 {
                    complex += 1;
                    if sig_hits > 0 {
                        complex_sig += 1;
                    }
                }
            }
            (simple, simple_sig, complex, complex_sig)
        };

        let mut result = ParisResult::default();
        let details = self.options().paris_details;
        for (group_id, (label, description, genes)) in &group_data {
            let features = &group_features[group_id];
            let (simple, simple_sig, complex, complex_sig) = count_features(features);
            result.groups.push(ParisGroupRow {
                group_id: *group_id,
                label: label.clone(),
                description: description.clone(),
                gene_count: genes.len(),
                feature_count: features.len(),
                simple,
                simple_sig,
                complex,
                complex_sig,
                pvalue: render_pval(features, None, &mut rng),
            });
            if details {
                for gene_id in genes {
                    let features = &gene_features[gene_id];
                    let (simple, simple_sig, complex, complex_sig) = count_features(features);
                    result.genes.push(ParisGeneRow {
                        group_id: *group_id,
                        group_label: label.clone(),
                        gene_label: gene_labels[gene_id].clone(),
                        feature_count: features.len(),
                        simple,
                        simple_sig,
                        complex,
                        complex_sig,
                        pvalue: render_pval(features, Some(*gene_id), &mut rng),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Scan one filter's loci against the feature index; loci outside any
    /// feature become singleton features with their own bounds.
    fn scan_filter_loci(
        &mut self,
        columns: &[Column],
        filter_table: &'static str,
        index: &mut FeatureIndex,
    ) -> Result<LocusScanTally, anyhow::Error> {
        let mask = self.mask_for(&[(SchemaDb::Main, filter_table)]);
        let mut request =
            QueryRequest::new(QueryMode::Filter, Focus::Main, columns.to_vec());
        request.from_filter = Some(mask.clone());
        request.join_filter = Some(mask);
        let plan = self.build_query(&request)?;
        let rows = self.execute_plan(&plan, false, &[], None)?;

        let threshold = self.options().paris_p_value;
        let enforce_chrom = self.options().paris_enforce_input_chromosome;
        let zero_policy = self.options().paris_zero_p_values;
        let rp_margin = self.options().region_position_margin;
        let mut tally = LocusScanTally::default();

        for row in &rows {
            let (Some(chrom), Some(pos)) = (value_to_chrom(&row[0]), value_to_pos(&row[1])) else {
                continue;
            };
            let extra = crate::query::sql::value_to_string(&row[2]);
            let mut fields = extra.split_whitespace();
            let annotated_chrom = fields.next();
            if enforce_chrom {
                match annotated_chrom.and_then(chrom_to_num) {
                    Some(annotated) if annotated == chrom => {}
                    _ => continue,
                }
            }
            let significant = match fields.next().and_then(|field| field.parse::<f64>().ok()) {
                Some(pval) if pval <= 0.0 => match zero_policy {
                    ZeroPValues::Significant => true,
                    ZeroPValues::Insignificant => false,
                    ZeroPValues::Ignore => {
                        tally.ignored += 1;
                        continue;
                    }
                },
                Some(pval) => pval <= threshold,
                None => false,
            };

            let mut matched = false;
            let candidates: Vec<i64> = index
                .zones
                .get(&(chrom, pos / PARIS_ZONE_SIZE))
                .map(|fids| fids.iter().copied().collect())
                .unwrap_or_default();
            for fid in candidates {
                let (f_chrom, f_min, f_max) = index.bounds[&fid];
                if chrom == f_chrom && pos >= f_min && pos <= f_max {
                    matched = true;
                    let data = index.data.get_mut(&fid).expect("bounds and data align");
                    data.0 += 1;
                    if significant {
                        data.1 += 1;
                    }
                }
            }
            if matched {
                tally.matched += 1;
            } else {
                tally.singletons += 1;
                let conn = self.db().connection();
                conn.execute(
                    "INSERT INTO `main`.`region` (label, chr, posMin, posMax) \
                     VALUES ('chr'||?1||':'||?2, ?1, ?2, ?2)",
                    rusqlite::params![chrom, pos],
                )?;
                let fid = conn.last_insert_rowid();
                index.insert(
                    fid,
                    chrom,
                    pos - rp_margin,
                    pos + rp_margin,
                    if significant { (1, 1) } else { (1, 0) },
                );
            }
        }
        Ok(tally)
    }

    /// A table mask taking the current counter values for specific tables.
    fn mask_for_counts(
        &self,
        entries: &[(SchemaDb, &'static str)],
    ) -> crate::query::plan::TableMask {
        let mut mask = crate::query::plan::TableMask::default();
        for (db, table) in entries {
            mask.set(*db, table, self.filter_count(*db, table) > 0);
        }
        mask
    }
}

#[cfg(test)]
mod test {
    use std::collections::{HashMap, HashSet};

    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::db::lookup::Identifier;
    use crate::db::schema::SchemaDb;
    use crate::filters::test_support::fixture_session;
    use crate::filters::RegionInput;
    use crate::query::schema::ZeroPValues;

    #[test]
    fn binning_gives_zero_one_and_equal_bins() {
        // counts {0,0,1,2,3,5,8} with bin size 3
        let mut data: super::FeatureData = HashMap::new();
        for (fid, count) in [(1, 0), (2, 0), (3, 1), (4, 2), (5, 3), (6, 5), (7, 8)] {
            data.insert(fid, (count, 0));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let (feature_bin, bins) = super::bin_features(&data, 3, &mut rng);
        let bin_set = |bin: usize| -> HashSet<i64> { bins[&bin].iter().copied().collect() };
        assert_eq!(HashSet::from([1, 2]), bin_set(0));
        assert_eq!(HashSet::from([3]), bin_set(1));
        assert_eq!(HashSet::from([4, 5]), bin_set(2));
        assert_eq!(HashSet::from([6, 7]), bin_set(3));
        assert_eq!(4, bins.len());
        assert_eq!(7, feature_bin.len());
    }

    #[test]
    fn binning_small_remainder_collapses_to_one_bin() {
        let mut data: super::FeatureData = HashMap::new();
        for (fid, count) in [(1, 2), (2, 3)] {
            data.insert(fid, (count, 0));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let (_feature_bin, bins) = super::bin_features(&data, 10, &mut rng);
        assert_eq!(1, bins.len());
        assert_eq!(2, bins[&2].len());
    }

    #[test]
    fn permutation_score_is_deterministic_with_seed() {
        let mut data: super::FeatureData = HashMap::new();
        let mut feature_bin = HashMap::new();
        let mut bins: std::collections::BTreeMap<usize, Vec<i64>> = Default::default();
        for fid in 1..=20i64 {
            data.insert(fid, (2, u64::from(fid <= 5)));
            feature_bin.insert(fid, 2usize);
            bins.entry(2).or_default().push(fid);
        }
        let real: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let score_a =
            super::permutation_score(&data, &feature_bin, &bins, &real, 500, None, &mut rng_a);
        let score_b =
            super::permutation_score(&data, &feature_bin, &bins, &real, 500, None, &mut rng_b);
        assert_eq!(score_a, score_b);
        // three out of three significant is hard to beat by chance
        assert!(score_a < 250);
    }

    #[test]
    fn zero_observed_score_saturates() {
        let mut data: super::FeatureData = HashMap::new();
        data.insert(1, (2, 0));
        let mut feature_bin = HashMap::new();
        feature_bin.insert(1i64, 2usize);
        let bins = std::collections::BTreeMap::from([(2usize, vec![1i64])]);
        let real: HashSet<i64> = [1].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            100,
            super::permutation_score(&data, &feature_bin, &bins, &real, 100, None, &mut rng)
        );
    }

    fn paris_session() -> (crate::filters::Session, tempfile::TempDir) {
        let (mut session, tmp_dir) = fixture_session();
        session.options_mut().rng_seed = Some(1234);
        session.options_mut().paris_permutation_count = 200;
        session.options_mut().paris_enforce_input_chromosome = false;
        session.options_mut().paris_details = true;
        session.options_mut().paris_bin_size = 2;
        // feature regions covering the gene neighborhoods
        session
            .union_regions(
                SchemaDb::Main,
                &[
                    RegionInput {
                        label: "f1".into(),
                        chrom: Some(1),
                        pos_min: Some(1500),
                        pos_max: Some(2500),
                        extra: None,
                    },
                    RegionInput {
                        label: "f2".into(),
                        chrom: Some(1),
                        pos_min: Some(154000),
                        pos_max: Some(156000),
                        extra: None,
                    },
                    RegionInput {
                        label: "f3".into(),
                        chrom: Some(2),
                        pos_min: Some(600),
                        pos_max: Some(800),
                        extra: None,
                    },
                ],
                None,
            )
            .unwrap();
        session.update_region_zones(SchemaDb::Main).unwrap();
        (session, tmp_dir)
    }

    #[test]
    fn paris_produces_group_rows() {
        let (mut session, _tmp_dir) = paris_session();
        // significant hit in ALPHA's feature, insignificant in BETA's
        session
            .union_loci(
                SchemaDb::Main,
                &[
                    crate::filters::LocusInput {
                        label: "hit1".into(),
                        chrom: Some(1),
                        pos: Some(2000),
                        extra: Some("1 0.001".into()),
                    },
                    crate::filters::LocusInput {
                        label: "hit2".into(),
                        chrom: Some(1),
                        pos: Some(155000),
                        extra: Some("1 0.9".into()),
                    },
                ],
                None,
            )
            .unwrap();
        let result = session.generate_paris_results().unwrap();
        assert_eq!(2, result.groups.len());
        let path_a = result
            .groups
            .iter()
            .find(|g| g.label == "PATH_A")
            .expect("PATH_A is reported");
        assert_eq!(2, path_a.gene_count);
        assert!(path_a.feature_count >= 1);
        assert!(!result.genes.is_empty());
        // deterministic with the fixed seed
        let (mut session2, _tmp_dir2) = paris_session();
        session2
            .union_loci(
                SchemaDb::Main,
                &[
                    crate::filters::LocusInput {
                        label: "hit1".into(),
                        chrom: Some(1),
                        pos: Some(2000),
                        extra: Some("1 0.001".into()),
                    },
                    crate::filters::LocusInput {
                        label: "hit2".into(),
                        chrom: Some(1),
                        pos: Some(155000),
                        extra: Some("1 0.9".into()),
                    },
                ],
                None,
            )
            .unwrap();
        let result2 = session2.generate_paris_results().unwrap();
        assert_eq!(result, result2);
    }

    #[test]
    fn unmatched_locus_becomes_singleton_feature() {
        let (mut session, _tmp_dir) = paris_session();
        session
            .union_loci(
                SchemaDb::Main,
                &[crate::filters::LocusInput {
                    label: "lonely".into(),
                    chrom: Some(3),
                    pos: Some(42),
                    extra: Some("3 0.01".into()),
                }],
                None,
            )
            .unwrap();
        let before: i64 = session
            .db()
            .connection()
            .query_row("SELECT COUNT() FROM `main`.`region`", [], |row| row.get(0))
            .unwrap();
        session.generate_paris_results().unwrap();
        let after: i64 = session
            .db()
            .connection()
            .query_row("SELECT COUNT() FROM `main`.`region`", [], |row| row.get(0))
            .unwrap();
        // one singleton feature added, three empty features culled
        assert_eq!(before + 1 - 3, after);
    }

    #[test]
    fn zero_p_values_follow_policy() {
        let (mut session, _tmp_dir) = paris_session();
        session.options_mut().paris_zero_p_values = ZeroPValues::Ignore;
        session
            .union_loci(
                SchemaDb::Main,
                &[crate::filters::LocusInput {
                    label: "zerop".into(),
                    chrom: Some(1),
                    pos: Some(2000),
                    extra: Some("1 0.0".into()),
                }],
                None,
            )
            .unwrap();
        session
            .union_genes(
                SchemaDb::Main,
                &[Identifier::new("symbol", "ALPHA", None)],
                None,
            )
            .unwrap();
        let result = session.generate_paris_results().unwrap();
        // the ignored locus never counts a hit
        for group in &result.groups {
            assert_eq!(0, group.simple_sig + group.complex_sig);
        }
    }
}
