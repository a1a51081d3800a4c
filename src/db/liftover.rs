//! Chain-indexed liftOver between genome builds.
//!
//! For a `(old, new)` build pair the chains are materialized once per
//! session into a per-chromosome index: chain keys in descending score
//! order, each with its segment list sorted by old start position.  Region
//! mapping walks the applicable segments chain by chain and accepts the
//! first chain that maps at least 95% of the region, so the
//! highest-scoring mapping wins.

use std::collections::HashMap;

use super::Database;

/// Minimum fraction of a region that must be covered by chain segments;
/// the UCSC liftOver default.
pub const MIN_MAPPED_FRACTION: f64 = 0.95;

/// One chain, ordered so that a descending sort puts the best chain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ChainKey {
    score: i64,
    old_start: i64,
    old_end: i64,
    new_start: i64,
    is_fwd: bool,
    new_chr: u8,
    chain_id: i64,
}

/// `(old_start, old_end, new_start)` of one alignment segment.
pub(crate) type Segment = (i64, i64, i64);

/// Chains indexed by old chromosome.
pub(crate) type ChainMap = HashMap<u8, Vec<(ChainKey, Vec<Segment>)>>;

/// A labeled region passing through liftOver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftRegion {
    pub label: String,
    pub chrom: u8,
    pub start: i64,
    pub end: i64,
    pub extra: Option<String>,
}

/// A labeled single-position locus passing through liftOver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftLocus {
    pub label: String,
    pub chrom: u8,
    pub pos: i64,
    pub extra: Option<String>,
}

/// Counters over one liftOver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiftTally {
    /// Regions successfully mapped.
    pub lifted: usize,
    /// Regions below the mapped-fraction threshold or without any chain.
    pub dropped: usize,
}

/// One segment applicable to a query region, tagged with its chain.
#[derive(Debug, Clone, Copy)]
struct ApplicableSegment {
    chain_id: i64,
    old_start: i64,
    old_end: i64,
    new_start: i64,
    is_fwd: bool,
    new_chr: u8,
}

fn build_chain_map(db: &Database, old_hg: i64, new_hg: i64) -> Result<ChainMap, anyhow::Error> {
    let mut grouped: HashMap<u8, std::collections::BTreeMap<ChainKey, Vec<Segment>>> =
        HashMap::new();
    let mut stmt = db.connection().prepare(
        "SELECT chain_id, c.old_chr, c.score, c.old_start, c.old_end, c.new_start, \
                c.is_fwd, c.new_chr, cd.old_start, cd.old_end, cd.new_start \
         FROM `db`.`chain` AS c \
         JOIN `db`.`chain_data` AS cd USING (chain_id) \
         WHERE c.old_ucschg = ? AND c.new_ucschg = ? \
         ORDER BY c.old_chr, c.score DESC, cd.old_start",
    )?;
    let mut rows = stmt.query([old_hg, new_hg])?;
    while let Some(row) = rows.next()? {
        let key = ChainKey {
            chain_id: row.get(0)?,
            score: row.get(2)?,
            old_start: row.get(3)?,
            old_end: row.get(4)?,
            new_start: row.get(5)?,
            is_fwd: row.get::<_, i64>(6)? != 0,
            new_chr: row.get(7)?,
        };
        let old_chr: u8 = row.get(1)?;
        let segment: Segment = (row.get(8)?, row.get(9)?, row.get(10)?);
        // segments arrive ordered by old_start within each chain
        grouped
            .entry(old_chr)
            .or_default()
            .entry(key)
            .or_default()
            .push(segment);
    }
    let mut map: ChainMap = HashMap::new();
    for (old_chr, chains) in grouped {
        // best chain first
        map.insert(old_chr, chains.into_iter().rev().collect());
    }
    Ok(map)
}

/// Collect the segments of chains overlapping `[start, end]`, best chain
/// first; within a chain, binary search locates the first candidate
/// segment.
fn applicable_segments(
    map: &ChainMap,
    chrom: u8,
    start: i64,
    end: i64,
) -> Vec<ApplicableSegment> {
    let mut result = Vec::new();
    let Some(chains) = map.get(&chrom) else {
        return result;
    };
    for (key, segments) in chains {
        if start > key.old_end || end < key.old_start {
            continue;
        }
        let mut idx = segments.partition_point(|seg| seg.0 <= start);
        if idx > 0 {
            idx -= 1;
        }
        while idx < segments.len() && segments[idx].1 < start {
            idx += 1;
        }
        while idx < segments.len() && segments[idx].0 <= end {
            let (old_start, old_end, new_start) = segments[idx];
            result.push(ApplicableSegment {
                chain_id: key.chain_id,
                old_start,
                old_end,
                new_start,
                is_fwd: key.is_fwd,
                new_chr: key.new_chr,
            });
            idx += 1;
        }
    }
    result
}

/// Map `[start, end]` through one chain given its first and last
/// overlapping segments and the summed segment span.  Returns the mapped
/// `(chrom, start, end)` if at least [`MIN_MAPPED_FRACTION`] of the region
/// is covered.
fn map_through_chain(
    start: i64,
    end: i64,
    first_seg: &ApplicableSegment,
    end_seg: &ApplicableSegment,
    total_mapped_sz: i64,
) -> Option<(u8, i64, i64)> {
    // distances from the start of the first/last segment, clamped into them
    let front_diff = (start - first_seg.old_start).clamp(0, first_seg.old_end - first_seg.old_start);
    let end_diff = (end - end_seg.old_start).clamp(0, end_seg.old_end - end_seg.old_start);

    // moving forward adds the offsets to new_start; reverse subtracts and
    // swaps the bounds
    let (new_start, new_end) = if first_seg.is_fwd {
        (first_seg.new_start + front_diff, end_seg.new_start + end_diff)
    } else {
        (end_seg.new_start - end_diff, first_seg.new_start - front_diff)
    };

    let mapped_size =
        total_mapped_sz - front_diff - (end_seg.old_end - end_seg.old_start) + end_diff + 1;
    if mapped_size as f64 / (end - start + 1) as f64 >= MIN_MAPPED_FRACTION {
        Some((first_seg.new_chr, new_start, new_end))
    } else {
        None
    }
}

impl Database {
    /// Whether liftOver chains exist for the given build pair.
    pub fn has_liftover_chains(&self, old_hg: i64, new_hg: i64) -> Result<bool, anyhow::Error> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT() FROM `db`.`chain` WHERE old_ucschg = ? AND new_ucschg = ?",
            [old_hg, new_hg],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn with_chain_map<R>(
        &self,
        old_hg: i64,
        new_hg: i64,
        f: impl FnOnce(&ChainMap) -> R,
    ) -> Result<R, anyhow::Error> {
        if !self.chain_cache.borrow().contains_key(&(old_hg, new_hg)) {
            let map = build_chain_map(self, old_hg, new_hg)?;
            self.chain_cache.borrow_mut().insert((old_hg, new_hg), map);
        }
        let cache = self.chain_cache.borrow();
        Ok(f(cache
            .get(&(old_hg, new_hg))
            .expect("chain map was just inserted")))
    }

    /// Map a single region; swapped bounds are silently corrected and a
    /// zero-length query collapses to a point on output.
    pub fn lift_region(
        &self,
        old_hg: i64,
        new_hg: i64,
        chrom: u8,
        start: i64,
        end: i64,
    ) -> Result<Option<(u8, i64, i64)>, anyhow::Error> {
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let is_region = start != end;
        let segments =
            self.with_chain_map(old_hg, new_hg, |map| applicable_segments(map, chrom, start, end))?;

        let mut mapped = None;
        let mut first_seg: Option<ApplicableSegment> = None;
        let mut end_seg: Option<ApplicableSegment> = None;
        let mut total_mapped_sz = 0;
        for seg in &segments {
            match first_seg {
                None => {
                    first_seg = Some(*seg);
                    end_seg = Some(*seg);
                    total_mapped_sz = seg.old_end - seg.old_start;
                }
                Some(first) if first.chain_id != seg.chain_id => {
                    mapped = map_through_chain(
                        start,
                        end,
                        &first,
                        &end_seg.expect("set with first_seg"),
                        total_mapped_sz,
                    );
                    if mapped.is_some() {
                        break;
                    }
                    first_seg = Some(*seg);
                    end_seg = Some(*seg);
                    total_mapped_sz = seg.old_end - seg.old_start;
                }
                Some(_) => {
                    end_seg = Some(*seg);
                    total_mapped_sz += seg.old_end - seg.old_start;
                }
            }
        }
        if mapped.is_none() {
            if let (Some(first), Some(last)) = (first_seg, end_seg) {
                mapped = map_through_chain(start, end, &first, &last, total_mapped_sz);
            }
        }

        Ok(mapped.map(|(new_chr, new_start, new_end)| {
            if is_region {
                (new_chr, new_start, new_end)
            } else {
                (new_chr, new_start, new_start)
            }
        }))
    }

    /// Map a stream of regions between builds; failures are reported
    /// through `error_callback` and tallied as dropped.
    pub fn lift_regions(
        &self,
        old_hg: i64,
        new_hg: i64,
        regions: Vec<LiftRegion>,
        mut tally: Option<&mut LiftTally>,
        mut error_callback: Option<&mut dyn FnMut(&LiftRegion)>,
    ) -> Result<Vec<LiftRegion>, anyhow::Error> {
        let mut result = Vec::with_capacity(regions.len());
        for region in regions {
            match self.lift_region(old_hg, new_hg, region.chrom, region.start, region.end)? {
                Some((new_chr, new_start, new_end)) => {
                    if let Some(tally) = tally.as_deref_mut() {
                        tally.lifted += 1;
                    }
                    result.push(LiftRegion {
                        label: region.label,
                        chrom: new_chr,
                        start: new_start,
                        end: new_end,
                        extra: region.extra,
                    });
                }
                None => {
                    if let Some(tally) = tally.as_deref_mut() {
                        tally.dropped += 1;
                    }
                    if let Some(callback) = error_callback.as_deref_mut() {
                        callback(&region);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Map a stream of loci between builds; a locus is a region with
    /// `start == end`.
    pub fn lift_loci(
        &self,
        old_hg: i64,
        new_hg: i64,
        loci: Vec<LiftLocus>,
        tally: Option<&mut LiftTally>,
        mut error_callback: Option<&mut dyn FnMut(&LiftLocus)>,
    ) -> Result<Vec<LiftLocus>, anyhow::Error> {
        let regions = loci
            .into_iter()
            .map(|locus| LiftRegion {
                label: locus.label,
                chrom: locus.chrom,
                start: locus.pos,
                end: locus.pos,
                extra: locus.extra,
            })
            .collect();
        let mut region_callback = |region: &LiftRegion| {
            if let Some(callback) = error_callback.as_deref_mut() {
                callback(&LiftLocus {
                    label: region.label.clone(),
                    chrom: region.chrom,
                    pos: region.start,
                    extra: region.extra.clone(),
                });
            }
        };
        let mapped = self.lift_regions(
            old_hg,
            new_hg,
            regions,
            tally,
            Some(&mut region_callback),
        )?;
        Ok(mapped
            .into_iter()
            .map(|region| LiftLocus {
                label: region.label,
                chrom: region.chrom,
                pos: region.start,
                extra: region.extra,
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{LiftRegion, LiftTally};
    use crate::db::test_support::knowledge_db;
    use crate::db::Database;

    /// One forward chain hg19->hg38 on chr1 with a 100bp gap in the middle.
    fn chain_fixture() -> (Database, tempfile::TempDir) {
        knowledge_db(|conn| {
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`chain`
                  (chain_id, old_ucschg, old_chr, old_start, old_end,
                   new_ucschg, new_chr, new_start, new_end, score, is_fwd, source_id)
                  VALUES (1, 19, 1, 1000, 2000, 38, 1, 5000, 6000, 1000, 1, 1);
                INSERT INTO `db`.`chain_data` (chain_id, old_start, old_end, new_start, source_id)
                  VALUES (1, 1000, 1500, 5000, 1), (1, 1600, 2000, 5600, 1);
                "#,
            )
            .unwrap();
        })
    }

    #[test]
    fn gap_spanning_region_is_dropped() {
        let (db, _tmp_dir) = chain_fixture();
        // mapped_size = (500 + 400) - 200 - 400 + 200 + 1 = 501 over 601 < 95%
        let mapped = db.lift_region(19, 38, 1, 1200, 1800).unwrap();
        assert_eq!(None, mapped);
    }

    #[test]
    fn in_segment_region_is_mapped() {
        let (db, _tmp_dir) = chain_fixture();
        let mapped = db.lift_region(19, 38, 1, 1200, 1300).unwrap();
        assert_eq!(Some((1, 5200, 5300)), mapped);
    }

    #[test]
    fn front_diff_zero_at_exact_segment_start() {
        let (db, _tmp_dir) = chain_fixture();
        let mapped = db.lift_region(19, 38, 1, 1000, 1100).unwrap();
        assert_eq!(Some((1, 5000, 5100)), mapped);
    }

    #[test]
    fn swapped_bounds_are_corrected() {
        let (db, _tmp_dir) = chain_fixture();
        let forward = db.lift_region(19, 38, 1, 1200, 1300).unwrap();
        let swapped = db.lift_region(19, 38, 1, 1300, 1200).unwrap();
        assert_eq!(forward, swapped);
    }

    #[test]
    fn locus_collapses_to_single_coordinate() {
        let (db, _tmp_dir) = chain_fixture();
        let mapped = db.lift_region(19, 38, 1, 1200, 1200).unwrap();
        assert_eq!(Some((1, 5200, 5200)), mapped);
    }

    #[test]
    fn unmatched_chromosome_is_dropped_with_callback() {
        let (db, _tmp_dir) = chain_fixture();
        let mut tally = LiftTally::default();
        let mut dropped = Vec::new();
        let mut callback = |region: &LiftRegion| dropped.push(region.label.clone());
        let mapped = db
            .lift_regions(
                19,
                38,
                vec![
                    LiftRegion {
                        label: "ok".to_string(),
                        chrom: 1,
                        start: 1200,
                        end: 1300,
                        extra: None,
                    },
                    LiftRegion {
                        label: "nochain".to_string(),
                        chrom: 2,
                        start: 1200,
                        end: 1300,
                        extra: None,
                    },
                ],
                Some(&mut tally),
                Some(&mut callback),
            )
            .unwrap();
        assert_eq!(1, mapped.len());
        assert_eq!("ok", mapped[0].label);
        assert_eq!(LiftTally { lifted: 1, dropped: 1 }, tally);
        assert_eq!(vec!["nochain".to_string()], dropped);
    }

    #[test]
    fn reverse_chain_swaps_bounds() {
        let (db, _tmp_dir) = knowledge_db(|conn| {
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`chain`
                  (chain_id, old_ucschg, old_chr, old_start, old_end,
                   new_ucschg, new_chr, new_start, new_end, score, is_fwd, source_id)
                  VALUES (7, 19, 2, 1000, 2000, 38, 3, 9000, 8000, 500, 0, 1);
                INSERT INTO `db`.`chain_data` (chain_id, old_start, old_end, new_start, source_id)
                  VALUES (7, 1000, 2000, 9000, 1);
                "#,
            )
            .unwrap();
        });
        let mapped = db.lift_region(19, 38, 2, 1200, 1800).unwrap();
        assert_eq!(Some((3, 8200, 8800)), mapped);
    }

    #[test]
    fn higher_scoring_chain_wins() {
        let (db, _tmp_dir) = knowledge_db(|conn| {
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`chain`
                  (chain_id, old_ucschg, old_chr, old_start, old_end,
                   new_ucschg, new_chr, new_start, new_end, score, is_fwd, source_id)
                  VALUES (1, 19, 1, 1000, 2000, 38, 1, 5000, 6000, 100, 1, 1),
                         (2, 19, 1, 1000, 2000, 38, 1, 7000, 8000, 900, 1, 1);
                INSERT INTO `db`.`chain_data` (chain_id, old_start, old_end, new_start, source_id)
                  VALUES (1, 1000, 2000, 5000, 1), (2, 1000, 2000, 7000, 1);
                "#,
            )
            .unwrap();
        });
        let mapped = db.lift_region(19, 38, 1, 1200, 1300).unwrap();
        assert_eq!(Some((1, 7200, 7300)), mapped);
    }

    #[test]
    fn has_chains_checks_build_pair() {
        let (db, _tmp_dir) = chain_fixture();
        assert!(db.has_liftover_chains(19, 38).unwrap());
        assert!(!db.has_liftover_chains(18, 19).unwrap());
    }
}
