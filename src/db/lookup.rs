//! Knowledge lookups used while normalizing user input: SNP merge
//! resolution, SNP locus retrieval, and namespace-qualified identifier
//! resolution for biopolymers and groups.

use std::collections::BTreeSet;

use super::Database;

/// Callback receiving `(original_input, description)` for rows dropped
/// during normalization.
pub type ErrorCallback<'a> = dyn FnMut(&str, &str) + 'a;

/// Counters for merge resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeTally {
    /// Inputs whose RS number was replaced by a merge target.
    pub merged: usize,
    /// Inputs that already carried a current RS number.
    pub matched: usize,
}

/// Counters for match-cardinality outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchTally {
    pub zero: usize,
    pub one: usize,
    pub many: usize,
}

/// A namespace-qualified identifier.
///
/// The namespace `"="` selects by numeric primary id, `"-"` by primary
/// label, and `""`/`"*"` match names in any namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub namespace: String,
    pub name: String,
    pub extra: Option<String>,
}

impl Identifier {
    pub fn new(namespace: &str, name: &str, extra: Option<&str>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            extra: extra.map(|extra| extra.to_string()),
        }
    }

    fn as_input_line(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.namespace,
            self.name,
            self.extra.as_deref().unwrap_or("")
        )
    }
}

/// One resolved identifier; `entity_id` is `None` when the input matched
/// nothing but a zero-match policy allowed it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentifier {
    pub identifier: Identifier,
    pub entity_id: Option<i64>,
}

/// A SNP locus resolved for one input RS number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocus {
    pub rs: i64,
    pub extra: Option<String>,
    pub chrom: Option<u8>,
    pub pos: Option<i64>,
}

fn apply_match_policy<T: Clone>(
    index: usize,
    input_line: &str,
    matches: &[T],
    fallback: T,
    min_match: usize,
    max_match: Option<usize>,
    tally: &mut MatchTally,
    error_callback: &mut Option<&mut ErrorCallback<'_>>,
    out: &mut Vec<T>,
) {
    match matches.len() {
        0 => tally.zero += 1,
        1 => tally.one += 1,
        _ => tally.many += 1,
    }
    let upper = max_match.unwrap_or(matches.len());
    if min_match <= matches.len() && matches.len() <= upper {
        if matches.is_empty() {
            out.push(fallback);
        } else {
            out.extend(matches.iter().cloned());
        }
    } else if let Some(callback) = error_callback {
        let count = if matches.is_empty() {
            "no matches".to_string()
        } else if matches.len() == 1 {
            "1 match".to_string()
        } else {
            format!("{} matches", matches.len())
        };
        callback(input_line, &format!("{} at index {}", count, index));
    }
}

impl Database {
    /// Resolve merged RS numbers to their current values.
    ///
    /// Exactly one `snp_merge` indirection step is followed; loaders are
    /// expected to have compressed merge chains already.  Unmerged inputs
    /// resolve to themselves.
    pub fn current_rses(
        &self,
        rses: &[(i64, Option<String>)],
        mut tally: Option<&mut MergeTally>,
    ) -> Result<Vec<(i64, Option<String>, i64)>, anyhow::Error> {
        let mut stmt = self
            .connection()
            .prepare("SELECT rsCurrent FROM `db`.`snp_merge` WHERE rsMerged = ?")?;
        let mut result = Vec::with_capacity(rses.len());
        for (rs, extra) in rses {
            let currents = stmt
                .query_map([rs], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            if currents.is_empty() {
                if let Some(tally) = tally.as_deref_mut() {
                    tally.matched += 1;
                }
                result.push((*rs, extra.clone(), *rs));
            } else {
                for current in currents {
                    if let Some(tally) = tally.as_deref_mut() {
                        if current != *rs {
                            tally.merged += 1;
                        } else {
                            tally.matched += 1;
                        }
                    }
                    result.push((*rs, extra.clone(), current));
                }
            }
        }
        Ok(result)
    }

    /// Fetch loci for RS numbers, enforcing a match-cardinality policy.
    #[allow(clippy::too_many_arguments)]
    pub fn snp_loci(
        &self,
        rses: &[(i64, Option<String>)],
        min_match: usize,
        max_match: Option<usize>,
        validated: Option<bool>,
        mut tally: Option<&mut MatchTally>,
        mut error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<Vec<ResolvedLocus>, anyhow::Error> {
        let mut sql =
            "SELECT chr, pos FROM `db`.`snp_locus` WHERE rs = ? ".to_string();
        if let Some(validated) = validated {
            sql.push_str(&format!("AND validated = {} ", i64::from(validated)));
        }
        sql.push_str("ORDER BY chr, pos");
        let mut stmt = self.connection().prepare(&sql)?;

        let mut local_tally = MatchTally::default();
        let mut result = Vec::new();
        for (index, (rs, extra)) in rses.iter().enumerate() {
            let matches = stmt
                .query_map([rs], |row| {
                    Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|(chrom, pos)| ResolvedLocus {
                    rs: *rs,
                    extra: extra.clone(),
                    chrom: Some(chrom),
                    pos: Some(pos),
                })
                .collect::<Vec<_>>();
            let fallback = ResolvedLocus {
                rs: *rs,
                extra: extra.clone(),
                chrom: None,
                pos: None,
            };
            let input_line = format!("{}\t{}", rs, extra.as_deref().unwrap_or(""));
            apply_match_policy(
                index + 1,
                &input_line,
                &matches,
                fallback,
                min_match,
                max_match,
                &mut local_tally,
                &mut error_callback,
                &mut result,
            );
        }
        if let Some(tally) = tally.as_deref_mut() {
            *tally = local_tally;
        }
        Ok(result)
    }

    fn lookup_entity_ids(
        &self,
        entity_table: &str,
        name_table: &str,
        id_col: &str,
        type_id: Option<i64>,
        identifiers: &[Identifier],
        min_match: usize,
        max_match: Option<usize>,
        mut tally: Option<&mut MatchTally>,
        mut error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<Vec<ResolvedIdentifier>, anyhow::Error> {
        let type_cond = match type_id {
            Some(type_id) => format!("AND type_id = {} ", type_id),
            None => String::new(),
        };
        let mut by_id = self.connection().prepare(&format!(
            "SELECT `{id}` FROM `db`.`{entity}` WHERE `{id}` = ? {type_cond}",
            id = id_col,
            entity = entity_table,
            type_cond = type_cond,
        ))?;
        let mut by_label = self.connection().prepare(&format!(
            "SELECT `{id}` FROM `db`.`{entity}` WHERE label = ? {type_cond}",
            id = id_col,
            entity = entity_table,
            type_cond = type_cond,
        ))?;
        let mut by_name = self.connection().prepare(&format!(
            "SELECT DISTINCT x.`{id}` FROM `db`.`{names}` AS xn \
             JOIN `db`.`{entity}` AS x ON x.`{id}` = xn.`{id}` {type_cond}\
             WHERE xn.name = ? \
               AND xn.namespace_id = \
                 (SELECT namespace_id FROM `db`.`namespace` \
                  WHERE namespace = LOWER(TRIM(?)) LIMIT 1)",
            id = id_col,
            names = name_table,
            entity = entity_table,
            type_cond = type_cond,
        ))?;
        let mut by_any_name = self.connection().prepare(&format!(
            "SELECT DISTINCT x.`{id}` FROM `db`.`{names}` AS xn \
             JOIN `db`.`{entity}` AS x ON x.`{id}` = xn.`{id}` {type_cond}\
             WHERE xn.name = ?",
            id = id_col,
            names = name_table,
            entity = entity_table,
            type_cond = type_cond,
        ))?;

        let mut local_tally = MatchTally::default();
        let mut result = Vec::new();
        for (index, identifier) in identifiers.iter().enumerate() {
            let namespace = identifier.namespace.trim();
            let matches: BTreeSet<i64> = match namespace {
                "=" => match identifier.name.trim().parse::<i64>() {
                    Ok(id) => by_id
                        .query_map([id], |row| row.get(0))?
                        .collect::<Result<_, _>>()?,
                    Err(_) => BTreeSet::new(),
                },
                "-" => by_label
                    .query_map([&identifier.name], |row| row.get(0))?
                    .collect::<Result<_, _>>()?,
                "" | "*" => by_any_name
                    .query_map([&identifier.name], |row| row.get(0))?
                    .collect::<Result<_, _>>()?,
                _ => by_name
                    .query_map(rusqlite::params![identifier.name, namespace], |row| {
                        row.get(0)
                    })?
                    .collect::<Result<_, _>>()?,
            };
            let matches: Vec<ResolvedIdentifier> = matches
                .into_iter()
                .map(|entity_id| ResolvedIdentifier {
                    identifier: identifier.clone(),
                    entity_id: Some(entity_id),
                })
                .collect();
            let fallback = ResolvedIdentifier {
                identifier: identifier.clone(),
                entity_id: None,
            };
            apply_match_policy(
                index + 1,
                &identifier.as_input_line(),
                &matches,
                fallback,
                min_match,
                max_match,
                &mut local_tally,
                &mut error_callback,
                &mut result,
            );
        }
        if let Some(tally) = tally.as_deref_mut() {
            *tally = local_tally;
        }
        Ok(result)
    }

    /// Resolve biopolymer identifiers, optionally restricted to a type.
    #[allow(clippy::too_many_arguments)]
    pub fn biopolymer_ids_by_identifiers(
        &self,
        type_id: Option<i64>,
        identifiers: &[Identifier],
        min_match: usize,
        max_match: Option<usize>,
        tally: Option<&mut MatchTally>,
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<Vec<ResolvedIdentifier>, anyhow::Error> {
        self.lookup_entity_ids(
            "biopolymer",
            "biopolymer_name",
            "biopolymer_id",
            type_id,
            identifiers,
            min_match,
            max_match,
            tally,
            error_callback,
        )
    }

    /// Resolve group identifiers, optionally restricted to a type.
    #[allow(clippy::too_many_arguments)]
    pub fn group_ids_by_identifiers(
        &self,
        type_id: Option<i64>,
        identifiers: &[Identifier],
        min_match: usize,
        max_match: Option<usize>,
        tally: Option<&mut MatchTally>,
        error_callback: Option<&mut ErrorCallback<'_>>,
    ) -> Result<Vec<ResolvedIdentifier>, anyhow::Error> {
        self.lookup_entity_ids(
            "group",
            "group_name",
            "group_id",
            type_id,
            identifiers,
            min_match,
            max_match,
            tally,
            error_callback,
        )
    }

    fn search_entity_ids(
        &self,
        entity_table: &str,
        name_table: &str,
        id_col: &str,
        type_id: Option<i64>,
        texts: &[(String, Option<String>)],
    ) -> Result<Vec<(Option<String>, String, i64)>, anyhow::Error> {
        let type_cond = match type_id {
            Some(type_id) => format!("AND x.type_id = {} ", type_id),
            None => String::new(),
        };
        let sql = format!(
            "SELECT x.label, x.`{id}` FROM `db`.`{entity}` AS x \
             LEFT JOIN `db`.`{names}` AS xn ON xn.`{id}` = x.`{id}` \
             WHERE (x.label LIKE '%'||?1||'%' \
                OR x.description LIKE '%'||?1||'%' \
                OR xn.name LIKE '%'||?1||'%') \
             {type_cond}\
             GROUP BY x.`{id}`",
            id = id_col,
            entity = entity_table,
            names = name_table,
            type_cond = type_cond,
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let mut result = Vec::new();
        for (text, extra) in texts {
            let rows = stmt
                .query_map([text], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (label, id) in rows {
                result.push((extra.clone(), label, id));
            }
        }
        Ok(result)
    }

    /// Free-text search over biopolymer labels, descriptions and names.
    pub fn biopolymer_ids_by_search(
        &self,
        type_id: Option<i64>,
        texts: &[(String, Option<String>)],
    ) -> Result<Vec<(Option<String>, String, i64)>, anyhow::Error> {
        self.search_entity_ids("biopolymer", "biopolymer_name", "biopolymer_id", type_id, texts)
    }

    /// Free-text search over group labels, descriptions and names.
    pub fn group_ids_by_search(
        &self,
        type_id: Option<i64>,
        texts: &[(String, Option<String>)],
    ) -> Result<Vec<(Option<String>, String, i64)>, anyhow::Error> {
        self.search_entity_ids("group", "group_name", "group_id", type_id, texts)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Identifier, MatchTally, MergeTally};
    use crate::db::test_support::{knowledge_db, seed_minimal_meta};
    use crate::db::Database;

    fn merge_fixture() -> (Database, tempfile::TempDir) {
        knowledge_db(|conn| {
            seed_minimal_meta(conn);
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`snp_merge` (rsMerged, rsCurrent, source_id)
                  VALUES (100, 200, 1), (200, 300, 1);
                INSERT INTO `db`.`snp_locus` (rs, chr, pos, validated, source_id)
                  VALUES (300, 1, 5000, 1, 1),
                         (42, 2, 100, 1, 1),
                         (77, 3, 100, 1, 1), (77, 3, 200, 0, 1);
                "#,
            )
            .unwrap();
        })
    }

    #[test]
    fn merge_resolution_is_single_step() {
        let (db, _tmp_dir) = merge_fixture();
        let mut tally = MergeTally::default();
        let resolved = db
            .current_rses(&[(100, Some("x".to_string()))], Some(&mut tally))
            .unwrap();
        // one indirection step only: 100 -> 200, never 100 -> 300
        assert_eq!(vec![(100, Some("x".to_string()), 200)], resolved);
        assert_eq!(MergeTally { merged: 1, matched: 0 }, tally);
    }

    #[test]
    fn unmerged_rs_resolves_to_itself() {
        let (db, _tmp_dir) = merge_fixture();
        let mut tally = MergeTally::default();
        let resolved = db
            .current_rses(&[(42, None), (100, None)], Some(&mut tally))
            .unwrap();
        assert_eq!(vec![(42, None, 42), (100, None, 200)], resolved);
        assert_eq!(MergeTally { merged: 1, matched: 1 }, tally);
    }

    #[test]
    fn snp_loci_respects_match_policy() {
        let (db, _tmp_dir) = merge_fixture();
        let mut tally = MatchTally::default();
        let mut dropped = Vec::new();
        let mut callback = |line: &str, err: &str| {
            dropped.push((line.to_string(), err.to_string()));
        };
        let loci = db
            .snp_loci(
                &[(42, None), (77, None), (404, None)],
                1,
                Some(1),
                None,
                Some(&mut tally),
                Some(&mut callback),
            )
            .unwrap();
        // rs42 resolves uniquely; rs77 is ambiguous, rs404 unknown
        assert_eq!(1, loci.len());
        assert_eq!(42, loci[0].rs);
        assert_eq!(Some(2), loci[0].chrom);
        assert_eq!(Some(100), loci[0].pos);
        assert_eq!(MatchTally { zero: 1, one: 1, many: 1 }, tally);
        assert_eq!(2, dropped.len());
        assert!(dropped[0].1.contains("2 matches at index 2"));
        assert!(dropped[1].1.contains("no matches at index 3"));
    }

    #[test]
    fn snp_loci_validated_only() {
        let (db, _tmp_dir) = merge_fixture();
        let loci = db
            .snp_loci(&[(77, None)], 1, None, Some(true), None, None)
            .unwrap();
        assert_eq!(1, loci.len());
        assert_eq!(Some(100), loci[0].pos);
    }

    fn gene_fixture() -> (Database, tempfile::TempDir) {
        knowledge_db(|conn| {
            seed_minimal_meta(conn);
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`biopolymer` (biopolymer_id, type_id, label, description, source_id)
                  VALUES (10, 1, 'ABC1', 'first', 1),
                         (11, 1, 'ABC2', 'second', 1),
                         (12, 2, 'NOT_A_GENE', 'pathwayish', 1);
                INSERT INTO `db`.`biopolymer_name` (biopolymer_id, namespace_id, name, source_id)
                  VALUES (10, 1, 'ABC1', 1), (10, 2, '1001', 1),
                         (11, 1, 'ABC2', 1), (11, 2, '1002', 1),
                         (10, 1, 'shared', 1), (11, 1, 'shared', 1);
                "#,
            )
            .unwrap();
        })
    }

    #[test]
    fn identifier_lookup_forms() {
        let (db, _tmp_dir) = gene_fixture();
        // '=' selects by numeric id
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("=", "10", None)],
                1,
                Some(1),
                None,
                None,
            )
            .unwrap();
        assert_eq!(Some(10), resolved[0].entity_id);
        // '-' selects by primary label
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("-", "ABC2", None)],
                1,
                Some(1),
                None,
                None,
            )
            .unwrap();
        assert_eq!(Some(11), resolved[0].entity_id);
        // explicit namespace
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("entrez_gid", "1001", None)],
                1,
                Some(1),
                None,
                None,
            )
            .unwrap();
        assert_eq!(Some(10), resolved[0].entity_id);
        // '*' matches any namespace
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("*", "1002", None)],
                1,
                Some(1),
                None,
                None,
            )
            .unwrap();
        assert_eq!(Some(11), resolved[0].entity_id);
    }

    #[test]
    fn ambiguous_identifier_policy() {
        let (db, _tmp_dir) = gene_fixture();
        let mut tally = MatchTally::default();
        let mut dropped = Vec::new();
        let mut callback = |line: &str, err: &str| {
            dropped.push((line.to_string(), err.to_string()));
        };
        // disallowed: ambiguous name is dropped through the callback
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("symbol", "shared", None)],
                1,
                Some(1),
                Some(&mut tally),
                Some(&mut callback),
            )
            .unwrap();
        assert!(resolved.is_empty());
        assert_eq!(MatchTally { zero: 0, one: 0, many: 1 }, tally);
        assert_eq!(1, dropped.len());
        // allowed: all matches are emitted
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("symbol", "shared", None)],
                1,
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(
            vec![Some(10), Some(11)],
            resolved.iter().map(|r| r.entity_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn type_restriction_applies() {
        let (db, _tmp_dir) = gene_fixture();
        let resolved = db
            .biopolymer_ids_by_identifiers(
                Some(1),
                &[Identifier::new("-", "NOT_A_GENE", None)],
                0,
                None,
                None,
                None,
            )
            .unwrap();
        assert_eq!(vec![None], resolved.iter().map(|r| r.entity_id).collect::<Vec<_>>());
    }

    #[test]
    fn free_text_search() {
        let (db, _tmp_dir) = gene_fixture();
        let hits = db
            .biopolymer_ids_by_search(Some(1), &[("ABC".to_string(), None)])
            .unwrap();
        assert_eq!(2, hits.len());
        let hits = db
            .biopolymer_ids_by_search(None, &[("pathwayish".to_string(), None)])
            .unwrap();
        assert_eq!(1, hits.len());
        assert_eq!(12, hits[0].2);
    }
}
