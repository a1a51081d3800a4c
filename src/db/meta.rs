//! Metadata catalogs: namespaces, types, roles, sources, LD profiles, and
//! genome build translations.
//!
//! Name lookup is case-insensitive with surrounding whitespace trimmed;
//! bulk accessors return `name -> Option<id>` maps so callers can report
//! unknown names without a second query.

use indexmap::IndexMap;
use rusqlite::OptionalExtension;

use super::Database;

/// Detail row of an LD profile.
#[derive(Debug, Clone, PartialEq)]
pub struct LdProfile {
    pub ldprofile_id: i64,
    pub description: Option<String>,
    pub metric: Option<String>,
    pub value: Option<f64>,
}

/// Per-namespace statistics over entity names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameStats {
    pub namespace: String,
    pub names: i64,
    pub unique_names: i64,
    pub ambiguous_names: i64,
}

/// Version, options and file manifest of one source, used for
/// replication fingerprint reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceFingerprint {
    pub version: Option<String>,
    pub options: IndexMap<String, Option<String>>,
    pub files: IndexMap<String, (Option<String>, Option<i64>, Option<String>)>,
}

impl Database {
    fn catalog_ids(
        &self,
        table: &str,
        name_col: &str,
        id_col: &str,
        names: &[&str],
    ) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        let mut result = IndexMap::new();
        if self.knowledge_path().is_none() {
            for name in names {
                result.insert((*name).to_string(), None);
            }
            return Ok(result);
        }
        let sql = format!(
            "SELECT `{}` FROM `db`.`{}` WHERE LOWER(TRIM(`{}`)) = LOWER(TRIM(?))",
            id_col, table, name_col
        );
        let mut stmt = self.connection().prepare(&sql)?;
        for name in names {
            let id = stmt
                .query_row([name], |row| row.get::<_, i64>(0))
                .optional()?;
            result.insert((*name).to_string(), id);
        }
        Ok(result)
    }

    /// Look up LD profile ids by name.
    pub fn ldprofile_ids(&self, names: &[&str]) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        self.catalog_ids("ldprofile", "ldprofile", "ldprofile_id", names)
    }

    /// Look up a single LD profile id.
    pub fn ldprofile_id(&self, name: &str) -> Result<Option<i64>, anyhow::Error> {
        Ok(self.ldprofile_ids(&[name])?.swap_remove(name).flatten())
    }

    /// Fetch LD profile details, keyed by profile name.
    pub fn ld_profiles(&self) -> Result<IndexMap<String, LdProfile>, anyhow::Error> {
        let mut result = IndexMap::new();
        if self.knowledge_path().is_none() {
            return Ok(result);
        }
        let mut stmt = self.connection().prepare(
            "SELECT ldprofile, ldprofile_id, description, metric, value \
             FROM `db`.`ldprofile` ORDER BY ldprofile_id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            result.insert(
                row.get::<_, String>(0)?,
                LdProfile {
                    ldprofile_id: row.get(1)?,
                    description: row.get(2)?,
                    metric: row.get(3)?,
                    value: row.get(4)?,
                },
            );
        }
        Ok(result)
    }

    /// Look up namespace ids by name.
    pub fn namespace_ids(&self, names: &[&str]) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        self.catalog_ids("namespace", "namespace", "namespace_id", names)
    }

    /// Look up a single namespace id.
    pub fn namespace_id(&self, name: &str) -> Result<Option<i64>, anyhow::Error> {
        Ok(self.namespace_ids(&[name])?.swap_remove(name).flatten())
    }

    /// Look up relationship ids by name.
    pub fn relationship_ids(
        &self,
        names: &[&str],
    ) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        self.catalog_ids("relationship", "relationship", "relationship_id", names)
    }

    /// Look up role ids by name.
    pub fn role_ids(&self, names: &[&str]) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        self.catalog_ids("role", "role", "role_id", names)
    }

    /// Look up type ids by name.
    pub fn type_ids(&self, names: &[&str]) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        self.catalog_ids("type", "type", "type_id", names)
    }

    /// Look up a single type id.
    pub fn type_id(&self, name: &str) -> Result<Option<i64>, anyhow::Error> {
        Ok(self.type_ids(&[name])?.swap_remove(name).flatten())
    }

    /// Look up subtype ids by name.
    pub fn subtype_ids(&self, names: &[&str]) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        self.catalog_ids("subtype", "subtype", "subtype_id", names)
    }

    /// Look up source ids by name, or fetch the whole catalog when `names`
    /// is `None`.
    pub fn source_ids(
        &self,
        names: Option<&[&str]>,
    ) -> Result<IndexMap<String, Option<i64>>, anyhow::Error> {
        match names {
            Some(names) => self.catalog_ids("source", "source", "source_id", names),
            None => {
                let mut result = IndexMap::new();
                if self.knowledge_path().is_none() {
                    return Ok(result);
                }
                let mut stmt = self
                    .connection()
                    .prepare("SELECT source, source_id FROM `db`.`source` ORDER BY source")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    result.insert(row.get::<_, String>(0)?, Some(row.get::<_, i64>(1)?));
                }
                Ok(result)
            }
        }
    }

    /// Fetch one source's version string.
    pub fn source_version(&self, source_id: i64) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .connection()
            .query_row(
                "SELECT version FROM `db`.`source` WHERE source_id = ?",
                [source_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    /// Fetch one source's loader options.
    pub fn source_options(
        &self,
        source_id: i64,
    ) -> Result<IndexMap<String, Option<String>>, anyhow::Error> {
        let mut stmt = self.connection().prepare(
            "SELECT option, value FROM `db`.`source_option` WHERE source_id = ? ORDER BY option",
        )?;
        let mut rows = stmt.query([source_id])?;
        let mut result = IndexMap::new();
        while let Some(row) = rows.next()? {
            result.insert(row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?);
        }
        Ok(result)
    }

    /// Fetch one source's downloaded file manifest.
    pub fn source_files(
        &self,
        source_id: i64,
    ) -> Result<IndexMap<String, (Option<String>, Option<i64>, Option<String>)>, anyhow::Error> {
        let mut stmt = self.connection().prepare(
            "SELECT filename, modified, size, md5 FROM `db`.`source_file` \
             WHERE source_id = ? ORDER BY filename",
        )?;
        let mut rows = stmt.query([source_id])?;
        let mut result = IndexMap::new();
        while let Some(row) = rows.next()? {
            result.insert(
                row.get::<_, String>(0)?,
                (row.get(1)?, row.get(2)?, row.get(3)?),
            );
        }
        Ok(result)
    }

    /// Assemble the per-source fingerprints for replication reports.
    pub fn source_fingerprints(
        &self,
    ) -> Result<IndexMap<String, SourceFingerprint>, anyhow::Error> {
        let mut result = IndexMap::new();
        for (source, source_id) in self.source_ids(None)? {
            let source_id = source_id.expect("catalog fetch always yields ids");
            result.insert(
                source,
                SourceFingerprint {
                    version: self.source_version(source_id)?,
                    options: self.source_options(source_id)?,
                    files: self.source_files(source_id)?,
                },
            );
        }
        Ok(result)
    }

    /// All GRCh builds known to correspond to a UCSC hg build.
    pub fn grch_by_ucschg(&self, ucschg: i64) -> Result<Vec<i64>, anyhow::Error> {
        let mut stmt = self
            .connection()
            .prepare("SELECT grch FROM `db`.`grch_ucschg` WHERE ucschg = ? ORDER BY grch")?;
        let rows = stmt.query_map([ucschg], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The UCSC hg build corresponding to a GRCh build.
    pub fn ucschg_by_grch(&self, grch: i64) -> Result<Option<i64>, anyhow::Error> {
        Ok(self
            .connection()
            .query_row(
                "SELECT ucschg FROM `db`.`grch_ucschg` WHERE grch = ?",
                [grch],
                |row| row.get::<_, i64>(0),
            )
            .optional()?)
    }

    /// The genome builds of the attached knowledge database, as
    /// `(grch, ucschg)`.
    pub fn database_builds(&self) -> Result<(Option<i64>, Option<i64>), anyhow::Error> {
        let ucschg = self.get_setting_i64("ucschg")?;
        let grch = match ucschg {
            Some(ucschg) => self.grch_by_ucschg(ucschg)?.into_iter().max(),
            None => None,
        };
        Ok((grch, ucschg))
    }

    /// Reconcile user-specified input genome builds, filling in whichever
    /// of the two forms was omitted.
    pub fn resolve_input_builds(
        &self,
        grch: Option<i64>,
        ucschg: Option<i64>,
    ) -> Result<(Option<i64>, Option<i64>), anyhow::Error> {
        match (grch, ucschg) {
            (Some(grch), Some(ucschg)) => {
                if let Some(known) = self.ucschg_by_grch(grch)? {
                    if known != ucschg {
                        anyhow::bail!(
                            "reference genome build GRCh{} is not known to correspond to UCSC hg{}",
                            grch,
                            ucschg
                        );
                    }
                }
                Ok((Some(grch), Some(ucschg)))
            }
            (Some(grch), None) => Ok((Some(grch), self.ucschg_by_grch(grch)?)),
            (None, Some(ucschg)) => {
                Ok((self.grch_by_ucschg(ucschg)?.into_iter().max(), Some(ucschg)))
            }
            (None, None) => Ok((None, None)),
        }
    }

    fn name_stats(
        &self,
        name_table: &str,
        entity_table: &str,
        id_col: &str,
        namespace_id: Option<i64>,
        type_id: Option<i64>,
    ) -> Result<Vec<NameStats>, anyhow::Error> {
        let mut sql = format!(
            "SELECT namespace, COUNT() AS names, \
               SUM(CASE WHEN matches = 1 THEN 1 ELSE 0 END) AS unique_names, \
               SUM(CASE WHEN matches > 1 THEN 1 ELSE 0 END) AS ambiguous_names \
             FROM ( \
               SELECT xn.namespace_id, xn.name, COUNT(DISTINCT xn.`{id}`) AS matches \
               FROM `db`.`{names}` AS xn",
            id = id_col,
            names = name_table,
        );
        if let Some(type_id) = type_id {
            sql.push_str(&format!(
                " JOIN `db`.`{entity}` AS x ON x.`{id}` = xn.`{id}` AND x.type_id = {type_id}",
                entity = entity_table,
                id = id_col,
                type_id = type_id,
            ));
        }
        if let Some(namespace_id) = namespace_id {
            sql.push_str(&format!(" WHERE xn.namespace_id = {}", namespace_id));
        }
        sql.push_str(
            " GROUP BY xn.namespace_id, xn.name \
             ) JOIN `db`.`namespace` AS n USING (namespace_id) \
             GROUP BY namespace_id",
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(NameStats {
                namespace: row.get(0)?,
                names: row.get(1)?,
                unique_names: row.get(2)?,
                ambiguous_names: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-namespace statistics over biopolymer names, optionally
    /// restricted to one namespace and/or entity type.
    pub fn biopolymer_name_stats(
        &self,
        namespace_id: Option<i64>,
        type_id: Option<i64>,
    ) -> Result<Vec<NameStats>, anyhow::Error> {
        self.name_stats("biopolymer_name", "biopolymer", "biopolymer_id", namespace_id, type_id)
    }

    /// Per-namespace statistics over group names.
    pub fn group_name_stats(
        &self,
        namespace_id: Option<i64>,
        type_id: Option<i64>,
    ) -> Result<Vec<NameStats>, anyhow::Error> {
        self.name_stats("group_name", "group", "group_id", namespace_id, type_id)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::db::test_support::{knowledge_db, seed_minimal_meta};

    #[test]
    fn catalog_lookups_trim_and_fold_case() {
        let (db, _tmp_dir) = knowledge_db(seed_minimal_meta);
        assert_eq!(Some(1), db.type_id("gene").unwrap());
        assert_eq!(Some(1), db.type_id("  GENE  ").unwrap());
        assert_eq!(Some(2), db.type_id("Pathway").unwrap());
        assert_eq!(None, db.type_id("unheard-of").unwrap());
        assert_eq!(Some(1), db.namespace_id("Symbol").unwrap());
        let ids = db.namespace_ids(&["symbol", "nope"]).unwrap();
        assert_eq!(Some(&Some(1)), ids.get("symbol"));
        assert_eq!(Some(&None), ids.get("nope"));
    }

    #[test]
    fn ld_profiles_round_trip() {
        let (db, _tmp_dir) = knowledge_db(seed_minimal_meta);
        assert_eq!(Some(1), db.ldprofile_id("").unwrap());
        let profiles = db.ld_profiles().unwrap();
        assert_eq!(1, profiles.len());
        assert_eq!(
            Some("no LD adjustment".to_string()),
            profiles.get("").unwrap().description
        );
    }

    #[test]
    fn build_translations() {
        let (db, _tmp_dir) = knowledge_db(|_| {});
        assert_eq!(Some(19), db.ucschg_by_grch(37).unwrap());
        assert_eq!(Some(38), db.ucschg_by_grch(38).unwrap());
        assert_eq!(vec![37], db.grch_by_ucschg(19).unwrap());
        assert_eq!(
            (Some(37), Some(19)),
            db.resolve_input_builds(Some(37), None).unwrap()
        );
        assert_eq!(
            (Some(37), Some(19)),
            db.resolve_input_builds(None, Some(19)).unwrap()
        );
        assert!(db.resolve_input_builds(Some(37), Some(38)).is_err());
    }

    #[test]
    fn database_builds_follow_setting() {
        let (db, _tmp_dir) = knowledge_db(|_| {});
        assert_eq!((None, None), db.database_builds().unwrap());
        db.set_setting("ucschg", "19").unwrap();
        assert_eq!((Some(37), Some(19)), db.database_builds().unwrap());
    }

    #[test]
    fn name_stats_count_ambiguity() {
        let (db, _tmp_dir) = knowledge_db(|conn| {
            seed_minimal_meta(conn);
            conn.execute_batch(
                r#"
                INSERT INTO `db`.`biopolymer` (biopolymer_id, type_id, label, description, source_id)
                  VALUES (1, 1, 'A1', NULL, 1), (2, 1, 'A2', NULL, 1);
                INSERT INTO `db`.`biopolymer_name` (biopolymer_id, namespace_id, name, source_id)
                  VALUES (1, 1, 'alpha', 1), (2, 1, 'alpha', 1), (1, 1, 'beta', 1);
                "#,
            )
            .unwrap();
        });
        let stats = db.biopolymer_name_stats(None, None).unwrap();
        assert_eq!(1, stats.len());
        assert_eq!("symbol", stats[0].namespace);
        assert_eq!(2, stats[0].names);
        assert_eq!(1, stats[0].unique_names);
        assert_eq!(1, stats[0].ambiguous_names);
    }
}
