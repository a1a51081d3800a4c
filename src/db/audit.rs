//! Schema auditing, repair, and version migration.

use std::collections::HashMap;

use super::schema::{SchemaDb, SCHEMA_VERSION};
use super::Database;

/// Snapshot of one table as found in `sqlite_master`.
#[derive(Debug, Default)]
struct CurrentTable {
    /// Normalized `CREATE TABLE` text.
    sql: String,
    /// Normalized `CREATE INDEX` text by index name.
    indices: HashMap<String, String>,
    /// Whether the table holds any rows.
    empty: bool,
}

/// Collapse all whitespace runs so DDL comparison ignores formatting.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fetch_current(db: &Database, schema_db: SchemaDb) -> Result<HashMap<String, CurrentTable>, anyhow::Error> {
    let conn = db.connection();
    let mut current: HashMap<String, CurrentTable> = HashMap::new();
    let sql = format!(
        "SELECT tbl_name, type, name, COALESCE(sql,'') FROM `{}`.`sqlite_master` \
         WHERE type IN ('table','index')",
        schema_db
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let tbl_name: String = row.get(0)?;
        let obj_type: String = row.get(1)?;
        let obj_name: String = row.get(2)?;
        let obj_sql: String = row.get(3)?;
        let entry = current.entry(tbl_name).or_default();
        if obj_type == "table" {
            entry.sql = normalize_sql(&obj_sql);
        } else {
            entry.indices.insert(obj_name, normalize_sql(&obj_sql));
        }
    }
    for (name, entry) in current.iter_mut() {
        entry.empty = !db.table_has_data(schema_db, name)?;
    }
    Ok(current)
}

/// Audit the given database against the schema registry, optionally
/// repairing what can be repaired safely: missing tables and indices are
/// recreated, and mismatched tables are rebuilt only while empty.  Returns
/// the list of problems that remain.
pub fn audit_objects(
    db: &Database,
    schema_db: SchemaDb,
    tables: Option<&[&str]>,
    repair: bool,
) -> Result<Vec<String>, anyhow::Error> {
    let mut current = fetch_current(db, schema_db)?;
    let mut problems = Vec::new();

    let selected: Vec<_> = match tables {
        Some(names) => names
            .iter()
            .filter_map(|name| schema_db.table(name))
            .collect(),
        None => schema_db.tables().iter().collect(),
    };
    for table in selected {
        let expected = format!("CREATE TABLE `{}` {}", table.name, normalize_sql(table.ddl));
        match current.get(table.name) {
            Some(found) if found.sql == expected => {
                db.insert_seed(schema_db, table)?;
            }
            Some(found) if repair && found.empty => {
                tracing::warn!("table '{}' schema mismatch -- repairing", table.name);
                db.drop_objects(schema_db, Some(&[table.name]), true, false)?;
                db.create_objects(schema_db, Some(&[table.name]), true, false)?;
                current.get_mut(table.name).expect("table was just seen").indices.clear();
            }
            Some(_) if repair => {
                problems.push(format!("table '{}' schema mismatch -- cannot repair", table.name));
                continue;
            }
            Some(_) => {
                problems.push(format!("table '{}' schema mismatch", table.name));
                continue;
            }
            None if repair => {
                tracing::warn!("table '{}' is missing -- repairing", table.name);
                db.create_objects(schema_db, Some(&[table.name]), true, true)?;
                continue;
            }
            None => {
                problems.push(format!("table '{}' is missing", table.name));
                continue;
            }
        }
        let found_indices = current
            .get(table.name)
            .map(|found| found.indices.clone())
            .unwrap_or_default();
        for index in table.indices {
            let expected = format!(
                "CREATE INDEX `{}` ON `{}` {}",
                index.name,
                table.name,
                normalize_sql(index.ddl)
            );
            match found_indices.get(index.name) {
                Some(found) if *found == expected => {}
                Some(_) if repair => {
                    tracing::warn!(
                        "index '{}' on table '{}' schema mismatch -- repairing",
                        index.name,
                        table.name
                    );
                    db.connection().execute_batch(&format!(
                        "DROP INDEX IF EXISTS `{}`.`{}`",
                        schema_db, index.name
                    ))?;
                    db.connection().execute_batch(&format!(
                        "CREATE INDEX IF NOT EXISTS `{}`.`{}` ON `{}` {}",
                        schema_db, index.name, table.name, index.ddl
                    ))?;
                }
                Some(_) => {
                    problems.push(format!(
                        "index '{}' on table '{}' schema mismatch",
                        index.name, table.name
                    ));
                }
                None if repair => {
                    tracing::warn!(
                        "index '{}' on table '{}' is missing -- repairing",
                        index.name,
                        table.name
                    );
                    db.connection().execute_batch(&format!(
                        "CREATE INDEX IF NOT EXISTS `{}`.`{}` ON `{}` {}",
                        schema_db, index.name, table.name, index.ddl
                    ))?;
                }
                None => {
                    problems.push(format!(
                        "index '{}' on table '{}' is missing",
                        index.name, table.name
                    ));
                }
            }
        }
    }
    Ok(problems)
}

/// Bring an older knowledge file up to the current schema version with
/// forward-only migrations.
pub fn migrate_schema(db: &Database) -> Result<(), anyhow::Error> {
    let conn = db.connection();

    if db.get_setting_i64("schema")?.unwrap_or(0) < 2 {
        tracing::info!("updating database schema to version 2");
        let update_map: &[(&str, &str)] = &[
            ("snp_merge", "rsMerged,rsCurrent,source_id"),
            ("snp_locus", "rs,chr,pos,validated,source_id"),
            ("snp_entrez_role", "rs,entrez_id,role_id,source_id"),
            ("snp_biopolymer_role", "rs,biopolymer_id,role_id,source_id"),
        ];
        for &(table, columns) in update_map {
            tracing::info!("rebuilding {}", table);
            conn.execute_batch(&format!(
                "ALTER TABLE `db`.`{0}` RENAME TO `___old_{0}___`",
                table
            ))?;
            db.create_objects(SchemaDb::Know, Some(&[table]), true, false)?;
            conn.execute_batch(&format!(
                "INSERT INTO `db`.`{0}` ({1}) SELECT {1} FROM `db`.`___old_{0}___`",
                table, columns
            ))?;
            conn.execute_batch(&format!("DROP TABLE `db`.`___old_{}___`", table))?;
            db.create_objects(SchemaDb::Know, Some(&[table]), false, true)?;
        }
        db.set_setting("schema", "2")?;
    }

    if db.get_setting_i64("schema")?.unwrap_or(0) < 3 {
        tracing::info!("updating database schema to version 3");
        let finalized = db.get_setting_i64("finalized")?.unwrap_or(0);
        db.set_setting("optimized", &finalized.to_string())?;
        db.set_setting("schema", &SCHEMA_VERSION.to_string())?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::db::schema::SchemaDb;
    use crate::db::Database;

    fn fresh_knowledge() -> (Database, tempfile::TempDir) {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let path = tmp_dir.path().join("knowledge.db");
        let mut db = Database::open(false, false).unwrap();
        db.attach_knowledge(&path, false).unwrap();
        (db, tmp_dir)
    }

    #[test]
    fn audit_passes_on_fresh_schema() {
        let (db, _tmp_dir) = fresh_knowledge();
        let problems = super::audit_objects(&db, SchemaDb::Know, None, false).unwrap();
        assert_eq!(Vec::<String>::new(), problems);
    }

    #[test]
    fn audit_reports_missing_index() {
        let (db, _tmp_dir) = fresh_knowledge();
        db.connection()
            .execute_batch("DROP INDEX `db`.`snp_merge__merge_current`")
            .unwrap();
        let problems = super::audit_objects(&db, SchemaDb::Know, None, false).unwrap();
        assert_eq!(
            vec!["index 'snp_merge__merge_current' on table 'snp_merge' is missing".to_string()],
            problems
        );
    }

    #[test]
    fn audit_repairs_missing_index() {
        let (db, _tmp_dir) = fresh_knowledge();
        db.connection()
            .execute_batch("DROP INDEX `db`.`snp_merge__merge_current`")
            .unwrap();
        let problems = super::audit_objects(&db, SchemaDb::Know, None, true).unwrap();
        assert_eq!(Vec::<String>::new(), problems);
        let problems = super::audit_objects(&db, SchemaDb::Know, None, false).unwrap();
        assert_eq!(Vec::<String>::new(), problems);
    }

    #[test]
    fn audit_repairs_empty_mismatched_table() {
        let (db, _tmp_dir) = fresh_knowledge();
        db.connection()
            .execute_batch(
                "DROP TABLE `db`.`warning`; \
                 CREATE TABLE `db`.`warning` (bogus INTEGER)",
            )
            .unwrap();
        let problems = super::audit_objects(&db, SchemaDb::Know, None, true).unwrap();
        assert_eq!(Vec::<String>::new(), problems);
        let problems = super::audit_objects(&db, SchemaDb::Know, None, false).unwrap();
        assert_eq!(Vec::<String>::new(), problems);
    }

    #[test]
    fn audit_never_drops_populated_mismatched_table() {
        let (db, _tmp_dir) = fresh_knowledge();
        db.connection()
            .execute_batch(
                "DROP TABLE `db`.`warning`; \
                 CREATE TABLE `db`.`warning` (bogus INTEGER); \
                 INSERT INTO `db`.`warning` (bogus) VALUES (42)",
            )
            .unwrap();
        let problems = super::audit_objects(&db, SchemaDb::Know, None, true).unwrap();
        assert_eq!(
            vec!["table 'warning' schema mismatch -- cannot repair".to_string()],
            problems
        );
        // the offending rows were left alone
        assert!(db.table_has_data(SchemaDb::Know, "warning").unwrap());
    }

    #[test]
    fn migration_from_version_two() {
        let (db, _tmp_dir) = fresh_knowledge();
        db.connection()
            .execute(
                "INSERT INTO `db`.`snp_merge` (rsMerged, rsCurrent, source_id) VALUES (1, 2, 1)",
                [],
            )
            .unwrap();
        db.set_setting("schema", "2").unwrap();
        db.set_setting("finalized", "1").unwrap();
        db.set_setting("optimized", "0").unwrap();
        super::migrate_schema(&db).unwrap();
        assert_eq!(Some(3), db.get_setting_i64("schema").unwrap());
        // v3 copies the finalized flag into optimized
        assert_eq!(Some(1), db.get_setting_i64("optimized").unwrap());
        // data survives untouched
        assert!(db.table_has_data(SchemaDb::Know, "snp_merge").unwrap());
    }
}
