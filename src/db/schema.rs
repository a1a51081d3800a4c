//! Declarative schema registry for the knowledge and session databases.
//!
//! Every table is described by its DDL body, optional seed rows, and index
//! DDL.  The storage adapter uses these definitions to create, audit, and
//! repair database objects; table and column names are part of the on-disk
//! file format and must not change.

/// Version expected in the `setting.schema` row; see `db::audit` for the
/// forward-only migrations that bring older files up to date.
pub const SCHEMA_VERSION: i64 = 3;

/// Definition of a single index on a table.
#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
    /// Index name, unique within the database.
    pub name: &'static str,
    /// Column list, including parentheses.
    pub ddl: &'static str,
}

/// Definition of a single table.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Column definitions, including parentheses.
    pub ddl: &'static str,
    /// Optional `VALUES` list inserted with `INSERT OR IGNORE` on creation
    /// and re-asserted during audit.
    pub seed: Option<&'static str>,
    /// Indices on the table.
    pub indices: &'static [IndexDef],
}

/// The logical databases managed by the storage adapter.
///
/// `Main` is the connection's own database; the others are attached under
/// their lower-case name (`alt`, `user`, `cand`, and the knowledge file as
/// `db`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum SchemaDb {
    /// Knowledge database file, attached read-only at query time.
    #[strum(serialize = "db")]
    Know,
    /// Primary session input filters.
    #[strum(serialize = "main")]
    Main,
    /// Alternate session input filters.
    #[strum(serialize = "alt")]
    Alt,
    /// User-provided knowledge.
    #[strum(serialize = "user")]
    User,
    /// Modeling candidates.
    #[strum(serialize = "cand")]
    Cand,
}

impl SchemaDb {
    /// Return the table definitions for this database.
    pub fn tables(&self) -> &'static [TableDef] {
        match self {
            SchemaDb::Know => KNOWLEDGE_TABLES,
            SchemaDb::Main | SchemaDb::Alt => SESSION_TABLES,
            SchemaDb::User => USER_TABLES,
            SchemaDb::Cand => CAND_TABLES,
        }
    }

    /// Look up a single table definition by name.
    pub fn table(&self, name: &str) -> Option<&'static TableDef> {
        self.tables().iter().find(|t| t.name == name)
    }
}

/// Tables of the knowledge database (attached as `db`).
///
/// All coordinates are 1-based closed intervals.
pub const KNOWLEDGE_TABLES: &[TableDef] = &[
    TableDef {
        name: "setting",
        ddl: r#"(
  setting VARCHAR(32) PRIMARY KEY NOT NULL,
  value VARCHAR(256)
)"#,
        seed: Some(
            "('schema','3'),('ucschg',NULL),('zone_size','100000'),('optimized','0'),('finalized','0'),('testing','0')",
        ),
        indices: &[],
    },
    TableDef {
        name: "grch_ucschg",
        ddl: r#"(
  grch INTEGER PRIMARY KEY,
  ucschg INTEGER NOT NULL
)"#,
        // translations known at time of writing; loaders may add more
        seed: Some("(34,16),(35,17),(36,18),(37,19),(38,38)"),
        indices: &[],
    },
    TableDef {
        name: "ldprofile",
        ddl: r#"(
  ldprofile_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  ldprofile VARCHAR(32) UNIQUE NOT NULL,
  description VARCHAR(128),
  metric VARCHAR(32),
  value DOUBLE
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "namespace",
        ddl: r#"(
  namespace_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  namespace VARCHAR(32) UNIQUE NOT NULL,
  polygenic TINYINT NOT NULL DEFAULT 0
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "relationship",
        ddl: r#"(
  relationship_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  relationship VARCHAR(32) UNIQUE NOT NULL
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "role",
        ddl: r#"(
  role_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  role VARCHAR(32) UNIQUE NOT NULL,
  description VARCHAR(128),
  coding TINYINT,
  exon TINYINT
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "source",
        ddl: r#"(
  source_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  source VARCHAR(32) UNIQUE NOT NULL,
  updated DATETIME,
  version VARCHAR(32),
  grch INTEGER,
  ucschg INTEGER,
  current_ucschg INTEGER
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "source_option",
        ddl: r#"(
  source_id TINYINT NOT NULL,
  option VARCHAR(32) NOT NULL,
  value VARCHAR(64),
  PRIMARY KEY (source_id, option)
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "source_file",
        ddl: r#"(
  source_id TINYINT NOT NULL,
  filename VARCHAR(256) NOT NULL,
  size BIGINT,
  modified DATETIME,
  md5 VARCHAR(64),
  PRIMARY KEY (source_id, filename)
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "type",
        ddl: r#"(
  type_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  type VARCHAR(32) UNIQUE NOT NULL
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "subtype",
        ddl: r#"(
  subtype_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  subtype VARCHAR(32) UNIQUE NOT NULL
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "warning",
        ddl: r#"(
  warning_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  source_id TINYINT NOT NULL,
  warning VARCHAR(8192)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "warning__source",
            ddl: "(source_id)",
        }],
    },
    TableDef {
        name: "snp_merge",
        ddl: r#"(
  rsMerged INTEGER NOT NULL,
  rsCurrent INTEGER NOT NULL,
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "snp_merge__merge_current",
            ddl: "(rsMerged,rsCurrent)",
        }],
    },
    TableDef {
        name: "snp_locus",
        ddl: r#"(
  rs INTEGER NOT NULL,
  chr TINYINT NOT NULL,
  pos BIGINT NOT NULL,
  validated TINYINT NOT NULL,
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "snp_locus__rs_chr_pos",
                ddl: "(rs,chr,pos)",
            },
            IndexDef {
                name: "snp_locus__chr_pos_rs",
                ddl: "(chr,pos,rs)",
            },
        ],
    },
    TableDef {
        name: "snp_entrez_role",
        ddl: r#"(
  rs INTEGER NOT NULL,
  entrez_id INTEGER NOT NULL,
  role_id INTEGER NOT NULL,
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "snp_entrez_role__rs_entrez_role",
            ddl: "(rs,entrez_id,role_id)",
        }],
    },
    TableDef {
        name: "snp_biopolymer_role",
        ddl: r#"(
  rs INTEGER NOT NULL,
  biopolymer_id INTEGER NOT NULL,
  role_id INTEGER NOT NULL,
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "snp_biopolymer_role__rs_biopolymer_role",
                ddl: "(rs,biopolymer_id,role_id)",
            },
            IndexDef {
                name: "snp_biopolymer_role__biopolymer_rs_role",
                ddl: "(biopolymer_id,rs,role_id)",
            },
        ],
    },
    TableDef {
        name: "biopolymer",
        ddl: r#"(
  biopolymer_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  type_id TINYINT NOT NULL,
  label VARCHAR(64) NOT NULL,
  description VARCHAR(256),
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "biopolymer__type",
                ddl: "(type_id)",
            },
            IndexDef {
                name: "biopolymer__label_type",
                ddl: "(label,type_id)",
            },
        ],
    },
    TableDef {
        name: "biopolymer_name",
        ddl: r#"(
  biopolymer_id INTEGER NOT NULL,
  namespace_id INTEGER NOT NULL,
  name VARCHAR(256) NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (biopolymer_id,namespace_id,name)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "biopolymer_name__name_namespace_biopolymer",
            ddl: "(name,namespace_id,biopolymer_id)",
        }],
    },
    TableDef {
        name: "biopolymer_name_name",
        // PRIMARY KEY column order satisfies the need to GROUP BY
        // new_namespace_id, new_name
        ddl: r#"(
  namespace_id INTEGER NOT NULL,
  name VARCHAR(256) NOT NULL,
  type_id TINYINT NOT NULL,
  new_namespace_id INTEGER NOT NULL,
  new_name VARCHAR(256) NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (new_namespace_id,new_name,type_id,namespace_id,name)
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "biopolymer_region",
        ddl: r#"(
  biopolymer_id INTEGER NOT NULL,
  ldprofile_id INTEGER NOT NULL,
  chr TINYINT NOT NULL,
  posMin BIGINT NOT NULL,
  posMax BIGINT NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (biopolymer_id,ldprofile_id,chr,posMin,posMax)
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "biopolymer_region__ldprofile_chr_min",
                ddl: "(ldprofile_id,chr,posMin)",
            },
            IndexDef {
                name: "biopolymer_region__ldprofile_chr_max",
                ddl: "(ldprofile_id,chr,posMax)",
            },
        ],
    },
    TableDef {
        name: "biopolymer_zone",
        ddl: r#"(
  biopolymer_id INTEGER NOT NULL,
  chr TINYINT NOT NULL,
  zone INTEGER NOT NULL,
  PRIMARY KEY (biopolymer_id,chr,zone)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "biopolymer_zone__zone",
            ddl: "(chr,zone,biopolymer_id)",
        }],
    },
    TableDef {
        name: "group",
        ddl: r#"(
  group_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  type_id TINYINT NOT NULL,
  subtype_id TINYINT NOT NULL,
  label VARCHAR(64) NOT NULL,
  description VARCHAR(256),
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "group__type",
                ddl: "(type_id)",
            },
            IndexDef {
                name: "group__subtype",
                ddl: "(subtype_id)",
            },
            IndexDef {
                name: "group__label_type",
                ddl: "(label,type_id)",
            },
        ],
    },
    TableDef {
        name: "group_name",
        ddl: r#"(
  group_id INTEGER NOT NULL,
  namespace_id INTEGER NOT NULL,
  name VARCHAR(256) NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (group_id,namespace_id,name)
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "group_name__name_namespace_group",
                ddl: "(name,namespace_id,group_id)",
            },
            IndexDef {
                name: "group_name__source_name",
                ddl: "(source_id,name)",
            },
        ],
    },
    TableDef {
        name: "group_group",
        ddl: r#"(
  group_id INTEGER NOT NULL,
  related_group_id INTEGER NOT NULL,
  relationship_id SMALLINT NOT NULL,
  direction TINYINT NOT NULL,
  contains TINYINT,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (group_id,related_group_id,relationship_id,direction)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "group_group__related",
            ddl: "(related_group_id,group_id)",
        }],
    },
    TableDef {
        name: "group_biopolymer",
        ddl: r#"(
  group_id INTEGER NOT NULL,
  biopolymer_id INTEGER NOT NULL,
  specificity TINYINT NOT NULL,
  implication TINYINT NOT NULL,
  quality TINYINT NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (group_id,biopolymer_id,source_id)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "group_biopolymer__biopolymer",
            ddl: "(biopolymer_id,group_id)",
        }],
    },
    TableDef {
        name: "group_member_name",
        ddl: r#"(
  group_id INTEGER NOT NULL,
  member INTEGER NOT NULL,
  type_id TINYINT NOT NULL,
  namespace_id INTEGER NOT NULL,
  name VARCHAR(256) NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (group_id,member,type_id,namespace_id,name)
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "gwas",
        ddl: r#"(
  gwas_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  rs INTEGER,
  chr TINYINT,
  pos BIGINT,
  trait VARCHAR(256) NOT NULL,
  snps VARCHAR(256),
  orbeta VARCHAR(8),
  allele95ci VARCHAR(16),
  riskAfreq VARCHAR(16),
  pubmed_id INTEGER,
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "gwas__rs",
                ddl: "(rs)",
            },
            IndexDef {
                name: "gwas__chr_pos",
                ddl: "(chr,pos)",
            },
        ],
    },
    TableDef {
        name: "chain",
        ddl: r#"(
  chain_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  old_ucschg INTEGER NOT NULL,
  old_chr TINYINT NOT NULL,
  old_start BIGINT NOT NULL,
  old_end BIGINT NOT NULL,
  new_ucschg INTEGER NOT NULL,
  new_chr TINYINT NOT NULL,
  new_start BIGINT NOT NULL,
  new_end BIGINT NOT NULL,
  score BIGINT NOT NULL,
  is_fwd TINYINT NOT NULL,
  source_id TINYINT NOT NULL
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "chain__oldhg_newhg_chr",
            ddl: "(old_ucschg,new_ucschg,old_chr)",
        }],
    },
    TableDef {
        name: "chain_data",
        ddl: r#"(
  chain_id INTEGER NOT NULL,
  old_start BIGINT NOT NULL,
  old_end BIGINT NOT NULL,
  new_start BIGINT NOT NULL,
  source_id TINYINT NOT NULL,
  PRIMARY KEY (chain_id,old_start)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "chain_data__end",
            ddl: "(chain_id,old_end)",
        }],
    },
];

/// Input filter tables, instantiated identically under `main` and `alt`.
pub const SESSION_TABLES: &[TableDef] = &[
    TableDef {
        name: "snp",
        ddl: r#"(
  rowid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  label VARCHAR(32) NOT NULL,
  rs INTEGER NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0,
  extra TEXT
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "snp__rs",
            ddl: "(rs)",
        }],
    },
    TableDef {
        name: "locus",
        ddl: r#"(
  rowid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  label VARCHAR(32) NOT NULL,
  chr TINYINT NOT NULL,
  pos BIGINT NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0,
  extra TEXT
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "locus__pos",
            ddl: "(chr,pos)",
        }],
    },
    TableDef {
        name: "region",
        ddl: r#"(
  rowid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  label VARCHAR(32) NOT NULL,
  chr TINYINT NOT NULL,
  posMin BIGINT NOT NULL,
  posMax BIGINT NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0,
  extra TEXT
)"#,
        seed: None,
        indices: &[
            IndexDef {
                name: "region__chr_min",
                ddl: "(chr,posMin)",
            },
            IndexDef {
                name: "region__chr_max",
                ddl: "(chr,posMax)",
            },
        ],
    },
    TableDef {
        name: "region_zone",
        ddl: r#"(
  region_rowid INTEGER NOT NULL,
  chr TINYINT NOT NULL,
  zone INTEGER NOT NULL,
  PRIMARY KEY (chr,zone,region_rowid)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "region_zone__region",
            ddl: "(region_rowid)",
        }],
    },
    TableDef {
        name: "gene",
        ddl: r#"(
  rowid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  label VARCHAR(32) NOT NULL,
  biopolymer_id INTEGER NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0,
  extra TEXT
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "gene__biopolymer",
            ddl: "(biopolymer_id)",
        }],
    },
    TableDef {
        name: "group",
        ddl: r#"(
  rowid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  label VARCHAR(32) NOT NULL,
  group_id INTEGER NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0,
  extra TEXT
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "group__group_id",
            ddl: "(group_id)",
        }],
    },
    TableDef {
        name: "source",
        ddl: r#"(
  rowid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
  label VARCHAR(32) NOT NULL,
  source_id INTEGER NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "source__source_id",
            ddl: "(source_id)",
        }],
    },
];

/// User-provided knowledge tables (attached as `user`).
pub const USER_TABLES: &[TableDef] = &[
    TableDef {
        name: "group",
        ddl: r#"(
  group_id INTEGER PRIMARY KEY NOT NULL,
  label VARCHAR(64) NOT NULL,
  description VARCHAR(256),
  source_id INTEGER NOT NULL,
  extra TEXT
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "group__label",
            ddl: "(label)",
        }],
    },
    TableDef {
        name: "group_group",
        ddl: r#"(
  group_id INTEGER NOT NULL,
  related_group_id INTEGER NOT NULL,
  contains TINYINT,
  PRIMARY KEY (group_id,related_group_id)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "group_group__related",
            ddl: "(related_group_id,group_id)",
        }],
    },
    TableDef {
        name: "group_biopolymer",
        ddl: r#"(
  group_id INTEGER NOT NULL,
  biopolymer_id INTEGER NOT NULL,
  PRIMARY KEY (group_id,biopolymer_id)
)"#,
        seed: None,
        indices: &[IndexDef {
            name: "group_biopolymer__biopolymer",
            ddl: "(biopolymer_id,group_id)",
        }],
    },
    TableDef {
        name: "source",
        ddl: r#"(
  source_id INTEGER PRIMARY KEY NOT NULL,
  source VARCHAR(32) NOT NULL,
  description VARCHAR(256) NOT NULL
)"#,
        seed: None,
        indices: &[],
    },
];

/// Modeling candidate tables (attached as `cand`), rebuilt on demand.
pub const CAND_TABLES: &[TableDef] = &[
    TableDef {
        name: "main_biopolymer",
        ddl: r#"(
  biopolymer_id INTEGER PRIMARY KEY NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "alt_biopolymer",
        ddl: r#"(
  biopolymer_id INTEGER PRIMARY KEY NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0
)"#,
        seed: None,
        indices: &[],
    },
    TableDef {
        name: "group",
        ddl: r#"(
  group_id INTEGER PRIMARY KEY NOT NULL,
  flag TINYINT NOT NULL DEFAULT 0
)"#,
        seed: None,
        indices: &[],
    },
];

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn table_lookup() {
        assert_eq!("snp_locus", SchemaDb::Know.table("snp_locus").unwrap().name);
        assert_eq!("region", SchemaDb::Main.table("region").unwrap().name);
        assert_eq!("region", SchemaDb::Alt.table("region").unwrap().name);
        assert!(SchemaDb::Cand.table("snp").is_none());
    }

    #[test]
    fn attach_names() {
        assert_eq!("db", SchemaDb::Know.to_string());
        assert_eq!("main", SchemaDb::Main.to_string());
        assert_eq!("alt", SchemaDb::Alt.to_string());
        assert_eq!("user", SchemaDb::User.to_string());
        assert_eq!("cand", SchemaDb::Cand.to_string());
    }

    #[test]
    fn session_tables_carry_flag_column() {
        for table in SESSION_TABLES {
            if table.name != "region_zone" {
                assert!(table.ddl.contains("flag TINYINT NOT NULL DEFAULT 0"));
            }
        }
    }
}
