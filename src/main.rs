//! Knowledge-base filter worker main executable.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use kbfilter_worker::common::{self, chrom_to_num};
use kbfilter_worker::db::liftover::{LiftLocus, LiftRegion};
use kbfilter_worker::db::lookup::Identifier;
use kbfilter_worker::db::schema::SchemaDb;
use kbfilter_worker::db::Database;
use kbfilter_worker::filters::{LocusInput, RegionInput, Session};
use kbfilter_worker::output::OutputTable;
use kbfilter_worker::query::schema::{FilterSpec, JobMode, QueryJob};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Knowledge-base filtering worker",
    long_about = "This tool runs filter, annotation, model and PARIS queries \
                  against a prior-knowledge database"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Database-related commands.
    Db(Db),
    /// Run a query job against the knowledge database.
    Query(QueryArgs),
    /// Map regions between genome builds via the chain tables.
    Lift(LiftArgs),
}

/// Parsing of "db *" sub commands.
#[derive(Debug, ClapArgs)]
#[command(args_conflicts_with_subcommands = true)]
struct Db {
    /// The sub command to run
    #[command(subcommand)]
    command: DbCommands,
}

/// Enum supporting the parsing of "db *" sub commands.
#[derive(Debug, Subcommand)]
enum DbCommands {
    Audit(DbAudit),
    Finalize(DbPath),
    Optimize(DbPath),
}

/// Audit (and optionally repair) a knowledge database file.
#[derive(Debug, ClapArgs)]
struct DbAudit {
    /// Path to the knowledge database file.
    #[arg(long, required = true)]
    path_db: PathBuf,
    /// Repair repairable schema drift (empty tables, missing indices).
    #[arg(long, default_value_t = false)]
    repair: bool,
}

/// Arguments naming just a knowledge database file.
#[derive(Debug, ClapArgs)]
struct DbPath {
    /// Path to the knowledge database file.
    #[arg(long, required = true)]
    path_db: PathBuf,
}

/// Command line arguments for the `query` sub command.
#[derive(Debug, ClapArgs)]
#[command(author, version, about = "Run a query job", long_about = None)]
struct QueryArgs {
    /// Path to the knowledge database file.
    #[arg(long, required = true)]
    path_db: PathBuf,
    /// Path to the query job JSON file.
    #[arg(long, required = true)]
    path_job: PathBuf,
    /// Path to the output TSV file.
    #[arg(long, required = true)]
    path_output: PathBuf,
    /// Optional path for PARIS per-gene detail rows.
    #[arg(long)]
    path_details: Option<PathBuf>,
    /// Optional path collecting invalid and dropped input rows.
    #[arg(long)]
    path_rejects: Option<PathBuf>,
}

/// Command line arguments for the `lift` sub command.
#[derive(Debug, ClapArgs)]
#[command(author, version, about = "liftOver regions between builds", long_about = None)]
struct LiftArgs {
    /// Path to the knowledge database file.
    #[arg(long, required = true)]
    path_db: PathBuf,
    /// Source UCSC hg build number.
    #[arg(long, required = true)]
    from_hg: i64,
    /// Target UCSC hg build number.
    #[arg(long, required = true)]
    to_hg: i64,
    /// Input TSV of `chrom start end [label]` rows.
    #[arg(long, required = true)]
    path_input: PathBuf,
    /// Output TSV of mapped regions.
    #[arg(long, required = true)]
    path_output: PathBuf,
    /// Output TSV of unmapped regions.
    #[arg(long)]
    path_unmapped: Option<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Db(db) => match &db.command {
                DbCommands::Audit(args) => run_db_audit(args)?,
                DbCommands::Finalize(args) => run_db_finalize(args)?,
                DbCommands::Optimize(args) => run_db_optimize(args)?,
            },
            Commands::Query(args) => run_query(args)?,
            Commands::Lift(args) => run_lift(args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    tracing::info!("All done. Have a nice day!");
    Ok(())
}

fn run_db_audit(args: &DbAudit) -> Result<(), anyhow::Error> {
    let mut db = Database::open(false, false)?;
    db.attach_knowledge(&args.path_db, args.repair)?;
    tracing::info!("knowledge database audit passed");
    Ok(())
}

fn run_db_finalize(args: &DbPath) -> Result<(), anyhow::Error> {
    let mut db = Database::open(false, true)?;
    db.attach_knowledge(&args.path_db, false)?;
    db.check_writeable()?;
    db.finalize()?;
    Ok(())
}

fn run_db_optimize(args: &DbPath) -> Result<(), anyhow::Error> {
    let mut db = Database::open(false, true)?;
    db.attach_knowledge(&args.path_db, false)?;
    db.optimize()?;
    Ok(())
}

/// Collector for invalid-input and liftOver-dropped rows.
#[derive(Debug, Default)]
struct Rejects {
    rows: Vec<(String, String)>,
}

impl Rejects {
    fn push(&mut self, line: &str, message: &str) {
        self.rows.push((line.to_string(), message.to_string()));
    }

    fn write(&self, path: Option<&PathBuf>) -> Result<(), anyhow::Error> {
        let Some(path) = path else {
            return Ok(());
        };
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .from_path(path)?;
        for (line, message) in &self.rows {
            writer.write_record([line.as_str(), message.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn write_table(path: &PathBuf, table: &OutputTable) -> Result<(), anyhow::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(path)?;
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Load one focus database's filters from the job document, applying
/// coordinate offsets and liftOver where the input build differs from the
/// knowledge build.
fn load_filters(
    session: &mut Session,
    focus: SchemaDb,
    spec: &FilterSpec,
    ucsc_user: Option<i64>,
    ucsc_db: Option<i64>,
    rejects: &mut Rejects,
) -> Result<(), anyhow::Error> {
    if !spec.snps.is_empty() {
        let rows: Vec<(i64, Option<String>)> = spec
            .snps
            .iter()
            .map(|snp| (snp.rs(), snp.extra().map(|extra| extra.to_string())))
            .collect();
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.union_snps(focus, &rows, Some(&mut callback))?;
    }

    let offset = 1 - session.options().coordinate_base;
    let stop_offset = offset - i64::from(session.options().regions_half_open);

    if !spec.positions.is_empty() {
        let mut loci = Vec::with_capacity(spec.positions.len());
        for position in &spec.positions {
            loci.push(LocusInput {
                label: if position.label.is_empty() {
                    format!("chr{}:{}", position.chrom, position.pos.unwrap_or_default())
                } else {
                    position.label.clone()
                },
                chrom: chrom_to_num(&position.chrom),
                pos: position.pos.map(|pos| pos + offset),
                extra: position.extra.clone(),
            });
        }
        let loci = lift_loci(session, ucsc_user, ucsc_db, loci, rejects)?;
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.union_loci(focus, &loci, Some(&mut callback))?;
    }

    if !spec.regions.is_empty() {
        let mut regions = Vec::with_capacity(spec.regions.len());
        for region in &spec.regions {
            regions.push(RegionInput {
                label: if region.label.is_empty() {
                    format!(
                        "chr{}:{}-{}",
                        region.chrom,
                        region.start.unwrap_or_default(),
                        region.stop.unwrap_or_default()
                    )
                } else {
                    region.label.clone()
                },
                chrom: chrom_to_num(&region.chrom),
                pos_min: region.start.map(|start| start + offset),
                pos_max: region.stop.map(|stop| stop + stop_offset),
                extra: region.extra.clone(),
            });
        }
        let regions = lift_regions(session, ucsc_user, ucsc_db, regions, rejects)?;
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.union_regions(focus, &regions, Some(&mut callback))?;
        session.update_region_zones(focus)?;
    }

    if !spec.genes.is_empty() {
        let names: Vec<Identifier> = spec
            .genes
            .iter()
            .map(|name| Identifier::new(&name.namespace, &name.name, name.extra.as_deref()))
            .collect();
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.union_genes(focus, &names, Some(&mut callback))?;
    }
    if !spec.gene_search.is_empty() {
        let texts: Vec<(String, Option<String>)> = spec
            .gene_search
            .iter()
            .map(|text| (text.clone(), None))
            .collect();
        session.union_gene_search(focus, &texts)?;
    }
    if !spec.groups.is_empty() {
        let names: Vec<Identifier> = spec
            .groups
            .iter()
            .map(|name| Identifier::new(&name.namespace, &name.name, name.extra.as_deref()))
            .collect();
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.union_groups(focus, &names, Some(&mut callback))?;
    }
    if !spec.group_search.is_empty() {
        let texts: Vec<(String, Option<String>)> = spec
            .group_search
            .iter()
            .map(|text| (text.clone(), None))
            .collect();
        session.union_group_search(focus, &texts)?;
    }
    if !spec.sources.is_empty() {
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.union_sources(focus, &spec.sources, Some(&mut callback))?;
    }
    Ok(())
}

fn lift_loci(
    session: &Session,
    ucsc_user: Option<i64>,
    ucsc_db: Option<i64>,
    loci: Vec<LocusInput>,
    rejects: &mut Rejects,
) -> Result<Vec<LocusInput>, anyhow::Error> {
    let (Some(old_hg), Some(new_hg)) = (check_builds(ucsc_user, ucsc_db, "position")?, ucsc_db)
    else {
        return Ok(loci);
    };
    if old_hg == new_hg {
        return Ok(loci);
    }
    if !session.db().has_liftover_chains(old_hg, new_hg)? {
        anyhow::bail!(
            "knowledge database contains no chain files to perform liftOver from hg{} to hg{}",
            old_hg,
            new_hg
        );
    }
    let message = format!("dropped during liftOver from hg{} to hg{}", old_hg, new_hg);
    let mut kept: Vec<LiftLocus> = Vec::new();
    let mut invalid: Vec<LocusInput> = Vec::new();
    for locus in loci {
        match (locus.chrom, locus.pos) {
            (Some(chrom), Some(pos)) => kept.push(LiftLocus {
                label: locus.label,
                chrom,
                pos,
                extra: locus.extra,
            }),
            _ => invalid.push(locus),
        }
    }
    let mut callback = |locus: &LiftLocus| {
        rejects.push(
            &format!("{}\t{}\t{}", locus.label, locus.chrom, locus.pos),
            &message,
        );
    };
    let mapped = session
        .db()
        .lift_loci(old_hg, new_hg, kept, None, Some(&mut callback))?;
    let mut result: Vec<LocusInput> = mapped
        .into_iter()
        .map(|locus| LocusInput {
            label: locus.label,
            chrom: Some(locus.chrom),
            pos: Some(locus.pos),
            extra: locus.extra,
        })
        .collect();
    result.extend(invalid);
    Ok(result)
}

fn lift_regions(
    session: &Session,
    ucsc_user: Option<i64>,
    ucsc_db: Option<i64>,
    regions: Vec<RegionInput>,
    rejects: &mut Rejects,
) -> Result<Vec<RegionInput>, anyhow::Error> {
    let (Some(old_hg), Some(new_hg)) = (check_builds(ucsc_user, ucsc_db, "region")?, ucsc_db)
    else {
        return Ok(regions);
    };
    if old_hg == new_hg {
        return Ok(regions);
    }
    if !session.db().has_liftover_chains(old_hg, new_hg)? {
        anyhow::bail!(
            "knowledge database contains no chain files to perform liftOver from hg{} to hg{}",
            old_hg,
            new_hg
        );
    }
    let message = format!("dropped during liftOver from hg{} to hg{}", old_hg, new_hg);
    let mut kept: Vec<LiftRegion> = Vec::new();
    let mut invalid: Vec<RegionInput> = Vec::new();
    for region in regions {
        match (region.chrom, region.pos_min, region.pos_max) {
            (Some(chrom), Some(start), Some(end)) => kept.push(LiftRegion {
                label: region.label,
                chrom,
                start,
                end,
                extra: region.extra,
            }),
            _ => invalid.push(region),
        }
    }
    let mut callback = |region: &LiftRegion| {
        rejects.push(
            &format!(
                "{}\t{}\t{}\t{}",
                region.label, region.chrom, region.start, region.end
            ),
            &message,
        );
    };
    let mapped = session
        .db()
        .lift_regions(old_hg, new_hg, kept, None, Some(&mut callback))?;
    let mut result: Vec<RegionInput> = mapped
        .into_iter()
        .map(|region| RegionInput {
            label: region.label,
            chrom: Some(region.chrom),
            pos_min: Some(region.start),
            pos_max: Some(region.end),
            extra: region.extra,
        })
        .collect();
    result.extend(invalid);
    Ok(result)
}

/// Warn when either side's build is unknown; liftOver then assumes the
/// builds match.
fn check_builds(
    ucsc_user: Option<i64>,
    ucsc_db: Option<i64>,
    kind: &str,
) -> Result<Option<i64>, anyhow::Error> {
    match (ucsc_user, ucsc_db) {
        (None, _) => {
            tracing::warn!(
                "UCSC hg# build version was not specified for {} input; \
                 assuming it matches the knowledge database",
                kind
            );
            Ok(None)
        }
        (Some(_), None) => {
            tracing::warn!(
                "UCSC hg# build version of the knowledge database could not be determined; \
                 assuming it matches user input"
            );
            Ok(None)
        }
        (Some(user), Some(_)) => Ok(Some(user)),
    }
}

fn run_query(args: &QueryArgs) -> Result<(), anyhow::Error> {
    let job: QueryJob = serde_json::from_reader(std::fs::File::open(&args.path_job)?)?;

    let mut db = Database::open(false, false)?;
    db.attach_knowledge(&args.path_db, false)?;
    let mut session = Session::new(db, job.options.clone());

    let (_grch_db, ucsc_db) = session.db().database_builds()?;
    let (_grch_user, ucsc_user) = session
        .db()
        .resolve_input_builds(job.grch, job.ucschg)?;

    let mut rejects = Rejects::default();
    load_filters(
        &mut session,
        SchemaDb::Main,
        &job.filters,
        ucsc_user,
        ucsc_db,
        &mut rejects,
    )?;
    load_filters(
        &mut session,
        SchemaDb::Alt,
        &job.alt_filters,
        ucsc_user,
        ucsc_db,
        &mut rejects,
    )?;
    for user_group in &job.user_groups {
        let user_source_id = match session.user_source_id("user")? {
            Some(id) => id,
            None => session.add_user_source("user", "user-defined knowledge")?,
        };
        let group_id =
            session.add_user_group(user_source_id, &user_group.label, &user_group.description)?;
        let members: Vec<Identifier> = user_group
            .members
            .iter()
            .map(|name| Identifier::new(&name.namespace, &name.name, name.extra.as_deref()))
            .collect();
        let mut callback = |line: &str, message: &str| rejects.push(line, message);
        session.add_user_group_members(group_id, &members, Some(&mut callback))?;
    }

    match job.mode {
        JobMode::Filter => {
            let table = session.generate_filter_output(&job.outputs, true)?;
            write_table(&args.path_output, &table)?;
        }
        JobMode::Annotate => {
            let table = session.generate_annotation_output(&job.outputs, &job.annotations, true)?;
            write_table(&args.path_output, &table)?;
        }
        JobMode::Model => {
            let annotations = if job.annotations.is_empty() {
                job.outputs.clone()
            } else {
                job.annotations.clone()
            };
            let table = session.generate_model_output(&job.outputs, &annotations, true)?;
            write_table(&args.path_output, &table)?;
        }
        JobMode::Paris => {
            let result = session.generate_paris_results()?;
            let mut table = OutputTable {
                header: [
                    "#id",
                    "group",
                    "description",
                    "genes",
                    "features",
                    "simple",
                    "(sig)",
                    "complex",
                    "(sig)",
                    "pval",
                ]
                .map(String::from)
                .to_vec(),
                rows: Vec::new(),
            };
            for group in &result.groups {
                table.rows.push(vec![
                    group.group_id.to_string(),
                    group.label.clone(),
                    group.description.clone(),
                    group.gene_count.to_string(),
                    group.feature_count.to_string(),
                    group.simple.to_string(),
                    group.simple_sig.to_string(),
                    group.complex.to_string(),
                    group.complex_sig.to_string(),
                    group.pvalue.clone(),
                ]);
            }
            write_table(&args.path_output, &table)?;
            if let Some(path_details) = &args.path_details {
                let mut details = OutputTable {
                    header: [
                        "#group", "gene", "features", "simple", "(sig)", "complex", "(sig)",
                        "pval",
                    ]
                    .map(String::from)
                    .to_vec(),
                    rows: Vec::new(),
                };
                for gene in &result.genes {
                    details.rows.push(vec![
                        gene.group_label.clone(),
                        gene.gene_label.clone(),
                        gene.feature_count.to_string(),
                        gene.simple.to_string(),
                        gene.simple_sig.to_string(),
                        gene.complex.to_string(),
                        gene.complex_sig.to_string(),
                        gene.pvalue.clone(),
                    ]);
                }
                write_table(path_details, &details)?;
            }
        }
    }
    rejects.write(args.path_rejects.as_ref())?;
    Ok(())
}

fn run_lift(args: &LiftArgs) -> Result<(), anyhow::Error> {
    let mut db = Database::open(false, false)?;
    db.attach_knowledge(&args.path_db, false)?;
    if args.from_hg == args.to_hg {
        tracing::warn!("source and target builds are identical; regions pass through unchanged");
    } else if !db.has_liftover_chains(args.from_hg, args.to_hg)? {
        anyhow::bail!(
            "knowledge database contains no chain files to perform liftOver from hg{} to hg{}",
            args.from_hg,
            args.to_hg
        );
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(&args.path_input)?;
    let mut regions = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let chrom = record.get(0).and_then(chrom_to_num);
        let start = record.get(1).and_then(|value| value.parse::<i64>().ok());
        let end = record.get(2).and_then(|value| value.parse::<i64>().ok());
        match (chrom, start, end) {
            (Some(chrom), Some(start), Some(end)) => regions.push(LiftRegion {
                label: record
                    .get(3)
                    .map(|label| label.to_string())
                    .unwrap_or_else(|| format!("chr{}:{}-{}", chrom, start, end)),
                chrom,
                start,
                end,
                extra: None,
            }),
            _ => tracing::warn!("skipping malformed region at line {}", index + 1),
        }
    }

    let mut unmapped: Vec<LiftRegion> = Vec::new();
    let mut callback = |region: &LiftRegion| unmapped.push(region.clone());
    let mut tally = kbfilter_worker::db::liftover::LiftTally::default();
    let mapped = if args.from_hg == args.to_hg {
        regions
    } else {
        db.lift_regions(
            args.from_hg,
            args.to_hg,
            regions,
            Some(&mut tally),
            Some(&mut callback),
        )?
    };

    let mut writer = std::io::BufWriter::new(std::fs::File::create(&args.path_output)?);
    for region in &mapped {
        writeln!(
            writer,
            "chr{}\t{}\t{}\t{}",
            kbfilter_worker::common::chrom_name(region.chrom).unwrap_or("?"),
            region.start,
            region.end,
            region.label
        )?;
    }
    writer.flush()?;
    if let Some(path_unmapped) = &args.path_unmapped {
        let mut writer = std::io::BufWriter::new(std::fs::File::create(path_unmapped)?);
        for region in &unmapped {
            writeln!(
                writer,
                "chr{}\t{}\t{}\t{}",
                kbfilter_worker::common::chrom_name(region.chrom).unwrap_or("?"),
                region.start,
                region.end,
                region.label
            )?;
        }
        writer.flush()?;
    }
    tracing::info!("lifted {} regions, {} dropped", tally.lifted, tally.dropped);
    Ok(())
}
