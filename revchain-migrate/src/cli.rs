//! Argument parsing and command handlers

use crate::error::CliError;
use crate::template;
use clap::{Parser, Subcommand};
use colored::Colorize;
use revchain::migration::{
    Direction, Migrator, MigratorOptions, Revision, RevisionGraph, TableMarkerStore, Target,
};
use revchain::{connect, MigrateConfig, PgExecutor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "revchain-migrate")]
#[command(about = "Revision-chain schema migrations for the events database")]
#[command(version)]
pub struct Cli {
    /// Database connection URL (overrides configuration for the selected partition)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "config/revchain.toml")]
    pub config: PathBuf,

    /// Partition to operate on (defaults to the configured default partition)
    #[arg(long, short = 'p')]
    pub partition: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show the marker of the partition
    Current,

    /// List revisions from head to base
    History {
        /// Include parents and partitions
        #[arg(long)]
        verbose: bool,
    },

    /// List head revisions of the chain
    Heads,

    /// Show applied vs pending revisions
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upgrade to a target (head, a revision, +N)
    Upgrade {
        #[arg(default_value = "head", allow_negative_numbers = true)]
        target: String,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Downgrade to a target (base, a revision, -N)
    Downgrade {
        #[arg(allow_negative_numbers = true)]
        target: String,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Set the marker without running any transform
    Stamp { target: String },

    /// Verify checksums of applied revisions and that the chain has a single head
    Check,

    /// Create a new revision file
    Revision {
        /// Revision message
        #[arg(short, long)]
        message: String,

        /// Directory the file is written to
        #[arg(long, default_value = "revchain-migrate/src/revisions")]
        dir: PathBuf,

        /// Revision the new one revises (defaults to the current head)
        #[arg(long)]
        head: Option<String>,
    },
}

#[derive(clap::Args, Debug, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Print the SQL instead of executing it
    #[arg(long)]
    pub sql: bool,

    /// Starting marker for --sql (comma-separated tokens, or `base`)
    #[arg(long)]
    pub from: Option<String>,

    /// Show the revisions that would run without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Run against every configured partition, one after another
    #[arg(long)]
    pub all_partitions: bool,
}

pub fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Run a parsed command against `revisions`
pub fn run(cli: &Cli, revisions: Vec<Revision>) -> anyhow::Result<()> {
    let config = MigrateConfig::load_from(&cli.config)?;
    let graph = RevisionGraph::build(revisions)?;
    let store = TableMarkerStore::from_config(&config);
    let partition = cli
        .partition
        .clone()
        .unwrap_or_else(|| config.default_partition.clone());

    let ctx = Context {
        cli,
        config: &config,
        graph: &graph,
        store: &store,
    };

    match &cli.command {
        Commands::Current => handle_current(&ctx, &partition),
        Commands::History { verbose } => handle_history(&graph, *verbose),
        Commands::Heads => handle_heads(&graph),
        Commands::Status { json } => handle_status(&ctx, &partition, *json),
        Commands::Upgrade { target, run } => {
            handle_run(&ctx, &partition, target, Direction::Upgrade, run)
        }
        Commands::Downgrade { target, run } => {
            handle_run(&ctx, &partition, target, Direction::Downgrade, run)
        }
        Commands::Stamp { target } => handle_stamp(&ctx, &partition, target),
        Commands::Check => handle_check(&ctx, &partition),
        Commands::Revision { message, dir, head } => {
            handle_revision(&graph, message, dir, head.as_deref())
        }
    }
}

struct Context<'a> {
    cli: &'a Cli,
    config: &'a MigrateConfig,
    graph: &'a RevisionGraph,
    store: &'a TableMarkerStore,
}

impl Context<'_> {
    fn migrator(&self, partition: &str) -> Migrator<'_> {
        Migrator::new(
            self.graph,
            self.store,
            MigratorOptions::from_config(self.config, partition),
        )
    }

    fn connect(&self, partition: &str) -> Result<PgExecutor, CliError> {
        let url = resolve_database_url(
            self.cli.database_url.as_deref(),
            std::env::var("DATABASE_URL").ok().as_deref(),
            self.config,
            partition,
        )?;
        log::debug!("Connecting to partition '{partition}'");
        let client = connect(&url).map_err(|source| CliError::Connection {
            partition: partition.to_string(),
            source,
        })?;
        Ok(PgExecutor::new(client))
    }
}

/// URL for `partition`: the flag, then `DATABASE_URL` (default partition only), then config
pub fn resolve_database_url(
    flag: Option<&str>,
    env_url: Option<&str>,
    config: &MigrateConfig,
    partition: &str,
) -> Result<String, CliError> {
    if let Some(url) = flag {
        return Ok(url.to_string());
    }
    if partition == config.default_partition {
        if let Some(url) = env_url {
            return Ok(url.to_string());
        }
    }
    config
        .url_for(partition)
        .map(str::to_string)
        .map_err(|_| CliError::UnknownPartition(partition.to_string()))
}

/// Partitions an upgrade/downgrade runs against, in order
pub fn run_partitions(
    args: &RunArgs,
    partition: &str,
    database_url: Option<&str>,
    config: &MigrateConfig,
) -> Result<Vec<String>, CliError> {
    if args.from.is_some() && !args.sql {
        return Err(CliError::FromWithoutSql);
    }
    if !args.all_partitions {
        return Ok(vec![partition.to_string()]);
    }
    if database_url.is_some() {
        return Err(CliError::DatabaseUrlWithAllPartitions);
    }
    Ok(config.partitions())
}

fn handle_current(ctx: &Context<'_>, partition: &str) -> anyhow::Result<()> {
    let executor = ctx.connect(partition)?;
    let current = ctx.migrator(partition).current(&executor)?;

    if current.is_empty() {
        println!("{} {}", format!("[{partition}]").bold(), "<base>".dimmed());
    }
    for token in &current {
        let label = ctx
            .graph
            .get(token)
            .map(Revision::message)
            .unwrap_or("<unknown revision>");
        let head = ctx.graph.successors(token).is_empty();
        println!(
            "{} {} {}{}",
            format!("[{partition}]").bold(),
            token.yellow(),
            label,
            if head { " (head)".green().to_string() } else { String::new() }
        );
    }
    Ok(())
}

fn handle_history(graph: &RevisionGraph, verbose: bool) -> anyhow::Result<()> {
    for revision in graph.iter().rev() {
        let parents = if revision.is_root() {
            "<base>".to_string()
        } else {
            revision.down_revisions().join(", ")
        };
        let mut tags = Vec::new();
        if graph.successors(revision.id()).is_empty() {
            tags.push("head");
        }
        if revision.is_merge() {
            tags.push("mergepoint");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", tags.join(", "))
        };

        println!(
            "{} -> {}{}, {}",
            parents,
            revision.id().yellow(),
            tags.green(),
            revision.message()
        );
        if verbose {
            let partitions: Vec<&str> = revision.partitions().collect();
            if !partitions.is_empty() {
                println!("    partitions: {}", partitions.join(", "));
            }
        }
    }
    Ok(())
}

fn handle_heads(graph: &RevisionGraph) -> anyhow::Result<()> {
    let heads = graph.heads();
    for head in &heads {
        println!("{} (head), {}", head.id().yellow(), head.message());
    }
    if heads.len() > 1 {
        log::warn!(
            "{} heads present; create a merge revision before upgrading",
            heads.len()
        );
    }
    Ok(())
}

fn handle_status(ctx: &Context<'_>, partition: &str, json: bool) -> anyhow::Result<()> {
    let executor = ctx.connect(partition)?;
    let status = ctx.migrator(partition).status(&executor)?;

    if json {
        let summarize = |list: &[revchain::migration::RevisionSummary]| {
            list.iter()
                .map(|r| serde_json::json!({ "id": r.id, "message": r.message }))
                .collect::<Vec<_>>()
        };
        let value = serde_json::json!({
            "partition": status.partition,
            "current": status.current,
            "applied": summarize(&status.applied),
            "pending": summarize(&status.pending),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Migration status for {}", partition.bold());
    println!(
        "  current: {}",
        if status.is_base() {
            "<base>".to_string()
        } else {
            status.current.join(", ")
        }
    );
    println!("  applied: {}", status.applied.len());
    for r in &status.applied {
        println!("    {} {} {}", "✓".green(), r.id, r.message);
    }
    println!("  pending: {}", status.pending.len());
    for r in &status.pending {
        println!("    {} {} {}", "•".yellow(), r.id, r.message);
    }
    if status.is_up_to_date() {
        println!("{}", "Up to date".green());
    }
    Ok(())
}

fn handle_run(
    ctx: &Context<'_>,
    partition: &str,
    target: &str,
    direction: Direction,
    args: &RunArgs,
) -> anyhow::Result<()> {
    let target: Target = target.parse()?;
    let partitions = run_partitions(
        args,
        partition,
        ctx.cli.database_url.as_deref(),
        ctx.config,
    )?;

    for partition in &partitions {
        let migrator = ctx.migrator(partition);

        if args.sql {
            println!("-- {} {} to {}", partition, direction.as_str(), target);
            print!("{}", migrator.script(&target, direction, args.from.as_deref())?);
            continue;
        }

        let executor = ctx.connect(partition)?;
        if args.dry_run {
            let plan = migrator.plan(&executor, &target, direction)?;
            println!(
                "[{}] Would {} {} revision(s):",
                partition,
                direction.as_str(),
                plan.len()
            );
            for revision in plan {
                println!("  {} {}", revision.id().yellow(), revision.message());
            }
            continue;
        }

        let report = match direction {
            Direction::Upgrade => migrator.upgrade(&executor, &target)?,
            Direction::Downgrade => migrator.downgrade(&executor, &target)?,
        };
        for id in &report.applied {
            println!("[{}] {} {}", partition, direction, id.yellow());
        }
        println!(
            "[{}] now at {}",
            partition,
            if report.marker.is_empty() {
                "<base>".to_string()
            } else {
                report.marker.join(", ")
            }
        );
    }
    Ok(())
}

fn handle_stamp(ctx: &Context<'_>, partition: &str, target: &str) -> anyhow::Result<()> {
    let target: Target = target.parse()?;
    let executor = ctx.connect(partition)?;
    let marker = ctx.migrator(partition).stamp(&executor, &target)?;
    println!(
        "[{}] stamped {}",
        partition,
        if marker.is_empty() {
            "<base>".to_string()
        } else {
            marker.join(", ")
        }
    );
    Ok(())
}

fn handle_check(ctx: &Context<'_>, partition: &str) -> anyhow::Result<()> {
    let executor = ctx.connect(partition)?;
    let verified = ctx.migrator(partition).check(&executor)?;
    println!(
        "[{}] {} applied revision(s) match their recorded checksums",
        partition, verified
    );
    Ok(())
}

fn handle_revision(
    graph: &RevisionGraph,
    message: &str,
    dir: &std::path::Path,
    head: Option<&str>,
) -> anyhow::Result<()> {
    let down = match head {
        Some(token) => Some(graph.resolve_id(token)?.id().to_string()),
        None => graph.head()?.map(|r| r.id().to_string()),
    };
    let (token, path) = template::write_revision(dir, message, down.as_deref())?;

    println!("Created revision {} at {}", token.yellow(), path.display());
    let module = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    println!("Register it in revisions/mod.rs: `pub mod {module};` and `{module}::revision()`");
    Ok(())
}
