use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tablescout_index::FeedbackAction;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::common::{Services, TenantArgs};
use commands::patterns::PatternReport;

#[derive(Parser)]
#[command(name = "tablescout")]
#[command(
    author,
    version,
    about = "Feedback-weighted table and column retrieval for natural-language SQL"
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to the database file (default: .tablescout.db in the current directory)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Path to a TOML retrieval configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index table metadata from a JSON file (one table or an array)
    IndexTable {
        #[command(flatten)]
        tenant: TenantArgs,

        /// JSON metadata file
        file: PathBuf,
    },

    /// Search tables, ranked by similarity x feedback weight
    SearchTables {
        #[command(flatten)]
        tenant: TenantArgs,

        /// Natural-language question
        question: String,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Search columns, ranked by similarity x table weight x column weight
    SearchColumns {
        #[command(flatten)]
        tenant: TenantArgs,

        /// Natural-language question
        question: String,

        /// Only columns of this table
        #[arg(short, long)]
        table: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Rebuild the feedback weights of a tenant from its ledger
    RecomputeWeights {
        #[command(flatten)]
        tenant: TenantArgs,
    },

    /// Show the current feedback weights of a tenant
    Weights {
        #[command(flatten)]
        tenant: TenantArgs,

        /// Show column weights of this table instead of table weights
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Show recent feedback, newest first
    FeedbackSummary {
        #[command(flatten)]
        tenant: TenantArgs,

        /// Maximum entries
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only entries with this response (approve, modify, reject)
        #[arg(short, long)]
        action: Option<FeedbackAction>,
    },

    /// Report on learned SQL patterns
    Patterns {
        #[command(flatten)]
        tenant: TenantArgs,

        #[arg(value_enum)]
        report: PatternReport,

        /// Maximum patterns
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show index and pattern statistics
    Stats {
        /// Database identifier to scope pattern statistics to
        #[arg(long, requires = "schema")]
        db: Option<String>,

        /// Schema name to scope pattern statistics to
        #[arg(long, requires = "db")]
        schema: Option<String>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let create = matches!(cli.command, Commands::IndexTable { .. });
    let services = Services::open(cli.database, cli.config, create)?;

    match cli.command {
        Commands::IndexTable { tenant, file } => {
            commands::index_table(&services, &tenant.tenant(), &file).await
        }
        Commands::SearchTables {
            tenant,
            question,
            limit,
        } => commands::search_tables(&services, &tenant.tenant(), &question, limit).await,
        Commands::SearchColumns {
            tenant,
            question,
            table,
            limit,
        } => {
            commands::search_columns(&services, &tenant.tenant(), &question, table.as_deref(), limit)
                .await
        }
        Commands::RecomputeWeights { tenant } => {
            commands::recompute_weights(&services, &tenant.tenant()).await
        }
        Commands::Weights { tenant, table } => {
            commands::weights(&services, &tenant.tenant(), table.as_deref()).await
        }
        Commands::FeedbackSummary {
            tenant,
            limit,
            action,
        } => commands::feedback_summary(&services, &tenant.tenant(), limit, action).await,
        Commands::Patterns {
            tenant,
            report,
            limit,
        } => commands::patterns(&services, &tenant.tenant(), report, limit).await,
        Commands::Stats { db, schema } => {
            let tenant = db
                .zip(schema)
                .map(|(db, schema)| tablescout_index::Tenant::new(db, schema));
            commands::stats(&services, tenant.as_ref()).await
        }
    }
}
