//! tabmeta CLI - inspect the metadata of a remote tabular service
//!
//! Usage:
//!   tabmeta tree <base-url> [--policy <policy>] [--depth <depth>]
//!   tabmeta query <base-url> <query-text> [--job]
//!
//! Examples:
//!   tabmeta tree https://example.org/svc --policy schema-query
//!   tabmeta tree https://example.org/svc --depth columns
//!   tabmeta query https://example.org/svc "SELECT TOP 5 * FROM cat.obs"
//!   tabmeta query https://example.org/svc "SELECT * FROM cat.obs" --job

use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;
use std::time::Duration;

use tabmeta::config::Settings;
use tabmeta::diag::default_sink;
use tabmeta::meta::Population;
use tabmeta::query::job::{AsyncJob, JobPhase};
use tabmeta::query::{QueryClient, RowSet};
use tabmeta::reader::{Detail, MetaPolicy};

#[derive(Parser)]
#[command(name = "tabmeta")]
#[command(about = "Inspect the table metadata published by a remote tabular query service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema/table hierarchy of a service
    Tree {
        /// Base URL of the service
        base_url: String,

        /// Reader strategy
        #[arg(short, long, default_value = "auto")]
        policy: PolicyArg,

        /// Detail level for listing endpoints
        #[arg(short, long, default_value = "table")]
        detail: DetailArg,

        /// How deep to print the hierarchy
        #[arg(long, default_value = "tables")]
        depth: DepthArg,

        /// Leave service-reported names unrepaired
        #[arg(long)]
        no_fix_names: bool,
    },

    /// Run a query against the service
    Query {
        /// Base URL of the service
        base_url: String,

        /// Query text
        text: String,

        /// Maximum number of rows to request
        #[arg(short, long)]
        maxrec: Option<u64>,

        /// Submit as an asynchronous job instead of a synchronous call
        #[arg(long)]
        job: bool,

        /// Poll interval for job phases, in seconds
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },
}

#[derive(Clone, ValueEnum)]
enum PolicyArg {
    Auto,
    Document,
    SchemaQuery,
    TwoStage,
}

impl From<PolicyArg> for MetaPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Auto => MetaPolicy::Auto,
            PolicyArg::Document => MetaPolicy::Document,
            PolicyArg::SchemaQuery => MetaPolicy::SchemaQuery,
            PolicyArg::TwoStage => MetaPolicy::TwoStage,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum DetailArg {
    Full,
    Table,
    Schema,
}

impl From<DetailArg> for Detail {
    fn from(arg: DetailArg) -> Self {
        match arg {
            DetailArg::Full => Detail::Full,
            DetailArg::Table => Detail::Table,
            DetailArg::Schema => Detail::Schema,
        }
    }
}

#[derive(Clone, Copy, PartialEq, PartialOrd, ValueEnum)]
enum DepthArg {
    Schemas,
    Tables,
    Columns,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Tree {
            base_url,
            policy,
            detail,
            depth,
            no_fix_names,
        } => print_tree(base_url, policy.into(), detail.into(), depth, !no_fix_names).await,
        Commands::Query {
            base_url,
            text,
            maxrec,
            job,
            poll_secs,
        } => {
            if job {
                run_job(base_url, &text, maxrec, Duration::from_secs(poll_secs)).await
            } else {
                run_query(base_url, &text, maxrec).await
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn print_tree(
    base_url: String,
    policy: MetaPolicy,
    detail: Detail,
    depth: DepthArg,
    fix_names: bool,
) -> CliResult {
    let mut settings = Settings::for_base_url(base_url);
    settings.metadata.policy = policy;
    settings.metadata.detail = detail;
    settings.metadata.fix_names = fix_names;

    let reader = policy.create_reader(&settings, default_sink())?;
    eprintln!("# source: {}", reader.source());
    eprintln!("# means:  {}", reader.means());

    let mut schemas = reader.read_schemas().await?;
    for schema in &mut schemas {
        println!("{}", schema.name);
        if depth == DepthArg::Schemas {
            continue;
        }
        if !schema.tables.is_known() {
            match reader.read_tables(schema).await {
                Ok(tables) => schema.tables = Population::Known(tables),
                Err(error) if error.is_unsupported() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        let Some(tables) = schema.tables.known() else { continue };
        for table in tables {
            match &table.nrows {
                Some(nrows) => println!("    {} ({nrows} rows)", table.name),
                None => println!("    {}", table.name),
            }
            if depth < DepthArg::Columns {
                continue;
            }
            let columns = match table.columns.known() {
                Some(columns) => columns.clone(),
                None => match reader.read_columns(table).await {
                    Ok(columns) => columns,
                    Err(error) if error.is_unsupported() => continue,
                    Err(error) => return Err(error.into()),
                },
            };
            for column in &columns {
                match &column.data_type {
                    Some(dt) => println!("        {} [{dt}]", column.name),
                    None => println!("        {}", column.name),
                }
            }
        }
    }
    Ok(())
}

async fn run_query(base_url: String, text: &str, maxrec: Option<u64>) -> CliResult {
    let settings = Settings::for_base_url(base_url);
    let endpoints = settings.service.endpoints();
    let client = QueryClient::new(endpoints.sync, maxrec)?;
    let rows = client.execute_sync(text).await?;
    print_rows(&rows);
    Ok(())
}

async fn run_job(
    base_url: String,
    text: &str,
    maxrec: Option<u64>,
    poll: Duration,
) -> CliResult {
    let settings = Settings::for_base_url(base_url);
    let endpoints = settings.service.endpoints();
    let mut job = AsyncJob::create(&endpoints.jobs, text, maxrec).await?;
    eprintln!("# job: {}", job.job_url());
    job.start().await?;
    let phase = job.wait_until_finished(poll).await?;
    if phase != JobPhase::Completed {
        return Err(format!("job finished in phase {phase}").into());
    }
    let rows = job.fetch_result().await?;
    print_rows(&rows);
    job.delete().await?;
    Ok(())
}

fn print_rows(rows: &RowSet) {
    println!("{}", rows.columns().join("\t"));
    for ir in 0..rows.len() {
        let cells: Vec<String> = rows
            .columns()
            .iter()
            .map(|c| rows.str_cell(ir, c).unwrap_or_default())
            .collect();
        println!("{}", cells.join("\t"));
    }
}
