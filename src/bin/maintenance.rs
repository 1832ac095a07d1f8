//! jobconsult-maintenance - operator cleanup for the marketplace database.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jobconsult::{
    app,
    db::PgStore,
    jobs::repo_types::JobPurge,
    maintenance::{self, Task},
};

#[derive(Parser, Debug)]
#[command(name = "jobconsult-maintenance")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Confirm destructive operations
    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete every user created through 42 OAuth, with their records
    PurgeExternalUsers,
    /// Delete every user (and, by cascade, jobs and messages)
    PurgeAllUsers,
    /// Delete jobs by status
    PurgeJobs {
        #[arg(long, value_enum, default_value = "all")]
        status: StatusFilter,
    },
    /// Delete every message
    PurgeMessages,
    /// Rewrite legacy expertise spellings
    StandardizeExpertise,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusFilter {
    Open,
    Finished,
    All,
}

impl From<StatusFilter> for JobPurge {
    fn from(s: StatusFilter) -> Self {
        match s {
            StatusFilter::Open => JobPurge::Open,
            StatusFilter::Finished => JobPurge::Finished,
            StatusFilter::All => JobPurge::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    app::init_tracing("jobconsult=info");
    let cli = Cli::parse();

    let task = match cli.command {
        Commands::PurgeExternalUsers => Task::PurgeExternalUsers,
        Commands::PurgeAllUsers => Task::PurgeAllUsers,
        Commands::PurgeJobs { status } => Task::PurgeJobs(status.into()),
        Commands::PurgeMessages => Task::PurgeMessages,
        Commands::StandardizeExpertise => Task::StandardizeExpertise,
    };
    if task.is_destructive() && !cli.yes {
        bail!("{task:?} deletes data permanently; re-run with --yes to confirm");
    }

    let store = PgStore::connect(&cli.database_url).await?;
    store.migrate().await?;
    let report = maintenance::run(&store, task).await?;
    println!("{report}");
    Ok(())
}
