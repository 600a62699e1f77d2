use clap::{Parser, Subcommand};
use commit_blog::emails::LogMailer;
use commit_blog::github::GithubCommits;
use commit_blog::tasks::TaskContext;
use commit_blog::{jobs, settings, storage, tasks, web};
use migration::MigratorTrait;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "commit-blog",
    version,
    about = "Publish blog posts from your git commit messages"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server (default)
    Serve,
    /// Run the background task consumer
    Tasks {
        /// Only handle tasks of this kind
        #[arg(long)]
        only: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // background maintenance sweeps
            let _scheduler = jobs::init_scheduler(db.clone()).await?;

            web::serve(
                settings,
                db,
                Arc::new(LogMailer),
                Arc::new(GithubCommits::new()),
            )
            .await?;
        }
        Command::Tasks { only } => {
            let ctx = TaskContext {
                db,
                settings: Arc::new(settings),
                mailer: Arc::new(LogMailer),
            };

            // ctrl-c flips the shutdown channel and the loop drains out
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(true);
                }
            });

            tasks::run(ctx, only, rx).await?;
        }
    }

    Ok(())
}
