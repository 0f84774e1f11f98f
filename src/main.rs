use clap::{Args as ClapArgs, Parser, Subcommand};
use dotenvy::dotenv;
use file_blocker::infrastructure::repository::{SeaOrmBlocklist, SeaOrmFileRecords};
use file_blocker::infrastructure::{database, seed};
use file_blocker::{
    Actor, BlockSetProvider, DefenseConfig, FileRecordSink, InMemoryFileRecords, StaticBlockSets,
    UploadError, UploadService,
};
use sea_orm::DatabaseConnection;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload defense pipeline for workspaces", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pre-storage stages on a file and print the verdict
    Check {
        #[command(flatten)]
        target: Target,
    },
    /// Run the full pipeline and store the file under UPLOAD_DIR
    Upload {
        #[command(flatten)]
        target: Target,

        /// Member performing the upload
        #[arg(long, default_value_t = 0)]
        member: i64,
    },
    /// Provision the fixed blocked extensions of a workspace
    Seed {
        #[arg(short, long)]
        workspace: i64,

        #[arg(long, default_value_t = 0)]
        member: i64,

        /// Overrides DATABASE_URL
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct Target {
    #[arg(short, long)]
    workspace: i64,

    /// Blocked extension; repeatable. When given, the database blocklist is ignored
    #[arg(short, long = "block", value_name = "EXT")]
    blocked: Vec<String>,

    /// Overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    /// Name to validate instead of the file's own name
    #[arg(long)]
    name: Option<String>,

    file: PathBuf,
}

/// Exit status for a policy rejection; 1 is left for failures
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_blocker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = DefenseConfig::from_env();
    info!(
        "🛡️  Defense Config: Max Size={}MB, Nesting={}, Files={}, Expanded={}MB, Ratio={}",
        config.max_file_size / 1024 / 1024,
        config.max_archive_nesting_depth,
        config.max_archive_file_count,
        config.max_archive_uncompressed_size / 1024 / 1024,
        config.max_archive_compression_ratio
    );

    match args.command {
        Command::Seed {
            workspace,
            member,
            database_url,
        } => {
            let url = database_url
                .or(config.database_url)
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set to seed"))?;
            let db = database::setup_database(&url).await?;
            let inserted = seed::seed_fixed_extensions(&db, workspace, Actor::new(member)).await?;
            println!("{}", serde_json::json!({ "workspace": workspace, "inserted": inserted }));
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { target } => {
            if target.database_url.is_some() {
                config.database_url = target.database_url.clone();
            }
            let service = build_service(config, &target).await?;
            let (name, size, file) = open_target(&target).await?;

            let outcome = service
                .check_upload(target.workspace, &name, size, file, cancel_on_ctrl_c())
                .await;
            report(outcome)
        }
        Command::Upload { target, member } => {
            if target.database_url.is_some() {
                config.database_url = target.database_url.clone();
            }
            let service = build_service(config, &target).await?;
            let (name, size, file) = open_target(&target).await?;

            let outcome = service
                .upload_file_cancellable(
                    target.workspace,
                    &name,
                    size,
                    file,
                    Actor::new(member),
                    cancel_on_ctrl_c(),
                )
                .await;
            report(outcome)
        }
    }
}

async fn build_service(config: DefenseConfig, target: &Target) -> anyhow::Result<UploadService> {
    let db: Option<DatabaseConnection> = match &config.database_url {
        Some(url) => Some(database::setup_database(url).await?),
        None => None,
    };

    let blocklist: Arc<dyn BlockSetProvider> = match &db {
        Some(db) if target.blocked.is_empty() => Arc::new(SeaOrmBlocklist::new(db.clone())),
        _ => Arc::new(StaticBlockSets::with_workspace(
            target.workspace,
            &target.blocked,
        )),
    };
    let records: Arc<dyn FileRecordSink> = match db {
        Some(db) => Arc::new(SeaOrmFileRecords::new(db)),
        None => Arc::new(InMemoryFileRecords::new()),
    };

    Ok(UploadService::new(config, blocklist, records))
}

async fn open_target(target: &Target) -> anyhow::Result<(String, u64, tokio::fs::File)> {
    let name = match &target.name {
        Some(name) => name.clone(),
        None => file_name(&target.file),
    };
    let file = tokio::fs::File::open(&target.file).await?;
    let size = file.metadata().await?.len();
    Ok((name, size, file))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("⌨️  Ctrl+C received, cancelling validation...");
            child.cancel();
        }
    });
    token
}

fn report<T: serde::Serialize>(outcome: Result<T, UploadError>) -> anyhow::Result<ExitCode> {
    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.kind().is_policy() => {
            println!("{}", serde_json::to_string_pretty(&e.to_rejection())?);
            Ok(ExitCode::from(EXIT_REJECTED))
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&e.to_rejection())?);
            Ok(ExitCode::FAILURE)
        }
    }
}
