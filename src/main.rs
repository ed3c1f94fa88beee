use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pumpkin::artifacts::ArtifactStore;
use pumpkin::browser::webdriver::WebDriverBrowser;
use pumpkin::browser::DriverTester;
use pumpkin::config::{load_url_file, Settings};
use pumpkin::coordinator::{RunContext, RunCoordinator, RunOutcome};
use pumpkin::ingest::Ingestor;
use pumpkin::reconciler::Reconciler;
use pumpkin::repository::{
    create_pool, migrations, RunRepository, SqlitePool, UrlTestRepository,
};
use pumpkin::scheduler::{run_batch, SchedulerConfig, UrlTester};

/// Grace period for in-flight jobs after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pumpkin", version, about = "Batch web performance measurement")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch over a URL list file.
    Run {
        /// Text file with one URL per line.
        #[arg(long, value_name = "FILE")]
        urls: PathBuf,
        /// Parallel browser workers.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Free-form note stored on the run.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Measure a single URL (defaults to TEST_URL).
    Test {
        /// Target URL; falls back to the TEST_URL environment variable.
        url: Option<String>,
    },
    /// Serve the read API.
    Serve,
    /// Remove artifact directories no database row references.
    Clean {
        /// Report orphans without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },
}

struct App {
    settings: Settings,
    pool: SqlitePool,
    coordinator: RunCoordinator,
    ingestor: Ingestor,
    store: ArtifactStore,
}

impl App {
    async fn bootstrap(settings: Settings) -> anyhow::Result<Self> {
        settings.ensure_directories()?;
        let pool = create_pool(&settings.database_url);
        migrations::run_migrations(&pool).await?;

        let runs = RunRepository::new(pool.clone());
        let tests = UrlTestRepository::new(pool.clone());
        Ok(Self {
            coordinator: RunCoordinator::new(runs),
            ingestor: Ingestor::new(tests),
            store: ArtifactStore::new(settings.test_history_dir()),
            pool,
            settings,
        })
    }

    fn tester(&self) -> anyhow::Result<Arc<dyn UrlTester>> {
        let browser = WebDriverBrowser::new(&self.settings.webdriver_url, &self.settings.browser)
            .map_err(|e| anyhow::anyhow!("browser setup failed: {e}"))?;
        Ok(Arc::new(DriverTester::new(Arc::new(browser))))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match run_command(cli.command, settings).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_command(command: Command, settings: Settings) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run {
            urls,
            workers,
            notes,
        } => {
            let url_list = load_url_file(&urls)?;
            let app = App::bootstrap(settings).await?;
            run_batch_command(&app, url_list, workers, notes).await
        }
        Command::Test { url } => {
            let target = url
                .or_else(|| settings.test_url.clone())
                .ok_or_else(|| anyhow::anyhow!("no URL given and TEST_URL is not set"))?;
            let app = App::bootstrap(settings).await?;
            run_single_test(&app, target).await
        }
        Command::Serve => {
            let app = App::bootstrap(settings).await?;
            pumpkin::server::serve(&app.settings, app.pool.clone()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Clean { dry_run } => {
            let app = App::bootstrap(settings).await?;
            let reconciler = Reconciler::new(
                app.pool.clone(),
                UrlTestRepository::new(app.pool.clone()),
                app.store.clone(),
            );
            let report = reconciler.clean(dry_run).await?;
            println!(
                "kept {}, orphans {}, deleted {}{}",
                report.kept,
                report.orphans.len(),
                report.deleted,
                if report.dry_run { " (dry run)" } else { "" }
            );
            for orphan in &report.orphans {
                println!("orphan: {orphan}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_batch_command(
    app: &App,
    urls: Vec<String>,
    workers: usize,
    notes: Option<String>,
) -> anyhow::Result<ExitCode> {
    let tester = app.tester()?;
    let (run_id, run_uuid) = app
        .coordinator
        .create_run(urls.len() as i64, workers as i64, notes)
        .await?;
    info!(run_id, %run_uuid, urls = urls.len(), workers, "batch starting");

    let config = SchedulerConfig {
        workers,
        ..Default::default()
    };
    let started = tokio::time::Instant::now();
    let batch = run_batch(run_id, &urls, &config, tester, &app.store, &app.ingestor);
    tokio::pin!(batch);

    let report = tokio::select! {
        report = &mut batch => Some(report?),
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id, "interrupt received, draining in-flight jobs");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut batch).await {
                Ok(report) => Some(report?),
                Err(_) => None,
            }
        }
    };

    match report {
        Some(report) => {
            app.coordinator
                .finalize_run(run_id, report.duration_ms, report.outcome)
                .await?;
            info!(
                run_id,
                passed = report.passed,
                failed = report.failed,
                duration_ms = report.duration_ms,
                "batch finished"
            );
            Ok(if report.outcome == RunOutcome::AllPassed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        None => {
            let elapsed = started.elapsed().as_millis() as i64;
            app.coordinator.abort_run(run_id, elapsed).await?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_single_test(app: &App, url: String) -> anyhow::Result<ExitCode> {
    let tester = app.tester()?;
    let context = app
        .coordinator
        .ensure_run_context(None, app.settings.test_run_id)
        .await?;
    let run_id = context.run_id();

    let urls = vec![url];
    let config = SchedulerConfig {
        workers: 1,
        ..Default::default()
    };
    let report = run_batch(run_id, &urls, &config, tester, &app.store, &app.ingestor).await?;

    // A run we created exists only for this test; attached runs are
    // finalized by their owning scheduler.
    if let RunContext::Created(_) = context {
        app.coordinator
            .finalize_run(run_id, report.duration_ms, report.outcome)
            .await?;
    }

    Ok(if report.outcome == RunOutcome::AllPassed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
