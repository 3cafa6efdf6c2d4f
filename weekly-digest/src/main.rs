use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use weekly_digest::store::Store;
use weekly_digest::version::{load_descriptor, BroadcastOutcome};
use weekly_digest::{App, AppConfig, RunSummary, Trigger};

#[derive(Parser)]
#[command(name = "weekly-digest", version, about = "Weekly AI report bot: collect, summarize, broadcast")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the chat front-end until interrupted (default)
    Serve,
    /// Run the weekly digest once, right now
    RunNow {
        /// Generate and print the report without sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Send the latest report to one subscribed chat
    Preview {
        #[arg(long)]
        chat_id: String,
    },
    /// List registered subscribers
    Subscribers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "weekly_digest=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(App::build(config)?).await?;
            0
        }
        Command::RunNow { dry_run } => run_now(App::build(config)?, dry_run).await,
        Command::Preview { chat_id } => {
            let app = App::build(config)?;
            report(app.orchestrator.run(Trigger::Manual(chat_id)).await)
        }
        Command::Subscribers => {
            let store = Store::open(&config.data_dir, config.dedup.history_cap);
            for subscriber in store.subscribers.all() {
                println!(
                    "{}\t{}\t{}\t{}",
                    subscriber.id,
                    subscriber.display_name.unwrap_or_default(),
                    subscriber.username.map(|u| format!("@{}", u)).unwrap_or_default(),
                    subscriber.joined_at.format("%Y-%m-%d")
                );
            }
            println!("{} subscriber(s)", store.subscribers.count());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn serve(app: App) -> Result<()> {
    info!("Starting weekly digest service");

    match load_descriptor(&app.config.version_file) {
        Ok(descriptor) => match app.version_broadcast().check_and_broadcast(&descriptor).await {
            Ok(BroadcastOutcome::Broadcast { previous, delivery }) => info!(
                "Announced {} (was {}) to {} subscriber(s)",
                descriptor.version,
                previous,
                delivery.tally().fully_delivered
            ),
            Ok(_) => {}
            Err(e) => warn!("Version check failed: {}", e),
        },
        Err(e) => warn!("No usable version descriptor at {}: {}", app.config.version_file.display(), e),
    }

    let scheduler = app.scheduler(Local::now().naive_local());
    for (job, next) in scheduler.next_runs() {
        info!("Next {}: {}", job, next);
    }
    let bot = app.bot();

    tokio::select! {
        _ = scheduler.run_forever() => {}
        _ = bot.run_forever() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
    }
    Ok(())
}

async fn run_now(app: App, dry_run: bool) -> i32 {
    if dry_run {
        return report(app.orchestrator.run(Trigger::DryRun).await);
    }
    let fallback = &app.config.telegram.fallback_chat_ids;
    let chat_override = if app.store.subscribers.count() == 0 && !fallback.is_empty() {
        info!("No subscribers yet, sending to TELEGRAM_CHAT_ID instead");
        Some(fallback.clone())
    } else {
        None
    };
    report(app.orchestrator.run_with_recipients(Trigger::Scheduled, chat_override).await)
}

fn report(result: weekly_digest::Result<RunSummary>) -> i32 {
    match result {
        Ok(summary) => {
            if summary.trigger == Trigger::DryRun {
                println!("{}", summary.report.as_deref().unwrap_or_default());
            }
            println!(
                "{:?}: {}/{} sends ok, {} recipient(s) fully delivered{}",
                summary.status,
                summary.delivery.succeeded(),
                summary.delivery.attempted(),
                summary.tally.fully_delivered,
                if summary.cache_reused { " (cached report)" } else { "" }
            );
            summary.status.exit_code()
        }
        Err(e) => {
            error!("Run failed: {}", e);
            1
        }
    }
}
