use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kintai_sync::config::Config;
use kintai_sync::database::models::{PunchType, UserIdentity};
use kintai_sync::database::{self, PunchLog, SettingsStore};
use kintai_sync::engine::EngineContext;
use kintai_sync::location::{LocationSource, SharedLocation, StaticLocation};
use kintai_sync::runtime::{Runtime, read_commands};
use kintai_sync::sync::HttpRemoteClient;
use kintai_sync::utils::format::{
    format_day_summary, format_info_message, format_punch_error,
    format_success_message, month_lines,
};
use kintai_sync::utils::time::{Clock, MonthKey, SystemClock, format_datetime};
use kintai_sync::utils::validation::{
    parse_toggle, validate_coordinate, validate_deadline, validate_radius,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kintai-sync", about = "Geofenced attendance punching with offline sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Punch now; the type is decided from today's records unless given
    Punch {
        #[arg(long = "type")]
        punch_type: Option<PunchType>,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Show check-in / check-out state for a day
    Status {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List a month, newest day first
    Month {
        #[arg(long)]
        month: Option<MonthKey>,
    },
    /// Push pending punches and pull the current month once
    Sync,
    /// Show or change punch settings
    Settings {
        #[arg(long, requires = "anchor_lon", allow_hyphen_values = true)]
        anchor_lat: Option<f64>,
        #[arg(long, requires = "anchor_lat", allow_hyphen_values = true)]
        anchor_lon: Option<f64>,
        #[arg(long)]
        radius: Option<f64>,
        #[arg(long)]
        auto: Option<String>,
        #[arg(long)]
        deadline: Option<String>,
    },
    /// Run the punch loop; read `lat,lon` fixes and `punch [type]` commands from stdin
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "kintai_sync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Command::Punch {
            punch_type,
            lat,
            lon,
        } => {
            let location = match lat.zip(lon) {
                Some((lat, lon)) => StaticLocation::at(validate_coordinate(lat, lon)?),
                None => StaticLocation::new(None),
            };
            let ctx = build_context(&config, Arc::new(location)).await?;
            let options = config.runtime_options();
            let executor = options.build_executor(ctx.clone());

            match executor.attempt_punch(punch_type, false).await {
                Ok(outcome) => {
                    println!("{}", format_success_message(&outcome.message()));
                    let reconciler = options.build_reconciler(ctx);
                    match reconciler.push_once().await {
                        Ok(summary) if summary.synced + summary.deduplicated > 0 => {
                            println!("{}", format_info_message("Sent to the server."));
                        }
                        Ok(_) => println!("{}", format_info_message("Saved offline, will sync later.")),
                        Err(e) => println!("{}", format_info_message(&format!("Saved offline: {}", e))),
                    }
                }
                Err(e) => println!("{}", format_punch_error(&e)),
            }
        }
        Command::Status { date } => {
            let ctx = build_context(&config, Arc::new(StaticLocation::default())).await?;
            let date = date.unwrap_or_else(|| ctx.clock.today());
            let summary = ctx.day_summary(date).await?;
            print!("{}", format_day_summary(&summary));

            let pending = ctx.log.count_unsynced().await?;
            if pending > 0 {
                println!("{} punch(es) waiting to sync", pending);
            }
        }
        Command::Month { month } => {
            let ctx = build_context(&config, Arc::new(StaticLocation::default())).await?;
            let today = ctx.clock.today();
            let month = month.unwrap_or_else(|| MonthKey::of(today));
            let records = ctx.log.list_for_month(month).await?;
            println!("{}", month_lines(&records, month, today));
        }
        Command::Sync => {
            let ctx = build_context(&config, Arc::new(StaticLocation::default())).await?;
            let reconciler = config.runtime_options().build_reconciler(ctx.clone());

            let pushed = reconciler.push_once().await?;
            println!(
                "Pushed {} ({} already on server, {} failed)",
                pushed.synced, pushed.deduplicated, pushed.failed
            );
            let pulled = reconciler.pull_once(MonthKey::of(ctx.clock.today())).await?;
            println!(
                "Pulled {} record(s), {} matched local punches",
                pulled.ingested, pulled.matched_local
            );
        }
        Command::Settings {
            anchor_lat,
            anchor_lon,
            radius,
            auto,
            deadline,
        } => {
            let ctx = build_context(&config, Arc::new(StaticLocation::default())).await?;
            let mut settings = ctx.load_settings().await?;

            if let Some((lat, lon)) = anchor_lat.zip(anchor_lon) {
                settings.anchor = Some(validate_coordinate(lat, lon)?);
            }
            if let Some(radius) = radius {
                settings.radius_m = validate_radius(radius)?;
            }
            if let Some(auto) = auto {
                settings.auto_punch_enabled = parse_toggle(&auto)?;
            }
            if let Some(deadline) = deadline {
                settings.punch_deadline = validate_deadline(&deadline)?;
            }
            ctx.save_settings(&settings).await?;

            match settings.anchor {
                Some(a) => println!("Anchor: {:.6}, {:.6}", a.lat, a.lon),
                None => println!("Anchor: not set"),
            }
            println!("Radius: {:.0} m", settings.radius_m);
            println!(
                "Auto punch: {}",
                if settings.auto_punch_enabled { "on" } else { "off" }
            );
            println!("Correction deadline: {}", settings.punch_deadline.format("%H:%M"));
            if let (Some(err), Some(at)) = (&settings.last_sync_error, settings.last_sync_error_at) {
                println!("Last sync error ({}): {}", format_datetime(at), err);
            }
        }
        Command::Run => {
            let location = Arc::new(SharedLocation::new());
            let ctx = build_context(&config, location.clone()).await?;
            let runtime = Runtime::new(ctx, config.runtime_options());
            let handle = runtime.handle();

            tokio::spawn(read_commands(
                BufReader::new(tokio::io::stdin()),
                location,
                handle.clone(),
                |line| println!("{}", line),
            ));

            let shutdown = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.shutdown().await;
                }
            });

            runtime.run().await?;
        }
    }

    Ok(())
}

async fn build_context(config: &Config, location: Arc<dyn LocationSource>) -> Result<EngineContext> {
    let pool = database::create_connection(&config.database_url).await?;
    let remote = HttpRemoteClient::new(
        &config.server_url,
        config.api_token.clone(),
        config.http_timeout,
        config.probe_timeout,
    )?;
    if config.server_url.is_empty() {
        tracing::info!("SERVER_URL not set, punches stay local");
    }

    Ok(EngineContext {
        user: UserIdentity {
            user_id: config.user_id.clone(),
            username: config.username.clone(),
        },
        log: PunchLog::new(pool.clone(), config.username.clone()),
        settings: SettingsStore::new(pool),
        remote: Arc::new(remote),
        location,
        clock: Arc::new(SystemClock) as Arc<dyn Clock>,
    })
}
