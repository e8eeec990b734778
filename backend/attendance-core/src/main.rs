use anyhow::{Context, Result};
use attendance_core::clock::{Clock, SystemClock};
use attendance_core::clockify_client::ClockifyClient;
use attendance_core::config::AppConfig;
use attendance_core::device_client::{DeviceSession, ZkBioClient};
use attendance_core::ledger::AttendanceLedger;
use attendance_core::notifier::{Notifier, RetryingNotifier, RocketChatNotifier};
use attendance_core::onsite_poller::{OnSitePoller, CURSOR_SOURCE};
use attendance_core::processed_cache::ProcessedPunchCache;
use attendance_core::remote_poller::RemotePoller;
use attendance_core::report::{MergeReporter, ReportPeriod};
use attendance_core::report_export::export_report;
use attendance_core::scheduler::run_periodic;
use attendance_core::storage::{describe_workbook, CsvWorkbookStore};
use attendance_core::sync_cursor::SyncCursorStore;
use attendance_core::timer_state::RunningTimerState;
use chrono::{FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Reconciles biometric punches and Clockify timers into a daily attendance ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run both pollers until interrupted (default).
    Run,
    /// Run a single on-site polling cycle.
    PollOnsite,
    /// Run a single remote polling cycle.
    PollRemote,
    /// Obtain a fresh device token and print it.
    Token,
    /// Merge both sources for a date range into an xlsx report.
    Report {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, default_value = "weekly")]
        period: ReportPeriod,
        #[arg(long)]
        out: PathBuf,
    },
}

struct Services {
    config: AppConfig,
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
    session: DeviceSession,
    clockify: Arc<ClockifyClient>,
    ledger: Arc<AttendanceLedger>,
}

impl Services {
    fn build(config: AppConfig) -> Result<Self> {
        let offset = config.utc_offset()?;
        let timeout = config.http_timeout();

        let device = Arc::new(
            ZkBioClient::new(&config.device_url, config.jwt_token.clone(), timeout)
                .context("Failed to create device client")?,
        );
        let session = DeviceSession::new(device.clone(), device, config.device_credentials());

        let clockify = Arc::new(
            ClockifyClient::new(
                &config.clockify_base_url,
                &config.clockify_workspace_id,
                &config.clockify_api_key,
                timeout,
            )
            .context("Failed to create Clockify client")?,
        );

        describe_workbook(&config.ledger_path);
        let ledger = Arc::new(AttendanceLedger::new(
            Arc::new(CsvWorkbookStore),
            config.ledger_path.clone(),
        ));

        Ok(Self {
            config,
            offset,
            clock: Arc::new(SystemClock),
            session,
            clockify,
            ledger,
        })
    }

    fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        let chat = RocketChatNotifier::new(
            &self.config.rocket_chat_server_url,
            &self.config.rocket_chat_auth_token,
            &self.config.rocket_chat_user_id,
            &self.config.channel_name,
            self.config.http_timeout(),
        )
        .context("Chat notifier is not configured")?;
        Ok(Arc::new(RetryingNotifier::new(
            Arc::new(chat),
            self.config.retry_policy(),
        )))
    }

    fn onsite_poller(&self, notifier: Arc<dyn Notifier>) -> OnSitePoller {
        OnSitePoller::new(
            self.session.clone(),
            self.ledger.clone(),
            ProcessedPunchCache::new(self.config.processed_punches_path()),
            SyncCursorStore::new(self.config.sync_cursor_path(), CURSOR_SOURCE, self.clock.clone()),
            notifier,
            self.clock.clone(),
            self.offset,
            self.config.overlap(),
        )
    }

    fn remote_poller(&self, notifier: Arc<dyn Notifier>) -> RemotePoller {
        RemotePoller::new(
            self.clockify.clone(),
            self.ledger.clone(),
            RunningTimerState::new(self.config.timer_states_path()),
            notifier,
            self.offset,
            self.config.user_delay(),
        )
    }
}

async fn run_service(services: Services) -> Result<()> {
    let notifier = services.notifier()?;

    if services.config.jwt_token.is_none() {
        match services.session.refresh_token().await {
            Ok(_) => info!("Obtained initial device token"),
            Err(e) => warn!("Could not obtain initial device token, will retry on demand: {}", e),
        }
    }

    let onsite = Arc::new(services.onsite_poller(notifier.clone()));
    let remote = Arc::new(services.remote_poller(notifier));

    let onsite_task = run_periodic("on-site", services.config.onsite_interval(), move || {
        let poller = onsite.clone();
        async move {
            if let Err(e) = poller.run_cycle().await {
                error!("On-site cycle failed: {}", e);
            }
        }
    });
    let remote_task = run_periodic("remote", services.config.remote_interval(), move || {
        let poller = remote.clone();
        async move {
            if let Err(e) = poller.run_cycle().await {
                error!("Remote cycle failed: {}", e);
            }
        }
    });

    tokio::select! {
        _ = onsite_task => {}
        _ = remote_task => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration loaded. Ledger: {}, state: {}",
        config.ledger_path.display(),
        config.state_dir.display()
    );
    let services = Services::build(config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_service(services).await?,
        Commands::PollOnsite => {
            let poller = services
                .onsite_poller(services.notifier()?)
                .propagate_notification_errors(true);
            let summary = poller.run_cycle().await.context("On-site cycle failed")?;
            info!("{:?}", summary);
        }
        Commands::PollRemote => {
            let poller = services
                .remote_poller(services.notifier()?)
                .propagate_notification_errors(true);
            let summary = poller.run_cycle().await.context("Remote cycle failed")?;
            info!("{:?}", summary);
        }
        Commands::Token => {
            let token = services
                .session
                .refresh_token()
                .await
                .context("Failed to obtain device token")?;
            println!("{}", token);
        }
        Commands::Report {
            from,
            to,
            period,
            out,
        } => {
            anyhow::ensure!(from <= to, "--from {} is after --to {}", from, to);
            let reporter = MergeReporter::new(services.session.clone(), services.clockify.clone(), services.offset);
            let report = reporter
                .build(from, to, period)
                .await
                .context("Failed to build report")?;
            export_report(&report, &out)
                .with_context(|| format!("Failed to write report to {}", out.display()))?;
            println!("Report written to {}", out.display());
        }
    }
    Ok(())
}
