mod cli;

use std::process;
use std::sync::Arc;

use clap::Parser;
use hls_capture::{HttpSegmentFetcher, PlaylistHandle, SessionMode, SessionStatus, Transcoder};
use kick_archiver::config::AppConfig;
use kick_archiver::fetch::{FetchJob, fetch_once};
use kick_archiver::history::ArchiveHistory;
use kick_archiver::logging::{LogOptions, init_logging};
use kick_archiver::monitor::MonitorContext;
use kick_archiver::scheduler::ChannelScheduler;
use kick_archiver::source::KickSource;
use kick_archiver::{Error, Result, panic_hook};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Args, Commands};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "Fatal error");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok())?;
    args.command.apply_overrides(&mut config);
    config.validate(args.command.run_mode())?;

    let log_options = LogOptions::from_settings(&config.log, args.verbose, args.quiet);
    let _log_guard = init_logging(&log_options)?;
    panic_hook::install();

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    match args.command {
        Commands::Watch { .. } => watch(config, token).await,
        Commands::Fetch {
            url,
            name,
            channel,
            live,
            ..
        } => {
            let mode = if live {
                SessionMode::Live
            } else {
                SessionMode::Static
            };
            let mut job = FetchJob::new(PlaylistHandle::new(url), mode);
            job.name = name;
            job.channel = channel;
            fetch(config, job, token).await
        }
    }
}

async fn watch(config: AppConfig, token: CancellationToken) -> Result<()> {
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let http = config.http_config();
    let source = KickSource::new(&http)?;
    let fetcher = HttpSegmentFetcher::from_config(&http, config.retry_policy())?;
    let history = ArchiveHistory::load(&config.output_dir).await;

    let mut ctx = MonitorContext::new(Arc::new(source), Arc::new(fetcher), Arc::new(history));
    if let Some(transcoder) = config.transcoder() {
        ctx = ctx.with_transcoder(Arc::new(transcoder));
    }

    let mut scheduler = ChannelScheduler::new(
        ctx,
        config.monitor_config(),
        config.scheduler_config(),
        token.clone(),
    );
    for channel in config.channels() {
        scheduler.add_channel(channel)?;
    }
    info!(
        channels = scheduler.len(),
        output = %config.output_dir.display(),
        poll_secs = config.monitor.poll_interval_secs,
        convert = config.transcode.enabled,
        "Watching channels"
    );

    token.cancelled().await;
    let report = scheduler.shutdown().await;
    if report.forced > 0 {
        warn!(forced = report.forced, "Some monitors had to be aborted");
    }
    Ok(())
}

async fn fetch(config: AppConfig, mut job: FetchJob, token: CancellationToken) -> Result<()> {
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let http = config.http_config();
    let source = KickSource::new(&http)?;
    let fetcher = HttpSegmentFetcher::from_config(&http, config.retry_policy())?;

    let url = job.playlist.url().clone();
    let variants = source.variants(&url, &config.quality).await;
    job.playlist = job.playlist.with_variants(variants);
    job.quality = config.quality.clone();

    let transcoder = config
        .transcoder()
        .map(|t| Arc::new(t) as Arc<dyn Transcoder>);
    let report = fetch_once(
        job,
        &config.monitor_config(),
        Arc::new(fetcher),
        transcoder,
        token,
    )
    .await?;

    if report.status == SessionStatus::Failed {
        return Err(Error::Incomplete(format!(
            "{} segments written to {}",
            report.segments_written,
            report.media_path.display()
        )));
    }
    Ok(())
}

async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C; shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM; shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl-C; shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C; shutting down");
    }
    token.cancel();
}
