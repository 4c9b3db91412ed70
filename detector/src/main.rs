mod commands;
mod dispatch;
mod motion;
mod retention;
mod runner;
mod source;
mod stats;
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use motion_watch_common::config::Config;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use dispatch::{BucketStore, DispatchQueue, EncodeSettings, LocalSink, Sink, SlackClient, StatsReport};
use motion::MotionPipeline;
use retention::RetentionPolicy;
use runner::StreamRunner;
use source::{AnySource, FrameSource};
use stats::SessionStats;
use status::PipelineStatus;

#[derive(Parser, Debug)]
#[command(name = "motion-watch", version, about = "Camera motion detection with capture dispatch")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "MOTION_WATCH_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the detection loop (default).
    Run,
    /// Print the effective configuration with secrets masked.
    ShowConfig,
    /// Verify the camera, capture folder, bucket and Slack credentials.
    Check,
    /// List the most recent captures, newest first.
    Captures {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run one retention pass now.
    Cleanup,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let code = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::ShowConfig => match commands::show_config(&config) {
            Ok(out) => {
                print!("{out}");
                0
            }
            Err(e) => {
                eprintln!("Failed to render config: {e}");
                1
            }
        },
        Command::Check => {
            let results = commands::check(&config).await;
            for result in &results {
                println!("{}", result.line());
            }
            i32::from(results.iter().any(|r| r.outcome.is_err()))
        }
        Command::Captures { limit } => match commands::list_captures(&config, limit).await {
            Ok(lines) if lines.is_empty() => {
                println!("no captures");
                0
            }
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                0
            }
            Err(e) => {
                eprintln!("Failed to list captures: {e}");
                1
            }
        },
        Command::Cleanup => {
            let report = commands::cleanup(&config).await;
            println!(
                "deleted {} local and {} bucket captures",
                report.local_deleted, report.bucket_deleted
            );
            0
        }
    };
    std::process::exit(code);
}

/// The long-running detection service. Returns the process exit code.
async fn run(config: Config) -> i32 {
    let mut source = match AnySource::from_config(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid camera configuration");
            return 1;
        }
    };
    let described = source.describe();

    info!(
        source = described,
        threshold = config.detection.motion_threshold,
        min_area = config.detection.min_detect_area,
        interval_secs = config.detection.capture_interval_secs,
        captures_folder = config.storage.captures_folder,
        bucket = config.bucket.as_ref().map(|b| b.bucket.as_str()),
        slack = config.slack.is_some(),
        "starting motion-watch"
    );

    let stats = Arc::new(SessionStats::default());
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let (status_tx, status_rx) = watch::channel(PipelineStatus::default());

    // Stop on Ctrl-C.
    {
        let stop_tx = Arc::clone(&stop_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                stop_tx.send_replace(true);
            }
        });
    }

    let bucket = match &config.bucket {
        Some(b) => {
            let store = BucketStore::new(b).await;
            if let Err(e) = store.check().await {
                warn!(error = %e, "bucket check failed, uploads may fail");
            }
            Some(store)
        }
        None => None,
    };
    let slack = config.slack.as_ref().map(SlackClient::new);
    let lifecycle = config
        .slack
        .as_ref()
        .filter(|s| s.notify_lifecycle)
        .and(slack.clone());

    // Dispatch worker
    let mut sinks = vec![Sink::Local(LocalSink::new(&config.storage.captures_folder))];
    if let Some(store) = &bucket {
        sinks.push(Sink::Bucket(store.clone()));
    }
    if let Some(client) = &slack {
        sinks.push(Sink::Slack(client.clone()));
    }
    let report = match (&config.slack, &slack) {
        (Some(cfg), Some(client)) if cfg.stats_interval_secs > 0 => Some(StatsReport {
            client: client.clone(),
            every: Duration::from_secs(cfg.stats_interval_secs),
        }),
        _ => None,
    };
    let (queue, rx) = DispatchQueue::new(config.dispatch.queue_capacity, Arc::clone(&stats));
    let settings = EncodeSettings {
        ext: config.storage.image_ext.clone(),
        jpeg_quality: config.storage.jpeg_quality,
    };
    let worker = tokio::spawn(dispatch::run_worker(rx, sinks, settings, Arc::clone(&stats), report));

    // Retention
    let policy = RetentionPolicy::from_days(
        config.storage.retention_days,
        config.bucket.as_ref().map(|b| b.retention_days),
    );
    let retention = {
        let folder = PathBuf::from(&config.storage.captures_folder);
        let bucket = bucket.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move {
            retention::run_retention_loop(policy, &folder, bucket.as_ref(), stop).await;
        })
    };

    // Status endpoint
    let status_server = config.status.as_ref().map(|s| {
        let bind = s.bind.clone();
        let status_rx = status_rx.clone();
        let source_name = described.clone();
        let stop = stop_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(&bind, status_rx, source_name, stop).await {
                error!(bind, error = %e, "status endpoint failed");
            }
        })
    });

    // Announce startup only once the camera has actually opened.
    let (open_tx, open_rx) = oneshot::channel::<String>();
    let startup = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            if let (Ok(described), Some(client)) = (open_rx.await, lifecycle) {
                client.notify(&dispatch::slack::startup_text(&described)).await;
            }
        })
    };

    let mut runner = StreamRunner::new(
        MotionPipeline::new(&config.detection),
        queue,
        Arc::clone(&stats),
        status_tx,
        Duration::from_secs(config.camera.read_timeout_secs),
    )
    .notify_open(open_tx);
    let result = runner.run(&mut source, stop_rx).await;

    // Dropping the runner drops the queue sender so the worker can drain.
    drop(runner);
    stop_tx.send_replace(true);
    if let Err(e) = worker.await {
        warn!(error = %e, "dispatch worker panicked");
    }
    let _ = startup.await;

    let code = match result {
        Ok(reason) => {
            info!(?reason, "detection loop finished");
            0
        }
        Err(e) => {
            error!(error = %e, "detection loop failed");
            if let Some(client) = &lifecycle {
                client.notify(&dispatch::slack::error_text(&e.to_string())).await;
            }
            1
        }
    };

    let snapshot = stats.snapshot();
    info!(
        frames = snapshot.frames,
        detections = snapshot.detections,
        captures = snapshot.captures,
        dropped = snapshot.dropped,
        delivered = snapshot.delivered,
        "session summary"
    );
    if let Some(client) = &lifecycle {
        client.notify(&dispatch::slack::shutdown_text(&snapshot)).await;
    }

    let _ = retention.await;
    if let Some(server) = status_server {
        let _ = server.await;
    }
    code
}
