use anyhow::{Context, Result, bail};
use callscribe::cli::{Cli, Commands};
use callscribe::config::Config;
use callscribe::engine::command::{CommandAnalyzer, CommandEngine};
use callscribe::error::CallscribeError;
use callscribe::pipeline::{Pipeline, PipelineHandle, scan_unanalyzed, scan_untranscribed};
use callscribe::transcript::{TranscriptParser, normalize_raw};
use callscribe::watch::CompletionDetector;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Check) => check(&config),
        Some(Commands::Parse { file, normalize }) => parse_transcript(&file, normalize),
        Some(Commands::Run { once }) => {
            let _guard = init_logging(&config, cli.quiet, cli.verbose)?;
            run(config, once)
        }
        None => {
            let _guard = init_logging(&config, cli.quiet, cli.verbose)?;
            run(config, false)
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/callscribe/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    Ok(config.with_env_overrides())
}

/// Set up console and daily-rolling file logging. The returned guard must
/// stay alive for the duration of the process or buffered lines are lost.
fn init_logging(
    config: &Config,
    quiet: bool,
    verbose: u8,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fs::create_dir_all(&config.logging.directory).with_context(|| {
        format!(
            "creating log directory {}",
            config.logging.directory.display()
        )
    })?;
    let appender = tracing_appender::rolling::daily(&config.logging.directory, "callscribe.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if quiet {
        registry.init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(guard)
}

/// Validate the configuration and report every problem found.
fn check(config: &Config) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            println!("Configuration OK");
            Ok(())
        }
        Err(errors) => {
            eprintln!("Configuration has {} problem(s):", errors.len());
            for error in &errors {
                eprintln!("  - {error}");
            }
            std::process::exit(1);
        }
    }
}

/// Parse a transcript file and print the segments as JSON.
fn parse_transcript(file: &Path, normalize: bool) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let segments = if normalize {
        let (segments, info) = normalize_raw(&text);
        eprintln!(
            "normalized {} raw segment(s) into {}",
            info.original_segments, info.normalized_segments
        );
        segments
    } else {
        TranscriptParser::new().parse(&text)
    };
    println!("{}", serde_json::to_string_pretty(&segments)?);
    Ok(())
}

fn run(config: Config, once: bool) -> Result<()> {
    if let Err(errors) = config.validate() {
        bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }

    callscribe::sys::install_interrupt_handler();

    let engine = Arc::new(CommandEngine::new(&config.engines.transcribe_command)?);
    let analyzer = Arc::new(CommandAnalyzer::new(&config.engines.analyze_command)?);
    let config = Arc::new(config);

    let handle = Pipeline::new(config.clone(), engine, analyzer).start()?;

    submit_backlog(&config, &handle);

    if once {
        tracing::info!("backlog submitted, draining and exiting");
        handle.stop();
        return Ok(());
    }

    watch_loop(&config, &handle);

    tracing::info!("interrupt received, shutting down");
    handle.stop();
    Ok(())
}

/// Queue files left behind by a previous run, per the monitor switches.
fn submit_backlog(config: &Config, handle: &PipelineHandle) {
    if config.monitor.process_untranscribed_on_start {
        for path in scan_untranscribed(config) {
            if let Err(e) = handle.submit_audio(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to queue backlog audio");
            }
        }
    }
    if config.monitor.process_existing_on_start {
        for path in scan_unanalyzed(config) {
            if let Err(e) = handle.submit_transcript(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to queue backlog transcript");
            }
        }
    }
}

/// Poll the audio directories until interrupted, submitting every promoted
/// recording. Files refused with a full queue are retried on the next poll.
fn watch_loop(config: &Config, handle: &PipelineHandle) {
    let watch_dirs: Vec<PathBuf> = fs::read_dir(&config.paths.base_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path().join("Audio"))
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    if watch_dirs.is_empty() {
        tracing::warn!(
            base_dir = %config.paths.base_dir.display(),
            "no source Audio directories found under base_dir"
        );
    }

    let mut detector = CompletionDetector::new(
        watch_dirs,
        config.monitor.allowed_extensions.clone(),
        Duration::from_secs(config.monitor.completion_threshold_secs),
    );

    let poll_interval = Duration::from_secs(config.monitor.poll_interval_secs);
    let mut pending: Vec<PathBuf> = Vec::new();

    while !callscribe::sys::interrupted() {
        pending.extend(detector.poll_once());

        pending.retain(|path| match handle.submit_audio(path) {
            Ok(()) => false,
            Err(CallscribeError::QueueFull { .. }) => {
                tracing::debug!(path = %path.display(), "transcription queue full, will retry");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to queue audio");
                false
            }
        });

        let deadline = Instant::now() + poll_interval;
        while !callscribe::sys::interrupted() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}
