//! keymidi - play a MIDI instrument from the computer keyboard
//!
//! Two rows of letter keys become a 37-key piano keyboard sending Note On /
//! Note Off messages to a MIDI output port.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::EventStream;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keymidi::config::{AppConfig, ConfigWatcher};
use keymidi::input::InputTranslator;
use keymidi::output::{MidirBackend, OutputRouter};
use keymidi::paths::AppPaths;
use keymidi::session::Session;
use keymidi::terminal::{KeyReporting, TerminalGuard};
use keymidi::ui::{self, TerminalIndicator};

/// keymidi - Play a MIDI synth from the computer keyboard
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "KEYMIDI_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output port to open at startup (index or part of the name)
    #[arg(short, long)]
    output: Option<String>,

    /// MIDI channel (1-16)
    #[arg(long)]
    channel: Option<u8>,

    /// Note On velocity (1-127)
    #[arg(long)]
    velocity: Option<u8>,

    /// List available MIDI output ports
    #[arg(long)]
    list_ports: bool,

    /// Write a configuration file with the current settings and exit
    #[arg(long)]
    init_config: bool,
}

impl Args {
    /// Command line values win over the config file
    fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(output) = &self.output {
            config.midi.output = Some(output.clone());
        }
        if let Some(channel) = self.channel {
            config.midi.channel = channel;
        }
        if let Some(velocity) = self.velocity {
            config.midi.velocity = velocity;
        }
        config.validate().context("Invalid command line settings")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect(args.config.clone());

    if args.list_ports {
        init_stderr_logging(&args.log_level)?;
        list_ports(&args, &paths).await?;
        return Ok(());
    }

    if args.init_config {
        init_stderr_logging(&args.log_level)?;
        return init_config(&args, &paths).await;
    }

    // The terminal shows the keyboard, so logs go to a file
    paths.ensure_directories()?;
    let _log_guard = init_file_logging(&args.log_level, &paths)?;

    info!("Starting keymidi...");
    info!("Configuration file: {}", paths.config.display());

    let (mut config, config_watcher) = if paths.config.exists() {
        let (watcher, config) = ConfigWatcher::new(paths.config.clone()).await?;
        info!("Configuration loaded successfully with hot-reload enabled");
        (config, Some(watcher))
    } else {
        info!("No configuration file, using defaults");
        (AppConfig::default(), None)
    };
    args.apply_overrides(&mut config)?;

    run_app(&args, config, config_watcher).await?;

    info!("keymidi shutdown complete");
    Ok(())
}

async fn list_ports(args: &Args, paths: &AppPaths) -> Result<()> {
    let mut config = AppConfig::load_or_default(&paths.config)
        .await
        .unwrap_or_else(|e| {
            warn!("Ignoring config file: {:#}", e);
            AppConfig::default()
        });
    args.apply_overrides(&mut config)?;

    let router = open_router(&config);
    ui::print_ports(&router);
    Ok(())
}

async fn init_config(args: &Args, paths: &AppPaths) -> Result<()> {
    if paths.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            paths.config.display()
        );
    }

    let mut config = AppConfig::default();
    args.apply_overrides(&mut config)?;

    paths.ensure_config_dir()?;
    config.save(&paths.config).await?;
    println!("Configuration written to {}", paths.config.display());
    Ok(())
}

fn open_router(config: &AppConfig) -> OutputRouter {
    match MidirBackend::request_access(&config.midi.client_name) {
        Ok(backend) => OutputRouter::new(Box::new(backend)),
        Err(e) => {
            warn!("MIDI access failed: {}", e);
            OutputRouter::inert(e.to_string())
        }
    }
}

async fn run_app(
    args: &Args,
    config: AppConfig,
    mut config_watcher: Option<ConfigWatcher>,
) -> Result<()> {
    info!("Starting main application loop...");

    let router = open_router(&config);

    let reporting = KeyReporting::detect();
    info!("Key reporting: {:?}", reporting);
    let mut translator = InputTranslator::new(reporting.reports_release());
    if translator.tap_mode() {
        warn!("Terminal does not report key releases, falling back to tap mode");
    }

    let _terminal = TerminalGuard::enter(reporting)?;
    ui::print_help(translator.tap_mode());

    let indicator = TerminalIndicator::new();
    let status_printer = indicator.status_printer();
    let mut session = Session::new(
        config.keymap()?,
        router,
        indicator,
        config.note_settings(),
    );
    session.router_mut().subscribe_status(status_printer);

    match config.midi.output.as_deref() {
        Some(pattern) => {
            if let Err(e) = session.select_output_matching(pattern) {
                warn!("Preferred output '{}' not opened: {}", pattern, e);
            }
        }
        None if session.router().list_outputs().next().is_some() => {
            if let Err(e) = session.select_output(0) {
                warn!("First output not opened: {}", e);
            }
        }
        None => info!("No MIDI outputs available yet"),
    }

    let mut events = EventStream::new();
    let mut poll_interval_ms = config.hotplug.poll_interval_ms;
    let mut port_poll = port_poll_interval(poll_interval_ms);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(event)) => {
                    let quit = translator
                        .translate(&event)
                        .into_iter()
                        .any(|command| session.handle(command).is_break());
                    if quit {
                        info!("Quit requested");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Terminal input error: {}", e);
                }
                None => {
                    info!("Terminal input closed");
                    break;
                }
            },

            _ = port_poll.tick() => {
                if session.refresh_outputs() {
                    debug!("Output port list changed");
                }
            }

            Some(mut new_config) = next_reload(&mut config_watcher) => {
                info!("Configuration file changed, reloading...");

                if let Err(e) = args.apply_overrides(&mut new_config) {
                    warn!("Failed to reload config (keeping old config): {:#}", e);
                    continue;
                }
                let keymap = match new_config.keymap() {
                    Ok(keymap) => keymap,
                    Err(e) => {
                        warn!("Failed to reload config (keeping old config): {:#}", e);
                        continue;
                    }
                };

                session.set_note_settings(new_config.note_settings());
                session.replace_keymap(keymap);

                if new_config.hotplug.poll_interval_ms != poll_interval_ms {
                    poll_interval_ms = new_config.hotplug.poll_interval_ms;
                    port_poll = port_poll_interval(poll_interval_ms);
                    debug!("Port poll interval now {} ms", poll_interval_ms);
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let released = session.release_all();
    if released > 0 {
        info!("Released {} held notes on exit", released);
    }
    Ok(())
}

async fn next_reload(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

fn port_poll_interval(ms: u64) -> Interval {
    let mut poll = interval(Duration::from_millis(ms));
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    poll
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

fn init_file_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(&paths.logs_dir, "keymidi.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

fn init_stderr_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
