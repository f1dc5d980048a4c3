//! narramix - Main entry point
//!
//! Command-line front end for the mixing engine: probe durations, render a
//! finished mix, or play it interactively with commands read from stdin.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use narramix_common::config::ConfigResolver;
use narramix_common::human_time::format_clock;
use narramix_common::settings::SettingsStore;
use narramix_common::PersistedSettings;
use narramix_engine::player::{AudioOutputDevice, CpalOutputDevice};
use narramix_engine::probe::{aggregate_duration, DurationProbe, FfprobeDurationProbe};
use narramix_engine::session::{RenderProgress, RenderRequest, RenderSession};
use narramix_engine::{EngineConfig, MixSettings, MixSource, Outcome, PlaybackController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Length of a preview when none is given
const DEFAULT_PREVIEW_SECS: f64 = 30.0;

/// End-of-output polling interval in interactive mode
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Command-line arguments for narramix
#[derive(Parser, Debug)]
#[command(name = "narramix")]
#[command(about = "Mix an audiobook with looping background music")]
#[command(version)]
struct Cli {
    /// Config file (overrides NARRAMIX_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Neither read nor write remembered settings
    #[arg(long, global = true)]
    no_settings: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the duration of each file and their total
    Probe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Render the mix to a file
    Render {
        #[command(flatten)]
        mix: MixArgs,

        /// Output file (format follows the extension)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Play the mix, reading commands from stdin
    Play {
        #[command(flatten)]
        mix: MixArgs,

        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        from: f64,
    },
}

#[derive(Args, Debug, Clone)]
struct MixArgs {
    /// Audiobook file; repeat for a multi-file book (played in the given order)
    #[arg(short, long)]
    primary: Vec<PathBuf>,

    /// Folder of MP3 chapters, played in name order
    #[arg(long, conflicts_with = "primary")]
    primary_dir: Option<PathBuf>,

    /// Background music file (looped)
    #[arg(short, long)]
    background: Option<PathBuf>,

    /// Audiobook speed (0.5-2.0)
    #[arg(short, long)]
    speed: Option<f64>,

    /// Audiobook gain in dB
    #[arg(long, allow_hyphen_values = true)]
    primary_gain: Option<f64>,

    /// Background gain in dB
    #[arg(long, allow_hyphen_values = true)]
    background_gain: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = ConfigResolver::new(cli.config.clone()).resolve();
    init_tracing(&toml_config.logging.level);
    let config = EngineConfig::from(&toml_config);
    debug!(ffmpeg = %config.ffmpeg_path.display(), ffprobe = %config.ffprobe_path.display(), "Engine binaries");

    let store = if cli.no_settings {
        None
    } else {
        SettingsStore::default_location()
    };
    let mut persisted = store.as_ref().map(SettingsStore::load).unwrap_or_default();

    match cli.command {
        Command::Probe { files } => probe_files(&config, &files).await,
        Command::Render { mix, output } => {
            let (source, background) = resolve_sources(&mix, &persisted)?;
            let settings = mix_settings(&mix, &persisted);
            remember(&mut persisted, &source, &background, &settings);
            save_settings(store.as_ref(), &persisted);
            render(config, source, background, settings, output).await
        }
        Command::Play { mix, from } => {
            let (source, background) = resolve_sources(&mix, &persisted)?;
            let settings = mix_settings(&mix, &persisted);
            let controller = play(config, source, background, settings, from).await?;

            let settings = controller.settings();
            if let (Some(source), Some(background)) = (controller.primary(), controller.background()) {
                remember(&mut persisted, &source, &background, &settings);
            }
            save_settings(store.as_ref(), &persisted);
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let default_filter = format!(
        "narramix={level},narramix_engine={level},narramix_common={level}",
        level = level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn save_settings(store: Option<&SettingsStore>, settings: &PersistedSettings) {
    if let Some(store) = store {
        if let Err(e) = store.save(settings) {
            warn!("Could not save settings to {}: {}", store.path().display(), e);
        }
    }
}

/// Sources from the command line, falling back to the remembered selection
fn resolve_sources(mix: &MixArgs, persisted: &PersistedSettings) -> Result<(MixSource, PathBuf)> {
    let source = if let Some(dir) = &mix.primary_dir {
        MixSource::from_folder(dir)?
    } else if !mix.primary.is_empty() {
        MixSource::from_paths(mix.primary.clone())?
    } else if persisted.auto_reload_files && !persisted.last_primary_files.is_empty() {
        MixSource::Sequence(persisted.last_primary_files.clone())
    } else if let Some(path) = persisted
        .last_primary_path
        .as_ref()
        .filter(|_| persisted.auto_reload_files)
    {
        MixSource::File(path.clone())
    } else {
        bail!("No audiobook given (use --primary or --primary-dir)");
    };

    let background = match &mix.background {
        Some(path) => path.clone(),
        None => match persisted
            .last_background_path
            .as_ref()
            .filter(|_| persisted.auto_reload_files)
        {
            Some(path) => path.clone(),
            None => bail!("No background music given (use --background)"),
        },
    };

    Ok((source, background))
}

fn mix_settings(mix: &MixArgs, persisted: &PersistedSettings) -> MixSettings {
    MixSettings::new(
        mix.speed.unwrap_or(persisted.speed),
        mix.primary_gain.unwrap_or(persisted.primary_gain_db),
        mix.background_gain.unwrap_or(persisted.background_gain_db),
    )
}

fn remember(
    persisted: &mut PersistedSettings,
    source: &MixSource,
    background: &Path,
    settings: &MixSettings,
) {
    persisted.clear_file_paths();
    match source {
        MixSource::File(path) => persisted.last_primary_path = Some(path.clone()),
        MixSource::Sequence(paths) => persisted.last_primary_files = paths.clone(),
    }
    if let Some(dir) = source.paths().first().and_then(|p| p.parent()) {
        persisted.last_primary_dir = Some(dir.to_path_buf());
    }
    persisted.last_background_path = Some(background.to_path_buf());
    persisted.last_background_dir = background.parent().map(Path::to_path_buf);
    persisted.speed = settings.speed();
    persisted.primary_gain_db = settings.primary_gain_db;
    persisted.background_gain_db = settings.background_gain_db;
}

async fn probe_files(config: &EngineConfig, files: &[PathBuf]) -> Result<()> {
    let probe = FfprobeDurationProbe::new(&config.ffprobe_path, config.probe_timeout);
    for file in files {
        match probe.probe(file).await {
            Some(seconds) => println!("{:>10}  {}", format_clock(seconds), file.display()),
            None => println!("{:>10}  {}", "unknown", file.display()),
        }
    }

    let source = MixSource::from_paths(files.to_vec())?;
    let total = aggregate_duration(&probe, &source).await?;
    println!("{:>10}  total ({:.3} s)", format_clock(total), total);
    Ok(())
}

async fn render(
    config: EngineConfig,
    source: MixSource,
    background: PathBuf,
    settings: MixSettings,
    output: PathBuf,
) -> Result<()> {
    let probe = FfprobeDurationProbe::new(&config.ffprobe_path, config.probe_timeout);
    let primary_duration = aggregate_duration(&probe, &source).await?;
    info!(
        "Rendering {} ({}) at {:.2}x to {}",
        source.describe(),
        format_clock(primary_duration),
        settings.speed(),
        output.display()
    );

    let request = RenderRequest {
        primary: source,
        background,
        settings,
        target: output,
        primary_duration,
    };
    let mut session = RenderSession::new(config, request);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling render");
            on_interrupt.cancel();
        }
    });

    let result = session.run(print_progress, cancel).await;
    eprintln!();
    let report = result.context("Render failed")?;

    println!(
        "Export complete: {} ({:.1} MB)",
        report.output.display(),
        report.bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn print_progress(progress: RenderProgress) {
    eprint!("\r{}        ", progress_line(&progress));
}

fn progress_line(progress: &RenderProgress) -> String {
    // Timed updates already carry percent and time left in the message
    if progress.current_seconds.is_some() {
        progress.message.clone()
    } else {
        format!("{:3}% {}", progress.percent, progress.message)
    }
}

fn report(outcome: &Outcome) {
    if outcome.success {
        println!("{}", outcome.message);
    } else {
        println!("Error: {}", outcome.message);
    }
}

/// Run an interactive session; returns the controller for settings capture
async fn play(
    config: EngineConfig,
    source: MixSource,
    background: PathBuf,
    settings: MixSettings,
    from: f64,
) -> Result<PlaybackController> {
    let device: Arc<dyn AudioOutputDevice> =
        Arc::new(CpalOutputDevice::open().context("Failed to open audio output")?);
    let probe: Arc<dyn DurationProbe> = Arc::new(FfprobeDurationProbe::new(
        &config.ffprobe_path,
        config.probe_timeout,
    ));
    let controller = PlaybackController::new(config, device, probe, settings);

    let outcome = controller.set_primary(source).await;
    report(&outcome);
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    let outcome = controller.set_background(background).await;
    report(&outcome);
    if !outcome.success {
        bail!("{}", outcome.message);
    }

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(?event, "Mix event");
        }
    });

    print_help();
    let starter = controller.clone();
    spawn_transport(async move { starter.play(Some(from)).await });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    if !handle_command(&controller, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },

            _ = tick.tick() => {
                if controller.output_finished() {
                    controller.stop().await;
                    println!("End of playback");
                }
            }

            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    controller.stop().await;
    Ok(controller)
}

fn print_help() {
    println!("Commands: play, pause, resume, stop, seek <secs>, speed <x>, gain <db>, bg <db>,");
    println!("          preview [secs], pos, export <file>, cancel, quit");
}

fn parse_number(arg: Option<&str>) -> Option<f64> {
    arg.and_then(|s| s.parse::<f64>().ok())
}

/// Report a session-replacing command when it completes, leaving stdin free
/// so `stop` and `quit` can cut it short
fn spawn_transport<F>(task: F)
where
    F: Future<Output = Outcome> + Send + 'static,
{
    tokio::spawn(async move {
        report(&task.await);
    });
}

/// Handle one command line; `false` ends the session
async fn handle_command(controller: &PlaybackController, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };
    let arg = parts.next();

    let outcome = match (command, parse_number(arg)) {
        ("quit" | "exit" | "q", _) => return false,
        ("help" | "?", _) => {
            print_help();
            return true;
        }
        ("play", _) => {
            let controller = controller.clone();
            spawn_transport(async move { controller.play(None).await });
            return true;
        }
        ("pause", _) => controller.pause(),
        ("resume", _) => {
            let controller = controller.clone();
            spawn_transport(async move { controller.resume().await });
            return true;
        }
        ("stop", _) => controller.stop().await,
        ("seek", Some(secs)) => {
            let controller = controller.clone();
            spawn_transport(async move { controller.seek(secs).await });
            return true;
        }
        ("speed", Some(speed)) => controller.set_speed(speed),
        ("gain", Some(db)) => controller.set_primary_gain(db),
        ("bg", Some(db)) => controller.set_background_gain(db),
        ("preview", secs) => {
            let controller = controller.clone();
            let from = controller.current_position();
            spawn_transport(async move {
                controller
                    .preview(from, secs.unwrap_or(DEFAULT_PREVIEW_SECS))
                    .await
            });
            return true;
        }
        ("pos", _) => {
            // Probing the sources can take a while
            let controller = controller.clone();
            spawn_transport(async move {
                let position = controller.current_position();
                match controller.mixed_duration().await {
                    Ok(total) => Outcome::ok(format!(
                        "{} / {} ({})",
                        format_clock(position),
                        format_clock(total),
                        controller.state()
                    )),
                    Err(_) => Outcome::ok(format!("{} ({})", format_clock(position), controller.state())),
                }
            });
            return true;
        }
        ("export", _) => match arg {
            Some(target) => {
                // Runs alongside playback; `cancel` stops it
                let controller = controller.clone();
                let target = PathBuf::from(target);
                tokio::spawn(async move {
                    let outcome = controller.render(target, print_progress).await;
                    eprintln!();
                    report(&outcome);
                });
                Outcome::ok("Export started")
            }
            None => Outcome::failure("Usage: export <file>"),
        },
        ("cancel", _) => controller.cancel_render(),
        ("seek" | "speed" | "gain" | "bg", None) => {
            Outcome::failure(format!("Usage: {} <number>", command))
        }
        _ => Outcome::failure(format!("Unknown command: {}", command)),
    };

    report(&outcome);
    true
}
