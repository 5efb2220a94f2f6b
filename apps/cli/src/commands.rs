//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use storyreel_compose::ComposeSettings;
use storyreel_core::{
    ProgressReporter, RunCancellation, RunOutput, RunState, ServiceKeys, StoryReel,
};
use storyreel_planner::{NarrativePlanner, TextBackend};
use storyreel_shared::{
    AppConfig, ImageProvider, PipelineConfig, SpeechProvider, StoryDocument, TextProvider,
    init_config, load_config, load_config_from, resolve_api_key,
};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// StoryReel: turn a one-line idea into a narrated, illustrated video.
#[derive(Parser)]
#[command(
    name = "storyreel",
    version,
    about = "Turn a one-line story idea into a narrated, illustrated short video.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.storyreel/storyreel.toml.
    #[arg(long, global = true, env = "STORYREEL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Plan, illustrate, narrate and render a video for an idea.
    Create {
        /// The story idea, in one line.
        idea: String,

        /// Output directory (defaults to `[defaults].output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Render without burned-in captions.
        #[arg(long)]
        no_captions: bool,

        /// Use the offline mock services for text, images and speech.
        #[arg(long)]
        offline: bool,
    },

    /// Plan a story and print it as JSON without generating assets.
    Plan {
        /// The story idea, in one line.
        idea: String,

        /// Use the offline mock text service.
        #[arg(long)]
        offline: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "storyreel=info",
        1 => "storyreel=debug",
        _ => "storyreel=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Create {
            idea,
            out,
            no_captions,
            offline,
        } => {
            let overrides = Overrides {
                out,
                no_captions,
                offline,
            };
            cmd_create(config_path, &idea, &overrides).await
        }
        Command::Plan { idea, offline } => {
            let overrides = Overrides {
                offline,
                ..Overrides::default()
            };
            cmd_plan(config_path, &idea, &overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Flag values that take precedence over the config file.
#[derive(Debug, Default)]
struct Overrides {
    out: Option<PathBuf>,
    no_captions: bool,
    offline: bool,
}

fn resolve_config(path: Option<PathBuf>, overrides: &Overrides) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => load_config_from(&p)?,
        None => load_config()?,
    };
    apply_overrides(&mut config, overrides);
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, overrides: &Overrides) {
    if let Some(out) = &overrides.out {
        config.defaults.output_dir = out.to_string_lossy().into_owned();
    }
    if overrides.no_captions {
        config.defaults.captions = false;
    }
    if overrides.offline {
        config.planner.provider = TextProvider::Mock;
        config.image.provider = ImageProvider::Mock;
        config.narration.provider = SpeechProvider::Mock;
    }
}

/// Resolve API keys for every remote provider. Mock providers need none.
fn resolve_keys(config: &AppConfig) -> Result<ServiceKeys> {
    let text = match config.planner.provider {
        TextProvider::Mock => None,
        TextProvider::OpenAi => Some(resolve_api_key(&config.planner.api_key_env, "Planner")?),
    };
    let image = match config.image.provider {
        ImageProvider::Mock => None,
        ImageProvider::Stability => Some(resolve_api_key(&config.image.api_key_env, "Image")?),
    };
    let speech = match config.narration.provider {
        SpeechProvider::Mock => None,
        SpeechProvider::OpenAi => {
            Some(resolve_api_key(&config.narration.api_key_env, "Narration")?)
        }
    };
    Ok(ServiceKeys {
        text,
        image,
        speech,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_create(config_path: Option<PathBuf>, idea: &str, overrides: &Overrides) -> Result<()> {
    let config = resolve_config(config_path, overrides)?;
    let keys = resolve_keys(&config)?;

    let controller = StoryReel::from_config(
        &config,
        PipelineConfig::from(&config),
        ComposeSettings::from(&config),
        keys,
    )?;

    info!(
        output_dir = %config.defaults.output_dir,
        captions = config.defaults.captions,
        offline = overrides.offline,
        "creating video"
    );

    let cancel = RunCancellation::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let reporter = CliProgress::new();
    let report = controller.run(idea, &reporter, &cancel).await;
    reporter.finish();

    let elapsed = report.elapsed;
    let output = match report.into_result() {
        Ok(output) => output,
        Err(e) => {
            let kind = e.kind();
            return Err(e).wrap_err(format!("run failed ({kind})"));
        }
    };

    println!();
    println!("  Video created successfully!");
    println!("  Title:    {}", output.story.title);
    println!("  Segments: {}", output.video.segment_count);
    println!("  Duration: {:.1}s", output.video.duration_secs);
    println!("  Manifest: {}", output.manifest_path.display());
    println!("  Time:     {:.1}s", elapsed.as_secs_f64());
    println!();
    println!("{}", output.video.path.display());

    Ok(())
}

async fn cmd_plan(config_path: Option<PathBuf>, idea: &str, overrides: &Overrides) -> Result<()> {
    let config = resolve_config(config_path, overrides)?;
    let key = match config.planner.provider {
        TextProvider::Mock => None,
        TextProvider::OpenAi => Some(resolve_api_key(&config.planner.api_key_env, "Planner")?),
    };

    let planner = NarrativePlanner::new(TextBackend::from_config(&config.planner, key)?);
    let story = planner
        .plan(idea)
        .await
        .map_err(|e| {
            let kind = e.kind();
            color_eyre::eyre::Report::new(e).wrap_err(format!("planning failed ({kind})"))
        })?;

    println!("{}", serde_json::to_string_pretty(&story)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path, &Overrides::default())?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, state: RunState) {
        let message = match state {
            RunState::Planning => "Planning story",
            RunState::AssetGeneration => "Generating images and narration",
            RunState::Composition => "Composing video",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        };
        self.spinner.set_message(message);
    }

    fn story_planned(&self, story: &StoryDocument) {
        self.spinner.set_message(format!(
            "Planned \"{}\" ({} segments, {:.0}s)",
            story.title,
            story.segments.len(),
            story.planned_total_duration_secs
        ));
    }

    fn image_done(&self, index: usize, total: usize) {
        self.spinner
            .set_message(format!("Image ready [{}/{total}]", index + 1));
    }

    fn narration_done(&self, index: usize, total: usize, duration_secs: f64) {
        self.spinner.set_message(format!(
            "Narration ready [{}/{total}] {duration_secs:.1}s",
            index + 1
        ));
    }

    fn done(&self, _output: &RunOutput) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_flags() {
        let cli = Cli::try_parse_from([
            "storyreel",
            "create",
            "a lonely lighthouse keeper befriends a whale",
            "--out",
            "videos",
            "--no-captions",
            "--offline",
            "--log-format",
            "json",
        ])
        .expect("parse");

        assert!(matches!(cli.log_format, LogFormat::Json));
        match cli.command {
            Command::Create {
                idea,
                out,
                no_captions,
                offline,
            } => {
                assert_eq!(idea, "a lonely lighthouse keeper befriends a whale");
                assert_eq!(out, Some(PathBuf::from("videos")));
                assert!(no_captions);
                assert!(offline);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            &Overrides {
                out: Some(PathBuf::from("videos")),
                no_captions: true,
                offline: true,
            },
        );

        assert_eq!(config.defaults.output_dir, "videos");
        assert!(!config.defaults.captions);
        assert_eq!(config.planner.provider, TextProvider::Mock);
        assert_eq!(config.image.provider, ImageProvider::Mock);
        assert_eq!(config.narration.provider, SpeechProvider::Mock);
    }

    #[test]
    fn offline_needs_no_keys() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            &Overrides {
                offline: true,
                ..Overrides::default()
            },
        );
        let keys = resolve_keys(&config).expect("no keys needed");
        assert!(keys.text.is_none() && keys.image.is_none() && keys.speech.is_none());
    }
}
