use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use namesake_core::{
    AiConfig, CancellationToken, CleanupScope, EngineError, ExtractionStrategy, FfmpegTool,
    OpenAiClient, ProcessControl, ProcessOptions, ProcessResult, RetryPolicy, Services,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit status after Ctrl-C, as shells report for SIGINT.
const EXIT_INTERRUPTED: u8 = 130;
/// Exit status when the run finished but some files could not be renamed.
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(name = "namesake", version, about = "Rename photos and videos from AI-generated descriptions")]
struct Cli {
    /// Image and video files, or directories containing them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Copy renamed files here instead of renaming in place
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Show the new names without touching any file
    #[arg(short, long)]
    preview: bool,

    /// Video frame strategy: single, multiple or keyframes
    #[arg(long, default_value_t = ExtractionStrategy::Multiple)]
    strategy: ExtractionStrategy,

    /// Frames per video for the multiple strategy
    #[arg(long, default_value_t = 5)]
    frames: usize,

    /// Upper bound on frames for the keyframes strategy
    #[arg(long, default_value_t = 10)]
    max_keyframes: usize,

    /// Maximum frames sent in one request
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Estimated token budget per request
    #[arg(long, default_value_t = 16_000)]
    token_budget: usize,

    /// Estimated tokens per image
    #[arg(long, default_value_t = 765)]
    tokens_per_frame: usize,

    /// Replace the built-in instruction sent with each batch
    #[arg(long)]
    prompt: Option<String>,

    /// Total attempts per batch before giving up
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Base delay between attempts; attempt n waits n times this
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Concurrent frame extraction calls while extracting one video
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Maximum length of a new file stem
    #[arg(long, default_value_t = 80)]
    max_name_length: usize,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "NAMESAKE_ENDPOINT", default_value = "https://api.openai.com/v1")]
    endpoint: String,

    #[arg(long, env = "NAMESAKE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "NAMESAKE_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Print the outcomes and statistics as JSON on stdout
    #[arg(long)]
    json: bool,

    /// More logging (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> ProcessOptions {
        let mut options = ProcessOptions::new(self.inputs.clone());
        options.recursive = self.recursive;
        options.output_dir = self.output_dir.clone();
        options.preview = self.preview;
        options.strategy = self.strategy;
        options.frame_count = self.frames;
        options.max_keyframes = self.max_keyframes;
        options.max_batch_size = self.batch_size;
        options.max_token_budget = self.token_budget;
        options.avg_tokens_per_frame = self.tokens_per_frame;
        if let Some(prompt) = &self.prompt {
            options.prompt = prompt.clone();
        }
        options.retry = RetryPolicy {
            max_attempts: self.retries,
            base_delay_ms: self.retry_delay_ms,
        };
        options.extract_concurrency = self.concurrency;
        options.max_name_length = self.max_name_length;
        options
    }

    fn ai_config(&self) -> AiConfig {
        AiConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            timeout_secs: self.timeout,
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {prefix} {wide_msg}")?);
    Ok(pb)
}

fn print_summary(result: &ProcessResult, preview: bool) {
    for outcome in &result.outcomes {
        match (&outcome.new_path, &outcome.error) {
            (Some(new_path), None) => {
                let flag = if outcome.degraded { " (uncertain)" } else { "" };
                println!("{} -> {}{}", outcome.original_path.display(), new_path.display(), flag);
            }
            (_, error) => println!(
                "{}: FAILED {}",
                outcome.original_path.display(),
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    let verb = if preview { "Preview" } else { "Done" };
    eprintln!(
        "{}! {} ({:.0}% succeeded)",
        verb,
        result.stats,
        result.stats.success_rate() * 100.0
    );
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    let scope = CleanupScope::new();
    {
        let cancel = cancel.clone();
        let scope = scope.clone();
        ctrlc::set_handler(move || {
            cancel.cancel();
            scope.run_all();
            eprintln!("\nInterrupted, temporary files removed");
            std::process::exit(EXIT_INTERRUPTED.into());
        })?;
    }

    let options = cli.options();
    let tools = FfmpegTool::new(&cli.ffmpeg, &cli.ffprobe);
    let client = OpenAiClient::new(cli.ai_config())?;
    let services = Services {
        extractor: &tools,
        dependencies: &tools,
        analyzer: &client,
    };
    let control = ProcessControl::new()
        .with_cancel_token(cancel)
        .with_cleanup(scope);
    debug!(model = %cli.model, endpoint = %cli.endpoint, "starting run");

    let pb = progress_bar()?;
    let result = namesake_core::process_with_control(&options, services, &control, &|stage, current, total, message| {
        pb.set_length(total);
        pb.set_position(current + 1);
        pb.set_prefix(stage.to_string());
        pb.set_message(message.to_string());
    });
    pb.finish_and_clear();
    let result = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result, cli.preview);
    }

    if result.stats.failed_files > 0 {
        Ok(ExitCode::from(EXIT_PARTIAL))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<EngineError>() {
                Some(EngineError::Cancelled) => ExitCode::from(EXIT_INTERRUPTED),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_flags_map_onto_options() {
        let cli = Cli::parse_from([
            "namesake",
            "photos",
            "--strategy",
            "keyframes",
            "--batch-size",
            "4",
            "--retries",
            "5",
            "--preview",
            "-vv",
        ]);
        let options = cli.options();
        assert_eq!(options.inputs, vec![PathBuf::from("photos")]);
        assert_eq!(options.strategy, ExtractionStrategy::Keyframes);
        assert_eq!(options.max_batch_size, 4);
        assert_eq!(options.retry.max_attempts, 5);
        assert!(options.preview);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let cli = Cli::parse_from(["namesake", "a.jpg"]);
        let from_cli = cli.options();
        let engine = ProcessOptions::new(vec![PathBuf::from("a.jpg")]);
        assert_eq!(from_cli.frame_count, engine.frame_count);
        assert_eq!(from_cli.max_token_budget, engine.max_token_budget);
        assert_eq!(from_cli.retry, engine.retry);
        assert_eq!(from_cli.prompt, engine.prompt);
        assert_eq!(cli.ai_config().timeout_secs, AiConfig::default().timeout_secs);
    }

    #[test]
    fn test_concurrency_help_describes_per_video_frames() {
        let command = Cli::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "concurrency")
            .unwrap();
        let help = arg.get_help().unwrap().to_string();
        assert!(help.contains("one video"));
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["namesake", "a.jpg", "--strategy", "random"]).is_err());
    }
}
