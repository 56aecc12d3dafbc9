use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use llm_api_benchmark::{
    generate_output_filename, load_config_from_file, parse_concurrency_levels, run_benchmark,
    save_markdown_report, to_json, to_yaml, BenchmarkConfig, BenchmarkReport, ConsoleObserver,
    FailurePolicy, LatencyPolicy, DEFAULT_PROMPT,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "llm-api-benchmark")]
#[command(about = "Throughput and TTFT benchmark for OpenAI-compatible streaming APIs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Base URL of the OpenAI-compatible API (e.g. http://localhost:8000/v1)
    #[arg(long, short = 'u', env = "OPENAI_BASE_URL", global = true)]
    base_url: Option<String>,

    /// API key for authentication
    #[arg(long, short = 'k', env = "OPENAI_API_KEY", default_value = "", global = true)]
    api_key: String,

    /// Model to benchmark (discovered from /models when omitted)
    #[arg(long, short, global = true)]
    model: Option<String>,

    /// Prompt sent with every request
    #[arg(long, short, default_value = DEFAULT_PROMPT, global = true)]
    prompt: String,

    /// Use random prompts of this many words instead of --prompt
    #[arg(long, short, default_value = "0", global = true)]
    num_words: usize,

    /// Comma-separated list of concurrency levels
    #[arg(long, short, default_value = "1,2,4,8,16,32,64,128", global = true)]
    concurrency: String,

    /// Maximum number of tokens to generate per request
    #[arg(long, short = 't', default_value = "512", global = true)]
    max_tokens: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "300", global = true)]
    timeout: u64,

    /// Output format; `table` prints live progress and saves a Markdown report
    #[arg(long, short, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Output directory for the Markdown report
    #[arg(long, short, default_value = "output", global = true)]
    output_dir: String,

    /// Skip saving the Markdown report
    #[arg(long, global = true)]
    no_save: bool,

    /// Keep benchmarking the remaining levels when one fails
    #[arg(long, global = true)]
    continue_on_failure: bool,

    /// Run with a zero latency baseline if calibration fails
    #[arg(long, global = true)]
    allow_zero_latency: bool,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a benchmark from a YAML config file
    Scenario {
        /// Path to the YAML config file
        #[arg(required = true)]
        file: String,
    },
    /// Run a benchmark from command-line options (default behavior)
    Run,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl Args {
    fn to_config(&self) -> Result<BenchmarkConfig> {
        let base_url = self
            .base_url
            .clone()
            .ok_or_else(|| anyhow!("--base-url is required"))?;

        let mut config = BenchmarkConfig::new(base_url);
        config.api_key = self.api_key.clone();
        config.model = self.model.clone();
        config.prompt = Some(self.prompt.clone());
        config.num_words = self.num_words;
        config.max_tokens = self.max_tokens;
        config.concurrency = parse_concurrency_levels(&self.concurrency)?;
        config.timeout_secs = self.timeout;
        self.apply_policies(&mut config);
        Ok(config)
    }

    fn apply_policies(&self, config: &mut BenchmarkConfig) {
        if self.continue_on_failure {
            config.failure_policy = FailurePolicy::Continue;
        }
        if self.allow_zero_latency {
            config.latency_policy = LatencyPolicy::AssumeZero;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG takes precedence over --verbose
    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.command {
        Some(Commands::Scenario { file }) => {
            info!("Loading config from: {}", file);
            let mut config = load_config_from_file(file)?;
            args.apply_policies(&mut config);
            config
        }
        Some(Commands::Run) | None => args.to_config()?,
    };

    info!(
        "Target: {} (model: {})",
        config.base_url,
        config.model.as_deref().unwrap_or("<auto>")
    );

    match args.format {
        OutputFormat::Table => run_table(&args, &config).await,
        OutputFormat::Json => {
            let report = run_benchmark(&config, &mut ()).await?;
            println!("{}", to_json(&report)?);
            Ok(())
        }
        OutputFormat::Yaml => {
            let report = run_benchmark(&config, &mut ()).await?;
            println!("{}", to_yaml(&report)?);
            Ok(())
        }
    }
}

async fn run_table(args: &Args, config: &BenchmarkConfig) -> Result<()> {
    let mut observer = ConsoleObserver::new(true);
    let report: BenchmarkReport = run_benchmark(config, &mut observer).await?;

    println!("\n{}", "=".repeat(112));

    if !args.no_save {
        let output_path = generate_output_filename(&report.model_name, &args.output_dir);
        save_markdown_report(&report, &output_path)?;
        println!("Results saved to: {}", output_path);
    }

    Ok(())
}
