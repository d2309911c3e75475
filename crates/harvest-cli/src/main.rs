//! Harvest CLI — entry point.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::StreamExt;

use harvest::{FetchConfig, Harvest, HttpFetcher};
use harvest_cli::config::{load_schema, load_source, parse_delay, resolve_timeout_ms, resolve_user_agent};

#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Extract structured data from HTML with a JSON selector schema",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// URL to fetch, or path to an HTML file.
    source: Option<String>,

    /// Path to the JSON schema file.
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Scope selector the schema is resolved within.
    #[arg(long)]
    scope: Option<String>,

    /// Selector of the next page link, e.g. `a.next@href`.
    #[arg(short, long)]
    paginate: Option<String>,

    /// Maximum number of pages, counting the first.
    #[arg(short, long)]
    limit: Option<usize>,

    /// Validate the schema before fetching anything.
    #[arg(long)]
    strict: bool,

    /// Write the result to a file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print page fragments as they complete.
    #[arg(long)]
    stream: bool,

    /// Base URL for relative links when reading a local file.
    #[arg(long)]
    base_url: Option<String>,

    /// Request timeout in milliseconds. Also reads HARVEST_TIMEOUT_MS.
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum requests in flight.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Delay before each request in ms: `500` or a range `200-800`.
    #[arg(long)]
    delay: Option<String>,

    /// User agent. Also reads HARVEST_USER_AGENT.
    #[arg(long)]
    user_agent: Option<String>,

    /// Report errors as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   harvest completions bash > ~/.local/share/bash-completion/completions/harvest
    ///   harvest completions zsh > ~/.zfunc/_harvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(Commands::Completions { shell }) = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "harvest", &mut std::io::stdout());
        return;
    }

    let json_errors = cli.json;
    if let Err(e) = run(cli).await {
        if json_errors {
            let kind = e
                .downcast_ref::<harvest::Error>()
                .map(|err| format!("{:?}", err.kind()).to_lowercase())
                .unwrap_or_else(|| "cli".to_string());
            let report = serde_json::json!({
                "error": {
                    "kind": kind,
                    "message": format!("{e:#}"),
                }
            });
            println!("{report}");
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(source) = cli.source.as_deref() else {
        anyhow::bail!("missing <SOURCE>: pass a URL or an HTML file");
    };
    let Some(schema_path) = cli.schema.as_deref() else {
        anyhow::bail!("missing --schema <FILE>");
    };

    let mut fetch = FetchConfig::default();
    if let Some(ms) = resolve_timeout_ms(cli.timeout)? {
        fetch.timeout_ms = ms;
    }
    if let Some(ua) = resolve_user_agent(cli.user_agent.as_deref()) {
        fetch.user_agent = ua;
    }
    if let Some(n) = cli.concurrency {
        fetch.concurrency = n;
    }
    if let Some(delay) = cli.delay.as_deref() {
        fetch.delay_ms = Some(parse_delay(delay)?);
    }
    tracing::debug!(?fetch, "fetch configuration");

    let engine = Harvest::builder()
        .strict(cli.strict)
        .fetcher(HttpFetcher::new(fetch))
        .build();

    let schema = load_schema(schema_path, cli.scope.as_deref(), &engine)?;
    let source = load_source(source, cli.base_url.as_deref())?;

    let mut crawl = engine.crawl(source, schema);
    if let Some(selector) = cli.paginate.as_deref() {
        crawl = crawl.paginate(selector);
    }
    if let Some(limit) = cli.limit {
        crawl = crawl.limit(limit);
    }

    if let Some(path) = cli.output.as_deref() {
        crawl
            .write(path)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
    } else if cli.stream {
        let mut stdout = std::io::stdout();
        let mut chunks = crawl.stream();
        while let Some(chunk) = chunks.next().await {
            stdout.write_all(chunk?.as_bytes())?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    } else {
        let value = crawl.run().await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    }

    Ok(())
}
