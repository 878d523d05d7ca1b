//! TerraMind CLI
//!
//! Command-line front end for the query pipeline:
//! - `query` / `interpret`: plain-English questions
//! - `run`: structured operation requests (JSON)
//! - `layers` / `templates`: inspect what the pipeline can use
//! - `serve`: the same over HTTP

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use terramind_core::{GeoError, OperationRequest};
use terramind_nlq::{
    build_oracle, config, EntityResolver, FallbackInterpreter, LlmBackend, QueryPipeline,
    ResolverConfig, TEMPLATES,
};
use terramind_store::{DirectoryLayerStore, LayerStore};
use tracing_subscriber::EnvFilter;

mod server;

#[derive(Parser)]
#[command(name = "terramind")]
#[command(
    author,
    version,
    about = "TerraMind: plain-English questions over GeoJSON layers"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// More logging on stderr (`-v` info, `-vv` debug). `RUST_LOG` wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug)]
struct GlobalArgs {
    /// Directory of `<layer>.geojson` files (env: TERRAMIND_DATA_DIR, default ./data)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// disabled | mock | ollama | openai | anthropic (env: TERRAMIND_LLM_BACKEND)
    #[arg(long, global = true)]
    llm_backend: Option<String>,

    /// Model name for the LLM backend (env: TERRAMIND_LLM_MODEL)
    #[arg(long, global = true)]
    llm_model: Option<String>,

    /// Oracle timeout in seconds, at least 1 (env: TERRAMIND_LLM_TIMEOUT_SECS, default 30)
    #[arg(long, global = true)]
    llm_timeout_secs: Option<u64>,

    /// Re-read layer files on every request
    #[arg(long, global = true)]
    no_cache: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret and execute a question; prints the result FeatureCollection
    Query {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Show how a question would be interpreted, without executing it
    Interpret {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Execute a structured operation request (`{type, parameters, layers}`)
    Run {
        /// JSON file, or `-` for stdin
        #[arg(long)]
        op: String,
    },

    /// List layers in the data directory
    Layers,

    /// List the query templates, in matching order
    Templates,

    /// Serve the pipeline over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to start async runtime: {e}"))?;
    rt.block_on(run(cli))
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: u8) {
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

async fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Query { text } => {
            let pipeline = build_pipeline(&global)?;
            let envelope = pipeline
                .run_query(&text.join(" "), None)
                .await
                .map_err(|e| report(e, global.pretty))?;
            print_json(&envelope.to_json(), global.pretty)
        }
        Commands::Interpret { text } => {
            let pipeline = build_pipeline(&global)?;
            let available = pipeline
                .available_layers()
                .await
                .map_err(|e| report(e, global.pretty))?;
            let interpretation = pipeline
                .interpret(&text.join(" "), &available)
                .await
                .map_err(|e| report(e, global.pretty))?;
            print_json(&serde_json::to_value(&interpretation)?, global.pretty)
        }
        Commands::Run { op } => {
            let request = read_operation(&op)?;
            let pipeline = build_pipeline(&global)?;
            let envelope = pipeline
                .run_operation(request)
                .await
                .map_err(|e| report(e, global.pretty))?;
            print_json(&envelope.to_json(), global.pretty)
        }
        Commands::Layers => cmd_layers(&global).await,
        Commands::Templates => {
            cmd_templates();
            Ok(())
        }
        Commands::Serve { listen } => {
            let pipeline = Arc::new(build_pipeline(&global)?);
            server::serve(pipeline, listen).await
        }
    }
}

fn layer_store(global: &GlobalArgs) -> Result<Arc<dyn LayerStore>> {
    let dir = config::data_dir(global.data_dir.clone())?;
    if !dir.is_dir() {
        return Err(anyhow!(
            "data directory {} does not exist (pass --data-dir or set {})",
            dir.display(),
            config::TERRAMIND_DATA_DIR_ENV
        ));
    }
    Ok(if global.no_cache {
        Arc::new(DirectoryLayerStore::without_cache(dir))
    } else {
        Arc::new(DirectoryLayerStore::new(dir))
    })
}

fn build_pipeline(global: &GlobalArgs) -> Result<QueryPipeline> {
    let store = layer_store(global)?;
    let backend = LlmBackend::parse(&config::llm_backend_name(global.llm_backend.as_deref())?)?;
    let timeout = config::llm_timeout(global.llm_timeout_secs)?;
    let country = config::preferred_country(None)?;

    let mut pipeline = QueryPipeline::new(store)?.with_resolver(EntityResolver::new(
        ResolverConfig::default().with_preferred_country(&country),
    ));

    if backend != LlmBackend::Disabled {
        let model = config::llm_model(global.llm_model.clone())?;
        let oracle = build_oracle(backend, model, config::llm_max_output_tokens()?)?;
        tracing::info!(oracle = %oracle.describe(), timeout_secs = timeout.as_secs(), "oracle fallback enabled");
        pipeline = pipeline.with_fallback(FallbackInterpreter::new(oracle, timeout));
    }
    Ok(pipeline)
}

fn read_operation(source: &str) -> Result<OperationRequest> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| anyhow!("failed to read operation from stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(source).map_err(|e| anyhow!("failed to read {source}: {e}"))?
    };
    serde_json::from_str(&text).map_err(|e| anyhow!("invalid operation request JSON: {e}"))
}

/// Print the error payload on stdout and hand the error back for the exit code.
fn report(err: GeoError, pretty: bool) -> anyhow::Error {
    report_to(&mut std::io::stdout().lock(), err, pretty)
}

fn report_to(out: &mut impl Write, err: GeoError, pretty: bool) -> anyhow::Error {
    let written = serde_json::to_value(err.to_payload())
        .map_err(anyhow::Error::from)
        .and_then(|payload| write_json(out, &payload, pretty));
    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write error payload");
    }
    anyhow!(err)
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    write_json(&mut std::io::stdout().lock(), value, pretty)
}

fn write_json(out: &mut impl Write, value: &serde_json::Value, pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, value)?;
    } else {
        serde_json::to_writer(&mut *out, value)?;
    }
    writeln!(out)?;
    Ok(())
}

async fn cmd_layers(global: &GlobalArgs) -> Result<()> {
    let store = layer_store(global)?;
    let names = store.layer_names().await?;
    if names.is_empty() {
        println!("{}", "no layers found".yellow());
        return Ok(());
    }
    for name in names {
        match store.fetch_layer(&name).await {
            Ok(layer) => println!("{}  {} features", name.bold(), layer.len()),
            Err(e) => println!("{}  {}", name.bold(), e.to_string().red()),
        }
    }
    Ok(())
}

fn cmd_templates() {
    for t in TEMPLATES {
        println!(
            "{}  {} on {}",
            t.pattern_id.bold().cyan(),
            t.operation.as_str().yellow(),
            t.layers.join(", ")
        );
        println!("    when: {}", t.describe_rule());
        if !t.parameters.is_empty() {
            let params = t
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            println!("    with: {}", params.dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "terramind",
            "query",
            "states",
            "bordering",
            "Texas",
            "--pretty",
            "--llm-backend",
            "mock",
            "-vv",
        ])
        .unwrap();
        assert!(cli.global.pretty);
        assert_eq!(cli.global.llm_backend.as_deref(), Some("mock"));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Query { text } => assert_eq!(text.join(" "), "states bordering Texas"),
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn serve_has_a_default_listen_address() {
        let cli = Cli::try_parse_from(["terramind", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { listen } => assert_eq!(listen.port(), 8080),
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn missing_data_dir_is_an_error() {
        let global = GlobalArgs {
            data_dir: Some(PathBuf::from("/definitely/not/a/terramind/dir")),
            llm_backend: None,
            llm_model: None,
            llm_timeout_secs: None,
            no_cache: false,
            pretty: false,
        };
        let err = layer_store(&global).err().unwrap().to_string();
        assert!(err.contains("does not exist"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn error_payload_is_written_as_one_json_line() {
        let mut out = Vec::new();
        let err = report_to(&mut out, GeoError::LayerNotFound("rivers".into()), false);
        assert!(err.to_string().contains("rivers"));

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(payload.to_string().contains("rivers"));
    }

    #[test]
    fn unwritable_stdout_still_returns_the_original_error() {
        let err = report_to(&mut ClosedPipe, GeoError::LayerNotFound("rivers".into()), true);
        assert!(err.to_string().contains("rivers"));
        assert!(err.downcast_ref::<GeoError>().is_some());
    }
}
