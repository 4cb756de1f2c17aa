use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use callagent::agent::APPLICATION_JSON;
use callagent::config::Config;
use callagent::{
    CallAgent, CallOptions, HttpMethod, HttpTransport, RemoteBody, RequestOverlay,
    ResponseBodyType, util,
};

#[derive(Parser)]
#[command(name = "callagent")]
#[command(about = "Make JSON-RPC and plain remote calls against a backend")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.callagent/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make a JSON-RPC call
    Rpc {
        /// Endpoint path, starting with /
        path: String,

        /// Parameters as a JSON array of strings or nulls
        #[arg(long)]
        params: Option<String>,

        /// HTTP method
        #[arg(long, short, default_value = "POST")]
        method: HttpMethod,

        /// Extra header, "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },

    /// Make a plain remote call
    Call {
        /// Endpoint path, starting with /
        path: String,

        /// Payload: JSON, or a raw string if it does not parse
        #[arg(long)]
        data: Option<String>,

        /// HTTP method
        #[arg(long, short, default_value = "GET")]
        method: HttpMethod,

        /// Request content type
        #[arg(long, default_value = APPLICATION_JSON)]
        content_type: String,

        /// Response interpretation (json, text, stream)
        #[arg(long, default_value = "json")]
        body_type: ResponseBodyType,

        /// Extra header, "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },

    /// Print the websocket URL for a path
    WsUrl {
        /// Absolute http(s) URL or a path on the page host
        url: String,

        /// Page location (defaults to remote.base_url)
        #[arg(long)]
        location: Option<String>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)?;

    // Logs go to stderr so stdout carries only call results
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Rpc {
            path,
            params,
            method,
            headers,
        } => {
            let agent = build_agent(&config)?;
            let params: Vec<Option<String>> = match params {
                Some(raw) => serde_json::from_str(&raw)
                    .context("--params must be a JSON array of strings or nulls")?,
                None => Vec::new(),
            };
            let overlay = parse_overlay(&headers)?;
            let result = agent.json_rpc_call(&path, params, method, &overlay).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Call {
            path,
            data,
            method,
            content_type,
            body_type,
            headers,
        } => {
            let agent = build_agent(&config)?;
            let data = data.map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)));
            let options = CallOptions {
                method,
                content_type,
                body_type,
                overlay: parse_overlay(&headers)?,
            };
            let body = agent.remote_call(&path, data.as_ref(), &options).await?;
            print_body(body).await?;
        }

        Commands::WsUrl { url, location } => {
            let location = location.unwrap_or_else(|| config.remote.base_url.clone());
            let location = Url::parse(&location)
                .with_context(|| format!("Invalid location: {}", location))?;
            println!("{}", util::web_socket_url(&url, &location));
        }

        Commands::Init { force } => {
            init_config(&config_path, force)?;
        }
    }

    Ok(())
}

fn build_agent(config: &Config) -> Result<CallAgent<HttpTransport>> {
    let transport = HttpTransport::new(&config.remote.base_url)?;
    info!(
        base_url = %config.remote.base_url,
        url_prefix = ?config.remote.url_prefix,
        "Created call agent"
    );
    Ok(CallAgent::new(transport, &config.agent_config()))
}

fn parse_overlay(headers: &[String]) -> Result<RequestOverlay> {
    let mut overlay = RequestOverlay::new();
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header must be \"Name: value\": {}", header))?;
        overlay = overlay.try_header(name.trim(), value.trim())?;
    }
    Ok(overlay)
}

async fn print_body(body: RemoteBody) -> Result<()> {
    match body {
        RemoteBody::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        RemoteBody::Text(text) => println!("{}", text),
        RemoteBody::Stream(mut stream) => {
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
    }
    Ok(())
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    Config::default().save(path)?;
    println!("✓ Created {}", path.display());
    println!("\nNext steps:");
    println!("  callagent rpc /api/users --params '[\"alice\", null]'");
    println!("  callagent call /health --body-type text");
    Ok(())
}
