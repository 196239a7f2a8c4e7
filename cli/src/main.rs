//! skyorder CLI: probe the imagery ordering API from the terminal.
//!
//! Usage:
//! ```bash
//! # Check that an endpoint answers and how the limiter looks afterwards
//! skyorder ping --url https://api.skyorder.io/v1 --path /ping
//!
//! # GET a resource and print the JSON
//! skyorder get --path /orders --query pageSize=10
//!
//! # Print the effective configuration
//! skyorder config --config client.json --rps 5
//! ```

use std::env;
use std::process;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skyorder_core::{ApiRequest, ClientConfig};

const API_KEY_ENV: &str = "SKYORDER_API_KEY";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let rest = &args[2..];
    init_tracing(
        parse_flag(rest, "--log-level").as_deref().unwrap_or("warn"),
        has_flag(rest, "--json-logs"),
    );

    let result = match args[1].as_str() {
        "ping" => cmd_ping(rest).await,
        "get" => cmd_get(rest).await,
        "config" => cmd_config(rest),
        "version" | "--version" | "-V" => {
            println!("skyorder {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("skyorder {}", env!("CARGO_PKG_VERSION"));
    println!("Probe the SkyOrder imagery ordering API\n");
    println!("USAGE:");
    println!("    skyorder <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    ping       GET a path and report status, latency and limiter state");
    println!("    get        GET a path and print the JSON body");
    println!("    config     Print the effective client configuration");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>            API base URL");
    println!("    --api-key <KEY>        API key (default: ${API_KEY_ENV})");
    println!("    --config <FILE>        JSON client configuration");
    println!("    --path <PATH>          Request path (ping default: /)");
    println!("    --query <K=V>          Query parameter, repeatable");
    println!("    --rps <N>              Requests per second");
    println!("    --burst <N>            Token bucket size");
    println!("    --max-retries <N>      Retry attempts after the first try");
    println!("    --log-level <LEVEL>    trace|debug|info|warn|error (default: warn)");
    println!("    --json-logs            Emit logs as JSON");
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn cmd_ping(args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    let path = parse_flag(args, "--path").unwrap_or_else(|| "/".to_string());
    let client = skyorder_http::connect(&config)?;

    println!("Pinging {}{path}...", config.base_url);

    let start = Instant::now();
    let response = client.send(ApiRequest::get(path)).await?;
    let latency = start.elapsed();

    println!("  Status:       {}", response.status);
    println!("  Latency:      {}ms", latency.as_millis());
    println!("  Tokens left:  {}", client.rate_limiter().available_tokens());
    println!("  Queued:       {}", client.rate_limiter().queue_len());

    client.shutdown();
    Ok(())
}

async fn cmd_get(args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    let path = parse_flag(args, "--path").context("--path is required")?;
    let client = skyorder_http::connect(&config)?;

    let mut request = ApiRequest::get(path);
    for pair in parse_all(args, "--query") {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("--query expects KEY=VALUE, got {pair:?}"))?;
        request = request.with_query(key, value);
    }

    let result: serde_json::Value = client.request(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    client.shutdown();
    Ok(())
}

fn cmd_config(args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

/// Defaults, then `--config`, then individual flags and the API key variable.
fn build_config(args: &[String]) -> Result<ClientConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(file) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read config file {file}"))?;
            ClientConfig::from_json(&raw).with_context(|| format!("invalid config file {file}"))?
        }
        None => ClientConfig::default(),
    };

    if let Some(url) = parse_flag(args, "--url") {
        config.base_url = url;
    }
    match parse_flag(args, "--api-key") {
        Some(key) => config.api_key = Some(key),
        None => {
            if let Ok(key) = env::var(API_KEY_ENV) {
                config.api_key = Some(key);
            }
        }
    }
    if let Some(rps) = parse_flag(args, "--rps") {
        config.rate_limit.requests_per_second =
            rps.parse().with_context(|| format!("invalid --rps {rps:?}"))?;
    }
    if let Some(burst) = parse_flag(args, "--burst") {
        config.rate_limit.bucket_size =
            burst.parse().with_context(|| format!("invalid --burst {burst:?}"))?;
    }
    if let Some(retries) = parse_flag(args, "--max-retries") {
        config.retry.max_retries = retries
            .parse()
            .with_context(|| format!("invalid --max-retries {retries:?}"))?;
    }

    if let Err(e) = config.validate() {
        bail!("invalid configuration: {e}");
    }
    tracing::debug!(?config, "effective configuration");
    Ok(config)
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_all<'a>(args: &'a [String], flag: &'a str) -> impl Iterator<Item = &'a String> + 'a {
    args.windows(2)
        .filter(move |w| w[0] == flag)
        .map(|w| &w[1])
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
