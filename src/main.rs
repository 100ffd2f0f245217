//! RowGuard query compiler CLI
//!
//! Loads model and policy declarations, compiles one raw query for one actor
//! and prints the compiled query (or the error) as JSON.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rowguard::declarations::Declarations;
use rowguard::RowGuard;
use rowguard_common::config::RowGuardConfig;
use rowguard_common::error::Error;
use rowguard_common::Actor;
use rowguard_query::RawQuery;

#[derive(Parser, Debug)]
#[command(name = "rowguard")]
#[command(about = "Compile structured queries under row-level security policies", long_about = None)]
struct Args {
    /// Path to the model and policy declarations
    #[arg(short, long, env = "ROWGUARD_DECLARATIONS")]
    declarations: PathBuf,

    /// Path to configuration file
    #[arg(short, long, default_value = "rowguard.toml")]
    config: PathBuf,

    /// Model to query
    #[arg(short, long)]
    model: String,

    /// Action to compile for
    #[arg(short, long, default_value = "read")]
    action: String,

    /// Raw query as JSON
    #[arg(short, long, default_value = "{}")]
    query: String,

    /// Actor as JSON (anonymous when omitted)
    #[arg(long)]
    actor: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    info!("RowGuard v{}", env!("CARGO_PKG_VERSION"));

    let config = if args.config.exists() {
        let content = std::fs::read_to_string(&args.config)?;
        toml::from_str(&content)?
    } else {
        info!("Using default configuration");
        RowGuardConfig::default()
    };

    let mut builder = RowGuard::builder(config);
    Declarations::load(&args.declarations)?.apply(&mut builder)?;
    let guard = builder.build()?;

    let raw = RawQuery::new(serde_json::from_str(&args.query)?);
    let actor: Actor = match &args.actor {
        Some(json) => serde_json::from_str(json)?,
        None => Actor::anonymous(),
    };

    match guard.compile(&args.model, args.action.as_str(), &raw, &actor).await {
        Ok(compiled) => {
            println!("{}", serde_json::to_string_pretty(&compiled)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&error_body(&e))?);
            std::process::exit(1);
        }
    }
}

fn error_body(error: &Error) -> serde_json::Value {
    let mut body = serde_json::json!({
        "error": error.error_code(),
        "message": error.to_string(),
    });
    if let Some(parse) = error.parse_error() {
        body["path"] = parse.path.clone().into();
        body["reason"] = parse.reason.code().into();
    }
    body
}
