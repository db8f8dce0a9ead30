mod logging;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use waypost::{InitOptions, Sdk, SdkConfig, StaticEnvironment};
use waypost_store::FsStorage;

#[derive(Parser, Debug)]
#[command(name = "waypost-cli")]
#[command(about = "Command-line host for the Waypost attribution SDK")]
struct Cli {
    /// Publishable key (`key_live_…`/`key_test_…`) or legacy app id.
    #[arg(long, env = "WAYPOST_KEY")]
    key: String,
    /// Directory holding the ephemeral and durable session files.
    #[arg(long, default_value = ".waypost")]
    state_dir: PathBuf,
    /// Landing URL the session is opened from.
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    referrer: Option<String>,
    #[arg(long)]
    user_agent: Option<String>,
    #[arg(long, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Opens (or resumes) a session and prints its data.
    Open(OpenArgs),
    /// Prints the current session data.
    Data,
    /// Creates a deep link from a JSON link-data object.
    Link {
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Tracks a named event with optional JSON metadata.
    Track {
        event: String,
        #[arg(long, default_value = "{}")]
        metadata: String,
    },
    /// Associates the session with a developer identity.
    Identify { identity: String },
    Logout,
}

#[derive(clap::Args, Debug)]
struct OpenArgs {
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    tracking_disabled: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<String, String> {
    let sdk = build_sdk(&cli)?;
    tracing::debug!(state_dir = %cli.state_dir.display(), "opening waypost session");
    let options = match &cli.command {
        Commands::Open(args) => InitOptions {
            branch_match_id: args.match_id.clone(),
            tracking_disabled: args.tracking_disabled,
            ..InitOptions::default()
        },
        _ => InitOptions::default(),
    };
    let opened = sdk
        .initialize(cli.key.clone(), options)
        .await
        .map_err(|error| error.to_string())?;

    let output = match cli.command {
        Commands::Open(_) => Value::Object(opened),
        Commands::Data => Value::Object(sdk.data().await.map_err(|error| error.to_string())?),
        Commands::Link { data } => {
            let created = sdk
                .link(parse_object("--data", &data)?)
                .await
                .map_err(|error| error.to_string())?;
            json!({
                "url": created.url,
                "error": created.error.map(|error| error.to_string()),
            })
        }
        Commands::Track { event, metadata } => {
            sdk.track(event.clone(), parse_object("--metadata", &metadata)?)
                .await
                .map_err(|error| error.to_string())?;
            json!({"tracked": event})
        }
        Commands::Identify { identity } => Value::Object(
            sdk.set_identity(identity)
                .await
                .map_err(|error| error.to_string())?,
        ),
        Commands::Logout => {
            sdk.logout().await.map_err(|error| error.to_string())?;
            json!({"logged_out": true})
        }
    };
    serde_json::to_string_pretty(&output).map_err(|error| error.to_string())
}

fn build_sdk(cli: &Cli) -> Result<Sdk, String> {
    let ephemeral =
        FsStorage::new(&cli.state_dir, "ephemeral").map_err(|error| error.to_string())?;
    let durable = FsStorage::new(&cli.state_dir, "durable").map_err(|error| error.to_string())?;

    let mut environment = StaticEnvironment::new();
    if let Some(url) = &cli.url {
        environment = environment.with_url(url.clone());
    }
    if let Some(referrer) = &cli.referrer {
        environment = environment.with_referrer(referrer.clone());
    }
    if let Some(user_agent) = &cli.user_agent {
        environment = environment.with_user_agent(user_agent.clone());
    }

    Sdk::builder(SdkConfig::from_env())
        .storage(Arc::new(ephemeral), Arc::new(durable))
        .environment(Arc::new(environment))
        .build()
        .map_err(|error| error.to_string())
}

fn parse_object(flag: &str, raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(format!("{flag} must be a JSON object")),
        Err(error) => Err(format!("{flag} is not valid JSON: {error}")),
    }
}
