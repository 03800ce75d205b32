use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "header-cli")]
#[command(about = "Management CLI for the header sync service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8787")]
    url: String,

    /// Bearer token, if the service requires one
    #[arg(short, long, env = "HEADER_SYNC_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show enabled flag, active header count and URL pattern
    Status,
    /// Print the current header configuration
    Config,
    /// Flip the master switch
    Toggle,
    /// Remove every installed rule
    Clear,
    /// Add a header
    Add { name: String, value: String },
    /// Remove a header by id
    Remove { id: String },
    /// Set the URL pattern
    Pattern { pattern: String },
    /// Replace the configuration with a JSON file
    Apply { file: PathBuf },
    /// Print an export document
    Export,
    /// Import an export document from a file
    Import { file: PathBuf },
    /// List installed rules
    Rules,
    /// Show the directives that apply to a URL
    Evaluate {
        url: String,
        #[arg(long, default_value = "main_frame")]
        resource_type: String,
    },
    /// List profiles
    Profiles,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    }
    let client = reqwest::Client::builder().default_headers(headers).build()?;

    let response = match cli.command {
        Commands::Status => client.get(format!("{}/status", cli.url)).send().await?,
        Commands::Rules => client.get(format!("{}/rules", cli.url)).send().await?,
        Commands::Evaluate { url, resource_type } => {
            client
                .post(format!("{}/rules/evaluate", cli.url))
                .json(&json!({"url": url, "resourceType": resource_type}))
                .send()
                .await?
        }
        command => {
            let message = message_for(command)?;
            client
                .post(format!("{}/message", cli.url))
                .json(&message)
                .send()
                .await?
        }
    };

    print_response(response).await
}

fn message_for(command: Commands) -> Result<Value, Box<dyn std::error::Error>> {
    let message = match command {
        Commands::Config => json!({"type": "GET_CONFIG"}),
        Commands::Toggle => json!({"type": "TOGGLE_EXTENSION"}),
        Commands::Clear => json!({"type": "CLEAR_RULES"}),
        Commands::Add { name, value } => json!({"type": "ADD_HEADER", "data": {"name": name, "value": value}}),
        Commands::Remove { id } => json!({"type": "REMOVE_HEADER", "data": {"id": id}}),
        Commands::Pattern { pattern } => json!({"type": "SET_URL_PATTERN", "data": {"urlPattern": pattern}}),
        Commands::Apply { file } => {
            let config: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            json!({"type": "UPDATE_HEADERS", "data": config})
        }
        Commands::Export => json!({"type": "EXPORT_CONFIG"}),
        Commands::Import { file } => {
            let document: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            json!({"type": "IMPORT_CONFIG", "data": document})
        }
        Commands::Profiles => json!({"type": "LIST_PROFILES"}),
        Commands::Status | Commands::Rules | Commands::Evaluate { .. } => {
            return Err("command is not a protocol message".into())
        }
    };
    Ok(message)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);

    if json.get("success") == Some(&Value::Bool(false)) || json.get("error").is_some() {
        std::process::exit(1);
    }
    Ok(())
}
