use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "torkeeper-cli")]
#[command(about = "Management CLI for the torkeeper daemon", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8181")]
    url: String,

    #[arg(short, long, env = "TORKEEPER_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show process state, readiness and restart counters
    Status,
    /// Show mode, SOCKS port and bridge type
    Config,
    /// Change mode, SOCKS port or bridge type
    Set {
        /// ALWAYS, NEVER or AUTO
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// NONE, VANILLA, OBFS4, SNOWFLAKE, ...
        #[arg(long)]
        bridge: Option<String>,
    },
    /// Start the proxy
    Start,
    /// Stop the proxy
    Stop,
    /// Ask whether an https:// address should go through the proxy
    Check { address: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = |method: Method, path: &str| -> RequestBuilder {
        client
            .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
            .headers(headers.clone())
    };

    let res = match cli.command {
        Commands::Status => request(Method::GET, "/v1/status").send().await?,
        Commands::Config => request(Method::GET, "/v1/config").send().await?,
        Commands::Set { mode, port, bridge } => {
            let mut body = Map::new();
            if let Some(mode) = mode {
                body.insert("torMode".into(), Value::String(mode));
            }
            if let Some(port) = port {
                body.insert("torPort".into(), Value::from(port));
            }
            if let Some(bridge) = bridge {
                body.insert("bridgeType".into(), Value::String(bridge));
            }
            request(Method::PUT, "/v1/config").json(&body).send().await?
        }
        Commands::Start => request(Method::POST, "/v1/start").send().await?,
        Commands::Stop => request(Method::POST, "/v1/stop").send().await?,
        Commands::Check { address } => {
            request(Method::POST, "/v1/check-address")
                .json(&json!({ "address": address }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
