//! Entry gateway control client
//!
//! Pokes a running presence-gateway over HTTP for manual testing.
//!
//! Usage:
//!   cargo run --bin entryctl -- submit --subject patron-7 --kind entry \
//!       --lat 37.7749 --lon -122.4194 --ssid Library-WiFi --speed 2.5
//!   cargo run --bin entryctl -- occupancy --token dev-admin-token
//!   cargo run --bin entryctl -- history --subject patron-7 --token dev-admin-token

use anyhow::Context;
use clap::{Parser, Subcommand};
use presence_gateway::domain::types::EntryRequest;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "entryctl", about = "Presence gateway control client")]
struct Args {
    /// Base URL of the gateway
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit an entry or exit
    Submit {
        #[arg(long)]
        subject: String,
        /// "entry" or "exit"
        #[arg(long, default_value = "entry")]
        kind: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long)]
        ssid: Option<String>,
        #[arg(long)]
        speed: Option<f64>,
        /// Assert presence regardless of score
        #[arg(long)]
        confirm: bool,
    },
    /// Show current occupancy (roster too with an admin token)
    Occupancy {
        #[arg(long)]
        token: Option<String>,
    },
    /// Show a subject's accepted events
    History {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        token: String,
    },
    /// Check that the gateway is up
    Health,
}

fn print_response(status: reqwest::StatusCode, body: &str) {
    let pretty = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string());
    println!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
    println!("{pretty}");
}

/// `{base}/subjects/{subject}/history` with the subject percent-encoded as one segment
fn history_url(base: &str, subject: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid gateway URL {base}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Gateway URL {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(["subjects", subject, "history"]);
    Ok(url)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let base = args.url.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(args.timeout_ms))
        .build()
        .context("Failed to build HTTP client")?;

    let request = match args.command {
        Command::Submit { subject, kind, lat, lon, ssid, speed, confirm } => {
            let body = EntryRequest {
                subject_id: Some(subject),
                entry_type: Some(kind),
                latitude: lat,
                longitude: lon,
                wifi_ssid: ssid,
                speed_kmh: speed,
                manual_confirm: Some(confirm),
            };
            client
                .post(format!("{base}/entries"))
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_string(&body)?)
        }
        Command::Occupancy { token } => {
            let req = client.get(format!("{base}/occupancy"));
            match token {
                Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
                None => req,
            }
        }
        Command::History { subject, token } => client
            .get(history_url(&base, &subject)?)
            .header(AUTHORIZATION, format!("Bearer {token}")),
        Command::Health => client.get(format!("{base}/health")),
    };

    let response = request.send().await.with_context(|| format!("Request to {base} failed"))?;
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;
    print_response(status, &body);

    if status.is_server_error() {
        anyhow::bail!("gateway returned {}", status);
    }
    Ok(())
}
