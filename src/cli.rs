use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::web::HealthResponse;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the search daemon.
    Serve {
        /// Customer profiles CSV (overrides config)
        #[clap(short, long)]
        records: Option<PathBuf>,

        /// Address to bind (overrides config and HOST)
        #[clap(long)]
        host: Option<String>,

        /// Port to bind (overrides config and PORT)
        #[clap(short, long)]
        port: Option<u16>,
    },
    /// Build the index in-process and run a single query.
    Search {
        /// Natural-language query
        query: String,

        /// Number of results, clamped to [1, 100]
        #[clap(short = 'k', long, allow_hyphen_values = true)]
        top_k: Option<i64>,

        /// Customer profiles CSV (overrides config)
        #[clap(short, long)]
        records: Option<PathBuf>,
    },
    /// Probe a running daemon. Exits 0 when ready, 2 when not ready.
    Health {
        /// Daemon address
        #[clap(long, default_value = "http://127.0.0.1:3001")]
        addr: String,

        /// Request timeout in seconds
        #[clap(long, default_value = "4")]
        timeout: u64,
    },
}

/// Exit codes of the `health` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ready,
    RequestError,
    NotReady,
    BadResponse,
    Timeout,
}

impl HealthStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            HealthStatus::Ready => 0,
            HealthStatus::RequestError => 1,
            HealthStatus::NotReady => 2,
            HealthStatus::BadResponse => 3,
            HealthStatus::Timeout => 4,
        }
    }
}

/// Ask `{addr}/health` whether the daemon is ready to serve searches.
pub async fn probe_health(addr: &str, timeout: Duration) -> HealthStatus {
    let url = format!("{}/health", addr.strip_suffix('/').unwrap_or(addr));
    log::info!("pinging {url}");

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => {
            log::error!("request error: {err}");
            return HealthStatus::RequestError;
        }
    };

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            log::error!("request timed out");
            return HealthStatus::Timeout;
        }
        Err(err) => {
            log::error!("request error: {err}");
            return HealthStatus::RequestError;
        }
    };

    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) if err.is_timeout() => return HealthStatus::Timeout,
        Err(err) => {
            log::error!("request error: {err}");
            return HealthStatus::RequestError;
        }
    };

    match serde_json::from_str::<HealthResponse>(&text) {
        Ok(health) => {
            log::info!("status: {status} {health:?}");
            if health.ready {
                HealthStatus::Ready
            } else {
                HealthStatus::NotReady
            }
        }
        Err(err) => {
            log::error!("failed to parse health response: {err}. raw: {text:?}");
            HealthStatus::BadResponse
        }
    }
}
