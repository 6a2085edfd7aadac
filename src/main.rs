use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod records;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use config::Config;
use semantic::SearchRequest;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    log::info!("starting profiles pid {}", std::process::id());

    match args.command {
        cli::Command::Serve {
            records,
            host,
            port,
        } => {
            let mut config = Config::load()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let app = AppFactory::create_app(&config, records)?;
            let addr = format!("{}:{}", config.server.host, config.server.port);

            runtime()?.block_on(web::serve(app, &addr))
        }

        cli::Command::Search {
            query,
            top_k,
            records,
        } => {
            let config = Config::load()?;
            let app = AppFactory::create_app(&config, records)?;

            let response = runtime()?.block_on(async {
                app.build_index().await?;
                app.search()
                    .search(SearchRequest::new(&query, top_k))
                    .await
                    .map_err(anyhow::Error::from)
            })?;

            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        cli::Command::Health { addr, timeout } => {
            let status =
                runtime()?.block_on(cli::probe_health(&addr, Duration::from_secs(timeout)));
            std::process::exit(status.exit_code());
        }
    }
}
