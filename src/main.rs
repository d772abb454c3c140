use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod ingest;
mod lock;
mod search;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use ingest::Ingestor;
use lock::FileLock;

fn main() -> anyhow::Result<()> {
    // logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let config = AppFactory::create_config(&paths)?;

    match args.command {
        cli::Command::Ingest { file, feed } => {
            let _lock = FileLock::try_acquire(&paths.base_path)
                .context("Failed to acquire ingestion lock")?;

            let feed = feed.unwrap_or_else(|| config.ingest.default_feed.clone());
            let mapping = config.feed(&feed)?;

            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let index = AppFactory::create_index(embedder.as_ref(), &paths)?;

            let summary = Ingestor::new(embedder.as_ref(), index.as_ref(), &config.ingest)
                .ingest_file(&file, mapping)
                .with_context(|| format!("Ingestion of {} failed", file.display()))?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        cli::Command::Search { query, count } => {
            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let service = AppFactory::create_search_service(&config, &paths, embedder)?;

            let response = service.search(&query.join(" "))?;

            if count {
                println!("{} matches found", response.matches.len());
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        cli::Command::Archive {} => {
            let archive = AppFactory::create_archive(&paths)?;
            let mut entries = archive.entries()?;
            entries.reverse();

            println!("{}", serde_json::to_string_pretty(&entries)?);
        }

        cli::Command::Daemon { addr } => {
            let embedder = AppFactory::create_embedder(&config, &paths)?;
            let service = AppFactory::create_search_service(&config, &paths, embedder)?;

            web::start_daemon(service, &addr)?;
        }
    }

    Ok(())
}

