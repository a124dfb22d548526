use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use homedir::my_home;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod eid;
mod images;
mod reformulate;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::App;
use config::Config;

const DEFAULT_LOG_FILTER: &str = "pixtag=info,tower_http=info";

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `$PIXTAG_BASE_PATH`, or `~/.local/share/pixtag`.
fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("PIXTAG_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;

    Ok(home.join(".local").join("share").join("pixtag"))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    init_tracing();

    let mut config = Config::load_with(&base_path()?)?;

    // status never needs the embedding model
    if let cli::Command::Status {} = args.command {
        let index_dir = config.index_dir_path();
        let snapshot = semantic::SnapshotStorage::new(index_dir);
        let (status, message) = if snapshot.exists() {
            ("ready", "index snapshot saved, it is loaded on first search")
        } else {
            ("not_initialized", "no index snapshot, run init first")
        };
        return print_json(&json!({
            "status": status,
            "message": message,
            "index_path": snapshot.path(),
        }));
    }

    if let cli::Command::Serve {
        listen: Some(listen),
    } = &args.command
    {
        config.listen = listen.clone();
    }

    let app = Arc::new(App::from_config(config)?);

    match args.command {
        cli::Command::Serve { .. } => {
            app.try_load_index();
            web::start_daemon(app.clone())?;
        }

        cli::Command::Init { folder, tags } => {
            let tags = cli::read_tags_file(&tags)?;
            let summary = app.initialize(&folder, tags)?;
            print_json(&summary)?;
        }

        cli::Command::Search {
            query,
            top_k,
            with_images,
        } => {
            let outcome = app.retrieve(&query, top_k)?;

            let results: Vec<_> = outcome
                .results
                .iter()
                .map(|result| {
                    let mut value = json!({
                        "tag": result.tag,
                        "image_path": result.image_ref,
                        "score": result.score,
                        "image_available": result.image_bytes.is_some(),
                    });
                    if with_images {
                        value["image_data"] =
                            json!(result.image_bytes.as_ref().map(|b| STANDARD.encode(b)));
                    }
                    value
                })
                .collect();

            print_json(&json!({
                "query": outcome.query,
                "reformulated_query": outcome.reformulated_query,
                "results": results,
            }))?;
        }

        cli::Command::Upload { file, tag } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file.file_name().and_then(|name| name.to_str());
            let ingested = app.ingest(&tag, filename, &data)?;
            print_json(&ingested)?;
        }

        cli::Command::Status {} => {}
    }

    Ok(())
}
