use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start pixtag as a service.
    Serve {
        /// Address to listen on, overrides the config file
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Build a fresh index from a folder of images and a tags file.
    ///
    /// The tags file maps image names (without the .png extension) to tag
    /// text, as JSON or YAML. Any previous index is replaced.
    Init {
        /// Folder holding <name>.png images, relative to the base path
        /// unless absolute
        #[clap(short, long)]
        folder: PathBuf,

        /// JSON or YAML file mapping image name to tag
        #[clap(short, long)]
        tags: PathBuf,
    },

    /// Search tagged images
    Search {
        query: String,

        /// Number of results, defaults to the configured top k
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Include base64 image data in the output
        #[clap(long, default_value = "false")]
        with_images: bool,
    },

    /// Add an image to the index under a tag
    Upload {
        /// PNG or JPEG file
        file: PathBuf,

        #[clap(short, long)]
        tag: String,
    },

    /// Show whether the index is loaded
    Status {},
}

/// Read an image-name to tag mapping from a JSON or YAML file.
pub fn read_tags_file(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let tags: BTreeMap<String, String> = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not a valid tags file", path.display()))?
    } else {
        serde_yml::from_str(&content)
            .with_context(|| format!("{} is not a valid tags file", path.display()))?
    };

    if tags.is_empty() {
        bail!("{} contains no tags", path.display());
    }

    Ok(tags)
}
