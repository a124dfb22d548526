use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{App, AppError};
use crate::eid::Eid;
use crate::images::{self, STORED_EXTENSION};
use crate::storage::{ImageStore, LocalImageStore};

#[derive(Debug, Clone, Serialize)]
pub struct IngestedImage {
    pub id: Eid,
    pub filename: String,
    pub tag: String,
    pub image_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeSummary {
    pub entries: usize,
    pub image_folder: PathBuf,
    /// Tagged images that were missing from the folder at build time.
    pub dangling: Vec<PathBuf>,
}

fn validate_tag(tag: &str) -> Result<&str, AppError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(AppError::Validation("tag must not be empty".to_string()));
    }
    Ok(tag)
}

impl App {
    /// Store an uploaded image and index it under `tag`.
    ///
    /// The image is written before the index entry that references it is
    /// persisted. Returns once the snapshot on disk includes the new entry.
    pub fn ingest(
        &self,
        tag: &str,
        filename: Option<&str>,
        data: &[u8],
    ) -> Result<IngestedImage, AppError> {
        let tag = validate_tag(tag)?;

        if data.is_empty() {
            return Err(AppError::Validation("image file is empty".to_string()));
        }

        if let Some(filename) = filename {
            if !images::is_allowed_extension(filename) {
                return Err(AppError::UnsupportedFormat(format!(
                    "{filename}, allowed extensions are {}",
                    images::ALLOWED_EXTENSIONS.join(", ")
                )));
            }
        }

        let png = images::normalize_to_png(data)?;

        let id = Eid::new();
        let stored_name = format!("{id}.{STORED_EXTENSION}");
        let image_path = self.images.write(&stored_name, &png)?;

        // The stored file is named after the entry that references it
        let entry = match self.index.insert(id, tag, image_path.clone()) {
            Ok(entry) => entry,
            Err(err) => {
                // The entry never made it into the snapshot, drop the orphan file
                if let Err(cleanup) = self.images.delete(&stored_name) {
                    tracing::warn!(path = %image_path.display(), "failed to remove orphan image: {cleanup}");
                }
                return Err(err.into());
            }
        };

        tracing::info!(id = %entry.id, tag = %entry.tag, path = %entry.image_ref.display(), "image ingested");

        Ok(IngestedImage {
            id: entry.id,
            filename: stored_name,
            tag: entry.tag,
            image_path: entry.image_ref,
        })
    }

    /// Build a fresh index from `tags` (image name to tag) over the images in
    /// `folder`, replacing any previous snapshot.
    ///
    /// Each image is expected at `folder/<name>.png`; a missing folder is
    /// created and missing files are reported but do not abort the build.
    pub fn initialize(
        &self,
        folder: &Path,
        tags: BTreeMap<String, String>,
    ) -> Result<InitializeSummary, AppError> {
        if folder.as_os_str().is_empty() {
            return Err(AppError::Validation("image_folder is required".to_string()));
        }
        if tags.is_empty() {
            return Err(AppError::Validation(
                "tags must map at least one image name to a tag".to_string(),
            ));
        }

        let folder = self.config.resolve(folder);
        let store = LocalImageStore::new(&folder)?;

        let mut entries = Vec::with_capacity(tags.len());
        let mut dangling = Vec::new();

        for (name, tag) in &tags {
            let tag = validate_tag(tag)
                .map_err(|_| AppError::Validation(format!("tag for '{name}' is empty")))?;

            let image_ref = store.path_of(&format!("{name}.{STORED_EXTENSION}"));
            if !store.exists(&image_ref) {
                tracing::warn!(path = %image_ref.display(), tag = %tag, "tagged image is missing");
                dangling.push(image_ref.clone());
            }

            entries.push((tag.to_string(), image_ref));
        }

        let count = self.index.build(entries)?;

        tracing::info!(
            entries = count,
            dangling = dangling.len(),
            folder = %folder.display(),
            "index initialized"
        );

        Ok(InitializeSummary {
            entries: count,
            image_folder: folder,
            dangling,
        })
    }
}
