use std::path::PathBuf;

use serde::Serialize;

use super::{App, AppError};
use crate::images;
use crate::semantic::embed_with_timeout;

/// One search hit with its image, when the image could be read.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub tag: String,
    pub image_ref: PathBuf,
    /// PNG bytes, `None` when the image is unavailable.
    #[serde(skip)]
    pub image_bytes: Option<Vec<u8>>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub query: String,
    pub reformulated_query: String,
    pub results: Vec<QueryResult>,
}

impl App {
    /// Rewrite `raw_query`, embed it and return the `top_k` nearest tagged images.
    ///
    /// `top_k` falls back to the configured default and is clamped to the
    /// index size by the search itself.
    pub fn retrieve(
        &self,
        raw_query: &str,
        top_k: Option<usize>,
    ) -> Result<RetrievalOutcome, AppError> {
        let query = raw_query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }

        let k = top_k.unwrap_or(self.config.default_top_k);
        if k == 0 {
            return Err(AppError::Validation(
                "top_k must be a positive integer".to_string(),
            ));
        }

        self.index.ensure_loaded()?;

        let reformulated = match self.reformulator.rewrite(query) {
            Ok(rewritten) => rewritten,
            Err(err) => {
                tracing::warn!(
                    provider = self.reformulator.name(),
                    "query reformulation failed, using raw query: {err}"
                );
                query.to_string()
            }
        };

        let vector = embed_with_timeout(
            self.index.embedder().clone(),
            &reformulated,
            self.embedding_timeout(),
        )?;

        let hits = self.index.search(&vector, k)?;

        tracing::debug!(
            query = %query,
            reformulated = %reformulated,
            hits = hits.len(),
            "search finished"
        );

        let results = hits
            .into_iter()
            .map(|hit| QueryResult {
                image_bytes: self.render_image(&hit.entry.image_ref),
                tag: hit.entry.tag,
                image_ref: hit.entry.image_ref,
                score: hit.score,
            })
            .collect();

        Ok(RetrievalOutcome {
            query: query.to_string(),
            reformulated_query: reformulated,
            results,
        })
    }

    fn render_image(&self, image_ref: &std::path::Path) -> Option<Vec<u8>> {
        let data = match self.images.read(image_ref) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(path = %image_ref.display(), "image unavailable: {err}");
                return None;
            }
        };

        match images::png_payload(data) {
            Ok(png) => Some(png),
            Err(err) => {
                tracing::warn!(path = %image_ref.display(), "image unreadable: {err}");
                None
            }
        }
    }
}
