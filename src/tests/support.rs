//! Test doubles and fixtures shared across the test modules.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};

use crate::app::App;
use crate::config::Config;
use crate::reformulate::{Passthrough, QueryReformulator, ReformulationError};
use crate::semantic::{Embedder, EmbeddingError};
use crate::storage::LocalImageStore;

#[derive(Clone, Copy)]
enum Concept {
    Health,
    Art,
    Math,
    Politics,
}

const CONCEPT_COUNT: usize = 4;

/// Words the fake embedder knows, each with its own dimension.
const VOCABULARY: [(&str, Concept); 16] = [
    ("sick", Concept::Health),
    ("ill", Concept::Health),
    ("illness", Concept::Health),
    ("doctor", Concept::Health),
    ("painted", Concept::Art),
    ("painting", Concept::Art),
    ("art", Concept::Art),
    ("drawing", Concept::Art),
    ("divisible", Concept::Math),
    ("sum", Concept::Math),
    ("numeric", Concept::Math),
    ("numbers", Concept::Math),
    ("arithmetic", Concept::Math),
    ("election", Concept::Politics),
    ("vote", Concept::Politics),
    ("government", Concept::Politics),
];

/// Deterministic bag-of-words embedder.
///
/// Every known word adds to its own dimension and to the dimension of its
/// concept, so words of one concept are close but never identical. Unknown
/// words share a single "other" dimension and a small constant keeps every
/// vector away from zero norm.
#[derive(Debug, Default, Clone)]
pub struct FakeEmbedder;

impl FakeEmbedder {
    pub const NAME: &'static str = "fake-bag-of-words";
    pub const DIMENSIONS: usize = CONCEPT_COUNT + VOCABULARY.len() + 2;

    const OTHER_DIMENSION: usize = CONCEPT_COUNT + VOCABULARY.len();
    const BIAS_DIMENSION: usize = Self::OTHER_DIMENSION + 1;

    pub fn new() -> Self {
        Self
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; Self::DIMENSIONS];
        v[Self::BIAS_DIMENSION] = 0.01;

        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            match VOCABULARY.iter().position(|(known, _)| *known == word) {
                Some(pos) => {
                    let concept = VOCABULARY[pos].1 as usize;
                    v[concept] += 1.0;
                    v[CONCEPT_COUNT + pos] += 0.5;
                }
                None => v[Self::OTHER_DIMENSION] += 1.0,
            }
        }

        v
    }
}

impl Embedder for FakeEmbedder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::vector(text))
    }
}

/// `FakeEmbedder` that sleeps before every call.
pub struct SlowEmbedder {
    delay: Duration,
    inner: FakeEmbedder,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: FakeEmbedder,
        }
    }
}

impl Embedder for SlowEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        std::thread::sleep(self.delay);
        self.inner.embed(text)
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        FakeEmbedder::NAME
    }

    fn dimensions(&self) -> usize {
        FakeEmbedder::DIMENSIONS
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("provider unavailable".to_string()))
    }
}

/// Reformulator that always fails, like an unreachable LLM.
pub struct FailingReformulator;

impl QueryReformulator for FailingReformulator {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn rewrite(&self, _raw_query: &str) -> Result<String, ReformulationError> {
        Err(ReformulationError::Timeout { provider: "failing" })
    }
}

/// Reformulator that answers with a fixed rewrite and records what it was asked.
pub struct RecordingReformulator {
    reply: String,
    pub seen: Mutex<Vec<String>>,
}

impl RecordingReformulator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl QueryReformulator for RecordingReformulator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn rewrite(&self, raw_query: &str) -> Result<String, ReformulationError> {
        self.seen.lock().unwrap().push(raw_query.to_string());
        Ok(self.reply.clone())
    }
}

pub fn test_config(base: &Path) -> Config {
    Config::with_base_path(base)
}

pub fn test_app_with(
    config: Config,
    embedder: Arc<dyn Embedder>,
    reformulator: Arc<dyn QueryReformulator>,
) -> App {
    let images = LocalImageStore::new(config.image_folder_path()).unwrap();
    App::new(config, embedder, reformulator, Arc::new(images))
}

/// App rooted at `base` with the fake embedder and no reformulation.
pub fn test_app(base: &Path) -> App {
    test_app_with(
        test_config(base),
        Arc::new(FakeEmbedder::new()),
        Arc::new(Passthrough),
    )
}

pub fn encode_image(format: ImageFormat, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb(color));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    encode_image(ImageFormat::Png, color)
}

/// The five-image fixture: q1..q5 tagged sick, painted, divisible, sum, election.
pub fn sample_tags() -> BTreeMap<String, String> {
    [
        ("q1", "sick"),
        ("q2", "painted"),
        ("q3", "divisible"),
        ("q4", "sum"),
        ("q5", "election"),
    ]
    .into_iter()
    .map(|(name, tag)| (name.to_string(), tag.to_string()))
    .collect()
}

/// Write a PNG for every name in `tags` into `folder`.
pub fn write_images(folder: &Path, tags: &BTreeMap<String, String>) -> Vec<PathBuf> {
    std::fs::create_dir_all(folder).unwrap();
    tags.keys()
        .enumerate()
        .map(|(i, name)| {
            let path = folder.join(format!("{name}.png"));
            std::fs::write(&path, png_bytes([i as u8 * 40, 0, 0])).unwrap();
            path
        })
        .collect()
}

/// App initialized over the five-image fixture in `base/images`.
pub fn initialized_app(base: &Path) -> App {
    let app = test_app(base);
    let tags = sample_tags();
    write_images(&base.join("images"), &tags);
    app.initialize(Path::new("images"), tags).unwrap();
    app
}
