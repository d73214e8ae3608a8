//! Application state for the Agronomicare server
//!
//! The model and the remedy table are loaded once at start-up and shared
//! read-only between handlers. Forward passes are serialized by a mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use agronomicare::backend::{default_device, DefaultBackend};
use agronomicare::dataset::loader::is_image_file;
use agronomicare::dataset::ClassCatalog;
use agronomicare::inference::{classify, decode_upload, PredictionResult, Predictor, ProbabilityModel};
use agronomicare::recommend::{RemedyField, RemedyTable};
use agronomicare::{AgronomicareError, Result};
use chrono::{DateTime, Utc};
use tracing::info;

/// Captions shown under the sidebar example photos, in file name order
pub const EXAMPLE_CAPTIONS: [&str; 3] = [
    "uniform background, good focus",
    "Please do not capture the whole forest",
    "Please have all of the leaf in focus",
];

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Saved model artifact directory
    pub model_dir: PathBuf,
    /// Remedy CSV
    pub remedies_path: PathBuf,
    /// Directory served under `/images`
    pub images_dir: PathBuf,
    /// Deployment catalog that must match the model's own, if given
    pub catalog_path: Option<PathBuf>,
}

/// Example photo for the sidebar
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExampleImage {
    /// URL path under `/images`
    pub url: String,
    pub caption: String,
}

/// One diagnosed upload
#[derive(Clone, Debug)]
pub struct Diagnosis {
    pub prediction: PredictionResult,
    pub natural_remedy: Option<String>,
    pub chemical_remedy: Option<String>,
}

type SharedModel = Mutex<Box<dyn ProbabilityModel + Send>>;

/// Shared application state
pub struct AppState {
    model: SharedModel,
    class_names: Vec<String>,
    remedies: RemedyTable,
    examples: Vec<ExampleImage>,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        model: Box<dyn ProbabilityModel + Send>,
        class_names: Vec<String>,
        remedies: RemedyTable,
        examples: Vec<ExampleImage>,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            class_names,
            remedies,
            examples,
            started_at: Utc::now(),
        }
    }

    /// Load the model, the remedy table and the example list
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let predictor = Predictor::<DefaultBackend>::load(&config.model_dir, &default_device())?;
        let class_names = predictor.catalog().to_vec();

        if let Some(path) = &config.catalog_path {
            let deployed = ClassCatalog::load_json(path)?;
            if deployed.names() != class_names.as_slice() {
                return Err(AgronomicareError::Config(format!(
                    "catalog {:?} does not match the classes of the model in {:?}",
                    path, config.model_dir
                )));
            }
        }

        let remedies = RemedyTable::from_path(&config.remedies_path)?;
        for class in &class_names {
            if remedies.record(class).is_none() {
                tracing::warn!("No remedy row for class '{}'", class);
            }
        }

        let examples = find_examples(&config.images_dir);
        info!(
            "Serving {} classes, {} remedy rows, {} example images",
            class_names.len(),
            remedies.len(),
            examples.len()
        );

        Ok(Self::new(Box::new(predictor), class_names, remedies, examples))
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn examples(&self) -> &[ExampleImage] {
        &self.examples
    }

    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Classify an uploaded photo and look up its remedies
    ///
    /// Only JPEG and PNG uploads are accepted. Blocks for the duration of a
    /// forward pass.
    pub fn diagnose(&self, upload: &[u8]) -> Result<Diagnosis> {
        let image = decode_upload(upload)?;

        let prediction = {
            let model = self
                .model
                .lock()
                .map_err(|_| AgronomicareError::Inference("model lock poisoned".to_string()))?;
            classify(&image, &**model, &self.class_names)?
        };

        let remedy = |field| {
            self.remedies
                .lookup(&prediction.class_name, field)
                .map(str::to_string)
        };
        Ok(Diagnosis {
            natural_remedy: remedy(RemedyField::NaturalRemedies),
            chemical_remedy: remedy(RemedyField::ChemicalControl),
            prediction,
        })
    }
}

/// The first image files of `dir` in name order, paired with the captions
pub fn find_examples(dir: &Path) -> Vec<ExampleImage> {
    let mut files: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_image_file(p))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect(),
        Err(_) => {
            tracing::warn!("Example image directory {:?} not readable", dir);
            Vec::new()
        }
    };
    files.sort();

    files
        .into_iter()
        .zip(EXAMPLE_CAPTIONS)
        .map(|(file, caption)| ExampleImage {
            url: format!("/images/{}", file.replace(' ', "%20")),
            caption: caption.to_string(),
        })
        .collect()
}
