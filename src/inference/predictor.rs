//! Single-image prediction
//!
//! [`classify`] works against any [`ProbabilityModel`]; [`Predictor`] is the
//! implementation backed by a trained [`CropClassifier`].

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::preprocess::{load_image, PreprocessedImage};
use crate::dataset::ClassCatalog;
use crate::model::{CropClassifier, ModelArtifact, ModelConfig};
use crate::utils::error::{AgronomicareError, Result};
use crate::utils::metrics::argmax;
use crate::IMAGE_CHANNELS;

/// Anything that maps a preprocessed image to class probabilities
pub trait ProbabilityModel {
    /// Side length of the square input
    fn input_size(&self) -> usize {
        crate::IMAGE_SIZE
    }

    /// One probability per class, in catalog order
    fn predict(&self, image: &PreprocessedImage) -> Result<Vec<f32>>;
}

/// Top prediction for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_index: usize,
    pub class_name: String,
    /// Probability of the predicted class, in [0, 1]
    pub confidence: f32,
}

impl PredictionResult {
    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        format!(
            "Prediction: {} (class {})\nConfidence: {:.2}%\n",
            self.class_name,
            self.class_index,
            self.confidence * 100.0
        )
    }
}

/// Classify one image
///
/// The image is center-cropped, resized with Lanczos3 and scaled to
/// [-1, 1]; the arg-max of the model output selects the class, ties going
/// to the lowest index.
pub fn classify<M>(image: &DynamicImage, model: &M, class_names: &[String]) -> Result<PredictionResult>
where
    M: ProbabilityModel + ?Sized,
{
    let input = PreprocessedImage::with_filter(image, model.input_size(), FilterType::Lanczos3);
    let probabilities = model.predict(&input)?;

    if probabilities.is_empty() {
        return Err(AgronomicareError::Inference("model returned no probabilities".to_string()));
    }
    if probabilities.len() != class_names.len() {
        return Err(AgronomicareError::Inference(format!(
            "model returned {} probabilities for {} class names",
            probabilities.len(),
            class_names.len()
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(AgronomicareError::Inference("model output is not finite".to_string()));
    }

    let class_index = argmax(&probabilities);
    let result = PredictionResult {
        class_index,
        class_name: class_names[class_index].clone(),
        confidence: probabilities[class_index].clamp(0.0, 1.0),
    };
    debug!("Predicted {} ({:.4})", result.class_name, result.confidence);
    Ok(result)
}

/// A trained classifier loaded for serving
#[derive(Debug)]
pub struct Predictor<B: Backend> {
    model: CropClassifier<B>,
    config: ModelConfig,
    catalog: ClassCatalog,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Wrap an in-memory artifact
    pub fn new(artifact: ModelArtifact<B>, device: &B::Device) -> Self {
        Self {
            model: artifact.model,
            config: artifact.config,
            catalog: artifact.catalog,
            device: device.clone(),
        }
    }

    /// Load a model artifact directory
    pub fn load(dir: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        Ok(Self::new(ModelArtifact::load(dir.as_ref(), device)?, device))
    }

    /// Class names in model output order
    pub fn catalog(&self) -> &[String] {
        self.catalog.names()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Classify an image file with the artifact's own catalog
    pub fn predict_path(&self, path: &Path) -> Result<PredictionResult> {
        classify(&load_image(path)?, self, self.catalog())
    }
}

impl<B: Backend> ProbabilityModel for Predictor<B> {
    fn input_size(&self) -> usize {
        self.config.input_size
    }

    fn predict(&self, image: &PreprocessedImage) -> Result<Vec<f32>> {
        let [height, width, _] = image.shape();
        if height != self.config.input_size || width != self.config.input_size {
            return Err(AgronomicareError::InvalidInput(format!(
                "expected a {0}x{0} image, got {1}x{2}",
                self.config.input_size, height, width
            )));
        }

        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(image.to_chw(), [1, IMAGE_CHANNELS, height, width]),
            &self.device,
        );

        self.model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| AgronomicareError::Inference(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneVariant;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    /// Returns fixed probabilities whatever the input
    struct FixedModel(Vec<f32>);

    impl ProbabilityModel for FixedModel {
        fn predict(&self, image: &PreprocessedImage) -> Result<Vec<f32>> {
            assert_eq!(image.shape(), [224, 224, 3]);
            Ok(self.0.clone())
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn leaf() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([40, 150, 60])))
    }

    #[test]
    fn test_classify_picks_argmax() {
        let model = FixedModel(vec![0.2, 0.8]);
        let result = classify(&leaf(), &model, &names(&["healthy", "blast"])).unwrap();

        assert_eq!(result.class_name, "blast");
        assert_eq!(result.class_index, 1);
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_classify_tie_goes_to_first() {
        let model = FixedModel(vec![0.5, 0.5]);
        let result = classify(&leaf(), &model, &names(&["healthy", "blast"])).unwrap();
        assert_eq!(result.class_index, 0);
    }

    #[test]
    fn test_classify_rejects_bad_outputs() {
        let classes = names(&["healthy", "blast"]);

        let short = FixedModel(vec![1.0]);
        assert!(matches!(classify(&leaf(), &short, &classes), Err(AgronomicareError::Inference(_))));

        let empty = FixedModel(Vec::new());
        assert!(classify(&leaf(), &empty, &classes).is_err());

        let nan = FixedModel(vec![f32::NAN, 0.5]);
        assert!(classify(&leaf(), &nan, &classes).is_err());
    }

    #[test]
    fn test_predictor_output_is_distribution() {
        let device = Default::default();
        let mut config = ModelConfig::new(3).with_backbone(BackboneVariant::Tiny);
        config.input_size = 32;
        let model = CropClassifier::<NdArray>::new(&config, &device);
        let catalog = ClassCatalog::new(names(&["healthy", "blast", "tungro"])).unwrap();
        let predictor = Predictor::new(ModelArtifact::new(model, config, catalog).unwrap(), &device);

        let result = classify(&leaf(), &predictor, predictor.catalog()).unwrap();
        assert!(result.class_index < 3);
        assert!((0.0..=1.0).contains(&result.confidence));

        let input = PreprocessedImage::with_filter(&leaf(), 32, FilterType::Triangle);
        let probs = predictor.predict(&input).unwrap();
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_predictor_rejects_wrong_resolution() {
        let device = Default::default();
        let config = ModelConfig::new(2).with_backbone(BackboneVariant::Tiny);
        let model = CropClassifier::<NdArray>::new(&config, &device);
        let catalog = ClassCatalog::new(names(&["healthy", "blast"])).unwrap();
        let predictor = Predictor::new(ModelArtifact::new(model, config, catalog).unwrap(), &device);

        let input = PreprocessedImage::with_filter(&leaf(), 16, FilterType::Nearest);
        assert!(matches!(predictor.predict(&input), Err(AgronomicareError::InvalidInput(_))));
    }
}
