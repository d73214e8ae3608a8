//! End-to-end: directory tree to trained artifact to diagnosis

use std::path::Path;

use agronomicare::dataset::{CropDataset, CropImageDataset, TrainValSplit};
use agronomicare::inference::{classify, Predictor};
use agronomicare::model::{
    build_model, unfreeze_and_clone, BackboneSource, BackboneVariant, ModelArtifact, ModelConfig,
};
use agronomicare::recommend::{RemedyField, RemedyTable};
use agronomicare::training::{fit, FitOptions};
use approx::assert_abs_diff_eq;
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::tempdir;

type Train = Autodiff<NdArray>;

const SIZE: usize = 32;

fn write_tree(root: &Path) {
    let classes = [("blast", [150u8, 110, 40]), ("healthy", [30, 160, 50])];
    for (class, color) in classes {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..5 {
            RgbImage::from_pixel(48 + i, 40, Rgb(color))
                .save(dir.join(format!("leaf_{}.png", i)))
                .unwrap();
        }
    }
    std::fs::write(root.join("README.txt"), "not an image").unwrap();
}

#[test]
fn train_save_load_and_diagnose() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write_tree(&data);

    let dataset = CropDataset::from_directory(&data);
    assert_eq!(dataset.len(), 10);
    let catalog = dataset.catalog().unwrap();
    assert_eq!(catalog.names(), ["blast".to_string(), "healthy".to_string()]);

    let split = TrainValSplit::standard(&dataset.records).unwrap();
    assert_eq!(split.validation.len(), 2);
    assert_eq!(split.train.len(), 8);

    let mut config = ModelConfig::new(catalog.len()).with_backbone(BackboneVariant::Tiny);
    config.input_size = SIZE;
    let train = CropImageDataset::new(dataset.samples(&split.train), SIZE);
    let validation = CropImageDataset::new(dataset.samples(&split.validation), SIZE);

    let device = Default::default();
    let compiled = build_model::<Train>(&config, &BackboneSource::RandomInit, &device).unwrap();
    let head = FitOptions::new("head", 1, 4, 42);
    let (compiled, mut history) = fit(compiled, &catalog, &train, &validation, &head, &device).unwrap();

    let fine = unfreeze_and_clone(&compiled);
    let checkpoint = dir.path().join("model");
    let fine_options = FitOptions::new("fine-tune", 1, 4, 42).with_checkpoint_dir(&checkpoint);
    let (fine, fine_history) = fit(fine, &catalog, &train, &validation, &fine_options, &device).unwrap();
    history.extend(&fine_history);
    assert_eq!(history.len(), 2);

    // Reload the saved checkpoint on the inference backend.
    let predictor = Predictor::<NdArray>::load(&checkpoint, &device).unwrap();
    assert_eq!(predictor.catalog(), catalog.names());

    let leaf = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 90, Rgb([30, 160, 50])));
    let prediction = classify(&leaf, &predictor, predictor.catalog()).unwrap();
    assert!(prediction.class_index < 2);
    assert!((0.0..=1.0).contains(&prediction.confidence));
    assert_eq!(prediction.class_name, catalog.names()[prediction.class_index]);

    // The in-memory model agrees with the reloaded one up to record precision.
    let artifact = ModelArtifact::new(fine.model.valid(), config, catalog.clone()).unwrap();
    let in_memory = Predictor::new(artifact, &device);
    let direct = classify(&leaf, &in_memory, in_memory.catalog()).unwrap();
    assert_abs_diff_eq!(direct.confidence, prediction.confidence, epsilon = 5e-2);
}

#[test]
fn remedies_follow_the_prediction() {
    let csv = "\"disease\n\",natural_remedies,chemical_control\nblast,Neem oil,X\nhealthy,,\n";
    let table = RemedyTable::from_reader(csv.as_bytes()).unwrap();

    assert_eq!(table.lookup("blast", RemedyField::ChemicalControl), Some("X"));
    assert_eq!(table.lookup("unknown", RemedyField::ChemicalControl), None);
    assert_eq!(table.lookup("healthy", RemedyField::NaturalRemedies), None);
}

#[test]
fn empty_directory_gives_empty_dataset() {
    let dir = tempdir().unwrap();
    let dataset = CropDataset::from_directory(dir.path().join("missing"));
    assert!(dataset.is_empty());

    let split = TrainValSplit::standard(&dataset.records).unwrap();
    assert!(split.train.is_empty() && split.validation.is_empty());
}
