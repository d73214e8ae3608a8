//! Crop Image Dataset Loader
//!
//! Enumerates an image directory tree into a labeled table of
//! `(image_path, class)` rows. The directory is structured as:
//!
//! ```text
//! root_dir/
//! ├── blast/
//! │   ├── image1.jpg
//! │   └── image2.jpg
//! ├── healthy/
//! │   └── ...
//! └── ...
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::ClassCatalog;
use crate::utils::error::{AgronomicareError, Result};

/// File extensions recognized as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image path with its class label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledImageRecord {
    /// Path to the image file
    pub image_path: PathBuf,
    /// Class name, taken from the parent directory
    #[serde(rename = "class")]
    pub class_label: String,
}

/// Labeled table of every image under a class-per-directory root
#[derive(Debug, Clone, Default)]
pub struct CropDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// All records, grouped by class in sorted class order
    pub records: Vec<LabeledImageRecord>,
    /// Sorted subdirectory names; the index is the label
    pub class_names: Vec<String>,
}

impl CropDataset {
    /// Enumerate `root_dir`
    ///
    /// A missing or unreadable directory gives an empty dataset and a warning.
    pub fn from_directory<P: AsRef<Path>>(root_dir: P) -> Self {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading crop dataset from: {:?}", root_dir);

        let entries = match std::fs::read_dir(&root_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Dataset directory {:?} is not readable: {}", root_dir, e);
                return Self {
                    root_dir,
                    ..Self::default()
                };
            }
        };

        let mut class_names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        class_names.sort();

        let mut records = Vec::new();
        for class_name in &class_names {
            let class_dir = root_dir.join(class_name);

            let mut files: Vec<PathBuf> = WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.is_file() && is_image_file(p))
                .collect();
            files.sort();

            debug!("Class '{}': {} images", class_name, files.len());

            records.extend(files.into_iter().map(|image_path| LabeledImageRecord {
                image_path,
                class_label: class_name.clone(),
            }));
        }

        if records.is_empty() {
            warn!("No images found under {:?}", root_dir);
        } else {
            info!(
                "Loaded {} images in {} classes",
                records.len(),
                class_names.len()
            );
        }

        Self {
            root_dir,
            records,
            class_names,
        }
    }

    /// Get the number of records in the dataset
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the number of classes
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Catalog in label order (sorted directory names)
    pub fn catalog(&self) -> Result<ClassCatalog> {
        ClassCatalog::new(self.class_names.clone())
    }

    /// Label index of a record's class
    pub fn label_of(&self, record: &LabeledImageRecord) -> Option<usize> {
        self.class_names.iter().position(|c| *c == record.class_label)
    }

    /// `(path, label)` pairs for the given records
    pub fn samples(&self, records: &[LabeledImageRecord]) -> Vec<(PathBuf, usize)> {
        records
            .iter()
            .filter_map(|r| self.label_of(r).map(|label| (r.image_path.clone(), label)))
            .collect()
    }

    /// Write the table as CSV with the columns `image_path,class`
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!("Wrote {} rows to {:?}", self.records.len(), path);
        Ok(())
    }

    /// Get statistics about the dataset
    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts: BTreeMap<String, usize> = self
            .class_names
            .iter()
            .map(|name| (name.clone(), 0))
            .collect();
        for record in &self.records {
            *class_counts.entry(record.class_label.clone()).or_default() += 1;
        }

        DatasetStats {
            total_samples: self.records.len(),
            num_classes: self.class_names.len(),
            class_counts,
        }
    }
}

/// Whether a path has one of the recognized image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Rename the class subdirectory `old` of `parent` to `new`
///
/// Returns `false` when `parent/old` is not a directory.
pub fn rename_class_dir(parent: &Path, old: &str, new: &str) -> Result<bool> {
    let old_path = parent.join(old);
    if !old_path.is_dir() {
        warn!("Class directory {:?} not found", old_path);
        return Ok(false);
    }

    let new_path = parent.join(new);
    if new_path.exists() {
        return Err(AgronomicareError::Dataset(format!(
            "cannot rename {:?}: {:?} already exists",
            old_path, new_path
        )));
    }

    std::fs::rename(&old_path, &new_path)?;
    info!("Renamed {:?} to {:?}", old_path, new_path);
    Ok(true)
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: BTreeMap<String, usize>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Samples per class:");

        for (idx, (name, count)) in self.class_counts.iter().enumerate() {
            let bar_len = if self.total_samples > 0 {
                (*count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            println!("    {:3}. {:30} {:5} {}", idx, name, count, "█".repeat(bar_len));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"not really an image").unwrap();
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dataset = CropDataset::from_directory("/definitely/not/here");
        assert!(dataset.is_empty());
        assert_eq!(dataset.num_classes(), 0);
    }

    #[test]
    fn test_enumerates_sorted_classes_and_image_files() {
        let dir = tempdir().unwrap();
        for class in ["healthy", "blast"] {
            fs::create_dir(dir.path().join(class)).unwrap();
        }
        touch(&dir.path().join("blast/a.JPG"));
        touch(&dir.path().join("blast/b.png"));
        touch(&dir.path().join("blast/notes.txt"));
        touch(&dir.path().join("healthy/c.jpeg"));
        touch(&dir.path().join("stray.jpg"));

        let dataset = CropDataset::from_directory(dir.path());

        assert_eq!(dataset.class_names, vec!["blast", "healthy"]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.records[0].class_label, "blast");
        assert_eq!(dataset.records[2].class_label, "healthy");

        let samples = dataset.samples(&dataset.records);
        assert_eq!(samples.iter().map(|(_, l)| *l).collect::<Vec<_>>(), vec![0, 0, 1]);

        let stats = dataset.get_stats();
        assert_eq!(stats.class_counts["blast"], 2);
        assert_eq!(stats.class_counts["healthy"], 1);
    }

    #[test]
    fn test_write_csv_columns() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("blast")).unwrap();
        touch(&dir.path().join("blast/a.jpg"));

        let dataset = CropDataset::from_directory(dir.path());
        let csv_path = dir.path().join("table.csv");
        dataset.write_csv(&csv_path).unwrap();

        let text = fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("image_path,class"));
        assert!(lines.next().unwrap().ends_with("a.jpg,blast"));
    }

    #[test]
    fn test_rename_class_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("Rice Blast")).unwrap();

        assert!(rename_class_dir(dir.path(), "Rice Blast", "blast").unwrap());
        assert!(dir.path().join("blast").is_dir());
        assert!(!rename_class_dir(dir.path(), "Rice Blast", "blast").unwrap());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("leaf.JPEG")));
        assert!(is_image_file(Path::new("leaf.bmp")));
        assert!(!is_image_file(Path::new("leaf.gif")));
        assert!(!is_image_file(Path::new("leaf")));
    }
}
