//! Remedy table loading and lookup

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::error::{AgronomicareError, Result};

/// Column holding the class name each row is keyed by
pub const KEY_COLUMN: &str = "disease";
/// Key column used when [`KEY_COLUMN`] is absent
pub const FALLBACK_KEY_COLUMN: &str = "disease_name";

/// Free-text fields of a remedy row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemedyField {
    DiseaseName,
    DiseaseDescription,
    NaturalRemedies,
    ChemicalControl,
}

impl RemedyField {
    pub const ALL: [RemedyField; 4] = [
        RemedyField::DiseaseName,
        RemedyField::DiseaseDescription,
        RemedyField::NaturalRemedies,
        RemedyField::ChemicalControl,
    ];

    /// CSV header of the field
    pub fn column(&self) -> &'static str {
        match self {
            RemedyField::DiseaseName => "disease_name",
            RemedyField::DiseaseDescription => "disease_description",
            RemedyField::NaturalRemedies => "natural_remedies",
            RemedyField::ChemicalControl => "chemical_control",
        }
    }
}

impl fmt::Display for RemedyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for RemedyField {
    type Err = AgronomicareError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_lowercase();
        RemedyField::ALL
            .into_iter()
            .find(|field| field.column() == wanted)
            .ok_or_else(|| AgronomicareError::InvalidInput(format!("unknown remedy field '{}'", s)))
    }
}

/// One row of the remedy table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemedyRecord {
    /// Class name the row is keyed by (trimmed)
    pub disease: String,
    pub disease_name: Option<String>,
    pub disease_description: Option<String>,
    pub natural_remedies: Option<String>,
    pub chemical_control: Option<String>,
}

impl RemedyRecord {
    pub fn field(&self, field: RemedyField) -> Option<&str> {
        let value = match field {
            RemedyField::DiseaseName => &self.disease_name,
            RemedyField::DiseaseDescription => &self.disease_description,
            RemedyField::NaturalRemedies => &self.natural_remedies,
            RemedyField::ChemicalControl => &self.chemical_control,
        };
        value.as_deref()
    }
}

/// Remedy rows indexed by class name
#[derive(Debug, Clone, Default)]
pub struct RemedyTable {
    records: Vec<RemedyRecord>,
    index: HashMap<String, usize>,
}

impl RemedyTable {
    /// Load the table from a CSV file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AgronomicareError::PathNotFound(path.to_path_buf()));
        }
        let table = Self::from_reader(std::fs::File::open(path)?)?;
        info!("Loaded {} remedy rows from {:?}", table.len(), path);
        Ok(table)
    }

    /// Parse CSV with a header row
    ///
    /// Header names are trimmed, so `disease\n` is the `disease` column. Key
    /// values are trimmed too; when a key repeats, the first row wins. Empty
    /// cells and absent columns read as `None`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = ReaderBuilder::new()
            .trim(Trim::Headers)
            .flexible(true)
            .from_reader(reader);

        let headers = csv.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);

        let key = position(KEY_COLUMN)
            .or_else(|| position(FALLBACK_KEY_COLUMN))
            .ok_or_else(|| {
                AgronomicareError::Dataset(format!(
                    "remedy table has neither a '{}' nor a '{}' column",
                    KEY_COLUMN, FALLBACK_KEY_COLUMN
                ))
            })?;
        let columns: Vec<(RemedyField, Option<usize>)> = RemedyField::ALL
            .into_iter()
            .map(|field| (field, position(field.column())))
            .collect();

        let mut table = Self::default();
        for row in csv.records() {
            let row = row?;
            let disease = match row.get(key).map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };
            if table.index.contains_key(&disease) {
                warn!("Duplicate remedy row for '{}' ignored", disease);
                continue;
            }

            let mut record = RemedyRecord {
                disease: disease.clone(),
                ..Default::default()
            };
            for (field, column) in &columns {
                let value = column.and_then(|c| cell(&row, c));
                match field {
                    RemedyField::DiseaseName => record.disease_name = value,
                    RemedyField::DiseaseDescription => record.disease_description = value,
                    RemedyField::NaturalRemedies => record.natural_remedies = value,
                    RemedyField::ChemicalControl => record.chemical_control = value,
                }
            }

            table.index.insert(disease, table.records.len());
            table.records.push(record);
        }
        Ok(table)
    }

    /// Field value for an exact class name, `None` when either is missing
    pub fn lookup(&self, class_name: &str, field: RemedyField) -> Option<&str> {
        self.record(class_name)?.field(field)
    }

    pub fn record(&self, class_name: &str) -> Option<&RemedyRecord> {
        self.index.get(class_name).map(|&i| &self.records[i])
    }

    /// Class names in file order
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.disease.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn cell(row: &StringRecord, column: usize) -> Option<String> {
    row.get(column)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TABLE: &str = r#""disease
",disease_name,disease_description,natural_remedies,chemical_control
blast,Rice blast,Fungal lesions,"Neem oil
Silicon",X
healthy,,,,
 tungro ,Tungro,Viral,Remove hosts,Insecticide
blast,Duplicate,,,Y
"#;

    #[test]
    fn test_lookup_by_exact_name() {
        let table = RemedyTable::from_reader(TABLE.as_bytes()).unwrap();

        assert_eq!(table.lookup("blast", RemedyField::ChemicalControl), Some("X"));
        assert_eq!(table.lookup("blast", RemedyField::NaturalRemedies), Some("Neem oil\nSilicon"));
        assert_eq!(table.lookup("unknown", RemedyField::ChemicalControl), None);
        assert_eq!(table.lookup("Blast", RemedyField::ChemicalControl), None);
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let table = RemedyTable::from_reader(TABLE.as_bytes()).unwrap();
        let first = table.lookup("tungro", RemedyField::DiseaseDescription);
        assert_eq!(first, table.lookup("tungro", RemedyField::DiseaseDescription));
        assert_eq!(first, Some("Viral"));
    }

    #[test]
    fn test_keys_trimmed_and_first_duplicate_wins() {
        let table = RemedyTable::from_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.classes().collect::<Vec<_>>(), vec!["blast", "healthy", "tungro"]);
        assert_eq!(table.lookup("blast", RemedyField::DiseaseName), Some("Rice blast"));
    }

    #[test]
    fn test_empty_cells_are_none() {
        let table = RemedyTable::from_reader(TABLE.as_bytes()).unwrap();
        assert!(table.record("healthy").is_some());
        assert_eq!(table.lookup("healthy", RemedyField::NaturalRemedies), None);
    }

    #[test]
    fn test_fallback_key_column() {
        let csv = "disease_name,chemical_control\nblast,X\n";
        let table = RemedyTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.lookup("blast", RemedyField::ChemicalControl), Some("X"));
        assert_eq!(table.lookup("blast", RemedyField::DiseaseName), Some("blast"));
        assert_eq!(table.lookup("blast", RemedyField::NaturalRemedies), None);
    }

    #[test]
    fn test_missing_key_column_is_an_error() {
        let csv = "name,chemical_control\nblast,X\n";
        assert!(matches!(
            RemedyTable::from_reader(csv.as_bytes()),
            Err(AgronomicareError::Dataset(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("remedies.csv");
        std::fs::write(&path, TABLE).unwrap();

        let table = RemedyTable::from_path(&path).unwrap();
        assert_eq!(table.lookup("tungro", RemedyField::ChemicalControl), Some("Insecticide"));

        assert!(matches!(
            RemedyTable::from_path(dir.path().join("missing.csv")),
            Err(AgronomicareError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_field_names() {
        assert_eq!("chemical-control".parse::<RemedyField>().unwrap(), RemedyField::ChemicalControl);
        assert_eq!(RemedyField::NaturalRemedies.to_string(), "natural_remedies");
        assert!("price".parse::<RemedyField>().is_err());
    }
}
