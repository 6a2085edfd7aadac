use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    time::Instant,
};

/// Column holding the stable record identifier.
pub const PROFILE_ID: &str = "profile_id";
/// Column holding the text that gets embedded.
pub const PROFILE_TEXT: &str = "profile_text";

/// Names that belong to the search output and are never carried as record fields.
pub const RESERVED_FIELDS: [&str; 2] = ["embedding", "similarity"];

/// A customer profile as ingested from the record source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub profile_id: String,
    pub profile_text: String,

    /// Every other column, carried through as-is.
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(profile_id: impl Into<String>, profile_text: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            profile_text: profile_text.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds an extra field. Reserved names are ignored.
    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        if !is_reserved(name) {
            self.fields.insert(name.to_string(), value.into());
        }
        self
    }
}

fn is_reserved(name: &str) -> bool {
    name == PROFILE_ID || name == PROFILE_TEXT || RESERVED_FIELDS.contains(&name)
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record source {0:?} not found")]
    NotFound(PathBuf),

    #[error("missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("row {row}: empty profile_id")]
    EmptyId { row: usize },

    #[error("row {row}: duplicate profile_id {id:?}")]
    DuplicateId { row: usize, id: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
}

/// Where the index builder ingests records from.
pub trait RecordSource: Send + Sync {
    fn load(&self) -> Result<Vec<Record>, RecordError>;

    fn describe(&self) -> String;
}

/// Records read from a CSV file with a header row.
///
/// `profile_id` and `profile_text` columns are required, every other column becomes
/// a string field on the record.
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for CsvRecordSource {
    fn load(&self) -> Result<Vec<Record>, RecordError> {
        if !self.path.exists() {
            return Err(RecordError::NotFound(self.path.clone()));
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(&self.path)?;
        let headers = csv_reader.headers()?.clone();

        let id_col = headers
            .iter()
            .position(|h| h == PROFILE_ID)
            .ok_or(RecordError::MissingColumn(PROFILE_ID))?;
        let text_col = headers
            .iter()
            .position(|h| h == PROFILE_TEXT)
            .ok_or(RecordError::MissingColumn(PROFILE_TEXT))?;

        for name in headers.iter().filter(|h| RESERVED_FIELDS.contains(h)) {
            log::warn!("dropping reserved column {name:?} from {:?}", self.path);
        }

        let mut seen = HashSet::new();
        let mut records = vec![];
        for (idx, row) in csv_reader.records().enumerate() {
            let row = row?;
            // header is line 1
            let line = idx + 2;

            let profile_id = row.get(id_col).unwrap_or_default().to_string();
            if profile_id.trim().is_empty() {
                return Err(RecordError::EmptyId { row: line });
            }
            if !seen.insert(profile_id.clone()) {
                return Err(RecordError::DuplicateId {
                    row: line,
                    id: profile_id,
                });
            }

            let profile_text = row.get(text_col).unwrap_or_default().to_string();
            if profile_text.trim().is_empty() {
                log::warn!("row {line}: profile {profile_id:?} has empty profile_text");
            }

            let mut record = Record::new(profile_id, profile_text);
            for (name, value) in headers.iter().zip(row.iter()) {
                record = record.with_field(name, value);
            }

            records.push(record);
        }

        log::debug!(
            "took {}ms to read {} records from csv",
            now.elapsed().as_micros() as f64 / 1000.0,
            records.len()
        );

        Ok(records)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Records held in memory, handed out in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    records: Vec<Record>,
}

impl MemoryRecordSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl RecordSource for MemoryRecordSource {
    fn load(&self) -> Result<Vec<Record>, RecordError> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("memory ({} records)", self.records.len())
    }
}
