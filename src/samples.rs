use std::collections::HashSet;
use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleSheetError {
    #[error("failed to open sample sheet '{path}': {source}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse record {line} of sample sheet: {source}")]
    Parse {
        line: usize,
        #[source]
        source: csv::Error,
    },

    #[error("duplicate sample '{0}' in sample sheet")]
    Duplicate(String),

    #[error("sample sheet is empty")]
    Empty,
}

/// One row of a sample sheet: `sample<TAB>input[<TAB>secondary_input]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SampleEntry {
    pub sample: String,
    pub input: Utf8PathBuf,
    #[serde(default)]
    pub secondary_input: Option<Utf8PathBuf>,
}

/// Samples to push through one stage, in file order.
#[derive(Debug, Clone, Default)]
pub struct SampleSheet {
    entries: Vec<SampleEntry>,
}

impl SampleSheet {
    pub fn from_path(path: impl AsRef<Utf8Path>) -> Result<Self, SampleSheetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SampleSheetError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SampleSheetError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (line_num, result) in reader.deserialize().enumerate() {
            let entry: SampleEntry = result.map_err(|source| SampleSheetError::Parse {
                line: line_num + 1,
                source,
            })?;
            if !seen.insert(entry.sample.clone()) {
                return Err(SampleSheetError::Duplicate(entry.sample));
            }
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(SampleSheetError::Empty);
        }

        Ok(Self { entries })
    }

    pub fn single(sample: String, input: Utf8PathBuf, secondary_input: Option<Utf8PathBuf>) -> Self {
        Self {
            entries: vec![SampleEntry {
                sample,
                input,
                secondary_input,
            }],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
