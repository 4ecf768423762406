//! Caption table: `file_name` joined to five reference captions.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::CAPTIONS_PER_AUDIO;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct CaptionRow {
    file_name: String,
    caption_1: String,
    caption_2: String,
    caption_3: String,
    caption_4: String,
    caption_5: String,
}

/// Raw captions keyed by exact audio file name.
#[derive(Debug, Clone, Default)]
pub struct CaptionTable {
    rows: HashMap<String, [String; CAPTIONS_PER_AUDIO]>,
}

impl CaptionTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Dataset(format!("cannot open caption table {}: {e}", path.display()))
        })?;
        let table = Self::from_reader(file)?;
        tracing::info!(path = %path.display(), rows = table.len(), "loaded caption table");
        Ok(table)
    }

    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        let mut rows = HashMap::new();
        for record in csv::Reader::from_reader(reader).deserialize() {
            let row: CaptionRow = record?;
            let captions = [
                row.caption_1,
                row.caption_2,
                row.caption_3,
                row.caption_4,
                row.caption_5,
            ];
            if rows.insert(row.file_name.clone(), captions).is_some() {
                return Err(Error::Dataset(format!(
                    "caption table lists {:?} more than once",
                    row.file_name
                )));
            }
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The five captions of `file_name`. A missing row or a blank caption
    /// is a dataset error.
    pub fn captions(&self, file_name: &str) -> Result<&[String; CAPTIONS_PER_AUDIO]> {
        let captions = self.rows.get(file_name).ok_or_else(|| {
            Error::Dataset(format!("audio file {file_name:?} has no row in the caption table"))
        })?;
        if let Some(i) = captions.iter().position(|c| c.trim().is_empty()) {
            return Err(Error::Dataset(format!(
                "caption_{} of {file_name:?} is empty",
                i + 1
            )));
        }
        Ok(captions)
    }
}
