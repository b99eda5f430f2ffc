//! Append-only CSV record of saved pages

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;

use crate::sink::{PageSink, SinkError};

const HEADER: [&str; 3] = ["id", "source_url", "discovered_at"];

struct CsvState {
    writer: csv::Writer<File>,
    /// Number given to the next saved row
    next_number: u64,
    /// source_url -> id of every row in the file
    ids: HashMap<String, String>,
}

/// Writes one `id,source_url,discovered_at` row per saved page
///
/// Ids are `<prefix>-<seven digit counter>`. Reopening an existing file
/// continues the counter, and saving a URL that is already in the file returns
/// its existing id without writing a row.
pub struct CsvSink {
    path: PathBuf,
    id_prefix: String,
    state: Mutex<CsvState>,
}

impl CsvSink {
    /// Open `path` for appending, creating it with a header row if needed
    pub fn open(path: impl AsRef<Path>, id_prefix: impl Into<String>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let ids = read_existing(&path)?;
        let has_rows = path.metadata().map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if !has_rows {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        debug!(path = %path.display(), existing = ids.len(), "Opened output file");
        Ok(Self {
            path,
            id_prefix: id_prefix.into(),
            state: Mutex::new(CsvState {
                writer,
                next_number: ids.len() as u64 + 1,
                ids,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows in the file, including those written by earlier runs
    pub async fn len(&self) -> usize {
        self.state.lock().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl PageSink for CsvSink {
    #[instrument(skip(self), fields(url = %url))]
    async fn save(&self, url: &Url) -> Result<String, SinkError> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.ids.get(url.as_str()) {
            debug!(%id, "Already saved");
            return Ok(id.clone());
        }

        // One short row and a flush per save; written inline rather than on the blocking pool
        let id = format!("{}-{:07}", self.id_prefix, state.next_number);
        let discovered_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        state
            .writer
            .write_record([id.as_str(), url.as_str(), discovered_at.as_str()])?;
        state.writer.flush()?;

        state.next_number += 1;
        state.ids.insert(url.to_string(), id.clone());
        info!(%id, "Saved page");
        Ok(id)
    }
}

fn read_existing(path: &Path) -> Result<HashMap<String, String>, SinkError> {
    let mut ids = HashMap::new();
    if !path.exists() {
        return Ok(ids);
    }

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    for record in reader.records() {
        let record = record?;
        if let (Some(id), Some(source_url)) = (record.get(0), record.get(1)) {
            ids.insert(source_url.to_string(), id.to_string());
        }
    }
    Ok(ids)
}
