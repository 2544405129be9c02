use std::fmt;

/// Mutable state of one ingestion run. Owned by the ingestor and discarded
/// when the run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRun {
    height: u64,
    cursor: String,
    records: u64,
    pages: u64,
    baseline: Option<u64>,
}

impl IngestionRun {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            cursor: String::new(),
            records: 0,
            pages: 0,
            baseline: None,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Last persisted primary key; empty before the first page.
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    pub fn set_baseline(&mut self, baseline: Option<u64>) {
        self.baseline = baseline;
    }

    /// Records a persisted page and moves the cursor to its last key.
    pub fn advance(&mut self, last_id: &str, page_len: usize) {
        self.cursor.clear();
        self.cursor.push_str(last_id);
        self.records = self.records.saturating_add(page_len as u64);
        self.pages = self.pages.saturating_add(1);
    }

    pub fn observation(&self) -> ProgressObservation {
        ProgressObservation {
            height: self.height,
            records: self.records,
            pages: self.pages,
            baseline: self.baseline,
        }
    }
}

/// Progress emitted after each persisted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressObservation {
    pub height: u64,
    pub records: u64,
    pub pages: u64,
    pub baseline: Option<u64>,
}

impl fmt::Display for ProgressObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.baseline {
            Some(total) => write!(f, "{}/{}", self.records, total),
            None => write!(f, "{}/?", self.records),
        }
    }
}

/// Receives progress observations. The baseline is informational, so the
/// record count may legitimately exceed it.
pub trait ProgressSink: Send + Sync {
    fn observe(&self, observation: &ProgressObservation);
}

/// Default sink: one `info` line per page.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn observe(&self, observation: &ProgressObservation) {
        tracing::info!(
            height = observation.height,
            pages = observation.pages,
            "progress: {observation}"
        );
    }
}
