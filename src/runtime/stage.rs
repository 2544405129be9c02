use anyhow::Error as AnyError;
use std::path::{Path, PathBuf};

/// Execution stages of an ingestion run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Resolving,
    Preparing,
    Counting,
    Paging,
    Done,
    Aborted,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Resolving => "resolving",
            RunStage::Preparing => "preparing",
            RunStage::Counting => "counting",
            RunStage::Paging => "paging",
            RunStage::Done => "done",
            RunStage::Aborted => "aborted",
        }
    }
}

impl core::fmt::Display for RunStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a run. Carries enough context for an operator to
/// decide whether the partially written file is usable.
#[derive(Debug)]
pub struct RunAborted {
    stage: RunStage,
    height: Option<u64>,
    persisted: u64,
    destination: Option<PathBuf>,
    source: AnyError,
}

impl RunAborted {
    pub fn new(stage: RunStage, source: AnyError) -> Self {
        Self {
            stage,
            height: None,
            persisted: 0,
            destination: None,
            source,
        }
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_persisted(mut self, persisted: u64) -> Self {
        self.persisted = persisted;
        self
    }

    pub fn with_destination(mut self, destination: PathBuf) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Stage that was executing when the failure occurred.
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn height(&self) -> Option<u64> {
        self.height
    }

    /// Records committed to the destination before the failure.
    pub fn persisted(&self) -> u64 {
        self.persisted
    }

    /// Snapshot file the run was writing, once preparation began.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn cause(&self) -> &AnyError {
        &self.source
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for RunAborted {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ingestion aborted while {}", self.stage)?;
        if let Some(height) = self.height {
            write!(f, " at height {height}")?;
        }
        write!(f, " after persisting {} records", self.persisted)?;
        if let Some(destination) = &self.destination {
            write!(f, " to {}", destination.display())?;
        }
        write!(f, ": {:#}", self.source)
    }
}

impl std::error::Error for RunAborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
