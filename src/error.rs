use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    // Structural: the document is not the shape we expect. Fatal for that document.
    #[error("no <table> element found in catalog document")]
    NoTable,
    #[error("no header line matching {markers:?} found in measurement text")]
    NoHeader { markers: Vec<String> },

    // External tool
    #[error("failed to run {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    // Fetching
    #[error("GET {url} returned HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown source encoding {0:?}")]
    UnknownEncoding(String),
}

impl ExtractError {
    /// Errors worth retrying at the fetch layer (rate limits, server faults, transport).
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::Http { status, .. } => *status == 429 || *status >= 500,
            ExtractError::Request { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

/// A row or record dropped during extraction. Never fatal; callers count these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub lot: Option<u32>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SkipReason {
    /// Catalog row with fewer cells than the layout needs.
    ShortRow { row: usize, cells: usize },
    /// Catalog row whose lot cell is not a positive integer.
    BadLotNumber { row: usize, text: String },
    /// Measurement line that could not start a record. In stream text it is
    /// dropped to resync and carries no lot; in row text the lot is lost.
    BrokenMeasurement { line: String },
    /// Lot number in the run with no measurement lines left.
    NoMeasurement,
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(lot) = self.lot {
            write!(f, "lot {}: ", lot)?;
        }
        match &self.reason {
            SkipReason::ShortRow { row, cells } => write!(f, "row {} has only {} cells", row, cells),
            SkipReason::BadLotNumber { row, text } => {
                write!(f, "row {} lot cell {:?} is not a lot number", row, text)
            }
            SkipReason::BrokenMeasurement { line } => {
                write!(f, "dropped measurement line {:?}", line)
            }
            SkipReason::NoMeasurement => write!(f, "no measurement lines left"),
        }
    }
}
