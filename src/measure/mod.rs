//! Measurement extractor: PDF text dump -> lot number -> height / girth / cannon.
//!
//! Text comes from `pdftotext` in one of two modes (see [`LayoutMode`]). Both
//! share the first step: find the header line. What follows it is handed to
//! the layout strategy for that mode.

pub mod layout;
pub mod stream;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{LayoutMode, MeasureConfig};
use crate::error::{ExtractError, SkippedRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MeasurementEntry {
    Measured {
        lot: u32,
        /// cm at the withers
        height: u32,
        /// cm
        girth: u32,
        /// cm, one decimal place
        cannon: f64,
    },
    Absent {
        lot: u32,
    },
}

impl MeasurementEntry {
    pub fn lot(&self) -> u32 {
        match self {
            MeasurementEntry::Measured { lot, .. } | MeasurementEntry::Absent { lot } => *lot,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, MeasurementEntry::Absent { .. })
    }
}

#[derive(Debug, Default, Clone)]
pub struct MeasurementExtraction {
    pub entries: Vec<MeasurementEntry>,
    pub skipped: Vec<SkippedRecord>,
    pub header_found: bool,
}

impl MeasurementExtraction {
    /// Turn a missing header into a hard error for callers that abort on it.
    pub fn require_header(self, cfg: &MeasureConfig) -> Result<Self, ExtractError> {
        if self.header_found {
            Ok(self)
        } else {
            Err(ExtractError::NoHeader {
                markers: cfg.header_markers.clone(),
            })
        }
    }
}

/// How the lines after the header are turned into entries.
pub trait MeasurementLayout: Send + Sync {
    fn mode(&self) -> LayoutMode;

    /// `lines` starts just after the header line.
    fn extract(&self, lines: &[&str], cfg: &MeasureConfig) -> MeasurementExtraction;
}

pub fn layout_for(mode: LayoutMode) -> Box<dyn MeasurementLayout> {
    match mode {
        LayoutMode::Stream => Box::new(stream::StreamLayout),
        LayoutMode::Layout => Box::new(layout::RowLayout),
    }
}

/// Extract every measurement entry from `text`.
///
/// Never fails: a document without a header yields an empty result with
/// `header_found == false`.
pub fn extract_measurements(text: &str, cfg: &MeasureConfig) -> MeasurementExtraction {
    let lines: Vec<&str> = text.lines().collect();

    let Some(header) = find_header(&lines, &cfg.header_markers) else {
        warn!(
            "No header line matching {:?} in {} lines of measurement text",
            cfg.header_markers,
            lines.len()
        );
        return MeasurementExtraction::default();
    };
    let layout = layout_for(cfg.layout);
    debug!("Header at line {}: {:?} ({} layout)", header, lines[header], layout.mode().as_str());

    let mut out = layout.extract(&lines[header + 1..], cfg);
    out.header_found = true;
    out
}

fn find_header(lines: &[&str], markers: &[String]) -> Option<usize> {
    lines.iter().position(|line| {
        markers
            .iter()
            .any(|m| !m.is_empty() && line.contains(m.as_str()))
    })
}

/// True when `line` contains any configured terminator.
pub(crate) fn is_terminator(line: &str, terminators: &[String]) -> bool {
    terminators
        .iter()
        .any(|t| !t.is_empty() && line.contains(t.as_str()))
}
