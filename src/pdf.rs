//! PDF -> text through Poppler's `pdftotext`.

use std::io::Write;
use std::process::Command;

use tracing::debug;

use crate::config::LayoutMode;
use crate::error::ExtractError;

pub trait TextExtractor: Send + Sync {
    /// UTF-8 text of the whole document, in reading order or column layout.
    fn extract_text(&self, pdf: &[u8], mode: LayoutMode) -> Result<String, ExtractError>;
}

pub struct PdftotextExtractor {
    tool: String,
}

impl PdftotextExtractor {
    pub fn new(tool: impl Into<String>) -> Self {
        PdftotextExtractor { tool: tool.into() }
    }

    fn mode_flag(mode: LayoutMode) -> &'static str {
        match mode {
            LayoutMode::Stream => "-raw",
            LayoutMode::Layout => "-layout",
        }
    }
}

impl TextExtractor for PdftotextExtractor {
    fn extract_text(&self, pdf: &[u8], mode: LayoutMode) -> Result<String, ExtractError> {
        // Removed on drop, whichever way this returns.
        let mut file = tempfile::Builder::new()
            .prefix("seri-")
            .suffix(".pdf")
            .tempfile()?;
        file.write_all(pdf)?;
        file.flush()?;

        debug!("{} {} {}", self.tool, Self::mode_flag(mode), file.path().display());
        let output = Command::new(&self.tool)
            .arg(Self::mode_flag(mode))
            .args(["-enc", "UTF-8"])
            .arg(file.path())
            .arg("-")
            .output()
            .map_err(|source| ExtractError::ToolSpawn {
                tool: self.tool.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: self.tool.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_spawn_error() {
        let ex = PdftotextExtractor::new("definitely-not-a-real-pdftotext");
        let err = ex.extract_text(b"%PDF-1.4", LayoutMode::Stream).unwrap_err();
        assert!(matches!(err, ExtractError::ToolSpawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_tool_error() {
        // `false` ignores its arguments and exits 1
        let ex = PdftotextExtractor::new("false");
        let err = ex.extract_text(b"%PDF-1.4", LayoutMode::Layout).unwrap_err();
        assert!(matches!(err, ExtractError::Tool { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn stdout_is_returned() {
        // `echo` prints its arguments: the flag, the encoding, the temp path, "-"
        let ex = PdftotextExtractor::new("echo");
        let text = ex.extract_text(b"%PDF-1.4", LayoutMode::Layout).unwrap();
        assert!(text.starts_with("-layout -enc UTF-8 "));
        assert!(text.trim_end().ends_with(".pdf -"));
    }
}
