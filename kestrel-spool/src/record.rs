//! The pending-receipt record.
//!
//! Persisted as two ISO-8859-1 lines:
//!
//! ```text
//! <original MIC>
//! <reference to the retained body>
//! ```

use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};

use crate::error::SpoolError;

/// MIC computed at send time plus where the sent body was retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub mic: String,
    /// A path for file stores, an opaque key otherwise.
    pub body: String,
}

impl PendingRecord {
    #[must_use]
    pub fn new(mic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            mic: mic.into(),
            body: body.into(),
        }
    }

    /// Characters outside Latin-1 are replaced by the encoder.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let text = format!("{}\n{}\n", self.mic, self.body);
        let (bytes, _, _) = WINDOWS_1252.encode(&text);
        bytes.into_owned()
    }

    /// # Errors
    /// If either line is missing or empty.
    pub fn decode(raw: &[u8], origin: &str) -> Result<Self, SpoolError> {
        let corrupted = |reason| SpoolError::Corrupted {
            path: origin.to_string(),
            reason,
        };

        let (text, _) = WINDOWS_1252.decode_without_bom_handling(raw);
        let mut lines = text.lines().map(str::trim_end);

        let mic = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| corrupted("missing MIC line"))?;
        let body = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| corrupted("missing body reference line"))?;

        Ok(Self::new(mic, body))
    }
}
