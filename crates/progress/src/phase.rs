//! Phase-weighted display progress for uploads.
//!
//! The server reserves raw percent `[95, 100]` for its own finalization
//! work. The display scale compresses byte transfer into `[0, 90]` and
//! stretches finalization over `[90, 100]`.

use pkgdeploy_protocol::constants::{PROCESSING_THRESHOLD, TRANSFER_DISPLAY_CEILING};

/// User-facing stage of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Preparing,
    Transferring,
    Processing,
}

impl UploadPhase {
    pub fn from_raw(raw: f64) -> Self {
        if raw <= 0.0 {
            UploadPhase::Preparing
        } else if raw < PROCESSING_THRESHOLD {
            UploadPhase::Transferring
        } else {
            UploadPhase::Processing
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UploadPhase::Preparing => "preparing",
            UploadPhase::Transferring => "transferring",
            UploadPhase::Processing => "processing",
        }
    }
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayProgress {
    pub phase: UploadPhase,
    pub percent: f64,
}

/// Maps a raw server percent to its phase and display percent.
pub fn display_progress(raw: f64) -> DisplayProgress {
    let raw = if raw.is_finite() { raw.clamp(0.0, 100.0) } else { 0.0 };
    let phase = UploadPhase::from_raw(raw);
    let percent = match phase {
        UploadPhase::Preparing => 0.0,
        UploadPhase::Transferring => raw * TRANSFER_DISPLAY_CEILING / PROCESSING_THRESHOLD,
        UploadPhase::Processing => {
            let span = 100.0 - PROCESSING_THRESHOLD;
            TRANSFER_DISPLAY_CEILING
                + (raw - PROCESSING_THRESHOLD) * (100.0 - TRANSFER_DISPLAY_CEILING) / span
        }
    };
    DisplayProgress { phase, percent }
}
