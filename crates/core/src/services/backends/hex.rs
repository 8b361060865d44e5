use std::fmt::Write as _;

use crate::model::{TransformOutput, TransformPayload};
use crate::services::registry::{Backend, BackendError, TransformRequest};
use crate::services::scheduler::CancellationToken;
use crate::settings::BackendSettings;

pub const BYTES_PER_ROW: &str = "bytes-per-row";
pub const SHOW_ASCII: &str = "show-ascii";
pub const UPPERCASE: &str = "uppercase";

/// Rows rendered between cancellation checks.
const CANCEL_CHECK_ROWS: usize = 4096;

/// In-process hex dump viewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexViewer;

impl Backend for HexViewer {
    fn transform(
        &self,
        request: &TransformRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, BackendError> {
        let text = render(request.input, request.settings, cancel)?;
        Ok(TransformOutput::single(request.name, TransformPayload::Text(text)))
    }
}

fn render(bytes: &[u8], settings: &BackendSettings, cancel: &CancellationToken) -> Result<String, BackendError> {
    let width = settings.int(BYTES_PER_ROW).unwrap_or(16).clamp(1, 256) as usize;
    let ascii = settings.bool(SHOW_ASCII).unwrap_or(true);
    let upper = settings.bool(UPPERCASE).unwrap_or(false);

    let mut out = String::with_capacity(bytes.len() * 4 + 16);
    for (row, chunk) in bytes.chunks(width).enumerate() {
        if row % CANCEL_CHECK_ROWS == 0 && cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let _ = write!(out, "{:08x}  ", row * width);
        for col in 0..width {
            match chunk.get(col) {
                Some(b) if upper => {
                    let _ = write!(out, "{b:02X} ");
                }
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }
        }
        if ascii {
            out.push(' ');
            out.push('|');
            out.extend(chunk.iter().map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' }));
            out.push('|');
        }
        let trimmed = out.trim_end_matches(' ').len();
        out.truncate(trimmed);
        out.push('\n');
    }
    Ok(out)
}
