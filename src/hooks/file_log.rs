//! File-log hooks (spec §4.7): append either JSON lines or a simple text
//! format to a configured path.

use tokio::io::AsyncWriteExt;

use crate::error::HookError;
use crate::models::HookRegistration;

use super::EventPayload;

/// Append one record for `payload` to the hook's target file. The format
/// is chosen by the file extension: `.jsonl`/`.json` write a JSON line,
/// anything else writes a simple `timestamp event key` text line.
pub async fn deliver(registration: &HookRegistration, payload: &EventPayload) -> Result<Option<String>, HookError> {
    let path = std::path::Path::new(&registration.target);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| HookError::Delivery(e.to_string()))?;
    }

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("json"))
        .unwrap_or(true);

    let line = if is_json {
        serde_json::to_string(payload).map_err(|e| HookError::Delivery(e.to_string()))?
    } else {
        format!(
            "{} {} {}",
            payload.timestamp.to_rfc3339(),
            payload.event,
            payload.data.key.as_deref().unwrap_or("-")
        )
    };

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| HookError::Delivery(e.to_string()))?;
    file.write_all(format!("{line}\n").as_bytes())
        .await
        .map_err(|e| HookError::Delivery(e.to_string()))?;
    Ok(None)
}
