use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use crate::error::JqError;

/// Run `json` through the external `jq` binary with `filter`.
pub(crate) fn filter_json(json: &str, filter: &str) -> Result<String, JqError> {
    let mut jq = Command::new("jq")
        .arg(filter)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => JqError::NotFound,
            _ => JqError::Spawn(err),
        })?;

    // Dropping stdin at the end of this block closes the pipe so jq can finish
    if let Some(mut stdin) = jq.stdin.take() {
        stdin.write_all(json.as_bytes()).map_err(JqError::Stdin)?;
    }

    let output = jq.wait_with_output().map_err(JqError::Wait)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(JqError::Filter(stderr.trim().to_string()));
    }
    String::from_utf8(output.stdout).map_err(JqError::Utf8)
}
