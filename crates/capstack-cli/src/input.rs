use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Read and deserialise a JSON input file.
pub fn read_json<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let p = Path::new(path);
    if !p.is_file() {
        return Err(format!("input file not found: {path}").into());
    }
    let contents =
        fs::read_to_string(p).map_err(|e| format!("failed to read '{path}': {e}"))?;
    let value: T =
        serde_json::from_str(&contents).map_err(|e| format!("failed to parse '{path}': {e}"))?;
    Ok(value)
}

/// Read JSON from stdin when data is being piped. Returns None on a TTY so
/// interactive invocations fall through to the flag-based inputs.
pub fn read_stdin() -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;

    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    Ok(Some(serde_json::from_str(trimmed)?))
}
