//! Atomic artifact writes.
//!
//! Every persistent write in the orchestrator goes through this module so
//! the crash-safety invariant — readers never observe a partially written
//! file — is enforced in one place instead of at each call site.
//!
//! JSON writes go to a sibling temp file in the destination directory, are
//! flushed, then renamed over the target (`rename` is atomic on the same
//! filesystem). JSONL events and text logs are append-only; each append is
//! a single `write` of one newline-terminated line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum AtomicError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, AtomicError>;

fn io_err(path: &Path, source: std::io::Error) -> AtomicError {
    AtomicError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_err(path: &Path, source: serde_json::Error) -> AtomicError {
    AtomicError::Json {
        path: path.display().to_string(),
        source,
    }
}

/// Serialize `value` as stable JSON (sorted keys, indented, trailing
/// newline) and atomically replace `path` with it.
///
/// Sorted keys come for free from `serde_json::Value`'s `BTreeMap`-backed
/// object representation when the value is round-tripped through it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let sorted = to_sorted_value(value).map_err(|e| json_err(path, e))?;
    let mut text = serde_json::to_string_pretty(&sorted).map_err(|e| json_err(path, e))?;
    text.push('\n');

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact"),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| io_err(&tmp_path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| io_err(&tmp_path, e))?;
    file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn to_sorted_value<T: Serialize>(value: &T) -> serde_json::Result<serde_json::Value> {
    // Round-tripping through `serde_json::Value` puts object keys into a
    // `BTreeMap`, which serializes in sorted order.
    serde_json::to_value(value)
}

/// Read and parse a JSON artifact. Returns `Ok(None)` if the file does not
/// exist; a parse failure is `Err` (artifact_corrupt territory for callers
/// that require the file to exist).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let value = serde_json::from_str(&text).map_err(|e| json_err(path, e))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Append one JSON object as a single JSONL line.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut line = serde_json::to_string(value).map_err(|e| json_err(path, e))?;
    line.push('\n');
    append_text(path, &line)
}

/// Append raw text to a log file, normalizing line terminators to `\n` and
/// ensuring the appended chunk ends with one.
pub fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let normalized = text.replace("\r\n", "\n");
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(normalized.as_bytes())
        .map_err(|e| io_err(path, e))?;
    if !normalized.ends_with('\n') {
        file.write_all(b"\n").map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::path::PathBuf;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        z_field: i32,
        a_field: String,
    }

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vigil-atomic-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn write_then_read_roundtrips() {
        let path = tmp_path("roundtrip.json");
        let value = Sample {
            z_field: 7,
            a_field: "hi".into(),
        };
        write_json_atomic(&path, &value).unwrap();
        let loaded: Sample = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn write_sorts_keys_and_trails_newline() {
        let path = tmp_path("sorted.json");
        write_json_atomic(
            &path,
            &Sample {
                z_field: 1,
                a_field: "x".into(),
            },
        )
        .unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));
        let a_pos = raw.find("a_field").unwrap();
        let z_pos = raw.find("z_field").unwrap();
        assert!(a_pos < z_pos, "keys should be sorted: {raw}");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn read_json_missing_file_is_none() {
        let path = tmp_path("missing.json");
        let result: Result<Option<Sample>> = read_json(&path);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn no_tmp_file_left_behind_after_write() {
        let path = tmp_path("clean.json");
        write_json_atomic(&path, &42i32).unwrap();
        let parent = path.parent().unwrap();
        let leftovers: Vec<_> = fs::read_dir(parent)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .filter(|e| {
                e.path()
                    .file_name()
                    .map(|n| n.to_string_lossy().contains("clean.json"))
                    .unwrap_or(false)
            })
            .collect();
        assert!(leftovers.is_empty(), "tmp files left behind: {leftovers:?}");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_jsonl_produces_one_self_contained_line_per_call() {
        let path = tmp_path("events.jsonl");
        let _ = fs::remove_file(&path);
        append_jsonl(&path, &Sample { z_field: 1, a_field: "a".into() }).unwrap();
        append_jsonl(&path, &Sample { z_field: 2, a_field: "b".into() }).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let _: Sample = serde_json::from_str(line).unwrap();
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_text_normalizes_crlf() {
        let path = tmp_path("log.txt");
        let _ = fs::remove_file(&path);
        append_text(&path, "line one\r\nline two\r\n").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains('\r'));
        assert_eq!(text, "line one\nline two\n");
        let _ = fs::remove_file(&path);
    }
}
