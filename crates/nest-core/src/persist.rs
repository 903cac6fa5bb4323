//! Snapshot persistence: JSON for humans, MessagePack for compact storage.
//!
//! Both encodings are lossless: loading a saved snapshot yields a value
//! equal to the one saved.

use crate::error::CoreResult;
use crate::model::Snapshot;
use std::fs;
use std::path::Path;

pub fn to_json(snapshot: &Snapshot) -> CoreResult<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn from_json(json: &str) -> CoreResult<Snapshot> {
    Ok(serde_json::from_str(json)?)
}

pub fn to_msgpack(snapshot: &Snapshot) -> CoreResult<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(snapshot)?)
}

pub fn from_msgpack(bytes: &[u8]) -> CoreResult<Snapshot> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// On-disk encoding, chosen from the file extension by `save`/`load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    MsgPack,
}

impl Format {
    /// `.json` → JSON; anything else (`.nest`, `.msgpack`, ...) → MessagePack.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::MsgPack,
        }
    }
}

/// Write `snapshot` to `path` in the format its extension selects.
pub fn save(snapshot: &Snapshot, path: &Path) -> CoreResult<()> {
    let bytes = match Format::from_path(path) {
        Format::Json => to_json(snapshot)?.into_bytes(),
        Format::MsgPack => to_msgpack(snapshot)?,
    };
    fs::write(path, bytes)?;
    log::debug!("saved snapshot to {}", path.display());
    Ok(())
}

pub fn load(path: &Path) -> CoreResult<Snapshot> {
    let bytes = fs::read(path)?;
    let snapshot = match Format::from_path(path) {
        Format::Json => serde_json::from_slice(&bytes)?,
        Format::MsgPack => from_msgpack(&bytes)?,
    };
    log::debug!("loaded snapshot from {}", path.display());
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(&PathBuf::from("a.JSON")), Format::Json);
        assert_eq!(Format::from_path(&PathBuf::from("a.nest")), Format::MsgPack);
        assert_eq!(Format::from_path(&PathBuf::from("noext")), Format::MsgPack);
    }

    #[test]
    fn empty_snapshot_roundtrips() {
        let snap = Snapshot::default();
        assert_eq!(from_json(&to_json(&snap).unwrap()).unwrap(), snap);
        assert_eq!(from_msgpack(&to_msgpack(&snap).unwrap()).unwrap(), snap);
    }
}
