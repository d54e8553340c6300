//! `.25d` sidecar files.
//!
//! A sidecar is a JSON cache that travels with the audio file
//! (`track.flac` -> `track.flac.25d`) and lets a rescan skip the expensive
//! analysis entirely. It is valid only while the audio file's size and
//! mtime match the snapshot taken at write time; any parse or structure
//! problem just makes it invalid, never an error.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use kindred_analysis::Fingerprint;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StorageResult;

pub const SIDECAR_EXTENSION: &str = "25d";
pub const FORMAT_VERSION: &str = "1.0";
const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot of the audio file the sidecar was written against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFileMeta {
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: String,
}

/// The on-disk sidecar document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarFile {
    pub format_version: String,
    pub kindred_version: String,
    pub generated_at: String,
    pub audio_file: AudioFileMeta,
    /// Kept as raw JSON: older writers used a nested group layout which
    /// [`SidecarStore::get_fingerprint`] flattens transparently.
    pub fingerprint: Value,
    #[serde(default)]
    pub processing_cache: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// What callers hand to [`SidecarStore::write`]; the store adds the
/// envelope (versions, timestamps, audio snapshot) itself.
#[derive(Debug, Clone, Default)]
pub struct SidecarPayload {
    pub fingerprint: Option<Fingerprint>,
    pub processing_cache: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

impl SidecarPayload {
    #[must_use]
    pub fn with_fingerprint(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint: Some(fingerprint),
            ..Self::default()
        }
    }
}

/// Reads and writes `.25d` sidecar files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarStore;

impl SidecarStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The sidecar path: the audio file name with `.25d` appended to the
    /// full name (not the stem), so `a.flac` maps to `a.flac.25d`.
    #[must_use]
    pub fn path_for(&self, audio: &Path) -> PathBuf {
        let mut name = audio.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(SIDECAR_EXTENSION);
        audio.with_file_name(name)
    }

    #[must_use]
    pub fn exists(&self, audio: &Path) -> bool {
        self.path_for(audio).exists()
    }

    /// A sidecar is valid iff it parses, its format version matches, the
    /// audio file's size and mtime still match the stored snapshot, and it
    /// carries a fingerprint section.
    #[must_use]
    pub fn is_valid(&self, audio: &Path) -> bool {
        if !audio.exists() {
            return false;
        }
        let Some(sidecar) = self.read(audio) else {
            return false;
        };

        if sidecar.format_version != FORMAT_VERSION {
            warn!(
                "sidecar format version mismatch for {}: {} != {FORMAT_VERSION}",
                audio.display(),
                sidecar.format_version
            );
            return false;
        }

        let Ok(meta) = std::fs::metadata(audio) else {
            return false;
        };
        if sidecar.audio_file.size_bytes != meta.len() {
            debug!(
                "audio file size changed for {}: {} -> {}",
                audio.display(),
                sidecar.audio_file.size_bytes,
                meta.len()
            );
            return false;
        }
        match meta.modified() {
            Ok(modified) if mtime_string(modified) == sidecar.audio_file.modified_at => {}
            _ => {
                debug!("audio file mtime changed for {}", audio.display());
                return false;
            }
        }

        if sidecar.fingerprint.is_null() {
            warn!("sidecar for {} is missing fingerprint data", audio.display());
            return false;
        }

        true
    }

    /// Read and parse the sidecar; any failure reads as "no sidecar".
    #[must_use]
    pub fn read(&self, audio: &Path) -> Option<SidecarFile> {
        let path = self.path_for(audio);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!("failed to read sidecar {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                error!("failed to parse sidecar {}: {e}", path.display());
                None
            }
        }
    }

    /// Write a sidecar, snapshotting the audio file's current size and
    /// mtime. Immediately afterwards `is_valid` holds.
    ///
    /// # Errors
    ///
    /// Fails when the audio file cannot be stat'ed or the sidecar cannot
    /// be written.
    pub fn write(&self, audio: &Path, payload: &SidecarPayload) -> StorageResult<()> {
        self.write_raw(
            audio,
            payload
                .fingerprint
                .as_ref()
                .map_or(Value::Object(Map::new()), |fp| {
                    serde_json::to_value(fp).unwrap_or_default()
                }),
            payload.processing_cache.clone(),
            payload.metadata.clone(),
        )
    }

    fn write_raw(
        &self,
        audio: &Path,
        fingerprint: Value,
        processing_cache: Map<String, Value>,
        metadata: Map<String, Value>,
    ) -> StorageResult<()> {
        let meta = std::fs::metadata(audio)?;
        let sidecar = SidecarFile {
            format_version: FORMAT_VERSION.to_string(),
            kindred_version: ENGINE_VERSION.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            audio_file: AudioFileMeta {
                path: audio
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .into_owned(),
                size_bytes: meta.len(),
                modified_at: mtime_string(meta.modified()?),
            },
            fingerprint,
            processing_cache,
            metadata,
        };

        let path = self.path_for(audio);
        std::fs::write(&path, serde_json::to_string_pretty(&sidecar)?)?;
        info!("wrote sidecar {}", path.display());
        Ok(())
    }

    /// Delete the sidecar; deleting a missing sidecar is fine.
    ///
    /// # Errors
    ///
    /// Fails only on a real filesystem error.
    pub fn delete(&self, audio: &Path) -> StorageResult<()> {
        let path = self.path_for(audio);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("deleted sidecar {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The stored fingerprint as the canonical struct. A nested
    /// (group -> fields) layout is flattened transparently; an incomplete
    /// fingerprint reads as `None`.
    #[must_use]
    pub fn get_fingerprint(&self, audio: &Path) -> Option<Fingerprint> {
        let sidecar = self.read(audio)?;
        let flat = flatten_fingerprint(&sidecar.fingerprint)?;
        match serde_json::from_value::<Fingerprint>(Value::Object(flat)) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!(
                    "incomplete fingerprint in sidecar for {}: {e}",
                    audio.display()
                );
                None
            }
        }
    }

    #[must_use]
    pub fn get_processing_cache(&self, audio: &Path) -> Option<Map<String, Value>> {
        Some(self.read(audio)?.processing_cache)
    }

    /// Read-modify-write of the processing cache, preserving the
    /// fingerprint section verbatim.
    ///
    /// # Errors
    ///
    /// Fails when the audio file cannot be stat'ed or the sidecar cannot
    /// be rewritten.
    pub fn update_processing_cache(
        &self,
        audio: &Path,
        cache_data: Map<String, Value>,
    ) -> StorageResult<()> {
        let existing = self.read(audio);
        let (fingerprint, mut processing_cache, metadata) = match existing {
            Some(sidecar) => (
                sidecar.fingerprint,
                sidecar.processing_cache,
                sidecar.metadata,
            ),
            None => (Value::Object(Map::new()), Map::new(), Map::new()),
        };
        processing_cache.extend(cache_data);
        self.write_raw(audio, fingerprint, processing_cache, metadata)
    }

    /// Delete sidecars for many audio files; returns how many calls
    /// succeeded.
    pub fn bulk_delete(&self, audio_paths: &[PathBuf]) -> usize {
        audio_paths
            .iter()
            .filter(|path| self.delete(path).is_ok())
            .count()
    }
}

/// Format an mtime the way both `write` and `is_valid` compare it:
/// RFC 3339 with microsecond precision, UTC.
fn mtime_string(mtime: SystemTime) -> String {
    DateTime::<Utc>::from(mtime).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accept both the flat 25-key layout and the nested group layout.
fn flatten_fingerprint(fingerprint: &Value) -> Option<Map<String, Value>> {
    let object = fingerprint.as_object()?;
    if !object.contains_key("frequency") {
        return Some(object.clone());
    }

    let mut flat = Map::new();
    for group in [
        "frequency",
        "dynamics",
        "temporal",
        "spectral",
        "harmonic",
        "variation",
        "stereo",
    ] {
        if let Some(fields) = object.get(group).and_then(Value::as_object) {
            flat.extend(fields.clone());
        }
    }
    Some(flat)
}
