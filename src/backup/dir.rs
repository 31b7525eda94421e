use super::{BackupError, BackupStorage, StoredBackup};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const SNAPSHOT_ENTRY: &str = "data/snapshot.json";
pub const BUNDLE_FORMAT_V1: &str = "roster-backup-v1";
pub const BUNDLE_SUFFIX: &str = ".rosterbackup.zip";

/// One zip bundle per backup in a directory:
/// `manifest.json` (format, id, createdAt, checksum) and the raw snapshot.
#[derive(Debug, Clone)]
pub struct DirBackupStorage {
    dir: PathBuf,
}

impl DirBackupStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirBackupStorage { dir: dir.into() }
    }

    pub fn bundle_path(&self, id: &str) -> Result<PathBuf, BackupError> {
        validate_backup_id(id)?;
        Ok(self.dir.join(format!("{}{}", id, BUNDLE_SUFFIX)))
    }
}

fn validate_backup_id(id: &str) -> Result<(), BackupError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        && !id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(BackupError::InvalidId(id.to_string()))
    }
}

impl BackupStorage for DirBackupStorage {
    fn put(&self, id: &str, backup: &StoredBackup) -> Result<(), BackupError> {
        let out_path = self.bundle_path(id)?;
        if out_path.exists() {
            return Err(BackupError::AlreadyExists(id.to_string()));
        }
        std::fs::create_dir_all(&self.dir)?;

        let tmp_path = self.dir.join(format!("{}{}.writing", id, BUNDLE_SUFFIX));
        if tmp_path.exists() {
            let _ = std::fs::remove_file(&tmp_path);
        }

        let out_file = File::create(&tmp_path)?;
        let mut zip = ZipWriter::new(out_file);
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let manifest = json!({
            "format": BUNDLE_FORMAT_V1,
            "version": 1,
            "appVersion": env!("CARGO_PKG_VERSION"),
            "backupId": id,
            "createdAt": backup.created_at.to_rfc3339(),
            "checksum": backup.checksum,
            "snapshotBytes": backup.snapshot.len(),
        });
        zip.start_file(MANIFEST_ENTRY, opts)?;
        zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

        zip.start_file(SNAPSHOT_ENTRY, opts)?;
        zip.write_all(&backup.snapshot)?;

        let file = zip.finish()?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &out_path)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredBackup>, BackupError> {
        let path = self.bundle_path(id)?;
        if !path.is_file() {
            return Ok(None);
        }
        // Past this point the file exists, so any failure to decode it means
        // the bundle bytes are not what was written.
        let corrupt = |message: String| BackupError::Corrupt {
            id: id.to_string(),
            message,
        };

        let mut archive = ZipArchive::new(File::open(&path)?)
            .map_err(|e| corrupt(format!("unreadable zip: {}", e)))?;

        let mut manifest_text = String::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .map_err(|e| corrupt(format!("missing {}: {}", MANIFEST_ENTRY, e)))?
            .read_to_string(&mut manifest_text)
            .map_err(|e| corrupt(format!("reading {}: {}", MANIFEST_ENTRY, e)))?;
        let manifest: serde_json::Value = serde_json::from_str(&manifest_text)
            .map_err(|e| corrupt(format!("bad {}: {}", MANIFEST_ENTRY, e)))?;

        let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
        if format != BUNDLE_FORMAT_V1 {
            return Err(corrupt(format!("unsupported bundle format: {}", format)));
        }
        let checksum = manifest
            .get("checksum")
            .and_then(|v| v.as_str())
            .ok_or_else(|| corrupt("manifest has no checksum".to_string()))?
            .to_string();
        let created_at = manifest
            .get("createdAt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| corrupt("manifest has no createdAt".to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(created_at)
            .map_err(|e| corrupt(format!("bad createdAt: {}", e)))?
            .with_timezone(&Utc);

        let mut snapshot = Vec::new();
        archive
            .by_name(SNAPSHOT_ENTRY)
            .map_err(|e| corrupt(format!("missing {}: {}", SNAPSHOT_ENTRY, e)))?
            .read_to_end(&mut snapshot)
            .map_err(|e| corrupt(format!("reading {}: {}", SNAPSHOT_ENTRY, e)))?;

        Ok(Some(StoredBackup {
            created_at,
            snapshot,
            checksum,
        }))
    }

    fn list(&self) -> Result<Vec<String>, BackupError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for ent in std::fs::read_dir(&self.dir)? {
            let ent = ent?;
            let Some(name) = ent.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(id) = name.strip_suffix(BUNDLE_SUFFIX) {
                if validate_backup_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }
}
