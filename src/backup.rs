use anyhow::{anyhow, bail, Context};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE_NAME: &str = "educa.sqlite3";
const DB_ENTRY: &str = "db/educa.sqlite3";
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const BUNDLE_FORMAT_V1: &str = "educa-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

/// Describes the bundle. Only `format` is required when reading, so bundles
/// written by hand or by older builds still import.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn display(path: &Path) -> std::borrow::Cow<'_, str> {
    path.to_string_lossy()
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", display(&db_path));
    }
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("read database {}", display(&db_path)))?;
    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Local::now().to_rfc3339()),
        db_sha256: Some(sha256_hex(&db_bytes)),
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", display(parent)))?;
    }
    let out_file =
        File::create(out_path).with_context(|| format!("create bundle {}", display(out_path)))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest_text = serde_json::to_vec_pretty(&manifest)?;
    let entries: [(&str, &[u8]); 2] = [(MANIFEST_ENTRY, &manifest_text), (DB_ENTRY, &db_bytes)];
    for (name, bytes) in entries {
        zip.start_file(name, opts)
            .with_context(|| format!("start entry {name}"))?;
        zip.write_all(bytes)
            .with_context(|| format!("write entry {name}"))?;
    }
    zip.finish().context("finalize bundle")?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: entries.len(),
        db_sha256: manifest.db_sha256.unwrap_or_default(),
    })
}

/// Restores `in_path` into `workspace_path`. Anything that is not a zip must
/// be a plain SQLite copy. The live database is only replaced once the
/// incoming one has been opened and checked. The caller must have closed the
/// workspace connection first.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("create workspace {}", display(workspace_path)))?;

    let (format, db_bytes) = if has_zip_magic(in_path)? {
        (BUNDLE_FORMAT_V1, read_bundle(in_path)?)
    } else {
        let bytes =
            std::fs::read(in_path).with_context(|| format!("read backup {}", display(in_path)))?;
        (RAW_SQLITE_FORMAT, bytes)
    };
    replace_database(workspace_path, &db_bytes)?;

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
    })
}

/// Reads and verifies the database entry of a bundle.
fn read_bundle(path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("open bundle {}", display(path)))?;
    let mut archive = ZipArchive::new(file).context("invalid zip archive")?;

    let manifest_bytes = read_entry(&mut archive, MANIFEST_ENTRY)?;
    let manifest: Manifest =
        serde_json::from_slice(&manifest_bytes).context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", manifest.format);
    }

    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    if let Some(expected) = manifest.db_sha256.as_deref() {
        let actual = sha256_hex(&db_bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(anyhow!(
                "database checksum mismatch (expected {expected}, got {actual})"
            ));
        }
    }
    Ok(db_bytes)
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle missing {name}"))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("extract {name}"))?;
    Ok(bytes)
}

/// Opens a staged copy and runs SQLite's own consistency check on it.
fn check_database(path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open restored database {}", display(path)))?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .context("restored file is not a usable database")?;
    if verdict != "ok" {
        bail!("restored database failed integrity check: {verdict}");
    }
    Ok(())
}

/// Writes next to the live file and renames over it, so a rejected or
/// failed restore leaves the current database untouched.
fn replace_database(workspace_path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if !bytes.starts_with(SQLITE_MAGIC) {
        bail!("not a SQLite database");
    }
    let dst = workspace_path.join(DB_FILE_NAME);
    let staging: PathBuf = workspace_path.join(format!("{DB_FILE_NAME}.importing"));
    {
        let mut out = File::create(&staging)
            .with_context(|| format!("create staging file {}", display(&staging)))?;
        out.write_all(bytes).context("write restored database")?;
        out.sync_all().context("sync restored database")?;
    }
    if let Err(e) = check_database(&staging) {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }
    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("remove existing database {}", display(&dst)))?;
    }
    std::fs::rename(&staging, &dst)
        .with_context(|| format!("move restored database to {}", display(&dst)))?;
    Ok(())
}

fn has_zip_magic(path: &Path) -> anyhow::Result<bool> {
    let mut file = File::open(path).with_context(|| format!("open backup {}", display(path)))?;
    let mut sig = [0u8; 4];
    match file.read_exact(&mut sig) {
        Ok(()) => Ok(sig == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("read file signature"),
    }
}
