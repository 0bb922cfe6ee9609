//! JAR assembly with atomic replacement of the output archive.
//!
//! The archive is written to a temporary file next to the output path and
//! renamed over it only once complete, so readers see either the previous
//! archive or the new one. Batches sharing an output path in this process
//! serialize on a per-path lock around the write and rename.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dialect::CompiledUnit;
use crate::error::{BuildError, BuildResult, CompileFailure};
use crate::obs;
use crate::report::{BuildOutcome, UnitFailure, UnitResult};

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
/// One class name per line, in submission order.
pub const CLASS_INDEX_PATH: &str = "META-INF/udf/classes.idx";

const MANIFEST: &str = "Manifest-Version: 1.0\r\nCreated-By: udf-build\r\n\r\n";

/// A written archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JarArtifact {
    pub path: PathBuf,
    /// Class names recorded in the archive index.
    pub classes: Vec<String>,
    /// SHA-256 of the archive bytes, hex-encoded.
    pub digest: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl JarArtifact {
    /// Read the index, digest and size of an existing archive.
    pub fn inspect(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut archive = ZipArchive::new(io::Cursor::new(&bytes)).map_err(zip_io)?;
        let mut index = String::new();
        archive
            .by_name(CLASS_INDEX_PATH)
            .map_err(zip_io)?
            .read_to_string(&mut index)?;

        let created_at = std::fs::metadata(path)?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            path: path.to_path_buf(),
            classes: parse_index(&index),
            digest: hex::encode(Sha256::digest(&bytes)),
            size_bytes: bytes.len() as u64,
            created_at,
        })
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.iter().any(|c| c == class_name)
    }

    /// Every file path stored in the archive, in archive order.
    pub fn entry_names(&self) -> io::Result<Vec<String>> {
        let archive = ZipArchive::new(File::open(&self.path)?).map_err(zip_io)?;
        Ok(archive.file_names().map(str::to_string).collect())
    }
}

/// Writes compiled units to the configured output path.
#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    output_path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ArchiveAssembler {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        let output_path = output_path.into();
        let lock = path_lock(&output_path);
        Self { output_path, lock }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Write `units` (in order) as the new archive.
    ///
    /// With no units nothing is written and `Ok(None)` is returned; the
    /// previous archive, if any, is left as it was.
    pub async fn assemble(&self, units: Vec<CompiledUnit>) -> BuildResult<Option<JarArtifact>> {
        if units.is_empty() {
            obs::emit_archive_skipped(&self.output_path);
            return Ok(None);
        }

        let _guard = self.lock.lock().await;
        let path = self.output_path.clone();
        let artifact = tokio::task::spawn_blocking(move || write_archive(&path, &units))
            .await
            .map_err(|e| BuildError::archive(&self.output_path, io::Error::other(e)))?
            .map_err(|e| BuildError::archive(&self.output_path, e))?;

        obs::emit_archive_written(
            &artifact.path,
            artifact.classes.len(),
            artifact.size_bytes,
            &artifact.digest,
        );
        Ok(Some(artifact))
    }
}

fn write_archive(path: &Path, units: &[CompiledUnit]) -> io::Result<JarArtifact> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".udf-jar-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let classes: Vec<String> = units.iter().map(|u| u.class_name.clone()).collect();
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        zip.start_file(MANIFEST_PATH, options).map_err(zip_io)?;
        zip.write_all(MANIFEST.as_bytes())?;

        zip.start_file(CLASS_INDEX_PATH, options).map_err(zip_io)?;
        for class in &classes {
            writeln!(zip, "{class}")?;
        }

        let mut written: HashSet<&str> = HashSet::from([MANIFEST_PATH, CLASS_INDEX_PATH]);
        for unit in units {
            for entry in &unit.entries {
                // Differing bytes were already failed by `reject_entry_conflicts`.
                if !written.insert(entry.path.as_str()) {
                    debug!(entry = %entry.path, "shared archive entry already written");
                    continue;
                }
                zip.start_file(entry.path.as_str(), options).map_err(zip_io)?;
                zip.write_all(&entry.bytes)?;
            }
        }
        zip.finish().map_err(zip_io)?;
    }
    tmp.as_file().sync_all()?;

    let bytes = std::fs::read(tmp.path())?;
    let digest = hex::encode(Sha256::digest(&bytes));
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(JarArtifact {
        path: path.to_path_buf(),
        classes,
        digest,
        size_bytes: bytes.len() as u64,
        created_at: Utc::now(),
    })
}

/// Fail compiled units whose archive entries clash with an earlier unit's.
///
/// Walks `results` in submission order. An entry path already claimed with
/// the same bytes is shared; with different bytes the later unit becomes a
/// `CompileError` naming the entry and is left out of the archive. Paths
/// reserved for the manifest and class index always clash.
pub fn reject_entry_conflicts(results: &mut [UnitResult]) {
    results.sort_by_key(|r| r.index);

    let mut claimed: HashMap<String, (String, Vec<u8>)> = HashMap::new();
    for result in results.iter_mut() {
        let BuildOutcome::Compiled(unit) = &result.outcome else {
            continue;
        };

        let clash = unit.entries.iter().find_map(|entry| {
            if entry.path == MANIFEST_PATH || entry.path == CLASS_INDEX_PATH {
                return Some(format!("archive entry {} is reserved", entry.path));
            }
            let digest = Sha256::digest(&entry.bytes).to_vec();
            match claimed.get(&entry.path) {
                Some((owner, claimed_digest)) if *claimed_digest != digest => Some(format!(
                    "archive entry {} clashes with the one produced by {owner}",
                    entry.path
                )),
                _ => None,
            }
        });

        match clash {
            Some(reason) => {
                warn!(class_name = %unit.class_name, reason = %reason, "archive entry conflict");
                result.outcome = BuildOutcome::Failed(UnitFailure::new(
                    unit.class_name.clone(),
                    CompileFailure::compile(reason),
                ));
            }
            None => {
                for entry in &unit.entries {
                    claimed.entry(entry.path.clone()).or_insert_with(|| {
                        (unit.class_name.clone(), Sha256::digest(&entry.bytes).to_vec())
                    });
                }
            }
        }
    }
}

fn parse_index(index: &str) -> Vec<String> {
    index
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn zip_io(err: zip::result::ZipError) -> io::Error {
    match err {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Process-wide lock for an output path.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let key = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(locks.entry(key).or_default())
}
