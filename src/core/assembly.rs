//! CN-010: Assembly output: documents plus manifest, written atomically.

use super::error::SynthError;
use super::hasher;
use super::synth::Assembly;
use super::types::DocumentFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index of an assembly directory, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub app: String,
    pub generator: String,
    pub format: DocumentFormat,
    /// Composite hash over every document hash, in emission order
    pub fingerprint: String,
    pub documents: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub unit: String,
    pub artifact_id: String,
    pub file: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
}

pub fn manifest_path(outdir: &Path) -> PathBuf {
    outdir.join("manifest.json")
}

pub fn build_manifest(assembly: &Assembly) -> Manifest {
    let hashes: Vec<&str> = assembly.documents.iter().map(|d| d.hash.as_str()).collect();
    Manifest {
        schema: "1.0".to_string(),
        app: assembly.app.clone(),
        generator: format!("cairn {}", env!("CARGO_PKG_VERSION")),
        format: assembly.format,
        fingerprint: hasher::composite_hash(&hashes),
        documents: assembly
            .documents
            .iter()
            .map(|d| ManifestEntry {
                unit: d.path.clone(),
                artifact_id: d.artifact_id.clone(),
                file: d.file_name.clone(),
                hash: d.hash.clone(),
                dependencies: d.dependencies.clone(),
                exports: d.exports.clone(),
                imports: d.imports.clone(),
            })
            .collect(),
    }
}

/// Write every document (and the manifest, if enabled) under `outdir`.
/// Returns the written paths in emission order.
pub fn write_assembly(assembly: &Assembly, outdir: &Path) -> Result<Vec<PathBuf>, SynthError> {
    std::fs::create_dir_all(outdir).map_err(|e| io_error(outdir, e))?;

    let mut written = Vec::with_capacity(assembly.documents.len() + 1);
    for doc in &assembly.documents {
        let path = outdir.join(&doc.file_name);
        write_atomic(&path, &doc.body)?;
        tracing::debug!(unit = %doc.path, path = %path.display(), "wrote document");
        written.push(path);
    }

    if assembly.manifest {
        let path = manifest_path(outdir);
        let json = serde_json::to_string_pretty(&build_manifest(assembly)).map_err(|e| {
            SynthError::Io {
                path: path.display().to_string(),
                message: format!("serialize error: {}", e),
            }
        })?;
        write_atomic(&path, &json)?;
        written.push(path);
    }
    Ok(written)
}

/// Load a manifest. Returns None if the directory has none.
pub fn load_manifest(outdir: &Path) -> Result<Option<Manifest>, SynthError> {
    let path = manifest_path(outdir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
    let manifest = serde_json::from_str(&content).map_err(|e| SynthError::Io {
        path: path.display().to_string(),
        message: format!("invalid manifest: {}", e),
    })?;
    Ok(Some(manifest))
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), SynthError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    std::fs::write(&tmp_path, contents).map_err(|e| io_error(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| SynthError::Io {
        path: path.display().to_string(),
        message: format!("cannot rename {}: {}", tmp_path.display(), e),
    })
}

fn io_error(path: &Path, e: std::io::Error) -> SynthError {
    SynthError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
