//! Workspace binding and path-safe file materialization.
//!
//! Every generated file lands under the session's workspace root. The
//! writer rejects absolute paths and any `..` component before touching the
//! filesystem, then double-checks that the resolved path stays under the
//! canonicalized root. Violations are reported as [`EngineError::PathEscape`]
//! and never abort the workflow on their own.

use crate::error::{EngineError, Result};
use crate::state::GeneratedFile;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Outcome of a single block write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// A new file was created.
    Written(GeneratedFile),
    /// The same `{path, hash}` already existed; nothing was touched.
    Unchanged(GeneratedFile),
    /// The path existed with different contents and was replaced.
    Overwritten(GeneratedFile),
}

impl WriteOutcome {
    pub fn file(&self) -> &GeneratedFile {
        match self {
            WriteOutcome::Written(f) | WriteOutcome::Unchanged(f) | WriteOutcome::Overwritten(f) => f,
        }
    }
}

/// Validated writer for one workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceWriter {
    root: PathBuf,
}

impl WorkspaceWriter {
    /// Bind a workspace root. The directory must exist, be a directory,
    /// and be writable; this is checked once, at session bind.
    pub fn bind(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(EngineError::Workspace(format!(
                "workspace does not exist: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(EngineError::Workspace(format!(
                "workspace is not a directory: {}",
                root.display()
            )));
        }

        let probe = root.join(".atelier-write-probe");
        std::fs::write(&probe, b"ok").map_err(|e| {
            EngineError::Workspace(format!(
                "workspace is not writable: {}: {}",
                root.display(),
                e
            ))
        })?;
        let _ = std::fs::remove_file(&probe);

        let root = root.canonicalize().unwrap_or(root);
        Ok(Self { root })
    }

    /// The canonicalized workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, rejecting anything that could
    /// escape the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);

        if candidate.as_os_str().is_empty() {
            return Err(EngineError::PathEscape("empty path".to_string()));
        }
        if candidate.is_absolute() {
            return Err(EngineError::PathEscape(format!(
                "absolute path not allowed: {relative}"
            )));
        }
        for component in candidate.components() {
            if component == Component::ParentDir {
                return Err(EngineError::PathEscape(format!(
                    "path contains '..': {relative}"
                )));
            }
        }

        let full = self.root.join(candidate);

        // Canonicalize the deepest existing ancestor so a symlinked parent
        // cannot smuggle the write outside the root.
        let mut probe = full.clone();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }
        let resolved_probe = probe.canonicalize().unwrap_or(probe);
        if !resolved_probe.starts_with(&self.root) {
            return Err(EngineError::PathEscape(format!(
                "path resolves outside workspace: {relative}"
            )));
        }

        Ok(full)
    }

    /// Write one file block, creating parent directories as needed.
    ///
    /// Identical `{path, hash}` writes are a no-op; a different hash at the
    /// same path replaces the file.
    pub fn write_block(&self, relative: &str, contents: &str) -> Result<WriteOutcome> {
        let full = self.resolve(relative)?;
        let hash = content_hash(contents.as_bytes());
        let record = GeneratedFile {
            path: relative.to_string(),
            size: contents.len() as u64,
            hash: hash.clone(),
        };

        if full.exists() {
            let existing = std::fs::read(&full)?;
            if content_hash(&existing) == hash {
                debug!(path = relative, "write skipped: identical contents");
                return Ok(WriteOutcome::Unchanged(record));
            }
            std::fs::write(&full, contents)?;
            return Ok(WriteOutcome::Overwritten(record));
        }

        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, contents)?;
        debug!(path = relative, bytes = record.size, "file written");
        Ok(WriteOutcome::Written(record))
    }

    /// Read a file back, with the same path validation as writes.
    pub fn read_to_string(&self, relative: &str) -> Result<String> {
        let full = self.resolve(relative)?;
        Ok(std::fs::read_to_string(full)?)
    }

    /// List workspace-relative paths of regular files, depth-first.
    /// `.`-prefixed directories (including `.engine`) are skipped.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    files.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Hex-encoded sha256.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
