// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Module resolution for workflow artifacts.
//!
//! A workflow definition names its entry point and dependencies as
//! content-addressed artifacts. A resolver turns them into the module path
//! handed to workers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// A content-addressed workflow artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    /// Path relative to the artifact root.
    pub relative_path: String,
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    /// Content length.
    pub size_in_bytes: u64,
}

impl ArtifactDescriptor {
    /// Create a descriptor.
    pub fn new(relative_path: impl Into<String>, hash: impl Into<String>, size_in_bytes: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            hash: hash.into(),
            size_in_bytes,
        }
    }

    /// Descriptor for in-process modules that have no content on disk.
    pub fn inline(relative_path: impl Into<String>) -> Self {
        Self::new(relative_path, "", 0)
    }

    /// Describe `content` stored at `relative_path`.
    pub fn for_content(relative_path: impl Into<String>, content: &[u8]) -> Self {
        Self::new(relative_path, sha256_hex(content), content.len() as u64)
    }
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Resolution errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The artifact is not present.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// The artifact path escapes the root.
    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    /// Size on disk differs from the descriptor.
    #[error("Size mismatch for {path}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        /// Artifact path.
        path: String,
        /// Size in the descriptor.
        expected: u64,
        /// Size on disk.
        actual: u64,
    },

    /// Content hash differs from the descriptor.
    #[error("Hash mismatch for {path}: expected {expected}, found {actual}")]
    HashMismatch {
        /// Artifact path.
        path: String,
        /// Hash in the descriptor.
        expected: String,
        /// Hash of the content.
        actual: String,
    },

    /// Reading the artifact failed.
    #[error("IO error for {path}: {source}")]
    Io {
        /// Artifact path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Resolves workflow artifacts to a module path.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// Resolve `entry` (and make `dependencies` available) to a module path.
    async fn resolve(
        &self,
        entry: &ArtifactDescriptor,
        dependencies: &[ArtifactDescriptor],
    ) -> Result<String, ResolveError>;
}

/// Resolver for in-process modules: the entry's relative path is the module path.
#[derive(Debug, Clone, Default)]
pub struct StaticModuleResolver;

#[async_trait]
impl ModuleResolver for StaticModuleResolver {
    async fn resolve(
        &self,
        entry: &ArtifactDescriptor,
        _dependencies: &[ArtifactDescriptor],
    ) -> Result<String, ResolveError> {
        Ok(entry.relative_path.clone())
    }
}

/// Resolver over a local artifact directory.
///
/// Every artifact must exist under the root with the described size and hash.
/// The module path is the absolute path of the entry artifact.
#[derive(Debug, Clone)]
pub struct FsModuleResolver {
    root: PathBuf,
}

impl FsModuleResolver {
    /// Resolve artifacts under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The artifact root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, artifact: &ArtifactDescriptor) -> Result<PathBuf, ResolveError> {
        let relative = Path::new(&artifact.relative_path);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes {
            return Err(ResolveError::InvalidPath(artifact.relative_path.clone()));
        }
        Ok(self.root.join(relative))
    }

    async fn verify(&self, artifact: &ArtifactDescriptor) -> Result<PathBuf, ResolveError> {
        let path = self.artifact_path(artifact)?;
        let content = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResolveError::NotFound(artifact.relative_path.clone())
            } else {
                ResolveError::Io {
                    path: artifact.relative_path.clone(),
                    source: e,
                }
            }
        })?;

        let actual_size = content.len() as u64;
        if actual_size != artifact.size_in_bytes {
            return Err(ResolveError::SizeMismatch {
                path: artifact.relative_path.clone(),
                expected: artifact.size_in_bytes,
                actual: actual_size,
            });
        }

        let actual_hash = sha256_hex(&content);
        if !actual_hash.eq_ignore_ascii_case(&artifact.hash) {
            return Err(ResolveError::HashMismatch {
                path: artifact.relative_path.clone(),
                expected: artifact.hash.clone(),
                actual: actual_hash,
            });
        }

        Ok(path)
    }
}

#[async_trait]
impl ModuleResolver for FsModuleResolver {
    async fn resolve(
        &self,
        entry: &ArtifactDescriptor,
        dependencies: &[ArtifactDescriptor],
    ) -> Result<String, ResolveError> {
        for dependency in dependencies {
            self.verify(dependency).await?;
        }
        let path = self.verify(entry).await?;
        let path = std::path::absolute(&path).map_err(|e| ResolveError::Io {
            path: entry.relative_path.clone(),
            source: e,
        })?;

        debug!(
            module_path = %path.display(),
            dependencies = dependencies.len(),
            "Resolved workflow module"
        );
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_artifact(dir: &Path, relative: &str, content: &[u8]) -> ArtifactDescriptor {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        ArtifactDescriptor::for_content(relative, content)
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let descriptor = ArtifactDescriptor::new("a/b.wf", "00", 2);
        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            serde_json::json!({"relativePath": "a/b.wf", "hash": "00", "sizeInBytes": 2})
        );
    }

    #[tokio::test]
    async fn test_static_resolver_returns_relative_path() {
        let path = StaticModuleResolver
            .resolve(&ArtifactDescriptor::inline("workflows/a.wf"), &[])
            .await
            .unwrap();
        assert_eq!(path, "workflows/a.wf");
    }

    #[tokio::test]
    async fn test_fs_resolver_verifies_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_artifact(dir.path(), "workflows/orders.wf", b"entry");
        let dep = write_artifact(dir.path(), "lib/common.wf", b"dependency");

        let resolver = FsModuleResolver::new(dir.path());
        let module_path = resolver.resolve(&entry, &[dep]).await.unwrap();
        assert!(Path::new(&module_path).is_absolute());
        assert!(Path::new(&module_path).ends_with("workflows/orders.wf"));
    }

    #[tokio::test]
    async fn test_fs_resolver_rejects_tampered_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = write_artifact(dir.path(), "orders.wf", b"entry");
        let resolver = FsModuleResolver::new(dir.path());

        entry.hash = sha256_hex(b"other");
        assert!(matches!(
            resolver.resolve(&entry, &[]).await,
            Err(ResolveError::HashMismatch { .. })
        ));

        entry.size_in_bytes = 99;
        assert!(matches!(
            resolver.resolve(&entry, &[]).await,
            Err(ResolveError::SizeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_fs_resolver_missing_and_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FsModuleResolver::new(dir.path());

        assert!(matches!(
            resolver
                .resolve(&ArtifactDescriptor::new("missing.wf", "", 0), &[])
                .await,
            Err(ResolveError::NotFound(_))
        ));
        assert!(matches!(
            resolver
                .resolve(&ArtifactDescriptor::new("../outside.wf", "", 0), &[])
                .await,
            Err(ResolveError::InvalidPath(_))
        ));
    }
}
