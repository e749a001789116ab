//! Artifact sinks: where finished screenshots go

use super::ArtifactSink;
use crate::packager::FinalArtifact;
use crate::{Error, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Writes each artifact as a file under a directory (the "download" sink).
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths written so far, in artifact order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ArtifactSink for DirectorySink {
    fn persist(&mut self, artifacts: &[FinalArtifact]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Sink(format!("cannot create {}: {}", self.dir.display(), e)))?;
        for artifact in artifacts {
            let path = self.dir.join(&artifact.file_name);
            std::fs::write(&path, &artifact.payload)
                .map_err(|e| Error::Sink(format!("cannot write {}: {}", path.display(), e)))?;
            info!("saved {} ({} bytes)", path.display(), artifact.payload.len());
            self.written.push(path);
        }
        Ok(())
    }
}

/// Keeps artifacts in memory; used by tests and embedders that forward the
/// bytes elsewhere (clipboard, IPC).
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub artifacts: Vec<FinalArtifact>,
}

impl ArtifactSink for MemorySink {
    fn persist(&mut self, artifacts: &[FinalArtifact]) -> Result<()> {
        self.artifacts.extend_from_slice(artifacts);
        Ok(())
    }
}
