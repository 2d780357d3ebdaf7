//! Durable, write-once storage for diagnostic snapshots

use anyhow::{Context, Result};
use log::warn;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::runner::state::{ArtifactRef, DiagnosticSnapshot};

/// Artifact sink addressed by (profile, step, timestamp)
pub trait DiagnosticStore: Send + Sync {
    fn persist(&self, snapshot: &DiagnosticSnapshot) -> Result<ArtifactRef>;
}

/// Stores snapshots as `<root>/<profile>/<step>-<timestamp>-<uid>.<ext>`.
/// Files are created exclusively, so an existing artifact is never
/// overwritten and concurrent profile runs cannot collide.
pub struct FsDiagnosticStore {
    root: PathBuf,
}

impl FsDiagnosticStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("Failed to create artifact {}", path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        Ok(())
    }

    /// Both captures or neither: a structural file whose image could not be
    /// written is removed again.
    fn write_captures(structural: &Path, text: &[u8], visual: Option<(&Path, &[u8])>) -> Result<()> {
        Self::write_new(structural, text)?;
        if let Some((path, bytes)) = visual {
            if let Err(e) = Self::write_new(path, bytes) {
                if let Err(cleanup) = std::fs::remove_file(structural) {
                    warn!("Failed to remove {}: {}", structural.display(), cleanup);
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

impl DiagnosticStore for FsDiagnosticStore {
    fn persist(&self, snapshot: &DiagnosticSnapshot) -> Result<ArtifactRef> {
        let dir = self.root.join(safe_name(&snapshot.profile_id));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let stem = format!(
            "{}-{}-{}",
            safe_name(&snapshot.step),
            snapshot.captured_at.format("%Y%m%dT%H%M%S%3fZ"),
            &uid[..8]
        );

        let structural_path = dir.join(format!("{}.{}", stem, snapshot.structural_format));
        let visual_path = snapshot
            .visual
            .as_ref()
            .map(|bytes| (dir.join(format!("{}.png", stem)), bytes.as_slice()));
        Self::write_captures(
            &structural_path,
            snapshot.structural.as_bytes(),
            visual_path.as_ref().map(|(path, bytes)| (path.as_path(), *bytes)),
        )?;

        Ok(ArtifactRef {
            visual_path: visual_path.map(|(path, _)| path.to_string_lossy().to_string()),
            structural_path: structural_path.to_string_lossy().to_string(),
            captured_at: snapshot.captured_at.to_rfc3339(),
        })
    }
}

/// File-system safe rendering of a profile or step name
fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.chars().take(64).collect()
    }
}
