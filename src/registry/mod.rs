// SPDX-License-Identifier: MIT
//! Persistent store of registered identities.

pub mod format;
pub mod reader;
pub mod writer;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub use format::RegisteredFace;
use writer::RegistryWriter;

use crate::scorer::FaceId;

pub const REGISTRY_FILE_NAME: &str = "faces.freg";

pub struct FaceRegistry {
    path: PathBuf,
    faces: BTreeMap<FaceId, RegisteredFace>,
}

impl FaceRegistry {
    /// Loads `<data_dir>/faces.freg`. A missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(REGISTRY_FILE_NAME);
        let faces = if path.exists() {
            reader::read_faces(&path)?
        } else {
            debug!(path = %path.display(), "no registry file yet");
            Vec::new()
        };

        Ok(Self {
            path,
            faces: faces.into_iter().map(|face| (face.id, face)).collect(),
        })
    }

    /// All registered faces, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<&RegisteredFace> {
        self.faces.values().collect()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<FaceId> {
        self.faces.keys().copied().collect()
    }

    /// Stores `face`, replacing an earlier registration of the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry file cannot be rewritten.
    pub fn add(&mut self, face: RegisteredFace) -> Result<()> {
        self.faces.insert(face.id, face);
        self.save()
    }

    /// Returns whether `id` was registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry file cannot be rewritten.
    pub fn remove(&mut self, id: FaceId) -> Result<bool> {
        if self.faces.remove(&id).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Removes every registration and returns the removed ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry file cannot be rewritten.
    pub fn remove_all(&mut self) -> Result<Vec<FaceId>> {
        let ids = self.ids();
        self.faces.clear();
        self.save()?;
        Ok(ids)
    }

    fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("freg.tmp");
        let mut writer = RegistryWriter::create(&tmp)?;
        for face in self.faces.values() {
            writer.write_face(face)?;
        }
        writer.finish()?;

        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "failed to replace {} with {}",
                self.path.display(),
                tmp.display()
            )
        })?;
        debug!(path = %self.path.display(), faces = self.faces.len(), "registry saved");
        Ok(())
    }
}

/// `1 + 2 + 5`, as printed by `list`.
#[must_use]
pub fn format_ids(ids: &[FaceId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" + ")
}
