// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::format::{EOF_MARKER, FileHeader, RegisteredFace};

pub struct RegistryWriter {
    encoder: zstd::Encoder<'static, BufWriter<File>>,
}

impl RegistryWriter {
    /// Creates a registry file at `path` and writes the file header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header cannot be written.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create registry file: {}", path.display()))?;
        let mut encoder =
            zstd::Encoder::new(BufWriter::new(file), 3).context("failed to create zstd encoder")?;

        write_record(&mut encoder, &FileHeader::current(), "header")?;
        Ok(Self { encoder })
    }

    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_face(&mut self, face: &RegisteredFace) -> Result<()> {
        write_record(&mut self.encoder, face, "face record")
    }

    /// Writes the EOF marker, finishes compression, and syncs the file.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub fn finish(mut self) -> Result<()> {
        self.encoder
            .write_all(&EOF_MARKER)
            .context("failed to write EOF marker")?;
        let buf_writer = self
            .encoder
            .finish()
            .context("failed to finish zstd encoder")?;
        let file = buf_writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("failed to flush registry file")?;
        file.sync_all().context("failed to sync registry file")?;
        Ok(())
    }
}

fn write_record<T: serde::Serialize>(out: &mut impl Write, record: &T, what: &str) -> Result<()> {
    let serialized =
        postcard::to_stdvec(record).with_context(|| format!("failed to serialize {what}"))?;

    #[allow(clippy::cast_possible_truncation)]
    let len = serialized.len() as u32;
    out.write_all(&len.to_le_bytes())
        .with_context(|| format!("failed to write {what} length"))?;
    out.write_all(&serialized)
        .with_context(|| format!("failed to write {what} data"))?;
    Ok(())
}
