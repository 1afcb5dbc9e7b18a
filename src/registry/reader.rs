// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};

use super::format::{EOF_MARKER, FORMAT_VERSION, FileHeader, MAGIC, RegisteredFace};

/// Reads every record of the registry file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, the header is invalid, or a record is
/// corrupted.
pub fn read_faces(path: &Path) -> Result<Vec<RegisteredFace>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open registry file: {}", path.display()))?;
    let mut decoder =
        zstd::Decoder::new(BufReader::new(file)).context("failed to create zstd decoder")?;

    let header = read_header(&mut decoder)?;
    if header.magic != MAGIC {
        bail!("invalid magic bytes in registry file {}", path.display());
    }
    if header.format_version != FORMAT_VERSION {
        bail!(
            "unsupported registry format version {} (expected {FORMAT_VERSION})",
            header.format_version
        );
    }

    read_all_faces(&mut decoder)
}

fn read_header(reader: &mut impl Read) -> Result<FileHeader> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .context("failed to read header length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .context("failed to read header data")?;

    postcard::from_bytes(&data).context("failed to deserialize registry header")
}

fn read_all_faces(reader: &mut impl Read) -> Result<Vec<RegisteredFace>> {
    let mut faces = Vec::new();
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                bail!("registry file is truncated (no end marker)")
            }
            Err(e) => return Err(e).context("failed to read record length"),
        }

        if len_buf == EOF_MARKER {
            break;
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut data = vec![0u8; len];
        reader
            .read_exact(&mut data)
            .context("failed to read face record")?;

        let face: RegisteredFace =
            postcard::from_bytes(&data).context("failed to deserialize face record")?;
        faces.push(face);
    }

    Ok(faces)
}
