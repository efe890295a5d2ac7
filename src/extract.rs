//! Archive extraction for completed downloads.
//!
//! The dispatcher inspects the declared content type of a completed file and,
//! when it names a supported archive format, unpacks every entry into the
//! destination directory, preserving relative paths and overwriting existing
//! files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::ExtractionError;

/// Archive formats the dispatcher knows how to unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

/// Maps a declared content type to an archive kind, or `None` for files that
/// are kept as-is.
pub fn archive_kind(mime_type: &str) -> Option<ArchiveKind> {
    match mime_type {
        "application/zip" | "application/x-zip-compressed" => Some(ArchiveKind::Zip),
        "application/x-tar" => Some(ArchiveKind::Tar),
        "application/gzip" | "application/x-gzip" => Some(ArchiveKind::TarGz),
        _ => None,
    }
}

/// Extracts `archive_path` into `dest_dir`, returning the number of files
/// written. The archive itself is left on disk regardless of outcome.
pub fn extract_archive(
    archive_path: &Path,
    kind: ArchiveKind,
    dest_dir: &Path,
) -> Result<u64, ExtractionError> {
    std::fs::create_dir_all(dest_dir)?;
    match kind {
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir),
        ArchiveKind::Tar => {
            let file = File::open(archive_path)?;
            extract_tar(file, dest_dir)
        }
        ArchiveKind::TarGz => {
            let file = File::open(archive_path)?;
            extract_tar(GzDecoder::new(file), dest_dir)
        }
    }
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<u64, ExtractionError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut count = 0u64;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // Entries with paths escaping the destination are skipped.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        count += 1;
    }

    Ok(count)
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<u64, ExtractionError> {
    let mut archive = Archive::new(reader);
    let mut count = 0u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        entry.unpack_in(dest_dir)?;
        count += 1;
    }
    Ok(count)
}
