// src/recipe/kitchen/archive.rs

//! Package archive helpers for the Kitchen
//!
//! Packages are gzip-compressed tarballs of the build prefix. Entries are
//! written in sorted order with zeroed ownership and timestamps so identical
//! prefixes produce identical bytes.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::Path;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

/// Archive the contents of `dir` (not the directory itself)
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry =
            entry.map_err(|e| Error::IoError(format!("Failed to walk {}: {}", dir.display(), e)))?;
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let metadata = entry.path().symlink_metadata()?;

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder.append_link(&mut header, rel, &target)?;
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(normalized_mode(&metadata));
            header.set_size(metadata.len());
            builder.append_data(&mut header, rel, File::open(entry.path())?)?;
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Extract a package archive into `dest`
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    archive.set_preserve_mtime(false);
    archive
        .unpack(dest)
        .map_err(|e| Error::IoError(format!("Failed to unpack into {}: {}", dest.display(), e)))
}

#[cfg(unix)]
fn normalized_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn normalized_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("bin/tool"), b"#!/bin/sh\necho hi\n").unwrap();
        fs::write(dir.join("README"), b"docs").unwrap();
    }

    #[test]
    fn test_pack_is_deterministic() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        populate(a.path());
        populate(b.path());
        assert_eq!(pack_dir(a.path()).unwrap(), pack_dir(b.path()).unwrap());
    }

    #[test]
    fn test_unpack_restores_files() {
        let src = TempDir::new().unwrap();
        populate(src.path());
        let bytes = pack_dir(src.path()).unwrap();

        let dest = TempDir::new().unwrap();
        unpack(&bytes, dest.path()).unwrap();
        assert_eq!(fs::read(dest.path().join("README")).unwrap(), b"docs");
        assert!(dest.path().join("bin/tool").is_file());
    }
}
