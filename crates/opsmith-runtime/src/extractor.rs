//! Path-traversal-safe archive extraction.
//!
//! Archives are extracted entry-by-entry. Every entry path is joined against
//! the destination and the joined path must stay inside it; any escape aborts
//! the whole extraction. Regular files and symlinks only.

use flate2::read::GzDecoder;
use opsmith_core::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Extract a `.tar.gz` or `.zip` archive into `dest`, dispatching on the
/// archive filename.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive.to_string_lossy();
    if name.ends_with(".zip") {
        extract_zip(archive, dest)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, dest)
    } else {
        Err(Error::config(format!(
            "unrecognized archive format: {name}"
        )))
    }
}

/// Extract a gzip-compressed tarball into `dest`.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let decoder = GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);

    std::fs::create_dir_all(dest)?;

    for entry in tar.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = safe_join(dest, &entry_path)?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = File::create(&target)?;
                std::io::copy(&mut entry, &mut out)?;

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode() {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
                }
            }
            tar::EntryType::Symlink => {
                let link = entry.link_name()?.ok_or_else(|| {
                    Error::integrity(format!(
                        "symlink entry without target: {}",
                        entry_path.display()
                    ))
                })?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                #[cfg(unix)]
                {
                    let _ = std::fs::remove_file(&target);
                    std::os::unix::fs::symlink(&link, &target)?;
                }
                #[cfg(not(unix))]
                {
                    let _ = link;
                }
            }
            other => {
                debug!(entry = %entry_path.display(), kind = ?other, "skipping archive entry");
            }
        }
    }

    Ok(())
}

/// Extract a zip archive into `dest` (Windows Node distributions).
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::integrity(format!("failed to open zip: {e}")))?;

    std::fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::integrity(format!("failed to read zip entry: {e}")))?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::integrity(format!(
                "illegal path in archive: {}",
                entry.name()
            )));
        };
        let target = safe_join(dest, &relative)?;

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            std::fs::write(&target, &content)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

/// Join an archive entry path onto `dest`, rejecting any component that
/// would land the result outside `dest`.
fn safe_join(dest: &Path, entry: &Path) -> Result<PathBuf> {
    let mut target = dest.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::integrity(format!(
                    "illegal path in archive: {}",
                    entry.display()
                )));
            }
        }
    }

    // The component walk above makes escape impossible; the prefix check is
    // the invariant the rest of the crate relies on.
    if !target.starts_with(dest) {
        return Err(Error::integrity(format!(
            "illegal path in archive: {}",
            entry.display()
        )));
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_tarball(dir: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("test.tar.gz");
        let file = File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append(&header, &content[..]).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_extract_regular_files() {
        let temp = TempDir::new().unwrap();
        let tarball = write_tarball(
            temp.path(),
            &[("bin/python3", b"#!/bin/sh\n"), ("lib/libfoo.so", b"elf")],
        );

        let dest = temp.path().join("out");
        extract_tar_gz(&tarball, &dest).unwrap();

        assert!(dest.join("bin/python3").is_file());
        assert!(dest.join("lib/libfoo.so").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let tarball = write_tarball(temp.path(), &[("bin/tool", b"x")]);
        let dest = temp.path().join("out");
        extract_tar_gz(&tarball, &dest).unwrap();

        let mode = std::fs::metadata(dest.join("bin/tool"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_traversal_entry_aborts_extraction() {
        let temp = TempDir::new().unwrap();

        // Build a tarball whose first entry names ../evil.txt; set_path
        // refuses traversal so write the long-name field by hand.
        let path = temp.path().join("evil.tar.gz");
        let file = File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            let name = b"../evil.txt";
            gnu.name[..name.len()].copy_from_slice(name);
        }
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"boom"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = temp.path().join("out");
        let err = extract_tar_gz(&path, &dest).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(!temp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let dest = Path::new("/tmp/out");
        assert!(safe_join(dest, Path::new("bin/python3")).is_ok());
        assert!(safe_join(dest, Path::new("./bin/python3")).is_ok());
        assert!(safe_join(dest, Path::new("../evil")).is_err());
        assert!(safe_join(dest, Path::new("a/../../evil")).is_err());
        assert!(safe_join(dest, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_unrecognized_format() {
        let err = extract_archive(Path::new("/tmp/thing.rar"), Path::new("/tmp/out")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
