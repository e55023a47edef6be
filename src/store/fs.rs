use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use sha2::{Digest, Sha256};

use super::{ContentHandle, ContentStore, StoreError};

/// How much of the tree digest goes into the store entry name. Enough to
/// make collisions a non-concern while keeping paths readable.
const DIGEST_PREFIX_LEN: usize = 32;

/// Filesystem-backed content-addressed store: a directory of
/// `<digest>-<name>` entries. Ingesting the same tree twice yields the same
/// path without copying.
pub struct FsContentStore {
    location: PathBuf,
}

impl FsContentStore {
    pub fn new(location: PathBuf) -> Result<Self, StoreError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(StoreError::BadLocation {
                    location: location.to_str().unwrap_or("").to_string(),
                });
            }
        } else {
            fs::create_dir_all(&location)?;
        }
        Ok(FsContentStore { location })
    }
}

impl ContentStore for FsContentStore {
    fn add_to_store(&self, name: &str, dir: &Path) -> Result<ContentHandle, StoreError> {
        let digest = hash_tree(dir)?;
        let short = &digest[..DIGEST_PREFIX_LEN.min(digest.len())];
        let dest = self.location.join(format!("{short}-{name}"));

        if dest.exists() {
            debug!("store already has {}", dest.display());
        } else {
            // Copy into a staging directory first so a crash never leaves a
            // half-written store entry under its final name.
            let staging = self.location.join(format!(".tmp-{short}-{name}"));
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            copy_tree(dir, &staging)?;
            fs::rename(&staging, &dest)?;
            info!("added {} to store at {}", name, dest.display());
        }

        Ok(ContentHandle { digest, path: dest })
    }
}

/// Deterministic digest of a directory tree: entries are visited in sorted
/// order, and each contributes its relative path, kind, and contents (or
/// symlink target). A file's executable bit is part of its identity.
fn hash_tree(root: &Path) -> Result<String, StoreError> {
    let mut hasher = Sha256::new();
    hash_dir(&mut hasher, root, Path::new(""))?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_dir(hasher: &mut Sha256, dir: &Path, relative: &Path) -> Result<(), StoreError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = relative.join(entry.file_name());
        let file_type = entry.file_type()?;

        hasher.update(relative.to_string_lossy().as_bytes());
        if file_type.is_dir() {
            hasher.update(b"\0dir\0");
            hash_dir(hasher, &path, &relative)?;
        } else if file_type.is_symlink() {
            hasher.update(b"\0link\0");
            hasher.update(fs::read_link(&path)?.to_string_lossy().as_bytes());
        } else if file_type.is_file() {
            hasher.update(b"\0file\0");
            if is_executable(&entry.metadata()?) {
                hasher.update(b"\0exec\0");
            }
            hasher.update(fs::read(&path)?);
        } else {
            return Err(StoreError::UnsupportedFileType {
                path: path.to_string_lossy().into_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

// Executable bits survive ingestion because `fs::copy` carries the
// source's permission bits.
fn copy_tree(src: &Path, dest: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
            #[cfg(not(unix))]
            return Err(StoreError::UnsupportedFileType {
                path: entry.path().to_string_lossy().into_owned(),
            });
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            return Err(StoreError::UnsupportedFileType {
                path: entry.path().to_string_lossy().into_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (name, contents) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
    }

    #[test]
    fn same_bytes_same_handle() {
        let store_dir = tempdir().unwrap();
        let store = FsContentStore::new(store_dir.path().to_path_buf()).unwrap();

        let first = tempdir().unwrap();
        write_tree(first.path(), &[("a.txt", "hello"), ("sub/b.txt", "world")]);
        let second = tempdir().unwrap();
        write_tree(second.path(), &[("a.txt", "hello"), ("sub/b.txt", "world")]);

        let handle1 = store.add_to_store("repo", first.path()).unwrap();
        let handle2 = store.add_to_store("repo", second.path()).unwrap();
        assert_eq!(handle1, handle2);
        assert!(handle1.path.join("sub/b.txt").exists());
    }

    #[test]
    fn different_bytes_different_handle() {
        let store_dir = tempdir().unwrap();
        let store = FsContentStore::new(store_dir.path().to_path_buf()).unwrap();

        let first = tempdir().unwrap();
        write_tree(first.path(), &[("a.txt", "one")]);
        let second = tempdir().unwrap();
        write_tree(second.path(), &[("a.txt", "two")]);

        let handle1 = store.add_to_store("repo", first.path()).unwrap();
        let handle2 = store.add_to_store("repo", second.path()).unwrap();
        assert_ne!(handle1.digest, handle2.digest);
        assert_ne!(handle1.path, handle2.path);
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_affects_the_digest_and_survives_ingestion() {
        use std::os::unix::fs::PermissionsExt;

        let store_dir = tempdir().unwrap();
        let store = FsContentStore::new(store_dir.path().to_path_buf()).unwrap();

        let first = tempdir().unwrap();
        write_tree(first.path(), &[("run.sh", "#!/bin/sh\n")]);
        fs::set_permissions(
            first.path().join("run.sh"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        let second = tempdir().unwrap();
        write_tree(second.path(), &[("run.sh", "#!/bin/sh\n")]);

        let handle1 = store.add_to_store("repo", first.path()).unwrap();
        let handle2 = store.add_to_store("repo", second.path()).unwrap();
        assert_ne!(handle1.digest, handle2.digest);
        assert_ne!(handle1.path, handle2.path);

        let mode = fs::metadata(handle1.path.join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[test]
    fn file_name_affects_the_digest() {
        let store_dir = tempdir().unwrap();
        let store = FsContentStore::new(store_dir.path().to_path_buf()).unwrap();

        let first = tempdir().unwrap();
        write_tree(first.path(), &[("a.txt", "same")]);
        let second = tempdir().unwrap();
        write_tree(second.path(), &[("b.txt", "same")]);

        let handle1 = store.add_to_store("repo", first.path()).unwrap();
        let handle2 = store.add_to_store("repo", second.path()).unwrap();
        assert_ne!(handle1.digest, handle2.digest);
    }
}
