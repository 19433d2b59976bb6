//! Content-addressed(-by-identifier) filesystem blob storage.
//!
//! Blobs are named by a random [`Uuid`], not a content hash: two `put`s of
//! identical bytes get two distinct blobs, matching the upload-then-reference
//! design of the source cache (which never de-duplicates across keys).
//! Storage uses a two-level hex fanout (`ab/cd/abcdef...`) so a single
//! directory never holds more than a few thousand entries.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A filesystem-backed, content-addressed-by-id blob store.
///
/// All operations are safe to call from multiple threads: writes go through
/// a temp-file-then-rename dance so a concurrent reader never observes a
/// partially written blob.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens (creating if necessary) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, uuid: &str) -> PathBuf {
        // Two-level hex fanout: the first four hex digits of the uuid pick
        // the subdirectories, the full uuid is the filename.
        let mut chars = uuid.chars().filter(char::is_ascii_hexdigit);
        let a: String = chars.by_ref().take(2).collect();
        let b: String = chars.by_ref().take(2).collect();
        if a.len() == 2 && b.len() == 2 {
            self.root.join(a).join(b).join(uuid)
        } else {
            // Defensive fallback for malformed ids; never hit in practice
            // since we always generate our own uuids.
            self.root.join(uuid)
        }
    }

    /// Writes `bytes` to a freshly generated blob id and returns that id.
    ///
    /// Atomic from any reader's point of view: the bytes are written to a
    /// sibling temp file first, then renamed into place.
    pub fn put(&self, bytes: &[u8]) -> io::Result<String> {
        let uuid = Uuid::new_v4().to_string();
        let final_path = self.path_for(&uuid);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = final_path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;

        Ok(uuid)
    }

    pub fn get(&self, uuid: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(uuid))
    }

    /// Returns the byte length of the given blob without reading its contents.
    pub fn size_of(&self, uuid: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path_for(uuid))?.len())
    }

    /// Best-effort delete: a missing file is not an error.
    pub fn delete(&self, uuid: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(uuid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Lists every blob id currently on disk. Used only by the sanity check
    /// and the orphan sweep on open — `O(number of blobs)`.
    pub fn list(&self) -> io::Result<HashSet<String>> {
        let mut out = HashSet::new();
        self.walk(&self.root, &mut out)?;
        Ok(out)
    }

    fn walk(&self, dir: &Path, out: &mut HashSet<String>) -> io::Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, out)?;
            } else if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    out.insert(name.to_owned());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let id = store.put(b"hello world").unwrap();
        assert_eq!(store.get(&id).unwrap(), b"hello world");
        assert_eq!(store.size_of(&id).unwrap(), 11);
    }

    #[test]
    fn delete_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        store.delete("does-not-exist").unwrap();
    }

    #[test]
    fn list_reflects_puts_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        let mut expected = HashSet::new();
        expected.insert(a.clone());
        expected.insert(b.clone());
        assert_eq!(store.list().unwrap(), expected);

        store.delete(&a).unwrap();
        expected.remove(&a);
        assert_eq!(store.list().unwrap(), expected);
    }

    #[test]
    fn distinct_puts_of_identical_bytes_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
