//! File-per-profile backend.
//!
//! Layout: `<root>/<shard>/<sha256(key)>.prof`, where `<shard>` is the first
//! byte of the hash in hex. Each file holds:
//!
//! ```text
//! magic "PRF\0" | version u8 | key_len u16 | key | body_len u64 | body | crc32(body)
//! ```
//!
//! The body is the MessagePack encoding of a [`StoredProfile`]. Writes go to
//! a temp file that is renamed over the old one, and every read-modify-write
//! holds an exclusive lock on a sidecar `.lock` file.

use super::{ProfileBackend, StoredProfile, UpdateFn};
use crate::error::{ProfileError, Result};
use crate::types::KeyHash;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for profile files.
const PROFILE_MAGIC: &[u8; 4] = b"PRF\0";

/// Current profile file format version.
const PROFILE_VERSION: u8 = 1;

/// Profile storage on the local filesystem.
///
/// The read cache assumes a key is only written by the server that owns its
/// session; `update` always rereads the file under lock.
pub struct FileBackend {
    /// Base directory for profiles.
    path: PathBuf,

    /// LRU cache for recently read profiles.
    cache: Mutex<LruCache<String, StoredProfile>>,
}

impl FileBackend {
    /// Open (or create) a backend rooted at `path`.
    pub fn new(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Root directory of this backend.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List the keys of all stored profiles.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for profile_entry in fs::read_dir(entry.path())? {
                let profile_entry = profile_entry?;
                let file_path = profile_entry.path();
                if file_path.extension().and_then(|e| e.to_str()) != Some("prof") {
                    continue;
                }
                match Self::read_file(&file_path) {
                    Ok((key, _)) => keys.push(key),
                    Err(e) => warn!(path = %file_path.display(), error = %e, "skipping unreadable profile file"),
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn shard_path(&self, hash: &KeyHash) -> PathBuf {
        self.path.join(hash.shard_prefix())
    }

    fn profile_path(&self, hash: &KeyHash) -> PathBuf {
        self.shard_path(hash).join(format!("{}.prof", hash.to_hex()))
    }

    fn lock_path(&self, hash: &KeyHash) -> PathBuf {
        self.shard_path(hash).join(format!("{}.lock", hash.to_hex()))
    }

    fn load_from_disk(&self, key: &str, hash: &KeyHash) -> Result<Option<StoredProfile>> {
        let file_path = self.profile_path(hash);
        if !file_path.exists() {
            return Ok(None);
        }

        let (stored_key, profile) = Self::read_file(&file_path)?;
        if stored_key != key {
            return Err(ProfileError::InvalidFormat(format!(
                "profile file for '{}' holds key '{}'",
                key, stored_key
            )));
        }
        Ok(Some(profile))
    }

    fn read_file(file_path: &Path) -> Result<(String, StoredProfile)> {
        let mut file = File::open(file_path)?;

        // Read and verify magic
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != PROFILE_MAGIC {
            return Err(ProfileError::InvalidFormat("Invalid profile magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != PROFILE_VERSION {
            return Err(ProfileError::InvalidFormat(format!(
                "Unsupported profile version: {}",
                version[0]
            )));
        }

        let mut key_len_bytes = [0u8; 2];
        file.read_exact(&mut key_len_bytes)?;
        let key_len = u16::from_le_bytes(key_len_bytes) as usize;

        let mut key_bytes = vec![0u8; key_len];
        file.read_exact(&mut key_bytes)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|e| ProfileError::InvalidFormat(format!("profile key is not UTF-8: {}", e)))?;

        let mut body_len_bytes = [0u8; 8];
        file.read_exact(&mut body_len_bytes)?;
        let body_len = u64::from_le_bytes(body_len_bytes) as usize;

        let mut body = vec![0u8; body_len];
        file.read_exact(&mut body)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&body);

        if stored_checksum != computed_checksum {
            return Err(ProfileError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let profile: StoredProfile = rmp_serde::from_slice(&body)?;
        Ok((key, profile))
    }

    fn write_to_disk(&self, key: &str, hash: &KeyHash, profile: &StoredProfile) -> Result<()> {
        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len()).map_err(|_| {
            ProfileError::InvalidOperation(format!("profile key too long ({} bytes)", key_bytes.len()))
        })?;
        let body = rmp_serde::to_vec_named(profile)?;

        let file_path = self.profile_path(hash);
        let tmp_path = file_path.with_extension("tmp");

        {
            let mut file = File::create(&tmp_path)?;

            // Write header
            file.write_all(PROFILE_MAGIC)?;
            file.write_all(&[PROFILE_VERSION])?;

            file.write_all(&key_len.to_le_bytes())?;
            file.write_all(key_bytes)?;

            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&body)?;

            let checksum = crc32fast::hash(&body);
            file.write_all(&checksum.to_le_bytes())?;

            file.sync_all()?;
        }

        fs::rename(&tmp_path, &file_path)?;
        Ok(())
    }
}

impl ProfileBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<StoredProfile>> {
        if let Some(cached) = self.cache.lock().get(key).cloned() {
            return Ok(Some(cached));
        }

        let hash = KeyHash::of(key);
        let profile = self.load_from_disk(key, &hash)?;
        if let Some(profile) = &profile {
            self.cache.lock().put(key.to_string(), profile.clone());
        }
        Ok(profile)
    }

    fn update(&self, key: &str, transform: &mut UpdateFn<'_>) -> Result<StoredProfile> {
        let hash = KeyHash::of(key);
        fs::create_dir_all(self.shard_path(&hash))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(&hash))?;
        lock_file.lock_exclusive()?;

        let result = self.load_from_disk(key, &hash).and_then(|current| {
            let updated = transform(current)?;
            self.write_to_disk(key, &hash, &updated)?;
            Ok(updated)
        });

        if let Err(e) = lock_file.unlock() {
            warn!(key, error = %e, "failed to unlock profile file");
        }

        match &result {
            Ok(updated) => {
                debug!(key, "profile written");
                self.cache.lock().put(key.to_string(), updated.clone());
            }
            Err(_) => {
                self.cache.lock().pop(key);
            }
        }
        result
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.cache.lock().pop(key);

        let hash = KeyHash::of(key);
        let file_path = self.profile_path(&hash);
        if file_path.exists() {
            fs::remove_file(&file_path)?;
            let _ = fs::remove_file(self.lock_path(&hash));
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
