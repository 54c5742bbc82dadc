use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use raw_sync::locks::{LockImpl, LockInit, Mutex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::debug;

use crate::error::{Result, StoreError};

const SEGMENT_MAGIC: u32 = u32::from_le_bytes(*b"skvm");
const SEGMENT_VERSION: u32 = 1;

/// Fixed space reserved for [`SegmentHeader`] at the segment base.
const HEADER_RESERVED: usize = 32;
/// Per-slot header: `state (4) + len (4) + key (8)`.
const SLOT_HEADER: usize = 16;

const SLOT_FREE: u32 = 0;
const SLOT_USED: u32 = 1;

const READY_POLL: Duration = Duration::from_millis(1);
const READY_TIMEOUT: Duration = Duration::from_secs(2);

#[repr(C)]
struct SegmentHeader {
    magic: u32,
    version: u32,
    slot_count: u32,
    slot_size: u32,
    ready: AtomicU32,
}

#[repr(C)]
struct SlotHeader {
    state: u32,
    len: u32,
    key: i64,
}

/// Slot capacity of a store segment.
///
/// Every process attaching a token must agree on the layout; joiners read
/// the creator's values from the segment header and this config only
/// matters on the creating side.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Number of key slots.
    pub slot_count: usize,
    /// Maximum value size per slot, in bytes.
    pub slot_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            slot_count: 64,
            slot_size: 1024,
        }
    }
}

/// Shared-memory key/value store keyed by a token file.
///
/// The token names a file under the system temporary directory; the
/// segment identity is derived from that file, so processes using the
/// same token attach the same memory. Choose tokens distinct enough not
/// to collide with unrelated applications.
pub struct ShmStore {
    token_path: PathBuf,
    shmem: Option<Shmem>,
    lock: Option<Box<dyn LockImpl>>,
    table_offset: usize,
    slot_count: usize,
    slot_size: usize,
    auto_release: bool,
}

impl ShmStore {
    /// Attach the segment for `token`, creating it if this is the first
    /// attacher. With `auto_release`, dropping the store releases the
    /// segment; otherwise it persists for other processes.
    pub fn attach(token: &str, auto_release: bool) -> Result<Self> {
        Self::attach_with(token, auto_release, StoreConfig::default())
    }

    /// Attach with explicit capacity (creator side only; joiners inherit
    /// the creator's layout).
    pub fn attach_with(token: &str, auto_release: bool, config: StoreConfig) -> Result<Self> {
        if token.is_empty() || token.contains(['/', '\0']) {
            return Err(StoreError::InvalidToken(token.to_string()));
        }

        let token_path = std::env::temp_dir().join(format!("spawnkit-shm-{token}.key"));

        let mutex_reserved = round_up(Mutex::size_of(None), 8);
        let table_offset = HEADER_RESERVED + mutex_reserved;
        let segment_len =
            table_offset + config.slot_count * (SLOT_HEADER + round_up(config.slot_size, 8));

        let shmem = match ShmemConf::new()
            .size(segment_len)
            .flink(&token_path)
            .create()
        {
            Ok(shmem) => shmem,
            Err(ShmemError::LinkExists) => {
                ShmemConf::new()
                    .flink(&token_path)
                    .open()
                    .map_err(|source| StoreError::Attach {
                        path: token_path.clone(),
                        source,
                    })?
            }
            Err(source) => {
                return Err(StoreError::Attach {
                    path: token_path,
                    source,
                })
            }
        };

        let base = shmem.as_ptr();
        let mutex_ptr = unsafe { base.add(HEADER_RESERVED) };
        let table_ptr = unsafe { base.add(table_offset) };

        let (lock, slot_count, slot_size) = if shmem.is_owner() {
            // Fresh segments are zero-filled: every slot starts free.
            // SAFETY: the segment is at least HEADER_RESERVED bytes; the
            // owner writes the header before flagging ready, and no other
            // process touches the segment until then.
            let header = unsafe { &mut *(base as *mut SegmentHeader) };
            header.magic = SEGMENT_MAGIC;
            header.version = SEGMENT_VERSION;
            header.slot_count = config.slot_count as u32;
            header.slot_size = config.slot_size as u32;
            // SAFETY: mutex_ptr has mutex_reserved bytes of private space
            // inside the mapping; table_ptr is the protected region.
            let (lock, _) = unsafe { Mutex::new(mutex_ptr, table_ptr) }
                .map_err(|err| StoreError::Init(err.to_string()))?;
            header.ready.store(1, Ordering::Release);
            debug!(path = ?token_path, "created shared segment");
            (lock, config.slot_count, config.slot_size)
        } else {
            // SAFETY: the header lives at the segment base in every
            // attaching process; only read after the creator's release
            // store to ready.
            let header = unsafe { &*(base as *const SegmentHeader) };
            wait_ready(header, &token_path)?;
            if header.magic != SEGMENT_MAGIC || header.version != SEGMENT_VERSION {
                return Err(StoreError::Incompatible {
                    path: token_path,
                    reason: format!(
                        "magic {:#x} version {}",
                        header.magic, header.version
                    ),
                });
            }
            // SAFETY: same layout the creator initialized.
            let (lock, _) = unsafe { Mutex::from_existing(mutex_ptr, table_ptr) }
                .map_err(|err| StoreError::Init(err.to_string()))?;
            debug!(path = ?token_path, "joined shared segment");
            (
                lock,
                header.slot_count as usize,
                header.slot_size as usize,
            )
        };

        Ok(Self {
            token_path,
            shmem: Some(shmem),
            lock: Some(lock),
            table_offset,
            slot_count,
            slot_size,
            auto_release,
        })
    }

    /// Path of the backing token file.
    pub fn token_path(&self) -> &PathBuf {
        &self.token_path
    }

    /// Store a serde value under an integer key, visible to every
    /// attached process.
    pub fn set<T: Serialize>(&mut self, key: i64, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set_bytes(key, &bytes)
    }

    /// Fetch and decode the value under `key`.
    pub fn get<T: DeserializeOwned>(&mut self, key: i64) -> Result<Option<T>> {
        match self.get_bytes(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store raw bytes under an integer key.
    pub fn set_bytes(&mut self, key: i64, value: &[u8]) -> Result<()> {
        if value.len() > self.slot_size {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: self.slot_size,
            });
        }

        let table = self.table()?;
        let _guard = self.lock()?;

        let mut free = None;
        for idx in 0..self.slot_count {
            // SAFETY: idx < slot_count; exclusive table access under the
            // cross-process mutex.
            let slot = unsafe { &mut *self.slot_ptr(table, idx) };
            if slot.state == SLOT_USED && slot.key == key {
                write_slot(slot, key, value);
                return Ok(());
            }
            if slot.state == SLOT_FREE && free.is_none() {
                free = Some(idx);
            }
        }

        match free {
            Some(idx) => {
                // SAFETY: as above.
                let slot = unsafe { &mut *self.slot_ptr(table, idx) };
                write_slot(slot, key, value);
                Ok(())
            }
            None => Err(StoreError::Full {
                slots: self.slot_count,
            }),
        }
    }

    /// Fetch the raw bytes under `key`. `Ok(None)` for absent or deleted
    /// keys, never a stale value.
    pub fn get_bytes(&mut self, key: i64) -> Result<Option<Vec<u8>>> {
        let table = self.table()?;
        let _guard = self.lock()?;

        for idx in 0..self.slot_count {
            // SAFETY: idx < slot_count; shared table access under the
            // cross-process mutex.
            let slot = unsafe { &*self.slot_ptr(table, idx) };
            if slot.state == SLOT_USED && slot.key == key {
                let len = slot.len as usize;
                // SAFETY: value bytes follow the slot header; len was
                // bounds-checked on write.
                let data = unsafe {
                    std::slice::from_raw_parts((slot as *const SlotHeader as *const u8).add(SLOT_HEADER), len)
                };
                return Ok(Some(data.to_vec()));
            }
        }
        Ok(None)
    }

    /// Remove the value under `key`. Returns whether a value existed.
    pub fn delete(&mut self, key: i64) -> Result<bool> {
        let table = self.table()?;
        let _guard = self.lock()?;

        for idx in 0..self.slot_count {
            // SAFETY: as in set_bytes.
            let slot = unsafe { &mut *self.slot_ptr(table, idx) };
            if slot.state == SLOT_USED && slot.key == key {
                slot.state = SLOT_FREE;
                slot.len = 0;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Detach and remove the segment and its token file. Idempotent;
    /// subsequent operations fail with [`StoreError::Released`].
    pub fn release(&mut self) -> Result<()> {
        // The lock lives inside the mapping: drop it before unmapping.
        self.lock = None;
        if let Some(mut shmem) = self.shmem.take() {
            shmem.set_owner(true);
            drop(shmem);
            debug!(path = ?self.token_path, "released shared segment");
        }
        Ok(())
    }

    fn table(&self) -> Result<*mut u8> {
        let shmem = self.shmem.as_ref().ok_or(StoreError::Released)?;
        // SAFETY: table_offset is inside the mapping by construction.
        Ok(unsafe { shmem.as_ptr().add(self.table_offset) })
    }

    fn lock(&self) -> Result<raw_sync::locks::LockGuard<'_>> {
        let lock = self.lock.as_ref().ok_or(StoreError::Released)?;
        lock.lock().map_err(|err| StoreError::Lock(err.to_string()))
    }

    fn slot_stride(&self) -> usize {
        SLOT_HEADER + round_up(self.slot_size, 8)
    }

    /// Caller must hold the cross-process lock and pass `idx <
    /// slot_count`.
    fn slot_ptr(&self, table: *mut u8, idx: usize) -> *mut SlotHeader {
        // SAFETY: idx * stride stays inside the table region sized for
        // slot_count slots.
        unsafe { table.add(idx * self.slot_stride()) as *mut SlotHeader }
    }
}

impl Drop for ShmStore {
    fn drop(&mut self) {
        if self.auto_release {
            let _ = self.release();
        } else {
            // Detach only: disown so the segment and token file outlive
            // this handle for the other attached processes.
            self.lock = None;
            if let Some(mut shmem) = self.shmem.take() {
                shmem.set_owner(false);
            }
        }
    }
}

impl std::fmt::Debug for ShmStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmStore")
            .field("token_path", &self.token_path)
            .field("slot_count", &self.slot_count)
            .field("slot_size", &self.slot_size)
            .field("auto_release", &self.auto_release)
            .field("released", &self.shmem.is_none())
            .finish()
    }
}

fn write_slot(slot: &mut SlotHeader, key: i64, value: &[u8]) {
    slot.key = key;
    slot.len = value.len() as u32;
    // SAFETY: value bytes follow the slot header; len ≤ slot_size was
    // checked by the caller.
    unsafe {
        std::ptr::copy_nonoverlapping(
            value.as_ptr(),
            (slot as *mut SlotHeader as *mut u8).add(SLOT_HEADER),
            value.len(),
        );
    }
    slot.state = SLOT_USED;
}

fn wait_ready(header: &SegmentHeader, path: &std::path::Path) -> Result<()> {
    let deadline = std::time::Instant::now() + READY_TIMEOUT;
    while header.ready.load(Ordering::Acquire) == 0 {
        if std::time::Instant::now() >= deadline {
            return Err(StoreError::Init(format!(
                "segment at {} never became ready",
                path.display()
            )));
        }
        std::thread::sleep(READY_POLL);
    }
    Ok(())
}

fn round_up(n: usize, to: usize) -> usize {
    n.div_ceil(to) * to
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    fn unique_token(tag: &str) -> String {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        format!(
            "test-{tag}-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let token = unique_token("roundtrip");
        let mut store = ShmStore::attach(&token, true).unwrap();

        store.set_bytes(1, b"alpha").unwrap();
        store.set_bytes(2, b"beta").unwrap();

        assert_eq!(store.get_bytes(1).unwrap().as_deref(), Some(&b"alpha"[..]));
        assert_eq!(store.get_bytes(2).unwrap().as_deref(), Some(&b"beta"[..]));

        assert!(store.delete(1).unwrap());
        assert_eq!(store.get_bytes(1).unwrap(), None);
        assert!(!store.delete(1).unwrap());
    }

    #[test]
    fn overwrite_replaces_value_in_place() {
        let token = unique_token("overwrite");
        let mut store = ShmStore::attach(&token, true).unwrap();

        store.set_bytes(7, b"first").unwrap();
        store.set_bytes(7, b"second-longer").unwrap();

        assert_eq!(
            store.get_bytes(7).unwrap().as_deref(),
            Some(&b"second-longer"[..])
        );
    }

    #[test]
    fn typed_values_roundtrip() {
        let token = unique_token("typed");
        let mut store = ShmStore::attach(&token, true).unwrap();

        store.set(5, &("worker", 42u32)).unwrap();
        let back: Option<(String, u32)> = store.get(5).unwrap();
        assert_eq!(back, Some(("worker".to_string(), 42)));
    }

    #[test]
    fn oversized_value_is_rejected() {
        let token = unique_token("oversize");
        let mut store = ShmStore::attach_with(
            &token,
            true,
            StoreConfig {
                slot_count: 4,
                slot_size: 16,
            },
        )
        .unwrap();

        let result = store.set_bytes(1, &[0u8; 17]);
        assert!(matches!(result, Err(StoreError::ValueTooLarge { .. })));
    }

    #[test]
    fn full_table_is_rejected() {
        let token = unique_token("full");
        let mut store = ShmStore::attach_with(
            &token,
            true,
            StoreConfig {
                slot_count: 2,
                slot_size: 16,
            },
        )
        .unwrap();

        store.set_bytes(1, b"a").unwrap();
        store.set_bytes(2, b"b").unwrap();
        let result = store.set_bytes(3, b"c");
        assert!(matches!(result, Err(StoreError::Full { .. })));

        // Deleting frees a slot for a new key.
        store.delete(1).unwrap();
        store.set_bytes(3, b"c").unwrap();
    }

    #[test]
    fn second_attach_sees_existing_values() {
        let token = unique_token("join");
        let mut creator = ShmStore::attach(&token, false).unwrap();
        creator.set_bytes(9, b"shared").unwrap();

        let mut joiner = ShmStore::attach(&token, false).unwrap();
        assert_eq!(
            joiner.get_bytes(9).unwrap().as_deref(),
            Some(&b"shared"[..])
        );

        joiner.set_bytes(10, b"from-joiner").unwrap();
        assert_eq!(
            creator.get_bytes(10).unwrap().as_deref(),
            Some(&b"from-joiner"[..])
        );

        drop(joiner);
        creator.release().unwrap();
    }

    #[test]
    fn release_is_idempotent_and_fatal_to_later_ops() {
        let token = unique_token("release");
        let mut store = ShmStore::attach(&token, false).unwrap();
        store.set_bytes(1, b"x").unwrap();

        store.release().unwrap();
        store.release().unwrap();
        assert!(!store.token_path().exists());

        assert!(matches!(
            store.get_bytes(1),
            Err(StoreError::Released)
        ));
        assert!(matches!(
            store.set_bytes(1, b"y"),
            Err(StoreError::Released)
        ));
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        assert!(matches!(
            ShmStore::attach("", true),
            Err(StoreError::InvalidToken(_))
        ));
        assert!(matches!(
            ShmStore::attach("has/slash", true),
            Err(StoreError::InvalidToken(_))
        ));
    }
}
