//! File-backed shared memory holding the relay header and frame slots

use std::fs::OpenOptions;
use std::mem::{align_of, size_of};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64};

use crossbeam::utils::CachePadded;
use memmap2::MmapMut;
use tracing::{debug, warn};

use super::relay::RelayError;

const MAGIC: u64 = u64::from_le_bytes(*b"RLYCAM\0\x01");
const VERSION: u32 = 1;
const SLOT_ALIGN: usize = 64;

/// Control block at the start of the mapping.
///
/// `head` is only advanced by the consumer and `tail` only by the producer,
/// so `tail - head` is the number of pending slots.
#[repr(C)]
pub(crate) struct Header {
    magic: u64,
    version: u32,
    header_size: u32,
    capacity: u64,
    slot_bytes: u64,
    pub stop: CachePadded<AtomicU32>,
    pub head: CachePadded<AtomicU64>,
    pub tail: CachePadded<AtomicU64>,
    pub written: AtomicU64,
    pub read: AtomicU64,
    pub rejected: AtomicU64,
}

/// Per-slot frame metadata, followed by the payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SlotHeader {
    pub sequence: u64,
    pub captured_at_ns: u64,
    /// `u64::MAX` when the source had no hardware timestamp
    pub device_ts_ns: u64,
    pub len: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub status: u32,
    pub _pad: u32,
}

pub(crate) struct SharedRegion {
    _map: MmapMut,
    base: *mut u8,
    header_len: usize,
    slot_stride: usize,
    payload_offset: usize,
    capacity: usize,
    slot_bytes: usize,
    path: PathBuf,
    owner: bool,
}

// SAFETY: the mapping lives as long as the region; all shared mutation goes
// through the atomics in `Header` or through slots handed over by them.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

struct Geometry {
    header_len: usize,
    payload_offset: usize,
    slot_stride: usize,
    total: usize,
}

fn geometry(capacity: usize, slot_bytes: usize) -> Geometry {
    let header_len = align_up(size_of::<Header>(), page_size::get());
    let payload_offset = align_up(size_of::<SlotHeader>(), SLOT_ALIGN);
    let slot_stride = align_up(payload_offset + slot_bytes, SLOT_ALIGN);
    Geometry {
        header_len,
        payload_offset,
        slot_stride,
        total: header_len + slot_stride * capacity,
    }
}

impl SharedRegion {
    /// Create (or truncate) the backing file and initialise an empty relay.
    pub fn create(path: &Path, capacity: usize, slot_bytes: usize) -> Result<Self, RelayError> {
        if capacity == 0 {
            return Err(RelayError::Layout("capacity must be at least 1".into()));
        }
        let geo = geometry(capacity, slot_bytes);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(geo.total as u64)?;

        // SAFETY: we own the freshly truncated file; other processes only
        // attach after `create` returns.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let base = map.as_mut_ptr();
        debug_assert_eq!(base as usize % align_of::<Header>(), 0);

        // SAFETY: the mapping is page aligned and at least `header_len` long.
        unsafe {
            std::ptr::write(
                base as *mut Header,
                Header {
                    magic: MAGIC,
                    version: VERSION,
                    header_size: size_of::<Header>() as u32,
                    capacity: capacity as u64,
                    slot_bytes: slot_bytes as u64,
                    stop: CachePadded::new(AtomicU32::new(0)),
                    head: CachePadded::new(AtomicU64::new(0)),
                    tail: CachePadded::new(AtomicU64::new(0)),
                    written: AtomicU64::new(0),
                    read: AtomicU64::new(0),
                    rejected: AtomicU64::new(0),
                },
            );
        }
        map.flush()?;

        debug!(
            "Created relay region {} ({} slots x {} bytes)",
            path.display(),
            capacity,
            geo.slot_stride
        );

        Ok(Self {
            _map: map,
            base,
            header_len: geo.header_len,
            slot_stride: geo.slot_stride,
            payload_offset: geo.payload_offset,
            capacity,
            slot_bytes,
            path: path.to_path_buf(),
            owner: true,
        })
    }

    /// Map a region created by another process.
    pub fn attach(path: &Path) -> Result<Self, RelayError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < size_of::<Header>() {
            return Err(RelayError::Layout(format!(
                "{} is too small to hold a relay header",
                path.display()
            )));
        }

        // SAFETY: the file is a relay region; its layout is validated below
        // before any slot is touched.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let base = map.as_mut_ptr();
        // SAFETY: length checked above.
        let header = unsafe { &*(base as *const Header) };

        if header.magic != MAGIC || header.version != VERSION {
            return Err(RelayError::Layout(format!(
                "{} is not a relay region",
                path.display()
            )));
        }
        if header.header_size as usize != size_of::<Header>() {
            return Err(RelayError::Layout("relay header layout mismatch".into()));
        }

        let capacity = header.capacity as usize;
        let slot_bytes = header.slot_bytes as usize;
        let geo = geometry(capacity, slot_bytes);
        if len < geo.total {
            return Err(RelayError::Layout(format!(
                "{} holds {} bytes, {} expected",
                path.display(),
                len,
                geo.total
            )));
        }

        Ok(Self {
            _map: map,
            base,
            header_len: geo.header_len,
            slot_stride: geo.slot_stride,
            payload_offset: geo.payload_offset,
            capacity,
            slot_bytes,
            path: path.to_path_buf(),
            owner: false,
        })
    }

    pub fn header(&self) -> &Header {
        // SAFETY: initialised in `create`, validated in `attach`.
        unsafe { &*(self.base as *const Header) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_ptr(&self, index: u64) -> *mut u8 {
        let slot = (index % self.capacity as u64) as usize;
        // SAFETY: slot < capacity keeps the offset inside the mapping.
        unsafe { self.base.add(self.header_len + slot * self.slot_stride) }
    }

    /// Write a slot the caller has exclusive access to (producer side).
    ///
    /// # Safety
    /// The slot at `index` must not be visible to the consumer, i.e.
    /// `index - head < capacity` and `index >= tail` as seen by the producer.
    pub unsafe fn write_slot(&self, index: u64, header: SlotHeader, payload: &[u8]) {
        debug_assert!(payload.len() <= self.slot_bytes);
        let ptr = self.slot_ptr(index);
        std::ptr::write_unaligned(ptr as *mut SlotHeader, header);
        std::ptr::copy_nonoverlapping(
            payload.as_ptr(),
            ptr.add(self.payload_offset),
            payload.len(),
        );
    }

    /// Read a slot the producer has published (consumer side).
    ///
    /// # Safety
    /// `head <= index < tail` must hold as seen by the consumer.
    pub unsafe fn read_slot(&self, index: u64) -> Result<(SlotHeader, &[u8]), RelayError> {
        let ptr = self.slot_ptr(index);
        let header = std::ptr::read_unaligned(ptr as *const SlotHeader);
        let len = header.len as usize;
        if len > self.slot_bytes {
            return Err(RelayError::Layout(format!(
                "slot claims {} bytes, limit is {}",
                len, self.slot_bytes
            )));
        }
        let payload = std::slice::from_raw_parts(ptr.add(self.payload_offset), len);
        Ok((header, payload))
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove relay file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Ensure the parent directory of a relay path exists.
pub(crate) fn prepare_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
