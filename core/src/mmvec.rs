use std::fs::{File, OpenOptions};
use std::io::Read;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};
use std::path::Path;
use std::ptr;
use std::slice;

use memmap::{MmapMut, MmapOptions};

use crate::Error;

/// Marker for plain-old-data types that may live inside a memory-mapped
/// file: no drop glue, no pointers, layout stable across runs on the same
/// host.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or a primitive) and remain valid for
/// any byte content that a previous run of this crate wrote to the backing
/// file.
pub unsafe trait Pod: Copy {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}

/// How to bind a [`MmapVec`] to its backing file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitMode {
    /// Create an unlinked temporary file next to the given path. The data
    /// is gone when the vector is dropped.
    CreateTemporary,
    /// Create (or truncate) the named file.
    CreatePersistent,
    /// Reopen a file written by a previous run; the stored length header
    /// decides how much of it is mapped.
    OpenExisting,
}

const HEADER: usize = 8;

/// Coarse growth unit. Growing a mapping means an `ftruncate` plus a fresh
/// mapping, so it is done in large steps; the file is truncated back down
/// to the exact used size on drop.
const GROW_BYTES: usize = 1024 * 1024 * 1024;

/// A growable array backed by a memory-mapped file.
///
/// Layout on disk: an 8-byte native-endian length header followed by the
/// elements. The header counts elements in use; anything beyond it is
/// uninitialized capacity.
///
/// Growth never shrinks the file and never touches the length header until
/// the new element is fully written, so a crash mid-append leaves a store
/// that reopens to the last completed state. Any growth may move the
/// mapping; positions obtained from [`as_slice`](Self::as_slice) must be
/// re-acquired afterwards.
pub struct MmapVec<T: Pod> {
    file: File,
    map: MmapMut,
    capacity: usize,
    _slots: PhantomData<T>,
}

impl<T: Pod> MmapVec<T> {
    pub fn open<P: AsRef<Path>>(path: P, mode: InitMode) -> Result<Self, Error> {
        let path = path.as_ref();
        debug_assert!(mem::align_of::<T>() <= HEADER);
        match mode {
            InitMode::CreateTemporary => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let file = tempfile::tempfile_in(dir)?;
                Self::init_created(file)
            }
            InitMode::CreatePersistent => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                Self::init_created(file)
            }
            InitMode::OpenExisting => {
                let mut file = OpenOptions::new().read(true).write(true).open(path)?;
                let mut header = [0u8; HEADER];
                file.read_exact(&mut header)?;
                let len = u64::from_ne_bytes(header) as usize;
                let map = unsafe {
                    MmapOptions::new()
                        .len(HEADER + len * mem::size_of::<T>())
                        .map_mut(&file)?
                };
                Ok(Self {
                    file,
                    map,
                    capacity: len,
                    _slots: PhantomData,
                })
            }
        }
    }

    fn init_created(file: File) -> Result<Self, Error> {
        file.set_len(HEADER as u64)?;
        let map = unsafe { MmapOptions::new().len(HEADER).map_mut(&file)? };
        let mut vec = Self {
            file,
            map,
            capacity: 0,
            _slots: PhantomData,
        };
        vec.set_len(0);
        Ok(vec)
    }

    #[inline]
    pub fn len(&self) -> usize {
        u64::from_ne_bytes(self.map[..HEADER].try_into().unwrap()) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn set_len(&mut self, len: usize) {
        self.map[..HEADER].copy_from_slice(&(len as u64).to_ne_bytes());
    }

    #[inline]
    fn base(&self) -> *const T {
        unsafe { self.map.as_ptr().add(HEADER) as *const T }
    }

    #[inline]
    fn base_mut(&mut self) -> *mut T {
        unsafe { self.map.as_mut_ptr().add(HEADER) as *mut T }
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.base(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len();
        unsafe { slice::from_raw_parts_mut(self.base_mut(), len) }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().last_mut()
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Extends the backing file and remaps it so that at least `n` elements
    /// fit. The mapping may move.
    pub fn reserve(&mut self, n: usize) -> Result<(), Error> {
        if n <= self.capacity {
            return Ok(());
        }
        let bytes = HEADER + n * mem::size_of::<T>();
        self.file
            .set_len(bytes as u64)
            .map_err(Error::Allocation)?;
        self.map = unsafe {
            MmapOptions::new()
                .len(bytes)
                .map_mut(&self.file)
                .map_err(Error::Allocation)?
        };
        self.capacity = n;
        Ok(())
    }

    fn grow(&mut self, min_capacity: usize) -> Result<(), Error> {
        let shortfall = (min_capacity - self.capacity) * mem::size_of::<T>();
        let bytes = (shortfall + (GROW_BYTES - 1)) & !(GROW_BYTES - 1);
        self.reserve(self.capacity + bytes / mem::size_of::<T>())
    }

    pub fn push(&mut self, value: T) -> Result<(), Error> {
        let len = self.len();
        if len + 1 > self.capacity {
            self.grow(len + 1)?;
        }
        unsafe { ptr::write(self.base_mut().add(len), value) };
        self.set_len(len + 1);
        Ok(())
    }

    /// Resizes to `n` elements, filling fresh slots with `value`. Shrinking
    /// only moves the length header; the file keeps its capacity.
    pub fn resize(&mut self, n: usize, value: T) -> Result<(), Error> {
        if n > self.capacity {
            self.grow(n)?;
        }
        let len = self.len();
        for i in len..n {
            unsafe { ptr::write(self.base_mut().add(i), value) };
        }
        self.set_len(n);
        Ok(())
    }

    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<(), Error> {
        let len = self.len();
        if len + values.len() > self.capacity {
            self.grow(len + values.len())?;
        }
        unsafe {
            ptr::copy_nonoverlapping(values.as_ptr(), self.base_mut().add(len), values.len());
        }
        self.set_len(len + values.len());
        Ok(())
    }
}

impl<T: Pod> Index<usize> for MmapVec<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T: Pod> IndexMut<usize> for MmapVec<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: Pod> Drop for MmapVec<T> {
    fn drop(&mut self) {
        let used = HEADER + self.len() * mem::size_of::<T>();
        let _ = self.file.set_len(used as u64);
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_push_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut vec: MmapVec<u32> = MmapVec::open(dir.path().join("v"), InitMode::CreatePersistent)
            .unwrap();
        vec.reserve(4).unwrap();
        for i in 0..10u32 {
            vec.push(i * 3).unwrap();
        }
        assert_eq!(vec.len(), 10);
        assert_eq!(vec[7], 21);
        assert_eq!(vec.last(), Some(&27));
    }

    #[test]
    fn test_resize_fills_new_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut vec: MmapVec<u64> = MmapVec::open(dir.path().join("v"), InitMode::CreateTemporary)
            .unwrap();
        vec.resize(5, 0xabcd).unwrap();
        assert_eq!(vec.as_slice(), &[0xabcd; 5]);
        vec.resize(2, 0).unwrap();
        assert_eq!(vec.len(), 2);
    }

    #[test]
    fn test_extend_from_slice() {
        let dir = tempfile::tempdir().unwrap();
        let mut vec: MmapVec<u8> = MmapVec::open(dir.path().join("v"), InitMode::CreateTemporary)
            .unwrap();
        vec.extend_from_slice(b"hello").unwrap();
        vec.extend_from_slice(b" world").unwrap();
        assert_eq!(vec.as_slice(), b"hello world");
    }

    #[test]
    fn test_reopen_sees_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v");
        {
            let mut vec: MmapVec<u32> = MmapVec::open(&path, InitMode::CreatePersistent).unwrap();
            vec.reserve(100).unwrap();
            for i in 0..17u32 {
                vec.push(i).unwrap();
            }
        }
        // The drop above must have truncated the reserved capacity away.
        let on_disk = std::fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk, (HEADER + 17 * mem::size_of::<u32>()) as u64);

        let vec: MmapVec<u32> = MmapVec::open(&path, InitMode::OpenExisting).unwrap();
        assert_eq!(vec.len(), 17);
        assert_eq!(vec[16], 16);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<MmapVec<u32>, _> =
            MmapVec::open(dir.path().join("absent"), InitMode::OpenExisting);
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
