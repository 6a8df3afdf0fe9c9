//! Named memory arenas.
//!
//! Every allocation this crate's containers make goes through a [`MemoryHandle`] rather than the
//! global allocator directly, so a process running several subsystems can localize accounting and
//! leak detection to each one individually.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use error::Error;

const ORDERING: Ordering = Ordering::SeqCst;

/// A named arena with an optional byte ceiling.
///
/// A handle may be shared (e.g. behind an `Arc`) across multiple tables and threads; its
/// bookkeeping is internally synchronized, but that says nothing about the thread-safety of
/// whatever container is built on top of it (see the crate's concurrency notes).
pub struct MemoryHandle {
    name: String,
    limit: Option<usize>,
    used: AtomicUsize,
    // Maps a live allocation's address to the byte count it was allocated with, so `free` can
    // catch a mismatched size or a pointer this handle never handed out.
    outstanding: Mutex<HashMap<usize, usize>>,
}

impl MemoryHandle {
    /// Creates a handle with no ceiling; it allocates until the process runs out of memory.
    pub fn new(name: impl Into<String>) -> MemoryHandle {
        MemoryHandle {
            name: name.into(),
            limit: None,
            used: AtomicUsize::new(0),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a handle that refuses to allocate past `limit` bytes outstanding.
    pub fn with_limit(name: impl Into<String>, limit: usize) -> MemoryHandle {
        MemoryHandle {
            name: name.into(),
            limit: Some(limit),
            used: AtomicUsize::new(0),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// The name this handle was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of bytes currently outstanding (allocated but not yet freed).
    pub fn used(&self) -> usize {
        self.used.load(ORDERING)
    }

    /// Allocates a `bytes`-byte, `align`-aligned region.
    ///
    /// Raises [`Error::MemoryExhausted`] if the handle's ceiling would be exceeded or the
    /// underlying allocator fails.
    pub fn allocate(&self, bytes: usize, align: usize) -> Result<NonNull<u8>, Error> {
        if let Some(limit) = self.limit {
            // Fetch-check-store would race under real concurrency; the ceiling is advisory
            // against accidental runaway growth, not a hard capacity reservation, so a loose
            // check-then-bump is sufficient here.
            if self.used.load(ORDERING) + bytes > limit {
                return Err(Error::MemoryExhausted(self.name.clone(), bytes));
            }
        }

        let layout = Layout::from_size_align(bytes.max(1), align)
            .map_err(|_| Error::MemoryExhausted(self.name.clone(), bytes))?;
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::MemoryExhausted(self.name.clone(), bytes))?;

        self.used.fetch_add(bytes, ORDERING);
        self.outstanding.lock().unwrap().insert(ptr.as_ptr() as usize, bytes);

        Ok(ptr)
    }

    /// Frees a region previously returned by [`MemoryHandle::allocate`] on `self`.
    ///
    /// Raises [`Error::FreeUnallocated`] if `ptr` was not allocated by this handle (including a
    /// double free), which would otherwise corrupt the allocator's own bookkeeping silently.
    pub fn free(&self, ptr: NonNull<u8>, bytes: usize, align: usize) -> Result<(), Error> {
        let recorded = self.outstanding.lock().unwrap().remove(&(ptr.as_ptr() as usize));
        match recorded {
            Some(recorded_bytes) if recorded_bytes == bytes => {
                let layout = Layout::from_size_align(bytes.max(1), align)
                    .expect("layout was valid at allocation time");
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
                self.used.fetch_sub(bytes, ORDERING);
                Ok(())
            }
            Some(recorded_bytes) => {
                // Put the bookkeeping back; we are refusing the free, so the allocation is
                // still outstanding from this handle's point of view.
                self.outstanding.lock().unwrap().insert(ptr.as_ptr() as usize, recorded_bytes);
                Err(Error::FreeUnallocated(self.name.clone()))
            }
            None => Err(Error::FreeUnallocated(self.name.clone())),
        }
    }

    /// Re-homes `ptr`'s outstanding-allocation accounting from `self` onto `dest`, without
    /// calling into the global allocator: the bytes stay exactly where they are, only the
    /// bookkeeping of which handle currently owns them moves.
    ///
    /// Used when a node built through one handle is spliced into a table backed by another, so
    /// the node is always freed through whichever handle owns it at the time it is dropped, not
    /// the one that happened to allocate it originally. A no-op if `self` and `dest` are the same
    /// handle.
    pub fn transfer(&self, dest: &MemoryHandle, ptr: NonNull<u8>, bytes: usize) -> Result<(), Error> {
        if ptr::eq(self, dest) {
            return Ok(());
        }

        let recorded = self.outstanding.lock().unwrap().remove(&(ptr.as_ptr() as usize));
        let recorded_bytes = match recorded {
            Some(b) if b == bytes => b,
            Some(b) => {
                self.outstanding.lock().unwrap().insert(ptr.as_ptr() as usize, b);
                return Err(Error::FreeUnallocated(self.name.clone()));
            }
            None => return Err(Error::FreeUnallocated(self.name.clone())),
        };

        if let Some(limit) = dest.limit {
            if dest.used.load(ORDERING) + recorded_bytes > limit {
                // `dest` can't take the accounting; leave it charged to `self` so a caller that
                // rolls back the move (relinking the node back where it came from) finds the
                // ledger still matching reality.
                self.outstanding.lock().unwrap().insert(ptr.as_ptr() as usize, recorded_bytes);
                return Err(Error::MemoryExhausted(dest.name.clone(), recorded_bytes));
            }
        }

        self.used.fetch_sub(recorded_bytes, ORDERING);
        dest.used.fetch_add(recorded_bytes, ORDERING);
        dest.outstanding.lock().unwrap().insert(ptr.as_ptr() as usize, recorded_bytes);
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        // A correctly used handle has no outstanding allocations left by the time every table
        // referencing it has been dropped. Leaking here (rather than panicking) keeps `drop`
        // infallible; a caller auditing for leaks should check `used()` before a handle goes out
        // of scope instead.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_round_trips() {
        let handle = MemoryHandle::new("test");
        let ptr = handle.allocate(64, 8).unwrap();
        assert_eq!(handle.used(), 64);
        handle.free(ptr, 64, 8).unwrap();
        assert_eq!(handle.used(), 0);
    }

    #[test]
    fn allocate_respects_the_ceiling() {
        let handle = MemoryHandle::with_limit("test", 32);
        assert!(handle.allocate(64, 8).is_err());
        assert_eq!(handle.used(), 0);
    }

    #[test]
    fn free_rejects_unknown_pointer() {
        let a = MemoryHandle::new("a");
        let b = MemoryHandle::new("b");
        let ptr = a.allocate(16, 8).unwrap();
        assert!(b.free(ptr, 16, 8).is_err());
        // `a` still owns it, so it can free its own allocation.
        assert!(a.free(ptr, 16, 8).is_ok());
    }

    #[test]
    fn free_rejects_size_mismatch() {
        let handle = MemoryHandle::new("test");
        let ptr = handle.allocate(16, 8).unwrap();
        assert!(handle.free(ptr, 32, 8).is_err());
        // The original accounting survives a rejected free.
        assert_eq!(handle.used(), 16);
        assert!(handle.free(ptr, 16, 8).is_ok());
    }

    #[test]
    fn double_free_is_rejected() {
        let handle = MemoryHandle::new("test");
        let ptr = handle.allocate(8, 8).unwrap();
        handle.free(ptr, 8, 8).unwrap();
        assert!(handle.free(ptr, 8, 8).is_err());
    }

    #[test]
    fn transfer_moves_the_balance_to_the_destination_handle() {
        let src = MemoryHandle::new("src");
        let dest = MemoryHandle::new("dest");
        let ptr = src.allocate(16, 8).unwrap();

        src.transfer(&dest, ptr, 16).unwrap();
        assert_eq!(src.used(), 0);
        assert_eq!(dest.used(), 16);

        // Now freeable only through `dest`.
        assert!(src.free(ptr, 16, 8).is_err());
        dest.free(ptr, 16, 8).unwrap();
        assert_eq!(dest.used(), 0);
    }

    #[test]
    fn transfer_to_self_is_a_noop() {
        let handle = MemoryHandle::new("test");
        let ptr = handle.allocate(16, 8).unwrap();
        handle.transfer(&handle, ptr, 16).unwrap();
        assert_eq!(handle.used(), 16);
        handle.free(ptr, 16, 8).unwrap();
    }

    #[test]
    fn transfer_rejects_an_unknown_pointer() {
        let src = MemoryHandle::new("src");
        let dest = MemoryHandle::new("dest");
        let ptr = dest.allocate(16, 8).unwrap();
        assert!(src.transfer(&dest, ptr, 16).is_err());
        dest.free(ptr, 16, 8).unwrap();
    }

    #[test]
    fn transfer_respects_the_destination_ceiling() {
        let src = MemoryHandle::new("src");
        let dest = MemoryHandle::with_limit("dest", 8);
        let ptr = src.allocate(16, 8).unwrap();
        assert!(src.transfer(&dest, ptr, 16).is_err());
        // Rejected transfer leaves the allocation exactly where it was.
        assert_eq!(src.used(), 16);
        assert_eq!(dest.used(), 0);
        src.free(ptr, 16, 8).unwrap();
    }
}
