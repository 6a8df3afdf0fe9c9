//! The key/value pairs a table stores, and the chain nodes that hold them.

use std::alloc::Layout;
use std::ptr::{self, NonNull};

use error::Error;
use memory::MemoryHandle;

/// A stored key/value pair.
///
/// This is the payload half of what the original container called a bucket's "value"; splitting
/// it out from [`Node`] keeps the chain-linkage machinery free of any `K`/`V`-shaped logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Entry<K, V> {
        Entry { key, value }
    }
}

/// One link in a bucket's intrusive singly-linked chain.
///
/// `next` points at the next node in the same bucket, or is `None` at the chain's end. A node
/// that has been erased from a table is tombstoned by pointing `next` at itself, which lets an
/// iterator still holding a reference to it detect the use-after-erase instead of silently
/// reading freed memory through the dangling link.
pub struct Node<K, V> {
    pub entry: Entry<K, V>,
    /// The hash of `entry.key`, cached so a duplicate-key check can reject a mismatch without
    /// calling into `Eq`.
    pub hash: u64,
    pub next: Option<NonNull<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    pub fn new(entry: Entry<K, V>, hash: u64, next: Option<NonNull<Node<K, V>>>) -> Node<K, V> {
        Node { entry, hash, next }
    }

    /// Whether `ptr`'s node has been tombstoned (erased while an iterator still referenced it).
    pub fn is_tombstoned(ptr: NonNull<Node<K, V>>) -> bool {
        unsafe { ptr.as_ref().next == Some(ptr) }
    }

    /// Marks `ptr`'s node as tombstoned by self-looping its `next` pointer.
    ///
    /// Callers must have already unlinked the node from its bucket chain; this only marks it so
    /// a lingering iterator can tell the difference between "end of chain" and "the node I was
    /// looking at got erased out from under me".
    pub fn tombstone(mut ptr: NonNull<Node<K, V>>) {
        unsafe { ptr.as_mut().next = Some(ptr) };
    }

    /// Allocates a node holding `entry` through `memory`, rather than the global allocator
    /// directly, mirroring the container's "every allocation goes through a handle" discipline.
    pub fn alloc(
        memory: &MemoryHandle,
        entry: Entry<K, V>,
        hash: u64,
        next: Option<NonNull<Node<K, V>>>,
    ) -> Result<NonNull<Node<K, V>>, Error> {
        let layout = Layout::new::<Node<K, V>>();
        let raw = memory.allocate(layout.size(), layout.align())?;
        let ptr = raw.cast::<Node<K, V>>();
        unsafe { ptr::write(ptr.as_ptr(), Node::new(entry, hash, next)) };
        Ok(ptr)
    }

    /// Drops `ptr`'s entry and frees the node's storage through `memory`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Node::alloc`] against this same `memory` handle, must
    /// already be unlinked from any bucket chain, and must not be dereferenced again afterward
    /// (the one documented exception being a cursor's own use-after-erase check, which inspects
    /// the tombstone self-loop written just before this call and never touches `entry`).
    pub unsafe fn dealloc(memory: &MemoryHandle, ptr: NonNull<Node<K, V>>) -> Result<(), Error> {
        let layout = Layout::new::<Node<K, V>>();
        ptr::drop_in_place(ptr.as_ptr());
        memory.free(ptr.cast::<u8>(), layout.size(), layout.align())
    }

    /// Re-homes `ptr`'s allocation accounting from `src` to `dest`, without touching the node's
    /// storage or its chain linkage.
    ///
    /// A splice moves a node between tables by pointer, never by copy; this keeps the node's
    /// byte accounting honest about which handle it will actually be freed through afterward,
    /// so the source handle's ledger drops the node the moment it stops owning it rather than
    /// leaking the entry (freed through the wrong handle) or double-counting it (kept on both
    /// ledgers).
    pub fn transfer_handle(src: &MemoryHandle, dest: &MemoryHandle, ptr: NonNull<Node<K, V>>) -> Result<(), Error> {
        let layout = Layout::new::<Node<K, V>>();
        src.transfer(dest, ptr.cast::<u8>(), layout.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(entry: Entry<i32, i32>) -> NonNull<Node<i32, i32>> {
        let node = Box::new(Node::new(entry, 0, None));
        unsafe { NonNull::new_unchecked(Box::into_raw(node)) }
    }

    #[test]
    fn alloc_and_dealloc_round_trip_through_the_handle() {
        let handle = MemoryHandle::new("nodes");
        let ptr = Node::alloc(&handle, Entry::new(1, 2), 42, None).unwrap();
        assert_eq!(unsafe { ptr.as_ref().hash }, 42);
        assert!(handle.used() > 0);
        unsafe { Node::dealloc(&handle, ptr).unwrap() };
        assert_eq!(handle.used(), 0);
    }

    #[test]
    fn fresh_node_is_not_tombstoned() {
        let ptr = boxed(Entry::new(1, 2));
        assert!(!Node::is_tombstoned(ptr));
        unsafe { drop(Box::from_raw(ptr.as_ptr())) };
    }

    #[test]
    fn tombstone_self_loops_next() {
        let ptr = boxed(Entry::new(1, 2));
        Node::tombstone(ptr);
        assert!(Node::is_tombstoned(ptr));
        unsafe { drop(Box::from_raw(ptr.as_ptr())) };
    }
}
