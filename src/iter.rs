//! Cursors over a table's entries, and the iterators built on top of them.
//!
//! A [`Cursor`] is a bare position: a bucket index plus an optional pointer to the node occupying
//! it, with no borrow tying it to the table that produced it. Dereferencing, advancing, or
//! mutating through a cursor all go through [`super::HashTable`] methods that take `&self`/`&mut
//! self` explicitly, the same way the table's `find`/`erase`/`splice` do. [`Iter`] and [`IterMut`]
//! are the ordinary `std::iter::Iterator` wrappers built on the same walk.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use node::{Entry, Node};
use storage::Storage;

/// A position in a table: which bucket, and which node within its chain.
///
/// `node == None` with `bucket == length` is the table's `end()`. A cursor does not keep its
/// table alive and does not prevent the table from being mutated; using one after the node it
/// names has been erased is caught (as [`crate::Error::BadArgument`]) rather than silently
/// reading freed memory, but using one against a *different* table than it came from is not
/// detected and is the caller's responsibility to avoid.
pub struct Cursor<K, V> {
    pub(crate) bucket: u64,
    pub(crate) node: Option<NonNull<Node<K, V>>>,
}

// `#[derive(Clone, Copy)]` would require `K: Clone, V: Clone`, which a mere position does not
// need; a cursor is just two plain-old-data fields regardless of what it points at.
impl<K, V> Clone for Cursor<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K, V> Copy for Cursor<K, V> {}

impl<K, V> PartialEq for Cursor<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.node == other.node
    }
}
impl<K, V> Eq for Cursor<K, V> {}

// Written by hand rather than derived: `NonNull<T>` is `Debug` regardless of `T`, so a cursor
// shouldn't need `K: Debug, V: Debug` just to be printed.
impl<K, V> fmt::Debug for Cursor<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("bucket", &self.bucket)
            .field("node", &self.node)
            .finish()
    }
}

impl<K, V> Cursor<K, V> {
    /// Whether this cursor is the table's `end()`.
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }

    /// Builds a cursor pointing at a live node in `bucket`.
    pub(crate) fn live(bucket: u64, node: NonNull<Node<K, V>>) -> Cursor<K, V> {
        Cursor { bucket, node: Some(node) }
    }
}

/// The first occupied position in `storage`, or `end()` if it has no entries.
pub(crate) fn first<K, V>(storage: &Storage<K, V>) -> Cursor<K, V> {
    match storage.first_occupied() {
        Some(bucket) => Cursor {
            bucket,
            node: storage.bucket(bucket),
        },
        None => end(storage),
    }
}

/// The `end()` position for `storage`.
pub(crate) fn end<K, V>(storage: &Storage<K, V>) -> Cursor<K, V> {
    Cursor {
        bucket: storage.length(),
        node: None,
    }
}

/// Advances `cursor` by one position: deeper into its bucket's chain if there is more of it, else
/// to the head of the next occupied bucket, else `end()`.
///
/// Assumes `cursor.node` is `Some` and not tombstoned; callers that accept cursors from outside
/// (rather than from their own `Iterator::next`) must check both before calling this.
pub(crate) fn step<K, V>(storage: &Storage<K, V>, cursor: Cursor<K, V>) -> Cursor<K, V> {
    let ptr = cursor.node.expect("step called on an end cursor");
    let within_chain = unsafe { ptr.as_ref().next };
    if let Some(next) = within_chain {
        return Cursor {
            bucket: cursor.bucket,
            node: Some(next),
        };
    }
    match storage.next_occupied_after(cursor.bucket) {
        Some(bucket) => Cursor {
            bucket,
            node: storage.bucket(bucket),
        },
        None => end(storage),
    }
}

/// A borrowing forward iterator over a table's entries, in ring (insertion-chain) order.
pub struct Iter<'a, K: 'a, V: 'a> {
    storage: &'a Storage<K, V>,
    cursor: Cursor<K, V>,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(storage: &'a Storage<K, V>) -> Iter<'a, K, V> {
        Iter {
            cursor: first(storage),
            storage,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = &'a Entry<K, V>;

    fn next(&mut self) -> Option<&'a Entry<K, V>> {
        let ptr = self.cursor.node?;
        let entry = unsafe { &ptr.as_ref().entry };
        self.cursor = step(self.storage, self.cursor);
        Some(entry)
    }
}

/// A borrowing forward iterator over a table's entries with mutable access to each value.
pub struct IterMut<'a, K: 'a, V: 'a> {
    storage: &'a Storage<K, V>,
    cursor: Cursor<K, V>,
    // `IterMut` is built from `&'a mut HashTable`, so the exclusivity that lets us hand out
    // `&'a mut Entry` comes from the borrow used to construct it, not from this field; it only
    // pins the mutable-invariance lifetime so the type behaves like other `IterMut`s in std.
    _marker: PhantomData<&'a mut ()>,
}

impl<'a, K, V> IterMut<'a, K, V> {
    pub(crate) fn new(storage: &'a Storage<K, V>) -> IterMut<'a, K, V> {
        IterMut {
            cursor: first(storage),
            storage,
            _marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = &'a mut Entry<K, V>;

    fn next(&mut self) -> Option<&'a mut Entry<K, V>> {
        let mut ptr = self.cursor.node?;
        let entry = unsafe { &mut ptr.as_mut().entry };
        self.cursor = step(self.storage, self.cursor);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::MemoryHandle;
    use std::sync::Arc;

    fn node(entry: Entry<i32, i32>, next: Option<NonNull<Node<i32, i32>>>) -> NonNull<Node<i32, i32>> {
        let boxed = Box::new(Node::new(entry, 0, next));
        unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
    }

    #[test]
    fn iter_walks_a_chain_then_moves_buckets() {
        let mut storage = Storage::<i32, i32>::allocate(7, true, Arc::new(MemoryHandle::new("t"))).unwrap();
        let b = node(Entry::new(2, 20), None);
        let a = node(Entry::new(1, 10), Some(b));
        storage.set_bucket(3, Some(a));
        storage.validate_link_for_insert(3);
        let c = node(Entry::new(3, 30), None);
        storage.set_bucket(5, Some(c));
        storage.validate_link_for_insert(5);

        let collected: Vec<i32> = Iter::new(&storage).map(|e| e.key).collect();
        assert_eq!(collected, vec![1, 2, 3]);

        unsafe {
            drop(Box::from_raw(a.as_ptr()));
            drop(Box::from_raw(b.as_ptr()));
            drop(Box::from_raw(c.as_ptr()));
        }
    }

    #[test]
    fn empty_storage_iterates_to_nothing() {
        let storage = Storage::<i32, i32>::allocate(7, true, Arc::new(MemoryHandle::new("t"))).unwrap();
        assert_eq!(Iter::new(&storage).count(), 0);
    }
}
