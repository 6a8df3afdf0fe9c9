//! The fixed prime table that every bucket array size is drawn from.
//!
//! Bucket counts are always taken from this sequence so that resizing never has to factor an
//! arbitrary integer to pick a good modulus; it only has to binary-search a table that was
//! computed once, ahead of time.

/// The legal bucket counts, roughly doubling at each step.
///
/// This is the same sequence used by the hash-table implementation this crate's resizing
/// behavior is modelled on, carried over verbatim so a table built with a given initial capacity
/// here lands on the same `length` it would there.
const PRIME_TABLE: &[u64] = &[
    1, 7, 17, 53, 97,
    193, 389, 769, 1543, 3079,
    6151, 12289, 24593, 49157, 98317,
    196613, 393241, 786433, 1572869, 3145739,
    6291469, 12582917, 25165843, 50331653, 100663319,
    201326611, 402653189, 805306457, 1610612741, 3221225473,
];

/// Rounds `n` up to the smallest prime in [`PRIME_TABLE`] that is `>= n`.
///
/// If `n` exceeds every entry, the largest prime in the table is returned instead of overflowing
/// further; the table already reaches into the billions, which is far past any sane bucket count.
pub fn round_up_prime(n: u64) -> u64 {
    match PRIME_TABLE.binary_search(&n) {
        Ok(i) => PRIME_TABLE[i],
        Err(i) if i < PRIME_TABLE.len() => PRIME_TABLE[i],
        Err(_) => *PRIME_TABLE.last().expect("prime table is never empty"),
    }
}
