//! The error taxonomy shared by every collaborator in this crate.
//!
//! Callers distinguish failures by kind (via `match`), never by formatted string. Each kind may
//! additionally carry a 5-character state code, mirroring the SQLSTATE-like tokens used by the
//! kernel this container is meant to slot into; the code is plain data, not part of dispatch.

use std::fmt;

/// A 5-character state-code token, for interop with an external error taxonomy.
///
/// This is opaque to the container itself; it is only ever set by a caller that wants its own
/// error numbers attached to a propagated failure, and read back by that same caller.
pub type StateCode = [u8; 5];

quick_error! {
    /// A failure raised by this crate's containers.
    #[derive(Debug)]
    pub enum Error {
        /// The argument was structurally invalid for the operation: a tombstoned iterator was
        /// dereferenced, assigned from, or advanced; an end iterator was erased; a splice was
        /// attempted from an iterator that was already `end()`.
        BadArgument(what: &'static str, state: Option<StateCode>) {
            display("bad argument: {}", what)
            description("a structurally invalid argument was supplied")
        }
        /// An iterator was advanced past `end()`, or the front of an empty table was requested.
        OutOfRange(what: &'static str) {
            display("out of range: {}", what)
            description("an operation ran past the valid range")
        }
        /// A memory handle could not satisfy an allocation, either because the global allocator
        /// failed or because the handle's ceiling would have been exceeded.
        MemoryExhausted(handle: String, requested: usize) {
            display("memory handle {:?} could not allocate {} bytes", handle, requested)
            description("an allocation exceeded the memory handle's ceiling")
        }
        /// An operation was attempted on a subsystem (most commonly a memory handle) before it
        /// was initialized.
        NotInitialized(what: &'static str) {
            display("{} was used before initialization", what)
            description("a subsystem was used before initialization")
        }
        /// A pointer was freed through a memory handle that never allocated it, or it was freed
        /// twice.
        FreeUnallocated(handle: String) {
            display("freed a pointer that memory handle {:?} never allocated", handle)
            description("freed a pointer the memory handle does not own")
        }
    }
}

impl Error {
    /// Attach a state code to a `BadArgument`, leaving every other kind untouched.
    ///
    /// This exists for callers that bridge into an external error taxonomy keyed on a 5-character
    /// code; the container itself never sets one.
    pub fn with_state_code(self, code: StateCode) -> Error {
        match self {
            Error::BadArgument(what, _) => Error::BadArgument(what, Some(code)),
            other => other,
        }
    }
}

/// Formats a state code the way the external taxonomy expects: five ASCII characters, no padding.
pub(crate) fn format_state_code(code: StateCode) -> impl fmt::Display {
    struct Wrap(StateCode);
    impl fmt::Display for Wrap {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            for byte in &self.0 {
                write!(f, "{}", *byte as char)?;
            }
            Ok(())
        }
    }
    Wrap(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_argument_carries_state_code() {
        let err = Error::BadArgument("tombstoned iterator", None).with_state_code(*b"HY000");
        match err {
            Error::BadArgument(_, Some(code)) => assert_eq!(&code, b"HY000"),
            _ => panic!("expected BadArgument with a state code"),
        }
    }

    #[test]
    fn with_state_code_is_noop_on_other_kinds() {
        let err = Error::OutOfRange("advanced past end").with_state_code(*b"HY000");
        match err {
            Error::OutOfRange(_) => {}
            _ => panic!("expected OutOfRange to pass through unchanged"),
        }
    }

    #[test]
    fn format_state_code_renders_ascii() {
        assert_eq!(format!("{}", format_state_code(*b"ABCDE")), "ABCDE");
    }
}
