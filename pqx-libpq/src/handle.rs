use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr::NonNull;
use std::slice;

use pq_sys::{PGconn, PGresult, PQclear, PQconninfoFree, PQconninfoOption, PQfinish, PQfreemem};

/// Owned `PGconn *`.
///
/// Released by [`Libpq::finish`][crate::Libpq]; dropping one without finishing it leaks the
/// connection, which `ConnectionHandle` never does.
#[derive(Debug)]
pub struct ConnPtr(NonNull<PGconn>);

// A `PGconn` may move between threads as long as only one thread uses it at a time. Every call
// that touches one goes through `&mut ConnPtr` or `&ConnPtr`, so the borrow checker upholds that.
//
// <https://www.postgresql.org/docs/current/libpq-threading.html>
unsafe impl Send for ConnPtr {}

impl ConnPtr {
    pub(crate) fn new(ptr: *mut PGconn) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut PGconn {
        self.0.as_ptr()
    }

    pub(crate) fn finish(self) {
        // SAFETY: `self` is consumed, so the pointer is never used again
        unsafe { PQfinish(self.as_ptr()) }
    }
}

/// Owned `PGresult *`.
#[derive(Debug)]
pub struct ResultPtr(NonNull<PGresult>);

// A `PGresult` is never modified after it was returned, and libpq reads it without any shared
// state, so it may be read from any thread.
unsafe impl Send for ResultPtr {}
unsafe impl Sync for ResultPtr {}

impl ResultPtr {
    pub(crate) fn new(ptr: *mut PGresult) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut PGresult {
        self.0.as_ptr()
    }

    pub(crate) fn clear(self) {
        // SAFETY: `self` is consumed, so the pointer is never used again
        unsafe { PQclear(self.as_ptr()) }
    }
}

/// Owned `PQconninfoOption *` array.
#[derive(Debug)]
pub struct OptionsPtr(NonNull<PQconninfoOption>);

unsafe impl Send for OptionsPtr {}

impl OptionsPtr {
    pub(crate) fn new(ptr: *mut PQconninfoOption) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// The entry at `index`, or `None` at or past the terminating entry.
    pub(crate) fn get(&self, index: usize) -> Option<&PQconninfoOption> {
        let mut entry = self.0.as_ptr();

        for _ in 0..index {
            // SAFETY: every entry before the terminator is followed by another entry
            let current = unsafe { &*entry };
            if current.keyword.is_null() {
                return None;
            }

            entry = entry.wrapping_add(1);
        }

        // SAFETY: `entry` is at or before the terminator
        let entry = unsafe { &*entry };
        (!entry.keyword.is_null()).then_some(entry)
    }

    pub(crate) fn free(self) {
        // SAFETY: `self` is consumed, so the array is never used again
        unsafe { PQconninfoFree(self.0.as_ptr()) }
    }
}

/// Memory allocated by libpq, released with `PQfreemem`.
#[derive(Debug)]
pub struct PqBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for PqBuffer {}

impl PqBuffer {
    /// Take ownership of `len` bytes at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be null or point to `len` readable bytes allocated by libpq.
    pub(crate) unsafe fn new(ptr: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, len })
    }

    /// Take ownership of a terminated string, including its terminator.
    ///
    /// # Safety
    /// `ptr` must be null or point to a `NUL`-terminated string allocated by libpq.
    pub(crate) unsafe fn from_c_str(ptr: *mut c_char) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }

        // SAFETY: guaranteed by the caller
        let len = unsafe { CStr::from_ptr(ptr) }.to_bytes_with_nul().len();

        // SAFETY: the string is `len` bytes long including its terminator
        unsafe { Self::new(ptr.cast(), len) }
    }
}

impl AsRef<[u8]> for PqBuffer {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: guaranteed when constructed
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PqBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated by libpq and not yet freed
        unsafe { PQfreemem(self.ptr.as_ptr().cast::<c_void>()) }
    }
}
