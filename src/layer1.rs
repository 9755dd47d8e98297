//! Lower buffering layer interface.
//!
//! Layer 1 turns a raw transport into contiguous spans of whole records:
//! it accumulates incoming bytes until the record layer's requested
//! length is available, and stages outgoing records until they are
//! flushed. The record layer borrows these spans for a single read or
//! write cycle and never holds them across cycle boundaries.
//!
//! [`sim::RamLink`](crate::sim::RamLink) implements this trait over plain
//! memory for tests and examples.

use crate::Error;

/// Interface required of the lower buffering layer.
///
/// # Buffer stability
///
/// * [`fetch`](Self::fetch) is idempotent until [`consume`](Self::consume):
///   repeated calls return the same bytes at the same location, and a call
///   with a larger `len` extends the span in place. The record layer
///   relies on this to resume after `WantRead` and to decrypt in place.
/// * [`write`](Self::write) is idempotent until [`dispatch`](Self::dispatch):
///   repeated calls return the same span with its contents intact. The
///   record layer stages a record across several calls before
///   dispatching it.
pub trait Layer1 {
    /// Transport error type.
    type Error;

    /// Borrow at least `len` contiguous bytes of pending input.
    ///
    /// The span is mutable so record protection can be removed in place.
    ///
    /// # Errors
    ///
    /// * [`Error::WantRead`] if fewer than `len` bytes are pending; the
    ///   caller retries once more input arrives.
    fn fetch(&mut self, len: usize) -> Result<&mut [u8], Error<Self::Error>>;

    /// Release the fetched span, discarding its bytes.
    fn consume(&mut self) -> Result<(), Error<Self::Error>>;

    /// Borrow a writable span of at least `len` bytes for an outgoing
    /// record.
    ///
    /// # Errors
    ///
    /// * [`Error::WantWrite`] if no such span is available yet; the
    ///   caller retries after draining the transport.
    fn write(&mut self, len: usize) -> Result<&mut [u8], Error<Self::Error>>;

    /// Commit the first `len` bytes of the last writable span for
    /// transmission.
    fn dispatch(&mut self, len: usize) -> Result<(), Error<Self::Error>>;

    /// Push all dispatched bytes to the underlying transport.
    ///
    /// # Errors
    ///
    /// * [`Error::WantWrite`] if the transport cannot accept everything
    ///   yet; the caller retries.
    fn flush(&mut self) -> Result<(), Error<Self::Error>>;
}
