//! In-memory [`Layer1`] implementation.
//!
//! [`RamLink`] moves records through two caller-owned byte buffers
//! instead of a network, giving tests and examples a deterministic
//! transport with controllable back-pressure.

use crate::{layer1::Layer1, Error};
use core::convert::Infallible;

/// A [`Layer1`] over caller-owned memory.
///
/// Incoming bytes are appended with [`feed_rx`](Self::feed_rx); outgoing
/// records accumulate in the transmit buffer and can be inspected with
/// [`dispatched`](Self::dispatched). [`set_flush_errors`](Self::set_flush_errors)
/// makes the next flushes fail with [`Error::WantWrite`] to exercise
/// retry paths.
#[derive(Debug)]
pub struct RamLink<'a> {
    rx: &'a mut [u8],
    /// Valid incoming bytes in `rx[..rx_len]`.
    rx_len: usize,
    /// Consumed up to this offset.
    rx_pos: usize,
    /// Length of the outstanding fetched span.
    fetched: usize,
    tx: &'a mut [u8],
    /// Dispatched bytes in `tx[..tx_len]`.
    tx_len: usize,
    /// Length of the outstanding writable span.
    staged: usize,
    /// Bytes pushed by the last successful flush.
    flushed: usize,
    flush_errors: u32,
}

impl<'a> RamLink<'a> {
    /// Create a link over receive and transmit storage.
    pub fn new(rx: &'a mut [u8], tx: &'a mut [u8]) -> Self {
        Self {
            rx,
            rx_len: 0,
            rx_pos: 0,
            fetched: 0,
            tx,
            tx_len: 0,
            staged: 0,
            flushed: 0,
            flush_errors: 0,
        }
    }

    /// Append incoming bytes, as if they arrived from the peer.
    ///
    /// # Panics
    ///
    /// Panics if the receive buffer cannot hold the bytes.
    pub fn feed_rx(&mut self, data: &[u8]) {
        assert!(
            self.rx_len + data.len() <= self.rx.len(),
            "receive buffer full"
        );
        self.rx[self.rx_len..self.rx_len + data.len()].copy_from_slice(data);
        self.rx_len += data.len();
    }

    /// Unconsumed incoming bytes.
    pub fn rx_remaining(&self) -> usize {
        self.rx_len - self.rx_pos
    }

    /// All bytes dispatched so far.
    pub fn dispatched(&self) -> &[u8] {
        &self.tx[..self.tx_len]
    }

    /// Bytes pushed to the "wire" by the last successful flush.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Fail the next `n` flushes with [`Error::WantWrite`].
    pub fn set_flush_errors(&mut self, n: u32) {
        self.flush_errors = n;
    }
}

impl<'a> Layer1 for RamLink<'a> {
    type Error = Infallible;

    fn fetch(&mut self, len: usize) -> Result<&mut [u8], Error<Self::Error>> {
        if self.rx_len - self.rx_pos < len {
            return Err(Error::WantRead);
        }
        self.fetched = self.fetched.max(len);
        Ok(&mut self.rx[self.rx_pos..self.rx_pos + len])
    }

    fn consume(&mut self) -> Result<(), Error<Self::Error>> {
        self.rx_pos += self.fetched;
        self.fetched = 0;
        Ok(())
    }

    fn write(&mut self, len: usize) -> Result<&mut [u8], Error<Self::Error>> {
        if self.tx_len + len > self.tx.len() {
            return Err(Error::WantWrite);
        }
        self.staged = self.staged.max(len);
        Ok(&mut self.tx[self.tx_len..self.tx_len + len])
    }

    fn dispatch(&mut self, len: usize) -> Result<(), Error<Self::Error>> {
        debug_assert!(len <= self.staged);
        self.tx_len += len;
        self.staged = 0;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error<Self::Error>> {
        if self.flush_errors != 0 {
            self.flush_errors -= 1;
            return Err(Error::WantWrite);
        }
        self.flushed = self.tx_len;
        Ok(())
    }
}
