//! Sliding window of connection-state epochs.
//!
//! An epoch is one generation of record protection: a transform, the
//! outgoing and incoming sequence state, and (in datagram mode) the
//! anti-replay window. Epochs are identified by small integers matching
//! the DTLS epoch field; a fixed-size ring holds the live window and
//! slides forward as old epochs lose their permissions.

use crate::{config::Mode, Error};

/// Epoch identifier, matching the 16-bit DTLS epoch field.
pub type EpochId = u16;

/// Read/write permission flags of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EpochUsage(u8);

impl EpochUsage {
    /// No permissions; the epoch only holds state.
    pub const NONE: Self = Self(0);
    /// Incoming records may use this epoch.
    pub const READ: Self = Self(1);
    /// Outgoing records may use this epoch.
    pub const WRITE: Self = Self(1 << 1);
    /// Both directions.
    pub const READ_WRITE: Self = Self(1 | (1 << 1));

    /// `true` if the read flag is set.
    #[inline]
    pub const fn read(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    /// `true` if the write flag is set.
    #[inline]
    pub const fn write(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    /// `true` if no flag is set.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    const fn clear_read(self) -> Self {
        Self(self.0 & !Self::READ.0)
    }

    const fn clear_write(self) -> Self {
        Self(self.0 & !Self::WRITE.0)
    }
}

impl core::ops::BitOr for EpochUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Sliding anti-replay window covering `[top - 63, top]`.
///
/// # References
///
/// * [RFC 6347 Section 4.1.2.6](https://datatracker.ietf.org/doc/html/rfc6347#section-4.1.2.6)
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct ReplayWindow {
    top: u64,
    bitmask: u64,
}

impl ReplayWindow {
    const LEN: u64 = u64::BITS as u64;

    /// `true` if a record with sequence number `seq` would be accepted.
    pub(crate) fn check(&self, seq: u64) -> bool {
        if seq > self.top {
            true
        } else {
            let delta: u64 = self.top - seq;
            delta < Self::LEN && self.bitmask & (1 << delta) == 0
        }
    }

    /// Record `seq` as seen. Call only after [`check`](Self::check).
    pub(crate) fn update(&mut self, seq: u64) {
        if seq > self.top {
            let delta: u64 = seq - self.top;
            if delta >= Self::LEN {
                self.bitmask = 0;
            } else {
                self.bitmask <<= delta;
            }
            self.bitmask |= 1;
            self.top = seq;
        } else {
            self.bitmask |= 1 << (self.top - seq);
        }
    }
}

/// State of a single epoch.
pub(crate) struct Epoch<T> {
    /// Record protection; `None` is the identity transform.
    pub(crate) transform: Option<T>,
    pub(crate) usage: EpochUsage,
    /// Next outgoing sequence number.
    pub(crate) out_seq: u64,
    /// Next expected incoming sequence number (stream mode).
    pub(crate) in_seq: u64,
    /// Sequence number of the most recent valid incoming record
    /// (datagram mode).
    pub(crate) last_seen: u64,
    pub(crate) window: ReplayWindow,
}

impl<T> Epoch<T> {
    fn new(transform: Option<T>) -> Self {
        Self {
            transform,
            usage: EpochUsage::NONE,
            out_seq: 0,
            in_seq: 0,
            last_seen: 0,
            window: ReplayWindow::default(),
        }
    }

    /// Claim the next outgoing sequence number.
    pub(crate) fn take_out_seq(&mut self) -> Result<u64, Error> {
        let seq: u64 = self.out_seq;
        self.out_seq = self.out_seq.checked_add(1).ok_or(Error::CounterWrap)?;
        Ok(seq)
    }
}

impl<T> core::fmt::Debug for Epoch<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> Result<(), core::fmt::Error> {
        f.debug_struct("Epoch")
            .field("usage", &self.usage)
            .field("out_seq", &self.out_seq)
            .field("in_seq", &self.in_seq)
            .field("last_seen", &self.last_seen)
            .finish_non_exhaustive()
    }
}

/// Ring of live epochs with a sliding base.
#[derive(Debug)]
pub(crate) struct EpochWindow<T, const W: usize> {
    window: [Option<Epoch<T>>; W],
    mode: Mode,
    /// Identifier of the oldest live epoch.
    base: EpochId,
    /// Offset of the first free slot; `base + next` is the next id.
    next: usize,
    /// Stream mode: the single epoch incoming records decrypt under.
    pub(crate) default_in: Option<EpochId>,
    /// Stream mode: the single epoch outgoing records encrypt under.
    pub(crate) default_out: Option<EpochId>,
}

impl<T, const W: usize> EpochWindow<T, W> {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            window: core::array::from_fn(|_| None),
            mode,
            base: 0,
            next: 0,
            default_in: None,
            default_out: None,
        }
    }

    #[inline]
    const fn slot_index(id: EpochId) -> usize {
        id as usize % W
    }

    fn contains(&self, id: EpochId) -> bool {
        id >= self.base && usize::from(id - self.base) < self.next
    }

    /// Add an epoch, taking ownership of its transform.
    ///
    /// Slides the window first if it is full.
    ///
    /// # Errors
    ///
    /// * [`Error::TooManyEpochs`] if no slot can be freed.
    pub(crate) fn add(&mut self, transform: Option<T>) -> Result<EpochId, Error> {
        if self.next == W {
            self.slide();
            if self.next == W {
                warn!("epoch window saturated at base {}", self.base);
                return Err(Error::TooManyEpochs);
            }
        }
        let id: EpochId = self
            .base
            .checked_add(self.next as u16)
            .ok_or(Error::TooManyEpochs)?;
        let slot: &mut Option<Epoch<T>> = &mut self.window[Self::slot_index(id)];
        debug_assert!(slot.is_none());
        *slot = Some(Epoch::new(transform));
        self.next += 1;
        debug!("epoch {} added, window base {}", id, self.base);
        Ok(id)
    }

    /// Set the permission flags of an epoch.
    ///
    /// In stream mode at most one epoch holds each of the read and write
    /// flags; granting a flag revokes it from the previous holder.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgs`] if `id` is outside the live window.
    pub(crate) fn set_usage(&mut self, id: EpochId, usage: EpochUsage) -> Result<(), Error> {
        if !self.contains(id) {
            return Err(Error::InvalidArgs);
        }

        if self.mode == Mode::Stream {
            if usage.read() {
                if let Some(prev) = self.default_in {
                    if prev != id {
                        if let Some(entry) = self.get_mut(prev) {
                            entry.usage = entry.usage.clear_read();
                        }
                    }
                }
                self.default_in = Some(id);
            }
            if usage.write() {
                if let Some(prev) = self.default_out {
                    if prev != id {
                        if let Some(entry) = self.get_mut(prev) {
                            entry.usage = entry.usage.clear_write();
                        }
                    }
                }
                self.default_out = Some(id);
            }
        }

        // contains() checked above
        if let Some(entry) = self.get_mut(id) {
            entry.usage = usage;
        }
        Ok(())
    }

    /// Borrow an epoch, or `None` if `id` is outside the live window.
    pub(crate) fn get_mut(&mut self, id: EpochId) -> Option<&mut Epoch<T>> {
        if self.contains(id) {
            self.window[Self::slot_index(id)].as_mut()
        } else {
            None
        }
    }

    /// Borrow an epoch immutably.
    pub(crate) fn get(&self, id: EpochId) -> Option<&Epoch<T>> {
        if self.contains(id) {
            self.window[Self::slot_index(id)].as_ref()
        } else {
            None
        }
    }

    /// Advance the base past epochs that can no longer be used, dropping
    /// their transforms.
    pub(crate) fn slide(&mut self) {
        while self.next != 0 {
            let id: EpochId = self.base;
            let retire: bool = match &self.window[Self::slot_index(id)] {
                Some(entry) => {
                    entry.usage.is_none()
                        && self.default_in.map_or(true, |d| id < d)
                        && self.default_out.map_or(true, |d| id < d)
                }
                None => true,
            };
            if !retire {
                break;
            }
            debug!("retiring epoch {}", id);
            self.window[Self::slot_index(id)] = None;
            self.base += 1;
            self.next -= 1;
        }
    }
}
