//! Request-and-commit reader over non-contiguous input fragments.
//!
//! A [`Reader`] collects bytes that arrive in arbitrarily sized fragments
//! (record payloads) and serves them back as contiguous spans of the
//! consumer's chosen length. Uncommitted reads are cheap to revoke: when a
//! fragment ends mid-request the unconsumed tail moves into a caller-owned
//! accumulator and is replayed once the next fragment arrives.
//!
//! The fragment itself is not stored; the caller passes the same fragment
//! slice to every call between [`feed`](Reader::feed) and
//! [`reclaim`](Reader::reclaim). The record layer enforces this pairing
//! structurally.

use crate::Error;

/// Byte-stream accumulator exposing contiguous request-and-commit reads
/// across non-contiguous input fragments.
///
/// The logical stream since the last reclaim is the accumulator backlog
/// followed by the attached fragment. `[0, commit)` is consumed,
/// `[commit, end)` is speculatively read and revocable, `[end, ..)` is
/// unread.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reader<'a> {
    acc: Option<&'a mut [u8]>,
    /// Backlog bytes held in `acc[..acc_avail]`.
    acc_avail: usize,
    /// Fragment bytes mirrored into `acc[acc_avail..acc_avail + spliced]`
    /// to serve spans crossing the backlog/fragment boundary.
    spliced: usize,
    /// Length of the attached fragment; `None` when unset or paused.
    frag_len: Option<usize>,
    end: usize,
    commit: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader with an optional accumulator.
    ///
    /// Without an accumulator the reader cannot pause: fragments must be
    /// consumed completely before reclamation.
    pub fn new(acc: Option<&'a mut [u8]>) -> Self {
        Self {
            acc,
            acc_avail: 0,
            spliced: 0,
            frag_len: None,
            end: 0,
            commit: 0,
        }
    }

    /// `true` if no fragment is attached and no backlog is held.
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.frag_len.is_none() && self.acc_avail == 0
    }

    /// `true` if backlog awaits a continuation fragment.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.frag_len.is_none() && self.acc_avail != 0
    }

    /// `true` if a fragment is attached.
    #[inline]
    pub fn has_fragment(&self) -> bool {
        self.frag_len.is_some()
    }

    /// Backlog bytes held across fragments.
    #[inline]
    pub fn backlog(&self) -> usize {
        self.acc_avail
    }

    /// Total length of the logical stream since the last reclaim.
    #[inline]
    fn stream_len(&self) -> usize {
        self.acc_avail + self.frag_len.unwrap_or(0)
    }

    /// Unread bytes remaining in the logical stream.
    #[inline]
    pub fn remain(&self) -> usize {
        self.stream_len() - self.end
    }

    /// Bytes past the commit cursor: speculatively read or not yet read.
    ///
    /// These are the bytes [`reclaim`](Self::reclaim) would retain.
    #[inline]
    pub fn uncommitted(&self) -> usize {
        self.stream_len() - self.commit
    }

    /// Attach an input fragment.
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] if a fragment is already attached.
    /// * [`Error::NeedsAccumulator`] if backlog is held and the
    ///   accumulator cannot also hold the new fragment. The accumulator
    ///   must fit backlog plus fragment so that later pauses cannot fail.
    pub fn feed(&mut self, frag: &[u8]) -> Result<(), Error> {
        if self.frag_len.is_some() {
            return Err(Error::UnexpectedOperation);
        }
        if self.acc_avail != 0 {
            let size: usize = match self.acc.as_deref() {
                Some(acc) => acc.len(),
                None => 0,
            };
            if self.acc_avail + frag.len() > size {
                error!(
                    "accumulator too small: {} + {} > {}",
                    self.acc_avail,
                    frag.len(),
                    size
                );
                return Err(Error::NeedsAccumulator);
            }
        }
        self.frag_len = Some(frag.len());
        Ok(())
    }

    /// Request up to `desired` bytes, advancing the read cursor by the
    /// length of the returned span.
    ///
    /// The returned span is shorter than `desired` (possibly empty) when
    /// the logical stream holds fewer unread bytes.
    ///
    /// `frag` must be the fragment last passed to [`feed`](Self::feed).
    pub fn get<'f>(&'f mut self, frag: &'f [u8], desired: usize) -> Result<&'f [u8], Error> {
        let n: usize = core::cmp::min(desired, self.remain());
        self.take(frag, n)
    }

    /// Request exactly `desired` bytes.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfData`] if fewer than `desired` unread bytes remain;
    ///   the cursor does not move.
    pub fn get_exact<'f>(&'f mut self, frag: &'f [u8], desired: usize) -> Result<&'f [u8], Error> {
        if desired > self.remain() {
            return Err(Error::OutOfData);
        }
        self.take(frag, desired)
    }

    fn take<'f>(&'f mut self, frag: &'f [u8], n: usize) -> Result<&'f [u8], Error> {
        let frag_len: usize = match self.frag_len {
            Some(len) => len,
            None => return Err(Error::UnexpectedOperation),
        };
        debug_assert_eq!(frag.len(), frag_len);

        let start: usize = self.end;
        self.end += n;

        if start >= self.acc_avail {
            // entirely within the fragment, serve zero-copy
            return Ok(&frag[start - self.acc_avail..start - self.acc_avail + n]);
        }

        let mirrored: usize = self.acc_avail + self.spliced;
        if start + n > mirrored {
            // span crosses the backlog/fragment boundary: mirror the
            // missing fragment prefix into the accumulator
            let extra: usize = start + n - mirrored;
            let acc: &mut [u8] = match self.acc.as_deref_mut() {
                Some(acc) => acc,
                None => return Err(Error::NeedsAccumulator),
            };
            acc[mirrored..mirrored + extra].copy_from_slice(&frag[self.spliced..self.spliced + extra]);
            self.spliced += extra;
        }

        let acc: &[u8] = match self.acc.as_deref() {
            Some(acc) => acc,
            None => return Err(Error::NeedsAccumulator),
        };
        Ok(&acc[start..start + n])
    }

    /// Mark all bytes read so far as consumed.
    ///
    /// Consumed bytes are dropped at the next [`reclaim`](Self::reclaim);
    /// unconsumed bytes are retained and replayed.
    #[inline]
    pub fn commit(&mut self) {
        self.commit = self.end;
    }

    /// Detach the fragment, retaining unconsumed bytes as backlog.
    ///
    /// Speculative reads past the commit cursor are revoked; the retained
    /// bytes are served again after the next [`feed`](Self::feed).
    /// Returns the number of bytes retained: `0` leaves the reader unset,
    /// anything else leaves it paused.
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] if no fragment is attached.
    /// * [`Error::NeedsAccumulator`] if bytes must be retained and no
    ///   accumulator is present.
    pub fn reclaim(&mut self, frag: &[u8]) -> Result<usize, Error> {
        let frag_len: usize = match self.frag_len {
            Some(len) => len,
            None => return Err(Error::UnexpectedOperation),
        };
        debug_assert_eq!(frag.len(), frag_len);

        let stream_len: usize = self.acc_avail + frag_len;
        let pending: usize = stream_len - self.commit;

        if pending != 0 {
            let acc: &mut [u8] = match self.acc.as_deref_mut() {
                Some(acc) => acc,
                None => return Err(Error::NeedsAccumulator),
            };
            if pending > acc.len() {
                error!(
                    "accumulator too small for backlog: {} > {}",
                    pending,
                    acc.len()
                );
                return Err(Error::NeedsAccumulator);
            }

            // backlog part: [commit, acc_avail) already lives in acc
            let from_acc: usize = self.acc_avail.saturating_sub(self.commit);
            if from_acc != 0 {
                acc.copy_within(self.commit..self.acc_avail, 0);
            }

            // fragment part: [max(commit, acc_avail), stream_len)
            let frag_from: usize = self.commit.max(self.acc_avail) - self.acc_avail;
            acc[from_acc..pending].copy_from_slice(&frag[frag_from..]);
        }

        self.acc_avail = pending;
        self.spliced = 0;
        self.frag_len = None;
        self.end = 0;
        self.commit = 0;
        Ok(pending)
    }
}
