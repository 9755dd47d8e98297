//! Request-and-commit writer for outgoing bytes.
//!
//! The dual of [`Reader`](crate::Reader): the record layer feeds a
//! [`Writer`] the free payload region of an outgoing record, the producer
//! requests contiguous spans to fill, commits what it produced, and the
//! record layer reclaims the region to dispatch the record. An optional
//! caller-owned queue catches bytes that no longer fit the region; queued
//! bytes are preloaded into the next record of the same content type.
//!
//! As with the reader, the output region is not stored: the caller passes
//! the same region slice to every call between [`feed`](Writer::feed) and
//! [`reclaim`](Writer::reclaim).

use crate::Error;

/// Outcome of [`Writer::reclaim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriterReclaim {
    /// Committed bytes sitting in the output region; the payload length
    /// of the record under construction.
    pub payload: usize,
    /// Committed bytes left over in the queue, to be preloaded into the
    /// next record.
    pub queued: usize,
}

/// Contiguous request-and-commit writer with an optional overflow queue.
///
/// `[0, commit)` of the logical output stream is produced, `[commit, end)`
/// is speculatively written and revocable, everything past `end` is free.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Writer<'a> {
    queue: Option<&'a mut [u8]>,
    /// Committed bytes held in `queue[..queued]` awaiting the next region.
    queued: usize,
    /// Logical offset where spillover into the queue began this cycle.
    qbase: Option<usize>,
    /// Length of the fed output region; `None` when no region is attached.
    out_len: Option<usize>,
    end: usize,
    commit: usize,
}

impl<'a> Writer<'a> {
    /// Create a writer with an optional overflow queue.
    ///
    /// Without a queue, span requests beyond the remaining region fail
    /// with [`Error::OutOfMemory`].
    pub fn new(queue: Option<&'a mut [u8]>) -> Self {
        Self {
            queue,
            queued: 0,
            qbase: None,
            out_len: None,
            end: 0,
            commit: 0,
        }
    }

    /// `true` if an output region is attached.
    #[inline]
    pub fn has_region(&self) -> bool {
        self.out_len.is_some()
    }

    /// Committed bytes waiting in the queue for the next region.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Free bytes remaining in the attached region.
    #[inline]
    pub fn space(&self) -> usize {
        match self.out_len {
            Some(out_len) => out_len.saturating_sub(self.end),
            None => 0,
        }
    }

    /// Attach the free payload region of an outgoing record.
    ///
    /// Bytes queued by the previous cycle are copied into the start of the
    /// region and count as committed record content; the preloaded length
    /// is returned. If the region is smaller than the queue backlog the
    /// remainder stays queued: the caller should dispatch the record and
    /// feed a fresh region.
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] if a region is already attached.
    pub fn feed(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if self.out_len.is_some() {
            return Err(Error::UnexpectedOperation);
        }

        let preload: usize = core::cmp::min(self.queued, out.len());
        if preload != 0 {
            // queue is Some here, queued bytes cannot exist without it
            let queue: &mut [u8] = match self.queue.as_deref_mut() {
                Some(queue) => queue,
                None => return Err(Error::UnexpectedOperation),
            };
            out[..preload].copy_from_slice(&queue[..preload]);
            queue.copy_within(preload..self.queued, 0);
            self.queued -= preload;
        }

        self.out_len = Some(out.len());
        self.qbase = None;
        self.end = preload;
        self.commit = preload;
        Ok(preload)
    }

    /// Request a contiguous span of exactly `desired` bytes to fill,
    /// advancing the write cursor.
    ///
    /// Once a request no longer fits the remaining region, this cycle's
    /// output continues in the queue; the region tail is filled back in
    /// at [`reclaim`](Self::reclaim).
    ///
    /// `out` must be the region last passed to [`feed`](Self::feed).
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] if no region is attached.
    /// * [`Error::OutOfMemory`] if the span fits neither the region nor
    ///   the queue; the cursor does not move.
    pub fn get<'o>(&'o mut self, out: &'o mut [u8], desired: usize) -> Result<&'o mut [u8], Error> {
        let out_len: usize = match self.out_len {
            Some(out_len) => out_len,
            None => return Err(Error::UnexpectedOperation),
        };
        debug_assert_eq!(out.len(), out_len);

        let start: usize = self.end;

        if self.qbase.is_none() && start + desired <= out_len {
            self.end += desired;
            return Ok(&mut out[start..start + desired]);
        }

        // spillover: this and all further spans of the cycle come from
        // the queue, stored after any leftover from earlier cycles
        let qbase: usize = self.qbase.unwrap_or(start);
        let leftover: usize = self.queued;
        let queue: &mut [u8] = match self.queue.as_deref_mut() {
            Some(queue) => queue,
            None => return Err(Error::OutOfMemory),
        };
        let qstart: usize = leftover + (start - qbase);
        if qstart + desired > queue.len() {
            error!(
                "queue exhausted: {} + {} > {}",
                qstart,
                desired,
                queue.len()
            );
            return Err(Error::OutOfMemory);
        }
        self.qbase = Some(qbase);
        self.end += desired;
        Ok(&mut queue[qstart..qstart + desired])
    }

    /// Mark all bytes written so far as produced.
    #[inline]
    pub fn commit(&mut self) {
        self.commit = self.end;
    }

    /// Detach the region.
    ///
    /// Speculative writes past the commit cursor are revoked. Committed
    /// spillover up to the region capacity is copied back into the region
    /// tail; the rest shifts to the queue front and is reported as
    /// [`queued`](WriterReclaim::queued) so the caller can drain it into
    /// a fresh record.
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] if no region is attached.
    pub fn reclaim(&mut self, out: &mut [u8]) -> Result<WriterReclaim, Error> {
        let out_len: usize = match self.out_len {
            Some(out_len) => out_len,
            None => return Err(Error::UnexpectedOperation),
        };
        debug_assert_eq!(out.len(), out_len);

        let payload: usize = core::cmp::min(self.commit, out_len);
        let leftover: usize = self.queued;

        if let Some(qbase) = self.qbase {
            if self.commit > qbase {
                // queue holds logical [qbase, commit) after the leftover;
                // restore the region tail and close the gap
                let queue: &mut [u8] = match self.queue.as_deref_mut() {
                    Some(queue) => queue,
                    None => return Err(Error::UnexpectedOperation),
                };
                let back: usize = payload - qbase;
                out[qbase..payload].copy_from_slice(&queue[leftover..leftover + back]);
                queue.copy_within(leftover + back..leftover + (self.commit - qbase), leftover);
            }
        }

        let queued: usize = leftover + (self.commit - payload);
        self.queued = queued;
        self.qbase = None;
        self.out_len = None;
        self.end = 0;
        self.commit = 0;
        Ok(WriterReclaim { payload, queued })
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::Error;

    #[test]
    fn fill_region() {
        let mut out: [u8; 8] = [0; 8];
        let mut wr = Writer::new(None);
        wr.feed(&mut out).unwrap();
        wr.get(&mut out, 5).unwrap().copy_from_slice(b"HELLO");
        wr.commit();
        let r = wr.reclaim(&mut out).unwrap();
        assert_eq!(r.payload, 5);
        assert_eq!(r.queued, 0);
        assert_eq!(&out[..5], b"HELLO");
    }

    #[test]
    fn uncommitted_writes_revoked() {
        let mut out: [u8; 8] = [0; 8];
        let mut wr = Writer::new(None);
        wr.feed(&mut out).unwrap();
        wr.get(&mut out, 3).unwrap().copy_from_slice(b"abc");
        wr.commit();
        wr.get(&mut out, 3).unwrap().copy_from_slice(b"def");
        let r = wr.reclaim(&mut out).unwrap();
        assert_eq!(r.payload, 3);
    }

    #[test]
    fn no_queue_overflow() {
        let mut out: [u8; 4] = [0; 4];
        let mut wr = Writer::new(None);
        wr.feed(&mut out).unwrap();
        assert_eq!(wr.get(&mut out, 5).unwrap_err(), Error::OutOfMemory);
        assert_eq!(wr.space(), 4);
    }

    #[test]
    fn spill_and_preload() {
        let mut queue: [u8; 16] = [0; 16];
        let mut wr = Writer::new(Some(&mut queue));

        let mut out: [u8; 4] = [0; 4];
        wr.feed(&mut out).unwrap();
        wr.get(&mut out, 2).unwrap().copy_from_slice(b"ab");
        // does not fit the remaining 2 region bytes: spills into the queue
        wr.get(&mut out, 6).unwrap().copy_from_slice(b"cdefgh");
        wr.commit();
        let r = wr.reclaim(&mut out).unwrap();
        // region tail filled back in from the queue
        assert_eq!(r.payload, 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(r.queued, 4);
        assert_eq!(wr.queued(), 4);

        // next record starts with the queued bytes
        let mut out2: [u8; 8] = [0; 8];
        assert_eq!(wr.feed(&mut out2).unwrap(), 4);
        assert_eq!(&out2[..4], b"efgh");
        wr.get(&mut out2, 2).unwrap().copy_from_slice(b"ij");
        wr.commit();
        let r = wr.reclaim(&mut out2).unwrap();
        assert_eq!(r.payload, 6);
        assert_eq!(&out2[..6], b"efghij");
        assert_eq!(r.queued, 0);
    }

    #[test]
    fn queue_larger_than_next_region() {
        let mut queue: [u8; 16] = [0; 16];
        let mut wr = Writer::new(Some(&mut queue));

        let mut out: [u8; 2] = [0; 2];
        wr.feed(&mut out).unwrap();
        wr.get(&mut out, 8).unwrap().copy_from_slice(b"abcdefgh");
        wr.commit();
        let r = wr.reclaim(&mut out).unwrap();
        assert_eq!(r.payload, 2);
        assert_eq!(&out, b"ab");
        assert_eq!(r.queued, 6);

        // drains across two further records
        let mut out2: [u8; 4] = [0; 4];
        assert_eq!(wr.feed(&mut out2).unwrap(), 4);
        assert_eq!(&out2, b"cdef");
        wr.commit();
        let r = wr.reclaim(&mut out2).unwrap();
        assert_eq!(r.payload, 4);
        assert_eq!(r.queued, 2);

        let mut out3: [u8; 4] = [0; 4];
        assert_eq!(wr.feed(&mut out3).unwrap(), 2);
        assert_eq!(&out3[..2], b"gh");
        wr.commit();
        let r = wr.reclaim(&mut out3).unwrap();
        assert_eq!(r.payload, 2);
        assert_eq!(r.queued, 0);
    }

    #[test]
    fn round_trip_concatenation() {
        // dispatched payloads concatenate to the committed byte stream
        let mut queue: [u8; 32] = [0; 32];
        let mut wr = Writer::new(Some(&mut queue));
        let message: &[u8] = b"the quick brown fox jumps over";
        let mut produced: std::vec::Vec<u8> = std::vec::Vec::new();

        let mut written: usize = 0;
        while written < message.len() || wr.queued() != 0 {
            let mut out: [u8; 7] = [0; 7];
            wr.feed(&mut out).unwrap();
            if written < message.len() {
                let n: usize = core::cmp::min(9, message.len() - written);
                wr.get(&mut out, n)
                    .unwrap()
                    .copy_from_slice(&message[written..written + n]);
                written += n;
            }
            wr.commit();
            let r = wr.reclaim(&mut out).unwrap();
            produced.extend_from_slice(&out[..r.payload]);
        }
        assert_eq!(produced, message);
    }
}
