//! Transport-agnostic record layer for the (D)TLS family of protocols.
//!
//! This crate implements the hardest slice of a (D)TLS stack below the
//! handshake: framing, protecting, and sequencing records, together with
//! the request-and-commit buffering primitives that let handshake
//! messages cross record boundaries without copying when they don't
//! have to.
//!
//! It deliberately contains **no** cryptography of its own beyond a
//! reference HMAC transform: record protection enters through the
//! [`Transform`] trait, raw I/O through the [`Layer1`](layer1::Layer1)
//! trait, and key schedules, certificates, and handshake logic belong to
//! the layers above.
//!
//! # Design
//!
//! * `no_std`, no heap: the reader accumulator, writer queue, and
//!   transport buffers are caller-owned slices.
//! * Single-threaded cooperative: any operation touching the transport
//!   may return [`Error::WantRead`] or [`Error::WantWrite`]; the context
//!   is left ready for the same call to be retried.
//! * Reading and writing hand out borrowed [`RecordReader`] /
//!   [`RecordWriter`] handles; finishing a record is a consuming
//!   [`done`](RecordReader::done) call, so misuse like reading two
//!   records at once is a compile error rather than a runtime one.
//!
//! # Example
//!
//! ```
//! use tls_mps::{
//!     sim::RamLink, Config, ContentType, EpochUsage, Identity, Mode, RecordLayer,
//! };
//!
//! // a record of 5 bytes of application data, protected by epoch 0
//! // (the null transform)
//! let mut rx: [u8; 64] = [0; 64];
//! let mut tx: [u8; 64] = [0; 64];
//! let mut link = RamLink::new(&mut rx, &mut tx);
//! link.feed_rx(&[0x17, 0x03, 0x03, 0x00, 0x05, b'H', b'E', b'L', b'L', b'O']);
//!
//! let mut cfg: Config = Config::new(Mode::Stream);
//! cfg.add_type(ContentType::ApplicationData, false, false, true)?;
//!
//! let mut acc: [u8; 64] = [0; 64];
//! let mut queue: [u8; 64] = [0; 64];
//! let mut mps: RecordLayer<_, Identity> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
//! let epoch = mps.epoch_add(None)?;
//! mps.epoch_usage(epoch, EpochUsage::READ_WRITE)?;
//!
//! let mut rd = mps.read_start()?;
//! assert_eq!(rd.content_type(), ContentType::ApplicationData);
//! assert_eq!(rd.get_exact(5)?, b"HELLO");
//! rd.commit();
//! rd.done()?;
//! # Ok::<(), tls_mps::Error>(())
//! ```
//!
//! # Feature Flags
//!
//! All features are disabled by default.
//!
//! * `defmt`: Enable logging with `defmt`.
//! * `log`: Enable logging with `log`.
//! * `std`: Implement [`std::error::Error`] for [`Error`].
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg))]
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod config;
mod epoch;
pub mod layer1;
mod reader;
mod record;
pub mod sim;
mod transform;
mod writer;

pub use config::{Config, EarlyDataPolicy, Mode, MAX_CIPHER_LEN, MAX_PLAIN_LEN};
pub use epoch::{EpochId, EpochUsage};
pub use reader::Reader;
pub use record::{ContentType, ProtocolVersion, RecordHeader};
pub use transform::{AuthError, HmacSha256, Identity, Transform, Xor};
pub use writer::{Writer, WriterReclaim};

use core::marker::PhantomData;
use epoch::EpochWindow;
use layer1::Layer1;
use record::HeaderError;

/// Record layer errors.
///
/// `E` is the transport error type of the [`Layer1`](layer1::Layer1)
/// implementation underneath; layers without a transport (the buffering
/// primitives) use the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E = core::convert::Infallible> {
    /// The transport has insufficient input. Non-corrupting; retry the
    /// same call once more input is available.
    WantRead,
    /// The transport cannot accept output yet. Non-corrupting; retry the
    /// same call once the transport drains.
    WantWrite,
    /// A reader holds fewer unread bytes than requested.
    OutOfData,
    /// A writer span fits neither the output region nor the queue.
    OutOfMemory,
    /// A record was malformed, disallowed, or failed authentication in
    /// stream mode. Fatal: the context must be dropped.
    InvalidRecord,
    /// API misuse: unregistered content type, duplicate type
    /// registration, or unknown epoch. Non-corrupting.
    InvalidArgs,
    /// The operation does not fit the abstract state or transport mode.
    /// Non-corrupting.
    UnexpectedOperation,
    /// The epoch window is saturated with epochs that still hold
    /// permissions. Non-corrupting; revoke usage to free a slot.
    TooManyEpochs,
    /// Bytes had to be retained across records but no accumulator (or
    /// not enough of one) is available. Fatal for the context.
    NeedsAccumulator,
    /// A 64-bit sequence counter is exhausted.
    CounterWrap,
    /// Transport error passthrough.
    Other(E),
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Self::Other(error)
    }
}

impl Error<core::convert::Infallible> {
    /// Re-type an error from a layer that cannot carry transport errors.
    pub fn erase<E>(self) -> Error<E> {
        match self {
            Self::WantRead => Error::WantRead,
            Self::WantWrite => Error::WantWrite,
            Self::OutOfData => Error::OutOfData,
            Self::OutOfMemory => Error::OutOfMemory,
            Self::InvalidRecord => Error::InvalidRecord,
            Self::InvalidArgs => Error::InvalidArgs,
            Self::UnexpectedOperation => Error::UnexpectedOperation,
            Self::TooManyEpochs => Error::TooManyEpochs,
            Self::NeedsAccumulator => Error::NeedsAccumulator,
            Self::CounterWrap => Error::CounterWrap,
            Self::Other(x) => match x {},
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug + core::fmt::Display> std::error::Error for Error<E> {}

impl<E: core::fmt::Display> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::WantRead => write!(f, "transport has insufficient input"),
            Self::WantWrite => write!(f, "transport cannot accept output"),
            Self::OutOfData => write!(f, "reader out of data"),
            Self::OutOfMemory => write!(f, "writer out of memory"),
            Self::InvalidRecord => write!(f, "invalid record"),
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::UnexpectedOperation => write!(f, "operation does not fit the current state"),
            Self::TooManyEpochs => write!(f, "epoch window saturated"),
            Self::NeedsAccumulator => write!(f, "no accumulator available"),
            Self::CounterWrap => write!(f, "sequence counter exhausted"),
            Self::Other(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Turns a non-blocking record layer expression `$e` into a blocking
/// operation.
///
/// This is accomplished by continuously calling the expression `$e` until
/// it no longer returns [`Error::WantRead`] or [`Error::WantWrite`].
#[macro_export]
macro_rules! block {
    ($e:expr) => {
        loop {
            #[allow(unreachable_patterns)]
            match $e {
                Err($crate::Error::WantRead) | Err($crate::Error::WantWrite) => {}
                Err(e) => break Err(e),
                Ok(x) => break Ok(x),
            }
        }
    };
}

/// One incoming stream slot: a reader plus the content type and epoch of
/// the stream it carries.
#[derive(Debug)]
struct StreamSlot<'b> {
    rd: Reader<'b>,
    ctype: Option<ContentType>,
    epoch: EpochId,
}

/// Location of the current record's plaintext inside the Layer-1 fetch
/// span.
#[derive(Debug, Clone, Copy)]
struct InFrag {
    off: usize,
    len: usize,
    fetch_len: usize,
}

/// Incoming half of the context.
#[derive(Debug)]
struct InCtx<'b> {
    active: StreamSlot<'b>,
    paused: StreamSlot<'b>,
    /// `Some` while a record is attached to the active reader.
    frag: Option<InFrag>,
    /// The span of the released record still needs a Layer-1 consume.
    consume_pending: bool,
    bad_mac_ctr: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutState {
    /// No record under construction.
    Unset,
    /// A record is staged in the Layer-1 write span, not yet dispatched.
    Internal,
}

/// Outgoing half of the context.
#[derive(Debug)]
struct OutCtx<'b> {
    wr: Writer<'b>,
    state: OutState,
    /// Content type of the open record, and of any queued bytes.
    ctype: Option<ContentType>,
    epoch: EpochId,
    /// Offset of the payload region inside the write span (the header
    /// length).
    payload_off: usize,
    /// Payload capacity handed to the writer.
    cap: usize,
    /// Length of the Layer-1 write span backing the record.
    span_len: usize,
    /// Committed payload bytes of the open record.
    written: usize,
    /// A flush was requested but records are still undispatched.
    flush: bool,
    /// Dispatched bytes still need a successful Layer-1 flush.
    clearing: bool,
}

/// The (D)TLS record layer.
///
/// One context serves one connection direction-pair. It owns the
/// [`Layer1`](layer1::Layer1) transport, the epoch window with its
/// transforms, and the reader/writer state; the accumulator and queue
/// storage are borrowed from the caller for the context's lifetime.
///
/// `W` is the epoch window size: how many epochs may be live at once.
/// The default of 2 covers (D)TLS key rollover.
pub struct RecordLayer<'b, L, T, const W: usize = 2> {
    cfg: Config,
    epochs: EpochWindow<T, W>,
    l1: L,
    inn: InCtx<'b>,
    out: OutCtx<'b>,
}

/// Expected (and produced) record version field value.
fn wire_version(cfg: &Config) -> u16 {
    match cfg.version {
        // TLS 1.3 records carry the 1.2 value on the wire
        Some(ProtocolVersion::Tls13) => ProtocolVersion::Tls12 as u16,
        Some(v) => v as u16,
        None => match cfg.mode {
            Mode::Stream => ProtocolVersion::Tls12 as u16,
            Mode::Datagram => ProtocolVersion::Dtls12 as u16,
        },
    }
}

impl<'b, L, T, const W: usize> RecordLayer<'b, L, T, W>
where
    L: Layer1,
    T: Transform,
{
    /// Create a record layer over a transport.
    ///
    /// * `acc` - reassembly storage for pausable content; size it to the
    ///   largest message expected to span records. May be empty if no
    ///   content type is pausable.
    /// * `queue` - outgoing overflow storage for pausable content; an
    ///   empty slice disables write queueing.
    pub fn new(cfg: Config, l1: L, acc: &'b mut [u8], queue: &'b mut [u8]) -> Self {
        let acc: Option<&'b mut [u8]> = if acc.is_empty() { None } else { Some(acc) };
        let queue: Option<&'b mut [u8]> = if queue.is_empty() { None } else { Some(queue) };
        Self {
            epochs: EpochWindow::new(cfg.mode),
            cfg,
            l1,
            inn: InCtx {
                active: StreamSlot {
                    rd: Reader::new(acc),
                    ctype: None,
                    epoch: 0,
                },
                paused: StreamSlot {
                    rd: Reader::new(None),
                    ctype: None,
                    epoch: 0,
                },
                frag: None,
                consume_pending: false,
                bad_mac_ctr: 0,
            },
            out: OutCtx {
                wr: Writer::new(queue),
                state: OutState::Unset,
                ctype: None,
                epoch: 0,
                payload_off: 0,
                cap: 0,
                span_len: 0,
                written: 0,
                flush: false,
                clearing: false,
            },
        }
    }

    /// Destroy the context, dropping all owned transforms, and return
    /// the transport.
    pub fn free(self) -> L {
        self.l1
    }

    /// Borrow the underlying transport.
    #[inline]
    pub fn transport(&self) -> &L {
        &self.l1
    }

    /// Borrow the underlying transport mutably, for example to feed it
    /// received bytes or drain its output.
    #[inline]
    pub fn transport_mut(&mut self) -> &mut L {
        &mut self.l1
    }

    /// Add an epoch, transferring ownership of its transform.
    ///
    /// `None` is the identity transform (no protection). The caller must
    /// not touch a transform after this call succeeds; it is dropped when
    /// the epoch window slides past the epoch.
    ///
    /// # Errors
    ///
    /// * [`Error::TooManyEpochs`] if the window is saturated.
    pub fn epoch_add(&mut self, transform: Option<T>) -> Result<EpochId, Error<L::Error>> {
        self.epochs.add(transform).map_err(Error::erase)
    }

    /// Set the permission flags of an epoch.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgs`] if the epoch is outside the live window.
    pub fn epoch_usage(&mut self, id: EpochId, usage: EpochUsage) -> Result<(), Error<L::Error>> {
        self.epochs.set_usage(id, usage).map_err(Error::erase)
    }

    /// Override the next outgoing sequence number of an epoch
    /// (datagram mode only; required for HelloVerifyRequest handling).
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] in stream mode.
    /// * [`Error::InvalidArgs`] if the epoch is outside the live window.
    pub fn force_next_out_seq(&mut self, id: EpochId, seq: u64) -> Result<(), Error<L::Error>> {
        if self.cfg.mode != Mode::Datagram {
            return Err(Error::UnexpectedOperation);
        }
        let entry = self.epochs.get_mut(id).ok_or(Error::InvalidArgs)?;
        entry.out_seq = seq;
        Ok(())
    }

    /// Sequence number of the most recent valid incoming record under an
    /// epoch (datagram mode only).
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] in stream mode.
    /// * [`Error::InvalidArgs`] if the epoch is outside the live window.
    pub fn last_in_seq(&self, id: EpochId) -> Result<u64, Error<L::Error>> {
        if self.cfg.mode != Mode::Datagram {
            return Err(Error::UnexpectedOperation);
        }
        let entry = self.epochs.get(id).ok_or(Error::InvalidArgs)?;
        Ok(entry.last_seen)
    }

    // ------------------------------------------------------------------
    // read path
    // ------------------------------------------------------------------

    /// Begin (or re-enter) reading a record.
    ///
    /// Fetches, validates, and unprotects the next record and returns a
    /// [`RecordReader`] over its payload. If the previous reader handle
    /// was dropped without [`done`](RecordReader::done), the same record
    /// is re-exposed with its cursors intact.
    ///
    /// # Errors
    ///
    /// * [`Error::WantRead`] if the transport does not hold a complete
    ///   record yet. Non-corrupting; retry.
    /// * [`Error::InvalidRecord`] on a malformed or disallowed record
    ///   (stream mode; datagram mode silently drops and keeps looking).
    pub fn read_start(&mut self) -> Result<RecordReader<'_, 'b, L::Error>, Error<L::Error>> {
        if self.inn.frag.is_none() {
            self.next_record()?;
        }

        let ctype: ContentType = self.inn.active.ctype.ok_or(Error::UnexpectedOperation)?;
        let pausable: bool = self.cfg.is_pausable(ctype);
        let epoch: EpochId = self.inn.active.epoch;

        let Self { l1, inn, .. } = self;
        let info: InFrag = match inn.frag {
            Some(info) => info,
            None => return Err(Error::UnexpectedOperation),
        };
        let span: &mut [u8] = l1.fetch(info.fetch_len)?;
        let frag: &[u8] = &span[info.off..info.off + info.len];
        Ok(RecordReader {
            inn,
            frag,
            ctype,
            epoch,
            pausable,
            _err: PhantomData,
        })
    }

    /// Skip over a whole record of `total` bytes.
    fn skip(&mut self, total: usize) -> Result<(), Error<L::Error>> {
        self.l1.fetch(total)?;
        self.l1.consume()
    }

    /// Fetch, validate, unprotect, and route the next record, leaving it
    /// attached to the active reader.
    fn next_record(&mut self) -> Result<(), Error<L::Error>> {
        if self.inn.consume_pending {
            self.l1.consume()?;
            self.inn.consume_pending = false;
        }

        let mode: Mode = self.cfg.mode;
        let hdr_len: usize = RecordHeader::len(mode);

        loop {
            let mut hdr_buf: [u8; record::MAX_HDR_LEN] = [0; record::MAX_HDR_LEN];
            {
                let span: &mut [u8] = self.l1.fetch(hdr_len)?;
                hdr_buf[..hdr_len].copy_from_slice(&span[..hdr_len]);
            }
            let head: RecordHeader = match RecordHeader::deser(mode, &hdr_buf[..hdr_len]) {
                Ok(head) => head,
                Err(HeaderError::BadContentType(ctype)) => {
                    if mode == Mode::Datagram {
                        debug!("dropping record with unknown content type {}", ctype);
                        let skip_len: u16 = u16::from_be_bytes([hdr_buf[11], hdr_buf[12]]);
                        self.skip(hdr_len + usize::from(skip_len))?;
                        continue;
                    }
                    error!("unknown content type {}", ctype);
                    return Err(Error::InvalidRecord);
                }
                // a full header was fetched
                Err(HeaderError::Truncated) => return Err(Error::InvalidRecord),
            };
            let ct_len: usize = usize::from(head.length);
            let total: usize = hdr_len + ct_len;

            if head.length > self.cfg.max_cipher_in {
                error!("ciphertext length {} over limit", head.length);
                if mode == Mode::Datagram {
                    self.skip(total)?;
                    continue;
                }
                return Err(Error::InvalidRecord);
            }

            if !self.cfg.is_valid(head.ctype) {
                if mode == Mode::Datagram {
                    debug!("dropping record of unconfigured type {:?}", head.ctype);
                    self.skip(total)?;
                    continue;
                }
                error!("record type {:?} not configured", head.ctype);
                return Err(Error::InvalidRecord);
            }

            if self.cfg.version.is_some() && head.version != wire_version(&self.cfg) {
                if mode == Mode::Datagram {
                    debug!("dropping record with version 0x{:04X}", head.version);
                    self.skip(total)?;
                    continue;
                }
                error!("record version 0x{:04X} does not match", head.version);
                return Err(Error::InvalidRecord);
            }

            // which epoch does this record decrypt under?
            let epoch_id: EpochId = match mode {
                Mode::Stream => self.epochs.default_in.unwrap_or(EpochId::MAX),
                Mode::Datagram => head.epoch,
            };
            let readable: bool = self
                .epochs
                .get(epoch_id)
                .map_or(false, |entry| entry.usage.read());
            if !readable {
                if mode == Mode::Datagram {
                    debug!("dropping record under unusable epoch {}", epoch_id);
                    self.skip(total)?;
                    continue;
                }
                if head.ctype == ContentType::ApplicationData
                    && self.cfg.early_data == EarlyDataPolicy::Discard
                {
                    debug!("discarding early data record");
                    self.skip(total)?;
                    continue;
                }
                error!("no readable epoch for incoming record");
                return Err(Error::InvalidRecord);
            }

            let expansion: usize = self
                .epochs
                .get(epoch_id)
                .and_then(|entry| entry.transform.as_ref())
                .map_or(0, |t| t.expansion(usize::from(self.cfg.max_plain_in)));
            if ct_len > usize::from(self.cfg.max_plain_in) + expansion {
                error!("ciphertext length {} over plaintext limit", ct_len);
                if mode == Mode::Datagram {
                    self.skip(total)?;
                    continue;
                }
                return Err(Error::InvalidRecord);
            }

            if mode == Mode::Datagram && self.cfg.anti_replay {
                let replay: bool = self
                    .epochs
                    .get(epoch_id)
                    .map_or(true, |entry| !entry.window.check(head.seq));
                if replay {
                    debug!("dropping replayed sequence {}", head.seq);
                    self.skip(total)?;
                    continue;
                }
            }

            // pull in the whole record and unprotect it in place
            let seq: u64 = match mode {
                Mode::Datagram => head.seq,
                Mode::Stream => self.epochs.get(epoch_id).map_or(0, |entry| entry.in_seq),
            };
            let decrypted: Result<usize, AuthError> = {
                let Self { l1, epochs, .. } = self;
                let entry = epochs.get_mut(epoch_id).ok_or(Error::InvalidRecord)?;
                let span: &mut [u8] = l1.fetch(total)?;
                let payload: &mut [u8] = &mut span[hdr_len..total];
                match entry.transform.as_mut() {
                    Some(t) => t.decrypt(seq, &head, payload),
                    None => Ok(payload.len()),
                }
            };
            let plain_len: usize = match decrypted {
                Ok(plain_len) => plain_len,
                Err(AuthError) => {
                    if mode == Mode::Stream {
                        error!("record failed authentication");
                        return Err(Error::InvalidRecord);
                    }
                    if self.cfg.badmac_limit != 0 && self.inn.bad_mac_ctr >= self.cfg.badmac_limit
                    {
                        error!("bad MAC limit of {} reached", self.cfg.badmac_limit);
                        return Err(Error::InvalidRecord);
                    }
                    self.inn.bad_mac_ctr += 1;
                    warn!("dropping record with bad MAC ({} so far)", self.inn.bad_mac_ctr);
                    self.skip(total)?;
                    continue;
                }
            };

            if plain_len == 0 && !self.cfg.empty_allowed(head.ctype) {
                if mode == Mode::Datagram {
                    debug!("dropping empty {:?} record", head.ctype);
                    self.skip(total)?;
                    continue;
                }
                error!("empty {:?} record not allowed", head.ctype);
                return Err(Error::InvalidRecord);
            }

            // route the plaintext into a reader
            {
                let Self { l1, inn, .. } = self;
                let span: &mut [u8] = l1.fetch(total)?;
                let frag: &[u8] = &span[hdr_len..hdr_len + plain_len];
                if inn.paused.rd.is_paused() && inn.paused.ctype == Some(head.ctype) {
                    trace!("resuming paused {:?} stream", head.ctype);
                    core::mem::swap(&mut inn.active, &mut inn.paused);
                    inn.active.rd.feed(frag).map_err(Error::erase)?;
                    inn.active.epoch = epoch_id;
                } else {
                    debug_assert!(inn.active.rd.is_unset());
                    inn.active.rd.feed(frag).map_err(Error::erase)?;
                    inn.active.ctype = Some(head.ctype);
                    inn.active.epoch = epoch_id;
                }
            }

            // the record is in: advance the incoming sequence state
            if let Some(entry) = self.epochs.get_mut(epoch_id) {
                match mode {
                    Mode::Stream => {
                        entry.in_seq = entry.in_seq.checked_add(1).ok_or(Error::CounterWrap)?;
                    }
                    Mode::Datagram => {
                        if self.cfg.anti_replay {
                            entry.window.update(head.seq);
                        }
                        entry.last_seen = head.seq;
                    }
                }
            }
            if mode == Mode::Datagram && self.cfg.version.is_none() {
                // adopt the version observed on the first valid record
                self.cfg.version = ProtocolVersion::try_from(head.version).ok();
            }

            trace!(
                "record in: type {:?} epoch {} seq {} plaintext {}",
                head.ctype,
                epoch_id,
                seq,
                plain_len
            );
            self.inn.frag = Some(InFrag {
                off: hdr_len,
                len: plain_len,
                fetch_len: total,
            });
            return Ok(());
        }
    }

    // ------------------------------------------------------------------
    // write path
    // ------------------------------------------------------------------

    /// Begin (or extend) writing a record of the given content type under
    /// the given epoch.
    ///
    /// If a record of the same type and epoch is still open and the type
    /// is mergeable, the returned [`RecordWriter`] extends it; otherwise
    /// the open record is dispatched first. Queued bytes of the same type
    /// are preloaded so the record begins with them.
    ///
    /// # Errors
    ///
    /// * [`Error::WantWrite`] if the transport cannot stage a record.
    ///   Non-corrupting; retry.
    /// * [`Error::InvalidArgs`] if the type is not registered or the
    ///   epoch has no write permission.
    pub fn write_start(
        &mut self,
        ctype: ContentType,
        epoch: EpochId,
    ) -> Result<RecordWriter<'_, 'b, L::Error>, Error<L::Error>> {
        if self.out.flush || self.out.clearing {
            self.complete_flush()?;
        }
        // a dropped writer handle leaves its region attached; revoke its
        // uncommitted writes
        self.release_region()?;

        if !self.cfg.is_valid(ctype) {
            return Err(Error::InvalidArgs);
        }
        {
            let entry = self.epochs.get(epoch).ok_or(Error::InvalidArgs)?;
            if !entry.usage.write() {
                return Err(Error::InvalidArgs);
            }
        }

        if self.out.state == OutState::Internal {
            let same: bool = self.out.ctype == Some(ctype) && self.out.epoch == epoch;
            let merge: bool = same
                && self.cfg.is_mergeable(ctype)
                && self.out.written < self.out.cap
                && self.out.wr.queued() == 0;
            if !merge {
                self.dispatch_record()?;
            }
        }
        if self.out.wr.queued() != 0 && (self.out.ctype != Some(ctype) || self.out.epoch != epoch)
        {
            // queued bytes of another stream go out first
            self.drain_queue()?;
        }

        if self.out.state == OutState::Unset {
            debug_assert_eq!(self.out.written, 0);
            self.out.ctype = Some(ctype);
            self.out.epoch = epoch;
            self.open_record()?;
        } else {
            // extend the open record
            let Self { l1, out, .. } = self;
            let span: &mut [u8] = l1.write(out.span_len)?;
            let region: &mut [u8] = &mut span[out.payload_off + out.written..out.payload_off + out.cap];
            out.wr.feed(region).map_err(Error::erase)?;
        }

        let pausable: bool = self.cfg.is_pausable(ctype);
        let Self { l1, out, .. } = self;
        let span: &mut [u8] = l1.write(out.span_len)?;
        let region: &mut [u8] = &mut span[out.payload_off + out.written..out.payload_off + out.cap];
        Ok(RecordWriter {
            out,
            region,
            ctype,
            epoch,
            pausable,
            _err: PhantomData,
        })
    }

    /// Dispatch pending records and push everything to the transport.
    ///
    /// # Errors
    ///
    /// * [`Error::WantWrite`] if the transport cannot take everything
    ///   yet. Non-corrupting: the flush obligation is remembered and the
    ///   next [`write_flush`](Self::write_flush) or
    ///   [`write_start`](Self::write_start) resumes it.
    pub fn write_flush(&mut self) -> Result<(), Error<L::Error>> {
        self.out.flush = true;
        self.complete_flush()
    }

    fn complete_flush(&mut self) -> Result<(), Error<L::Error>> {
        self.release_region()?;
        if self.out.state == OutState::Internal {
            self.dispatch_record()?;
        }
        self.drain_queue()?;
        if self.out.flush {
            self.out.flush = false;
            self.out.clearing = true;
        }
        if self.out.clearing {
            self.l1.flush()?;
            self.out.clearing = false;
        }
        Ok(())
    }

    /// Reclaim a region left attached by a dropped [`RecordWriter`],
    /// revoking its uncommitted writes.
    fn release_region(&mut self) -> Result<(), Error<L::Error>> {
        if !self.out.wr.has_region() {
            return Ok(());
        }
        let Self { l1, out, .. } = self;
        let span: &mut [u8] = l1.write(out.span_len)?;
        let region: &mut [u8] = &mut span[out.payload_off + out.written..out.payload_off + out.cap];
        let r: WriterReclaim = out.wr.reclaim(region).map_err(Error::erase)?;
        out.written += r.payload;
        Ok(())
    }

    /// Stage a fresh record: ask Layer 1 for a write span sized for a
    /// full record, and feed its payload region to the writer. Records
    /// that the queue fills completely are dispatched on the spot.
    fn open_record(&mut self) -> Result<(), Error<L::Error>> {
        loop {
            debug_assert_eq!(self.out.state, OutState::Unset);
            debug_assert!(!self.out.wr.has_region());

            let hdr_len: usize = RecordHeader::len(self.cfg.mode);
            let cap: usize = usize::from(self.cfg.max_plain_out);
            let expansion: usize = self
                .epochs
                .get(self.out.epoch)
                .and_then(|entry| entry.transform.as_ref())
                .map_or(0, |t| t.expansion(cap));
            self.out.payload_off = hdr_len;
            self.out.cap = cap;
            self.out.span_len = hdr_len + cap + expansion;

            let full: bool = {
                let Self { l1, out, .. } = self;
                let span: &mut [u8] = l1.write(out.span_len)?;
                let region: &mut [u8] = &mut span[out.payload_off..out.payload_off + out.cap];
                out.wr.feed(region).map_err(Error::erase)?;
                out.state = OutState::Internal;
                out.wr.queued() != 0
            };
            if !full {
                return Ok(());
            }
            // the queue filled the whole record: send it and open another
            self.release_region()?;
            self.dispatch_record()?;
        }
    }

    /// Drain queued bytes into records of the queued content type.
    fn drain_queue(&mut self) -> Result<(), Error<L::Error>> {
        while self.out.wr.queued() != 0 {
            debug_assert_eq!(self.out.state, OutState::Unset);
            self.open_record()?;
            self.release_region()?;
            self.dispatch_record()?;
        }
        Ok(())
    }

    /// Protect and transmit the staged record, advancing the epoch's
    /// outgoing sequence number.
    fn dispatch_record(&mut self) -> Result<(), Error<L::Error>> {
        debug_assert_eq!(self.out.state, OutState::Internal);
        debug_assert!(!self.out.wr.has_region());

        let ctype: ContentType = self.out.ctype.ok_or(Error::UnexpectedOperation)?;
        let written: usize = self.out.written;

        if written == 0 && !self.cfg.empty_allowed(ctype) {
            // nothing was produced and empty records of this type are
            // not allowed: silently drop the record
            debug!("suppressing empty {:?} record", ctype);
            self.out.state = OutState::Unset;
            return Ok(());
        }

        let version: u16 = wire_version(&self.cfg);
        let mode: Mode = self.cfg.mode;
        let Self {
            l1, epochs, out, ..
        } = self;
        let entry = epochs.get_mut(out.epoch).ok_or(Error::InvalidArgs)?;
        let span: &mut [u8] = l1.write(out.span_len)?;
        let seq: u64 = entry.out_seq;
        let mut head: RecordHeader = RecordHeader {
            ctype,
            version,
            epoch: out.epoch,
            seq,
            length: 0,
        };
        let cipher_len: usize = match entry.transform.as_mut() {
            Some(t) => t.encrypt(seq, &head, &mut span[out.payload_off..out.span_len], written),
            None => written,
        };
        debug_assert!(out.payload_off + cipher_len <= out.span_len);
        head.length = cipher_len as u16;
        let hdr = head.ser(mode);
        span[..out.payload_off].copy_from_slice(&hdr);
        l1.dispatch(out.payload_off + cipher_len)?;
        entry.take_out_seq().map_err(Error::erase)?;
        trace!(
            "record out: type {:?} epoch {} seq {} ciphertext {}",
            ctype,
            out.epoch,
            seq,
            cipher_len
        );
        out.state = OutState::Unset;
        out.written = 0;
        Ok(())
    }
}

/// Reader over the payload of one incoming record.
///
/// Returned by [`RecordLayer::read_start`]. Bytes are served zero-copy
/// from the record where possible; a message resumed from the
/// accumulator is spliced transparently.
///
/// Call [`commit`](Self::commit) after processing bytes; uncommitted
/// bytes are retained (pausable types) or rejected (everything else) at
/// [`done`](Self::done). Dropping the handle without `done` leaves the
/// record attached: the next [`read_start`](RecordLayer::read_start)
/// re-exposes it.
#[derive(Debug)]
pub struct RecordReader<'a, 'b, E> {
    inn: &'a mut InCtx<'b>,
    frag: &'a [u8],
    ctype: ContentType,
    epoch: EpochId,
    pausable: bool,
    _err: PhantomData<E>,
}

impl<'a, 'b, E> RecordReader<'a, 'b, E> {
    /// Content type of the record.
    #[inline]
    pub fn content_type(&self) -> ContentType {
        self.ctype
    }

    /// Epoch the record was protected under.
    #[inline]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Unread bytes remaining, including any resumed backlog.
    #[inline]
    pub fn remain(&self) -> usize {
        self.inn.active.rd.remain()
    }

    /// Request up to `desired` bytes as a contiguous span.
    pub fn get(&mut self, desired: usize) -> Result<&[u8], Error<E>> {
        self.inn
            .active
            .rd
            .get(self.frag, desired)
            .map_err(Error::erase)
    }

    /// Request exactly `desired` bytes as a contiguous span.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfData`] if fewer bytes remain; the cursor does not
    ///   move, and the tail can be retained for the next record via
    ///   [`done`](Self::done) when the type is pausable.
    pub fn get_exact(&mut self, desired: usize) -> Result<&[u8], Error<E>> {
        self.inn
            .active
            .rd
            .get_exact(self.frag, desired)
            .map_err(Error::erase)
    }

    /// Read up to `buf.len()` bytes into `buf`, returning the count.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error<E>> {
        let n: usize = core::cmp::min(buf.len(), self.remain());
        let span: &[u8] = self.get(n)?;
        buf[..n].copy_from_slice(span);
        Ok(n)
    }

    /// Read exactly `buf.len()` bytes into `buf`.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error<E>> {
        let span: &[u8] = self.get_exact(buf.len())?;
        buf.copy_from_slice(span);
        Ok(())
    }

    /// Mark all bytes read so far as processed.
    #[inline]
    pub fn commit(&mut self) {
        self.inn.active.rd.commit();
    }

    /// Release the record.
    ///
    /// Committed bytes are gone. Uncommitted bytes of a pausable type
    /// are retained and replayed when the next record of the same type
    /// arrives; on any other type they make the record invalid.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidRecord`] if unprocessed bytes remain on a
    ///   non-pausable type. Fatal.
    /// * [`Error::NeedsAccumulator`] if retention is required but no
    ///   accumulator is available (for instance while another stream is
    ///   paused). Fatal.
    pub fn done(self) -> Result<(), Error<E>> {
        if self.inn.active.rd.uncommitted() != 0 && !self.pausable {
            error!("unconsumed bytes in non-pausable {:?} record", self.ctype);
            return Err(Error::InvalidRecord);
        }
        let pending: usize = self
            .inn
            .active
            .rd
            .reclaim(self.frag)
            .map_err(Error::erase)?;
        self.inn.frag = None;
        self.inn.consume_pending = true;
        if pending == 0 {
            self.inn.active.ctype = None;
        } else {
            trace!("pausing {:?} stream, {} byte backlog", self.ctype, pending);
            core::mem::swap(&mut self.inn.active, &mut self.inn.paused);
        }
        Ok(())
    }
}

/// Writer into the payload of one outgoing record.
///
/// Returned by [`RecordLayer::write_start`]. Bytes written land directly
/// in the transport's staging buffer; [`done`](Self::done) commits them.
/// The record itself is dispatched by a later
/// [`write_start`](RecordLayer::write_start) of a different stream, or by
/// [`write_flush`](RecordLayer::write_flush).
///
/// Dropping the handle without `done` revokes the bytes written through
/// it.
#[derive(Debug)]
pub struct RecordWriter<'a, 'b, E> {
    out: &'a mut OutCtx<'b>,
    region: &'a mut [u8],
    ctype: ContentType,
    epoch: EpochId,
    pausable: bool,
    _err: PhantomData<E>,
}

impl<'a, 'b, E> RecordWriter<'a, 'b, E> {
    /// Content type of the record.
    #[inline]
    pub fn content_type(&self) -> ContentType {
        self.ctype
    }

    /// Epoch the record will be protected under.
    #[inline]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Free payload bytes remaining in the record.
    #[inline]
    pub fn space(&self) -> usize {
        self.out.wr.space()
    }

    /// Request a span of exactly `desired` bytes to fill.
    ///
    /// For pausable types the span may spill into the queue, to be
    /// carried into the next record of the same type.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfMemory`] if the span fits neither the record nor
    ///   (for pausable types) the queue.
    pub fn get(&mut self, desired: usize) -> Result<&mut [u8], Error<E>> {
        if !self.pausable && desired > self.out.wr.space() {
            return Err(Error::OutOfMemory);
        }
        self.out
            .wr
            .get(&mut *self.region, desired)
            .map_err(Error::erase)
    }

    /// Write all of `buf` into the record (spilling into the queue for
    /// pausable types).
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfMemory`] if the bytes do not fit.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), Error<E>> {
        let span: &mut [u8] = self.get(buf.len())?;
        span.copy_from_slice(buf);
        Ok(())
    }

    /// Write as much of `buf` as fits the record, returning the count.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error<E>> {
        let n: usize = core::cmp::min(buf.len(), self.out.wr.space());
        if n != 0 {
            let span: &mut [u8] = self
                .out
                .wr
                .get(&mut *self.region, n)
                .map_err(Error::erase)?;
            span.copy_from_slice(&buf[..n]);
        }
        Ok(n)
    }

    /// Commit the bytes written through this handle into the record.
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedOperation`] if the writer state was
    ///   corrupted; cannot occur through this API.
    pub fn done(self) -> Result<(), Error<E>> {
        self.out.wr.commit();
        let r: WriterReclaim = self
            .out
            .wr
            .reclaim(self.region)
            .map_err(Error::erase)?;
        self.out.written += r.payload;
        if r.queued != 0 {
            trace!("{} bytes queued for the next {:?} record", r.queued, self.ctype);
        }
        Ok(())
    }
}
