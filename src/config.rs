use crate::{
    record::{ContentType, ProtocolVersion},
    Error,
};

/// Transport mode of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Reliable in-order byte stream (TLS).
    Stream,
    /// Unreliable datagrams (DTLS).
    Datagram,
}

/// Policy for stream-mode records that arrive under an epoch without read
/// permission, such as unauthenticated TLS 1.3 early data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EarlyDataPolicy {
    /// Skip the record without surfacing an error.
    Discard,
    /// Treat the record as invalid and fail the connection.
    Reject,
}

/// Maximum plaintext fragment length.
///
/// # References
///
/// * [RFC 5246 Section 6.2.1](https://datatracker.ietf.org/doc/html/rfc5246#section-6.2.1)
pub const MAX_PLAIN_LEN: u16 = 16384;

/// Maximum ciphertext fragment length.
///
/// # References
///
/// * [RFC 5246 Section 6.2.3](https://datatracker.ietf.org/doc/html/rfc5246#section-6.2.3)
pub const MAX_CIPHER_LEN: u16 = MAX_PLAIN_LEN + 2048;

/// Record layer configuration.
///
/// A configuration is assembled up-front and handed to
/// [`RecordLayer::new`](crate::RecordLayer::new); it does not change over
/// the lifetime of a connection.
///
/// # Example
///
/// ```
/// use tls_mps::{Config, ContentType, Mode};
///
/// let mut cfg: Config = Config::new(Mode::Stream);
/// // handshake messages may span records and share records
/// cfg.add_type(ContentType::Handshake, true, true, false)?;
/// cfg.add_type(ContentType::ApplicationData, false, false, true)?;
/// cfg.add_type(ContentType::Alert, false, true, false)?;
/// # Ok::<(), tls_mps::Error>(())
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub(crate) mode: Mode,
    pub(crate) version: Option<ProtocolVersion>,
    pub(crate) max_plain_in: u16,
    pub(crate) max_plain_out: u16,
    pub(crate) max_cipher_in: u16,
    pub(crate) anti_replay: bool,
    pub(crate) badmac_limit: u32,
    pub(crate) early_data: EarlyDataPolicy,
    // one bit per content type value
    valid: u32,
    pausable: u32,
    mergeable: u32,
    empty: u32,
}

impl Config {
    /// Create a configuration for the given transport mode.
    ///
    /// No content type is valid until registered with
    /// [`add_type`](Self::add_type).
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            version: None,
            max_plain_in: MAX_PLAIN_LEN,
            max_plain_out: MAX_PLAIN_LEN,
            max_cipher_in: MAX_CIPHER_LEN,
            anti_replay: true,
            badmac_limit: 0,
            early_data: EarlyDataPolicy::Discard,
            valid: 0,
            pausable: 0,
            mergeable: 0,
            empty: 0,
        }
    }

    /// Register a content type.
    ///
    /// * `pausable` - messages of this type may span multiple records;
    ///   partial messages are held in the accumulator across records.
    /// * `mergeable` - successive messages of this type may share a single
    ///   outgoing record.
    /// * `empty` - records of this type may have an empty body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if the type is already registered.
    pub fn add_type(
        &mut self,
        ctype: ContentType,
        pausable: bool,
        mergeable: bool,
        empty: bool,
    ) -> Result<(), Error> {
        let mask: u32 = ctype.mask();
        if self.valid & mask != 0 {
            return Err(Error::InvalidArgs);
        }
        self.valid |= mask;
        if pausable {
            self.pausable |= mask;
        }
        if mergeable {
            self.mergeable |= mask;
        }
        if empty {
            self.empty |= mask;
        }
        Ok(())
    }

    /// Pin the protocol version.
    ///
    /// Unpinned, the version field of incoming records is not checked; in
    /// datagram mode the version observed on the first valid record is
    /// adopted.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = Some(version);
    }

    /// Set the maximum plaintext length accepted in incoming records.
    pub fn set_max_plain_in(&mut self, len: u16) {
        self.max_plain_in = len;
    }

    /// Set the maximum plaintext length of outgoing records.
    pub fn set_max_plain_out(&mut self, len: u16) {
        self.max_plain_out = len;
    }

    /// Set the maximum ciphertext length accepted in incoming records.
    pub fn set_max_cipher_in(&mut self, len: u16) {
        self.max_cipher_in = len;
    }

    /// Enable or disable datagram anti-replay protection.
    ///
    /// Enabled by default; ignored in stream mode.
    pub fn set_anti_replay(&mut self, enable: bool) {
        self.anti_replay = enable;
    }

    /// Number of datagram records failing authentication after which the
    /// connection fails.
    ///
    /// `0` (the default) disables the limit.
    pub fn set_badmac_limit(&mut self, limit: u32) {
        self.badmac_limit = limit;
    }

    /// Set the policy for stream-mode records under an epoch without read
    /// permission.
    pub fn set_early_data(&mut self, policy: EarlyDataPolicy) {
        self.early_data = policy;
    }

    pub(crate) fn is_valid(&self, ctype: ContentType) -> bool {
        self.valid & ctype.mask() != 0
    }

    pub(crate) fn is_pausable(&self, ctype: ContentType) -> bool {
        self.pausable & ctype.mask() != 0
    }

    pub(crate) fn is_mergeable(&self, ctype: ContentType) -> bool {
        self.mergeable & ctype.mask() != 0
    }

    pub(crate) fn empty_allowed(&self, ctype: ContentType) -> bool {
        self.empty & ctype.mask() != 0
    }
}
