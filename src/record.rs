use crate::config::Mode;

/// Record content type.
///
/// # References
///
/// * [RFC 8446 Section 5.1](https://datatracker.ietf.org/doc/html/rfc8446#section-5.1)
/// * [RFC 9147 Section 4](https://datatracker.ietf.org/doc/html/rfc9147#section-4)
///
/// ```text
/// enum {
///     invalid(0),
///     change_cipher_spec(20),
///     alert(21),
///     handshake(22),
///     application_data(23),
///     ack(25),
///     (255)
/// } ContentType;
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContentType {
    /// Change cipher spec.
    ChangeCipherSpec = 20,
    /// Alert.
    Alert = 21,
    /// Handshake.
    Handshake = 22,
    /// Application data.
    ApplicationData = 23,
    /// Record acknowledgement (DTLS 1.3).
    Ack = 25,
}

impl From<ContentType> for u8 {
    #[inline]
    fn from(content_type: ContentType) -> Self {
        content_type as u8
    }
}

impl TryFrom<u8> for ContentType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            x if x == (Self::ChangeCipherSpec as u8) => Ok(Self::ChangeCipherSpec),
            x if x == (Self::Alert as u8) => Ok(Self::Alert),
            x if x == (Self::Handshake as u8) => Ok(Self::Handshake),
            x if x == (Self::ApplicationData as u8) => Ok(Self::ApplicationData),
            x if x == (Self::Ack as u8) => Ok(Self::Ack),
            _ => Err(value),
        }
    }
}

impl ContentType {
    /// Bit of this content type in a [`Config`](crate::Config) flag set.
    ///
    /// Content types occupy the range `0..32`, one bit each.
    #[inline]
    pub(crate) const fn mask(self) -> u32 {
        1 << (self as u8)
    }
}

/// Protocol version as it appears in the record header.
///
/// DTLS versions are the one's complement of the corresponding TLS minor
/// version, hence the inverted wire values.
///
/// # References
///
/// * [RFC 5246 Appendix E](https://datatracker.ietf.org/doc/html/rfc5246#appendix-E)
/// * [RFC 6347 Section 4.1](https://datatracker.ietf.org/doc/html/rfc6347#section-4.1)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolVersion {
    /// TLS v1.2.
    Tls12 = 0x0303,
    /// TLS v1.3.
    ///
    /// On the wire TLS v1.3 records carry the v1.2 value; this variant
    /// exists for configuration purposes.
    Tls13 = 0x0304,
    /// DTLS v1.0.
    Dtls10 = 0xFEFF,
    /// DTLS v1.2.
    Dtls12 = 0xFEFD,
}

impl From<ProtocolVersion> for u16 {
    #[inline]
    fn from(version: ProtocolVersion) -> Self {
        version as u16
    }
}

impl TryFrom<u16> for ProtocolVersion {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            x if x == (Self::Tls12 as u16) => Ok(Self::Tls12),
            x if x == (Self::Tls13 as u16) => Ok(Self::Tls13),
            x if x == (Self::Dtls10 as u16) => Ok(Self::Dtls10),
            x if x == (Self::Dtls12 as u16) => Ok(Self::Dtls12),
            _ => Err(value),
        }
    }
}

/// Length of a TLS record header.
pub(crate) const STREAM_HDR_LEN: usize = 5;
/// Length of a DTLS record header (epoch and explicit sequence number).
pub(crate) const DATAGRAM_HDR_LEN: usize = 13;

/// Largest record header of either transport mode.
pub(crate) const MAX_HDR_LEN: usize = DATAGRAM_HDR_LEN;

/// Explicit sequence numbers are 48-bit on the wire.
pub(crate) const SEQ_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// A parsed (D)TLS record header.
///
/// ```text
/// struct {
///     ContentType type;
///     ProtocolVersion legacy_record_version;
///     uint16 epoch;                          // DTLS only
///     uint48 sequence_number;                // DTLS only
///     uint16 length;
///     opaque fragment[length];
/// } TLSCiphertext;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordHeader {
    /// Record content type.
    pub ctype: ContentType,
    /// Raw protocol version field.
    pub version: u16,
    /// Epoch field; `0` in stream mode where the wire carries none.
    pub epoch: u16,
    /// Explicit sequence number; `0` in stream mode.
    pub seq: u64,
    /// Ciphertext length.
    pub length: u16,
}

/// Reasons a header fails structural parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum HeaderError {
    /// The content type octet is not a known [`ContentType`].
    BadContentType(u8),
    /// Fewer bytes than a header for this transport mode.
    Truncated,
}

impl RecordHeader {
    /// Header length for the given transport mode.
    #[inline]
    pub(crate) const fn len(mode: Mode) -> usize {
        match mode {
            Mode::Stream => STREAM_HDR_LEN,
            Mode::Datagram => DATAGRAM_HDR_LEN,
        }
    }

    /// Parse a header from the start of `buf`.
    ///
    /// This is structural only; policy checks (allowed types, length
    /// limits, version pinning) belong to the record layer.
    pub(crate) fn deser(mode: Mode, buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < Self::len(mode) {
            return Err(HeaderError::Truncated);
        }

        let ctype: ContentType =
            ContentType::try_from(buf[0]).map_err(HeaderError::BadContentType)?;
        let version: u16 = u16::from_be_bytes([buf[1], buf[2]]);

        match mode {
            Mode::Stream => Ok(Self {
                ctype,
                version,
                epoch: 0,
                seq: 0,
                length: u16::from_be_bytes([buf[3], buf[4]]),
            }),
            Mode::Datagram => {
                let epoch: u16 = u16::from_be_bytes([buf[3], buf[4]]);
                let mut seq: u64 = 0;
                for byte in &buf[5..11] {
                    seq = (seq << 8) | u64::from(*byte);
                }
                Ok(Self {
                    ctype,
                    version,
                    epoch,
                    seq,
                    length: u16::from_be_bytes([buf[11], buf[12]]),
                })
            }
        }
    }

    /// Serialize for the given transport mode.
    pub(crate) fn ser(&self, mode: Mode) -> heapless::Vec<u8, MAX_HDR_LEN> {
        let mut buf: heapless::Vec<u8, MAX_HDR_LEN> = heapless::Vec::new();
        // MAX_HDR_LEN bounds both header forms, unwrap will never panic
        buf.push(self.ctype.into()).unwrap();
        buf.extend_from_slice(&self.version.to_be_bytes()).unwrap();
        if mode == Mode::Datagram {
            buf.extend_from_slice(&self.epoch.to_be_bytes()).unwrap();
            let seq: [u8; 8] = (self.seq & SEQ_MASK).to_be_bytes();
            buf.extend_from_slice(&seq[2..8]).unwrap();
        }
        buf.extend_from_slice(&self.length.to_be_bytes()).unwrap();
        buf
    }
}
