//! Demultiplexer for the container runtime's combined exec stream.
//!
//! The runtime multiplexes stdout and stderr over one connection as
//! length-prefixed binary frames: an 8-byte header (stream tag, three
//! zero padding bytes, u32 payload length) followed by the payload.
//! Reads land on arbitrary byte boundaries, so a partial frame must be
//! carried over to the next read as a `tail`.

/// Size of a frame header: tag byte, 3 padding bytes, u32 length.
pub const FRAME_HEADER_LEN: usize = 8;

/// Stream tags accepted in the first header byte: stdin (0), stdout
/// (1), stderr (2), and a reserved tag (3).
const MAX_STREAM_TAG: u8 = 3;

/// Byte order of the frame length field.
///
/// The Docker stream format is big-endian on the wire; `Native` exists
/// for runtimes that encode in the host's order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
    Native,
}

impl ByteOrder {
    /// Parse a config string. Unrecognized values fall back to
    /// big-endian with a warning.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "big" => Self::Big,
            "little" => Self::Little,
            "native" => Self::Native,
            other => {
                tracing::warn!(value = %other, "unrecognized frame byte order, using big-endian");
                Self::Big
            },
        }
    }

    fn decode_len(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Big => u32::from_be_bytes(bytes),
            Self::Little => u32::from_le_bytes(bytes),
            Self::Native => u32::from_ne_bytes(bytes),
        }
    }
}

fn is_stream_tag(byte: u8) -> bool {
    byte <= MAX_STREAM_TAG
}

/// Decode every complete frame in `tail + data`.
///
/// Returns the concatenated frame payloads plus the new tail: the
/// unconsumed remainder of an incomplete frame, to be passed back in on
/// the next read. Bytes that do not form a plausible frame header are
/// passed through verbatim one byte at a time, so non-framed output
/// degrades gracefully instead of being dropped.
pub fn decode_frames(tail: &[u8], data: &[u8], order: ByteOrder) -> (Vec<u8>, Vec<u8>) {
    let mut window = Vec::with_capacity(tail.len() + data.len());
    window.extend_from_slice(tail);
    window.extend_from_slice(data);

    let mut decoded = Vec::new();
    let mut pos = 0;

    while pos < window.len() {
        let rest = &window[pos..];

        if rest.len() < FRAME_HEADER_LEN {
            // Too short for a header. Defer only if this could be the
            // start of a frame; otherwise it is stray data.
            if is_stream_tag(rest[0]) {
                return (decoded, rest.to_vec());
            }
            decoded.push(rest[0]);
            pos += 1;
            continue;
        }

        let padding_zero = rest[1] == 0 && rest[2] == 0 && rest[3] == 0;
        if !is_stream_tag(rest[0]) || !padding_zero {
            // Not a frame header: pass a single byte through and rescan.
            decoded.push(rest[0]);
            pos += 1;
            continue;
        }

        let len = order.decode_len([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let payload = &rest[FRAME_HEADER_LEN..];
        if payload.len() < len {
            // Header seen but payload still in flight: defer header and
            // partial payload together.
            return (decoded, rest.to_vec());
        }

        decoded.extend_from_slice(&payload[..len]);
        pos += FRAME_HEADER_LEN + len;
    }

    (decoded, Vec::new())
}

/// Stateful wrapper threading the tail between successive reads.
///
/// A single demuxer must not be fed from two threads concurrently; the
/// tail is mutable state owned by one background command.
#[derive(Debug, Default)]
pub struct StreamDemuxer {
    order: ByteOrder,
    tail: Vec<u8>,
}

impl StreamDemuxer {
    #[must_use]
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            tail: Vec::new(),
        }
    }

    /// Decode the next chunk of raw stream bytes.
    pub fn decode(&mut self, data: &[u8]) -> Vec<u8> {
        let (decoded, tail) = decode_frames(&self.tail, data, self.order);
        self.tail = tail;
        decoded
    }

    /// Surrender the tail at end-of-stream.
    ///
    /// A non-empty tail at this point is a truncated frame (or short
    /// non-framed output); the caller appends it verbatim rather than
    /// dropping it.
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tail)
    }

    #[must_use]
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }
}
