//! Termination protocol wire format
//!
//! Two message kinds travel between workers, nothing else.
//!
//! # Message Flow
//!
//! ```text
//! Rank j (finished)          Rank 0                 Rank k
//!     |                        |                       |
//!     |---- KILL_ALL --------->|  (announcement)       |
//!     |                        |                       |
//!     |<--- KILL_ALL{b,j} -----|---- KILL_ALL{b',j} -->|  (broadcast, O(log N) hops)
//!     |                        |                       |
//!     |-- SENDING_RESULTS ---->|                       |
//!     |                        |                       |
//!   exit                  arbitrate, report          exit
//! ```
//!
//! # Frame Format
//!
//! The TCP transport prefixes every frame with a 4-byte little-endian length:
//!
//! ```text
//! [4 bytes: frame length][N bytes: MessagePack-encoded Frame]
//! ```
//!
//! The in-process transport moves [`Envelope`]s directly and never encodes.

use super::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Worker identifier in `[0, N)`
pub type Rank = usize;

/// The rank that collects results and reports
pub const ROOT: Rank = 0;

/// Protocol version exchanged in the TCP hello
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the fixed result buffer; rendered rows are clipped to one byte less
pub const RESULTS_MSG_SIZE: usize = 256;

/// Largest frame the codec accepts
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Announce or propagate termination
    KillAll,
    /// The winner's rendered result row
    SendingResults,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::KillAll => "KILL_ALL",
            Tag::SendingResults => "SENDING_RESULTS",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kill token carried by `KILL_ALL`
///
/// `bound` is the number of consecutive ranks, starting at the receiver, that the
/// receiver is responsible for notifying (itself included). `origin` is the rank
/// whose result terminates the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KillToken {
    pub bound: usize,
    pub origin: Rank,
}

impl KillToken {
    pub fn new(bound: usize, origin: Rank) -> Self {
        Self { bound, origin }
    }

    /// Completion notice a non-root worker sends to rank 0
    ///
    /// Rank 0 only looks at the sender of an announcement, never at its payload.
    pub fn announcement(origin: Rank) -> Self {
        Self { bound: 0, origin }
    }

    pub fn to_payload(self) -> [usize; 2] {
        [self.bound, self.origin]
    }

    pub fn from_payload(payload: [usize; 2]) -> Self {
        Self {
            bound: payload[0],
            origin: payload[1],
        }
    }
}

/// Application message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    KillAll(KillToken),
    SendingResults(String),
}

impl Packet {
    pub fn tag(&self) -> Tag {
        match self {
            Packet::KillAll(_) => Tag::KillAll,
            Packet::SendingResults(_) => Tag::SendingResults,
        }
    }

    /// Build a results packet, clipping the row to the fixed result buffer
    pub fn results(rendered: &str) -> Self {
        Packet::SendingResults(clip_to_buffer(rendered).to_string())
    }

    /// The two payload words as stored in a message buffer
    ///
    /// Result text does not fit the fixed payload and reads as zeros.
    pub fn payload(&self) -> [usize; 2] {
        match self {
            Packet::KillAll(token) => token.to_payload(),
            Packet::SendingResults(_) => [0, 0],
        }
    }
}

/// A received packet together with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: Rank,
    pub packet: Packet,
}

impl Envelope {
    pub fn new(source: Rank, packet: Packet) -> Self {
        Self { source, packet }
    }

    pub fn tag(&self) -> Tag {
        self.packet.tag()
    }
}

/// Connection hello for the TCP mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub protocol_version: u32,
    pub rank: Rank,
    pub fleet_size: usize,
}

/// Unit of the TCP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Hello(HelloMessage),
    Packet(Packet),
}

/// Clip `text` to `RESULTS_MSG_SIZE - 1` bytes on a character boundary
pub fn clip_to_buffer(text: &str) -> &str {
    let max = RESULTS_MSG_SIZE - 1;
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encode a frame with its length prefix
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, TransportError> {
    let body = rmp_serde::to_vec(frame)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Decode one frame from the front of `buf`
///
/// Returns the frame and the number of bytes consumed, length prefix included.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), TransportError> {
    if buf.len() < 4 {
        return Err(TransportError::Incomplete {
            need: 4,
            got: buf.len(),
        });
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    if buf.len() < 4 + len {
        return Err(TransportError::Incomplete {
            need: 4 + len,
            got: buf.len(),
        });
    }

    let frame = rmp_serde::from_slice(&buf[4..4 + len])?;
    Ok((frame, 4 + len))
}

/// Read one complete frame from a stream
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(rmp_serde::from_slice(&body)?)
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let framed = encode_frame(frame)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_token_payload() {
        let token = KillToken::new(7, 3);
        assert_eq!(token.to_payload(), [7, 3]);
        assert_eq!(KillToken::from_payload([7, 3]), token);
        assert_eq!(KillToken::announcement(5).bound, 0);
    }

    #[test]
    fn test_packet_tags() {
        assert_eq!(Packet::KillAll(KillToken::new(4, 1)).tag(), Tag::KillAll);
        assert_eq!(Packet::results("|x|y|1|").tag(), Tag::SendingResults);
        assert_eq!(Packet::results("|x|y|1|").payload(), [0, 0]);
        assert_eq!(Tag::KillAll.to_string(), "KILL_ALL");
    }

    #[test]
    fn test_results_are_clipped() {
        let long = "é".repeat(RESULTS_MSG_SIZE);
        match Packet::results(&long) {
            Packet::SendingResults(text) => {
                assert!(text.len() < RESULTS_MSG_SIZE);
                assert!(text.chars().all(|c| c == 'é'));
            }
            _ => panic!("Wrong packet type"),
        }

        assert_eq!(clip_to_buffer("short"), "short");
    }

    #[test]
    fn test_frame_prefix_and_decode() {
        let frame = Frame::Packet(Packet::KillAll(KillToken::new(8, 2)));
        let bytes = encode_frame(&frame).unwrap();

        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + len);

        let (decoded, consumed) = decode_frame(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::Hello(HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            rank: 1,
            fleet_size: 4,
        });
        let bytes = encode_frame(&frame).unwrap();

        assert!(matches!(
            decode_frame(&bytes[..2]),
            Err(TransportError::Incomplete { need: 4, .. })
        ));
        assert!(matches!(
            decode_frame(&bytes[..bytes.len() - 1]),
            Err(TransportError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_prefix() {
        let mut bytes = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decode_frame(&bytes),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = Frame::Packet(Packet::results("|* 1/(2/4) | 0 | 50 |"));

        write_frame(&mut client, &sent).await.unwrap();
        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }
}
