use byteorder::{ByteOrder, LittleEndian};
use std::fmt::{Debug, Formatter};

const READ_CHUNK_LEN: usize = 4096;
const LEN_FIELD: usize = std::mem::size_of::<i32>();

/// Smallest valid value of a frame's length field: id, type and the two null terminators.
pub const MIN_FRAME_LEN: usize = 2 * std::mem::size_of::<i32>() + 2;

/// Wire code of an RCON packet type.
///
/// The protocol reuses the same code for different packets depending on direction, so
/// [`PacketType::EXEC_COMMAND`] and [`PacketType::AUTH_RESPONSE`] compare equal. Codes that are not
/// listed here are still carried through unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub i32);

impl PacketType {
    /// Login request, sent by the client with the password as body.
    pub const AUTH: PacketType = PacketType(3);
    /// Command request, sent by the client.
    pub const EXEC_COMMAND: PacketType = PacketType(2);
    /// Login response, sent by the server.
    pub const AUTH_RESPONSE: PacketType = PacketType(2);
    /// Command output, sent by the server.
    pub const RESPONSE_VALUE: PacketType = PacketType(0);
}

impl Debug for PacketType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            3 => f.write_str("Auth"),
            2 => f.write_str("ExecCommand/AuthResponse"),
            0 => f.write_str("ResponseValue"),
            code => write!(f, "Unknown({})", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: PacketType,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: PacketType, body: impl Into<String>) -> Self {
        Packet {
            id,
            kind,
            body: body.into(),
        }
    }
}

/// Failure to decode a frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ends before the frame does. Read more bytes and try again.
    #[error("incomplete frame")]
    NeedMoreData,

    #[error("{0}")]
    Malformed(String),
}

/// Encode a packet into a complete frame, including the length prefix.
///
/// Fails if the body contains a null byte, which would terminate it early on the wire.
pub fn encode(id: i32, kind: PacketType, body: &str) -> crate::Result<Vec<u8>> {
    check_body(body, usize::MAX)?;

    let mut buf = Vec::with_capacity(LEN_FIELD + MIN_FRAME_LEN + body.len());

    // Insert a placeholder for the frame length
    buf.extend_from_slice(&[0; LEN_FIELD]);
    push_i32(&mut buf, id);
    push_i32(&mut buf, kind.0);
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);

    // Set the frame length to the actual value
    let frame_len = (buf.len() - LEN_FIELD) as i32;
    LittleEndian::write_i32(&mut buf[..LEN_FIELD], frame_len);

    Ok(buf)
}

/// Check that `body` can be sent in a frame no longer than `max_frame_len`.
pub(crate) fn check_body(body: &str, max_frame_len: usize) -> crate::Result<()> {
    if body.as_bytes().contains(&0) {
        return Err(crate::Error::InvalidCommand("body contains a null byte"));
    }
    if body.len() > max_frame_len.saturating_sub(MIN_FRAME_LEN) {
        return Err(crate::Error::InvalidCommand("body does not fit in a frame"));
    }
    Ok(())
}

fn push_i32(buf: &mut Vec<u8>, val: i32) {
    let mut bytes = [0; 4];
    LittleEndian::write_i32(&mut bytes, val);
    buf.extend_from_slice(&bytes);
}

/// Decode the frame at the start of `buf`.
///
/// Returns the packet and the number of bytes it occupied. Frames whose length field exceeds
/// `max_frame_len` are rejected as soon as the length field is available, without waiting for
/// the rest of the frame.
pub fn decode(buf: &[u8], max_frame_len: usize) -> Result<(Packet, usize), DecodeError> {
    if buf.len() < LEN_FIELD {
        return Err(DecodeError::NeedMoreData);
    }

    let (len_bytes, remaining_bytes) = buf.split_at(LEN_FIELD);
    let declared_len = LittleEndian::read_i32(len_bytes);
    if declared_len < 0 {
        return Err(DecodeError::Malformed(format!(
            "negative frame length {}",
            declared_len
        )));
    }

    let frame_len = declared_len as usize;
    if frame_len < MIN_FRAME_LEN {
        return Err(DecodeError::Malformed(format!(
            "frame length {} is below the minimum of {}",
            frame_len, MIN_FRAME_LEN
        )));
    }
    if frame_len > max_frame_len {
        return Err(DecodeError::Malformed(format!(
            "frame length {} exceeds the maximum of {}",
            frame_len, max_frame_len
        )));
    }
    if remaining_bytes.len() < frame_len {
        return Err(DecodeError::NeedMoreData);
    }

    let frame = &remaining_bytes[..frame_len];
    let id = LittleEndian::read_i32(&frame[0..4]);
    let kind = PacketType(LittleEndian::read_i32(&frame[4..8]));

    let (body, terminators) = frame[8..].split_at(frame_len - MIN_FRAME_LEN);
    if terminators != [0, 0] {
        return Err(DecodeError::Malformed(
            "frame is missing its null terminators".to_string(),
        ));
    }

    let packet = Packet {
        id,
        kind,
        body: String::from_utf8_lossy(body).into_owned(),
    };
    Ok((packet, LEN_FIELD + frame_len))
}

/// Receive buffer that accumulates bytes from any number of reads and yields complete packets.
#[derive(Debug)]
pub(crate) struct FrameBuffer {
    buffer: Vec<u8>,
    read_offset: usize,
    spare: usize,
    max_frame_len: usize,
}

impl FrameBuffer {
    pub fn new(max_frame_len: usize) -> Self {
        FrameBuffer {
            buffer: Vec::new(),
            read_offset: 0,
            spare: 0,
            max_frame_len,
        }
    }

    /// Pop the next complete packet, if the buffered bytes hold one.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        let filled = self.buffer.len() - self.spare;
        match decode(&self.buffer[self.read_offset..filled], self.max_frame_len) {
            Ok((packet, consumed)) => {
                self.read_offset += consumed;
                Ok(Some(packet))
            }
            Err(DecodeError::NeedMoreData) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Space to read into. Must be followed by [`FrameBuffer::commit`] with the number of bytes
    /// actually written.
    pub fn read_space(&mut self) -> &mut [u8] {
        self.discard_spare();

        // If all of the buffer has been consumed, it can be completely re-used
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        }

        let write_start = self.buffer.len();
        self.buffer.resize(write_start + READ_CHUNK_LEN, 0);
        self.spare = READ_CHUNK_LEN;

        &mut self.buffer[write_start..]
    }

    pub fn commit(&mut self, written: usize) {
        let filled = self.buffer.len() - self.spare + written.min(self.spare);
        self.buffer.truncate(filled);
        self.spare = 0;
    }

    /// Whether a partial frame is sitting in the buffer.
    pub fn has_partial(&self) -> bool {
        self.read_offset < self.buffer.len() - self.spare
    }

    fn discard_spare(&mut self) {
        let filled = self.buffer.len() - self.spare;
        self.buffer.truncate(filled);
        self.spare = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 4096;

    #[test]
    fn encodes_the_documented_layout() {
        let frame = encode(7, PacketType::EXEC_COMMAND, "list").unwrap();
        assert_eq!(
            frame,
            [
                14, 0, 0, 0, // length
                7, 0, 0, 0, // id
                2, 0, 0, 0, // type
                b'l', b'i', b's', b't', 0, 0,
            ]
        );
    }

    #[test]
    fn round_trips_through_decode() {
        let cases = [
            (0, PacketType::RESPONSE_VALUE, ""),
            (-1, PacketType::AUTH_RESPONSE, ""),
            (42, PacketType::AUTH, "hunter2"),
            (i32::MAX, PacketType(17), "Alice has 3 scores:\n[money]: 1,200 §a"),
        ];

        for (id, kind, body) in cases {
            let frame = encode(id, kind, body).unwrap();
            let (packet, consumed) = decode(&frame, MAX).unwrap();
            assert_eq!(packet, Packet::new(id, kind, body));
            assert_eq!(consumed, frame.len());
        }
    }

    #[test]
    fn rejects_null_bytes_in_body() {
        assert!(matches!(
            encode(1, PacketType::EXEC_COMMAND, "say a\0b"),
            Err(crate::Error::InvalidCommand(_))
        ));
    }

    #[test]
    fn rejects_bodies_longer_than_a_frame() {
        assert!(check_body("list", 14).is_ok());
        assert!(matches!(
            check_body("lists", 14),
            Err(crate::Error::InvalidCommand(_))
        ));
    }

    #[test]
    fn short_buffers_need_more_data() {
        let frame = encode(3, PacketType::RESPONSE_VALUE, "hello").unwrap();
        for end in 0..frame.len() {
            assert_eq!(decode(&frame[..end], MAX), Err(DecodeError::NeedMoreData));
        }
    }

    #[test]
    fn rejects_bad_lengths() {
        let negative = [0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode(&negative, MAX), Err(DecodeError::Malformed(_))));

        let too_short = [9, 0, 0, 0];
        assert!(matches!(decode(&too_short, MAX), Err(DecodeError::Malformed(_))));

        // Rejected from the length field alone, without the rest of the frame
        let huge = [0, 0, 1, 0];
        assert!(matches!(decode(&huge, MAX), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_terminators() {
        let mut frame = encode(3, PacketType::RESPONSE_VALUE, "abc").unwrap();
        let last = frame.len() - 1;
        frame[last] = b'x';
        assert!(matches!(decode(&frame, MAX), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn frame_buffer_reassembles_split_reads() {
        let mut bytes = encode(1, PacketType::RESPONSE_VALUE, "first").unwrap();
        bytes.extend(encode(2, PacketType::RESPONSE_VALUE, "second").unwrap());

        let mut buffer = FrameBuffer::new(MAX);
        let mut packets = Vec::new();
        for chunk in bytes.chunks(3) {
            let space = buffer.read_space();
            space[..chunk.len()].copy_from_slice(chunk);
            buffer.commit(chunk.len());

            while let Some(packet) = buffer.next_packet().unwrap() {
                packets.push(packet);
            }
        }

        assert_eq!(
            packets,
            [
                Packet::new(1, PacketType::RESPONSE_VALUE, "first"),
                Packet::new(2, PacketType::RESPONSE_VALUE, "second"),
            ]
        );
        assert!(!buffer.has_partial());
    }

    #[test]
    fn frame_buffer_ignores_uncommitted_space() {
        let frame = encode(5, PacketType::RESPONSE_VALUE, "ok").unwrap();

        let mut buffer = FrameBuffer::new(MAX);
        buffer.read_space();
        // A read that never completed leaves nothing behind
        let space = buffer.read_space();
        space[..frame.len()].copy_from_slice(&frame);
        buffer.commit(frame.len());

        assert_eq!(
            buffer.next_packet().unwrap(),
            Some(Packet::new(5, PacketType::RESPONSE_VALUE, "ok"))
        );
    }
}
