// proctalk/src/message/wire.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Line-oriented JSON framing for [`Message`]s.
//!
//! Each message is one JSON document followed by `\n`. Decoding never fails: anything
//! that is not a well-formed message becomes an `Invalid` message carrying the error text.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Message;

/// Serializes a message into a newline-terminated JSON line.
pub fn encode(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    Ok(json)
}

/// Parses one line into a message; malformed input degrades to `Invalid`.
pub fn decode(line: &str) -> Message {
    let trimmed = line.trim_end_matches(['\r', '\n']).trim();
    match serde_json::from_str::<Message>(trimmed) {
        Ok(message) => message,
        Err(e) => Message::invalid(format!("Malformed message: {}", e)),
    }
}

/// What [`read_frame`] found on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The peer closed the connection.
    Eof,
    /// An empty or whitespace-only line.
    Blank,
    /// A line longer than the configured limit; carries its length. Only the first
    /// `limit + 1` bytes of it were ever buffered.
    Oversized(usize),
    Message(Message),
}

/// Consumes input up to and including the next newline without storing it.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut discarded = 0;
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(discarded);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(idx) => (true, idx + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        discarded += used;
        if found {
            return Ok(discarded);
        }
    }
}

/// Reads the next line from `reader` and decodes it.
///
/// `max_len` bounds the accepted line length in bytes, newline included; `None`
/// disables the check. Bytes that are not UTF-8 decode to an `Invalid` message.
pub async fn read_frame<R>(reader: &mut R, buffer: &mut Vec<u8>, max_len: Option<usize>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    let n = match max_len {
        Some(limit) => {
            let n = (&mut *reader).take(limit as u64 + 1).read_until(b'\n', buffer).await?;
            if n > limit {
                let rest = if buffer.last() == Some(&b'\n') {
                    0
                } else {
                    discard_line(reader).await?
                };
                buffer.clear();
                return Ok(Frame::Oversized(n + rest));
            }
            n
        }
        None => reader.read_until(b'\n', buffer).await?,
    };
    if n == 0 {
        return Ok(Frame::Eof);
    }

    let line = match std::str::from_utf8(buffer) {
        Ok(line) => line,
        Err(e) => return Ok(Frame::Message(Message::invalid(format!("Malformed message: {}", e)))),
    };
    if line.trim().is_empty() {
        return Ok(Frame::Blank);
    }
    Ok(Frame::Message(decode(line)))
}

/// Writes one message and flushes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(message).map_err(std::io::Error::other)?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, Value};
    use tokio::io::BufReader;

    #[test]
    fn test_identify_survives_the_wire() {
        let sent = Message::identify("host1", 9898);
        let bytes = encode(&sent).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let received = decode(std::str::from_utf8(&bytes).unwrap());
        assert_eq!(received.message_type(), MessageType::Identify);
        assert_eq!(received.payload(), &[Value::from("host1"), Value::Integer(9898)]);
    }

    #[test]
    fn test_nested_payload_survives_the_wire() {
        let sent = Message::process_list(vec![
            Value::Array(vec![Value::Integer(1), Value::from("init"), Value::Integer(12)]),
            Value::Array(vec![Value::Integer(42), Value::from("sh"), Value::Integer(0)]),
        ]);
        let received = decode(std::str::from_utf8(&encode(&sent).unwrap()).unwrap());
        assert_eq!(received, sent);
    }

    #[test]
    fn test_garbage_decodes_to_invalid_with_reason() {
        let m = decode("{ not json }\n");
        assert!(m.is_invalid());
        assert!(m.text(0).unwrap().starts_with("Malformed message"));
    }

    #[test]
    fn test_unknown_type_name_decodes_to_invalid() {
        let m = decode(r#"{"type":"Reboot","payload":[]}"#);
        assert_eq!(m.message_type(), MessageType::Invalid);
    }

    #[test]
    fn test_type_name_is_case_insensitive_on_the_wire() {
        let m = decode(r#"{"type":"stopserver"}"#);
        assert_eq!(m.message_type(), MessageType::StopServer);
        assert!(m.payload().is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_sequence() {
        let input = b"\n{\"type\":\"Ack\",\"payload\":[]}\nxxxxxxxxxxxxxxxxxxxx\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let mut buffer = Vec::new();

        assert_eq!(read_frame(&mut reader, &mut buffer, Some(16)).await.unwrap(), Frame::Blank);
        assert_eq!(
            read_frame(&mut reader, &mut buffer, None).await.unwrap(),
            Frame::Message(Message::ack(vec![]))
        );
        assert_eq!(read_frame(&mut reader, &mut buffer, Some(16)).await.unwrap(), Frame::Oversized(21));
        assert_eq!(read_frame(&mut reader, &mut buffer, Some(16)).await.unwrap(), Frame::Eof);
    }

    #[test]
    fn test_arbitrary_floats_survive_the_wire() {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut checked = 0;
        while checked < 20_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let f = f64::from_bits(state);
            if !f.is_finite() {
                continue;
            }
            let sent = Message::ack(vec![Value::Float(f)]);
            let received = decode(std::str::from_utf8(&encode(&sent).unwrap()).unwrap());
            assert_eq!(received, sent, "float {:e} changed on the wire", f);
            checked += 1;
        }
    }

    #[tokio::test]
    async fn test_oversized_line_is_not_buffered() {
        let limit = 64 * 1024;
        let mut input = vec![b'x'; 20_000_000];
        input.push(b'\n');
        input.extend_from_slice(b"{\"type\":\"Ack\",\"payload\":[]}\n");
        let mut reader = BufReader::new(&input[..]);
        let mut buffer = Vec::new();

        let frame = read_frame(&mut reader, &mut buffer, Some(limit)).await.unwrap();
        assert_eq!(frame, Frame::Oversized(20_000_001));
        assert!(buffer.capacity() <= 4 * limit, "buffered {} bytes", buffer.capacity());

        assert_eq!(
            read_frame(&mut reader, &mut buffer, Some(limit)).await.unwrap(),
            Frame::Message(Message::ack(vec![]))
        );
    }

    #[tokio::test]
    async fn test_unterminated_oversized_line_runs_to_eof() {
        let input = vec![b'x'; 100_000];
        let mut reader = BufReader::new(&input[..]);
        let mut buffer = Vec::new();

        assert_eq!(
            read_frame(&mut reader, &mut buffer, Some(1024)).await.unwrap(),
            Frame::Oversized(100_000)
        );
        assert_eq!(read_frame(&mut reader, &mut buffer, Some(1024)).await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn test_non_utf8_line_decodes_to_invalid() {
        let input = b"\xff\xfe{}\n{\"type\":\"Ack\",\"payload\":[]}\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let mut buffer = Vec::new();

        match read_frame(&mut reader, &mut buffer, Some(1024)).await.unwrap() {
            Frame::Message(m) => {
                assert!(m.is_invalid());
                assert!(m.text(0).unwrap().starts_with("Malformed message"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(
            read_frame(&mut reader, &mut buffer, None).await.unwrap(),
            Frame::Message(Message::ack(vec![]))
        );
    }

    #[tokio::test]
    async fn test_write_message_appends_newline() {
        let mut out: Vec<u8> = Vec::new();
        write_message(&mut out, &Message::stop_server()).await.unwrap();
        assert_eq!(out, b"{\"type\":\"StopServer\",\"payload\":[]}\n".to_vec());
    }
}
