//! Pkt-line framing
//!
//! Packets are length-prefixed: 4 ASCII-hex bytes give the total length
//! (including the 4 prefix bytes), and payloads conventionally end with a
//! newline. Length `0000` is a flush packet carrying no payload.

use crate::artifacts::wire::ProtocolError;
use std::io::{BufRead, Read, Write};

/// Length prefix of a flush packet
const FLUSH: &[u8; 4] = b"0000";
/// Prefix length plus the trailing newline appended to payloads
const FRAME_OVERHEAD: usize = 5;

/// Write one packet, appending a newline unless the payload carries one
pub fn write_packet(out: &mut impl Write, payload: &[u8]) -> Result<(), ProtocolError> {
    let needs_newline = payload.last() != Some(&b'\n');
    let length = payload.len() + if needs_newline { FRAME_OVERHEAD } else { FRAME_OVERHEAD - 1 };

    write!(out, "{:04x}", length)?;
    out.write_all(payload)?;
    if needs_newline {
        out.write_all(b"\n")?;
    }

    Ok(())
}

/// Write a flush packet
pub fn write_flush(out: &mut impl Write) -> Result<(), ProtocolError> {
    out.write_all(FLUSH)?;
    Ok(())
}

/// Read one packet; `None` is a flush packet
///
/// The trailing newline is stripped from the payload.
pub fn read_packet(input: &mut impl BufRead) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut prefix = [0u8; 4];
    input.read_exact(&mut prefix)?;

    let prefix = std::str::from_utf8(&prefix)
        .map_err(|_| ProtocolError::Malformed("non-ASCII length prefix".to_string()))?;
    let length = usize::from_str_radix(prefix, 16)
        .map_err(|_| ProtocolError::Malformed(format!("bad length prefix {:?}", prefix)))?;

    if length == 0 {
        return Ok(None);
    }
    if length < 4 {
        return Err(ProtocolError::Malformed(format!(
            "packet length {} shorter than its prefix",
            length
        )));
    }

    let mut payload = vec![0u8; length - 4];
    input.read_exact(&mut payload)?;

    if payload.last() == Some(&b'\n') {
        payload.pop();
    }

    Ok(Some(payload))
}

/// Read one packet as UTF-8 text
pub fn read_packet_text(input: &mut impl BufRead) -> Result<Option<String>, ProtocolError> {
    match read_packet(input)? {
        None => Ok(None),
        Some(payload) => String::from_utf8(payload)
            .map(Some)
            .map_err(|_| ProtocolError::Malformed("non-UTF-8 packet payload".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn test_packet_round_trip() {
        let mut wire = Vec::new();
        write_packet(&mut wire, b"want ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        write_flush(&mut wire).unwrap();

        let mut input = Cursor::new(wire);
        assert_eq!(
            read_packet_text(&mut input).unwrap().unwrap(),
            "want ce013625030ba8dba906f756967f9e9ca394464a"
        );
        assert_eq!(read_packet_text(&mut input).unwrap(), None);
    }

    #[test]
    fn test_length_prefix_counts_itself() {
        let mut wire = Vec::new();
        write_packet(&mut wire, b"ab").unwrap();

        // 4 prefix bytes + "ab" + newline = 7
        assert_eq!(&wire, b"0007ab\n");
    }

    #[test]
    fn test_existing_newline_is_not_doubled() {
        let mut wire = Vec::new();
        write_packet(&mut wire, b"ab\n").unwrap();

        assert_eq!(&wire, b"0007ab\n");
    }

    #[test]
    fn test_undersized_length_is_rejected() {
        let mut input = Cursor::new(b"0003".to_vec());
        assert!(read_packet(&mut input).is_err());
    }
}
