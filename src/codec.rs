//! Fixed-width binary codec for on-disk integers and name fields.
//!
//! Everything here is pure and stateless. Integers are big-endian u32;
//! name fields are space-left-padded ASCII in a fixed-width byte field.

use crate::error::{LogError, LogResult};
use crate::formats::FILE_NAME_LENGTH_LIMIT;
use byteorder::{BigEndian, ByteOrder};

/// Encode a u32 into 4 big-endian bytes.
pub fn put_u32(buf: &mut [u8], value: u32) {
    BigEndian::write_u32(buf, value);
}

/// Decode a u32 from 4 big-endian bytes.
pub fn get_u32(buf: &[u8]) -> u32 {
    BigEndian::read_u32(buf)
}

/// Encode `name` into a fixed 128-byte field, space-padded on the left.
///
/// Rejects empty names and names longer than the field.
pub fn encode_name(name: &str) -> LogResult<[u8; FILE_NAME_LENGTH_LIMIT]> {
    if name.is_empty() || name.len() > FILE_NAME_LENGTH_LIMIT {
        return Err(LogError::Format(format!(
            "file name {name:?} must be 1..={FILE_NAME_LENGTH_LIMIT} bytes"
        )));
    }
    if !name.is_ascii() {
        return Err(LogError::Format(format!(
            "file name {name:?} must be ASCII"
        )));
    }
    let mut field = [b' '; FILE_NAME_LENGTH_LIMIT];
    field[FILE_NAME_LENGTH_LIMIT - name.len()..].copy_from_slice(name.as_bytes());
    Ok(field)
}

/// Decode a fixed 128-byte name field back into a trimmed string.
pub fn decode_name(field: &[u8]) -> LogResult<String> {
    if field.len() != FILE_NAME_LENGTH_LIMIT {
        return Err(LogError::Format(format!(
            "name field must be {FILE_NAME_LENGTH_LIMIT} bytes, got {}",
            field.len()
        )));
    }
    let s = std::str::from_utf8(field)
        .map_err(|e| LogError::Format(format!("name field is not valid ASCII: {e}")))?;
    Ok(s.trim_start_matches(' ').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip_is_big_endian() {
        let mut buf = [0u8; 4];
        put_u32(&mut buf, 0x0102_0304);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(get_u32(&buf), 0x0102_0304);
    }

    #[test]
    fn name_field_is_space_left_padded() {
        let field = encode_name("0000_Kubrick.log").unwrap();
        assert_eq!(field.len(), FILE_NAME_LENGTH_LIMIT);
        assert!(field.starts_with(b" "));
        assert!(field.ends_with(b"0000_Kubrick.log"));
        assert_eq!(decode_name(&field).unwrap(), "0000_Kubrick.log");
    }

    #[test]
    fn name_field_rejects_empty_and_oversized() {
        assert!(encode_name("").is_err());
        let long = "x".repeat(FILE_NAME_LENGTH_LIMIT + 1);
        assert!(encode_name(&long).is_err());
        // Exactly at the limit is fine.
        let max = "y".repeat(FILE_NAME_LENGTH_LIMIT);
        let field = encode_name(&max).unwrap();
        assert_eq!(decode_name(&field).unwrap(), max);
    }
}
