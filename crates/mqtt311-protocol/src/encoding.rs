//! Primitive wire encodings: the variable-length remaining-length integer
//! and length-prefixed strings / binary data.

use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Largest value representable by the 4-byte remaining-length encoding.
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Encodes a remaining-length value as a 1-4 byte varint.
///
/// # Errors
///
/// Returns `MalformedRemainingLength` if the value exceeds the 4-byte range.
pub fn encode_variable_length<B: BufMut>(buf: &mut B, mut value: u32) -> Result<()> {
    if value > MAX_REMAINING_LENGTH {
        return Err(MqttError::MalformedRemainingLength);
    }
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Decodes a remaining-length varint from a buffer.
///
/// # Errors
///
/// Returns `MalformedRemainingLength` when a fifth continuation byte appears,
/// `MalformedPacket` when the buffer runs out mid-varint.
pub fn decode_variable_length<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "truncated remaining length".to_string(),
            ));
        }
        let byte = buf.get_u8();
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 21 {
            return Err(MqttError::MalformedRemainingLength);
        }
    }
}

/// Number of bytes `encode_variable_length` produces for a value.
#[must_use]
pub fn variable_length_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Encodes a UTF-8 string with a big-endian u16 length prefix.
///
/// # Errors
///
/// Returns `MalformedPacket` if the string exceeds 65535 bytes.
pub fn encode_string<B: BufMut>(buf: &mut B, s: &str) -> Result<()> {
    encode_binary(buf, s.as_bytes())
}

/// Decodes a u16-length-prefixed UTF-8 string.
///
/// # Errors
///
/// Returns `MalformedPacket` on truncation or invalid UTF-8.
pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    let bytes = decode_binary(buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| MqttError::MalformedPacket("invalid UTF-8 in string".to_string()))
}

/// Encodes binary data with a big-endian u16 length prefix.
///
/// # Errors
///
/// Returns `MalformedPacket` if the data exceeds 65535 bytes.
pub fn encode_binary<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        MqttError::MalformedPacket(format!("field too long: {} bytes", data.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

/// Decodes u16-length-prefixed binary data as a zero-copy slice of the buffer.
///
/// # Errors
///
/// Returns `MalformedPacket` on truncation.
pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Bytes> {
    let len = usize::from(decode_u16(buf)?);
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "truncated field: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Decodes a big-endian u16.
///
/// # Errors
///
/// Returns `MalformedPacket` on truncation.
pub fn decode_u16<B: Buf>(buf: &mut B) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "truncated u16 field".to_string(),
        ));
    }
    Ok(buf.get_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    fn round_trip(value: u32) -> u32 {
        let mut buf = BytesMut::new();
        encode_variable_length(&mut buf, value).unwrap();
        assert_eq!(buf.len(), variable_length_len(value));
        decode_variable_length(&mut buf.freeze()).unwrap()
    }

    #[test]
    fn variable_length_boundaries() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX_REMAINING_LENGTH] {
            assert_eq!(round_trip(value), value);
        }
    }

    #[test]
    fn variable_length_widths() {
        assert_eq!(variable_length_len(127), 1);
        assert_eq!(variable_length_len(128), 2);
        assert_eq!(variable_length_len(16_383), 2);
        assert_eq!(variable_length_len(16_384), 3);
        assert_eq!(variable_length_len(2_097_151), 3);
        assert_eq!(variable_length_len(2_097_152), 4);
    }

    #[test]
    fn variable_length_overlong() {
        let mut buf = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(
            decode_variable_length(&mut buf),
            Err(MqttError::MalformedRemainingLength)
        );
    }

    #[test]
    fn variable_length_truncated() {
        let mut buf = Bytes::from_static(&[0x80]);
        assert!(matches!(
            decode_variable_length(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn variable_length_too_large() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_variable_length(&mut buf, MAX_REMAINING_LENGTH + 1),
            Err(MqttError::MalformedRemainingLength)
        );
    }

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "sensors/temp").unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x0C]);
        assert_eq!(decode_string(&mut buf.freeze()).unwrap(), "sensors/temp");
    }

    #[test]
    fn string_invalid_utf8() {
        let mut buf = Bytes::from_static(&[0x00, 0x02, 0xFF, 0xFE]);
        assert!(matches!(
            decode_string(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn binary_truncated() {
        let mut buf = Bytes::from_static(&[0x00, 0x05, b'a', b'b']);
        assert!(matches!(
            decode_binary(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_variable_length_round_trip(value in 0u32..=MAX_REMAINING_LENGTH) {
            prop_assert_eq!(round_trip(value), value);
        }

        #[test]
        fn prop_binary_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = BytesMut::new();
            encode_binary(&mut buf, &data).unwrap();
            let decoded = decode_binary(&mut buf.freeze()).unwrap();
            prop_assert_eq!(decoded.as_ref(), data.as_slice());
        }
    }
}
