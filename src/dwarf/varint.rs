//! Base-128 variable length integers.
//!
//! Decoding stops at the first byte with a clear continuation bit or at the
//! end of the buffer, whichever comes first. A truncated buffer is not an
//! error: whatever groups were read make up the value.

/// Decodes an unsigned LEB128 value, returning it with the number of bytes consumed.
pub fn decode_unsigned(buf: &[u8]) -> (u64, usize) {
    let mut result = 0u64;
    let mut shift = 0u32;
    let mut consumed = 0;

    for &byte in buf {
        consumed += 1;
        if shift < u64::BITS {
            result |= u64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    (result, consumed)
}

/// Decodes a signed LEB128 value, returning it with the number of bytes consumed.
pub fn decode_signed(buf: &[u8]) -> (i64, usize) {
    let mut result = 0i64;
    let mut shift = 0u32;
    let mut consumed = 0;
    let mut last = 0u8;

    for &byte in buf {
        consumed += 1;
        last = byte;
        if shift < i64::BITS {
            result |= i64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    // Sign bit of the final group is 0x40.
    if consumed > 0 && shift < i64::BITS && last & 0x40 != 0 {
        result |= -1i64 << shift;
    }

    (result, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_unsigned() {
        assert_eq!(decode_unsigned(&[0x05]), (5, 1));
    }

    #[test]
    fn continuation_byte_unsigned() {
        assert_eq!(decode_unsigned(&[0x85, 0x01]), (133, 2));
    }

    #[test]
    fn stops_at_first_terminal_byte() {
        let (value, consumed) = decode_unsigned(&[0x7f, 0x01, 0x02]);
        assert_eq!(value, 127);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn truncated_buffer_keeps_partial_value() {
        assert_eq!(decode_unsigned(&[0x85]), (5, 1));
        assert_eq!(decode_unsigned(&[]), (0, 0));
    }

    #[test]
    fn signed_sign_extends() {
        assert_eq!(decode_signed(&[0x7f]), (-1, 1));
        assert_eq!(decode_signed(&[0x80, 0x7f]), (-128, 2));
        // Same bit pattern through the unsigned path stays positive.
        assert_eq!(decode_unsigned(&[0x7f]), (127, 1));
    }

    #[test]
    fn signed_positive_values() {
        assert_eq!(decode_signed(&[0x3f]), (63, 1));
        assert_eq!(decode_signed(&[0xc0, 0x00]), (64, 2));
    }

    #[test]
    fn long_encodings_do_not_overflow() {
        let buf = [0xff; 12];
        let (value, consumed) = decode_unsigned(&buf);
        assert_eq!(consumed, 12);
        assert_eq!(value, u64::MAX);
    }
}
