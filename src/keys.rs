//! Key encoding for gateway requests.
//!
//! Keys travel base64-encoded. A prefix scan is the half-open range
//! `[prefix, prefix + 1)`, where the bound is the prefix read as a big-endian
//! unsigned integer and incremented by one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};

/// Base64 (standard alphabet, padded) of a raw key.
pub fn encode_key<K: AsRef<[u8]>>(key: K) -> String {
    STANDARD.encode(key.as_ref())
}

/// The lexicographically next key after every key starting with `prefix`.
///
/// A carry out of the most significant byte grows the result by one byte,
/// so `[0xFF]` becomes `[0x01, 0x00]`.
pub fn prefix_end(prefix: &[u8]) -> Result<Vec<u8>> {
    if prefix.is_empty() {
        return Err(Error::InvalidKeyPrefix);
    }

    let mut end = prefix.to_vec();
    for byte in end.iter_mut().rev() {
        if *byte == u8::MAX {
            *byte = 0;
        } else {
            *byte += 1;
            return Ok(end);
        }
    }
    end.insert(0, 1);
    Ok(end)
}

/// Base64 of [`prefix_end`].
pub fn encode_prefix_end<K: AsRef<[u8]>>(prefix: K) -> Result<String> {
    prefix_end(prefix.as_ref()).map(|end| STANDARD.encode(end))
}

/// A base64-encoded `[start, end)` key range as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    /// Range covering every key that begins with `prefix`.
    pub fn prefix<K: AsRef<[u8]>>(prefix: K) -> Result<Self> {
        let prefix = prefix.as_ref();
        Ok(Self {
            start: encode_key(prefix),
            end: encode_prefix_end(prefix)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(s: &str) -> Vec<u8> {
        STANDARD.decode(s).unwrap()
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("/a"), "L2E=");
        assert_eq!(encode_key("/test/abc"), "L3Rlc3QvYWJj");
        assert_eq!(encode_key(""), "");
    }

    #[test]
    fn test_prefix_end_simple() {
        assert_eq!(prefix_end(b"/test/").unwrap(), b"/test0".to_vec());
        assert_eq!(prefix_end(b"a").unwrap(), b"b".to_vec());
    }

    #[test]
    fn test_prefix_end_carry() {
        assert_eq!(prefix_end(&[0x61, 0xFF]).unwrap(), vec![0x62, 0x00]);
        assert_eq!(prefix_end(&[0xFF]).unwrap(), vec![0x01, 0x00]);
        assert_eq!(prefix_end(&[0xFF, 0xFF]).unwrap(), vec![0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_empty_prefix_is_rejected() {
        assert_eq!(prefix_end(b""), Err(Error::InvalidKeyPrefix));
        assert_eq!(encode_prefix_end(""), Err(Error::InvalidKeyPrefix));
        assert_eq!(KeyRange::prefix(""), Err(Error::InvalidKeyPrefix));
    }

    #[test]
    fn test_key_range_bounds_decode() {
        let range = KeyRange::prefix([0xFFu8]).unwrap();
        assert_eq!(decode(&range.start), vec![0xFF]);
        assert_eq!(decode(&range.end), vec![0x01, 0x00]);

        let range = KeyRange::prefix("/test/abc").unwrap();
        assert_eq!(decode(&range.start), b"/test/abc".to_vec());
        assert_eq!(decode(&range.end), b"/test/abd".to_vec());
    }
}
