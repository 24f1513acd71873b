//! Hexadecimal codec for header and digest words
//!
//! Words are encoded big-endian, 4 bytes (8 hex characters) per word.

use crate::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode hex text into big-endian 32-bit words.
pub fn hex_to_words(text: &str) -> Result<Vec<u32>> {
    if text.len() % 2 != 0 {
        return Err(Error::format(format!(
            "Invalid hex length {}: odd number of characters",
            text.len()
        )));
    }

    let bytes = hex::decode(text).map_err(|e| Error::format(format!("Invalid hex: {}", e)))?;
    if bytes.len() % 4 != 0 {
        return Err(Error::format(format!(
            "Invalid hex length {}: expected a multiple of 8 characters",
            text.len()
        )));
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut words = Vec::with_capacity(bytes.len() / 4);
    for _ in 0..bytes.len() / 4 {
        words.push(cursor.read_u32::<BigEndian>()?);
    }
    Ok(words)
}

/// Encode words as lower-case big-endian hex.
pub fn words_to_hex(words: &[u32]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    hex::encode(bytes)
}

/// Reverse hex text byte-wise.
///
/// Explorers display hashes in the reverse byte order of the header.
pub fn reverse_hex_bytes(text: &str) -> Result<String> {
    let mut bytes = hex::decode(text).map_err(|e| Error::format(format!("Invalid hex: {}", e)))?;
    bytes.reverse();
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_hex_to_words() {
        let words = hex_to_words("020000000affed3f").unwrap();
        assert_eq!(words, vec![0x02000000, 0x0AFFED3F]);

        // Upper case is accepted
        let words = hex_to_words("5C8AD782").unwrap();
        assert_eq!(words, vec![0x5C8AD782]);
    }

    #[test]
    fn test_words_to_hex() {
        assert_eq!(words_to_hex(&[0x5C8AD782, 0x00000001]), "5c8ad78200000001");
        assert_eq!(words_to_hex(&[]), "");
    }

    #[test]
    fn test_invalid_hex() {
        assert_matches!(hex_to_words("abc"), Err(Error::Format { .. }));
        assert_matches!(hex_to_words("zz000000"), Err(Error::Format { .. }));
        assert_matches!(hex_to_words("abcd"), Err(Error::Format { .. }));
    }

    #[test]
    fn test_reverse_hex_bytes() {
        assert_eq!(reverse_hex_bytes("0a0b0c").unwrap(), "0c0b0a");
        assert_matches!(reverse_hex_bytes("0a0"), Err(Error::Format { .. }));
    }

    proptest! {
        #[test]
        fn hex_roundtrip(text in "([0-9a-f]{8}){0,20}") {
            let words = hex_to_words(&text).unwrap();
            prop_assert_eq!(words_to_hex(&words), text);
        }

        #[test]
        fn words_roundtrip(words in prop::collection::vec(any::<u32>(), 0..20)) {
            let text = words_to_hex(&words);
            prop_assert_eq!(hex_to_words(&text).unwrap(), words);
        }
    }
}
