use std::fmt;
use std::str::FromStr;

use crate::hex;
use crate::HashError;

/// The size in bytes of an object id digest.
pub const DIGEST_LEN: usize = 20;

/// A silt object identifier — the 160-bit hash of an object's content,
/// printed as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; DIGEST_LEN]);

impl ObjectId {
    /// The null object id (all zeros), meaning "no such value".
    ///
    /// Used as the old-value of a creation and the new-value of a deletion.
    pub const NULL: Self = Self([0u8; DIGEST_LEN]);

    /// Create an ObjectId from a raw digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != DIGEST_LEN {
            return Err(HashError::InvalidDigestLength {
                expected: DIGEST_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; DIGEST_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse an ObjectId from exactly 40 hex characters.
    pub fn from_hex(s: impl AsRef<[u8]>) -> Result<Self, HashError> {
        let mut arr = [0u8; DIGEST_LEN];
        hex::decode(s.as_ref(), &mut arr)?;
        Ok(Self(arr))
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if this is the null (all-zeros) id.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn from_hex_and_back() {
        let oid = ObjectId::from_hex(HEX).unwrap();
        assert_eq!(oid.to_hex(), HEX);
        assert_eq!(oid.as_bytes().len(), DIGEST_LEN);
    }

    #[test]
    fn display_roundtrip() {
        let oid = ObjectId::from_hex(HEX).unwrap();
        let parsed: ObjectId = oid.to_string().parse().unwrap();
        assert_eq!(parsed, oid);
    }

    #[test]
    fn null_oid() {
        assert!(ObjectId::NULL.is_null());
        assert!(!ObjectId::from_hex(HEX).unwrap().is_null());
        assert_eq!(
            ObjectId::NULL.to_hex(),
            "0000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn case_insensitive_parse() {
        let lower = ObjectId::from_hex(HEX).unwrap();
        let upper = ObjectId::from_hex(HEX.to_ascii_uppercase()).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = ObjectId::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn debug_shows_short_form() {
        let oid = ObjectId::from_hex(HEX).unwrap();
        assert_eq!(format!("{:?}", oid), "ObjectId(da39a3ee)");
    }
}
