use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::HANDLE_HASH_SIZE;
use crate::error::CommonError;

/// 32-character lowercase hexadecimal content address of an atom.
///
/// All references between atoms go through handles, never through pointers.
/// The inner buffer always holds ascii lowercase hex, so `as_str` is free.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle([u8; HANDLE_HASH_SIZE]);

impl Handle {
    /// Validates a foreign 32-hex string, folding uppercase to lowercase.
    pub fn parse(s: &str) -> Result<Self, CommonError> {
        if s.len() != HANDLE_HASH_SIZE {
            return Err(CommonError::InvalidHandle(s.to_owned()));
        }
        let mut bytes = [0u8; HANDLE_HASH_SIZE];
        for (slot, b) in bytes.iter_mut().zip(s.bytes()) {
            *slot = match b {
                b'0'..=b'9' | b'a'..=b'f' => b,
                b'A'..=b'F' => b + (b'a' - b'A'),
                _ => return Err(CommonError::InvalidHandle(s.to_owned())),
            };
        }
        Ok(Self(bytes))
    }

    /// Builds a handle from a raw 16-byte digest.
    pub fn from_digest(digest: [u8; 16]) -> Self {
        let mut bytes = [0u8; HANDLE_HASH_SIZE];
        // hex::encode_to_slice only fails on a length mismatch, which the
        // fixed-size buffers rule out.
        let _ = hex::encode_to_slice(digest, &mut bytes);
        Self(bytes)
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: the buffer is only ever filled with ascii hex digits by
        // `parse` and `from_digest`.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }

    pub fn as_bytes(&self) -> &[u8; HANDLE_HASH_SIZE] {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.as_str())
    }
}

impl FromStr for Handle {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
