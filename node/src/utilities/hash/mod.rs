use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub(crate) use hasher::blake2_256;

use crate::utilities::encoding::{from_hex, to_hex};

mod hasher;

/// 32 byte digest used for block, request and transaction identities.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashType([u8; 32]);

impl HashType {
    /// The all-zero hash. Genesis blocks point to it as their parent.
    pub fn zero() -> Self {
        Self([0; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn digest(data: &[u8]) -> Self {
        Self(blake2_256(data))
    }
}

impl AsRef<[u8]> for HashType {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(self.0))
    }
}

impl Debug for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(self.0))
    }
}

impl FromStr for HashType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = from_hex(s)?;
        if bytes.len() != 32 {
            anyhow::bail!("Invalid hash length {}: {s}", bytes.len());
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_display_hex() {
        let hash = HashType::digest(b"block");
        let parsed: HashType = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn reject_short_hex() {
        assert!("abcd".parse::<HashType>().is_err());
    }

    #[test]
    fn zero_is_default() {
        assert!(HashType::default().is_zero());
        assert!(!HashType::digest(b"").is_zero());
    }
}
