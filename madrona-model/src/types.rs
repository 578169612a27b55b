//! Fixed-size identifier newtypes.
//!
//! Transaction ids, versions, keys, signatures, and addresses are all
//! fixed-width byte strings. Each gets its own type so they cannot be
//! confused for one another. On the JSON wire they serialize as
//! lowercase hex; binary formats get the raw bytes.

use serde::{Deserialize as _, Serialize as _};
use std::fmt;

// Generates one fixed-width byte newtype: raw-array conversions, hex
// parsing and printing, and the dual serde representation.
macro_rules! define_bytes {
    ($name:ident, $len:expr, $doc:expr, [$($derives:ident),*]) => {
        #[doc = $doc]
        #[derive(Clone, Copy, $($derives),*)]
        #[repr(transparent)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse the lowercase-hex wire form.
            pub fn from_hex(s: &str) -> Result<Self, String> {
                let decoded = hex::decode(s).map_err(|e| format!("bad hex id: {}", e))?;
                Self::try_from(decoded)
                    .map_err(|bytes| format!("want {} bytes, found {}", $len, bytes.len()))
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(id: $name) -> [u8; $len] {
                id.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;
            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                <[u8; $len]>::try_from(slice).map(Self)
            }
        }

        // hands the vec back on a length mismatch so callers can report it
        impl TryFrom<Vec<u8>> for $name {
            type Error = Vec<u8>;
            fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
                match <[u8; $len]>::try_from(vec.as_slice()) {
                    Ok(arr) => Ok(Self(arr)),
                    Err(_) => Err(vec),
                }
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = [u8; $len];
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in self.0.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        // Hex strings on human-readable formats (JSON wire), raw bytes otherwise.
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    serde_bytes::Bytes::new(&self.0).serialize(serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                use serde::de::Error;
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    Self::from_hex(&s).map_err(D::Error::custom)
                } else {
                    let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
                    Self::try_from(buf.into_vec())
                        .map_err(|v| D::Error::custom(format!("want {} bytes, found {}", $len, v.len())))
                }
            }
        }
    };
}

// --- Type Definitions ---

define_bytes!(
    TxId,
    32,
    "32-byte transaction id",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

impl TxId {
    /// The fixed id of every state URI's genesis transaction.
    pub const GENESIS: TxId = TxId([0u8; 32]);

    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

define_bytes!(
    Version,
    32,
    "32-byte state version id; all keys of one version share this prefix on disk",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

impl Version {
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl From<TxId> for Version {
    fn from(id: TxId) -> Self {
        Version(id.0)
    }
}

define_bytes!(
    RefHash,
    32,
    "32-byte content address of a blob in the ref store (BLAKE3)",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

define_bytes!(
    PubKey,
    32,
    "32-byte Ed25519 public key",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

define_bytes!(
    Signature,
    64,
    "64-byte Ed25519 signature",
    [PartialEq, Eq]
);

define_bytes!(
    Address,
    20,
    "20-byte sender address, the leading bytes of BLAKE3(pubkey)",
    [PartialEq, Eq, Hash, Default, PartialOrd, Ord]
);

impl Address {
    /// Derive the address bound to a public key.
    pub fn from_pubkey(pubkey: &PubKey) -> Self {
        let digest = blake3::hash(pubkey.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[..20]);
        Address(out)
    }
}

// --- Tests ---
