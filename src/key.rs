use sha3::{Digest, Sha3_256};
use std::fmt::{Debug, Formatter, Result};

use crate::KEY_LENGTH;

/// A key that identifies peers and lookup targets.
///
/// Keys have 256 bits so that SHA-3 can be used to derive them. The distance between two keys is
/// their XOR, which is itself a `Key` and compares as a big-endian unsigned integer, giving a total
/// order over peers relative to a target.
#[derive(Ord, PartialOrd, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Default, Copy)]
pub struct Key(pub [u8; KEY_LENGTH]);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> Result {
        let hex_vec: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", hex_vec.join(""))
    }
}

impl Key {
    /// Constructs a new `Key` from a byte array.
    pub fn new(data: [u8; KEY_LENGTH]) -> Self {
        Key(data)
    }

    /// Constructs a new, random `Key`.
    pub fn rand() -> Self {
        let mut ret = Key([0; KEY_LENGTH]);
        for byte in &mut ret.0 {
            *byte = rand::random::<u8>();
        }
        ret
    }

    /// Derives a `Key` from arbitrary bytes with SHA3-256.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::default();
        hasher.input(data);
        let mut ret = Key([0; KEY_LENGTH]);
        ret.0.copy_from_slice(hasher.result().as_slice());
        ret
    }

    /// Returns the XOR distance between `self` and `key`.
    pub fn distance(&self, key: &Key) -> Key {
        let mut ret = [0; KEY_LENGTH];
        for (i, byte) in ret.iter_mut().enumerate() {
            *byte = self.0[i] ^ key.0[i];
        }
        Key(ret)
    }
}
