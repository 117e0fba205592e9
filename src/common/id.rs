//! Kademlia node Id, lookup target, and search correlation token.
use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::Error;

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

/// The size of [FindId] in bytes.
pub const FIND_ID_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Map a DHT key to its lookup target.
    ///
    /// Keys that are already a hex encoded [Id] (guids, listing hashes) are used as is,
    /// anything else (keywords) is hashed with SHA-1.
    pub fn from_key(key: &str) -> Id {
        if let Ok(id) = Id::from_str(key) {
            return id;
        }

        Id(sha1_smol::Sha1::from(key).digest().bytes())
    }

    /// XOR metric between this Id and another, as a 160 bit big-endian number.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(result)
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is the number of trailing non zero bits in the XOR result.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                // leading zeros so far + leading zeros of this byte
                let leading_zeros = (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;

                return MAX_DISTANCE - leading_zeros;
            }
        }

        0
    }

    /// Random Id whose [Id::distance] from this one is exactly `distance`.
    ///
    /// Used to pick a refresh target inside a k-bucket. A distance of 0 returns self.
    pub fn random_at_distance(&self, distance: u8) -> Id {
        if distance == 0 {
            return *self;
        }

        let distance = distance.min(MAX_DISTANCE) as usize;
        let random = Id::random();
        let mut bytes = self.0;

        // Index of the first differing bit, counted from the most significant bit.
        let pivot = ID_SIZE * 8 - distance;

        for bit in pivot..ID_SIZE * 8 {
            let byte = bit / 8;
            let mask = 0x80_u8 >> (bit % 8);

            let value = if bit == pivot {
                !self.0[byte] & mask
            } else {
                random.0[byte] & mask
            };

            bytes[byte] = (bytes[byte] & !mask) | value;
        }

        Id(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id, Error> {
        let mut bytes = [0_u8; ID_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidIdEncoding(s.to_string()))?;

        Ok(Id(bytes))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        Id::from_str(&s).map_err(de::Error::custom)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
/// Correlation token of one iterative search, unique for the lifetime of the search.
pub struct FindId(pub [u8; FIND_ID_SIZE]);

impl FindId {
    pub fn random() -> FindId {
        let mut rng = rand::thread_rng();

        FindId(rng.gen())
    }
}

impl Display for FindId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Debug for FindId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FindId({})", self)
    }
}

impl FromStr for FindId {
    type Err = Error;

    fn from_str(s: &str) -> Result<FindId, Error> {
        let mut bytes = [0_u8; FIND_ID_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidIdEncoding(s.to_string()))?;

        Ok(FindId(bytes))
    }
}

impl Serialize for FindId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FindId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        FindId::from_str(&s).map_err(de::Error::custom)
    }
}
