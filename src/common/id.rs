//! Kademlia node Id, content key, or a lookup target
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::error::IdError;

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits.
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id, content key, or a lookup target
pub struct Id([u8; ID_SIZE]);

impl Id {
    /// Generate a random Id.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, IdError> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(IdError::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    /// SHA-1 hash of arbitrary data, used to turn human readable keys into [Id]s.
    pub fn hash<T: AsRef<[u8]>>(data: T) -> Id {
        Id(sha1_smol::Sha1::from(data.as_ref()).digest().bytes())
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is the number of trailing non zero bits in the XOR result.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        MAX_DISTANCE - self.shared_prefix_len(other)
    }

    /// Number of leading bits this Id shares with `other`.
    ///
    /// Returns [MAX_DISTANCE] for identical Ids.
    pub fn shared_prefix_len(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                // leading zeros so far + leading zeros of this byte
                return (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;
            }
        }

        MAX_DISTANCE
    }

    /// Full XOR metric, comparable as an unsigned 160 bit integer.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0).enumerate() {
            result[i] = a ^ b;
        }

        result.into()
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl From<Id> for [u8; ID_SIZE] {
    fn from(value: Id) -> Self {
        value.0
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Id, IdError> {
        if s.len() != ID_SIZE * 2 {
            return Err(IdError::InvalidIdSize(s.len() / 2));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = s
                .get(i * 2..i * 2 + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| IdError::InvalidIdEncoding(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();
        let distance = id.distance(&id);
        assert_eq!(distance, 0)
    }

    #[test]
    fn distance_to_id() {
        let id = Id::from_str("0639A1E24FBB8AB277DF033476AB0DE10FAB3BDC").unwrap();

        let target = Id::from_str("035b1aeb9737ade1a80933594f405d3f772aa08e").unwrap();

        let distance = id.distance(&target);

        assert_eq!(distance, 155)
    }

    #[test]
    fn distance_to_random_id() {
        let id = Id::random();
        let target = Id::random();

        let distance = id.distance(&target);

        assert_ne!(distance, 0)
    }

    #[test]
    fn shared_prefix() {
        let a = Id::from([0b1010_0000; ID_SIZE]);
        let mut bytes = [0b1010_0000; ID_SIZE];
        bytes[1] = 0b1000_0000;
        let b = Id::from(bytes);

        assert_eq!(a.shared_prefix_len(&b), 10);
        assert_eq!(a.shared_prefix_len(&a), MAX_DISTANCE);
    }

    #[test]
    fn xor_orders_by_closeness() {
        let target = Id::from([0; ID_SIZE]);

        let mut near = [0; ID_SIZE];
        near[ID_SIZE - 1] = 1;
        let mut far = [0; ID_SIZE];
        far[0] = 1;

        assert!(target.xor(&Id::from(near)) < target.xor(&Id::from(far)));
        assert_eq!(target.xor(&target), target);
    }

    #[test]
    fn hex_roundtrip() {
        let id = Id::random();
        let parsed = Id::from_str(&id.to_string()).unwrap();

        assert_eq!(parsed, id);
    }

    #[test]
    fn invalid_hex() {
        assert_eq!(Id::from_str("zz"), Err(IdError::InvalidIdSize(1)));
        assert!(matches!(
            Id::from_str("zz39a1e24fbb8ab277df033476ab0de10fab3bdc"),
            Err(IdError::InvalidIdEncoding(_))
        ));
    }

    #[test]
    fn hash_key() {
        // sha1("hello")
        assert_eq!(
            Id::hash("hello").to_string(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }
}
