pub mod decode;
pub mod encode;

use std::ops::Range;

pub use decode::{DecodingError, DecodingResult};

/// Order-preserving binary encoding for storage keys and values. Keys encoded
/// with these impls compare lexicographically the same way the source values
/// compare, which is what makes range scans over the prefix-tagged tables
/// work.
pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decode
where
    Self: Sized,
{
    fn decode(bytes: &[u8]) -> DecodingResult<Self>;

    /// `decode` but ignoring, and not returning, any remaining bytes
    fn decode_all(bytes: &[u8]) -> Result<Self, DecodingError> {
        Self::decode(bytes).map(|x| x.0)
    }
}

#[derive(Default, Clone)]
pub struct EncodeBuilder {
    output: Vec<u8>,
}

impl EncodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<T: Encode>(mut self, data: &T) -> Self {
        self.output.extend(data.encode());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.output
    }
}

/// Unsigned integer with compact serialisation that still maintains
/// lexicographic ordering (length byte first, then big-endian magnitude).
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub(crate) struct VarUInt(pub u128);

macro_rules! impl_to_varuint {
    ($type:ty) => {
        impl From<$type> for VarUInt {
            fn from(val: $type) -> Self {
                VarUInt(val as u128)
            }
        }
    };
}

impl_to_varuint!(usize);
impl_to_varuint!(u32);
impl_to_varuint!(u64);

macro_rules! impl_try_from_varuint {
    ($type:ty) => {
        impl TryFrom<VarUInt> for $type {
            type Error = DecodingError;

            fn try_from(val: VarUInt) -> Result<$type, Self::Error> {
                let inner = val.0;
                inner
                    .try_into()
                    .map_err(|_| DecodingError::VarUIntCasting(inner))
            }
        }
    };
}

impl_try_from_varuint!(usize);
impl_try_from_varuint!(u32);
impl_try_from_varuint!(u64);

/// The key range covering every key that starts with `prefix`.
pub fn prefix_key_range(prefix: &[u8]) -> Range<Vec<u8>> {
    let start = prefix.to_vec();
    let mut end = prefix.to_vec();

    // work backwards so trailing 0xFF bytes carry into the next position
    for i in (0..end.len()).rev() {
        if end[i] != 0xFF {
            end[i] += 1;
            end.truncate(i + 1);
            return start..end;
        }
    }

    // all bytes are 0xFF: unbounded above
    start..vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varuint_preserves_order() {
        let values: Vec<u64> = vec![0, 1, 2, 255, 256, 65535, 1 << 20, u64::MAX];

        let encoded: Vec<Vec<u8>> = values.iter().map(|v| v.encode()).collect();

        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn uint_round_trips() {
        for v in [0u64, 1, 500, 1_000_000, u64::MAX] {
            let encoded = v.encode();
            let (decoded, rest) = u64::decode(&encoded).unwrap();
            assert_eq!(decoded, v);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn i64_round_trips() {
        for v in [0i64, 1, -1, 100_000_000, i64::MAX, i64::MIN] {
            assert_eq!(i64::decode_all(&v.encode()).unwrap(), v);
        }
    }

    #[test]
    fn option_round_trips() {
        assert_eq!(
            Option::<u64>::decode_all(&Some(42u64).encode()).unwrap(),
            Some(42)
        );
        assert_eq!(Option::<u64>::decode_all(&None::<u64>.encode()).unwrap(), None);
    }

    #[test]
    fn prefix_range_handles_carry() {
        let range = prefix_key_range(&[0x01, 0xFF]);
        assert_eq!(range.start, vec![0x01, 0xFF]);
        assert_eq!(range.end, vec![0x02]);
    }
}
