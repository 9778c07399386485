use super::{Decode, VarUInt};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DecodingError {
    #[error("Malformed input: {0} ({1:?})")]
    MalformedInput(String, Vec<u8>),
    #[error("VarUInt casting: {0}")]
    VarUIntCasting(u128),
    #[error("Enum kind: {0:?}")]
    InvalidEnumKind(Vec<u8>),
}

pub fn malformed_input<S: Into<String>>(msg: S, bytes: &[u8]) -> DecodingError {
    DecodingError::MalformedInput(msg.into(), bytes.to_vec())
}

pub type DecodingResult<'a, T> = Result<(T, &'a [u8]), DecodingError>;

impl<const N: usize> Decode for [u8; N] {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        bytes
            .get(..N)
            .map(|slice| {
                (
                    slice.try_into().expect("slice with incorrect length"),
                    &bytes[N..],
                )
            })
            .ok_or(malformed_input("array insufficient bytes", bytes))
    }
}

impl Decode for u8 {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        bytes
            .first()
            .map(|b| (*b, &bytes[1..]))
            .ok_or(malformed_input("u8 insufficient bytes", bytes))
    }
}

impl Decode for VarUInt {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let len = *bytes
            .first()
            .ok_or(malformed_input("varuint insufficient bytes", bytes))?
            as usize;

        if len > 16 {
            return Err(malformed_input("varuint len exceeds maximum", bytes));
        }

        let (data, bytes) = bytes[1..]
            .split_at_checked(len)
            .ok_or(malformed_input("varuint insufficient bytes", bytes))?;

        let mut be_128 = [0u8; 16];
        be_128[16 - len..].copy_from_slice(data);

        Ok((VarUInt(u128::from_be_bytes(be_128)), bytes))
    }
}

macro_rules! impl_uint_decode {
    ($t:ty) => {
        impl Decode for $t {
            fn decode(bytes: &[u8]) -> DecodingResult<$t> {
                let (varuint, rem) = VarUInt::decode(bytes)?;

                let casted = Self::try_from(varuint)?;

                Ok((casted, rem))
            }
        }
    };
}

impl_uint_decode!(usize);
impl_uint_decode!(u32);
impl_uint_decode!(u64);

impl Decode for i64 {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (raw, rest) = <[u8; 8]>::decode(bytes)
            .map_err(|_| malformed_input("i64 insufficient bytes", bytes))?;

        Ok((u64::from_be_bytes(raw) as i64, rest))
    }
}

impl Decode for () {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        Ok(((), bytes))
    }
}

impl<A: Decode> Decode for Option<A> {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (tag, bytes) = u8::decode(bytes)?;

        match tag {
            0 => Ok((None, bytes)),
            1 => {
                let (value, bytes) = A::decode(bytes)?;
                Ok((Some(value), bytes))
            }
            _ => Err(malformed_input("option tag out of range", bytes)),
        }
    }
}

impl<A: Decode> Decode for Vec<A> {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (len, mut bytes) = usize::decode(bytes)?;
        let mut vec = Vec::with_capacity(len.min(1024));

        for _ in 0..len {
            let (item, rest) = A::decode(bytes)?;
            bytes = rest;

            vec.push(item);
        }

        Ok((vec, bytes))
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (a, bytes) = A::decode(bytes)?;
        let (b, bytes) = B::decode(bytes)?;
        Ok(((a, b), bytes))
    }
}

impl<A: Decode, B: Decode, C: Decode> Decode for (A, B, C) {
    fn decode(bytes: &[u8]) -> DecodingResult<Self> {
        let (a, bytes) = A::decode(bytes)?;
        let (b, bytes) = B::decode(bytes)?;
        let (c, bytes) = C::decode(bytes)?;
        Ok(((a, b, c), bytes))
    }
}
