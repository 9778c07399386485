use bitcoin::base58;

use crate::chain::script_kind_for_version;
use crate::script::ScriptType;
use crate::serve::error::ServeError;

/// Hash length carried by a Base58Check address after its version byte.
pub const ADDRESS_HASH_LEN: usize = 20;

/// Decodes a Base58Check address into the script class implied by its
/// version byte and the 20-byte hash used as the index lookup key. An
/// unknown-but-well-formed version byte decodes to `ScriptType::None`, which
/// simply matches nothing in the index.
pub fn decode_address(address: &str) -> Result<(ScriptType, [u8; ADDRESS_HASH_LEN]), ServeError> {
    let payload = base58::decode_check(address)
        .map_err(|_| ServeError::bad_request("invalid address"))?;

    if payload.len() != 1 + ADDRESS_HASH_LEN {
        return Err(ServeError::bad_request("invalid address"));
    }

    let kind = script_kind_for_version(payload[0]);
    let hash = payload[1..].try_into().expect("length checked");

    Ok((kind, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;

    fn encode(version: u8, hash: [u8; 20]) -> String {
        let mut payload = vec![version];
        payload.extend_from_slice(&hash);
        base58::encode_check(&payload)
    }

    #[test]
    fn decodes_doge_p2pkh_address() {
        let hash = [0xAB; 20];
        let address = encode(Chain::Mainnet.address_prefixes().p2pkh, hash);
        assert!(address.starts_with('D'));

        let (kind, decoded) = decode_address(&address).unwrap();
        assert_eq!(kind, ScriptType::P2PKH);
        assert_eq!(decoded, hash);
    }

    #[test]
    fn decodes_p2sh_and_unknown_versions() {
        let hash = [0x55; 20];

        let (kind, _) = decode_address(&encode(0x16, hash)).unwrap();
        assert_eq!(kind, ScriptType::P2SH);

        // well-formed but unknown version byte: matches nothing, not an error
        let (kind, _) = decode_address(&encode(0x42, hash)).unwrap();
        assert_eq!(kind, ScriptType::None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_address("not an address").is_err());
        assert!(decode_address("").is_err());

        // valid checksum, wrong payload length
        let short = base58::encode_check(&[0x1E, 0x01, 0x02]);
        assert!(decode_address(&short).is_err());
    }
}
