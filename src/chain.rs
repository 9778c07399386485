use clap::ValueEnum;
use serde::Deserialize;

use crate::script::ScriptType;

/// The networks an index can be pointed at. All of them are Dogecoin-family;
/// Bitcoin address prefixes are additionally understood by the read API
/// because homologous chains share version bytes.
#[derive(Default, ValueEnum, Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

/// Base58Check version bytes of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPrefixes {
    pub p2pkh: u8,
    pub p2sh: u8,
    pub pkey: u8,
}

pub const BITCOIN_MAINNET_PREFIXES: AddressPrefixes = AddressPrefixes {
    p2pkh: 0x00,
    p2sh: 0x05,
    pkey: 0x80,
};

pub const BITCOIN_TESTNET_PREFIXES: AddressPrefixes = AddressPrefixes {
    p2pkh: 0x6F,
    p2sh: 0xC4,
    pkey: 0xEF,
};

impl Chain {
    pub fn default_rpc_port(self) -> u16 {
        match self {
            Self::Mainnet => 22555,
            Self::Testnet => 44555,
            Self::Regtest => 18444,
        }
    }

    pub const fn address_prefixes(self) -> AddressPrefixes {
        match self {
            Self::Mainnet => AddressPrefixes {
                p2pkh: 0x1E,
                p2sh: 0x16,
                pkey: 0x9E,
            },
            Self::Testnet => AddressPrefixes {
                p2pkh: 0x71,
                p2sh: 0xC4,
                pkey: 0xF1,
            },
            Self::Regtest => AddressPrefixes {
                p2pkh: 0x6F,
                p2sh: 0xC4,
                pkey: 0xEF,
            },
        }
    }
}

/// Maps an address version byte to the script class it pays to. The mapping
/// is deliberately many-to-one across Doge and Bitcoin networks: an indexer
/// distinguishes chains by configuration, never by address.
pub fn script_kind_for_version(version: u8) -> ScriptType {
    let known = [
        Chain::Mainnet.address_prefixes(),
        Chain::Testnet.address_prefixes(),
        Chain::Regtest.address_prefixes(),
        BITCOIN_MAINNET_PREFIXES,
        BITCOIN_TESTNET_PREFIXES,
    ];

    for prefixes in known {
        if version == prefixes.p2pkh {
            return ScriptType::P2PKH;
        }
        if version == prefixes.p2sh {
            return ScriptType::P2SH;
        }
        if version == prefixes.pkey {
            return ScriptType::P2PK;
        }
    }

    ScriptType::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bytes_map_to_script_kinds() {
        // Doge mainnet 'D' addresses
        assert_eq!(script_kind_for_version(0x1E), ScriptType::P2PKH);
        assert_eq!(script_kind_for_version(0x16), ScriptType::P2SH);
        // Bitcoin mainnet
        assert_eq!(script_kind_for_version(0x00), ScriptType::P2PKH);
        assert_eq!(script_kind_for_version(0x05), ScriptType::P2SH);
        // shared testnet/regtest bytes
        assert_eq!(script_kind_for_version(0x6F), ScriptType::P2PKH);
        assert_eq!(script_kind_for_version(0xC4), ScriptType::P2SH);
        // private-key prefixes select P2PK
        assert_eq!(script_kind_for_version(0x9E), ScriptType::P2PK);

        assert_eq!(script_kind_for_version(0x42), ScriptType::None);
    }

    #[test]
    fn rpc_ports_differ_per_network() {
        assert_eq!(Chain::Mainnet.default_rpc_port(), 22555);
        assert_eq!(Chain::Testnet.default_rpc_port(), 44555);
        assert_eq!(Chain::Regtest.default_rpc_port(), 18444);
    }
}
