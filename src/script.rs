use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Script opcodes the output classifier needs. Values are the Bitcoin/Dogecoin
/// consensus byte values.
pub mod op {
    pub const FALSE: u8 = 0x00;
    pub const RETURN: u8 = 0x6A;
    pub const DUP: u8 = 0x76;
    pub const EQUAL: u8 = 0x87;
    pub const EQUALVERIFY: u8 = 0x88;
    pub const HASH160: u8 = 0xA9;
    pub const CHECKSIG: u8 = 0xAC;
    pub const CHECKMULTISIG: u8 = 0xAE;
    pub const OP_1: u8 = 0x51;
    pub const OP_3: u8 = 0x53;
}

/// Longest OP_RETURN output relayed by Core (IsStandard in policy.cpp).
pub const MAX_OP_RETURN_RELAY: usize = 83;

/// Output script classes, in their stable on-disk representation. The values
/// are persisted in UTXO rows and must never be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    None = 0,
    P2PK = 1,
    P2PKH = 2,
    P2SH = 3,
    MultiSig = 4,
    P2PKHW = 5,
    P2SHW = 6,
    NullData = 7,
    NonStandard = 8,
}

impl ScriptType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::P2PK),
            2 => Some(Self::P2PKH),
            3 => Some(Self::P2SH),
            4 => Some(Self::MultiSig),
            5 => Some(Self::P2PKHW),
            6 => Some(Self::P2SHW),
            7 => Some(Self::NullData),
            8 => Some(Self::NonStandard),
            _ => None,
        }
    }

    /// Display name used by the read API.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::P2PK => "P2PK",
            Self::P2PKH => "P2PKH",
            Self::P2SH => "P2SH",
            Self::MultiSig => "MultiSig",
            Self::P2PKHW => "P2PKHW",
            Self::P2SHW => "P2SHW",
            Self::NullData => "NullData",
            Self::NonStandard => "NonStandard",
        }
    }

    /// Whether rows of this class are reachable through an address lookup and
    /// therefore carried in the script index.
    pub fn address_indexed(self) -> bool {
        matches!(
            self,
            Self::P2PK | Self::P2PKH | Self::P2SH | Self::P2PKHW | Self::P2SHW
        )
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask selecting which script classes the codec retains. Classes outside
/// the mask collapse to `(None, empty)` and are not indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptMask(pub u8);

impl ScriptMask {
    pub const NONE: Self = Self(0);
    pub const P2PK: Self = Self(1);
    pub const P2PKH: Self = Self(2);
    pub const P2SH: Self = Self(4);
    pub const MULTISIG: Self = Self(8);
    pub const P2PKHW: Self = Self(16);
    pub const P2SHW: Self = Self(32);
    pub const NULL_DATA: Self = Self(64);
    pub const NON_STANDARD: Self = Self(128);

    /// "pay to" scripts
    pub const PAY_TO: Self = Self(1 | 2 | 4);
    /// segwit scripts
    pub const WITNESS: Self = Self(16 | 32);
    /// everything a standard wallet can spend
    pub const STANDARD: Self = Self(1 | 2 | 4 | 8 | 16 | 32);
    pub const ALL: Self = Self(0xFF);

    pub fn admits(self, bits: Self) -> bool {
        self.0 & bits.0 != 0
    }
}

impl BitOr for ScriptMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromStr for ScriptMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = Self::NONE;
        for part in s.split(['|', ',']) {
            mask = mask
                | match part.trim().to_ascii_lowercase().as_str() {
                    "p2pk" => Self::P2PK,
                    "p2pkh" => Self::P2PKH,
                    "p2sh" => Self::P2SH,
                    "multisig" => Self::MULTISIG,
                    "p2pkhw" => Self::P2PKHW,
                    "p2shw" => Self::P2SHW,
                    "nulldata" => Self::NULL_DATA,
                    "nonstandard" => Self::NON_STANDARD,
                    "payto" => Self::PAY_TO,
                    "witness" => Self::WITNESS,
                    "standard" => Self::STANDARD,
                    "all" => Self::ALL,
                    other => return Err(format!("unknown script class: '{other}'")),
                };
        }
        Ok(mask)
    }
}

/// Classifies an output script and produces its compact payload.
///
/// Patterns are matched byte-exactly in precedence order; the first match
/// wins. A script whose class is not selected by `mask` yields
/// `(ScriptType::None, empty)`. Every input is classifiable, so there is no
/// error path: anything unrecognized is `NonStandard`.
pub fn classify(script: &[u8], mask: ScriptMask) -> (ScriptType, Vec<u8>) {
    let len = script.len();

    // OP_RETURN <data>, up to the standard relay limit
    if len > 0 && script[0] == op::RETURN && len <= MAX_OP_RETURN_RELAY {
        if mask.admits(ScriptMask::NULL_DATA) {
            return (ScriptType::NullData, script[1..].to_vec());
        }
        return (ScriptType::None, Vec::new());
    }

    // OP_DUP OP_HASH160 <pubKeyHash:20> OP_EQUALVERIFY OP_CHECKSIG
    if len == 25
        && script[0] == op::DUP
        && script[1] == op::HASH160
        && script[2] == 20
        && script[23] == op::EQUALVERIFY
        && script[24] == op::CHECKSIG
    {
        if mask.admits(ScriptMask::P2PKH) {
            return (ScriptType::P2PKH, script[3..23].to_vec());
        }
        return (ScriptType::None, Vec::new());
    }

    // <compressedPubKey:33> OP_CHECKSIG
    if len == 35 && script[0] == 33 && script[34] == op::CHECKSIG {
        if mask.admits(ScriptMask::P2PK) {
            return (ScriptType::P2PK, script[1..34].to_vec());
        }
        return (ScriptType::None, Vec::new());
    }

    // <uncompressedPubKey:65> OP_CHECKSIG
    if len == 67 && script[0] == 65 && script[66] == op::CHECKSIG {
        if mask.admits(ScriptMask::P2PK) {
            return (ScriptType::P2PK, script[1..66].to_vec());
        }
        return (ScriptType::None, Vec::new());
    }

    // OP_HASH160 <scriptHash:20> OP_EQUAL
    if len == 23
        && script[0] == op::HASH160
        && script[1] == 20
        && script[22] == op::EQUAL
    {
        if mask.admits(ScriptMask::P2SH) {
            return (ScriptType::P2SH, script[2..22].to_vec());
        }
        return (ScriptType::None, Vec::new());
    }

    // OP_m <pubkey * n> OP_n OP_CHECKMULTISIG, or a lookalike
    if mask.admits(ScriptMask::MULTISIG | ScriptMask::NON_STANDARD)
        && len >= 3 + 34
        && script[len - 1] == op::CHECKMULTISIG
        && is_op_1_to_3(script[len - 2])
        && is_op_1_to_3(script[0])
    {
        // standard: 1 <= m <= n <= 3, per Core IsStandard in policy.cpp
        let n_keys = decode_op_n(script[len - 2]);
        let m_keys = decode_op_n(script[0]);
        if m_keys <= n_keys && multisig_keys_parse(script, n_keys) {
            if mask.admits(ScriptMask::MULTISIG) {
                // the whole script minus the trailing OP_CHECKMULTISIG
                return (ScriptType::MultiSig, script[..len - 1].to_vec());
            }
            return (ScriptType::None, Vec::new());
        }
        // fall through: shaped like multisig but the keys don't parse
    }

    if mask.admits(ScriptMask::NON_STANDARD) {
        return (ScriptType::NonStandard, script.to_vec());
    }
    (ScriptType::None, Vec::new())
}

/// Checks that the bytes between the leading OP_m and the trailing OP_n are
/// exactly `n_keys` push-ops of 33- or 65-byte public keys, with no leftover.
fn multisig_keys_parse(script: &[u8], n_keys: u8) -> bool {
    let end_of_keys = script.len() - 2;
    let mut ofs = 1;
    let mut remaining = n_keys;

    while ofs < end_of_keys && remaining > 0 {
        if script[ofs] == 65 && ofs + 66 <= end_of_keys {
            ofs += 66;
        } else if script[ofs] == 33 && ofs + 34 <= end_of_keys {
            ofs += 34;
        } else {
            return false;
        }
        remaining -= 1;
    }

    ofs == end_of_keys && remaining == 0
}

fn is_op_1_to_3(opcode: u8) -> bool {
    (op::OP_1..=op::OP_3).contains(&opcode)
}

fn decode_op_n(opcode: u8) -> u8 {
    opcode - (op::OP_1 - 1)
}

/// Reconstructs the full locking script from a classified `(type, payload)`
/// pair. Inverse of [`classify`] for the compacted classes; for `NullData`
/// and `NonStandard` the payload already carries everything.
pub fn expand(kind: ScriptType, payload: &[u8]) -> Vec<u8> {
    match kind {
        ScriptType::None => Vec::new(),
        ScriptType::P2PK => {
            let mut script = Vec::with_capacity(payload.len() + 2);
            script.push(payload.len() as u8);
            script.extend_from_slice(payload);
            script.push(op::CHECKSIG);
            script
        }
        ScriptType::P2PKH => {
            let mut script = Vec::with_capacity(25);
            script.extend_from_slice(&[op::DUP, op::HASH160, 20]);
            script.extend_from_slice(payload);
            script.extend_from_slice(&[op::EQUALVERIFY, op::CHECKSIG]);
            script
        }
        ScriptType::P2SH => {
            let mut script = Vec::with_capacity(23);
            script.extend_from_slice(&[op::HASH160, 20]);
            script.extend_from_slice(payload);
            script.push(op::EQUAL);
            script
        }
        ScriptType::MultiSig => {
            let mut script = Vec::with_capacity(payload.len() + 1);
            script.extend_from_slice(payload);
            script.push(op::CHECKMULTISIG);
            script
        }
        ScriptType::P2PKHW | ScriptType::P2SHW => {
            let mut script = Vec::with_capacity(payload.len() + 2);
            script.push(op::FALSE);
            script.push(payload.len() as u8);
            script.extend_from_slice(payload);
            script
        }
        ScriptType::NullData => {
            let mut script = Vec::with_capacity(payload.len() + 1);
            script.push(op::RETURN);
            script.extend_from_slice(payload);
            script
        }
        ScriptType::NonStandard => payload.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
        let mut s = vec![op::DUP, op::HASH160, 20];
        s.extend_from_slice(hash);
        s.extend_from_slice(&[op::EQUALVERIFY, op::CHECKSIG]);
        s
    }

    #[test]
    fn classifies_p2pkh_and_round_trips() {
        let hash = [0xCC; 20];
        let script = p2pkh_script(&hash);

        let (kind, payload) = classify(&script, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::P2PKH);
        assert_eq!(payload, hash.to_vec());

        assert_eq!(expand(kind, &payload), script);
    }

    #[test]
    fn classifies_p2sh_and_round_trips() {
        let hash = [0x42; 20];
        let mut script = vec![op::HASH160, 20];
        script.extend_from_slice(&hash);
        script.push(op::EQUAL);

        let (kind, payload) = classify(&script, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::P2SH);
        assert_eq!(payload, hash.to_vec());
        assert_eq!(expand(kind, &payload), script);
    }

    #[test]
    fn classifies_compressed_and_uncompressed_p2pk() {
        let mut compressed = vec![33u8];
        compressed.extend_from_slice(&[0x02; 33]);
        compressed.push(op::CHECKSIG);

        let (kind, payload) = classify(&compressed, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::P2PK);
        assert_eq!(payload.len(), 33);
        assert_eq!(expand(kind, &payload), compressed);

        let mut uncompressed = vec![65u8];
        uncompressed.extend_from_slice(&[0x04; 65]);
        uncompressed.push(op::CHECKSIG);

        let (kind, payload) = classify(&uncompressed, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::P2PK);
        assert_eq!(payload.len(), 65);
        assert_eq!(expand(kind, &payload), uncompressed);
    }

    #[test]
    fn null_data_respects_relay_limit() {
        let mut short = vec![op::RETURN];
        short.extend_from_slice(&[0xAB; 40]);

        let (kind, payload) = classify(&short, ScriptMask::ALL);
        assert_eq!(kind, ScriptType::NullData);
        assert_eq!(payload, vec![0xAB; 40]);

        // 84 bytes exceeds the relay limit and is no longer null-data
        let mut long = vec![op::RETURN];
        long.extend_from_slice(&[0xAB; 83]);
        assert_eq!(long.len(), 84);

        let (kind, payload) = classify(&long, ScriptMask::ALL);
        assert_eq!(kind, ScriptType::NonStandard);
        assert_eq!(payload, long);
    }

    #[test]
    fn null_data_dropped_without_mask_bit() {
        let mut script = vec![op::RETURN];
        script.extend_from_slice(b"such data");

        let (kind, payload) = classify(&script, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::None);
        assert!(payload.is_empty());
    }

    #[test]
    fn standard_multisig_round_trips() {
        // 2-of-3 with compressed keys
        let mut script = vec![op::OP_1 + 1];
        for _ in 0..3 {
            script.push(33);
            script.extend_from_slice(&[0x03; 33]);
        }
        script.push(op::OP_3);
        script.push(op::CHECKMULTISIG);

        let (kind, payload) = classify(&script, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::MultiSig);
        assert_eq!(payload, script[..script.len() - 1].to_vec());
        assert_eq!(expand(kind, &payload), script);
    }

    #[test]
    fn multisig_lookalike_falls_through() {
        // claims 3 keys but carries only 2
        let mut script = vec![op::OP_1];
        for _ in 0..2 {
            script.push(33);
            script.extend_from_slice(&[0x03; 33]);
        }
        script.push(op::OP_3);
        script.push(op::CHECKMULTISIG);

        let (kind, _) = classify(&script, ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::None);

        let (kind, payload) = classify(&script, ScriptMask::ALL);
        assert_eq!(kind, ScriptType::NonStandard);
        assert_eq!(payload, script);
    }

    #[test]
    fn standard_multisig_not_misfiled_as_nonstandard() {
        // a standard multisig with only the non-standard bit set is dropped,
        // not retained as non-standard
        let mut script = vec![op::OP_1];
        script.push(33);
        script.extend_from_slice(&[0x03; 33]);
        script.push(op::OP_1);
        script.push(op::CHECKMULTISIG);

        let (kind, payload) = classify(&script, ScriptMask::NON_STANDARD);
        assert_eq!(kind, ScriptType::None);
        assert!(payload.is_empty());
    }

    #[test]
    fn empty_script_is_non_standard() {
        let (kind, payload) = classify(&[], ScriptMask::ALL);
        assert_eq!(kind, ScriptType::NonStandard);
        assert!(payload.is_empty());

        let (kind, _) = classify(&[], ScriptMask::STANDARD);
        assert_eq!(kind, ScriptType::None);
    }

    #[test]
    fn masked_out_p2pkh_yields_none() {
        let script = p2pkh_script(&[0x11; 20]);
        let (kind, payload) = classify(&script, ScriptMask::P2SH);
        assert_eq!(kind, ScriptType::None);
        assert!(payload.is_empty());
    }

    #[test]
    fn mask_parses_from_names() {
        assert_eq!("standard".parse::<ScriptMask>(), Ok(ScriptMask::STANDARD));
        assert_eq!(
            "payto|nulldata".parse::<ScriptMask>(),
            Ok(ScriptMask::PAY_TO | ScriptMask::NULL_DATA)
        );
        assert!("dunes".parse::<ScriptMask>().is_err());
    }
}
