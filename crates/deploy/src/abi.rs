//! Minimal ABI encoding for constructor and call arguments.
//!
//! Only the argument types the protocol's constructors and initializers use are
//! supported: static `address`, `uint256`, `bool` words and dynamic `bytes`.

use alloy_core::primitives::{Address, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};

/// A single ABI argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Arg {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes(Bytes),
}

impl Arg {
    pub fn uint(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }

    pub fn abi_type(&self) -> &'static str {
        match self {
            Arg::Address(_) => "address",
            Arg::Uint(_) => "uint256",
            Arg::Bool(_) => "bool",
            Arg::Bytes(_) => "bytes",
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Arg::Address(addr) => Some(*addr),
            _ => None,
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Arg::Bytes(_))
    }
}

impl From<Address> for Arg {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<U256> for Arg {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Address(addr) => write!(f, "{addr}"),
            Arg::Uint(value) => write!(f, "{value}"),
            Arg::Bool(value) => write!(f, "{value}"),
            Arg::Bytes(data) => write!(f, "0x{}", hex::encode(data)),
        }
    }
}

/// Canonical signature, e.g. `initialize(address,uint256)`.
pub fn signature(method: &str, args: &[Arg]) -> String {
    let types: Vec<_> = args.iter().map(Arg::abi_type).collect();
    format!("{}({})", method, types.join(","))
}

/// Four-byte function selector of `method` called with `args`.
pub fn selector(method: &str, args: &[Arg]) -> [u8; 4] {
    let hash = keccak256(signature(method, args).as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word_u256(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn word_address(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

/// ABI-encode a tuple of arguments (head words followed by the dynamic tail).
pub fn encode_args(args: &[Arg]) -> Vec<u8> {
    let head_len = args.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        let word = match arg {
            Arg::Address(addr) => word_address(*addr),
            Arg::Uint(value) => word_u256(*value),
            Arg::Bool(value) => word_u256(U256::from(u8::from(*value))),
            Arg::Bytes(data) => {
                let offset = word_u256(U256::from(head_len + tail.len()));
                tail.extend_from_slice(&word_u256(U256::from(data.len())));
                tail.extend_from_slice(data);
                // Right-pad to a 32 byte boundary
                let padding = (32 - data.len() % 32) % 32;
                tail.extend(std::iter::repeat_n(0u8, padding));
                offset
            }
        };
        head.extend_from_slice(&word);
    }

    debug_assert!(args.iter().any(Arg::is_dynamic) || tail.is_empty());
    head.extend_from_slice(&tail);
    head
}

/// Calldata for `method(args)`.
pub fn encode_call(method: &str, args: &[Arg]) -> Bytes {
    let mut data = selector(method, args).to_vec();
    data.extend_from_slice(&encode_args(args));
    data.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    #[test]
    fn test_signature() {
        let args = [
            Arg::Address(Address::ZERO),
            Arg::uint(1),
            Arg::Bytes(Bytes::new()),
        ];
        assert_eq!(signature("initialize", &args), "initialize(address,uint256,bytes)");
        assert_eq!(signature("renounce", &[]), "renounce()");
    }

    #[test]
    fn test_transfer_ownership_selector() {
        // transferOwnership(address) = 0xf2fde38b
        let sel = selector("transferOwnership", &[Arg::Address(Address::ZERO)]);
        assert_eq!(hex::encode(sel), "f2fde38b");
    }

    #[test]
    fn test_encode_static_words() {
        let owner = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
        let encoded = encode_args(&[Arg::Address(owner), Arg::uint(0x2a), Arg::Bool(true)]);

        assert_eq!(encoded.len(), 3 * 32);
        assert_eq!(
            hex::encode(&encoded[..32]),
            "00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8"
        );
        assert_eq!(encoded[63], 0x2a);
        assert_eq!(encoded[95], 1);
    }

    #[test]
    fn test_encode_dynamic_bytes() {
        let data = Bytes::from(vec![0xab; 33]);
        let encoded = encode_args(&[Arg::Address(Address::ZERO), Arg::Bytes(data)]);

        // 2 head words, 1 length word, 2 data words (33 bytes padded to 64)
        assert_eq!(encoded.len(), 5 * 32);
        // Offset of the tail is the size of the head
        assert_eq!(encoded[63], 64);
        // Length word
        assert_eq!(encoded[95], 33);
        assert_eq!(encoded[96], 0xab);
        assert_eq!(encoded[128], 0xab);
        assert!(encoded[129..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_call_prefixes_selector() {
        let args = [Arg::Address(Address::ZERO)];
        let call = encode_call("transferOwnership", &args);
        assert_eq!(call.len(), 4 + 32);
        assert_eq!(&call[..4], &selector("transferOwnership", &args));
    }
}
