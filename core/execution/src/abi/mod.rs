// tessera/core/execution/src/abi/mod.rs

//! Solidity ABI codec for precompiled call data.
//!
//! Function arguments are always encoded as a tuple: `encode(&(a, b))` for
//! two arguments and `encode(&(a,))` for one. Nested tuples encode Solidity
//! structs, so `(String, Vec<String>)` is the `(string,string[])` entry type
//! used by the table contracts.

mod array;
mod basic;
pub mod utils;

use crate::crypto::CryptoSuite;
use thiserror::Error;
use utils::{read_abi_list, AbiListWriter};

/// Selector of `Error(string)`, the standard revert payload.
pub const REVERT_REASON_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("abi decode error: {0}")]
pub struct AbiDecodeError(pub &'static str);

pub trait AbiVariable: Sized {
    /// Encoded size for static types, `None` for dynamic ones.
    const STATIC_LENGTH: Option<usize>;

    fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError>;
    fn to_abi(&self) -> Vec<u8>;
}

impl AbiVariable for () {
    const STATIC_LENGTH: Option<usize> = Some(0);

    fn from_abi(_: &[u8]) -> Result<Self, AbiDecodeError> {
        Ok(())
    }

    fn to_abi(&self) -> Vec<u8> {
        Vec::new()
    }
}

macro_rules! impl_abi_tuple {
    ($( ($idx:tt => $name:ident) ),+ ) => {
        impl<$($name: AbiVariable),+> AbiVariable for ($($name,)+) {
            const STATIC_LENGTH: Option<usize> = {
                let mut total = 0;
                let mut is_static = true;
                $(
                    match $name::STATIC_LENGTH {
                        Some(len) => total += len,
                        None => is_static = false,
                    }
                )+
                if is_static { Some(total) } else { None }
            };

            fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
                let mut pointer = data.iter();
                Ok(($(read_abi_list::<$name>(data, &mut pointer)?,)+))
            }

            fn to_abi(&self) -> Vec<u8> {
                let heads_length: usize = 0 $( + $name::STATIC_LENGTH.unwrap_or(32) )+;
                let mut recorder = AbiListWriter::with_heads_length(heads_length);
                $(recorder.write_down(&self.$idx);)+
                recorder.into_bytes()
            }
        }
    };
}

impl_abi_tuple!((0 => A));
impl_abi_tuple!((0 => A), (1 => B));
impl_abi_tuple!((0 => A), (1 => B), (2 => C));
impl_abi_tuple!((0 => A), (1 => B), (2 => C), (3 => D));

/// Encodes an argument tuple.
pub fn encode<T: AbiVariable>(params: &T) -> Vec<u8> {
    params.to_abi()
}

/// Decodes an argument tuple. Trailing bytes are ignored.
pub fn decode<T: AbiVariable>(data: &[u8]) -> Result<T, AbiDecodeError> {
    match T::STATIC_LENGTH {
        Some(len) => {
            utils::abi_require(data.len() >= len, "Incomplete static input parameter")?;
            T::from_abi(&data[..len])
        }
        None => T::from_abi(data),
    }
}

/// First four bytes of the suite hash of a canonical signature such as
/// `insert((string,string[]))`.
pub fn function_selector(suite: &dyn CryptoSuite, signature: &str) -> [u8; 4] {
    let hash = suite.hash(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash.as_bytes()[..4]);
    selector
}

/// Selector followed by encoded arguments.
pub fn encode_with_selector<T: AbiVariable>(selector: [u8; 4], params: &T) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend_from_slice(&encode(params));
    out
}

/// `Error(string)` payload carried by reverted frames.
pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    encode_with_selector(REVERT_REASON_SELECTOR, &(reason.to_string(),))
}

pub fn decode_revert_reason(output: &[u8]) -> Option<String> {
    if output.len() < 4 || output[..4] != REVERT_REASON_SELECTOR {
        return None;
    }
    decode::<(String,)>(&output[4..]).ok().map(|(reason,)| reason)
}
