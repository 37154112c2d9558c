// tessera/core/execution/src/abi/basic.rs

use super::utils::{abi_require, padded_big_endian, pull_slice, read_length};
use super::{AbiDecodeError, AbiVariable};
use tessera_primitives::Address;

impl AbiVariable for Address {
    const STATIC_LENGTH: Option<usize> = Some(32);

    fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
        abi_require(data.len() == 32, "Invalid call data length")?;
        abi_require(data[..12].iter().all(|b| *b == 0), "Invalid address padding")?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&data[12..32]);
        Ok(Address(bytes))
    }

    fn to_abi(&self) -> Vec<u8> {
        let mut answer = vec![0u8; 12];
        answer.extend_from_slice(self.as_bytes());
        answer
    }
}

impl AbiVariable for bool {
    const STATIC_LENGTH: Option<usize> = Some(32);

    fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
        abi_require(data.len() == 32, "Invalid call data length")?;
        abi_require(data[..31].iter().all(|b| *b == 0), "Invalid bool padding")?;
        Ok(data[31] != 0)
    }

    fn to_abi(&self) -> Vec<u8> {
        let mut answer = vec![0u8; 32];
        answer[31] = *self as u8;
        answer
    }
}

macro_rules! impl_abi_variable_for_unsigned {
    ($($ty:ty),*) => {
        $(
            impl AbiVariable for $ty {
                const STATIC_LENGTH: Option<usize> = Some(32);

                fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
                    const BYTES: usize = <$ty>::BITS as usize / 8;
                    abi_require(data.len() == 32, "Invalid call data length")?;
                    abi_require(
                        data[..32 - BYTES].iter().all(|b| *b == 0),
                        "Integer overflow",
                    )?;
                    let mut be = [0u8; BYTES];
                    be.copy_from_slice(&data[32 - BYTES..]);
                    Ok(<$ty>::from_be_bytes(be))
                }

                fn to_abi(&self) -> Vec<u8> {
                    let mut answer = vec![0u8; 32];
                    let be = self.to_be_bytes();
                    answer[32 - be.len()..].copy_from_slice(&be);
                    answer
                }
            }
        )*
    };
}

impl_abi_variable_for_unsigned!(u8, u32, u64);

impl AbiVariable for i32 {
    const STATIC_LENGTH: Option<usize> = Some(32);

    fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
        abi_require(data.len() == 32, "Invalid call data length")?;
        let mut be = [0u8; 4];
        be.copy_from_slice(&data[28..]);
        let value = i32::from_be_bytes(be);
        let fill = if value < 0 { 0xff } else { 0x00 };
        abi_require(data[..28].iter().all(|b| *b == fill), "Integer overflow")?;
        Ok(value)
    }

    fn to_abi(&self) -> Vec<u8> {
        let fill = if *self < 0 { 0xff } else { 0x00 };
        let mut answer = vec![fill; 32];
        answer[28..].copy_from_slice(&self.to_be_bytes());
        answer
    }
}

impl AbiVariable for String {
    const STATIC_LENGTH: Option<usize> = None;

    fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
        let pointer = &mut data.iter();
        let length = read_length(pointer, "Incomplete length for string")?;
        let bytes = pull_slice(pointer, length, "Incomplete string")?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AbiDecodeError("Invalid utf8 string"))
    }

    fn to_abi(&self) -> Vec<u8> {
        let bytes = self.as_bytes();
        let mut answer = padded_big_endian(bytes.len());
        answer.extend_from_slice(bytes);
        let padding = (32 - bytes.len() % 32) % 32;
        answer.resize(answer.len() + padding, 0);
        answer
    }
}
