// tessera/core/execution/src/abi/utils.rs

use super::{AbiDecodeError, AbiVariable};
use primitive_types::U256;
use std::slice::Iter;

/// 32-byte big-endian word holding `value`.
pub fn padded_big_endian(value: usize) -> Vec<u8> {
    let mut bytes = [0u8; 32];
    U256::from(value).to_big_endian(&mut bytes);
    bytes.to_vec()
}

/// Reads the next item of a heads/tails list. Static items are inline in the
/// head; dynamic items store an offset into `data`.
pub fn read_abi_list<T: AbiVariable>(
    data: &[u8],
    pointer: &mut Iter<u8>,
) -> Result<T, AbiDecodeError> {
    let res = if let Some(len) = T::STATIC_LENGTH {
        pull_slice(pointer, len, "Incomplete static input parameter")?
    } else {
        let location = U256::from_big_endian(pull_slice(
            pointer,
            32,
            "Incomplete location for dynamic input parameter",
        )?);
        abi_require(location < U256::from(data.len()), "Location out of bounds")?;
        &data[location.as_usize()..]
    };
    T::from_abi(res)
}

/// Length prefix of a dynamic value, bounded by the bytes that follow it.
pub fn read_length(pointer: &mut Iter<u8>, desc: &'static str) -> Result<usize, AbiDecodeError> {
    let length = U256::from_big_endian(pull_slice(pointer, 32, desc)?);
    abi_require(length <= U256::from(pointer.len()), "Length out of bounds")?;
    Ok(length.as_usize())
}

/// Encodes a list as heads followed by tails.
pub struct AbiListWriter {
    heads_length: usize,
    heads: Vec<u8>,
    tails: Vec<u8>,
}

impl AbiListWriter {
    pub fn with_heads_length(heads_length: usize) -> Self {
        Self {
            heads_length,
            heads: Vec::with_capacity(heads_length),
            tails: Vec::new(),
        }
    }

    pub fn write_down<T: AbiVariable>(&mut self, input: &T) {
        let encoded = input.to_abi();
        if T::STATIC_LENGTH.is_some() {
            self.heads.extend_from_slice(&encoded);
        } else {
            self.heads
                .extend_from_slice(&padded_big_endian(self.tails.len() + self.heads_length));
            self.tails.extend_from_slice(&encoded);
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        debug_assert_eq!(self.heads.len(), self.heads_length);
        self.heads.append(&mut self.tails);
        self.heads
    }
}

#[inline]
pub fn abi_require(claim: bool, desc: &'static str) -> Result<(), AbiDecodeError> {
    if !claim {
        Err(AbiDecodeError(desc))
    } else {
        Ok(())
    }
}

#[inline]
pub fn pull_slice<'a>(
    iter: &mut Iter<'a, u8>,
    n: usize,
    err_desc: &'static str,
) -> Result<&'a [u8], AbiDecodeError> {
    abi_require(iter.len() >= n, err_desc)?;

    let slice = iter.as_slice();
    let result = &slice[0..n];
    *iter = slice[n..].iter();
    Ok(result)
}
