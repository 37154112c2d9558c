// tessera/core/execution/src/abi/array.rs

use super::utils::{abi_require, padded_big_endian, read_abi_list, read_length, AbiListWriter};
use super::{AbiDecodeError, AbiVariable};

impl<T: AbiVariable> AbiVariable for Vec<T> {
    const STATIC_LENGTH: Option<usize> = None;

    fn from_abi(data: &[u8]) -> Result<Self, AbiDecodeError> {
        let pointer = &mut data.iter();

        let expected_length = read_length(pointer, "Incomplete length for dynamic input parameter")?;
        let data_without_length = pointer.as_slice();
        // every element takes at least one 32-byte head slot
        abi_require(
            expected_length <= data_without_length.len() / 32,
            "Array length out of bounds",
        )?;
        let mut results = Vec::with_capacity(expected_length);
        for _ in 0..expected_length {
            results.push(read_abi_list::<T>(data_without_length, pointer)?);
        }
        Ok(results)
    }

    fn to_abi(&self) -> Vec<u8> {
        let mut answer = padded_big_endian(self.len());
        let mut recorder =
            AbiListWriter::with_heads_length(T::STATIC_LENGTH.unwrap_or(32) * self.len());
        for item in self {
            recorder.write_down(item);
        }
        answer.extend_from_slice(&recorder.into_bytes());
        answer
    }
}
