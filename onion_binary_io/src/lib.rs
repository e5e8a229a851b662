/*! Traits and helpers for the binary parts of onion requests.

Parsing is done with `nom` and generation with the buffer based
`cookie_factory` combinators. Every onion layer carries a little-endian
`u32` length prefix in front of the ciphertext, so helpers for that framing
live here as well.
*/

#![forbid(unsafe_code)]

#[macro_use]
extern crate cookie_factory;

pub use nom::IResult;
pub use cookie_factory::GenError;

use nom::multi::length_data;
use nom::number::complete::le_u32;

/// Size of the little-endian length prefix in front of a ciphertext.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// The trait provides method to deserialize struct from raw bytes
pub trait FromBytes: Sized {
    /// Deserialize struct using `nom` from raw bytes
    fn from_bytes(i: &[u8]) -> IResult<&[u8], Self>;
}

/// The trait provides method to serialize struct into raw bytes
pub trait ToBytes: Sized {
    /// Serialize struct into raw bytes using `cookie_factory`
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError>;

    /// Exact number of bytes `to_bytes` writes.
    fn size_hint(&self) -> usize;

    /// Serialize into a buffer allocated to fit.
    fn to_vec(&self) -> Result<Vec<u8>, GenError> {
        let mut buf = vec![0; self.size_hint()];
        let (_, size) = self.to_bytes((&mut buf, 0))?;
        buf.truncate(size);
        Ok(buf)
    }
}

/// Generator that always fails with a custom error code.
pub fn gen_error(_buf: (&mut [u8], usize), error: u32) -> Result<(&mut [u8], usize), GenError> {
    Err(GenError::CustomError(error))
}

/// Generator that fails when more than `limit` bytes were written so far.
pub fn gen_len_limit(buf: (&mut [u8], usize), limit: usize) -> Result<(&mut [u8], usize), GenError> {
    if buf.1 <= limit {
        Ok(buf)
    } else {
        Err(GenError::BufferTooBig(limit))
    }
}

/// Write `data` preceded by its length as little-endian `u32`.
pub fn gen_le_length_prefixed<'a>(buf: (&'a mut [u8], usize), data: &[u8]) -> Result<(&'a mut [u8], usize), GenError> {
    if data.len() > u32::MAX as usize {
        return Err(GenError::BufferTooBig(u32::MAX as usize));
    }
    do_gen!(buf,
        gen_le_u32!(data.len() as u32) >>
        gen_slice!(data)
    )
}

/// Parse bytes preceded by their length as little-endian `u32`.
pub fn le_length_prefixed(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(le_u32)(input)
}
