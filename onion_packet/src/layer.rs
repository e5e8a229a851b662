/*! Onion layer framing: `[u32 LE length][ciphertext][json metadata]`
*/

use nom::combinator::rest;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use onion_binary_io::*;
use onion_crypto::PublicKey;

use crate::errors::DecodeLayerError;

/** One layer of an onion request.

The ciphertext is meant for the hop receiving this layer, the metadata tells
it where the ciphertext should go next.
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OnionLayer {
    /// `iv || ciphertext || tag` of the inner payload.
    pub ciphertext: Vec<u8>,
    /// UTF-8 JSON object.
    pub metadata: Vec<u8>,
}

impl OnionLayer {
    /// Create a layer with metadata serialized from `metadata`.
    pub fn new<M: Serialize>(ciphertext: Vec<u8>, metadata: &M) -> Result<OnionLayer, DecodeLayerError> {
        let metadata = serde_json::to_vec(metadata)
            .map_err(|_| DecodeLayerError::Serialize)?;
        Ok(OnionLayer { ciphertext, metadata })
    }

    /// Body of the request sent to the guard: the outermost ciphertext and
    /// the ephemeral key it was encrypted with.
    pub fn guard_request(ciphertext: Vec<u8>, ephemeral_key: &PublicKey) -> OnionLayer {
        OnionLayer {
            ciphertext,
            metadata: json!({ "ephemeral_key": ephemeral_key.to_hex() }).to_string().into_bytes(),
        }
    }

    /// Payload a service node destination expects: the RPC JSON with empty
    /// headers.
    pub fn node_payload(payload: Vec<u8>) -> OnionLayer {
        OnionLayer {
            ciphertext: payload,
            metadata: json!({ "headers": "" }).to_string().into_bytes(),
        }
    }

    /// Parse metadata JSON into `T`.
    pub fn metadata_as<T: DeserializeOwned>(&self) -> Result<T, DecodeLayerError> {
        serde_json::from_slice(&self.metadata)
            .map_err(|e| DecodeLayerError::InvalidMetadata(e.to_string()))
    }

    /// Serialize this layer.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeLayerError> {
        self.to_vec().map_err(|_| DecodeLayerError::Serialize)
    }

    /// Parse a layer from raw bytes.
    pub fn decode(input: &[u8]) -> Result<OnionLayer, DecodeLayerError> {
        match OnionLayer::from_bytes(input) {
            Ok((_, layer)) => Ok(layer),
            Err(_) => Err(DecodeLayerError::Truncated),
        }
    }
}

impl FromBytes for OnionLayer {
    fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, ciphertext) = le_length_prefixed(input)?;
        let (input, metadata) = rest(input)?;
        Ok((input, OnionLayer {
            ciphertext: ciphertext.to_vec(),
            metadata: metadata.to_vec(),
        }))
    }
}

impl ToBytes for OnionLayer {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_call!(gen_le_length_prefixed, &self.ciphertext) >>
            gen_slice!(self.metadata.as_slice())
        )
    }

    fn size_hint(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.ciphertext.len() + self.metadata.len()
    }
}
