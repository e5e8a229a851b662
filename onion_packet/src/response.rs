/*! Responses sent back through an onion path

A guard answers a version 3 request with `{ "result": base64(iv || ct) }`
and a version 4 request with the raw `iv || ct`. Once decrypted, version 3
plaintext is JSON `{ "status" | "status_code", "body"? }` while version 4
plaintext is a bencoded list `l<len>:<info json>[<len>:<body>]e`.
*/

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use nom::bytes::complete::{tag, take, take_while1};
use nom::combinator::{all_consuming, map_res};
use nom::multi::many0;
use nom::sequence::{delimited, terminated};
use nom::IResult;
use serde_json::{json, Value};

use crate::destination::OnionVersion;
use crate::errors::ResponseError;

/// Status a destination reports when the client clock is off.
pub const CLOCK_OUT_OF_SYNC_STATUS: u16 = 406;

/// Status version 4 servers report when the client clock is off.
pub const TOO_EARLY_STATUS: u16 = 425;

/// Decrypted response of a destination.
#[derive(Clone, Debug, PartialEq)]
pub struct OnionResponse {
    /// HTTP status reported by the destination.
    pub status_code: u16,
    /// JSON metadata: the body for version 3, the info dict for version 4.
    pub info: Value,
    /// Raw body bytes, `None` when empty.
    pub body: Option<Vec<u8>>,
}

impl OnionResponse {
    /// Check if the status reports a clock skew.
    pub fn is_clock_out_of_sync(&self) -> bool {
        self.status_code == CLOCK_OUT_OF_SYNC_STATUS || self.status_code == TOO_EARLY_STATUS
    }

    /// Check if the status is a success. Only `200` counts.
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Body parsed as JSON. Falls back to `info` when there is no JSON body.
    pub fn json(&self) -> Value {
        self.body.as_deref()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or_else(|| self.info.clone())
    }
}

/// Extract `iv || ciphertext` from the raw guard response.
pub fn parse_guard_response(body: &[u8], version: OnionVersion) -> Result<Vec<u8>, ResponseError> {
    match version {
        OnionVersion::V4 => Ok(body.to_vec()),
        OnionVersion::V3 => {
            let json: Value = serde_json::from_slice(body)
                .unwrap_or_else(|_| json!({ "result": String::from_utf8_lossy(body) }));
            let result = json.get("result")
                .and_then(Value::as_str)
                .ok_or(ResponseError::MissingField("result"))?;
            BASE64.decode(result).map_err(|e| ResponseError::InvalidBase64(e.to_string()))
        },
    }
}

/// Parse decrypted version 3 plaintext.
pub fn parse_v3_response(plaintext: &[u8]) -> Result<OnionResponse, ResponseError> {
    let json: Value = serde_json::from_slice(plaintext)
        .map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    let status_code = json.get("status_code")
        .or_else(|| json.get("status"))
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .ok_or(ResponseError::MissingField("status"))?;
    let info = match json.get("body") {
        None | Some(Value::Null) => json.clone(),
        Some(Value::String(body)) => serde_json::from_str(body)
            .map_err(|e| ResponseError::InvalidJson(e.to_string()))?,
        Some(body) => body.clone(),
    };
    let body = serde_json::to_vec(&info)
        .map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    Ok(OnionResponse {
        status_code,
        info,
        body: Some(body),
    })
}

/// Parse decrypted version 4 plaintext.
pub fn parse_v4_response(plaintext: &[u8]) -> Result<OnionResponse, ResponseError> {
    let items = parse_bencoded_list(plaintext)?;
    let (info, body) = match items.as_slice() {
        [info] => (*info, None),
        [info, body] => (*info, Some(*body)),
        _ => return Err(ResponseError::InvalidBencode),
    };
    let info: Value = serde_json::from_slice(info)
        .map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    let status_code = match info.get("code") {
        Some(Value::Number(code)) => code.as_u64(),
        Some(Value::String(code)) => code.parse().ok(),
        _ => None,
    }
        .and_then(|code| u16::try_from(code).ok())
        .ok_or(ResponseError::MissingField("code"))?;
    Ok(OnionResponse {
        status_code,
        info,
        body: body.filter(|body| !body.is_empty()).map(<[u8]>::to_vec),
    })
}

/// Encode byte strings as a bencoded list.
pub fn bencode_list(items: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + items.iter().map(|item| item.len() + 8).sum::<usize>());
    out.push(b'l');
    for item in items {
        out.extend_from_slice(item.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(item);
    }
    out.push(b'e');
    out
}

fn byte_string(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = map_res(
        terminated(take_while1(|b: u8| b.is_ascii_digit()), tag(":")),
        |digits: &[u8]| std::str::from_utf8(digits).unwrap_or_default().parse::<usize>()
    )(input)?;
    take(len)(input)
}

/// Parse a bencoded list of byte strings.
pub fn parse_bencoded_list(input: &[u8]) -> Result<Vec<&[u8]>, ResponseError> {
    all_consuming(delimited(tag("l"), many0(byte_string), tag("e")))(input)
        .map(|(_, items)| items)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| ResponseError::InvalidBencode)
}
