// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CoAP message codec (RFC 7252) with block-wise options (RFC 7959).
//!
//! Wire layout:
//!
//! ```text
//! 0                   1                   2                   3
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! |   Token (TKL bytes) ...
//! |   Options (delta-encoded) ...
//! |1 1 1 1 1 1 1 1|    Payload ...
//! ```
//!
//! Only the option numbers the USP binding needs are modelled by name;
//! unknown options are carried opaquely.

use crate::error::{Result, UspError};

/// Message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl CoapType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Confirmable => 0,
            Self::NonConfirmable => 1,
            Self::Acknowledgement => 2,
            Self::Reset => 3,
        }
    }
}

/// Method and response codes (`class.detail` packed as `class << 5 | detail`).
pub mod code {
    pub const EMPTY: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const POST: u8 = 0x02;
    pub const CHANGED: u8 = 0x44; // 2.04
    pub const CONTENT: u8 = 0x45; // 2.05
    pub const CONTINUE: u8 = 0x5f; // 2.31
    pub const BAD_REQUEST: u8 = 0x80; // 4.00
    pub const NOT_FOUND: u8 = 0x84; // 4.04
    pub const METHOD_NOT_ALLOWED: u8 = 0x85; // 4.05
    pub const REQUEST_ENTITY_INCOMPLETE: u8 = 0x88; // 4.08
    pub const REQUEST_ENTITY_TOO_LARGE: u8 = 0x8d; // 4.13
    pub const INTERNAL_SERVER_ERROR: u8 = 0xa0; // 5.00
}

/// Option numbers used by the USP CoAP binding.
pub mod option {
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
    pub const SIZE1: u16 = 60;
}

/// Content-Format `application/octet-stream`, used for USP records.
pub const CONTENT_FORMAT_OCTET_STREAM: u32 = 42;

/// A Block1/Block2 option value: block number, more flag, size exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

impl BlockOption {
    pub fn new(num: u32, more: bool, block_size: usize) -> Self {
        // szx encodes 2^(szx+4); valid block sizes are 16..=1024.
        let szx = match block_size {
            16 => 0,
            32 => 1,
            64 => 2,
            128 => 3,
            256 => 4,
            512 => 5,
            _ => 6,
        };
        Self { num, more, szx }
    }

    pub fn block_size(&self) -> usize {
        1usize << (self.szx + 4)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() > 3 {
            return Err(UspError::Internal("block option longer than 3 bytes".into()));
        }
        let mut value: u32 = 0;
        for &b in raw {
            value = (value << 8) | u32::from(b);
        }
        let szx = (value & 0x7) as u8;
        if szx == 7 {
            return Err(UspError::Internal("reserved block size exponent 7".into()));
        }
        Ok(Self {
            num: value >> 4,
            more: value & 0x8 != 0,
            szx,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let value = (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx);
        if value == 0 {
            return vec![0];
        }
        let mut out = value.to_be_bytes().to_vec();
        while out.len() > 1 && out[0] == 0 {
            out.remove(0);
        }
        out
    }
}

/// A decoded CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub mtype: CoapType,
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    /// Options as `(number, value)`, kept sorted by number.
    pub options: Vec<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl CoapMessage {
    pub fn new(mtype: CoapType, code: u8, message_id: u16, token: &[u8]) -> Self {
        Self {
            mtype,
            code,
            message_id,
            token: token.to_vec(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// An ACK answering `req` with the given code.
    pub fn ack(req: &CoapMessage, code: u8) -> Self {
        Self::new(CoapType::Acknowledgement, code, req.message_id, &req.token)
    }

    /// A Reset answering a message we cannot process.
    pub fn reset(req: &CoapMessage) -> Self {
        Self::new(CoapType::Reset, code::EMPTY, req.message_id, &[])
    }

    pub fn add_option(&mut self, number: u16, value: Vec<u8>) {
        self.options.push((number, value));
        self.options.sort_by_key(|(n, _)| *n);
    }

    pub fn with_option(mut self, number: u16, value: Vec<u8>) -> Self {
        self.add_option(number, value);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, v)| v.as_slice())
    }

    /// All Uri-Path segments joined with `/`.
    pub fn uri_path(&self) -> String {
        let segs: Vec<String> = self
            .options
            .iter()
            .filter(|(n, _)| *n == option::URI_PATH)
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
            .collect();
        segs.join("/")
    }

    /// Append each `/`-separated segment of `path` as a Uri-Path option.
    pub fn set_uri_path(&mut self, path: &str) {
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(option::URI_PATH, seg.as_bytes().to_vec());
        }
    }

    pub fn block1(&self) -> Option<Result<BlockOption>> {
        self.option(option::BLOCK1).map(BlockOption::decode)
    }

    pub fn block2(&self) -> Option<Result<BlockOption>> {
        self.option(option::BLOCK2).map(BlockOption::decode)
    }

    pub fn is_request(&self) -> bool {
        (1..=31).contains(&self.code)
    }

    pub fn code_class(&self) -> u8 {
        self.code >> 5
    }

    // ------------------------------------------------------------------
    // Wire codec
    // ------------------------------------------------------------------

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.payload.len());
        debug_assert!(self.token.len() <= 8);
        out.push(0x40 | (self.mtype.bits() << 4) | (self.token.len() as u8));
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut last_number = 0u16;
        for (number, value) in &self.options {
            let delta = number - last_number;
            last_number = *number;
            let (dnib, dext) = Self::encode_option_field(u32::from(delta));
            let (lnib, lext) = Self::encode_option_field(value.len() as u32);
            out.push((dnib << 4) | lnib);
            out.extend_from_slice(&dext);
            out.extend_from_slice(&lext);
            out.extend_from_slice(value);
        }

        if !self.payload.is_empty() {
            out.push(0xff);
            out.extend_from_slice(&self.payload);
        }
        out
    }

    fn encode_option_field(value: u32) -> (u8, Vec<u8>) {
        if value < 13 {
            (value as u8, Vec::new())
        } else if value < 269 {
            (13, vec![(value - 13) as u8])
        } else {
            (14, ((value - 269) as u16).to_be_bytes().to_vec())
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let bad = |what: &str| UspError::Internal(format!("malformed CoAP message: {what}"));
        if buf.len() < 4 {
            return Err(bad("shorter than the fixed header"));
        }
        let version = buf[0] >> 6;
        if version != 1 {
            return Err(bad("unsupported version"));
        }
        let mtype = CoapType::from_bits((buf[0] >> 4) & 0x3);
        let tkl = (buf[0] & 0xf) as usize;
        if tkl > 8 {
            return Err(bad("token longer than 8 bytes"));
        }
        let code = buf[1];
        let message_id = u16::from_be_bytes([buf[2], buf[3]]);
        if buf.len() < 4 + tkl {
            return Err(bad("truncated token"));
        }
        let token = buf[4..4 + tkl].to_vec();

        let mut options = Vec::new();
        let mut payload = Vec::new();
        let mut i = 4 + tkl;
        let mut number = 0u32;
        while i < buf.len() {
            if buf[i] == 0xff {
                if i + 1 >= buf.len() {
                    return Err(bad("payload marker with empty payload"));
                }
                payload = buf[i + 1..].to_vec();
                break;
            }
            let dnib = buf[i] >> 4;
            let lnib = buf[i] & 0xf;
            i += 1;
            let (delta, di) = Self::decode_option_field(buf, i, dnib).ok_or_else(|| bad("bad option delta"))?;
            i = di;
            let (len, li) = Self::decode_option_field(buf, i, lnib).ok_or_else(|| bad("bad option length"))?;
            i = li;
            if buf.len() < i + len as usize {
                return Err(bad("truncated option value"));
            }
            number += delta;
            if number > u32::from(u16::MAX) {
                return Err(bad("option number overflow"));
            }
            options.push((number as u16, buf[i..i + len as usize].to_vec()));
            i += len as usize;
        }

        Ok(Self {
            mtype,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }

    fn decode_option_field(buf: &[u8], i: usize, nibble: u8) -> Option<(u32, usize)> {
        match nibble {
            0..=12 => Some((u32::from(nibble), i)),
            13 => buf.get(i).map(|&b| (u32::from(b) + 13, i + 1)),
            14 => {
                let hi = *buf.get(i)?;
                let lo = *buf.get(i + 1)?;
                Some((u32::from(u16::from_be_bytes([hi, lo])) + 269, i + 2))
            }
            _ => None, // 15 is the payload marker, illegal here
        }
    }
}

/// Encode a Content-Format value with minimal length.
pub fn content_format_bytes(format: u32) -> Vec<u8> {
    if format == 0 {
        Vec::new()
    } else if format < 256 {
        vec![format as u8]
    } else {
        (format as u16).to_be_bytes().to_vec()
    }
}
