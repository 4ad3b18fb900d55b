// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The dotted-name/wire-name codec.
//!
//! Domain names appear in DNS messages as a sequence of
//! length-prefixed labels terminated by a null octet ([RFC 1035
//! § 3.1]). The responder works with names in this wire form
//! throughout: the zone compiler encodes zone names once at load time,
//! and incoming QNAMEs are matched against those encodings without
//! ever being decoded. [`decode`] exists for the human-readable side
//! of things (the per-request log line) and deliberately does *not*
//! follow compression pointers; the responder only ever emits them.
//!
//! [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1

use std::fmt;

use arrayvec::ArrayVec;

/// The maximum length of the on-the-wire representation of a domain
/// name.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
pub const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// ENCODING AND DECODING                                              //
////////////////////////////////////////////////////////////////////////

/// Encodes a dotted domain name into its on-the-wire representation.
///
/// An empty input encodes to the root name (a single null octet). A
/// single trailing dot is tolerated. The input must be ASCII; a label
/// longer than [`MAX_LABEL_LEN`] octets or an encoding longer than
/// [`MAX_WIRE_LEN`] octets fails.
pub fn encode(host: &str) -> Result<Vec<u8>, Error> {
    if !host.is_ascii() {
        return Err(Error::NotAscii);
    }
    let host = host.strip_suffix('.').unwrap_or(host);
    let mut wire = ArrayVec::<u8, MAX_WIRE_LEN>::new();
    if !host.is_empty() {
        for label in host.split('.') {
            if label.is_empty() {
                return Err(Error::EmptyLabel);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            wire.try_push(label.len() as u8)
                .map_err(|_| Error::NameTooLong)?;
            wire.try_extend_from_slice(label.as_bytes())
                .map_err(|_| Error::NameTooLong)?;
        }
    }
    wire.try_push(0).map_err(|_| Error::NameTooLong)?;
    Ok(wire.to_vec())
}

/// Decodes the on-the-wire domain name at the start of `wire` into its
/// dotted form, returning it along with the number of octets consumed.
///
/// The root name decodes to the empty string. Compression pointers are
/// not supported (the responder uses them only on its own output), so
/// a length octet with either of its top two bits set fails with
/// [`Error::Compressed`].
pub fn decode(wire: &[u8]) -> Result<(String, usize), Error> {
    let mut host = String::new();
    let mut pos = 0;
    loop {
        let len = *wire.get(pos).ok_or(Error::UnexpectedEnd)? as usize;
        if len & 0xc0 != 0 {
            return Err(Error::Compressed);
        }
        pos += 1;
        if len == 0 {
            break;
        }
        let label = wire.get(pos..pos + len).ok_or(Error::UnexpectedEnd)?;
        pos += len;
        if pos + 1 > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        if !host.is_empty() {
            host.push('.');
        }
        for &octet in label {
            host.push(octet as char);
        }
    }
    Ok((host, pos))
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error type used to report problems encoding and decoding domain
/// names.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// A compression pointer was encountered while decoding.
    Compressed,

    /// An empty (null) label was found in a non-terminal position.
    EmptyLabel,

    /// A label was longer than 63 octets.
    LabelTooLong,

    /// The name is too long (longer than 255 octets on the wire).
    NameTooLong,

    /// The dotted input was not strictly ASCII.
    NotAscii,

    /// The buffer ended before the name's terminating null octet.
    UnexpectedEnd,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Compressed => f.write_str("name is compressed"),
            Self::EmptyLabel => f.write_str("non-terminal label is empty"),
            Self::LabelTooLong => f.write_str("label is longer than 63 octets on the wire"),
            Self::NameTooLong => f.write_str("name is longer than 255 octets on the wire"),
            Self::NotAscii => f.write_str("name is not ASCII"),
            Self::UnexpectedEnd => f.write_str("unexpected end of buffer"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
