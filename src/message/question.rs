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

//! Scanning of the question section of a received query.

use super::constants::HEADER_SIZE;
use crate::rr::RType;

/// The question section of a received query, borrowed from the packet.
///
/// The responder never decompresses a QNAME: the raw bytes up to and
/// including the terminating null octet are the lookup key, and the
/// raw section (QNAME, QTYPE, QCLASS) is echoed verbatim into the
/// reply. QCLASS is scanned past but otherwise ignored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Question<'a> {
    /// The QNAME in wire form, including the terminating null octet.
    pub qname: &'a [u8],

    /// The QTYPE.
    pub qtype: RType,

    /// The entire question section, for echoing into the reply.
    pub section: &'a [u8],
}

impl<'a> Question<'a> {
    /// Scans the question section of the message in `packet`. This
    /// returns `None` when the QNAME's terminating null octet is
    /// missing or the QTYPE and QCLASS fields are truncated.
    pub fn scan(packet: &'a [u8]) -> Option<Self> {
        let body = packet.get(HEADER_SIZE..)?;
        let null = body.iter().position(|&octet| octet == 0)?;
        let fields = body.get(null + 1..null + 5)?;
        Some(Self {
            qname: &body[..=null],
            qtype: u16::from_be_bytes([fields[0], fields[1]]).into(),
            section: &body[..null + 5],
        })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
