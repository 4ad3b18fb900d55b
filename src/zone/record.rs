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

//! The [`MatchRecord`] structure and the per-type RDATA builders.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::class::Class;
use crate::name;
use crate::rr::RType;

////////////////////////////////////////////////////////////////////////
// MATCH RECORDS                                                      //
////////////////////////////////////////////////////////////////////////

/// The key under which a [`MatchRecord`] list is stored: the encoded
/// lookup name and the record type. For wildcard records the encoded
/// name is stored without the leading length octet of its first label,
/// so that it behaves as a suffix to be searched for inside incoming
/// QNAMEs.
pub type MatchKey = (Vec<u8>, RType);

/// Whether a record matches its QNAME exactly or as a suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchKind {
    Exact,
    Wild,
}

/// One answerable (QNAME, QTYPE) pair, with its reply pre-assembled.
///
/// `rr` holds the concatenated resource records to paste directly
/// after the echoed question section of a reply. For records that were
/// not produced by a link directive it begins with the two-octet
/// compressed pointer to the echoed QNAME, so the same bytes answer
/// any QNAME a wildcard matched. `a_count`, `rra_count`, and
/// `ad_count` are copied into the reply header's answer, authority,
/// and additional counts; their sum always equals the number of
/// records packed into `rr`.
#[derive(Clone, Debug)]
pub struct MatchRecord {
    /// The printable owner name, for logging.
    pub fqdn: String,

    /// The printable record data, for logging.
    pub field: String,

    /// The encoded lookup name (see [`MatchKey`]).
    pub name: Vec<u8>,

    /// The record type.
    pub rtype: RType,

    /// The TTL carried by every record in `rr`. The value 1 is
    /// reserved and means "answer each source at most once".
    pub ttl: u32,

    /// The reply header's answer count.
    pub a_count: u16,

    /// The reply header's authority count.
    pub rra_count: u16,

    /// The reply header's additional count.
    pub ad_count: u16,

    /// The pre-built record bytes.
    pub rr: Vec<u8>,

    /// How the lookup name matches incoming QNAMEs.
    pub kind: MatchKind,
}

////////////////////////////////////////////////////////////////////////
// RECORD CONSTRUCTION                                                //
////////////////////////////////////////////////////////////////////////

// The fixed SOA integer block. The serial is stored in native byte
// order while its four neighbours are big-endian; this reproduces the
// original quantum-dns wire output.
const SOA_SERIAL: u32 = 0x1122_3344;
const SOA_REFRESH: u32 = 7200;
const SOA_RETRY: u32 = 7200;
const SOA_EXPIRE: u32 = 3_600_000;
const SOA_MINIMUM: u32 = 7200;

/// Appends one resource record (TYPE, CLASS IN, TTL, RDLENGTH, RDATA)
/// to `buf`. The owner name is not written here; callers precede this
/// with either the compressed QNAME pointer or a literal encoded name.
pub(super) fn push_rr(buf: &mut Vec<u8>, rtype: RType, ttl: u32, rdata: &[u8]) {
    buf.extend_from_slice(&u16::from(rtype).to_be_bytes());
    buf.extend_from_slice(&u16::from(Class::IN).to_be_bytes());
    buf.extend_from_slice(&ttl.to_be_bytes());
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(rdata);
}

/// Builds the RDATA for a record of type `rtype` from the zone line's
/// field token. Returns `None` when the field does not parse, which
/// causes the line to be skipped.
///
/// Note that TXT fields are deliberately encoded with the name
/// routine, not as RFC 1035 character-strings; this reproduces the
/// original quantum-dns output and is a known divergence.
pub(super) fn rdata(rtype: RType, field: &str) -> Option<Vec<u8>> {
    match rtype {
        RType::A => field
            .parse::<Ipv4Addr>()
            .ok()
            .map(|addr| addr.octets().to_vec()),
        RType::AAAA => field
            .parse::<Ipv6Addr>()
            .ok()
            .map(|addr| addr.octets().to_vec()),
        RType::NS | RType::CNAME | RType::PTR | RType::TXT => name::encode(field).ok(),
        RType::MX => {
            let target = name::encode(field).ok()?;
            let mut rdata = Vec::with_capacity(2 + target.len());
            rdata.extend_from_slice(&0u16.to_be_bytes()); // preference
            rdata.extend_from_slice(&target);
            Some(rdata)
        }
        RType::SOA => {
            let mname = name::encode(field).ok()?;
            let mut rdata = Vec::with_capacity(2 * mname.len() + 20);
            rdata.extend_from_slice(&mname);
            rdata.extend_from_slice(&mname);
            rdata.extend_from_slice(&SOA_SERIAL.to_ne_bytes());
            rdata.extend_from_slice(&SOA_REFRESH.to_be_bytes());
            rdata.extend_from_slice(&SOA_RETRY.to_be_bytes());
            rdata.extend_from_slice(&SOA_EXPIRE.to_be_bytes());
            rdata.extend_from_slice(&SOA_MINIMUM.to_be_bytes());
            Some(rdata)
        }
        RType::SRV => {
            let mut pieces = field.split(':');
            let host = pieces.next()?;
            let priority: u16 = pieces.next()?.parse().ok()?;
            let weight: u16 = pieces.next()?.parse().ok()?;
            let port: u16 = pieces.next()?.parse().ok()?;
            if pieces.next().is_some() {
                return None;
            }
            let target = name::encode(host).ok()?;
            let mut rdata = Vec::with_capacity(6 + target.len());
            rdata.extend_from_slice(&priority.to_be_bytes());
            rdata.extend_from_slice(&weight.to_be_bytes());
            rdata.extend_from_slice(&port.to_be_bytes());
            rdata.extend_from_slice(&target);
            Some(rdata)
        }
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rr_works() {
        let mut buf = Vec::new();
        push_rr(&mut buf, RType::A, 60, &[10, 0, 0, 1]);
        assert_eq!(
            buf,
            b"\x00\x01\x00\x01\x00\x00\x00\x3c\x00\x04\x0a\x00\x00\x01"
        );
    }

    #[test]
    fn a_rdata_works() {
        assert_eq!(rdata(RType::A, "10.0.0.1").unwrap(), [10, 0, 0, 1]);
        assert_eq!(rdata(RType::A, "10.0.0"), None);
        assert_eq!(rdata(RType::A, "not-an-address"), None);
    }

    #[test]
    fn aaaa_rdata_works() {
        let mut expected = [0u8; 16];
        expected[15] = 1;
        assert_eq!(rdata(RType::AAAA, "::1").unwrap(), expected);
        assert_eq!(rdata(RType::AAAA, "10.0.0.1"), None);
    }

    #[test]
    fn hostname_rdata_works() {
        for rtype in [RType::NS, RType::CNAME, RType::PTR] {
            assert_eq!(rdata(rtype, "ns.test").unwrap(), b"\x02ns\x04test\x00");
        }
    }

    #[test]
    fn txt_rdata_uses_the_name_encoding() {
        // The TXT quirk: the field goes through the name codec rather
        // than being written as a character-string.
        assert_eq!(rdata(RType::TXT, "hello").unwrap(), b"\x05hello\x00");
    }

    #[test]
    fn mx_rdata_carries_a_zero_preference() {
        assert_eq!(
            rdata(RType::MX, "mail.test").unwrap(),
            b"\x00\x00\x04mail\x04test\x00"
        );
    }

    #[test]
    fn soa_rdata_works() {
        let rdata = rdata(RType::SOA, "ns.x").unwrap();
        let mname: &[u8] = b"\x02ns\x01x\x00";
        assert_eq!(&rdata[..6], mname);
        assert_eq!(&rdata[6..12], mname);
        let ints = &rdata[12..];
        assert_eq!(ints[..4], SOA_SERIAL.to_ne_bytes());
        assert_eq!(ints[4..8], [0x00, 0x00, 0x1c, 0x20]);
        assert_eq!(ints[8..12], [0x00, 0x00, 0x1c, 0x20]);
        assert_eq!(ints[12..16], [0x00, 0x36, 0xee, 0x80]);
        assert_eq!(ints[16..20], [0x00, 0x00, 0x1c, 0x20]);
    }

    #[test]
    fn srv_rdata_works() {
        assert_eq!(
            rdata(RType::SRV, "sip.test:10:20:5060").unwrap(),
            b"\x00\x0a\x00\x14\x13\xc4\x03sip\x04test\x00"
        );
        assert_eq!(rdata(RType::SRV, "sip.test:10:20"), None);
        assert_eq!(rdata(RType::SRV, "sip.test:10:20:5060:1"), None);
        assert_eq!(rdata(RType::SRV, "sip.test:ten:20:5060"), None);
    }

    #[test]
    fn unrecognized_types_build_nothing() {
        assert_eq!(rdata(RType::from(41), "whatever"), None);
    }
}
