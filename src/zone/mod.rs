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

//! The zone compiler.
//!
//! A zone file is a line-oriented text format with one record per
//! line:
//!
//! ```text
//! <name> <ttl> IN <type> <field>
//! ```
//!
//! Lines whose first non-blank octet is `;` are comments. A `name`
//! beginning with `*` (or `*.`) declares a wildcard record, matched as
//! a suffix of incoming QNAMEs. A directive line `@<name> <type>`
//! causes the *next* record line to be appended to the already-loaded
//! record identified by `(name, type)` instead of creating its own
//! entry. The synthetic name `[forward]` with type SOA acts as the
//! catch-all answer for queries that miss.
//!
//! Compilation is best-effort: malformed lines, unrecognized types,
//! unparsable fields, and over-long tokens are silently skipped, and
//! the loaded-record counter is left unchanged.
//!
//! Each surviving line is compiled into a [`MatchRecord`] whose reply
//! bytes are fully assembled here, at load time; the responder only
//! ever concatenates them after an echoed question section.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read};

use log::{info, warn};

use crate::message::constants::COMPRESSED_QNAME_POINTER;
use crate::name;
use crate::rr::RType;

mod record;
pub use record::{MatchKey, MatchKind, MatchRecord};

/// The maximum length of a token on a zone line.
const MAX_TOKEN_LEN: usize = 255;

/// The encoded owner name of the catch-all record: the synthetic name
/// `[forward]`, consulted (with type SOA) when a lookup misses.
pub(crate) const CATCH_ALL_NAME: &[u8] = b"\x09[forward]\x00";

////////////////////////////////////////////////////////////////////////
// ZONE STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// The compiled zone: every answerable (name, type) pair with its
/// pre-built reply bytes.
///
/// Both tables map a [`MatchKey`] to an ordered, non-empty list of
/// [`MatchRecord`]s. `exact` is consulted first, by key equality;
/// `wild` is consulted on an exact miss, by suffix match. The lists
/// are rotated head-to-tail by the match engine on every hit, which
/// yields round-robin answers for keys loaded more than once.
pub struct Zone {
    pub(crate) exact: HashMap<MatchKey, VecDeque<MatchRecord>>,
    pub(crate) wild: HashMap<MatchKey, VecDeque<MatchRecord>>,
    records: u32,
}

/// A pending `@<name> <type>` directive, applied to the next record
/// line.
struct LinkDirective {
    name: String,
    rtype: RType,
}

impl Zone {
    /// Reads and compiles a zone from `stream`.
    ///
    /// Only I/O errors are fatal; every malformed line is skipped
    /// silently per the grammar above.
    pub fn load<S: Read>(stream: S) -> io::Result<Self> {
        let mut zone = Self {
            exact: HashMap::new(),
            wild: HashMap::new(),
            records: 0,
        };

        // The literal-name RR bytes of every A/AAAA record loaded so
        // far, keyed by owner name. MX/NS/CNAME/SOA records whose
        // target hostname appears here carry that RR as additional
        // data.
        let mut glue_a: HashMap<String, Vec<u8>> = HashMap::new();
        let mut glue_aaaa: HashMap<String, Vec<u8>> = HashMap::new();

        let mut pending: Option<LinkDirective> = None;

        for line in BufReader::new(stream).lines() {
            let line = line?;
            let line = line.trim_start_matches(|c| c == ' ' || c == '\t');
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(directive) = line.strip_prefix('@') {
                pending = parse_link(directive);
                continue;
            }

            let mut tokens = line.split_whitespace();
            let (name_tok, ttl_tok, class_tok, type_tok, field_tok) = match (
                tokens.next(),
                tokens.next(),
                tokens.next(),
                tokens.next(),
                tokens.next(),
            ) {
                (Some(n), Some(t), Some(c), Some(ty), Some(f)) => (n, t, c, ty, f),
                _ => continue,
            };

            // An unquoted comment may trail the field token.
            let field = field_tok.split(';').next().unwrap_or("");
            if field.is_empty() || class_tok != "IN" {
                continue;
            }
            if [name_tok, ttl_tok, type_tok, field]
                .iter()
                .any(|token| token.len() > MAX_TOKEN_LEN)
            {
                continue;
            }
            let ttl = match ttl_tok.parse::<u32>() {
                Ok(ttl) => ttl,
                Err(_) => continue,
            };
            let rtype = match type_tok.parse::<RType>() {
                Ok(rtype) => rtype,
                Err(_) => continue,
            };
            let (host, kind) = match name_tok.strip_prefix('*') {
                Some(rest) => (rest.strip_prefix('.').unwrap_or(rest), MatchKind::Wild),
                None => (name_tok, MatchKind::Exact),
            };
            let dname = match name::encode(host) {
                Ok(dname) => dname,
                Err(_) => continue,
            };
            let rdata = match record::rdata(rtype, field) {
                Some(rdata) => rdata,
                None => continue,
            };

            // The literal-name form of this line's RR. It serves as
            // glue when the line is an A/AAAA record and as the
            // appended bytes when the line follows a link directive.
            let mut literal = dname.clone();
            record::push_rr(&mut literal, rtype, ttl, &rdata);

            if let Some(link) = pending.take() {
                if zone.apply_link(&link, literal.clone(), rtype, ttl, &rdata, field) {
                    zone.records += 1;
                }
            } else {
                let mut rr = COMPRESSED_QNAME_POINTER.to_vec();
                record::push_rr(&mut rr, rtype, ttl, &rdata);
                let (a_count, rra_count) = match rtype {
                    RType::SOA => (0, 1),
                    _ => (1, 0),
                };
                let mut ad_count = 0;
                if let RType::MX | RType::NS | RType::CNAME | RType::SOA = rtype {
                    match glue_a.get(field).or_else(|| glue_aaaa.get(field)) {
                        Some(glue) => {
                            rr.extend_from_slice(glue);
                            ad_count = 1;
                        }
                        None => warn!(
                            "{} RR '{}' w/o A/AAAA RR for '{}' defined until here.",
                            rtype, host, field
                        ),
                    }
                }
                let key_name = match kind {
                    MatchKind::Exact => dname.clone(),
                    MatchKind::Wild => dname[1..].to_vec(),
                };
                let record = MatchRecord {
                    fqdn: host.to_owned(),
                    field: field.to_owned(),
                    name: key_name.clone(),
                    rtype,
                    ttl,
                    a_count,
                    rra_count,
                    ad_count,
                    rr,
                    kind,
                };
                let table = match kind {
                    MatchKind::Exact => &mut zone.exact,
                    MatchKind::Wild => &mut zone.wild,
                };
                table.entry((key_name, rtype)).or_default().push_back(record);
                zone.records += 1;
            }

            match rtype {
                RType::A => {
                    glue_a.insert(host.to_owned(), literal);
                }
                RType::AAAA => {
                    glue_aaaa.insert(host.to_owned(), literal);
                }
                _ => (),
            }
        }

        info!("Successfully loaded {} Quantum-RR's.", zone.records);
        Ok(zone)
    }

    /// Returns the number of records loaded.
    pub fn record_count(&self) -> u32 {
        self.records
    }

    /// Applies a link directive: appends the freshly compiled RR bytes
    /// to the last record of the target list. For an SOA target the
    /// fresh RR is prepended instead, so that the authority SOA stays
    /// last in the reply. For any other target a sibling record with
    /// the rotated RR order joins the list, so that round-robin
    /// rotation alternates the answer order. Returns whether a target
    /// was found.
    fn apply_link(
        &mut self,
        link: &LinkDirective,
        fresh: Vec<u8>,
        rtype: RType,
        ttl: u32,
        rdata: &[u8],
        field: &str,
    ) -> bool {
        let parent_soa = link.rtype == RType::SOA;
        let list = match self.link_target(&link.name, link.rtype) {
            Some(list) => list,
            None => return false,
        };
        let last = list.back_mut().expect("match lists are never empty");
        if parent_soa {
            let mut combined = fresh;
            combined.extend_from_slice(&last.rr);
            last.rr = combined;
            last.a_count += 1;
        } else {
            let previous_rr = last.rr.clone();
            last.rr.extend_from_slice(&fresh);
            last.a_count += 1;
            let mut rotated = COMPRESSED_QNAME_POINTER.to_vec();
            record::push_rr(&mut rotated, rtype, ttl, rdata);
            rotated.extend_from_slice(&previous_rr);
            let sibling = MatchRecord {
                fqdn: last.fqdn.clone(),
                field: field.to_owned(),
                name: last.name.clone(),
                rtype: last.rtype,
                ttl: last.ttl,
                a_count: last.a_count,
                rra_count: last.rra_count,
                ad_count: last.ad_count,
                rr: rotated,
                kind: last.kind,
            };
            list.push_back(sibling);
        }
        true
    }

    /// Finds the list a link directive targets: the exact table first,
    /// then the wildcard table (under the suffix form of the name).
    fn link_target(&mut self, name: &str, rtype: RType) -> Option<&mut VecDeque<MatchRecord>> {
        if let Some(rest) = name.strip_prefix('*') {
            let rest = rest.strip_prefix('.').unwrap_or(rest);
            let encoded = name::encode(rest).ok()?;
            return self.wild.get_mut(&(encoded[1..].to_vec(), rtype));
        }
        let encoded = name::encode(name).ok()?;
        if self.exact.contains_key(&(encoded.clone(), rtype)) {
            return self.exact.get_mut(&(encoded, rtype));
        }
        self.wild.get_mut(&(encoded[1..].to_vec(), rtype))
    }
}

/// Parses the tokens of an `@<name> <type>` directive line (with the
/// leading `@` already stripped).
fn parse_link(directive: &str) -> Option<LinkDirective> {
    let mut tokens = directive.split_whitespace();
    let name = tokens.next()?;
    let rtype = tokens.next()?.parse().ok()?;
    if name.len() > MAX_TOKEN_LEN {
        return None;
    }
    Some(LinkDirective {
        name: name.to_owned(),
        rtype,
    })
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Zone {
        Zone::load(text.as_bytes()).unwrap()
    }

    /// Walks the concatenated RRs in `rr` and counts them. Owner names
    /// are either the two-octet compressed pointer or a literal
    /// encoded name.
    fn count_rrs(mut rr: &[u8]) -> u16 {
        let mut count = 0;
        while !rr.is_empty() {
            let name_len = if rr[0] & 0xc0 == 0xc0 {
                2
            } else {
                name::decode(rr).unwrap().1
            };
            let rdlength = u16::from_be_bytes([rr[name_len + 8], rr[name_len + 9]]) as usize;
            rr = &rr[name_len + 10 + rdlength..];
            count += 1;
        }
        count
    }

    #[test]
    fn catch_all_name_is_the_encoded_synthetic_name() {
        assert_eq!(name::encode("[forward]").unwrap(), CATCH_ALL_NAME);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let zone = load("; a comment\n\n   \t\n  ; indented comment\n");
        assert_eq!(zone.record_count(), 0);
    }

    #[test]
    fn malformed_lines_are_skipped_silently() {
        let zone = load(
            "missing.fields 60 IN A\n\
             bad.ttl abc IN A 10.0.0.1\n\
             bad.class 60 CH A 10.0.0.1\n\
             lower.class 60 in A 10.0.0.1\n\
             bad.type 60 IN OPT 10.0.0.1\n\
             bad.field 60 IN A not-an-address\n\
             bad.srv 60 IN SRV host:1:2\n",
        );
        assert_eq!(zone.record_count(), 0);
        assert!(zone.exact.is_empty() && zone.wild.is_empty());
    }

    #[test]
    fn exact_records_are_keyed_by_their_encoding() {
        let zone = load("test.example 60 IN A 10.0.0.1\n");
        assert_eq!(zone.record_count(), 1);
        let key = (b"\x04test\x07example\x00".to_vec(), RType::A);
        let list = zone.exact.get(&key).unwrap();
        assert_eq!(list.len(), 1);
        let record = &list[0];
        assert_eq!(record.fqdn, "test.example");
        assert_eq!(record.field, "10.0.0.1");
        assert_eq!(record.kind, MatchKind::Exact);
        assert_eq!(record.ttl, 60);
        assert_eq!((record.a_count, record.rra_count, record.ad_count), (1, 0, 0));
    }

    #[test]
    fn wildcard_keys_lose_their_first_length_octet() {
        let zone = load("*.foo 120 IN AAAA ::1\n*bar 60 IN A 10.0.0.1\n");
        assert!(zone
            .wild
            .contains_key(&(b"foo\x00".to_vec(), RType::AAAA)));
        assert!(zone.wild.contains_key(&(b"bar\x00".to_vec(), RType::A)));
        assert!(zone.exact.is_empty());
    }

    #[test]
    fn every_record_starts_with_the_compressed_pointer() {
        let zone = load(
            "a.example 60 IN A 10.0.0.1\n\
             *.wild.example 60 IN TXT hello\n\
             mx.example 60 IN MX mail.example\n\
             [forward] 60 IN SOA ns.example\n",
        );
        for list in zone.exact.values().chain(zone.wild.values()) {
            for record in list {
                assert_eq!(&record.rr[..2], &COMPRESSED_QNAME_POINTER);
            }
        }
    }

    #[test]
    fn counts_match_the_number_of_packed_records() {
        let zone = load(
            "ns.example 60 IN A 10.0.0.9\n\
             mx.example 60 IN MX ns.example\n\
             lone.example 60 IN CNAME nowhere.example\n\
             [forward] 60 IN SOA ns.example\n\
             srv.example 60 IN SRV sip.example:0:5:5060\n",
        );
        assert_eq!(zone.record_count(), 5);
        for list in zone.exact.values() {
            for record in list {
                let total = record.a_count + record.rra_count + record.ad_count;
                assert_eq!(total, count_rrs(&record.rr), "{}", record.fqdn);
            }
        }
    }

    #[test]
    fn glue_is_appended_for_known_targets() {
        let zone = load(
            "ns.example 60 IN A 10.0.0.9\n\
             v6.example 60 IN AAAA ::9\n\
             mx.example 60 IN MX ns.example\n\
             mx6.example 60 IN MX v6.example\n\
             dangling.example 60 IN MX other.example\n",
        );
        let get = |host: &[u8]| {
            let list = zone.exact.get(&(host.to_vec(), RType::MX)).unwrap();
            list[0].clone()
        };
        let glued = get(b"\x02mx\x07example\x00");
        assert_eq!(glued.ad_count, 1);
        assert_eq!(count_rrs(&glued.rr), 2);
        // The glue RR carries the target's literal name, not the
        // QNAME pointer.
        assert!(glued.rr.ends_with(b"\x00\x04\x0a\x00\x00\x09"));
        let glued6 = get(b"\x03mx6\x07example\x00");
        assert_eq!(glued6.ad_count, 1);
        let dangling = get(b"\x08dangling\x07example\x00");
        assert_eq!(dangling.ad_count, 0);
        assert_eq!(count_rrs(&dangling.rr), 1);
    }

    #[test]
    fn soa_records_count_toward_the_authority_section() {
        let zone = load("[forward] 60 IN SOA ns.x\n");
        let list = zone
            .exact
            .get(&(CATCH_ALL_NAME.to_vec(), RType::SOA))
            .unwrap();
        let record = &list[0];
        assert_eq!((record.a_count, record.rra_count, record.ad_count), (0, 1, 0));
    }

    #[test]
    fn duplicate_keys_grow_the_list_in_order() {
        let zone = load(
            "rr.example 60 IN A 10.0.0.1\n\
             rr.example 60 IN A 10.0.0.2\n\
             rr.example 60 IN A 10.0.0.3\n",
        );
        let list = zone
            .exact
            .get(&(b"\x02rr\x07example\x00".to_vec(), RType::A))
            .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].field, "10.0.0.1");
        assert_eq!(list[1].field, "10.0.0.2");
        assert_eq!(list[2].field, "10.0.0.3");
    }

    #[test]
    fn linking_builds_both_answer_orders() {
        let zone = load(
            "rr.example 60 IN A 10.0.0.1\n\
             @rr.example A\n\
             rr.example 60 IN A 10.0.0.2\n",
        );
        assert_eq!(zone.record_count(), 2);
        let list = zone
            .exact
            .get(&(b"\x02rr\x07example\x00".to_vec(), RType::A))
            .unwrap();
        assert_eq!(list.len(), 2);
        for record in list {
            assert_eq!(record.a_count, 2);
            assert_eq!(count_rrs(&record.rr), 2);
        }
        // The original record answers .1 before .2; the sibling
        // answers the rotated order.
        assert!(list[0].rr.windows(4).any(|w| w == b"\x0a\x00\x00\x01"));
        let rdata_at = |rr: &[u8]| rr[rr.len() - 4..].to_vec();
        assert_eq!(rdata_at(&list[0].rr), [10, 0, 0, 2]);
        assert_eq!(rdata_at(&list[1].rr), [10, 0, 0, 1]);
    }

    #[test]
    fn linking_into_soa_keeps_the_authority_last() {
        let zone = load(
            "[forward] 60 IN SOA ns.x\n\
             @[forward] SOA\n\
             probe.example 60 IN A 10.0.0.7\n",
        );
        let list = zone
            .exact
            .get(&(CATCH_ALL_NAME.to_vec(), RType::SOA))
            .unwrap();
        assert_eq!(list.len(), 1);
        let record = &list[0];
        assert_eq!((record.a_count, record.rra_count), (1, 1));
        assert_eq!(count_rrs(&record.rr), 2);
        // The linked A RR leads with its literal name; the SOA is the
        // final record.
        assert!(record.rr.starts_with(b"\x05probe\x07example\x00"));
        assert!(record.rr.ends_with(&7200u32.to_be_bytes()));
    }

    #[test]
    fn linking_without_a_target_is_skipped() {
        let zone = load(
            "@missing.example A\n\
             orphan.example 60 IN A 10.0.0.1\n",
        );
        assert_eq!(zone.record_count(), 0);
        assert!(zone.exact.is_empty());
    }

    #[test]
    fn linking_targets_wildcard_lists_too() {
        let zone = load(
            "*.wild.example 60 IN A 10.0.0.1\n\
             @*.wild.example A\n\
             extra.example 60 IN A 10.0.0.2\n",
        );
        let list = zone
            .wild
            .get(&(b"wild\x07example\x00".to_vec(), RType::A))
            .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].a_count, 2);
    }

    #[test]
    fn a_directive_applies_to_the_next_record_only() {
        let zone = load(
            "one.example 60 IN A 10.0.0.1\n\
             @one.example A\n\
             two.example 60 IN A 10.0.0.2\n\
             three.example 60 IN A 10.0.0.3\n",
        );
        assert_eq!(zone.record_count(), 3);
        // three.example compiled as an ordinary record.
        assert!(zone
            .exact
            .contains_key(&(b"\x05three\x07example\x00".to_vec(), RType::A)));
        assert!(!zone
            .exact
            .contains_key(&(b"\x03two\x07example\x00".to_vec(), RType::A)));
    }
}
