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

//! The match engine: selection of the record that answers a query.

use super::Server;
use crate::rr::RType;
use crate::zone::{MatchKey, CATCH_ALL_NAME};

////////////////////////////////////////////////////////////////////////
// MATCH RESULTS                                                      //
////////////////////////////////////////////////////////////////////////

/// The outcome of consulting the match tables for a query.
pub(super) struct MatchResult {
    /// Whether the lookup hit an exact or wildcard entry. When this is
    /// false the reply (if any) carries RCODE 3 and, through
    /// [`Disposition::Answer`], the catch-all record's bytes.
    pub found: bool,
    pub disposition: Disposition,
}

/// What the responder should do with the query.
pub(super) enum Disposition {
    /// Answer with the selected record's pre-built bytes.
    Answer(AnswerData),

    /// Retransmit the query unmodified (miss in resend mode).
    Resend,

    /// Emit nothing: the lookup missed and either NXDOMAIN answers are
    /// forbidden or there is no catch-all record.
    NoSend,

    /// Emit nothing: a single-shot record already answered this
    /// source.
    Once,
}

/// A snapshot of the fields of the record selected to answer.
pub(super) struct AnswerData {
    pub field: String,
    pub a_count: u16,
    pub rra_count: u16,
    pub ad_count: u16,
    pub rr: Vec<u8>,
}

/// Which table the winning list lives in.
enum Selection {
    Exact(MatchKey),
    Wild(MatchKey),
    CatchAll,
}

////////////////////////////////////////////////////////////////////////
// THE MATCH ALGORITHM                                                //
////////////////////////////////////////////////////////////////////////

impl Server {
    /// Selects the record answering `(qname, qtype)` from `src`.
    ///
    /// The exact table is consulted first. On a miss, the wildcard
    /// table is scanned for the entry whose key is the longest proper
    /// suffix of the QNAME. On a full miss the resend and NXDOMAIN
    /// configuration decide the outcome before the catch-all record is
    /// offered as the (negative) answer. A record with the reserved
    /// TTL 1 answers each source at most once, provided it is the only
    /// record in its list. Lists longer than one rotate head-to-tail
    /// on every hit, yielding round-robin answers.
    pub(super) fn match_query(&mut self, qname: &[u8], qtype: RType, src: &str) -> MatchResult {
        let exact_key = (qname.to_vec(), qtype);
        let mut found = true;
        let selection = if self.zone.exact.contains_key(&exact_key) {
            Selection::Exact(exact_key)
        } else if let Some(key) = self.wildcard_match(qname, qtype) {
            Selection::Wild(key)
        } else {
            found = false;
            if self.resend {
                return MatchResult {
                    found,
                    disposition: Disposition::Resend,
                };
            }
            if !self.nxdomain {
                return MatchResult {
                    found,
                    disposition: Disposition::NoSend,
                };
            }
            Selection::CatchAll
        };

        let list = match selection {
            Selection::Exact(key) => self.zone.exact.get_mut(&key).unwrap(),
            Selection::Wild(key) => self.zone.wild.get_mut(&key).unwrap(),
            Selection::CatchAll => {
                match self
                    .zone
                    .exact
                    .get_mut(&(CATCH_ALL_NAME.to_vec(), RType::SOA))
                {
                    Some(list) => list,
                    None => {
                        return MatchResult {
                            found,
                            disposition: Disposition::NoSend,
                        }
                    }
                }
            }
        };

        // TTL 1 means: answer this source once.
        let head = list.front().expect("match lists are never empty");
        if head.ttl == 1 && list.len() == 1 {
            if self.once.contains(src) {
                return MatchResult {
                    found,
                    disposition: Disposition::Once,
                };
            }
            self.once.insert(src.to_owned());
        }

        let head = list.front().expect("match lists are never empty");
        let answer = AnswerData {
            field: head.field.clone(),
            a_count: head.a_count,
            rra_count: head.rra_count,
            ad_count: head.ad_count,
            rr: head.rr.clone(),
        };
        if list.len() > 1 {
            let rotated = list.pop_front().expect("list is non-empty");
            list.push_back(rotated);
        }
        MatchResult {
            found,
            disposition: Disposition::Answer(answer),
        }
    }

    /// Scans the wildcard table for the winning entry: among keys of
    /// the right type that occur inside `qname` ending exactly at its
    /// end, the one occurring earliest (i.e., the longest suffix).
    fn wildcard_match(&self, qname: &[u8], qtype: RType) -> Option<MatchKey> {
        let mut best: Option<(usize, &MatchKey)> = None;
        for key in self.zone.wild.keys() {
            if key.1 != qtype {
                continue;
            }
            let pos = match find_subslice(qname, &key.0) {
                Some(pos) => pos,
                None => continue,
            };
            if pos + key.0.len() != qname.len() {
                continue;
            }
            if best.map_or(true, |(best_pos, _)| pos < best_pos) {
                best = Some((pos, key));
            }
        }
        best.map(|(_, key)| key.clone())
    }
}

/// Returns the position of the first occurrence of `needle` in
/// `haystack`.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
