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

//! The processing logic of the responder.
//!
//! The [`Server`] structure is the heart of this module; see its
//! documentation for details.

use std::collections::HashSet;

use log::info;

use crate::message::{Header, Question};
use crate::name;
use crate::zone::Zone;

mod lookup;

use lookup::{AnswerData, Disposition};

////////////////////////////////////////////////////////////////////////
// SERVER PUBLIC API AND CORE MESSAGE-HANDLING LOGIC                  //
////////////////////////////////////////////////////////////////////////

/// The query responder, abstracted from any underlying transport.
///
/// The [`Server`] receives, parses, and answers DNS query datagrams
/// through [`Server::handle_message`]. A transport (see
/// [`io`](crate::io)) is responsible for receiving those datagrams
/// from the network and acting on the [`Response`] the `Server`
/// produces.
///
/// Answers come from the [`Zone`] compiled at startup. The match
/// tables, the once-set tracking single-shot answers, and the two
/// behavior flags are all confined here; the responder is
/// single-threaded and synchronous, so none of this state needs
/// synchronization.
pub struct Server {
    zone: Zone,
    once: HashSet<String>,
    nxdomain: bool,
    resend: bool,
}

/// What the transport should do after a message has been handled.
pub enum Response {
    /// Send the assembled reply datagram.
    Reply(Vec<u8>),

    /// Retransmit the received datagram unmodified. Only meaningful
    /// for a capture-mode deployment on a router whose FORWARD chain
    /// drops DNS, where it pushes the query along to the real
    /// destination.
    Resend,

    /// Send nothing.
    None,
}

impl Server {
    /// Creates a new `Server` answering from the provided [`Zone`].
    pub fn new(zone: Zone) -> Self {
        Self {
            zone,
            once: HashSet::new(),
            nxdomain: true,
            resend: false,
        }
    }

    /// Configures whether unmatched queries are answered with
    /// NXDOMAIN. When disabled, they are dropped instead.
    pub fn set_nxdomain(&mut self, nxdomain: bool) {
        self.nxdomain = nxdomain;
    }

    /// Configures resend mode: unmatched queries are retransmitted
    /// rather than answered with NXDOMAIN.
    pub fn set_resend(&mut self, resend: bool) {
        self.resend = resend;
    }

    /// Handles a received datagram from the source identified by
    /// `src`. This is the API through which transports submit
    /// messages. One log line is emitted per call.
    pub fn handle_message(&mut self, received: &[u8], src: &str) -> Response {
        // A query must carry a full header, have QR clear, be a
        // standard query, and ask exactly one question.
        let header = match Header::parse(received) {
            Ok(header) => header,
            Err(_) => return self.invalid(src),
        };
        if header.qr || header.opcode != 0 || header.qdcount != 1 {
            return self.invalid(src);
        }
        let question = match Question::scan(received) {
            Some(question) => question,
            None => return self.invalid(src),
        };
        let fqdn = match name::decode(question.qname) {
            Ok((fqdn, _)) => fqdn,
            Err(_) => return self.invalid(src),
        };

        let result = self.match_query(question.qname, question.qtype, src);
        let mut log = format!("{}? {} -> ", question.qtype, fqdn);
        if !result.found {
            log.push_str("NDXOMAIN ");
        }
        let response = match result.disposition {
            Disposition::Answer(answer) => {
                log.push_str(&answer.field);
                Response::Reply(build_reply(&header, &question, &answer, result.found))
            }
            Disposition::Resend => {
                log.push_str("(resend)");
                Response::Resend
            }
            Disposition::NoSend => {
                log.push_str("(nosend)");
                Response::None
            }
            Disposition::Once => {
                log.push_str("(once, nosend)");
                Response::None
            }
        };
        info!("{}: {}", src, log);
        response
    }

    fn invalid(&self, src: &str) -> Response {
        info!("{}: invalid query", src);
        Response::None
    }
}

/// Assembles the reply datagram: the received header with the reply
/// fields mutated, the echoed question section, and the selected
/// record's pre-built bytes.
fn build_reply(header: &Header, question: &Question, answer: &AnswerData, found: bool) -> Vec<u8> {
    let mut reply_header = header.clone();
    reply_header.qr = true;
    reply_header.aa = false;
    reply_header.tc = false;
    reply_header.ra = false;
    reply_header.z = 0;
    reply_header.rcode = if found { 0 } else { 3 };
    reply_header.ancount = answer.a_count;
    reply_header.nscount = answer.rra_count;
    reply_header.arcount = answer.ad_count;

    let mut reply =
        Vec::with_capacity(reply_header.encode().len() + question.section.len() + answer.rr.len());
    reply.extend_from_slice(&reply_header.encode());
    reply.extend_from_slice(question.section);
    reply.extend_from_slice(&answer.rr);
    reply
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::constants::HEADER_SIZE;
    use crate::rr::RType;

    const SRC: &str = "1.2.3.4:55555";

    fn server(zone: &str) -> Server {
        Server::new(Zone::load(zone.as_bytes()).unwrap())
    }

    fn build_query(host: &str, qtype: RType) -> Vec<u8> {
        let header = Header {
            id: 0x1337,
            qr: false,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: false,
            z: 0,
            rcode: 0,
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        };
        let mut query = header.encode().to_vec();
        query.extend_from_slice(&name::encode(host).unwrap());
        query.extend_from_slice(&u16::from(qtype).to_be_bytes());
        query.extend_from_slice(&1u16.to_be_bytes());
        query
    }

    fn expect_reply(server: &mut Server, query: &[u8]) -> Vec<u8> {
        match server.handle_message(query, SRC) {
            Response::Reply(reply) => reply,
            _ => panic!("expected a reply"),
        }
    }

    /// Splits a reply into its header, echoed question, and RR bytes,
    /// verifying the echo along the way.
    fn dissect<'a>(reply: &'a [u8], query: &[u8]) -> (Header, &'a [u8]) {
        let header = Header::parse(reply).unwrap();
        let question = &query[HEADER_SIZE..];
        assert_eq!(&reply[HEADER_SIZE..HEADER_SIZE + question.len()], question);
        (header, &reply[HEADER_SIZE + question.len()..])
    }

    #[test]
    fn exact_a_queries_are_answered() {
        // Scenario: a plain exact A record.
        let mut server = server("test.example 60 IN A 10.0.0.1\n");
        let query = build_query("test.example", RType::A);
        let reply = expect_reply(&mut server, &query);
        let (header, rrs) = dissect(&reply, &query);
        assert_eq!(header.id, 0x1337);
        assert!(header.qr);
        assert_eq!(header.rcode, 0);
        assert_eq!(header.qdcount, 1);
        assert_eq!(header.ancount, 1);
        assert_eq!(header.nscount, 0);
        assert_eq!(header.arcount, 0);
        assert_eq!(
            rrs,
            b"\xc0\x0c\x00\x01\x00\x01\x00\x00\x00\x3c\x00\x04\x0a\x00\x00\x01"
        );
    }

    #[test]
    fn wildcard_aaaa_queries_are_answered_via_the_pointer() {
        let mut server = server("*.foo 120 IN AAAA ::1\n");
        let query = build_query("a.b.foo", RType::AAAA);
        let reply = expect_reply(&mut server, &query);
        let (header, rrs) = dissect(&reply, &query);
        assert_eq!(header.rcode, 0);
        assert_eq!(header.ancount, 1);
        // The answer's name is the compressed pointer to the echoed
        // question, so it reads as a.b.foo without re-encoding.
        assert_eq!(&rrs[..2], b"\xc0\x0c");
        assert_eq!(&rrs[2..4], &28u16.to_be_bytes());
        assert_eq!(&rrs[6..10], &120u32.to_be_bytes());
        assert_eq!(&rrs[10..12], &16u16.to_be_bytes());
        let mut rdata = [0u8; 16];
        rdata[15] = 1;
        assert_eq!(&rrs[12..], &rdata);
    }

    #[test]
    fn misses_answer_nxdomain_with_the_catch_all_soa() {
        let mut server = server("[forward] 60 IN SOA ns.x\n");
        let query = build_query("nope.example", RType::A);
        let reply = expect_reply(&mut server, &query);
        let (header, rrs) = dissect(&reply, &query);
        assert_eq!(header.rcode, 3);
        assert_eq!(header.ancount, 0);
        assert_eq!(header.nscount, 1);
        assert_eq!(header.arcount, 0);
        assert_eq!(&rrs[..2], b"\xc0\x0c");
        assert_eq!(&rrs[2..4], &6u16.to_be_bytes());
    }

    #[test]
    fn ttl_one_records_answer_a_source_only_once() {
        let mut server = server("once.example 1 IN A 10.0.0.2\n");
        let query = build_query("once.example", RType::A);
        assert!(matches!(
            server.handle_message(&query, SRC),
            Response::Reply(_)
        ));
        assert!(matches!(server.handle_message(&query, SRC), Response::None));
    }

    #[test]
    fn linked_records_answer_in_alternating_order() {
        let mut server = server(
            "rr.example 60 IN A 10.0.0.1\n\
             @rr.example A\n\
             rr.example 60 IN A 10.0.0.2\n",
        );
        let query = build_query("rr.example", RType::A);
        // Both answer records open with the pointer form, so the first
        // RDATA sits at a fixed offset; the second RR ends the reply.
        let order = |rrs: &[u8]| (rrs[15], rrs[rrs.len() - 1]);
        let mut orders = Vec::new();
        for _ in 0..3 {
            let reply = expect_reply(&mut server, &query);
            let (header, rrs) = dissect(&reply, &query);
            assert_eq!(header.ancount, 2);
            orders.push(order(rrs));
        }
        assert_eq!(orders, [(1, 2), (2, 1), (1, 2)]);
    }

    #[test]
    fn misses_in_resend_mode_retransmit_the_query() {
        let mut server = server("");
        server.set_resend(true);
        let query = build_query("anything.example", RType::A);
        assert!(matches!(
            server.handle_message(&query, SRC),
            Response::Resend
        ));
    }

    #[test]
    fn misses_with_nxdomain_forbidden_are_dropped() {
        let mut server = server("[forward] 60 IN SOA ns.x\n");
        server.set_nxdomain(false);
        let query = build_query("nope.example", RType::A);
        assert!(matches!(server.handle_message(&query, SRC), Response::None));
    }

    #[test]
    fn misses_with_no_catch_all_are_dropped() {
        let mut server = server("");
        let query = build_query("nope.example", RType::A);
        assert!(matches!(server.handle_message(&query, SRC), Response::None));
    }

    #[test]
    fn malformed_queries_are_dropped() {
        let mut server = server("test.example 60 IN A 10.0.0.1\n");
        let good = build_query("test.example", RType::A);

        // Truncated header.
        assert!(matches!(
            server.handle_message(&good[..8], SRC),
            Response::None
        ));
        // A response rather than a query.
        let mut response = good.clone();
        response[2] |= 0x80;
        assert!(matches!(
            server.handle_message(&response, SRC),
            Response::None
        ));
        // A non-QUERY opcode.
        let mut notify = good.clone();
        notify[2] |= 4 << 3;
        assert!(matches!(
            server.handle_message(&notify, SRC),
            Response::None
        ));
        // QDCOUNT != 1.
        let mut no_question = good.clone();
        no_question[5] = 0;
        assert!(matches!(
            server.handle_message(&no_question, SRC),
            Response::None
        ));
        // The QNAME never terminates.
        assert!(matches!(
            server.handle_message(&good[..HEADER_SIZE + 3], SRC),
            Response::None
        ));

        // The well-formed query still gets its answer.
        assert!(matches!(
            server.handle_message(&good, SRC),
            Response::Reply(_)
        ));
    }

    #[test]
    fn replies_preserve_the_rd_bit_and_clear_reply_flags() {
        let mut server = server("test.example 60 IN A 10.0.0.1\n");
        let mut query = build_query("test.example", RType::A);
        // Set AA, TC, and the reserved bits on the query; the reply
        // must clear them while keeping ID and RD.
        query[2] |= 0x06;
        query[3] |= 0xf0;
        let reply = expect_reply(&mut server, &query);
        let header = Header::parse(&reply).unwrap();
        assert!(header.qr);
        assert!(header.rd);
        assert!(!header.aa && !header.tc && !header.ra);
        assert_eq!(header.z, 0);
        assert_eq!(header.id, 0x1337);
    }
}
