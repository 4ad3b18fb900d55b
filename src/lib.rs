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

//! The quantum-dns authoritative responder library.
//!
//! quantum-dns is a specialty authoritative DNS responder for
//! traffic-interception and probe scenarios. It answers UDP/53 queries
//! received from a bound socket or a raw packet-capture device with
//! answers pre-assembled at zone-load time, and supports wildcard
//! matching, round-robin rotation, per-source single-shot records, and
//! blind retransmission of unresolved queries.
//!
//! The crate is organized as follows:
//!
//! * [`name`] implements the dotted-name/wire-name codec;
//! * [`message`] implements the DNS header and question codecs;
//! * [`class`] and [`rr`] provide the wire-level CLASS and TYPE types;
//! * [`zone`] compiles zone files into pre-built answer byte strings;
//! * [`server`] implements the query responder and match engine; and
//! * [`io`] provides the socket and capture transports.

pub mod class;
pub mod io;
pub mod message;
pub mod name;
pub mod rr;
pub mod server;
pub mod zone;

mod util;
