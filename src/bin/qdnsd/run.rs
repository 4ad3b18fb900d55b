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

//! Implements running the responder.

use std::fmt::Write;
use std::fs::File;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{error, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use qdns::io::{SocketTransport, Transport};
use qdns::server::{Response, Server};
use qdns::zone::Zone;

use crate::args::Args;

/// The receive buffer for query datagrams. Queries are one question
/// long, so this is generous.
const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Runs the responder.
pub fn run(args: Args) {
    // The per-request line is part of the program's output proper, so
    // logging goes to stdout.
    Builder::from_env(Env::new().default_filter_or("info"))
        .target(Target::Stdout)
        .init();

    if let Err(e) = try_running(args) {
        // Startup failures go to stderr; stdout carries the request
        // log only.
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        eprintln!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: Args) -> Result<()> {
    info!(
        "quantum-dns responder v{} starting.",
        env!("CARGO_PKG_VERSION")
    );

    let zone = load_zone(args.zone.as_deref())?;
    let mut server = Server::new(zone);
    server.set_nxdomain(!args.no_nxdomain);
    server.set_resend(args.resend);

    let mut transport = build_transport(&args)?;
    let shutdown = set_up_signal_handling().context("failed to set up signal handling")?;

    info!("Set-up is complete; answering queries.");
    let mut buf = [0; RECEIVE_BUFFER_SIZE];
    while !shutdown.load(Ordering::Relaxed) {
        let (len, src) = match transport.recv(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                error!("{}", e);
                continue;
            }
        };
        let sent = match server.handle_message(&buf[..len], &src) {
            Response::Reply(reply) => transport.reply(&reply),
            Response::Resend => transport.resend(&buf[..len]),
            Response::None => Ok(()),
        };
        if let Err(e) = sent {
            error!("{}: {}", src, e);
        }
    }
    info!("Received a termination signal; shutting down.");
    Ok(())
}

fn load_zone(path: Option<&Path>) -> Result<Zone> {
    match path {
        Some(path) => {
            info!("Loading the zone from {}.", path.display());
            let file = File::open(path)
                .with_context(|| format!("failed to open the zone file {}", path.display()))?;
            Zone::load(file)
        }
        None => {
            info!("Loading the zone from standard input.");
            Zone::load(io::stdin().lock())
        }
    }
    .context("failed to read the zone")
}

fn build_transport(args: &Args) -> Result<Box<dyn Transport>> {
    if let Some(ref device) = args.monitor {
        build_capture_transport(args, device)
    } else {
        let ip = args.laddr.unwrap_or(if args.ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });
        let addr = SocketAddr::new(ip, args.port);
        let transport = SocketTransport::bind(addr)
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Listening on {}.", addr);
        Ok(Box::new(transport))
    }
}

#[cfg(target_os = "linux")]
fn build_capture_transport(args: &Args, device: &str) -> Result<Box<dyn Transport>> {
    use qdns::io::{CaptureTransport, Filter};

    let filter = args
        .filter
        .as_deref()
        .map(Filter::parse)
        .transpose()
        .context("invalid capture filter")?;
    let transport = CaptureTransport::open(device, args.ipv6, filter)
        .with_context(|| format!("failed to open a capture on {}", device))?;
    info!("Capturing DNS queries on {}.", device);
    Ok(Box::new(transport))
}

#[cfg(not(target_os = "linux"))]
fn build_capture_transport(_args: &Args, _device: &str) -> Result<Box<dyn Transport>> {
    anyhow::bail!("capture mode is only supported on Linux")
}

fn set_up_signal_handling() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    // A second termination signal while shutdown is pending exits
    // immediately.
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 1, flag.clone())?;
        signal_hook::flag::register(signal, flag.clone())?;
    }
    Ok(flag)
}
