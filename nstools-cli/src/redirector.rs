//! `redirector`: pose as a gateway and push hosts to other next hops.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use nstools_core::CancellationToken;
use nstools_packet::{FrameTap, Interface, Redirector, ReplyKind, check_privileges, open_frame_tap};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::args::RedirectorArgs;

/// Replies injected during one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Served {
    arp: u64,
    neighbor: u64,
    redirects: u64,
}

impl Served {
    fn count(&mut self, kind: ReplyKind) {
        match kind {
            ReplyKind::ArpReply => self.arp += 1,
            ReplyKind::NeighborAdvert => self.neighbor += 1,
            ReplyKind::Icmpv4Redirect | ReplyKind::Icmpv6Redirect => self.redirects += 1,
        }
    }
}

/// Run length from `-t`; zero or absent runs until stopped.
fn run_length(timeout: Option<f64>) -> Result<Option<Duration>> {
    match timeout {
        None => Ok(None),
        Some(secs) if !secs.is_finite() || secs < 0.0 => {
            bail!("timeout must be a non-negative number of seconds (got {secs})")
        }
        Some(secs) if secs == 0.0 => Ok(None),
        Some(secs) => Ok(Some(
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("timeout {secs} is out of range"))?,
        )),
    }
}

pub async fn run(args: &RedirectorArgs, seed: Option<u64>, cancel: CancellationToken) -> Result<()> {
    let length = run_length(args.timeout)?;
    let interface = Interface::lookup(&args.interface)
        .with_context(|| format!("specified interface {} seems incorrect", args.interface))?;
    if !check_privileges().has_raw_socket_access() {
        bail!("capturing frames requires root or CAP_NET_RAW");
    }
    let mut tap = open_frame_tap(interface).context("cannot open capture socket")?;
    let redirector = match seed {
        Some(seed) => Redirector::with_seed(seed),
        None => Redirector::from_process_id(),
    };

    info!(interface = %args.interface, timeout = ?length, "redirector started");
    let served = serve(tap.as_mut(), redirector, length, cancel).await;
    tap.stop();
    let served = served?;
    println!(
        "{} ARP replies, {} neighbor advertisements, {} redirects sent",
        served.arp, served.neighbor, served.redirects
    );
    Ok(())
}

async fn serve(
    tap: &mut dyn FrameTap,
    mut redirector: Redirector,
    length: Option<Duration>,
    cancel: CancellationToken,
) -> Result<Served> {
    let deadline = length.map(|d| Instant::now() + d);
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);

    let mut served = Served::default();
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut expired => {
                debug!("redirector timeout reached");
                break;
            }
            frame = tap.recv() => frame?,
        };
        if let Some(reply) = redirector.handle_frame(&frame) {
            tap.send_frame(&reply.frame)
                .await
                .with_context(|| format!("cannot inject {:?}", reply.kind))?;
            served.count(reply.kind);
        }
    }
    Ok(served)
}
