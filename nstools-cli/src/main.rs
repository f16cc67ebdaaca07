mod args;
#[cfg(target_os = "linux")]
mod mcast;
mod profiles;
mod redirector;
mod self_test;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nstools_core::{SendMode, TransmitConfig, Transmitter};
use nstools_packet::{
    CorruptionFlags, Datagram, DatagramBuilder, FaultInjector, IPV6_ALL_NODES, Icmpv4Echo,
    Icmpv6Echo, IgmpQuery, Interface, IpFamily, MacAddr, MldQuery, check_icmpv4_payload,
    check_icmpv6_payload, check_igmp_sources, check_mld_sources, check_privileges,
    create_sender, parse_source_list,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Command, FaultArgs, IgmpQueryArgs, MldQueryArgs, TransmitArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Profile management exits before tracing init
    if args.list_profiles {
        profiles::show_profiles();
        return Ok(());
    }

    if let Some(ref name) = args.save_profile {
        let mut profile = profiles::resolve(args.profile.as_deref(), &args.fault)?;
        profile.description = Some(format!(
            "Derived from '{}'",
            args.profile.as_deref().unwrap_or("default")
        ));
        let path = profiles::save_profile(name, &profile)?;
        println!("Profile '{name}' saved to {}.", path.display());
        return Ok(());
    }

    let filter = match args.debug {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = args.command else {
        bail!("no subcommand given (see --help)");
    };

    let session = Session {
        profile: args.profile,
        overrides: args.fault,
        seed: args.seed,
        cancel: CancellationToken::new(),
    };

    spawn_stop_listener(session.cancel.clone())?;

    match command {
        Command::Icmpv4(cmd) => {
            check_icmpv4_payload(cmd.size)?;
            let datagram = Icmpv4Echo::new(cmd.src, cmd.dst, cmd.size).build();
            session
                .transmit(datagram, &cmd.transmit, IpAddr::V4(cmd.dst), cmd.flags())
                .await
        }
        Command::Icmpv6(cmd) => {
            check_icmpv6_payload(cmd.size)?;
            let datagram = Icmpv6Echo::new(cmd.src, cmd.dst, cmd.size).build();
            session
                .transmit(datagram, &cmd.transmit, IpAddr::V6(cmd.dst), cmd.flags())
                .await
        }
        Command::MldQuery(cmd) => {
            let query = mld_query(&cmd)?;
            let destination = IpAddr::V6(query.dst);
            session
                .transmit(query.build(), &cmd.transmit, destination, CorruptionFlags::NONE)
                .await
        }
        Command::IgmpQuery(cmd) => {
            let query = igmp_query(&cmd)?;
            let destination = IpAddr::V4(query.destination());
            session
                .transmit(query.build(), &cmd.transmit, destination, CorruptionFlags::NONE)
                .await
        }
        #[cfg(target_os = "linux")]
        Command::McastJoin(cmd) => mcast::run(&cmd, session.cancel.clone()).await,
        #[cfg(not(target_os = "linux"))]
        Command::McastJoin(_) => bail!("mcast-join is only supported on Linux"),
        Command::Redirector(cmd) => redirector::run(&cmd, session.seed, session.cancel.clone()).await,
        Command::SelfTest => self_test::run_self_test(),
    }
}

/// Cancel `cancel` on SIGHUP or Ctrl-C.
#[cfg(unix)]
fn spawn_stop_listener(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("cannot install SIGHUP handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = hangup.recv() => info!("SIGHUP received, stopping"),
            _ = tokio::signal::ctrl_c() => info!("interrupt received, stopping"),
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_stop_listener(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupt received, stopping");
        cancel.cancel();
    });
    Ok(())
}

/// Run-wide settings shared by every sending subcommand.
struct Session {
    profile: Option<String>,
    overrides: FaultArgs,
    seed: Option<u64>,
    cancel: CancellationToken,
}

impl Session {
    fn fault_injector(&self) -> Result<FaultInjector> {
        let profile = profiles::resolve(self.profile.as_deref(), &self.overrides)?;
        if let Some(name) = &self.profile {
            info!(profile = %name, "applied fault profile");
        }
        let injector = match self.seed {
            Some(seed) => FaultInjector::with_seed(seed),
            None => FaultInjector::from_process_id(),
        };
        let injector = injector.with_profile(profile.fault);
        debug!(
            seed = ?self.seed,
            unknown_protocol = ?injector.unknown_protocol(),
            "fault injector ready"
        );
        Ok(injector)
    }

    async fn transmit(
        &self,
        datagram: Datagram,
        opts: &TransmitArgs,
        destination: IpAddr,
        flags: CorruptionFlags,
    ) -> Result<()> {
        check_flags(flags, datagram.family())?;
        let config = TransmitConfig {
            mode: send_mode(opts)?,
            interval: Duration::from_millis(opts.interval_ms),
            flags,
        };
        let dst_mac = destination_mac(opts.dst_mac, destination)?;

        let interface = Interface::lookup(&opts.interface)
            .with_context(|| format!("specified interface {} seems incorrect", opts.interface))?;
        if !check_privileges().has_raw_socket_access() {
            bail!("sending raw datagrams requires root or CAP_NET_RAW");
        }
        let sender = create_sender(interface, datagram.family(), dst_mac)
            .context("cannot open packet socket")?;

        let mut transmitter = Transmitter::new(sender, config);
        if !flags.is_empty() {
            transmitter = transmitter.with_injector(self.fault_injector()?);
        }

        let summary = transmitter.run(&datagram, self.cancel.clone()).await?;
        println!(
            "{} {} datagrams sent ({} corrupted, {} retried) in {:.3}s: {}",
            summary.sent,
            datagram.kind(),
            summary.corrupted,
            summary.retried,
            summary.elapsed.as_secs_f64(),
            summary.stop
        );
        Ok(())
    }
}

/// Reject corruption requests for fields the family's header lacks.
fn check_flags(flags: CorruptionFlags, family: IpFamily) -> Result<()> {
    let unsupported = flags.unsupported_for(family);
    if !unsupported.is_empty() {
        let names: Vec<String> = unsupported.iter().map(|r| r.to_string()).collect();
        bail!("{family} headers have no {} field to corrupt", names.join(", "));
    }
    Ok(())
}

fn send_mode(opts: &TransmitArgs) -> Result<SendMode> {
    if opts.once {
        return Ok(SendMode::Once);
    }
    match opts.timeout {
        Some(secs) => {
            if !secs.is_finite() || secs <= 0.0 {
                bail!("timeout must be a positive number of seconds (got {secs})");
            }
            let duration = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("timeout {secs} is out of range"))?;
            Ok(SendMode::For(duration))
        }
        None => Ok(SendMode::UntilStopped),
    }
}

/// The hardware address to deliver to: explicit, or derived from a multicast
/// destination.
fn destination_mac(explicit: Option<MacAddr>, destination: IpAddr) -> Result<MacAddr> {
    if let Some(mac) = explicit {
        return Ok(mac);
    }
    match destination {
        IpAddr::V4(group) if group.is_multicast() => Ok(MacAddr::for_ipv4_multicast(group)),
        IpAddr::V6(group) if group.is_multicast() => Ok(MacAddr::for_ipv6_multicast(group)),
        _ => bail!("-M <MAC> is required for unicast destination {destination}"),
    }
}

fn v4_sources(list: Option<&str>) -> Result<Vec<Ipv4Addr>> {
    let Some(list) = list else {
        return Ok(Vec::new());
    };
    parse_source_list(IpFamily::V4, list)
        .context("invalid source address list")?
        .into_iter()
        .map(|addr| match addr {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(v6) => bail!("{v6} is not an IPv4 address"),
        })
        .collect()
}

fn v6_sources(list: Option<&str>) -> Result<Vec<Ipv6Addr>> {
    let Some(list) = list else {
        return Ok(Vec::new());
    };
    parse_source_list(IpFamily::V6, list)
        .context("invalid source address list")?
        .into_iter()
        .map(|addr| match addr {
            IpAddr::V6(v6) => Ok(v6),
            IpAddr::V4(v4) => bail!("{v4} is not an IPv6 address"),
        })
        .collect()
}

fn mld_query(cmd: &MldQueryArgs) -> Result<MldQuery> {
    let sources = v6_sources(cmd.sources.as_deref())?;
    check_mld_sources(sources.len())?;
    let mut query = match cmd.dst {
        Some(dst) if dst != IPV6_ALL_NODES => MldQuery::for_group(cmd.src, dst, sources),
        _ => MldQuery {
            sources,
            ..MldQuery::general(cmd.src)
        },
    };
    if let Some(max_response) = cmd.max_response {
        query.max_response = max_response;
    }
    Ok(query)
}

fn igmp_query(cmd: &IgmpQueryArgs) -> Result<IgmpQuery> {
    let sources = v4_sources(cmd.sources.as_deref())?;
    check_igmp_sources(sources.len())?;
    let mut query = match cmd.group {
        Some(group) => {
            if !group.is_multicast() {
                bail!("{group} is not a multicast address");
            }
            IgmpQuery::for_group(cmd.src, group, sources)
        }
        None => IgmpQuery {
            sources,
            ..IgmpQuery::general(cmd.src)
        },
    };
    if let Some(max_response) = cmd.max_response {
        query.max_response = max_response;
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Command {
        Args::try_parse_from(argv).unwrap().command.unwrap()
    }

    fn transmit_opts(extra: &[&str]) -> TransmitArgs {
        let mut argv = vec!["nstools", "icmpv4", "-I", "lo", "-S", "10.0.0.1", "-D", "10.0.0.2"];
        argv.extend_from_slice(extra);
        match parse(&argv) {
            Command::Icmpv4(cmd) => cmd.transmit,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn send_mode_selection() {
        assert_eq!(send_mode(&transmit_opts(&["-o"])).unwrap(), SendMode::Once);
        assert_eq!(
            send_mode(&transmit_opts(&["-t", "1.5"])).unwrap(),
            SendMode::For(Duration::from_millis(1500))
        );
        assert_eq!(
            send_mode(&transmit_opts(&[])).unwrap(),
            SendMode::UntilStopped
        );
    }

    #[test]
    fn non_positive_timeout_rejected() {
        assert!(send_mode(&transmit_opts(&["-t", "0"])).is_err());
        assert!(send_mode(&transmit_opts(&["-t", "inf"])).is_err());
    }

    #[test]
    fn multicast_destination_derives_mac() {
        let mac = destination_mac(None, "ff02::1".parse().unwrap()).unwrap();
        assert_eq!(mac.octets(), [0x33, 0x33, 0, 0, 0, 1]);
        let mac = destination_mac(None, "224.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(mac.octets(), [0x01, 0x00, 0x5e, 0, 0, 1]);
    }

    #[test]
    fn unicast_destination_needs_mac() {
        assert!(destination_mac(None, "10.0.0.2".parse().unwrap()).is_err());
        let explicit = MacAddr::new([2, 0, 0, 0, 0, 1]);
        assert_eq!(
            destination_mac(Some(explicit), "10.0.0.2".parse().unwrap()).unwrap(),
            explicit
        );
    }

    #[test]
    fn ipv6_rejects_ipv4_only_flags() {
        let flags = CorruptionFlags {
            checksum: true,
            ..CorruptionFlags::NONE
        };
        let err = check_flags(flags, IpFamily::V6).unwrap_err();
        assert!(err.to_string().contains("IPv6"));
        assert!(check_flags(flags, IpFamily::V4).is_ok());
        assert!(check_flags(CorruptionFlags::PROTOCOL, IpFamily::V6).is_ok());
    }

    #[test]
    fn mld_query_with_group_and_sources() {
        let Command::MldQuery(cmd) = parse(&[
            "nstools", "mld-query", "-I", "lo", "-S", "fe80::1", "-D", "ff0e::5", "-r", "500",
            "-a", "2001:db8::1,2001:db8::2",
        ]) else {
            panic!("expected mld-query");
        };
        let query = mld_query(&cmd).unwrap();
        assert_eq!(query.dst, "ff0e::5".parse::<Ipv6Addr>().unwrap());
        assert_eq!(query.group(), query.dst);
        assert_eq!(query.max_response, 500);
        assert_eq!(query.sources.len(), 2);
    }

    #[test]
    fn mld_query_defaults_to_general() {
        let Command::MldQuery(cmd) = parse(&["nstools", "mld-query", "-I", "lo", "-S", "fe80::1"])
        else {
            panic!("expected mld-query");
        };
        let query = mld_query(&cmd).unwrap();
        assert_eq!(query.dst, IPV6_ALL_NODES);
        assert!(query.group().is_unspecified());
    }

    #[test]
    fn mld_sources_must_be_ipv6() {
        let Command::MldQuery(cmd) = parse(&[
            "nstools", "mld-query", "-I", "lo", "-S", "fe80::1", "-a", "192.0.2.1",
        ]) else {
            panic!("expected mld-query");
        };
        assert!(mld_query(&cmd).is_err());
    }

    #[test]
    fn igmp_query_group_must_be_multicast() {
        let Command::IgmpQuery(cmd) = parse(&[
            "nstools", "igmp-query", "-I", "lo", "-S", "192.0.2.1", "-g", "192.0.2.9",
        ]) else {
            panic!("expected igmp-query");
        };
        assert!(igmp_query(&cmd).is_err());
    }

    #[test]
    fn igmp_general_query_goes_to_all_systems() {
        let Command::IgmpQuery(cmd) = parse(&[
            "nstools", "igmp-query", "-I", "lo", "-S", "192.0.2.1", "-a", "198.51.100.1",
        ]) else {
            panic!("expected igmp-query");
        };
        let query = igmp_query(&cmd).unwrap();
        assert_eq!(query.destination(), Ipv4Addr::new(224, 0, 0, 1));
        assert_eq!(query.sources, vec![Ipv4Addr::new(198, 51, 100, 1)]);
    }
}
