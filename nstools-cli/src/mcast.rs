//! `mcast-join`: hold many group memberships, or churn one.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use nstools_core::CancellationToken;
use nstools_packet::group::family_of;
use nstools_packet::{
    GroupRequest, Interface, IpFamily, SourceFilter, join_group, leave_group, membership_socket,
    numbered_groups, parse_source_list, set_source_filter,
};
use socket2::Socket;
use tracing::{debug, info, warn};

use crate::args::McastJoinArgs;

/// Groups named on the command line, either one address or a numbered range.
fn requested_groups(args: &McastJoinArgs) -> Result<Vec<IpAddr>> {
    match (&args.addr, &args.prefix, args.count) {
        (Some(addr), _, _) => {
            if family_of(addr) != args.family {
                bail!("{addr} is not an {} address", args.family);
            }
            if !addr.is_multicast() {
                bail!("{addr} is not a multicast address");
            }
            Ok(vec![*addr])
        }
        (None, Some(prefix), Some(count)) => Ok(numbered_groups(args.family, prefix, count)?),
        _ => bail!("multicast address is not specified"),
    }
}

fn source_filter(
    args: &McastJoinArgs,
    sources: &Option<Vec<IpAddr>>,
    request: GroupRequest,
) -> Result<Option<SourceFilter>> {
    match sources {
        Some(sources) => Ok(Some(SourceFilter::new(
            request,
            args.filter_mode,
            sources.clone(),
        )?)),
        None => Ok(None),
    }
}

/// Sockets holding the joined groups, plus what each one joined.
struct Memberships {
    sockets: Vec<Socket>,
    joined: Vec<(usize, GroupRequest)>,
}

impl Memberships {
    fn leave_all(&self) {
        for (slot, request) in &self.joined {
            if let Err(e) = leave_group(&self.sockets[*slot], request) {
                warn!(group = %request.group, error = %e, "leave failed");
            }
        }
    }
}

/// Join every group, stopping at the first failure after the first group.
fn join_all(
    args: &McastJoinArgs,
    interface: &Interface,
    groups: &[IpAddr],
    sources: &Option<Vec<IpAddr>>,
) -> Result<Memberships> {
    let mut members = Memberships {
        sockets: Vec::new(),
        joined: Vec::with_capacity(groups.len()),
    };

    for (idx, group) in groups.iter().enumerate() {
        if idx == 0 || args.multi_socket {
            match membership_socket(args.family) {
                Ok(socket) => members.sockets.push(socket),
                Err(e) if idx == 0 => return Err(e).context("cannot open membership socket"),
                Err(e) => {
                    warn!(opened = idx, error = %e, "socket limit reached, stopping");
                    break;
                }
            }
        }
        let slot = members.sockets.len() - 1;
        let socket = &members.sockets[slot];

        let request = GroupRequest::new(interface.index, *group)?;
        let filter = source_filter(args, sources, request)?;

        let outcome = join_group(socket, &request).and_then(|()| match &filter {
            Some(filter) => set_source_filter(socket, filter),
            None => Ok(()),
        });
        match outcome {
            Ok(()) => {
                debug!(%group, socket = slot, "joined");
                members.joined.push((slot, request));
            }
            Err(e) if idx == 0 => {
                return Err(e).with_context(|| format!("failed to join {group}"));
            }
            Err(e) => {
                // Kernel membership limits end the run early but are not fatal.
                warn!(%group, joined = members.joined.len(), error = %e, "join failed, stopping");
                if let Err(e) = leave_group(socket, &request) {
                    debug!(%group, error = %e, "cleanup leave failed");
                }
                break;
            }
        }
    }

    Ok(members)
}

async fn pause(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(interval) => cancel.is_cancelled(),
    }
}

/// Join `group` and leave it again `times` times, pausing after each step.
async fn join_leave(
    args: &McastJoinArgs,
    interface: &Interface,
    group: IpAddr,
    sources: &Option<Vec<IpAddr>>,
    times: u64,
    cancel: &CancellationToken,
) -> Result<u64> {
    let socket = membership_socket(args.family).context("cannot open membership socket")?;
    let request = GroupRequest::new(interface.index, group)?;
    let filter = source_filter(args, sources, request)?;
    let interval = Duration::from_millis(args.interval_ms);

    let mut rounds = 0;
    while rounds < times {
        join_group(&socket, &request).with_context(|| format!("failed to join {group}"))?;
        if let Some(filter) = &filter {
            set_source_filter(&socket, filter).context("failed to add a group filter")?;
        }
        let stop = pause(cancel, interval).await;

        leave_group(&socket, &request).with_context(|| format!("failed to leave {group}"))?;
        rounds += 1;
        if stop || pause(cancel, interval).await {
            break;
        }
    }
    Ok(rounds)
}

pub async fn run(args: &McastJoinArgs, cancel: CancellationToken) -> Result<()> {
    let interface = Interface::lookup(&args.interface)
        .with_context(|| format!("specified interface {} seems incorrect", args.interface))?;
    let groups = requested_groups(args)?;
    let sources = args
        .sources
        .as_deref()
        .map(|list| parse_source_list(args.family, list))
        .transpose()
        .context("invalid source address list")?;

    if let Some(times) = args.join_leave {
        let rounds = join_leave(args, &interface, groups[0], &sources, times, &cancel).await?;
        info!(group = %groups[0], rounds, "join/leave finished");
        println!("{rounds} join/leave rounds");
        return Ok(());
    }

    let members = join_all(args, &interface, &groups, &sources)?;
    println!("{} groups", members.joined.len());
    info!(
        interface = %interface.name,
        groups = members.joined.len(),
        sockets = members.sockets.len(),
        "holding memberships until stopped"
    );

    cancel.cancelled().await;
    members.leave_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Args, Command};
    use clap::Parser;

    fn join_args(argv: &[&str]) -> McastJoinArgs {
        let mut full = vec!["nstools", "mcast-join", "-I", "lo"];
        full.extend_from_slice(argv);
        match Args::try_parse_from(full).unwrap().command {
            Some(Command::McastJoin(args)) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn single_group_must_match_family() {
        let args = join_args(&["-f", "6", "-a", "239.1.1.1"]);
        assert!(requested_groups(&args).is_err());
    }

    #[test]
    fn single_group_must_be_multicast() {
        let args = join_args(&["-a", "10.0.0.1"]);
        assert!(requested_groups(&args).is_err());
    }

    #[test]
    fn numbered_groups_from_prefix() {
        let args = join_args(&["-p", "239.7", "-n", "300"]);
        let groups = requested_groups(&args).unwrap();
        assert_eq!(groups.len(), 300);
        assert_eq!(groups[0], "239.7.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(groups[254], "239.7.1.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn filter_built_only_with_sources() {
        let args = join_args(&["-a", "239.1.1.1", "-F", "exclude"]);
        let request = GroupRequest::new(1, "239.1.1.1".parse().unwrap()).unwrap();
        assert!(source_filter(&args, &None, request).unwrap().is_none());

        let sources = Some(vec!["192.0.2.1".parse().unwrap()]);
        let filter = source_filter(&args, &sources, request).unwrap().unwrap();
        assert_eq!(filter.sources.len(), 1);
        assert_eq!(filter.mode, nstools_packet::FilterMode::Exclude);
    }

    #[tokio::test]
    async fn pause_returns_early_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pause(&cancel, Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn pause_elapses_without_cancel() {
        let cancel = CancellationToken::new();
        assert!(!pause(&cancel, Duration::from_millis(1)).await);
    }

    #[test]
    fn join_on_loopback() {
        let args = join_args(&["-a", "239.255.10.10"]);
        let Ok(interface) = Interface::lookup("lo") else {
            return;
        };
        let groups = requested_groups(&args).unwrap();
        // Loopback may lack multicast in sandboxes; only check success shape.
        if let Ok(members) = join_all(&args, &interface, &groups, &None) {
            assert_eq!(members.joined.len(), 1);
            members.leave_all();
        }
    }
}
