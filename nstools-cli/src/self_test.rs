//! `nstools self-test`: environment and checksum diagnostics.

use std::net::Ipv6Addr;

use anyhow::{Result, bail};
use nstools_packet::build::IPPROTO_ICMPV6;
use nstools_packet::{
    DatagramBuilder, Icmpv4Echo, Interface, MldQuery, ProtocolTable, check_privileges,
    pseudo_checksum, verify,
};

enum CheckResult {
    Pass(String),
    Warn(String),
    Fail(String),
}

impl CheckResult {
    fn label(&self) -> &'static str {
        match self {
            CheckResult::Pass(_) => "ok",
            CheckResult::Warn(_) => "warn",
            CheckResult::Fail(_) => "FAIL",
        }
    }

    fn detail(&self) -> &str {
        match self {
            CheckResult::Pass(d) | CheckResult::Warn(d) | CheckResult::Fail(d) => d,
        }
    }
}

/// Print one line per check; error if any check failed.
pub fn run_self_test() -> Result<()> {
    let checks = [
        ("privileges", check_privilege()),
        ("protocols", check_protocols()),
        ("interfaces", check_interfaces()),
        ("checksums", check_checksums()),
    ];

    for (name, result) in &checks {
        eprintln!("{:>5}  {name:<11} {}", result.label(), result.detail());
    }

    let failed = checks
        .iter()
        .filter(|(_, r)| matches!(r, CheckResult::Fail(_)))
        .count();
    if failed > 0 {
        bail!("{failed} self-test check(s) failed");
    }
    eprintln!("self-test passed");
    Ok(())
}

fn check_privilege() -> CheckResult {
    let level = check_privileges();
    if level.has_raw_socket_access() {
        CheckResult::Pass(format!("{level} (packet sockets available)"))
    } else {
        CheckResult::Warn(format!(
            "{level} (no CAP_NET_RAW, senders will fail; mcast-join still works)"
        ))
    }
}

fn check_protocols() -> CheckResult {
    let table = ProtocolTable::system();
    match table.first_unregistered() {
        Some(unknown) => CheckResult::Pass(format!(
            "{} protocols known, first unregistered number is {unknown}",
            table.len()
        )),
        None => CheckResult::Warn(
            "every protocol number is registered; unknown-protocol faults disabled".into(),
        ),
    }
}

fn check_interfaces() -> CheckResult {
    let ifaces = match Interface::list() {
        Ok(ifaces) => ifaces,
        Err(e) => return CheckResult::Fail(format!("cannot enumerate interfaces: {e}")),
    };
    if ifaces.is_empty() {
        return CheckResult::Fail("no network interfaces".into());
    }
    let names: Vec<String> = ifaces
        .iter()
        .map(|i| format!("{}#{}", i.name, i.index))
        .collect();
    CheckResult::Pass(names.join(" "))
}

fn check_checksums() -> CheckResult {
    let echo = Icmpv4Echo::new([192, 0, 2, 1].into(), [192, 0, 2, 2].into(), 56).build();
    if !verify(echo.header()) || !verify(echo.payload()) {
        return CheckResult::Fail("ICMPv4 echo checksums do not verify".into());
    }
    let query = MldQuery::general(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
    let message = query.message();
    let pseudo = pseudo_checksum(
        &query.src,
        &query.dst,
        message.len() as u32,
        IPPROTO_ICMPV6,
        &message,
    );
    if pseudo != 0 {
        return CheckResult::Fail("MLDv2 query checksum does not verify".into());
    }
    CheckResult::Pass("IPv4 header, ICMPv4 and MLDv2 checksums verify".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_never_fails() {
        if let CheckResult::Fail(msg) = check_privilege() {
            panic!("privilege check reported failure: {msg}");
        }
    }

    #[test]
    fn protocol_database_has_gap() {
        match check_protocols() {
            CheckResult::Pass(_) => {}
            CheckResult::Warn(msg) | CheckResult::Fail(msg) => {
                panic!("protocol table should have an unregistered number: {msg}")
            }
        }
    }

    #[test]
    fn checksums_verify() {
        match check_checksums() {
            CheckResult::Pass(_) => {}
            CheckResult::Warn(msg) | CheckResult::Fail(msg) => panic!("{msg}"),
        }
    }
}
