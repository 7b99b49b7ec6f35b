//! Optional reachability probes against a VM's public address
//!
//! Both probes are bounded by their own timeout and never fail: every
//! problem degrades to a distinguishable status.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::models::{CupsStatus, SshBanner};

pub const SSH_PORT: u16 = 22;
pub const CUPS_PORT: u16 = 631;

/// Lines a server may send before its identification string
const MAX_PRE_BANNER_LINES: usize = 16;

fn default_ssh_timeout_secs() -> u64 {
    5
}

fn default_cups_timeout_secs() -> u64 {
    10
}

fn default_ncat_path() -> String {
    "ncat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub check_ssh: bool,
    #[serde(default)]
    pub check_cups: bool,
    #[serde(default = "default_ssh_timeout_secs")]
    pub ssh_timeout_secs: u64,
    #[serde(default = "default_cups_timeout_secs")]
    pub cups_timeout_secs: u64,
    #[serde(default = "default_ncat_path")]
    pub ncat_path: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            check_ssh: false,
            check_cups: false,
            ssh_timeout_secs: default_ssh_timeout_secs(),
            cups_timeout_secs: default_cups_timeout_secs(),
            ncat_path: default_ncat_path(),
        }
    }
}

/// Whether an address is routable on the public internet
pub fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => is_global_v6(v6),
    }
}

fn is_global_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    !(a == 0
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // shared address space (RFC 6598)
        || (a == 100 && (64..128).contains(&b))
        // IETF protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // benchmarking (RFC 2544)
        || (a == 198 && (18..20).contains(&b))
        // reserved
        || a >= 240)
}

fn is_global_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_global_v4(&mapped);
    }
    let first = ip.segments()[0];
    !(ip.is_unspecified()
        || ip.is_loopback()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
        // documentation 2001:db8::/32
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
        // multicast other than global scope
        || (ip.is_multicast() && (first & 0x000f) != 0x000e))
}

/// The public address of a VM. When several addresses are global the last
/// one listed wins; unparseable entries are ignored.
pub fn public_address(addresses: &[String]) -> Option<IpAddr> {
    addresses
        .iter()
        .filter_map(|a| a.trim().parse::<IpAddr>().ok())
        .filter(is_global)
        .last()
}

/// Read the SSH identification string of the server at `addr`
pub async fn probe_ssh_banner(addr: SocketAddr, timeout: Duration) -> SshBanner {
    match tokio::time::timeout(timeout, read_banner(addr)).await {
        Ok(Ok(Some(banner))) => SshBanner::Banner(banner),
        Ok(Ok(None)) => SshBanner::Unreachable,
        Ok(Err(e)) => {
            debug!(address = %addr, error = %e, "SSH probe failed");
            SshBanner::Unreachable
        }
        Err(_) => {
            debug!(address = %addr, "SSH probe timed out");
            SshBanner::Unreachable
        }
    }
}

async fn read_banner(addr: SocketAddr) -> io::Result<Option<String>> {
    let stream = TcpStream::connect(addr).await?;
    let mut lines = BufReader::new(stream).lines();
    for _ in 0..MAX_PRE_BANNER_LINES {
        match lines.next_line().await? {
            Some(line) if line.starts_with("SSH-") => {
                return Ok(Some(line.trim_end().to_string()))
            }
            Some(_) => continue,
            None => break,
        }
    }
    Ok(None)
}

/// Check whether the CUPS port answers on TCP or UDP using `ncat`
pub async fn probe_cups(ncat: &str, ip: IpAddr, timeout: Duration) -> CupsStatus {
    let target = ip.to_string();
    let port = CUPS_PORT.to_string();
    let tcp_args = ["--nodns", "-z", target.as_str(), port.as_str()];
    let udp_args = [
        "--udp",
        "--nodns",
        "--idle-timeout",
        "3s",
        target.as_str(),
        port.as_str(),
    ];

    let (tcp, udp) = tokio::join!(
        run_ncat(ncat, &tcp_args, timeout),
        run_ncat(ncat, &udp_args, timeout)
    );

    let missing = |run: &io::Result<Option<i32>>| {
        matches!(run, Err(e) if e.kind() == io::ErrorKind::NotFound)
    };
    if missing(&tcp) || missing(&udp) {
        return CupsStatus::ToolMissing;
    }

    match (tcp.ok().flatten(), udp.ok().flatten()) {
        (Some(0), _) | (_, Some(0)) => CupsStatus::Open,
        (Some(1), Some(1)) => CupsStatus::Closed,
        (tcp, udp) => CupsStatus::Inconclusive { tcp, udp },
    }
}

/// Exit code of one `ncat` run; `None` when it timed out or was signalled
async fn run_ncat(ncat: &str, args: &[&str], timeout: Duration) -> io::Result<Option<i32>> {
    let mut child = Command::new(ncat)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(status?.code()),
        Err(_) => {
            debug!(program = ncat, "ncat timed out");
            Ok(None)
        }
    }
}

/// Runs the enabled probes for one VM
#[derive(Debug, Clone)]
pub struct Prober {
    config: ProbeConfig,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// `None` when the SSH probe is disabled
    pub async fn ssh(&self, addresses: &[String]) -> Option<SshBanner> {
        if !self.config.check_ssh {
            return None;
        }
        let banner = match public_address(addresses) {
            Some(ip) => {
                probe_ssh_banner(
                    SocketAddr::new(ip, SSH_PORT),
                    Duration::from_secs(self.config.ssh_timeout_secs),
                )
                .await
            }
            None => SshBanner::NoPublicAddress,
        };
        Some(banner)
    }

    /// `None` when the CUPS probe is disabled
    pub async fn cups(&self, addresses: &[String]) -> Option<CupsStatus> {
        if !self.config.check_cups {
            return None;
        }
        let status = match public_address(addresses) {
            Some(ip) => {
                probe_cups(
                    &self.config.ncat_path,
                    ip,
                    Duration::from_secs(self.config.cups_timeout_secs),
                )
                .await
            }
            None => CupsStatus::NoPublicAddress,
        };
        Some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_global_classification() {
        for ip in ["193.146.75.10", "8.8.8.8", "2a00:1450:4001::1"] {
            assert!(is_global(&ip.parse().unwrap()), "{ip} should be global");
        }
        for ip in [
            "10.0.0.4",
            "172.16.3.1",
            "192.168.1.2",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "0.0.0.0",
            "fd00::1",
            "fe80::1",
            "::1",
            "2001:db8::1",
        ] {
            assert!(!is_global(&ip.parse().unwrap()), "{ip} should not be global");
        }
    }

    #[test]
    fn test_public_address_takes_last_global() {
        let list = addrs(&["10.0.0.4", "193.1.2.3", "192.168.1.1", "147.83.1.1"]);
        assert_eq!(public_address(&list), Some("147.83.1.1".parse().unwrap()));
        assert_eq!(public_address(&addrs(&["10.0.0.4", "not-an-ip"])), None);
        assert_eq!(public_address(&[]), None);
    }

    #[tokio::test]
    async fn test_ssh_banner_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13\r\n")
                .await
                .unwrap();
        });

        let banner = probe_ssh_banner(addr, Duration::from_secs(2)).await;
        assert_eq!(
            banner,
            SshBanner::Banner("SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13".to_string())
        );
    }

    #[tokio::test]
    async fn test_ssh_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let banner = probe_ssh_banner(addr, Duration::from_millis(200)).await;
        assert_eq!(banner, SshBanner::Unreachable);
    }

    #[tokio::test]
    async fn test_disabled_probes_return_none() {
        let prober = Prober::new(ProbeConfig::default());
        assert!(prober.ssh(&addrs(&["8.8.8.8"])).await.is_none());
        assert!(prober.cups(&addrs(&["8.8.8.8"])).await.is_none());
    }

    #[tokio::test]
    async fn test_no_public_address() {
        let prober = Prober::new(ProbeConfig {
            check_ssh: true,
            check_cups: true,
            ..ProbeConfig::default()
        });
        let private = addrs(&["10.0.0.4"]);
        assert_eq!(prober.ssh(&private).await, Some(SshBanner::NoPublicAddress));
        assert_eq!(prober.cups(&private).await, Some(CupsStatus::NoPublicAddress));
    }

    #[tokio::test]
    async fn test_cups_tool_missing() {
        let status = probe_cups(
            "/nonexistent/ncat",
            "193.1.2.3".parse().unwrap(),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(status, CupsStatus::ToolMissing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cups_exit_codes() {
        let ip: IpAddr = "193.1.2.3".parse().unwrap();
        assert_eq!(
            probe_cups("true", ip, Duration::from_secs(2)).await,
            CupsStatus::Open
        );
        assert_eq!(
            probe_cups("false", ip, Duration::from_secs(2)).await,
            CupsStatus::Closed
        );
    }
}
