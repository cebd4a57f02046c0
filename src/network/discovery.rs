/// TCP probing of a local subnet for scale gateways
use futures_util::stream::{self, StreamExt};
use log::{debug, info};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

// Probe limits
pub const PROBE_TIMEOUT_MS: u64 = 500; // Per connect attempt
const MAX_PROBES_IN_FLIGHT: usize = 64;
const MIN_PREFIX_LEN: u8 = 16; // Larger networks would take hours to probe

/// Expand an IPv4 CIDR block into every address it contains
///
/// Host bits in the given address are ignored, so `192.168.1.77/24` is the
/// same network as `192.168.1.0/24`. The network and broadcast addresses are
/// included since serial-to-ethernet gateways are sometimes configured on them.
///
/// # Arguments
/// * `cidr` - Network in `a.b.c.d/len` notation
///
/// # Returns
/// All addresses of the network in ascending order, or a description of why
/// the block was rejected
pub fn subnet_hosts(cidr: &str) -> Result<Vec<Ipv4Addr>, String> {
    let (addr, prefix) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| format!("Expected a.b.c.d/len, got '{}'", cidr))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| format!("Invalid network address '{}': {}", addr, e))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("Invalid prefix length '{}'", prefix))?;
    if prefix > 32 {
        return Err(format!("Prefix length {} is longer than 32", prefix));
    }
    if prefix < MIN_PREFIX_LEN {
        return Err(format!(
            "Refusing to scan /{} network, use /{} or smaller",
            prefix, MIN_PREFIX_LEN
        ));
    }

    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    Ok((network..=broadcast).map(Ipv4Addr::from).collect())
}

async fn is_reachable(addr: SocketAddr, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Scan a subnet for devices accepting TCP connections on candidate ports
///
/// Every address/port pair gets one connect attempt bounded by
/// `probe_timeout`. The scan is best-effort: unreachable, filtered and slow
/// hosts are all simply absent from the result. Cancelling `cancel` stops
/// the scan early and drops any probes still in flight.
///
/// # Arguments
/// * `subnet` - Network to scan in CIDR notation
/// * `ports` - Candidate TCP ports, typically telnet and serial-server ports
/// * `probe_timeout` - Upper bound for each connect attempt
/// * `cancel` - Stop request
///
/// # Returns
/// Result containing reachable (host, port) pairs found so far, sorted by
/// address then port, or error if the subnet is invalid
pub async fn scan_for_scales(
    subnet: &str,
    ports: &[u16],
    probe_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<(String, u16)>, Box<dyn std::error::Error>> {
    let hosts = subnet_hosts(subnet)?;
    info!(
        "Scanning network {} ({} hosts, {} ports)...",
        subnet,
        hosts.len(),
        ports.len()
    );

    let candidates: Vec<SocketAddr> = hosts
        .iter()
        .flat_map(|&ip| ports.iter().map(move |&port| SocketAddr::from((ip, port))))
        .collect();

    let mut found: Vec<SocketAddr> = stream::iter(candidates)
        .map(|addr| async move { (addr, is_reachable(addr, probe_timeout).await) })
        .buffer_unordered(MAX_PROBES_IN_FLIGHT)
        .take_until(cancel.cancelled())
        .filter_map(|(addr, reachable)| async move {
            if reachable {
                info!("Found device at {}", addr);
                Some(addr)
            } else {
                None
            }
        })
        .collect()
        .await;

    found.sort();
    if cancel.is_cancelled() {
        info!("Scan of {} stopped early", subnet);
    }
    debug!("Scan of {} finished with {} device(s)", subnet, found.len());

    Ok(found
        .into_iter()
        .map(|addr| (addr.ip().to_string(), addr.port()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn expands_small_networks_including_edges() {
        let hosts = subnet_hosts("192.168.1.0/30").unwrap();
        assert_eq!(
            hosts,
            vec![
                Ipv4Addr::new(192, 168, 1, 0),
                Ipv4Addr::new(192, 168, 1, 1),
                Ipv4Addr::new(192, 168, 1, 2),
                Ipv4Addr::new(192, 168, 1, 3),
            ]
        );
        assert_eq!(subnet_hosts("10.0.0.9/32").unwrap(), vec![Ipv4Addr::new(10, 0, 0, 9)]);
    }

    #[test]
    fn host_bits_are_masked() {
        let hosts = subnet_hosts("192.168.1.77/24").unwrap();
        assert_eq!(hosts.len(), 256);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(hosts[255], Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn rejects_malformed_or_huge_networks() {
        assert!(subnet_hosts("192.168.1.0").is_err());
        assert!(subnet_hosts("192.168.1/24").is_err());
        assert!(subnet_hosts("192.168.1.0/33").is_err());
        assert!(subnet_hosts("10.0.0.0/8").is_err());
    }

    #[tokio::test]
    async fn finds_listening_port_on_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let found = scan_for_scales(
            "127.0.0.1/32",
            &[closed, open],
            Duration::from_millis(500),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(found, vec![("127.0.0.1".to_string(), open)]);
    }

    #[tokio::test]
    async fn stop_request_ends_scan_early() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let found = scan_for_scales("127.0.0.1/32", &[open], Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        assert!(found.is_empty());

        // 256 TEST-NET-1 connects at 64 in flight would take 20 s without the stop
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        let started = tokio::time::Instant::now();
        scan_for_scales("192.0.2.0/24", &[4001], Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
