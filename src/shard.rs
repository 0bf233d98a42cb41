//! Shard routing (§4.5): mapping a request to a specific shard via local-port
//! arithmetic, ported from the upstream driver's own `ShardInfo`/port-iterator
//! scheme since the server identifies a connection's shard purely by which
//! local source port it dialed from.

use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::time::Duration;

use rand::Rng;
use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const MIN_PORT: u32 = 49152;
const MAX_PORT: u32 = 65535;

/// Which shard a connection is being opened for, and how many shards the
/// target node has in total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard: u16,
    pub nr_shards: u16,
}

/// Picks a random local port in `[49152, 65535]` congruent to `shard` modulo
/// `nr_shards` (§4.5).
fn random_shard_port(si: ShardInfo) -> u16 {
    let nr_shards = si.nr_shards as u32;
    let max_range = MAX_PORT - nr_shards + 1;
    let min_range = MIN_PORT + nr_shards - 1;
    let r = rand::thread_rng().gen_range(min_range..=max_range);
    (r / nr_shards * nr_shards + si.shard as u32) as u16
}

/// Stateful iterator over consecutive local ports mapped to `si.shard`,
/// wrapping from the top of the range back to the bottom (§4.5, §8
/// boundaries: "Shard port iterator wraps from maxPort back into the valid
/// range preserving `port mod N == S`").
struct ShardPortIterator {
    si: ShardInfo,
    port: u32,
}

impl ShardPortIterator {
    fn new(si: ShardInfo) -> Self {
        Self {
            port: random_shard_port(si) as u32,
            si,
        }
    }
}

impl Iterator for ShardPortIterator {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let nr_shards = self.si.nr_shards as u32;
        self.port += nr_shards;
        if self.port > MAX_PORT {
            self.port = (MIN_PORT + nr_shards - 1) / nr_shards * nr_shards + self.si.shard as u32;
        }
        Some(self.port as u16)
    }
}

/// Binds a socket to `127.0.0.1:local_port` (or the IPv6 unspecified address
/// for a v6 target) with `SO_REUSEADDR`, then connects it to `addr`, with a
/// total deadline of `dial_timeout`.
fn bind_and_connect(addr: SocketAddr, local_port: u16, dial_timeout: Duration) -> std::io::Result<StdTcpStream> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))?;

    let local_addr: SocketAddr = if addr.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, local_port).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, local_port).into()
    };
    socket.bind(&local_addr.into())?;
    socket.set_nonblocking(false)?;
    socket.connect_timeout(&addr.into(), dial_timeout)?;
    Ok(socket.into())
}

/// Opens a TCP connection to `addr` that lands on the shard identified by
/// `si`, retrying across consecutive candidate local ports until the OS
/// grants a bind or the port range is exhausted (§4.5).
///
/// The server echoes the shard it actually placed the connection on in its
/// SUPPORTED response (§4.4); the caller is responsible for verifying that
/// against `si.shard`, since a racing process could in principle steal a
/// port out from under this dial between bind and the handshake.
pub async fn open_shard_conn(addr: SocketAddr, si: ShardInfo, dial_timeout: Duration) -> Result<TcpStream> {
    if si.nr_shards == 0 {
        return Err(Error::protocol("shard routing requires nr_shards > 0"));
    }

    let mut ports = ShardPortIterator::new(si);
    let max_tries = (MAX_PORT - MIN_PORT + 1) as usize / si.nr_shards as usize + 1;

    let mut last_error = None;
    for attempt in 0..max_tries {
        let port = ports.next().expect("ShardPortIterator never ends");
        match bind_and_connect(addr, port, dial_timeout) {
            Ok(std_stream) => {
                std_stream.set_nonblocking(true)?;
                return Ok(TcpStream::from_std(std_stream)?);
            }
            Err(error) => {
                tracing::debug!(%addr, shard = si.shard, port, attempt, %error, "shard dial failed, retrying");
                last_error = Some(error);
            }
        }
    }

    Err(Error::protocol(format!(
        "failed to open connection on shard {}: all local ports are busy ({})",
        si.shard,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_port_is_congruent_to_shard() {
        let si = ShardInfo { shard: 3, nr_shards: 8 };
        for _ in 0..100 {
            let port = random_shard_port(si);
            assert_eq!(port as u32 % si.nr_shards as u32, si.shard as u32);
            assert!((MIN_PORT..=MAX_PORT).contains(&(port as u32)));
        }
    }

    #[test]
    fn iterator_stays_congruent_across_many_steps() {
        let si = ShardInfo { shard: 5, nr_shards: 12 };
        let mut it = ShardPortIterator::new(si);
        for _ in 0..10_000 {
            let port = it.next().unwrap();
            assert_eq!(port as u32 % si.nr_shards as u32, si.shard as u32);
        }
    }

    #[test]
    fn iterator_wraps_from_max_port_back_into_range() {
        let si = ShardInfo { shard: 1, nr_shards: 3 };
        let mut it = ShardPortIterator { si, port: MAX_PORT - 1 };
        let mut saw_wrap = false;
        for _ in 0..10 {
            let before = it.port;
            let port = it.next().unwrap();
            if (port as u32) < before {
                saw_wrap = true;
            }
            assert!((MIN_PORT..=MAX_PORT).contains(&(port as u32)));
            assert_eq!(port as u32 % si.nr_shards as u32, si.shard as u32);
        }
        assert!(saw_wrap, "expected the port sequence to wrap at least once");
    }

    #[tokio::test]
    async fn rejects_zero_shard_count() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = open_shard_conn(addr, ShardInfo { shard: 0, nr_shards: 0 }, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
