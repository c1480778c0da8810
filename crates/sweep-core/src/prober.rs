//! ICMP echo prober.
//!
//! One shared source socket for the whole process: at the probe rates this
//! scanner runs, a socket per probe would exhaust kernel resources. Replies
//! are demultiplexed by a dedicated `icmp-recv` thread: each in-flight probe
//! registers a oneshot waiter keyed by target address, and the thread
//! completes the waiter when a matching echo reply arrives.
//!
//! The socket is an unprivileged `SOCK_DGRAM`/`IPPROTO_ICMP` socket when the
//! kernel allows it (`net.ipv4.ping_group_range`); otherwise a `SOCK_RAW`
//! fallback is used, which requires CAP_NET_RAW. On the dgram path the kernel
//! owns the echo identifier and demuxes per socket; on the raw path replies
//! carry the full IPv4 header and every ICMP packet on the host is delivered,
//! so the identifier is checked explicitly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Reachability verdict for one probed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub ip: u32,
    pub reachable: bool,
}

/// One echo request against one address.
#[async_trait]
pub trait Pinger: Send + Sync + 'static {
    /// Returns `true` iff a matching reply arrives within the deadline.
    /// Never fails: timeouts and transport errors collapse into `false`.
    async fn probe(&self, ip: u32) -> bool;
}

/// Fixed reply deadline per probe.
const PROBE_DEADLINE: Duration = Duration::from_secs(1);

/// Receive poll interval; lets the reply thread notice cancellation.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

const ECHO_REQUEST: u8 = 8;
const ECHO_REPLY: u8 = 0;
const HEADER_LEN: usize = 8;
const PAYLOAD_LEN: usize = 16;
const PACKET_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

// Large enough for an IPv4 header plus any echo reply we could be sent.
const RECV_CAP: usize = 1500;

pub struct IcmpProber {
    socket: Arc<Socket>,
    pending: Arc<DashMap<u32, oneshot::Sender<()>>>,
    /// Echo identifier stamped into requests; only meaningful on the raw
    /// path (the dgram path lets the kernel assign and match it).
    ident: u16,
    raw: bool,
    seq: AtomicU16,
}

impl IcmpProber {
    /// Open the shared source socket, bound to the wildcard address.
    pub fn new() -> Result<Self> {
        let (socket, raw) = open_icmp_socket()?;
        socket
            .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
            .context("cannot bind icmp socket")?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .context("cannot set icmp read timeout")?;

        Ok(Self {
            socket: Arc::new(socket),
            pending: Arc::new(DashMap::new()),
            ident: std::process::id() as u16,
            raw,
            seq: AtomicU16::new(0),
        })
    }

    /// Start the reply demux thread. Exits shortly after `shutdown` fires.
    pub fn spawn_reply_listener(
        &self,
        shutdown: CancellationToken,
    ) -> Result<std::thread::JoinHandle<()>> {
        let socket = self.socket.clone();
        let pending = self.pending.clone();
        let ident = self.ident;
        let raw = self.raw;

        let handle = std::thread::Builder::new()
            .name("icmp-recv".into())
            .spawn(move || {
                tracing::debug!(raw, "icmp reply listener started");
                let mut buf = vec![0u8; RECV_CAP];
                while !shutdown.is_cancelled() {
                    let buf_uninit: &mut [MaybeUninit<u8>] = unsafe {
                        std::slice::from_raw_parts_mut(buf.as_mut_ptr() as _, buf.len())
                    };
                    let (len, from) = match socket.recv_from(buf_uninit) {
                        Ok(v) => v,
                        Err(e)
                            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                        {
                            continue
                        }
                        Err(e) => {
                            tracing::warn!("icmp receive failed: {e}");
                            continue;
                        }
                    };

                    let Some(source) = from.as_socket_ipv4() else {
                        continue;
                    };
                    let Some(packet) = icmp_packet(&buf[..len], raw) else {
                        continue;
                    };
                    if !reply_matches(packet, raw.then_some(ident)) {
                        continue;
                    }

                    // Replies come back from the probed address itself, so the
                    // source is the demux key. The pipeline probes each address
                    // at most once per range cycle, so keys never collide.
                    if let Some((_, waiter)) = pending.remove(&u32::from(*source.ip())) {
                        let _ = waiter.send(());
                    }
                }
            })
            .context("cannot spawn icmp-recv thread")?;
        Ok(handle)
    }
}

#[async_trait]
impl Pinger for IcmpProber {
    async fn probe(&self, ip: u32) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(ip, reply_tx);

        let seq = self.seq.fetch_add(1, Relaxed);
        let packet = build_echo_request(self.ident, seq);
        let dest: SockAddr = SocketAddrV4::new(Ipv4Addr::from(ip), 0).into();
        if self.socket.send_to(&packet, &dest).is_err() {
            self.pending.remove(&ip);
            return false;
        }

        let reachable = tokio::time::timeout(PROBE_DEADLINE, reply_rx)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        self.pending.remove(&ip);
        reachable
    }
}

fn open_icmp_socket() -> Result<(Socket, bool)> {
    match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
        Ok(socket) => Ok((socket, false)),
        Err(dgram_err) => match Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)) {
            Ok(socket) => Ok((socket, true)),
            Err(raw_err) => anyhow::bail!(
                "cannot open icmp socket (dgram: {dgram_err}; raw: {raw_err}); \
                 grant CAP_NET_RAW or widen net.ipv4.ping_group_range"
            ),
        },
    }
}

/// Echo request: 8-byte ICMP header plus a fixed pattern payload.
fn build_echo_request(ident: u16, seq: u16) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = ECHO_REQUEST;
    packet[4..6].copy_from_slice(&ident.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, byte) in packet[HEADER_LEN..].iter_mut().enumerate() {
        *byte = 0xFF - i as u8;
    }
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// RFC 1071 internet checksum: one's-complement sum of 16-bit words with the
/// carry folded back in.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Slice the ICMP packet out of a received datagram. The raw path delivers
/// the full IPv4 packet, so the variable-length header is skipped via IHL;
/// the dgram path delivers the ICMP packet directly.
fn icmp_packet(datagram: &[u8], raw: bool) -> Option<&[u8]> {
    if !raw {
        return Some(datagram);
    }
    let ihl = (*datagram.first()? & 0x0F) as usize * 4;
    if ihl < 20 || datagram.len() <= ihl {
        return None;
    }
    Some(&datagram[ihl..])
}

/// True iff `packet` is an echo reply for this prober. `expect_ident` is
/// `Some` on the raw path only.
fn reply_matches(packet: &[u8], expect_ident: Option<u16>) -> bool {
    if packet.len() < HEADER_LEN || packet[0] != ECHO_REPLY || packet[1] != 0 {
        return false;
    }
    match expect_ident {
        Some(ident) => u16::from_be_bytes([packet[4], packet[5]]) == ident,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_reply(ident: u16, seq: u16) -> [u8; PACKET_LEN] {
        let mut packet = build_echo_request(ident, seq);
        packet[0] = ECHO_REPLY;
        packet[2..4].copy_from_slice(&[0, 0]);
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        packet
    }

    #[test]
    fn test_echo_request_layout() {
        let packet = build_echo_request(0xABCD, 7);
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(packet[0], ECHO_REQUEST);
        assert_eq!(packet[1], 0);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0xABCD);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 7);
    }

    #[test]
    fn test_checksum_of_checksummed_packet_is_zero() {
        // Verifying a packet that already carries its checksum yields zero,
        // the receiver-side property from RFC 1071.
        let packet = build_echo_request(0x1234, 42);
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn test_checksum_odd_length_tail() {
        // The trailing odd byte is padded into the high half of a word.
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), !0x0402u16);
    }

    #[test]
    fn test_reply_matches_dgram() {
        let reply = echo_reply(0, 1);
        assert!(reply_matches(&reply, None));
    }

    #[test]
    fn test_reply_matches_raw_checks_identifier() {
        let reply = echo_reply(0x2222, 1);
        assert!(reply_matches(&reply, Some(0x2222)));
        assert!(!reply_matches(&reply, Some(0x3333)));
    }

    #[test]
    fn test_request_is_not_a_reply() {
        let request = build_echo_request(1, 1);
        assert!(!reply_matches(&request, None));
    }

    #[test]
    fn test_short_packet_rejected() {
        assert!(!reply_matches(&[0u8; 4], None));
    }

    #[test]
    fn test_raw_datagram_header_stripped() {
        let mut datagram = vec![0u8; 20 + PACKET_LEN];
        datagram[0] = 0x45; // version 4, IHL 5
        datagram[20..].copy_from_slice(&echo_reply(9, 9));
        let packet = icmp_packet(&datagram, true).unwrap();
        assert_eq!(packet[0], ECHO_REPLY);
        assert!(reply_matches(packet, Some(9)));
    }

    #[test]
    fn test_truncated_raw_datagram_rejected() {
        let datagram = [0x45u8, 0, 0, 0, 0, 0, 0, 0];
        assert!(icmp_packet(&datagram, true).is_none());
    }
}
