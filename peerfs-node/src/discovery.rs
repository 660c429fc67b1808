//! LAN discovery: UDP multicast beacon, parse beacons/responses, maintain the transport's peer table.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use peerfs_core::wire::{decode_frame, encode_frame};
use peerfs_core::{Message, PeerId, Transport, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::transport::TcpHost;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 60);
const BEACON_INTERVAL: Duration = Duration::from_secs(4);
const PEER_TIMEOUT: Duration = Duration::from_secs(16);

type LastSeen = Arc<Mutex<HashMap<PeerId, Instant>>>;

/// What a received discovery message means for the peer table.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    /// Peer is alive at `addr`; `reply` if it expects a unicast response.
    Seen {
        peer: PeerId,
        addr: SocketAddr,
        reply: bool,
    },
    Left(PeerId),
}

fn interpret(msg: &Message, from: SocketAddr, local_id: PeerId) -> Option<Event> {
    let (version, peer, port, reply) = match *msg {
        Message::Beacon {
            protocol_version,
            peer_id,
            listen_port,
        } => (protocol_version, peer_id, listen_port, true),
        Message::DiscoveryResponse {
            protocol_version,
            peer_id,
            listen_port,
        } => (protocol_version, peer_id, listen_port, false),
        Message::Leave { peer_id } if peer_id != local_id => return Some(Event::Left(peer_id)),
        Message::Leave { .. } => return None,
    };
    if version != PROTOCOL_VERSION || peer == local_id {
        return None;
    }
    Some(Event::Seen {
        peer,
        addr: SocketAddr::new(from.ip(), port),
        reply,
    })
}

fn frame(msg: &Message) -> std::io::Result<Vec<u8>> {
    encode_frame(msg).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

pub async fn run_discovery(
    host: Arc<TcpHost>,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let socket = Arc::new(make_multicast_socket(discovery_port).await?);
    let last_seen: LastSeen = Arc::new(Mutex::new(HashMap::new()));
    let local_id = host.local_peer_id();

    let beacon_task = tokio::spawn(beacon_loop(socket.clone(), local_id, discovery_port, transport_port));
    let recv_task = tokio::spawn(recv_loop(socket, host.clone(), last_seen.clone(), transport_port));
    let timeout_task = tokio::spawn(peer_timeout_loop(last_seen, host));

    let (beacon, recv, timeout) = tokio::try_join!(beacon_task, recv_task, timeout_task)?;
    beacon.and(recv).and(timeout)
}

async fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn beacon_loop(
    socket: Arc<UdpSocket>,
    local_id: PeerId,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let beacon = frame(&Message::Beacon {
        protocol_version: PROTOCOL_VERSION,
        peer_id: local_id,
        listen_port: transport_port,
    })?;
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    loop {
        if let Err(e) = socket.send_to(&beacon, dest).await {
            tracing::debug!(error = %e, "beacon send failed");
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    host: Arc<TcpHost>,
    last_seen: LastSeen,
    transport_port: u16,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    let local_id = host.local_peer_id();
    let response = frame(&Message::DiscoveryResponse {
        protocol_version: PROTOCOL_VERSION,
        peer_id: local_id,
        listen_port: transport_port,
    })?;

    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let msg = match decode_frame(&buf[..n]) {
            Ok((msg, _)) => msg,
            Err(e) => {
                tracing::debug!(%from, error = %e, "ignoring undecodable datagram");
                continue;
            }
        };
        match interpret(&msg, from, local_id) {
            Some(Event::Seen { peer, addr, reply }) => {
                last_seen.lock().await.insert(peer, Instant::now());
                if host.insert_peer(peer, addr).await {
                    tracing::info!(peer = %peer, %addr, "peer discovered");
                }
                if reply {
                    let _ = socket.send_to(&response, from).await;
                }
            }
            Some(Event::Left(peer)) => {
                last_seen.lock().await.remove(&peer);
                if host.remove_peer(&peer).await {
                    tracing::info!(peer = %peer, "peer left");
                }
            }
            None => {}
        }
    }
}

async fn peer_timeout_loop(last_seen: LastSeen, host: Arc<TcpHost>) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(BEACON_INTERVAL).await;
        let now = Instant::now();
        let timed_out: Vec<PeerId> = {
            let mut seen = last_seen.lock().await;
            let list: Vec<PeerId> = seen
                .iter()
                .filter(|(_, t)| now.duration_since(**t) >= PEER_TIMEOUT)
                .map(|(id, _)| *id)
                .collect();
            for id in &list {
                seen.remove(id);
            }
            list
        };
        for peer in timed_out {
            host.remove_peer(&peer).await;
            tracing::info!(peer = %peer, "peer timed out");
        }
    }
}

/// Tell the LAN this node is going away. Best effort.
pub async fn send_leave(local_id: PeerId, discovery_port: u16) -> std::io::Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_multicast_ttl_v4(1)?;
    let leave = frame(&Message::Leave { peer_id: local_id })?;
    socket
        .send_to(&leave, SocketAddr::from((MULTICAST_GROUP, discovery_port)))
        .await?;
    Ok(())
}
