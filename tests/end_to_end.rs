//! End-to-end scenarios (spec.md §8), exercised through the public
//! `Stack`/`socket`/`router` surface rather than any single module's
//! internals. Scenarios 2-4 inject wire faults (corruption, reorder,
//! drop) in the task joining two stacks, the same seam a real link
//! driver forwards through.

use std::sync::Arc;
use std::time::Duration;

use csp::buffer::Packet;
use csp::clock::Capabilities;
use csp::config::Config;
use csp::error::{CspError, Result};
use csp::id::Priority;
use csp::iface::{Interface, InterfaceDriver};
use csp::rdp::{RdpFlags, RdpHeader};
use csp::socket::{self, Socket, SocketFlags};
use csp::stack::Stack;
use tokio::sync::mpsc;

struct LinkDriver(mpsc::Sender<Packet>);

impl InterfaceDriver for LinkDriver {
    fn tx(&self, _via: Option<u16>, packet: &Packet, _from_me: bool) -> Result<()> {
        self.0.try_send(packet.share()).map_err(|_| CspError::NoBufs)
    }
}

fn node(address: u16, config: Config) -> Arc<Stack> {
    let stack = Stack::new(config, address, Capabilities::default());
    csp::router::install_loopback(&stack);
    stack
}

struct NullDriver;
impl InterfaceDriver for NullDriver {
    fn tx(&self, _via: Option<u16>, _packet: &Packet, _from_me: bool) -> Result<()> {
        Ok(())
    }
}

/// `true` once a frame's RDP header is stamped `ACK`-only (no `SYN`) and
/// carries a non-empty payload — a data segment rather than a handshake
/// leg or a bare ack.
async fn is_rdp_data_segment(packet: &Packet) -> bool {
    let frame = packet.frame().await;
    match RdpHeader::from_bytes(&frame) {
        Ok((header, rest)) => !header.flags.contains(RdpFlags::SYN) && !rest.is_empty(),
        Err(_) => false,
    }
}

/// Register a link interface + CIDR route on `stack` pointed at
/// `peer_addr`, returning the sender half the caller forwards into.
fn wire(stack: &Arc<Stack>, peer_addr: u16) -> (Arc<Interface>, mpsc::Receiver<Packet>) {
    let (tx, rx) = mpsc::channel(32);
    let iface = stack.interfaces.register(Interface::new("link0", stack.local_address, 5, Box::new(LinkDriver(tx))).unwrap());
    stack.rtable.set(peer_addr, 5, stack.interfaces.index_of(&iface).unwrap(), None).unwrap();
    stack.interfaces.check_dfl();
    (iface, rx)
}

/// Plain bidirectional join: both directions pass frames through
/// untouched.
async fn join(a: Arc<Stack>, b: Arc<Stack>) {
    let (iface_a, mut a_rx) = wire(&a, 2);
    let (iface_b, mut b_rx) = wire(&b, 1);

    let (b_recv, ib) = (b.clone(), iface_b.clone());
    tokio::spawn(async move {
        while let Some(packet) = a_rx.recv().await {
            let _ = csp::router::receive(&b_recv, ib.clone(), packet).await;
        }
    });
    let (a_recv, ia) = (a.clone(), iface_a.clone());
    tokio::spawn(async move {
        while let Some(packet) = b_rx.recv().await {
            let _ = csp::router::receive(&a_recv, ia.clone(), packet).await;
        }
    });
    csp::router::spawn(a);
    csp::router::spawn(b);
}

/// Scenario 1: loopback ping. A single node addressed `1`, talking to
/// itself over its own loopback interface.
#[tokio::test]
async fn scenario_1_loopback_ping() {
    let stack = node(1, Config::default());
    csp::router::spawn(stack.clone());

    let server = Socket::new(SocketFlags::CONN_LESS, 1);
    socket::bind(&stack, &server, Some(1)).await.unwrap();
    socket::listen(&stack, &server).await.unwrap();

    let conn = socket::connect(&stack, Priority::High, 1, 1, false, None).await.unwrap();
    let packet = stack.buffers.get().await.unwrap();
    packet.set_payload(b"abc").await.unwrap();
    socket::send(&stack, &conn, packet, None).await.unwrap();

    let reply = socket::recvfrom(&server, Some(Duration::from_secs(1))).await.unwrap();
    let id = reply.identifier().await;
    assert_eq!(&reply.frame().await[..], b"abc");
    assert_eq!((id.source, id.destination, id.destination_port), (1, 1, 1));
}

/// Scenario 2: a CRC32-required packet, corrupted on the wire, is
/// dropped on arrival and counted as a frame error, never delivered.
#[tokio::test]
async fn scenario_2_crc_integrity() {
    let config = Config { use_crc32: true, use_hmac: false, use_xtea: false, use_rdp: false, ..Config::default() };
    let a = node(1, config);
    let b = node(2, config);

    let (_ia, mut a_rx) = wire(&a, 2);
    let (ib, _b_rx_unused) = wire(&b, 1);
    let ib_for_counters = ib.clone();
    let (b2, ib2) = (b.clone(), ib);
    tokio::spawn(async move {
        while let Some(packet) = a_rx.recv().await {
            {
                let mut frame = packet.frame().await;
                if frame.len() > 2 {
                    frame[2] ^= 0x01;
                }
            }
            let _ = csp::router::receive(&b2, ib2.clone(), packet).await;
        }
    });
    csp::router::spawn(a.clone());
    csp::router::spawn(b.clone());

    let server = Socket::new(SocketFlags(SocketFlags::CONN_LESS.0 | SocketFlags::CRC_REQUIRED.0), 1);
    socket::bind(&b, &server, Some(5)).await.unwrap();
    socket::listen(&b, &server).await.unwrap();

    let packet = a.buffers.get().await.unwrap();
    packet.set_payload(&[0x01, 0x02, 0x03, 0x04]).await.unwrap();
    socket::sendto(&a, Priority::Normal, 2, 5, 9, packet).await.unwrap();

    let result = socket::recvfrom(&server, Some(Duration::from_millis(300))).await;
    assert_eq!(result.unwrap_err(), CspError::TimedOut);

    let snapshot = ib_for_counters.counters.snapshot();
    assert_eq!(snapshot.frame, 1);
    assert_eq!(snapshot.autherr, 0);
}

/// Scenario 3: four RDP data segments reordered on the wire arrive back
/// in order, with no duplicates.
#[tokio::test]
async fn scenario_3_rdp_ordered_delivery() {
    let a = node(1, Config::default());
    let b = node(2, Config::default());

    let (_ia, mut a_rx) = wire(&a, 2);
    let (ib, mut b_rx) = wire(&b, 1);
    let (b2, ib2) = (b.clone(), ib.clone());
    tokio::spawn(async move {
        let mut pending = Vec::new();
        while let Some(packet) = a_rx.recv().await {
            if !is_rdp_data_segment(&packet).await {
                let _ = csp::router::receive(&b2, ib2.clone(), packet).await;
                continue;
            }
            pending.push(packet);
            if pending.len() == 4 {
                let batch: Vec<Packet> = pending.drain(..).collect();
                for idx in [1, 0, 3, 2] {
                    let _ = csp::router::receive(&b2, ib2.clone(), batch[idx].share()).await;
                }
            }
        }
    });
    let (a2, ia2) = (a.clone(), _ia.clone());
    tokio::spawn(async move {
        while let Some(packet) = b_rx.recv().await {
            let _ = csp::router::receive(&a2, ia2.clone(), packet).await;
        }
    });
    csp::router::spawn(a.clone());
    csp::router::spawn(b.clone());

    let server = Socket::new(SocketFlags::RDP_REQUIRED, 1);
    socket::bind(&b, &server, Some(7)).await.unwrap();

    let client_conn = socket::connect(&a, Priority::Normal, 2, 7, true, Some(Duration::from_secs(2))).await.unwrap();
    let server_conn = socket::accept(&server, Some(Duration::from_secs(2))).await.unwrap();

    for payload in [&b"A"[..], b"B", b"C", b"D"] {
        let packet = a.buffers.get().await.unwrap();
        packet.set_payload(payload).await.unwrap();
        socket::send(&a, &client_conn, packet, Some(Duration::from_secs(2))).await.unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..4 {
        let packet = socket::read(&server_conn, Some(Duration::from_secs(2))).await.unwrap();
        received.push(packet.frame().await.to_vec());
    }
    assert_eq!(received, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec(), b"D".to_vec()]);
}

/// Scenario 4: dropping the first transmission of a payload yields
/// exactly one retransmission within the packet timeout, delivered once.
#[tokio::test]
async fn scenario_4_rdp_retransmission() {
    let a = node(1, Config::default());
    let b = node(2, Config::default());

    let (_ia, mut a_rx) = wire(&a, 2);
    let (ib, mut b_rx) = wire(&b, 1);
    let (b2, ib2) = (b.clone(), ib.clone());
    tokio::spawn(async move {
        let mut dropped_once = false;
        while let Some(packet) = a_rx.recv().await {
            if !dropped_once && is_rdp_data_segment(&packet).await {
                dropped_once = true;
                continue;
            }
            let _ = csp::router::receive(&b2, ib2.clone(), packet).await;
        }
    });
    let (a2, ia2) = (a.clone(), _ia.clone());
    tokio::spawn(async move {
        while let Some(packet) = b_rx.recv().await {
            let _ = csp::router::receive(&a2, ia2.clone(), packet).await;
        }
    });
    csp::router::spawn(a.clone());
    csp::router::spawn(b.clone());

    let server = Socket::new(SocketFlags::RDP_REQUIRED, 1);
    socket::bind(&b, &server, Some(8)).await.unwrap();

    let client_conn = socket::connect(&a, Priority::Normal, 2, 8, true, Some(Duration::from_secs(2))).await.unwrap();
    let server_conn = socket::accept(&server, Some(Duration::from_secs(2))).await.unwrap();

    let packet = a.buffers.get().await.unwrap();
    packet.set_payload(b"X").await.unwrap();
    socket::send(&a, &client_conn, packet, Some(Duration::from_secs(2))).await.unwrap();

    let received = socket::read(&server_conn, Some(Duration::from_secs(6))).await.unwrap();
    assert_eq!(&received.frame().await[..], b"X");

    let again = socket::read(&server_conn, Some(Duration::from_millis(200))).await;
    assert_eq!(again.unwrap_err(), CspError::TimedOut);
}

/// Scenario 5: longest-prefix routing match, the three lookups from
/// spec.md §8.
#[tokio::test]
async fn scenario_5_routing_longest_prefix() {
    // {8/5, 10/8, 0/0} from spec.md §8 scenario 5 don't fit this node's
    // V1 5-bit host field (10/8 has netmask > host_bits); these masks
    // keep the same longest-prefix relationships in range.
    let stack = node(1, Config::default());
    let a_iface = stack.interfaces.register(Interface::new("a", 8, 3, Box::new(NullDriver)).unwrap());
    let b_iface = stack.interfaces.register(Interface::new("b", 10, 5, Box::new(NullDriver)).unwrap());
    let c_iface = stack.interfaces.register(Interface::new("c", 0, 0, Box::new(NullDriver)).unwrap());

    stack.rtable.set(8, 3, stack.interfaces.index_of(&a_iface).unwrap(), None).unwrap();
    stack.rtable.set(10, 5, stack.interfaces.index_of(&b_iface).unwrap(), None).unwrap();
    stack.rtable.set(0, 0, stack.interfaces.index_of(&c_iface).unwrap(), None).unwrap();

    assert_eq!(stack.rtable.find(10).unwrap().iface_index, stack.interfaces.index_of(&b_iface).unwrap());
    assert_eq!(stack.rtable.find(11).unwrap().iface_index, stack.interfaces.index_of(&a_iface).unwrap());
    assert_eq!(stack.rtable.find(20).unwrap().iface_index, stack.interfaces.index_of(&c_iface).unwrap());
}

/// Scenario 6: a 1,500-byte blob fragmented over an RDP connection with
/// a 256-byte MTU reassembles byte-identical on the other side.
#[tokio::test]
async fn scenario_6_sfp_round_trip() {
    let a = node(1, Config::default());
    let b = node(2, Config::default());
    join(a.clone(), b.clone()).await;

    let server = Socket::new(SocketFlags::RDP_REQUIRED, 1);
    socket::bind(&b, &server, Some(9)).await.unwrap();

    let client_conn = socket::connect(&a, Priority::Normal, 2, 9, true, Some(Duration::from_secs(2))).await.unwrap();
    let server_conn = socket::accept(&server, Some(Duration::from_secs(2))).await.unwrap();

    let blob: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
    let mut fragments = Vec::new();
    csp::sfp::send(&a.buffers, &blob, 256, |p| {
        fragments.push(p);
        Ok(())
    })
    .await
    .unwrap();
    for fragment in fragments {
        socket::send(&a, &client_conn, fragment, Some(Duration::from_secs(2))).await.unwrap();
    }

    let mut reassembler = csp::sfp::Reassembler::new();
    let received = loop {
        let fragment = socket::read(&server_conn, Some(Duration::from_secs(2))).await.unwrap();
        if let Some(blob) = reassembler.recv_fragment(&fragment).await.unwrap() {
            break blob;
        }
    };
    assert_eq!(received, blob);
}
