//! CSP: the Cubesat Space Protocol.
//!
//! A small network-layer protocol stack for point-to-point spacecraft
//! subsystem links (CAN, serial/KISS, I²C, Ethernet, UDP tunnel). It
//! provides IP-like addressing, connection-oriented and connectionless
//! transport, fragmentation, optional integrity/confidentiality, and
//! multi-interface routing over a fixed-size resource budget — no
//! allocation beyond the pools sized at [`Stack`](stack::Stack)
//! construction.
//!
//! # Getting started
//!
//! Build a [`Stack`](stack::Stack), register at least a loopback
//! interface, spawn the router task, then talk over sockets:
//!
//! ```rust
//! use csp::clock::Capabilities;
//! use csp::config::Config;
//! use csp::id::Priority;
//! use csp::socket::{self, Socket, SocketFlags};
//! use csp::stack::Stack;
//!
//! # async fn run() -> csp::error::Result<()> {
//! let stack = Stack::new(Config::default(), 1, Capabilities::default());
//! csp::router::install_loopback(&stack);
//! csp::router::spawn(stack.clone());
//!
//! let server = Socket::new(SocketFlags::CONN_LESS, 1);
//! socket::bind(&stack, &server, Some(10)).await?;
//! socket::listen(&stack, &server).await?;
//!
//! let conn = socket::connect(&stack, Priority::Normal, 1, 10, false, None).await?;
//! let packet = stack.buffers.get().await?;
//! packet.set_payload(b"abc").await?;
//! socket::send(&stack, &conn, packet, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module map
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`buffer`] | fixed-count, fixed-size packet cell pool |
//! | [`id`] | v1/v2 wire identifier codec |
//! | [`rtable`] | CIDR routing table, longest-prefix match |
//! | [`iface`] | interface registry and counters |
//! | [`fifo`] | priority QoS input queue |
//! | [`dedup`] | router-ingress replay guard |
//! | [`router`] | dequeue/forward/deliver loop |
//! | [`conn`] | fixed connection-record pool |
//! | [`socket`] | bind/listen/accept/connect/send/read/close |
//! | [`rdp`] | sliding-window reliable transport |
//! | [`sfp`] | blob fragmentation atop a connection |
//! | [`crypto`] | CRC32, HMAC-SHA1, XTEA |
//! | [`service`] | built-in PING/PS/MEMFREE/... responders |
//! | [`bridge`] | two-interface forwarder |
//! | [`stack`] | the process-wide context tying it together |

pub mod bridge;
pub mod buffer;
pub mod clock;
pub mod codec;
pub mod config;
pub mod conn;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod fifo;
pub mod iface;
pub mod id;
pub mod rdp;
pub mod router;
pub mod rtable;
pub mod service;
pub mod sfp;
pub mod socket;
pub mod stack;

pub use config::Config;
pub use error::{CspError, Result};
pub use id::{Flags, Identifier, IdVersion, Priority};
pub use stack::Stack;
