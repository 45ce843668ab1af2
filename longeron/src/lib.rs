//! # Longeron
//!
//! A callback-driven asynchronous IP networking library unifying TCP
//! acceptors, TCP connectors, and UDP (unicast and multicast)
//! endpoints behind one application-facing abstraction.
//!
//! ## Architecture
//!
//! Longeron is structured in clean layers:
//!
//! - **`longeron-core`**: sans-IO state machines (entity and handler
//!   lifecycles, output queue), utilities (wait queue, backoff,
//!   periodic timer), socket helpers
//! - **`longeron`**: entities, I/O handlers, and weak handles (this
//!   crate)
//!
//! No wire protocol is defined. Message framing, dispatch, and
//! lifecycle are configured by the application through callbacks: a
//! state change callback invoked when connections open and close, an
//! error callback for transient and terminal errors, and per
//! connection a message framer and message handler installed from
//! inside the state change callback.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use longeron::hub::NetHub;
//! use longeron::AcceptorConfig;
//!
//! #[compio::main]
//! async fn main() -> longeron::Result<()> {
//!     let hub = NetHub::new();
//!     let acceptor = hub.make_tcp_acceptor(
//!         AcceptorConfig::new("127.0.0.1:5555".parse().unwrap()),
//!     );
//!
//!     acceptor.start(
//!         |io, _total, opened| {
//!             if opened {
//!                 // 2-byte big-endian length prefix framing, echo back
//!                 let _ = io.start_io(
//!                     2,
//!                     |hdr| {
//!                         if hdr.len() < 2 {
//!                             return 2 - hdr.len();
//!                         }
//!                         let body = u16::from_be_bytes([hdr[0], hdr[1]]) as usize;
//!                         let want = 2 + body;
//!                         want.saturating_sub(hdr.len())
//!                     },
//!                     |msg, out, _from| {
//!                         let _ = out.send(msg);
//!                         true
//!                     },
//!                 );
//!             }
//!         },
//!         |_io, err| eprintln!("acceptor error: {err}"),
//!     )?;
//!
//!     // ... run until done, then:
//!     acceptor.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Ownership model
//!
//! The [`hub::NetHub`] owns entities; entities own their I/O
//! handlers; handlers reference their entity only through an event
//! channel. Applications hold weak handles ([`entity::NetEntity`],
//! [`interface::IoInterface`], [`interface::IoOutput`]) that never
//! extend lifetimes; operations on an expired handle fail with
//! [`LongeronError::WeakReferenceExpired`].
//!
//! ## Concurrency
//!
//! Entities run on the compio runtime of the thread that started
//! them; one runtime is sufficient, several (one per thread) are
//! supported. Handles and callbacks are `Send`: sends and stops may
//! be issued from any thread and are executed by the owning runtime's
//! pump tasks. Per handler, writes hit the socket in `send` order and
//! the message handler is never invoked concurrently with itself.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod acceptor;
mod common;
pub mod connector;
pub mod dev_tracing;
pub mod entity;
pub mod hub;
pub mod interface;
pub mod tcp_io;
pub mod udp;
pub mod udp_io;

// Re-export core types
pub use bytes::Bytes;
pub use longeron_core::backoff::Backoff;
pub use longeron_core::config::{AcceptorConfig, ConnectorConfig, UdpConfig};
pub use longeron_core::error::{LongeronError, Result};
pub use longeron_core::output_queue::OutQueueStats;
pub use longeron_core::sockopt::resolve_endpoints;
pub use longeron_core::timer::PeriodicTimer;
pub use longeron_core::wait_queue::WaitQueue;

pub use entity::{TcpAcceptorEntity, TcpConnectorEntity, UdpNetEntity};
pub use interface::{TcpIoInterface, TcpIoOutput, UdpIoInterface, UdpIoOutput};
