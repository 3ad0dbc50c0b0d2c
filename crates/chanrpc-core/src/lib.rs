//! chanrpc core - JSON-RPC 2.0 correlation and buffer channeling.
//!
//! This crate turns a bare message transport, possibly one that caps frames
//! at around a kilobyte, into a request/response protocol, and moves byte
//! buffers of any size across it in bounded, individually retried slices.
//!
//! - [`RpcNode`]: assigns ids, tracks pending calls, matches responses and
//!   expires calls that never get one
//! - [`Channeler`]: announces buffers and lets the peer pull them back
//! - [`transport`]: the outbound [`FrameSink`] hook plus in-memory and TCP
//!   links
//!
//! # Example
//!
//! ```rust,ignore
//! use chanrpc_core::{Channeler, MemoryLink};
//!
//! #[tokio::main]
//! async fn main() -> chanrpc_core::Result<()> {
//!     let (left, right) = MemoryLink::pair();
//!
//!     let sender = Channeler::builder(left.sink()).name("sender").build()?;
//!     let receiver = Channeler::builder(right.sink())
//!         .name("receiver")
//!         .on_data(|data| println!("got {} bytes", data.len()))
//!         .build()?;
//!     left.attach(sender.clone());
//!     right.attach(receiver);
//!
//!     sender.channel_data(vec![0u8; 10_000]).await?;
//!     Ok(())
//! }
//! ```

pub mod channeler;
pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod retry;
pub mod transport;

pub use channeler::{BufferSource, Channeler, ChannelerBuilder, SeekableSource};
pub use config::{ChannelerConfig, NodeConfig, ProtocolConfig, TcpConfig};
pub use error::{ChannelError, ProtocolError, Result, TransportError};
pub use message::{InvalidMessage, Message, MessageId, MessageKind, RpcError};
pub use node::{CallOutcome, RequestHandler, RequestOptions, ResponseHandler, RpcNode};
pub use retry::{RetryConfig, RetryStats};
pub use transport::{FrameReceiver, FrameSink, MemoryEndpoint, MemoryLink, TcpLink};
