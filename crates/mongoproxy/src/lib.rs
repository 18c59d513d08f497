//! mongoproxy - transparent wire-protocol proxy with insert listeners
//!
//! Sits between a client driver and a database server, relays every frame
//! unchanged and calls registered listeners with the documents of insert
//! commands that pass through.
//!
//! ```no_run
//! use mongoproxy::ProxyServer;
//!
//! # async fn example() -> mongoproxy::Result<()> {
//! let proxy = ProxyServer::with_default_upstream(27018);
//! proxy.add_listener("app", "users", |doc| println!("new user: {}", doc));
//! proxy.run().await
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod registry;
pub mod relay;
pub mod server;

pub use mongoproxy_common::{Config, Error, Result};
pub use mongoproxy_protocol::{Document, Element, Value};
pub use registry::{DispatchReport, InsertHandler, ListenerKey, ListenerRegistry};
pub use relay::{ConnectionRelay, Interception, RelaySettings, RelayState, SkipReason};
pub use server::ProxyServer;
