//! mbscan - device discovery on RS-485 buses behind a Modbus/TCP gateway
//!
//! The library connects to the gateway as a Modbus/TCP client, walks the
//! configured unit address range (priority addresses first) and runs a fixed
//! matrix of read probes against each address. Addresses answering at least
//! one probe are reported as devices together with the read functions they
//! support and a few sampled values.
//!
//! The binary in `main.rs` wires the scanner to a console front-end; the
//! protocol framing helpers and the CLI/boot plumbing are kept out of the
//! generated documentation.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
#[doc(hidden)]
pub mod protocol;

pub use api::*;
