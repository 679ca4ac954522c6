//! Gateway from an XBee sensor mesh to a Modbus TCP register space.
//!
//! Radios send Cayenne LPP payloads to a coordinator on a serial port. The
//! gateway decodes each payload and writes the values as IEEE-754 floats into
//! the block of registers assigned to the sending radio, where any Modbus TCP
//! master can read them.
//!
//! ```text
//! serial ─▶ radio::RadioBridge ─▶ (channel) ─▶ pipeline::Pipeline ─▶ registers::RegisterStore ◀─ server
//!                                                    │
//!                                                    ▼
//!                                          registry::DeviceRegistry
//! ```
//!
//! # Register Layout
//!
//! Each radio owns `block_size` registers starting at its configured start
//! address. Value `n` of a payload lands in registers `start + 2n` and
//! `start + 2n + 1`, low word first. Holding and input banks carry the same
//! data.

pub mod codec;
pub mod commands;
pub mod config;
pub mod decoder;
pub mod pipeline;
pub mod radio;
pub mod registers;
pub mod registry;
pub mod server;
pub mod state;
