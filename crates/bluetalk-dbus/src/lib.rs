//! Minimal D-Bus system-bus client, just enough for the BlueZ GATT object
//! model: little-endian binary framing, EXTERNAL authentication, serial-
//! indexed method calls, and signal fan-out.
//!
//! The codec deliberately covers only the signatures BlueZ uses on the
//! paths we touch; unknown content is skipped, never fatal.

mod auth;
mod conn;
mod decode;
mod error;
mod types;
mod wire;

pub use conn::Connection;
pub use decode::{
    decode_body_string, decode_body_variant, decode_interfaces_added, decode_managed_objects,
    decode_prop_map, decode_properties_changed, decode_variant_value, WireReader,
};
pub use error::{DbusError, WireError};
pub use types::{InterfaceMap, ObjectPath, PropMap, Signal, SignalBody, Value};
pub use wire::{build_method_call, read_message, Arg, CallBody, RawMessage};
