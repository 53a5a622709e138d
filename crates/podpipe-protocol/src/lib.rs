//! Port-forward stream vocabulary
//!
//! A port-forward session carries many logical connections. Each one is a
//! pair of sub-streams (an error channel and a data channel) that the remote
//! end correlates through the headers defined here.

mod headers;
mod types;

pub use headers::{portforward_path, HeaderError, StreamHeaders, PORTFORWARD_PROTOCOL};
pub use types::{RequestId, StreamType};
