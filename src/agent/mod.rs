//! Downstream agent side: subprocess transport, spawn options, and the
//! NDJSON wire vocabulary spoken by the child.

pub mod options;
pub mod transport;
pub mod wire;
