//! Upstream ACP side: NDJSON codec, JSON-RPC endpoint, ordered client
//! notification queue, and the ACP schema types.

pub mod codec;
pub mod endpoint;
pub mod notify;
pub mod schema;
