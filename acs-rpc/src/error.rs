//! JSON-RPC error codes.

/// Standard JSON-RPC error: invalid JSON
pub const PARSE_ERROR: i32 = -32700;
/// Standard JSON-RPC error: not a valid request object
pub const INVALID_REQUEST: i32 = -32600;
/// Standard JSON-RPC error: method does not exist
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Standard JSON-RPC error: invalid method parameters
pub const INVALID_PARAMS: i32 = -32602;
/// Standard JSON-RPC error: internal error
pub const INTERNAL_ERROR: i32 = -32603;

// Application error codes (-32000 to -32099); values are part of the
// wire contract with existing clients.

/// Generic server-side failure, surfaced with the native message.
pub const GENERIC: i32 = -32000;
/// The room is owned by another client (data carries `ownerClientId`).
pub const OWNERSHIP_CONFLICT: i32 = -32001;
/// Pending approval not found (unknown or already-resolved request id).
pub const PENDING_NOT_FOUND: i32 = -32004;
