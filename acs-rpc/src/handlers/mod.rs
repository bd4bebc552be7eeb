//! RPC method handlers.
//!
//! Each sub-module covers one group of JSON-RPC methods: param types,
//! response shapes, and a thin handler that calls into the server.

pub mod approval;
pub mod initialize;
pub mod room;
pub mod settings;
pub mod skills;
pub mod thread;
pub mod turn;
pub mod workspace;

use serde_json::value::RawValue;

use crate::error;
use crate::protocol::{RpcId, RpcResponse};

/// Parse typed params from a `RawValue`, returning an error response on
/// failure.
#[allow(clippy::result_large_err)]
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<&RawValue>,
) -> Result<T, RpcResponse> {
    let raw = params
        .ok_or_else(|| RpcResponse::error(None, error::INVALID_PARAMS, "missing params"))?;
    serde_json::from_str(raw.get()).map_err(|e| {
        RpcResponse::error(None, error::INVALID_PARAMS, format!("invalid params: {e}"))
    })
}

/// Variant for methods whose params are entirely optional.
#[allow(clippy::result_large_err)]
pub(crate) fn parse_params_or_default<T>(params: Option<&RawValue>) -> Result<T, RpcResponse>
where
    T: serde::de::DeserializeOwned + Default,
{
    match params {
        None => Ok(T::default()),
        Some(_) => parse_params(params),
    }
}

/// Extension trait to set the id on an `RpcResponse` built before the
/// id was at hand.
pub(crate) trait RpcResponseExt {
    fn with_id(self, id: Option<RpcId>) -> Self;
}

impl RpcResponseExt for RpcResponse {
    fn with_id(mut self, id: Option<RpcId>) -> Self {
        self.id = id;
        self
    }
}
