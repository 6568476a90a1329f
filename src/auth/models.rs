//! Authentication models.
//!
//! Token issuance happens outside this service; this module only defines
//! the claims shape a validated token carries.

use serde::{Deserialize, Serialize};

/// JWT claims payload.
///
/// `nonce` is single-use: the WebSocket upgrade path records it in the
/// nonce store on first use so the same upgrade token cannot be replayed to
/// open a second connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
}
