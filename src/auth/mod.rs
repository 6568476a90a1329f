//! Token validation. Issuance is an external collaborator's responsibility.

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod nonce;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::Claims;
pub use nonce::NonceStore;
