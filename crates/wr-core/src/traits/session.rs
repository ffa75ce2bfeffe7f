//! Session token validation

use async_trait::async_trait;

use crate::error::MeshError;
use crate::model::{Newt, Olm};
use crate::types::UserId;

/// Validates agent and user session tokens.
///
/// Every method fails with [`MeshError::Unauthorized`] when the token is
/// unknown or was issued to a different principal.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate_olm(&self, token: &str, olm_id: &str) -> Result<Olm, MeshError>;

    async fn validate_newt(&self, token: &str, newt_id: &str) -> Result<Newt, MeshError>;

    async fn validate_user(&self, token: &str, user_id: &UserId) -> Result<(), MeshError>;
}
