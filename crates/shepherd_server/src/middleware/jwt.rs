//! Bearer-token verification.
//!
//! Tokens are issued elsewhere; this layer only checks the HS256 signature
//! and expiry, then places the resulting `Principal` in the request
//! extensions for handlers to extract.

use axum::{
    extract::Request,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use shepherd_core::principal::{JwtClaims, Principal};
use shepherd_core::ShepherdError;

use crate::error::AppError;

#[derive(Clone)]
pub struct JwtConfig {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, ShepherdError> {
        let data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ShepherdError::Unauthorized(format!("invalid token: {e}")))?;
        Principal::from_jwt_claims(&data.claims)
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn jwt_auth(
    Extension(config): Extension<JwtConfig>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .ok_or_else(|| ShepherdError::Unauthorized("missing bearer token".into()))?;
    let principal = config.verify(token)?;
    tracing::debug!(
        user_id = %principal.user_id,
        tenant_id = %principal.tenant_id,
        role = %principal.role,
        "authenticated"
    );
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
