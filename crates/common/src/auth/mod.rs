//! Authentication and authorization utilities
//!
//! Provides:
//! - JWT token generation and validation
//! - Caller identity extraction (`AuthContext`)
//! - Organization scoping checks

use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Caller role carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Member checking in for themselves
    Subscriber,
    /// Administrator of one organization (also used by reader devices)
    EntityAdmin,
    /// Platform operator, not bound to one organization
    SuperAdmin,
}

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Subscriber or admin id from `sub`
    pub subject_id: Uuid,

    /// Organization the caller belongs to
    pub organization_id: Uuid,

    pub role: Role,

    /// Request ID for tracing
    pub request_id: String,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::EntityAdmin | Role::SuperAdmin)
    }

    /// Require an admin role, returning error if not present
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: "Administrator role required".to_string(),
            })
        }
    }

    /// Reject access to another organization's data
    pub fn require_organization(&self, organization_id: Uuid) -> Result<()> {
        if self.role == Role::SuperAdmin || self.organization_id == organization_id {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: "Access denied to this organization".to_string(),
            })
        }
    }

    /// Subscriber id of a self-service caller
    pub fn subscriber_id(&self) -> Result<Uuid> {
        match self.role {
            Role::Subscriber => Ok(self.subject_id),
            _ => Err(AppError::Forbidden {
                message: "Only subscribers can check in for themselves".to_string(),
            }),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (subscriber or admin ID)
    pub sub: String,

    pub organization_id: String,

    pub role: Role,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, subject_id: Uuid, organization_id: Uuid, role: Role) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: subject_id.to_string(),
            organization_id: organization_id.to_string(),
            role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }
}

/// Extract the token from an Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        // Extract request ID
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let claims = jwt.validate_token(token)?;

        let subject_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;
        let organization_id =
            Uuid::parse_str(&claims.organization_id).map_err(|_| AppError::InvalidToken)?;

        Ok(AuthContext {
            subject_id,
            organization_id,
            role: claims.role,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            subject_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            role,
            request_id: "test".to_string(),
        }
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", 3600);

        let subject = Uuid::new_v4();
        let organization = Uuid::new_v4();

        let token = manager.generate_token(subject, organization, Role::EntityAdmin).unwrap();
        let claims = manager.validate_token(&token).unwrap();

        assert_eq!(claims.sub, subject.to_string());
        assert_eq!(claims.organization_id, organization.to_string());
        assert_eq!(claims.role, Role::EntityAdmin);
    }

    #[test]
    fn test_wrong_secret_is_invalid_token() {
        let token = JwtManager::new("a", 3600)
            .generate_token(Uuid::new_v4(), Uuid::new_v4(), Role::Subscriber)
            .unwrap();
        let err = JwtManager::new("b", 3600).validate_token(&token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[test]
    fn test_organization_scoping() {
        let admin = context(Role::EntityAdmin);
        assert!(admin.require_organization(admin.organization_id).is_ok());
        assert!(admin.require_organization(Uuid::new_v4()).is_err());

        let root = context(Role::SuperAdmin);
        assert!(root.require_organization(Uuid::new_v4()).is_ok());

        let member = context(Role::Subscriber);
        assert!(member.require_admin().is_err());
        assert_eq!(member.subscriber_id().unwrap(), member.subject_id);
        assert!(admin.subscriber_id().is_err());
    }
}
