//! QR payload codec
//!
//! Payload layout (dot separated, ASCII only so it survives deep links):
//!
//! ```text
//! AMS1.s.<org>.<session>.<sig>              concrete session
//! AMS1.t.<org>.<template>.<yyyymmdd>.<sig>  template on one day
//! ```
//!
//! Ids use the 32-digit simple UUID form. `sig` is the first 16 hex digits
//! of SHA-256 over the secret followed by everything before the last dot.
//! A template code names its day, so yesterday's printout is rejected.

use attendance_common::errors::{AppError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const VERSION_TAG: &str = "AMS1";
const SIGNATURE_LEN: usize = 16;
const DATE_FORMAT: &str = "%Y%m%d";

/// Scheme used when the payload is embedded in a link
pub const DEEP_LINK_PREFIX: &str = "ams://checkin?qr=";

/// What a QR code points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QrTarget {
    Session { session_id: Uuid },
    Scheduled { scheduled_session_id: Uuid, date: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedQr {
    pub organization_id: Uuid,
    pub target: QrTarget,
}

#[derive(Clone)]
pub struct QrCodec {
    secret: String,
}

impl QrCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn sign(&self, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(body.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(SIGNATURE_LEN);
        digest
    }

    pub fn encode(&self, organization_id: Uuid, target: QrTarget) -> String {
        let body = match target {
            QrTarget::Session { session_id } => format!(
                "{}.s.{}.{}",
                VERSION_TAG,
                organization_id.simple(),
                session_id.simple()
            ),
            QrTarget::Scheduled { scheduled_session_id, date } => format!(
                "{}.t.{}.{}.{}",
                VERSION_TAG,
                organization_id.simple(),
                scheduled_session_id.simple(),
                date.format(DATE_FORMAT)
            ),
        };
        let signature = self.sign(&body);
        format!("{}.{}", body, signature)
    }

    /// Verify and parse a payload or deep link.
    ///
    /// `today` is the organization's current date; template codes for any
    /// other day fail with `QrCodeExpired`.
    pub fn decode(&self, payload: &str, today: NaiveDate) -> Result<DecodedQr> {
        let payload = payload.trim();
        let payload = payload.strip_prefix(DEEP_LINK_PREFIX).unwrap_or(payload);

        let (body, signature) = payload.rsplit_once('.').ok_or(AppError::InvalidQrCode)?;
        if !constant_time_eq(self.sign(body).as_bytes(), signature.to_ascii_lowercase().as_bytes()) {
            return Err(AppError::InvalidQrCode);
        }

        let parts: Vec<&str> = body.split('.').collect();
        let decoded = match parts.as_slice() {
            [VERSION_TAG, "s", org, session] => DecodedQr {
                organization_id: parse_id(org)?,
                target: QrTarget::Session { session_id: parse_id(session)? },
            },
            [VERSION_TAG, "t", org, template, date] => {
                let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
                    .map_err(|_| AppError::InvalidQrCode)?;
                if date != today {
                    return Err(AppError::QrCodeExpired);
                }
                DecodedQr {
                    organization_id: parse_id(org)?,
                    target: QrTarget::Scheduled {
                        scheduled_session_id: parse_id(template)?,
                        date,
                    },
                }
            }
            _ => return Err(AppError::InvalidQrCode),
        };
        Ok(decoded)
    }

    /// Payload wrapped as an app link
    pub fn deep_link(payload: &str) -> String {
        format!("{}{}", DEEP_LINK_PREFIX, payload)
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::try_parse(raw).map_err(|_| AppError::InvalidQrCode)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
