//! API handlers module

pub mod cards;
pub mod check_in;
pub mod directory;
pub mod health;
pub mod reports;
pub mod scheduled_sessions;
pub mod sessions;

use attendance_common::{auth::AuthContext, errors::Result};
use uuid::Uuid;

/// Admin of `organization_id`, or a super admin
pub(crate) fn require_admin_of(auth: &AuthContext, organization_id: Uuid) -> Result<()> {
    auth.require_admin()?;
    auth.require_organization(organization_id)
}
