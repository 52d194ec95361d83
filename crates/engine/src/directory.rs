//! Organizations and their rosters
//!
//! Minimal provisioning so a deployment can be populated; membership is
//! otherwise managed outside the engine.

use attendance_common::clock::Clock;
use attendance_common::db::models::{Organization, Subscriber};
use attendance_common::db::AttendanceStore;
use attendance_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOrganization {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    /// Public short code
    #[validate(length(min = 2, max = 32))]
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSubscriber {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,

    #[validate(length(max = 100))]
    pub last_name: String,

    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

impl Directory {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_organization(&self, request: NewOrganization) -> Result<Organization> {
        request.validate()?;
        self.store
            .insert_organization(Organization {
                id: Uuid::new_v4(),
                name: request.name,
                entity_id: request.entity_id.to_uppercase(),
                created_at: self.clock.now(),
            })
            .await
    }

    pub async fn organization(&self, id: Uuid) -> Result<Organization> {
        self.store
            .find_organization(id)
            .await?
            .ok_or_else(|| AppError::OrganizationNotFound { id: id.to_string() })
    }

    pub async fn add_subscriber(&self, organization_id: Uuid, request: NewSubscriber) -> Result<Subscriber> {
        request.validate()?;
        self.organization(organization_id).await?;
        self.store
            .insert_subscriber(Subscriber {
                id: Uuid::new_v4(),
                organization_id,
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                created_at: self.clock.now(),
            })
            .await
    }

    pub async fn subscriber(&self, id: Uuid) -> Result<Subscriber> {
        self.store
            .find_subscriber(id)
            .await?
            .ok_or_else(|| AppError::SubscriberNotFound { id: id.to_string() })
    }

    pub async fn roster(&self, organization_id: Uuid) -> Result<Vec<Subscriber>> {
        self.store.list_subscribers(organization_id).await
    }
}
