//! NFC credential registry
//!
//! Resolves card taps to subscribers and keeps the card/subscriber mapping
//! one-to-one in both directions. The uniqueness checks and the update run
//! as one store operation.

use attendance_common::clock::Clock;
use attendance_common::db::models::{normalize_uid, NfcCard};
use attendance_common::db::{AttendanceStore, CardStatistics};
use attendance_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct CardRegistry {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

fn canonical(card_uid: &str) -> Result<String> {
    let uid = normalize_uid(card_uid);
    if uid.is_empty() {
        return Err(AppError::InvalidFormat {
            message: "Card UID must not be empty".to_string(),
        });
    }
    Ok(uid)
}

impl CardRegistry {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Subscriber bound to a tapped card
    pub async fn resolve(&self, card_uid: &str) -> Result<Uuid> {
        let card = self.get(card_uid).await?;
        if !card.is_active {
            return Err(AppError::CardInactive { card_uid: card.card_uid });
        }
        card.subscriber_id
            .ok_or(AppError::CardUnassigned { card_uid: card.card_uid })
    }

    pub async fn get(&self, card_uid: &str) -> Result<NfcCard> {
        let uid = canonical(card_uid)?;
        self.store
            .find_card(&uid)
            .await?
            .ok_or(AppError::CardNotFound { card_uid: uid })
    }

    /// Add a blank card to an organization's inventory
    #[instrument(skip(self))]
    pub async fn register(&self, organization_id: Uuid, card_uid: &str) -> Result<NfcCard> {
        let uid = canonical(card_uid)?;
        if self.store.find_organization(organization_id).await?.is_none() {
            return Err(AppError::OrganizationNotFound { id: organization_id.to_string() });
        }

        let now = self.clock.now();
        let card = self
            .store
            .insert_card(NfcCard {
                id: Uuid::new_v4(),
                card_uid: uid,
                organization_id,
                subscriber_id: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!(card_uid = %card.card_uid, "Registered card");
        Ok(card)
    }

    #[instrument(skip(self))]
    pub async fn assign(&self, card_uid: &str, subscriber_id: Uuid) -> Result<NfcCard> {
        let card = self.get(card_uid).await?;
        let subscriber = self
            .store
            .find_subscriber(subscriber_id)
            .await?
            .ok_or_else(|| AppError::SubscriberNotFound { id: subscriber_id.to_string() })?;
        if subscriber.organization_id != card.organization_id {
            return Err(AppError::OrganizationMismatch);
        }

        let card = self
            .store
            .assign_card(&card.card_uid, subscriber_id, self.clock.now())
            .await?;
        info!(card_uid = %card.card_uid, %subscriber_id, "Assigned card");
        Ok(card)
    }

    /// Idempotent
    pub async fn unassign(&self, card_uid: &str) -> Result<NfcCard> {
        let uid = canonical(card_uid)?;
        self.store.unassign_card(&uid, self.clock.now()).await
    }

    pub async fn set_active(&self, card_uid: &str, active: bool) -> Result<NfcCard> {
        let uid = canonical(card_uid)?;
        self.store.set_card_active(&uid, active, self.clock.now()).await
    }

    pub async fn list(&self, organization_id: Uuid, unassigned_only: bool) -> Result<Vec<NfcCard>> {
        self.store.list_cards(organization_id, unassigned_only).await
    }

    pub async fn delete(&self, card_uid: &str) -> Result<()> {
        let uid = canonical(card_uid)?;
        if self.store.delete_card(&uid).await? {
            Ok(())
        } else {
            Err(AppError::CardNotFound { card_uid: uid })
        }
    }

    /// Wipe an organization's inventory
    #[instrument(skip(self))]
    pub async fn delete_all(&self, organization_id: Uuid) -> Result<u64> {
        let deleted = self.store.delete_cards(organization_id).await?;
        info!(deleted, "Deleted organization cards");
        Ok(deleted)
    }

    pub async fn statistics(&self, organization_id: Uuid) -> Result<CardStatistics> {
        let cards = self.store.list_cards(organization_id, false).await?;
        Ok(CardStatistics::from_cards(&cards))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_common::clock::SystemClock;
    use attendance_common::db::models::{Organization, Subscriber};
    use attendance_common::db::MemoryStore;
    use chrono::Utc;
    use tokio_test::assert_err;

    struct Fixture {
        registry: CardRegistry,
        store: Arc<dyn AttendanceStore>,
        org: Uuid,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn AttendanceStore> = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        store
            .insert_organization(Organization {
                id: org,
                name: "Acme".into(),
                entity_id: "ACME".into(),
                created_at: Utc::now().fixed_offset(),
            })
            .await
            .unwrap();
        Fixture {
            registry: CardRegistry::new(store.clone(), Arc::new(SystemClock)),
            store,
            org,
        }
    }

    async fn subscriber(store: &Arc<dyn AttendanceStore>, org: Uuid) -> Uuid {
        let s = store
            .insert_subscriber(Subscriber {
                id: Uuid::new_v4(),
                organization_id: org,
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: None,
                created_at: Utc::now().fixed_offset(),
            })
            .await
            .unwrap();
        s.id
    }

    #[tokio::test]
    async fn test_resolve_states() {
        let f = fixture().await;
        let err = assert_err!(f.registry.resolve("DEADBEEF").await);
        assert!(matches!(err, AppError::CardNotFound { .. }));

        f.registry.register(f.org, "de:ad:be:ef").await.unwrap();
        let err = assert_err!(f.registry.resolve("DEADBEEF").await);
        assert!(matches!(err, AppError::CardUnassigned { .. }));

        let sub = subscriber(&f.store, f.org).await;
        f.registry.assign("deadbeef", sub).await.unwrap();
        assert_eq!(f.registry.resolve("DE-AD-BE-EF").await.unwrap(), sub);

        f.registry.set_active("DEADBEEF", false).await.unwrap();
        let err = assert_err!(f.registry.resolve("DEADBEEF").await);
        assert!(matches!(err, AppError::CardInactive { .. }));
    }

    #[tokio::test]
    async fn test_card_uniqueness() {
        let f = fixture().await;
        let (sub1, sub2) = (subscriber(&f.store, f.org).await, subscriber(&f.store, f.org).await);
        f.registry.register(f.org, "A1").await.unwrap();
        f.registry.register(f.org, "B2").await.unwrap();

        f.registry.assign("A1", sub1).await.unwrap();
        let err = assert_err!(f.registry.assign("A1", sub2).await);
        assert!(matches!(err, AppError::CardAlreadyAssigned { .. }));
        let err = assert_err!(f.registry.assign("B2", sub1).await);
        assert!(matches!(err, AppError::SubscriberAlreadyHasCard { .. }));

        // freeing the card lets it move
        f.registry.unassign("A1").await.unwrap();
        f.registry.unassign("A1").await.unwrap();
        f.registry.assign("A1", sub2).await.unwrap();
        f.registry.assign("B2", sub1).await.unwrap();
    }

    #[tokio::test]
    async fn test_inactive_spare_not_assignable_to_card_holder() {
        let f = fixture().await;
        let sub = subscriber(&f.store, f.org).await;
        f.registry.register(f.org, "A1").await.unwrap();
        f.registry.register(f.org, "B2").await.unwrap();
        f.registry.assign("A1", sub).await.unwrap();
        f.registry.set_active("B2", false).await.unwrap();

        let err = assert_err!(f.registry.assign("B2", sub).await);
        assert!(matches!(err, AppError::SubscriberAlreadyHasCard { .. }));

        let held = f
            .registry
            .list(f.org, false)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.subscriber_id == Some(sub))
            .count();
        assert_eq!(held, 1);

        // once the first card is retired the spare can be handed out
        f.registry.set_active("A1", false).await.unwrap();
        f.registry.assign("B2", sub).await.unwrap();
    }

    #[tokio::test]
    async fn test_cross_organization_assignment_rejected() {
        let f = fixture().await;
        let foreign = subscriber(&f.store, Uuid::new_v4()).await;
        f.registry.register(f.org, "C3").await.unwrap();
        let err = assert_err!(f.registry.assign("C3", foreign).await);
        assert!(matches!(err, AppError::OrganizationMismatch));
    }

    #[tokio::test]
    async fn test_inventory_maintenance() {
        let f = fixture().await;
        let sub = subscriber(&f.store, f.org).await;
        for uid in ["01", "02", "03"] {
            f.registry.register(f.org, uid).await.unwrap();
        }
        f.registry.assign("01", sub).await.unwrap();
        f.registry.set_active("03", false).await.unwrap();

        let stats = f.registry.statistics(f.org).await.unwrap();
        assert_eq!((stats.total, stats.assigned, stats.inactive), (3, 1, 1));
        assert_eq!(f.registry.list(f.org, true).await.unwrap().len(), 2);

        let err = assert_err!(f.registry.register(f.org, "01").await);
        assert!(matches!(err, AppError::CardAlreadyRegistered { .. }));

        f.registry.delete("02").await.unwrap();
        assert!(matches!(f.registry.delete("02").await, Err(AppError::CardNotFound { .. })));
        assert_eq!(f.registry.delete_all(f.org).await.unwrap(), 2);

        assert!(matches!(
            f.registry.register(f.org, "::").await,
            Err(AppError::InvalidFormat { .. })
        ));
    }
}
