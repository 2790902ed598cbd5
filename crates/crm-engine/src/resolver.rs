//! Trigger resolution
//!
//! Maps a rule's trigger onto the customer store query that produces its
//! candidate customers.

use chrono::{DateTime, Utc};
use crm_automation::Trigger;
use crm_core::Customer;
use crm_store::{SharedCustomerStore, StoreResult};
use tracing::debug;

use crate::ScheduleZone;

/// Produces candidate customers for a trigger
#[derive(Clone)]
pub struct TriggerResolver {
    store: SharedCustomerStore,
    zone: ScheduleZone,
}

impl TriggerResolver {
    /// Create a new resolver
    pub fn new(store: SharedCustomerStore, zone: ScheduleZone) -> Self {
        Self { store, zone }
    }

    /// Resolve the candidate set at `now`
    ///
    /// Only active customers are returned, each at most once.
    pub async fn resolve(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        let mut customers = match trigger {
            Trigger::NewCustomer { hours } => self.store.find_created_within(*hours, now).await?,
            Trigger::FirstOrder { hours } => self.store.find_first_order(*hours, now).await?,
            Trigger::AbandonedCart { hours } => self.store.find_abandoned_cart(*hours, now).await?,
            Trigger::NoPurchase { days } => self.store.find_no_purchase(*days, now).await?,
            Trigger::Birthday => self.store.find_birthday(self.zone.today(now)).await?,
            Trigger::OrderStatusChange {
                status,
                within_hours,
            } => {
                self.store
                    .find_order_status_change(status, *within_hours, now)
                    .await?
            }
        };

        let mut seen = std::collections::HashSet::new();
        customers.retain(|c| c.is_active && seen.insert(c.id.clone()));

        debug!(trigger = %trigger, candidates = customers.len(), "Resolved trigger");
        Ok(customers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use crm_core::Order;
    use crm_store::InMemoryCustomerStore;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_birthday_uses_zone_date() {
        let store = InMemoryCustomerStore::new();
        store.insert_customer(
            Customer::new("b", now() - Duration::days(900))
                .with_birthday(NaiveDate::from_ymd_opt(1990, 9, 11).unwrap()),
        );
        let store = Arc::new(store);

        let utc = ScheduleZone::from_offset_minutes(0).unwrap();
        let utc = TriggerResolver::new(store.clone(), utc);
        assert!(utc.resolve(&Trigger::Birthday, now()).await.unwrap().is_empty());

        // 12:00 UTC is already the 11th at +14:00
        let east = TriggerResolver::new(store, ScheduleZone::from_offset_minutes(14 * 60).unwrap());
        assert_eq!(east.resolve(&Trigger::Birthday, now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_status_change() {
        let store = InMemoryCustomerStore::new();
        store.insert_customer(Customer::new("c", now() - Duration::days(5)));
        store.insert_order(Order::new("o", "c", "completed", 10.0, now() - Duration::minutes(30)));
        let resolver = TriggerResolver::new(Arc::new(store), ScheduleZone::Local);

        let trigger: Trigger =
            serde_json::from_str(r#"{"trigger_type": "order_status_change"}"#).unwrap();
        let found = resolver.resolve(&trigger, now()).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
