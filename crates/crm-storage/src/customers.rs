//! Customer data file for the standalone server

use crm_store::{CustomerData, InMemoryCustomerStore};
use tracing::info;

use crate::storage::{Storable, Storage, StorageResult};

impl Storable for CustomerData {
    const KEY: &'static str = "crm.customers";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

/// Build a customer store from the stored data, empty when none exists
pub async fn load_customers(storage: &Storage) -> StorageResult<InMemoryCustomerStore> {
    let data = storage.load_data::<CustomerData>().await?.unwrap_or_default();
    info!(
        customers = data.customers.len(),
        orders = data.orders.len(),
        carts = data.carts.len(),
        "Loaded customer data"
    );
    Ok(InMemoryCustomerStore::from_data(data))
}

/// Save the store's current customers, orders and carts
pub async fn save_customers(storage: &Storage, store: &InMemoryCustomerStore) -> StorageResult<()> {
    storage.save_data(&store.snapshot()).await
}
