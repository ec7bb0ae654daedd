//! In-process store. Backs the daemon when no database is configured, and
//! every scenario test.
//!
//! All guards run under one write lock per call, so the compare-and-set and
//! the conversation-uniqueness check are atomic with their writes.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use llr_schemas::{BuyRequest, BuyRequestStatus, LandParcel, LandStatus, LandTransaction};
use uuid::Uuid;

use crate::store::{RegistryStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, BuyRequest>,
    parcels: HashMap<Uuid, LandParcel>,
    transactions: HashMap<Uuid, LandTransaction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a parcel (test setup / marketplace hand-off).
    pub fn put_land(&self, parcel: LandParcel) {
        let mut inner = self.write();
        inner.parcels.insert(parcel.id, parcel);
    }

    // A poisoned lock means a writer panicked mid-call; the data is still a
    // consistent snapshot, so recover rather than propagate the panic.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn insert_buy_request(&self, req: &BuyRequest) -> Result<(), StoreError> {
        let mut inner = self.write();
        if inner
            .requests
            .values()
            .any(|r| r.conversation_id == req.conversation_id && !r.status.is_terminal())
        {
            return Err(StoreError::ActiveRequestExists);
        }
        if inner
            .requests
            .values()
            .any(|r| r.land_id == req.land_id && !r.status.is_terminal())
        {
            return Err(StoreError::ParcelHasActiveRequest);
        }
        inner.requests.insert(req.id, req.clone());
        Ok(())
    }

    async fn fetch_buy_request(&self, id: Uuid) -> Result<BuyRequest, StoreError> {
        let inner = self.read();
        inner.requests.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn fetch_active_request_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<BuyRequest>, StoreError> {
        let inner = self.read();
        Ok(inner
            .requests
            .values()
            .find(|r| r.conversation_id == conversation_id && !r.status.is_terminal())
            .cloned())
    }

    async fn update_if_status(
        &self,
        req: &BuyRequest,
        expected: BuyRequestStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write();
        let stored = inner.requests.get_mut(&req.id).ok_or(StoreError::NotFound)?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = req.clone();
        Ok(true)
    }

    async fn list_buy_requests(&self) -> Result<Vec<BuyRequest>, StoreError> {
        let inner = self.read();
        Ok(inner.requests.values().cloned().collect())
    }

    async fn fetch_land(&self, id: Uuid) -> Result<LandParcel, StoreError> {
        let inner = self.read();
        inner.parcels.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_land_parcels(&self) -> Result<Vec<LandParcel>, StoreError> {
        let inner = self.read();
        Ok(inner.parcels.values().cloned().collect())
    }

    async fn update_land_if_status(
        &self,
        parcel: &LandParcel,
        expected: LandStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write();
        let stored = inner.parcels.get_mut(&parcel.id).ok_or(StoreError::NotFound)?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = parcel.clone();
        Ok(true)
    }

    async fn insert_land_transaction(&self, tx: &LandTransaction) -> Result<(), StoreError> {
        let mut inner = self.write();
        let duplicate = inner
            .transactions
            .values()
            .any(|t| t.buy_request_id == tx.buy_request_id);
        if duplicate {
            return Err(StoreError::DuplicateLedgerRecord);
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn list_land_transactions(&self) -> Result<Vec<LandTransaction>, StoreError> {
        let inner = self.read();
        Ok(inner.transactions.values().cloned().collect())
    }
}
