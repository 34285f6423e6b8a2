use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{Document, Record, Versioned};
use crate::traits::MarketStorage;

fn decode<R: Record>(doc: Document) -> Result<Versioned<R>, StorageError> {
    Versioned::from_document(doc).map_err(StorageError::from)
}

fn decode_all<R: Record>(docs: Vec<Document>) -> Result<Vec<Versioned<R>>, StorageError> {
    docs.into_iter().map(decode).collect()
}

/// Typed access over any [`MarketStorage`] backend.
#[async_trait]
pub trait StorageExt: MarketStorage {
    async fn insert<R: Record>(
        &self,
        snapshot: &mut Self::Snapshot,
        record: &R,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_value(record)?;
        self.insert_record(snapshot, R::KIND, record.record_id(), record.parent_id(), body)
            .await
    }

    async fn load_for_update<R: Record>(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
    ) -> Result<Versioned<R>, StorageError> {
        let doc = self.get_record_for_update(snapshot, R::KIND, id).await?;
        decode(doc)
    }

    async fn update<R: Record>(
        &self,
        snapshot: &mut Self::Snapshot,
        expected_version: i64,
        record: &R,
    ) -> Result<i64, StorageError> {
        let body = serde_json::to_value(record)?;
        self.update_record(snapshot, R::KIND, record.record_id(), expected_version, body)
            .await
    }

    async fn children_for_update<R: Record>(
        &self,
        snapshot: &mut Self::Snapshot,
        parent_id: &str,
    ) -> Result<Vec<Versioned<R>>, StorageError> {
        let docs = self
            .list_records_for_update(snapshot, R::KIND, parent_id)
            .await?;
        decode_all(docs)
    }

    async fn load<R: Record>(&self, id: &str) -> Result<Versioned<R>, StorageError> {
        let doc = self.get_record(R::KIND, id).await?;
        decode(doc)
    }

    async fn children<R: Record>(&self, parent_id: &str) -> Result<Vec<Versioned<R>>, StorageError> {
        let docs = self.list_records(R::KIND, Some(parent_id)).await?;
        decode_all(docs)
    }

    async fn all<R: Record>(&self) -> Result<Vec<Versioned<R>>, StorageError> {
        let docs = self.list_records(R::KIND, None).await?;
        decode_all(docs)
    }
}

impl<S: MarketStorage + ?Sized> StorageExt for S {}
