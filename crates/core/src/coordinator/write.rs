//! Mutating operations: add, update, upsert and delete.

use super::{Coordinator, DeleteRequest, RecordBatch};
use crate::collection::CollectionInfo;
use crate::config;
use crate::embedding::EmbeddingAdapter;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::record::{Record, RecordPatch};
use crate::store::GetQuery;
use std::collections::HashSet;

fn check_unique(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    match ids.iter().find(|id| !seen.insert(id.as_str())) {
        Some(dup) => Err(Error::DuplicateId(dup.clone())),
        None => Ok(()),
    }
}

/// Validates a batch of vectors against the collection and returns their
/// dimension.
fn check_embeddings(info: &CollectionInfo, embeddings: &[Vec<f32>]) -> Result<usize> {
    let Some(first) = embeddings.first() else {
        return info
            .dimension
            .ok_or_else(|| Error::invalid_argument("no embeddings supplied"));
    };
    let expected = info.dimension.unwrap_or(first.len());
    if expected == 0 || expected > config::MAX_DIMENSION {
        return Err(Error::invalid_argument(format!(
            "embedding dimension must be between 1 and {}, got {expected}",
            config::MAX_DIMENSION
        )));
    }
    for (i, embedding) in embeddings.iter().enumerate() {
        if embedding.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                got: embedding.len(),
            });
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::invalid_argument(format!(
                "embedding at position {i} contains a non-finite value"
            )));
        }
    }
    Ok(expected)
}

fn missing_embeddings(info: &CollectionInfo, has_documents: bool) -> Error {
    if has_documents && info.embedding == EmbeddingAdapter::Precomputed {
        Error::Embedding(format!(
            "collection '{}' uses precomputed embeddings; supply embeddings explicitly",
            info.name
        ))
    } else {
        Error::invalid_argument("new records need embeddings or documents to embed")
    }
}

fn into_records(batch: RecordBatch, embeddings: &[Vec<f32>]) -> Vec<Record> {
    let mut documents = batch.documents.map(Vec::into_iter);
    let mut metadatas = batch.metadatas.map(Vec::into_iter);
    batch
        .ids
        .into_iter()
        .zip(embeddings)
        .map(|(id, embedding)| Record {
            id,
            embedding: embedding.clone(),
            document: documents.as_mut().and_then(Iterator::next),
            metadata: metadatas.as_mut().and_then(Iterator::next),
        })
        .collect()
}

type Part = (RecordBatch, Option<Vec<Vec<f32>>>);

/// Splits a batch into (rows whose id is in `existing`, the rest), keeping column
/// alignment.
fn partition(
    batch: RecordBatch,
    embeddings: Option<Vec<Vec<f32>>>,
    existing: &HashSet<String>,
) -> (Part, Part) {
    let has_docs = batch.documents.is_some();
    let has_meta = batch.metadatas.is_some();
    let has_emb = embeddings.is_some();
    let empty = || -> Part {
        (
            RecordBatch {
                ids: Vec::new(),
                embeddings: None,
                documents: has_docs.then(Vec::new),
                metadatas: has_meta.then(Vec::new),
            },
            has_emb.then(Vec::new),
        )
    };
    let (mut old, mut new) = (empty(), empty());

    let mut documents = batch.documents.map(Vec::into_iter);
    let mut metadatas = batch.metadatas.map(Vec::into_iter);
    let mut vectors = embeddings.map(Vec::into_iter);
    for id in batch.ids {
        let target = if existing.contains(&id) {
            &mut old
        } else {
            &mut new
        };
        target.0.ids.push(id);
        if let (Some(col), Some(v)) = (target.0.documents.as_mut(), documents.as_mut().and_then(Iterator::next)) {
            col.push(v);
        }
        if let (Some(col), Some(v)) = (target.0.metadatas.as_mut(), metadatas.as_mut().and_then(Iterator::next)) {
            col.push(v);
        }
        if let (Some(col), Some(v)) = (target.1.as_mut(), vectors.as_mut().and_then(Iterator::next)) {
            col.push(v);
        }
    }
    (old, new)
}

impl Coordinator {
    /// Embeddings supplied with the batch, or computed from its documents when the
    /// collection has a text adapter.
    fn take_embeddings(
        &self,
        info: &CollectionInfo,
        batch: &mut RecordBatch,
    ) -> Result<Option<Vec<Vec<f32>>>> {
        if let Some(embeddings) = batch.embeddings.take() {
            return Ok(Some(embeddings));
        }
        match (&info.embedding, &batch.documents) {
            (EmbeddingAdapter::Hashing { .. }, Some(documents)) => {
                Ok(Some(info.embedding.embed_texts(documents)?))
            }
            _ => Ok(None),
        }
    }

    fn add_locked(
        &self,
        info: &CollectionInfo,
        index: &mut VectorIndex,
        batch: RecordBatch,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<String>> {
        let dimension = check_embeddings(info, &embeddings)?;
        let existing = self.store.get(
            info.id,
            &GetQuery {
                ids: Some(&batch.ids),
                limit: Some(1),
                ..GetQuery::default()
            },
        )?;
        if let Some(record) = existing.first() {
            return Err(Error::DuplicateId(record.id.clone()));
        }

        let mut info = info.clone();
        if info.dimension.is_none() {
            self.store.set_dimension(info.id, dimension)?;
            info.dimension = Some(dimension);
        }
        let ids = self.store.insert(info.id, into_records(batch, &embeddings))?;
        self.write_index(&info, index, |idx| idx.add(&ids, &embeddings, false))?;
        self.stamp(&info, index)?;
        tracing::debug!(collection = %info.name, added = ids.len(), "added records");
        Ok(ids)
    }

    fn update_locked(
        &self,
        info: &CollectionInfo,
        index: &mut VectorIndex,
        batch: RecordBatch,
        embeddings: Option<Vec<Vec<f32>>>,
    ) -> Result<usize> {
        let found = self
            .store
            .get(
                info.id,
                &GetQuery {
                    ids: Some(&batch.ids),
                    ..GetQuery::default()
                },
            )?
            .len();
        let missing = batch.ids.len() - found;
        if missing > 0 {
            return Err(Error::NotFoundForUpdate { missing });
        }
        if let Some(embeddings) = &embeddings {
            check_embeddings(info, embeddings)?;
        }

        let mut documents = batch.documents.map(Vec::into_iter);
        let mut metadatas = batch.metadatas.map(Vec::into_iter);
        let patches: Vec<RecordPatch> = (0..batch.ids.len())
            .map(|i| RecordPatch {
                embedding: embeddings.as_ref().map(|e| e[i].clone()),
                document: documents.as_mut().and_then(Iterator::next),
                metadata: metadatas.as_mut().and_then(Iterator::next),
            })
            .collect();
        let written = self.store.update(info.id, &batch.ids, patches)?;

        if let Some(embeddings) = embeddings {
            self.write_index(info, index, |idx| idx.add(&batch.ids, &embeddings, true))?;
        }
        self.stamp(info, index)?;
        tracing::debug!(collection = %info.name, updated = written, "updated records");
        Ok(written)
    }

    /// Inserts new records. Any id already present, or repeated in the batch, fails
    /// the call before anything is written.
    pub fn add(&self, name: &str, mut batch: RecordBatch) -> Result<Vec<String>> {
        batch.validate_shape("add")?;
        check_unique(&batch.ids)?;
        let info = self.get_collection(name)?;
        let embeddings = self
            .take_embeddings(&info, &mut batch)?
            .ok_or_else(|| missing_embeddings(&info, batch.documents.is_some()))?;

        let handle = self.registry.open(&info);
        let mut index = handle.write();
        let info = self.refresh(info.id)?;
        self.ensure_consistent(&info, &mut index)?;
        self.add_locked(&info, &mut index, batch, embeddings)
    }

    /// Overwrites the supplied fields of existing records. Metadata is merged key by
    /// key. Every id must exist.
    pub fn update(&self, name: &str, mut batch: RecordBatch) -> Result<usize> {
        batch.validate_shape("update")?;
        check_unique(&batch.ids)?;
        let info = self.get_collection(name)?;
        let embeddings = self.take_embeddings(&info, &mut batch)?;

        let handle = self.registry.open(&info);
        let mut index = handle.write();
        let info = self.refresh(info.id)?;
        self.ensure_consistent(&info, &mut index)?;
        self.update_locked(&info, &mut index, batch, embeddings)
    }

    /// Updates the ids that exist and adds the rest, under one writer lock.
    pub fn upsert(&self, name: &str, mut batch: RecordBatch) -> Result<()> {
        batch.validate_shape("upsert")?;
        check_unique(&batch.ids)?;
        let info = self.get_collection(name)?;
        let embeddings = self.take_embeddings(&info, &mut batch)?;

        let handle = self.registry.open(&info);
        let mut index = handle.write();
        let info = self.refresh(info.id)?;
        self.ensure_consistent(&info, &mut index)?;

        if let Some(embeddings) = &embeddings {
            check_embeddings(&info, embeddings)?;
        }
        let existing: HashSet<String> = self
            .store
            .get(
                info.id,
                &GetQuery {
                    ids: Some(&batch.ids),
                    ..GetQuery::default()
                },
            )?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let has_documents = batch.documents.is_some();
        let ((old, old_embeddings), (new, new_embeddings)) =
            partition(batch, embeddings, &existing);
        let new_embeddings = match new_embeddings {
            Some(e) => Some(e),
            None if new.is_empty() => None,
            None => return Err(missing_embeddings(&info, has_documents)),
        };

        if !old.is_empty() {
            self.update_locked(&info, &mut index, old, old_embeddings)?;
        }
        if let Some(new_embeddings) = new_embeddings.filter(|_| !new.is_empty()) {
            self.add_locked(&info, &mut index, new, new_embeddings)?;
        }
        Ok(())
    }

    /// Deletes the records selected by ids and/or predicate (their intersection
    /// when both are given). Returns the ids that were removed.
    pub fn delete(&self, name: &str, request: DeleteRequest) -> Result<Vec<String>> {
        let predicate = request.predicate()?;
        if request.ids.is_none() && predicate.is_none() {
            return Err(Error::invalid_argument(
                "delete requires ids or a where / where_document filter",
            ));
        }
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let mut index = handle.write();
        let info = self.refresh(info.id)?;
        self.ensure_consistent(&info, &mut index)?;

        let targets: Vec<String> = self
            .store
            .get(
                info.id,
                &GetQuery {
                    ids: request.ids.as_deref(),
                    predicate: predicate.as_ref(),
                    ..GetQuery::default()
                },
            )?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let deleted = self.store.delete(info.id, &targets)?;
        let tombstoned = index.delete(&deleted);
        if tombstoned.len() != deleted.len() {
            tracing::warn!(
                collection = %info.name,
                deleted = deleted.len(),
                tombstoned = tombstoned.len(),
                "index was missing deleted ids"
            );
        }
        self.stamp(&info, &mut index)?;
        tracing::debug!(collection = %info.name, deleted = deleted.len(), "deleted records");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_unique() {
        assert!(check_unique(&["a".to_string(), "b".to_string()]).is_ok());
        assert!(matches!(
            check_unique(&["a".to_string(), "a".to_string()]),
            Err(Error::DuplicateId(ref id)) if id == "a"
        ));
    }

    #[test]
    fn test_partition_keeps_columns_aligned() {
        let batch = RecordBatch::new(["a", "b", "c"]).with_documents(["da", "db", "dc"]);
        let embeddings = Some(vec![vec![1.0], vec![2.0], vec![3.0]]);
        let existing: HashSet<String> = ["b".to_string()].into_iter().collect();
        let ((old, old_e), (new, new_e)) = partition(batch, embeddings, &existing);
        assert_eq!(old.ids, vec!["b"]);
        assert_eq!(old.documents, Some(vec!["db".to_string()]));
        assert_eq!(old_e, Some(vec![vec![2.0]]));
        assert_eq!(new.ids, vec!["a", "c"]);
        assert_eq!(new.documents, Some(vec!["da".to_string(), "dc".to_string()]));
        assert_eq!(new_e, Some(vec![vec![1.0], vec![3.0]]));
        assert!(new.metadatas.is_none());
    }
}
