//! Argument and result types of coordinator operations.

use crate::error::{Error, Result};
use crate::predicate::{self, Predicate};
use crate::record::Metadata;
use crate::store::Sort;
use serde_json::Value;

/// Column-oriented records for `add`, `update` and `upsert`. Every present column
/// must have one entry per id.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub ids: Vec<String>,
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub documents: Option<Vec<String>>,
    pub metadatas: Option<Vec<Metadata>>,
}

impl RecordBatch {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_embeddings(mut self, embeddings: Vec<Vec<f32>>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents = Some(documents.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_metadatas(mut self, metadatas: Vec<Metadata>) -> Self {
        self.metadatas = Some(metadatas);
        self
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checks column lengths, id validity and batch size.
    pub(crate) fn validate_shape(&self, op: &str) -> Result<()> {
        if self.ids.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{op} requires at least one id"
            )));
        }
        if self.ids.len() > crate::config::MAX_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "{op} batch of {} exceeds the maximum of {}",
                self.ids.len(),
                crate::config::MAX_BATCH_SIZE
            )));
        }
        if let Some(empty) = self.ids.iter().position(|id| id.is_empty()) {
            return Err(Error::invalid_argument(format!(
                "{op}: id at position {empty} is empty"
            )));
        }
        let n = self.ids.len();
        let columns = [
            ("embeddings", self.embeddings.as_ref().map(Vec::len)),
            ("documents", self.documents.as_ref().map(Vec::len)),
            ("metadatas", self.metadatas.as_ref().map(Vec::len)),
        ];
        for (name, len) in columns {
            if let Some(len) = len {
                if len != n {
                    return Err(Error::invalid_argument(format!(
                        "{op}: got {n} ids but {len} {name}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Selection for `get`.
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub ids: Option<Vec<String>>,
    pub where_metadata: Option<Value>,
    pub where_document: Option<Value>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Sort,
}

impl GetRequest {
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn where_metadata(mut self, expr: Value) -> Self {
        self.where_metadata = Some(expr);
        self
    }

    pub fn where_document(mut self, expr: Value) -> Self {
        self.where_document = Some(expr);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub(crate) fn predicate(&self) -> Result<Option<Predicate>> {
        predicate::compile(self.where_metadata.as_ref(), self.where_document.as_ref())
    }
}

/// Selection for `delete`. At least one selector must be present.
#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub ids: Option<Vec<String>>,
    pub where_metadata: Option<Value>,
    pub where_document: Option<Value>,
}

impl DeleteRequest {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn matching(where_metadata: Value) -> Self {
        Self {
            where_metadata: Some(where_metadata),
            ..Self::default()
        }
    }

    pub fn where_document(mut self, expr: Value) -> Self {
        self.where_document = Some(expr);
        self
    }

    pub(crate) fn predicate(&self) -> Result<Option<Predicate>> {
        predicate::compile(self.where_metadata.as_ref(), self.where_document.as_ref())
    }
}

/// Arguments of `query`. Exactly one of `query_embeddings` / `query_texts`.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query_embeddings: Option<Vec<Vec<f32>>>,
    pub query_texts: Option<Vec<String>>,
    pub n_results: usize,
    pub where_metadata: Option<Value>,
    pub where_document: Option<Value>,
}

impl QueryRequest {
    pub fn embeddings(queries: Vec<Vec<f32>>, n_results: usize) -> Self {
        Self {
            query_embeddings: Some(queries),
            query_texts: None,
            n_results,
            where_metadata: None,
            where_document: None,
        }
    }

    pub fn texts<I, S>(texts: I, n_results: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query_embeddings: None,
            query_texts: Some(texts.into_iter().map(Into::into).collect()),
            n_results,
            where_metadata: None,
            where_document: None,
        }
    }

    pub fn where_metadata(mut self, expr: Value) -> Self {
        self.where_metadata = Some(expr);
        self
    }

    pub fn where_document(mut self, expr: Value) -> Self {
        self.where_document = Some(expr);
        self
    }

    pub(crate) fn predicate(&self) -> Result<Option<Predicate>> {
        predicate::compile(self.where_metadata.as_ref(), self.where_document.as_ref())
    }
}

/// One ranked result of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub distance: f32,
    pub document: Option<String>,
    pub metadata: Option<Metadata>,
}
