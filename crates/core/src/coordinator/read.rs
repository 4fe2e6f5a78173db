//! Read operations: get, peek, count and query.

use super::{Coordinator, GetRequest, QueryHit, QueryRequest};
use crate::error::{Error, Result};
use crate::record::Record;
use crate::store::GetQuery;
use std::collections::{HashMap, HashSet};

impl Coordinator {
    /// Records selected by ids and/or predicate, in the requested order, after
    /// offset and limit.
    pub fn get(&self, name: &str, request: GetRequest) -> Result<Vec<Record>> {
        let predicate = request.predicate()?;
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let _reader = handle.read();
        self.store.get(
            info.id,
            &GetQuery {
                ids: request.ids.as_deref(),
                predicate: predicate.as_ref(),
                limit: request.limit,
                offset: request.offset,
                sort: request.sort,
            },
        )
    }

    /// The first `limit` records in insertion order.
    pub fn peek(&self, name: &str, limit: usize) -> Result<Vec<Record>> {
        self.get(name, GetRequest::default().limit(limit))
    }

    pub fn count(&self, name: &str) -> Result<usize> {
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let _reader = handle.read();
        self.store.count(info.id)
    }

    /// Nearest neighbors of each query among the records matching the filters.
    ///
    /// Returns one list per query, ascending by distance, with at most
    /// `n_results` hits. A filter that matches nothing yields empty lists.
    pub fn query(&self, name: &str, request: QueryRequest) -> Result<Vec<Vec<QueryHit>>> {
        if request.n_results == 0 {
            return Err(Error::invalid_argument("n_results must be positive"));
        }
        let predicate = request.predicate()?;
        let info = self.get_collection(name)?;
        let queries = match (request.query_embeddings, request.query_texts) {
            (Some(embeddings), None) => embeddings,
            (None, Some(texts)) => info.embedding.embed_texts(&texts)?,
            _ => {
                return Err(Error::invalid_argument(
                    "query takes exactly one of query_embeddings or query_texts",
                ))
            }
        };
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let handle = self.registry.open(&info);
        let index = self.read_index(&info, &handle)?;

        let allowed: Option<HashSet<String>> = match &predicate {
            Some(predicate) => Some(
                self.store
                    .get(
                        info.id,
                        &GetQuery {
                            predicate: Some(predicate),
                            ..GetQuery::default()
                        },
                    )?
                    .into_iter()
                    .map(|r| r.id)
                    .collect(),
            ),
            None => None,
        };
        if allowed.as_ref().is_some_and(HashSet::is_empty) {
            return Ok(vec![Vec::new(); queries.len()]);
        }

        let searcher: &crate::index::VectorIndex = &index;
        let neighbors = self
            .pool
            .install(|| searcher.nearest_neighbors(&queries, request.n_results, allowed.as_ref()))?;

        let hit_ids: Vec<String> = neighbors
            .iter()
            .flat_map(|n| n.ids.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let rows: HashMap<String, Record> = self
            .store
            .get(
                info.id,
                &GetQuery {
                    ids: Some(&hit_ids),
                    ..GetQuery::default()
                },
            )?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        drop(index);

        Ok(neighbors
            .into_iter()
            .map(|n| {
                n.ids
                    .into_iter()
                    .zip(n.distances)
                    .map(|(id, distance)| {
                        let (document, metadata) = match rows.get(&id) {
                            Some(row) => (row.document.clone(), row.metadata.clone()),
                            None => (None, None),
                        };
                        QueryHit {
                            id,
                            distance,
                            document,
                            metadata,
                        }
                    })
                    .collect()
            })
            .collect())
    }
}
