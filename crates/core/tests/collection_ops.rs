use quiverdb_core::{
    CollectionConfig, Coordinator, CoordinatorConfig, DeleteRequest, EmbeddingAdapter, Error,
    GetRequest, Metadata, MetadataValue, QueryRequest, RecordBatch, Sort, Space,
};
use serde_json::json;
use std::collections::HashSet;

fn coordinator() -> Coordinator {
    Coordinator::open(CoordinatorConfig::in_memory().with_search_threads(2)).unwrap()
}

fn meta(pairs: &[(&str, MetadataValue)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn create(db: &Coordinator, name: &str, space: Space) {
    let config = CollectionConfig {
        space,
        ..CollectionConfig::default()
    };
    db.create_collection(name, config, EmbeddingAdapter::Precomputed)
        .unwrap();
}

/// Three 2-d points with genre/year metadata and short documents.
fn seed_books(db: &Coordinator) {
    create(db, "books", Space::L2);
    db.add(
        "books",
        RecordBatch::new(["a", "b", "c"])
            .with_embeddings(vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]])
            .with_documents([
                "dune is a desert planet novel",
                "foundation spans a galactic empire",
                "a cookbook of rustic bread",
            ])
            .with_metadatas(vec![
                meta(&[("genre", "scifi".into()), ("year", 1965i64.into())]),
                meta(&[("genre", "scifi".into()), ("year", 1951i64.into())]),
                meta(&[("genre", "food".into()), ("year", 2011i64.into())]),
            ]),
    )
    .unwrap();
}

fn hit_ids(db: &Coordinator, name: &str, request: QueryRequest) -> Vec<String> {
    db.query(name, request).unwrap()[0]
        .iter()
        .map(|h| h.id.clone())
        .collect()
}

#[test]
fn test_query_orders_by_squared_l2() {
    let db = coordinator();
    seed_books(&db);
    let results = db
        .query("books", QueryRequest::embeddings(vec![vec![0.1, 0.0]], 2))
        .unwrap();
    assert_eq!(results.len(), 1);
    let hits = &results[0];
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert_eq!(hits[1].id, "b");
    assert!((hits[0].distance - 0.01).abs() < 1e-5);
    assert!((hits[1].distance - 0.81).abs() < 1e-5);
    assert_eq!(hits[0].document.as_deref(), Some("dune is a desert planet novel"));
    assert_eq!(
        hits[0].metadata.as_ref().and_then(|m| m.get("genre")),
        Some(&MetadataValue::Str("scifi".into()))
    );
}

#[test]
fn test_query_per_query_lists() {
    let db = coordinator();
    seed_books(&db);
    let results = db
        .query(
            "books",
            QueryRequest::embeddings(vec![vec![0.0, 0.0], vec![5.0, 5.1]], 1),
        )
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0][0].id, "a");
    assert_eq!(results[1][0].id, "c");
}

#[test]
fn test_n_results_is_clamped_to_candidates() {
    let db = coordinator();
    seed_books(&db);
    let ids = hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![0.0, 0.0]], 50));
    assert_eq!(ids, vec!["a", "b", "c"]);

    let err = db
        .query("books", QueryRequest::embeddings(vec![vec![0.0, 0.0]], 0))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_get_by_metadata_predicate() {
    let db = coordinator();
    seed_books(&db);

    let scifi = db
        .get(
            "books",
            GetRequest::default()
                .where_metadata(json!({"genre": "scifi"}))
                .sort(Sort::IdAscending),
        )
        .unwrap();
    let ids: Vec<&str> = scifi.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let recent = db
        .get(
            "books",
            GetRequest::default().where_metadata(json!({
                "$and": [{"genre": {"$eq": "scifi"}}, {"year": {"$gte": 1960}}]
            })),
        )
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, "a");

    let either = db
        .get(
            "books",
            GetRequest::default().where_metadata(json!({
                "$or": [{"year": {"$lt": 1952}}, {"genre": {"$in": ["food"]}}]
            })),
        )
        .unwrap();
    let ids: HashSet<&str> = either.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["b", "c"]));
}

#[test]
fn test_get_by_document_predicate() {
    let db = coordinator();
    seed_books(&db);
    let found = db
        .get(
            "books",
            GetRequest::default().where_document(json!({"$contains": "galactic"})),
        )
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "b");

    let not_bread = db
        .get(
            "books",
            GetRequest::default()
                .where_document(json!({"$not_contains": "bread"}))
                .sort(Sort::IdAscending),
        )
        .unwrap();
    assert_eq!(not_bread.len(), 2);

    let regex = db
        .get(
            "books",
            GetRequest::default().where_document(json!({"$regex": "^dune\\b"})),
        )
        .unwrap();
    assert_eq!(regex[0].id, "a");
}

#[test]
fn test_get_paging_and_ids() {
    let db = coordinator();
    seed_books(&db);
    let page = db
        .get(
            "books",
            GetRequest::default()
                .sort(Sort::IdDescending)
                .offset(1)
                .limit(1),
        )
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "b");

    let by_id = db
        .get("books", GetRequest::default().ids(["c", "missing"]))
        .unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].id, "c");

    let peek = db.peek("books", 2).unwrap();
    let ids: Vec<&str> = peek.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn test_malformed_predicates_are_rejected() {
    let db = coordinator();
    seed_books(&db);
    let err = db
        .get(
            "books",
            GetRequest::default().where_metadata(json!({"year": {"$near": 3}})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnknownOperator(ref op) if op == "$near"));

    let err = db
        .query(
            "books",
            QueryRequest::embeddings(vec![vec![0.0, 0.0]], 1)
                .where_metadata(json!({"$and": []})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::MalformedPredicate(_)));

    let err = db
        .get(
            "books",
            GetRequest::default().where_document(json!({"$regex": "("})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::MalformedPredicate(_)));
}

#[test]
fn test_filtered_query() {
    let db = coordinator();
    seed_books(&db);
    let ids = hit_ids(
        &db,
        "books",
        QueryRequest::embeddings(vec![vec![0.0, 0.0]], 3)
            .where_metadata(json!({"genre": "food"})),
    );
    assert_eq!(ids, vec!["c"]);

    let results = db
        .query(
            "books",
            QueryRequest::embeddings(vec![vec![0.0, 0.0], vec![1.0, 1.0]], 3)
                .where_metadata(json!({"genre": "poetry"})),
        )
        .unwrap();
    assert_eq!(results, vec![Vec::new(), Vec::new()]);
}

#[test]
fn test_filtered_query_over_graph() {
    let db = coordinator();
    create(&db, "grid", Space::L2);
    let n = 600;
    let ids: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
    let embeddings: Vec<Vec<f32>> = (0..n)
        .map(|i| vec![(i % 30) as f32, (i / 30) as f32])
        .collect();
    let metadatas: Vec<Metadata> = (0..n)
        .map(|i| meta(&[("even", MetadataValue::Bool(i % 2 == 0))]))
        .collect();
    db.add(
        "grid",
        RecordBatch::new(ids)
            .with_embeddings(embeddings)
            .with_metadatas(metadatas),
    )
    .unwrap();

    let results = db
        .query(
            "grid",
            QueryRequest::embeddings(vec![vec![10.0, 10.0]], 5)
                .where_metadata(json!({"even": true})),
        )
        .unwrap();
    let hits = &results[0];
    assert_eq!(hits.len(), 5);
    for hit in hits {
        assert_eq!(
            hit.metadata.as_ref().and_then(|m| m.get("even")),
            Some(&MetadataValue::Bool(true))
        );
    }
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn test_deleted_records_are_excluded() {
    let db = coordinator();
    seed_books(&db);
    let deleted = db.delete("books", DeleteRequest::ids(["a"])).unwrap();
    assert_eq!(deleted, vec!["a"]);

    let ids = hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![0.0, 0.0]], 3));
    assert_eq!(ids, vec!["b", "c"]);
    assert_eq!(db.count("books").unwrap(), 2);

    // Deleting again removes nothing and succeeds.
    assert!(db.delete("books", DeleteRequest::ids(["a"])).unwrap().is_empty());
}

#[test]
fn test_delete_by_predicate_intersects_ids() {
    let db = coordinator();
    seed_books(&db);
    let request = DeleteRequest {
        ids: Some(vec!["a".into(), "c".into()]),
        where_metadata: Some(json!({"genre": "scifi"})),
        where_document: None,
    };
    assert_eq!(db.delete("books", request).unwrap(), vec!["a"]);

    let deleted = db
        .delete("books", DeleteRequest::matching(json!({"year": {"$gt": 2000}})))
        .unwrap();
    assert_eq!(deleted, vec!["c"]);
    assert_eq!(db.count("books").unwrap(), 1);

    let err = db.delete("books", DeleteRequest::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_update_in_place_changes_ranking() {
    let db = coordinator();
    seed_books(&db);
    let updated = db
        .update(
            "books",
            RecordBatch::new(["c"])
                .with_embeddings(vec![vec![0.05, 0.0]])
                .with_metadatas(vec![meta(&[("shelf", 3i64.into())])]),
        )
        .unwrap();
    assert_eq!(updated, 1);

    let ids = hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![0.06, 0.0]], 1));
    assert_eq!(ids, vec!["c"]);

    let row = &db.get("books", GetRequest::default().ids(["c"])).unwrap()[0];
    let metadata = row.metadata.as_ref().unwrap();
    assert_eq!(metadata.get("genre"), Some(&MetadataValue::Str("food".into())));
    assert_eq!(metadata.get("shelf"), Some(&MetadataValue::Int(3)));
    assert_eq!(db.count("books").unwrap(), 3);
}

#[test]
fn test_update_rejects_missing_ids() {
    let db = coordinator();
    seed_books(&db);
    let err = db
        .update(
            "books",
            RecordBatch::new(["a", "zzz"]).with_documents(["x", "y"]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFoundForUpdate { missing: 1 }));
    let row = &db.get("books", GetRequest::default().ids(["a"])).unwrap()[0];
    assert_eq!(row.document.as_deref(), Some("dune is a desert planet novel"));
}

#[test]
fn test_dimension_mismatch_leaves_store_untouched() {
    let db = coordinator();
    seed_books(&db);
    let err = db
        .add(
            "books",
            RecordBatch::new(["d", "e"])
                .with_embeddings(vec![vec![1.0, 2.0], vec![1.0, 2.0, 3.0]]),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 2,
            got: 3
        }
    ));
    assert_eq!(db.count("books").unwrap(), 3);
    assert!(db
        .get("books", GetRequest::default().ids(["d"]))
        .unwrap()
        .is_empty());

    let err = db
        .query("books", QueryRequest::embeddings(vec![vec![1.0]], 1))
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[test]
fn test_add_rejects_duplicates_and_bad_vectors() {
    let db = coordinator();
    seed_books(&db);
    let err = db
        .add("books", RecordBatch::new(["a"]).with_embeddings(vec![vec![9.0, 9.0]]))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateId(ref id) if id == "a"));

    let err = db
        .add(
            "books",
            RecordBatch::new(["x", "x"]).with_embeddings(vec![vec![1.0, 1.0], vec![2.0, 2.0]]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateId(_)));

    let err = db
        .add(
            "books",
            RecordBatch::new(["n"]).with_embeddings(vec![vec![f32::NAN, 0.0]]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = db
        .add("books", RecordBatch::new(["t"]).with_documents(["text only"]))
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
    assert_eq!(db.count("books").unwrap(), 3);
}

#[test]
fn test_upsert_updates_and_inserts() {
    let db = coordinator();
    seed_books(&db);
    db.upsert(
        "books",
        RecordBatch::new(["b", "d"])
            .with_embeddings(vec![vec![2.0, 0.0], vec![3.0, 3.0]])
            .with_metadatas(vec![
                meta(&[("year", 1952i64.into())]),
                meta(&[("genre", "poetry".into())]),
            ]),
    )
    .unwrap();
    assert_eq!(db.count("books").unwrap(), 4);

    let rows = db
        .get("books", GetRequest::default().ids(["b", "d"]).sort(Sort::IdAscending))
        .unwrap();
    assert_eq!(rows[0].embedding, vec![2.0, 0.0]);
    assert_eq!(rows[0].metadata_value("year"), Some(&MetadataValue::Int(1952)));
    assert_eq!(
        rows[0].metadata_value("genre"),
        Some(&MetadataValue::Str("scifi".into()))
    );
    assert_eq!(
        rows[1].metadata_value("genre"),
        Some(&MetadataValue::Str("poetry".into()))
    );

    let ids = hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![3.0, 3.0]], 1));
    assert_eq!(ids, vec!["d"]);
}

#[test]
fn test_store_and_index_hold_same_ids() {
    let db = coordinator();
    seed_books(&db);
    db.add(
        "books",
        RecordBatch::new(["d", "e"]).with_embeddings(vec![vec![2.0, 2.0], vec![3.0, 1.0]]),
    )
    .unwrap();
    db.delete("books", DeleteRequest::ids(["b", "d"])).unwrap();
    db.upsert(
        "books",
        RecordBatch::new(["b"]).with_embeddings(vec![vec![0.5, 0.5]]),
    )
    .unwrap();

    let info = db.get_collection("books").unwrap();
    let stored: HashSet<String> = db
        .get("books", GetRequest::default())
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    let handle = db.registry().get(info.id).unwrap();
    let indexed: HashSet<String> = handle.read().ids().cloned().collect();
    assert_eq!(stored, indexed);
    assert_eq!(stored, HashSet::from(["a", "b", "c", "e"].map(String::from)));
    db.validate_index("books").unwrap();
}

#[test]
fn test_failed_index_write_is_repaired_by_rebuild() {
    let db = coordinator();
    seed_books(&db);
    let info = db.get_collection("books").unwrap();

    // Same live count as the store, but "c" swapped for a stray "d".
    {
        let handle = db.registry().open(&info);
        let mut index = handle.write();
        index.delete(&["c".to_string()]);
        index
            .add(&["d".to_string()], &[vec![2.0, 2.0]], false)
            .unwrap();
    }

    // The store accepts "d"; the index rejects it as a duplicate twice.
    db.add(
        "books",
        RecordBatch::new(["d"]).with_embeddings(vec![vec![3.0, 3.0]]),
    )
    .unwrap();

    let stored: HashSet<String> = db
        .get("books", GetRequest::default())
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    let handle = db.registry().get(info.id).unwrap();
    let indexed: HashSet<String> = handle.read().ids().cloned().collect();
    assert_eq!(stored, indexed);
    assert_eq!(
        hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![5.0, 5.0]], 1)),
        vec!["c"]
    );
    assert_eq!(
        hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![3.0, 3.0]], 1)),
        vec!["d"]
    );
    assert_eq!(db.stats("books").unwrap().index.tombstone_count, 0);
    db.validate_index("books").unwrap();
}

#[test]
fn test_cosine_and_inner_product_spaces() {
    let db = coordinator();
    create(&db, "angles", Space::Cosine);
    db.add(
        "angles",
        RecordBatch::new(["x", "y", "xy"]).with_embeddings(vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
        ]),
    )
    .unwrap();
    let hits = &db
        .query("angles", QueryRequest::embeddings(vec![vec![10.0, 0.0]], 3))
        .unwrap()[0];
    assert_eq!(hits[0].id, "x");
    assert!(hits[0].distance.abs() < 1e-5);
    assert!((hits[2].distance - 1.0).abs() < 1e-5);

    create(&db, "dots", Space::Ip);
    db.add(
        "dots",
        RecordBatch::new(["small", "big"]).with_embeddings(vec![vec![0.1, 0.0], vec![0.9, 0.0]]),
    )
    .unwrap();
    let ids = hit_ids(&db, "dots", QueryRequest::embeddings(vec![vec![1.0, 0.0]], 2));
    assert_eq!(ids, vec!["big", "small"]);
}

#[test]
fn test_query_texts_with_hashing_adapter() {
    let db = coordinator();
    let config = CollectionConfig {
        space: Space::Cosine,
        ..CollectionConfig::default()
    };
    db.create_collection("notes", config, EmbeddingAdapter::Hashing { dimension: 256 })
        .unwrap();
    db.add(
        "notes",
        RecordBatch::new(["db", "bake", "sea"]).with_documents([
            "rust vector database",
            "banana bread recipe",
            "ocean tides and the moon",
        ]),
    )
    .unwrap();
    assert_eq!(db.get_collection("notes").unwrap().dimension, Some(256));

    let ids = hit_ids(&db, "notes", QueryRequest::texts(["a vector database in rust"], 1));
    assert_eq!(ids, vec!["db"]);

    let err = db
        .query(
            "notes",
            QueryRequest {
                query_embeddings: Some(vec![vec![0.0; 256]]),
                query_texts: Some(vec!["both".into()]),
                n_results: 1,
                where_metadata: None,
                where_document: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_query_texts_needs_text_adapter() {
    let db = coordinator();
    seed_books(&db);
    let err = db
        .query("books", QueryRequest::texts(["dune"], 1))
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
}

#[test]
fn test_collection_catalog() {
    let db = coordinator();
    create(&db, "first", Space::L2);
    let err = db
        .create_collection("first", CollectionConfig::default(), EmbeddingAdapter::Precomputed)
        .unwrap_err();
    assert!(matches!(err, Error::CollectionExists(_)));

    let again = db
        .get_or_create_collection("first", CollectionConfig::default(), EmbeddingAdapter::Precomputed)
        .unwrap();
    assert_eq!(again.name, "first");

    for bad in ["ab", "-abc", "a..b", "has space"] {
        assert!(
            db.create_collection(bad, CollectionConfig::default(), EmbeddingAdapter::Precomputed)
                .is_err(),
            "{bad}"
        );
    }

    create(&db, "second", Space::Ip);
    let names: HashSet<String> = db
        .list_collections()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, HashSet::from(["first".to_string(), "second".to_string()]));

    db.delete_collection("first").unwrap();
    assert!(matches!(
        db.get_collection("first"),
        Err(Error::CollectionNotFound(_))
    ));
    assert!(matches!(
        db.count("first"),
        Err(Error::CollectionNotFound(_))
    ));
}

#[test]
fn test_empty_collection_query_returns_empty_lists() {
    let db = coordinator();
    create(&db, "empty", Space::L2);
    let results = db
        .query("empty", QueryRequest::embeddings(vec![vec![1.0, 2.0]], 4))
        .unwrap();
    assert_eq!(results, vec![Vec::new()]);
    let stats = db.stats("empty").unwrap();
    assert_eq!(stats.count, 0);
    assert_eq!(stats.dimension, None);
}

#[test]
fn test_create_index_drops_tombstones() {
    let db = coordinator();
    seed_books(&db);
    db.delete("books", DeleteRequest::ids(["b"])).unwrap();
    assert_eq!(db.stats("books").unwrap().index.tombstone_count, 1);

    let stats = db.create_index("books").unwrap();
    assert_eq!(stats.element_count, 2);
    assert_eq!(stats.tombstone_count, 0);
    let ids = hit_ids(&db, "books", QueryRequest::embeddings(vec![vec![1.0, 0.0]], 3));
    assert_eq!(ids, vec!["a", "c"]);
}

#[test]
fn test_reset_is_gated() {
    let db = coordinator();
    seed_books(&db);
    assert!(matches!(db.reset(), Err(Error::ResetDisabled)));
    assert_eq!(db.count("books").unwrap(), 3);

    let db = Coordinator::open(CoordinatorConfig::in_memory().with_allow_reset(true)).unwrap();
    seed_books(&db);
    db.reset().unwrap();
    assert!(db.list_collections().unwrap().is_empty());
}
