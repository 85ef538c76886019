use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tokio_util::sync::CancellationToken;

use crate::{
    bulk::{BulkItemStatus, BulkOptions, WriteModel},
    config::CollectionConfig,
    persistence::NoopPersistence,
    Collection,
    CorvidError,
    Document,
    FindOptions,
    IndexOptions,
    Value,
};

fn doc(json: JsonValue) -> Document { Document::from_json(json).unwrap() }

async fn setup_collection() -> Collection {
    Collection::open(
        "students",
        CollectionConfig::default(),
        Arc::new(NoopPersistence),
    )
    .await
    .unwrap()
}

async fn seeded_collection() -> Collection {
    let collection = setup_collection().await;
    collection
        .insert_many(vec![
            doc(json!({"_id": 1, "name": "Alice Johnson", "major": "Physics", "gpa": 3.8, "courses": ["PHYS101", "MATH201"], "bio": "Loves quantum mechanics"})),
            doc(json!({"_id": 2, "name": "Bob Smith", "major": "Mathematics", "gpa": 3.2, "courses": ["MATH201"], "bio": "Chess player from Boston"})),
            doc(json!({"_id": 3, "name": "Carol White", "major": "Physics", "gpa": 3.5, "courses": [], "address": {"city": "Boston"}})),
            doc(json!({"_id": 4, "name": "Dan Brown", "major": "Chemistry", "gpa": 2.9})),
            doc(json!({"_id": 5, "name": "Eve Black", "major": "Mathematics", "gpa": 3.9, "courses": ["MATH301", "PHYS101"]})),
        ])
        .await
        .unwrap();
    collection
}

async fn ids(collection: &Collection, filter: JsonValue, options: FindOptions) -> Vec<JsonValue> {
    collection
        .find(&doc(filter), options)
        .await
        .unwrap()
        .map(|document| document.id().map(Value::to_json).unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_insert_generates_leading_id() {
    let collection = setup_collection().await;
    let result = collection
        .insert_one(doc(json!({"name": "Alice", "gpa": 3.8})))
        .await
        .unwrap();
    assert!(matches!(result.inserted_id, Value::String(_)));

    let stored = collection.get(&result.inserted_id).await.unwrap();
    assert_eq!(stored.keys().next(), Some("_id"));
    assert_eq!(stored.get("name"), Some(&Value::from("Alice")));
    assert_eq!(collection.document_count().await, 1);
}

#[tokio::test]
async fn test_insert_duplicate_id_fails() {
    let collection = setup_collection().await;
    collection.insert_one(doc(json!({"_id": 7}))).await.unwrap();
    let err = collection
        .insert_one(doc(json!({"_id": 7, "name": "again"})))
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::DuplicateKey { ref index, .. } if index == "_id_"));
    assert_eq!(collection.document_count().await, 1);
}

#[tokio::test]
async fn test_insert_rejects_array_id_and_operator_fields() {
    let collection = setup_collection().await;
    let err = collection
        .insert_one(doc(json!({"_id": [1, 2]})))
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::InvalidArgument { .. }));
    let err = collection
        .insert_one(doc(json!({"$set": {"a": 1}})))
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_insert_many_is_all_or_nothing() {
    let collection = seeded_collection().await;
    let err = collection
        .insert_many(vec![
            doc(json!({"_id": 10, "name": "new"})),
            doc(json!({"_id": 11, "name": "newer"})),
            doc(json!({"_id": 10, "name": "duplicate within batch"})),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::DuplicateKey { .. }));
    assert_eq!(collection.document_count().await, 5);
    assert!(collection.get(&Value::Int(10)).await.is_none());
}

#[tokio::test]
async fn test_find_with_sort_skip_limit_and_projection() {
    let collection = seeded_collection().await;
    let options = FindOptions::new()
        .sort(doc(json!({"gpa": -1})))
        .skip(1)
        .limit(2)
        .projection(doc(json!({"name": 1, "_id": 0})));
    let names: Vec<JsonValue> = collection
        .find(&Document::new(), options)
        .await
        .unwrap()
        .map(|document| document.to_json())
        .collect();
    assert_eq!(
        names,
        [json!({"name": "Alice Johnson"}), json!({"name": "Carol White"})]
    );
}

#[tokio::test]
async fn test_find_natural_order_and_limit_zero() {
    let collection = seeded_collection().await;
    let all = ids(&collection, json!({}), FindOptions::new().limit(0)).await;
    assert_eq!(all, [json!(1), json!(2), json!(3), json!(4), json!(5)]);
}

#[tokio::test]
async fn test_find_one_and_count() {
    let collection = seeded_collection().await;
    let found = collection
        .find_one(&doc(json!({"major": "Physics"})), FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id(), Some(&Value::Int(1)));
    assert!(collection
        .find_one(&doc(json!({"major": "Art"})), FindOptions::new())
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        collection
            .count(&doc(json!({"courses": "PHYS101"})))
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_empty_logical_lists() {
    let collection = seeded_collection().await;
    assert_eq!(collection.count(&doc(json!({"$and": []}))).await.unwrap(), 5);
    assert_eq!(collection.count(&doc(json!({"$or": []}))).await.unwrap(), 0);
    assert_eq!(collection.count(&doc(json!({"$nor": []}))).await.unwrap(), 5);
}

#[tokio::test]
async fn test_snapshot_survives_later_writes() {
    let collection = seeded_collection().await;
    let cursor = collection
        .find(&doc(json!({"major": "Physics"})), FindOptions::new())
        .await
        .unwrap();
    collection
        .delete_many(&doc(json!({"major": "Physics"})))
        .await
        .unwrap();
    assert_eq!(cursor.count(), 2);
    assert_eq!(
        collection
            .count(&doc(json!({"major": "Physics"})))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_update_one_reports_matched_and_modified() {
    let collection = seeded_collection().await;
    let result = collection
        .update_one(
            &doc(json!({"_id": 2})),
            &doc(json!({"$inc": {"gpa": 0.5}, "$set": {"honors": true}})),
            false,
        )
        .await
        .unwrap();
    assert_eq!((result.matched_count, result.modified_count), (1, 1));
    let bob = collection.get(&Value::Int(2)).await.unwrap();
    assert_eq!(bob.get("gpa").and_then(Value::as_f64), Some(3.7));
    assert_eq!(bob.get("honors"), Some(&Value::Bool(true)));

    let result = collection
        .update_one(&doc(json!({"_id": 2})), &doc(json!({"$set": {"honors": true}})), false)
        .await
        .unwrap();
    assert_eq!((result.matched_count, result.modified_count), (1, 0));

    let result = collection
        .update_one(&doc(json!({"_id": 99})), &doc(json!({"$set": {"honors": true}})), false)
        .await
        .unwrap();
    assert_eq!(result, crate::UpdateResult::none());
}

#[tokio::test]
async fn test_update_cannot_change_id() {
    let collection = seeded_collection().await;
    let err = collection
        .update_one(&doc(json!({"_id": 1})), &doc(json!({"$set": {"_id": 100}})), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::ImmutableField { .. }));
    assert!(collection.get(&Value::Int(1)).await.is_some());
}

#[tokio::test]
async fn test_upsert_twice_inserts_once() {
    let collection = setup_collection().await;
    let filter = doc(json!({"student_id": 1006}));
    let update = doc(json!({"$set": {"name": "Frank Miller", "gpa": 3.1}}));

    let first = collection.update_one(&filter, &update, true).await.unwrap();
    assert_eq!(first.matched_count, 0);
    let upserted = first.upserted_id.unwrap();
    let stored = collection.get(&upserted).await.unwrap();
    assert_eq!(stored.get("student_id"), Some(&Value::Int(1006)));
    assert_eq!(stored.get("name"), Some(&Value::from("Frank Miller")));

    let second = collection.update_one(&filter, &update, true).await.unwrap();
    assert_eq!((second.matched_count, second.modified_count), (1, 0));
    assert!(second.upserted_id.is_none());
    assert_eq!(collection.document_count().await, 1);
}

#[tokio::test]
async fn test_replace_upsert_twice_inserts_once() {
    let collection = setup_collection().await;
    let filter = doc(json!({"student_id": 9999}));

    let first = collection
        .replace_one(&filter, doc(json!({"name": "X"})), true)
        .await
        .unwrap();
    let upserted = first.upserted_id.unwrap();
    let stored = collection.get(&upserted).await.unwrap();
    assert_eq!(stored.get("student_id"), Some(&Value::Int(9999)));

    let second = collection
        .replace_one(&filter, doc(json!({"name": "X"})), true)
        .await
        .unwrap();
    assert_eq!(second.matched_count, 1);
    assert!(second.upserted_id.is_none());
    assert_eq!(collection.document_count().await, 1);
    assert_eq!(collection.count(&filter).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_many_then_find_returns_nothing() {
    let collection = seeded_collection().await;
    let result = collection
        .update_many(
            &doc(json!({"major": "Mathematics"})),
            &doc(json!({"$set": {"major": "Applied Mathematics"}})),
            false,
        )
        .await
        .unwrap();
    assert_eq!((result.matched_count, result.modified_count), (2, 2));
    assert!(ids(&collection, json!({"major": "Mathematics"}), FindOptions::new())
        .await
        .is_empty());
    assert_eq!(
        ids(&collection, json!({"major": "Applied Mathematics"}), FindOptions::new()).await,
        [json!(2), json!(5)]
    );
}

#[tokio::test]
async fn test_update_many_failure_writes_nothing() {
    let collection = seeded_collection().await;
    collection
        .update_one(&doc(json!({"_id": 5})), &doc(json!({"$set": {"gpa": "n/a"}})), false)
        .await
        .unwrap();
    let err = collection
        .update_many(&doc(json!({})), &doc(json!({"$inc": {"gpa": 0.1}})), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::TypeMismatch { .. }));
    let alice = collection.get(&Value::Int(1)).await.unwrap();
    assert_eq!(alice.get("gpa").and_then(Value::as_f64), Some(3.8));
}

#[tokio::test]
async fn test_replace_one_and_save() {
    let collection = seeded_collection().await;
    let result = collection
        .replace_one(&doc(json!({"name": "Dan Brown"})), doc(json!({"name": "Daniel Brown"})), false)
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);
    let dan = collection.get(&Value::Int(4)).await.unwrap();
    assert_eq!(dan.to_json(), json!({"_id": 4, "name": "Daniel Brown"}));

    let err = collection
        .replace_one(&doc(json!({"_id": 4})), doc(json!({"$set": {"x": 1}})), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::InvalidArgument { .. }));

    let saved = collection
        .save(doc(json!({"_id": 4, "name": "Dan", "gpa": 3.0})))
        .await
        .unwrap();
    assert_eq!((saved.matched_count, saved.modified_count), (1, 1));
    let saved = collection.save(doc(json!({"_id": 40, "name": "Zed"}))).await.unwrap();
    assert_eq!(saved.upserted_id, Some(Value::Int(40)));
    let saved = collection.save(doc(json!({"name": "No Id"}))).await.unwrap();
    assert!(saved.upserted_id.is_some());
    assert_eq!(collection.document_count().await, 7);
}

#[tokio::test]
async fn test_delete_one_and_many() {
    let collection = seeded_collection().await;
    let one = collection
        .delete_one(&doc(json!({"major": "Physics"})))
        .await
        .unwrap();
    assert_eq!(one.deleted_count, 1);
    assert!(collection.get(&Value::Int(1)).await.is_none());

    let many = collection
        .delete_many(&doc(json!({"gpa": {"$gte": 3.0}})))
        .await
        .unwrap();
    assert_eq!(many.deleted_count, 3);
    assert_eq!(ids(&collection, json!({}), FindOptions::new()).await, [json!(4)]);

    let none = collection
        .delete_one(&doc(json!({"major": "Art"})))
        .await
        .unwrap();
    assert_eq!(none.deleted_count, 0);
}

#[tokio::test]
async fn test_distinct_flattens_arrays() {
    let collection = seeded_collection().await;
    let courses = collection.distinct("courses", None).await.unwrap();
    assert_eq!(
        courses,
        [
            Value::from("PHYS101"),
            Value::from("MATH201"),
            Value::from("MATH301"),
        ]
    );
    let majors = collection
        .distinct("major", Some(&doc(json!({"gpa": {"$gt": 3.0}}))))
        .await
        .unwrap();
    assert_eq!(majors, [Value::from("Physics"), Value::from("Mathematics")]);
    assert!(collection.distinct("missing", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_text_search_requires_text_index() {
    let collection = seeded_collection().await;
    let query = doc(json!({"$text": {"$search": "boston quantum"}}));
    let err = collection.count(&query).await.unwrap_err();
    assert!(matches!(err, CorvidError::InvalidArgument { .. }));

    collection
        .create_index(&doc(json!({"bio": "text"})), IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&collection, query.to_json(), FindOptions::new()).await, [json!(1), json!(2)]);
    // Only the indexed field is searched.
    assert_eq!(
        collection
            .count(&doc(json!({"$text": {"$search": "Carol"}})))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_unique_index_rejects_duplicates() {
    let collection = seeded_collection().await;
    let name = collection
        .create_index(
            &doc(json!({"name": 1})),
            IndexOptions {
                unique: true,
                ..IndexOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(name, "name_1");

    let err = collection
        .insert_one(doc(json!({"name": "Bob Smith"})))
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::DuplicateKey { ref index, .. } if index == "name_1"));

    let err = collection
        .update_one(&doc(json!({"_id": 3})), &doc(json!({"$set": {"name": "Alice Johnson"}})), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::DuplicateKey { .. }));
    let carol = collection.get(&Value::Int(3)).await.unwrap();
    assert_eq!(carol.get("name"), Some(&Value::from("Carol White")));
}

#[tokio::test]
async fn test_unique_index_over_existing_duplicates_fails() {
    let collection = seeded_collection().await;
    let err = collection
        .create_index(
            &doc(json!({"major": 1})),
            IndexOptions {
                unique: true,
                ..IndexOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::DuplicateKey { .. }));
    assert_eq!(collection.get_indexes().await.len(), 1);
}

#[tokio::test]
async fn test_index_lifecycle() {
    let collection = seeded_collection().await;
    let keys = doc(json!({"major": 1, "gpa": -1}));
    let name = collection
        .create_index(&keys, IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(name, "major_1_gpa_-1");
    assert_eq!(
        collection
            .create_index(&keys, IndexOptions::default())
            .await
            .unwrap(),
        name
    );

    let indexes: Vec<JsonValue> = collection
        .get_indexes()
        .await
        .iter()
        .map(Document::to_json)
        .collect();
    assert_eq!(indexes.len(), 2);
    assert_eq!(indexes[0]["name"], json!("_id_"));
    assert_eq!(indexes[1]["key"], json!({"major": 1, "gpa": -1}));

    assert!(collection.drop_index("_id_").await.is_err());
    assert!(collection.drop_index("nope").await.is_err());
    collection.drop_index(&name).await.unwrap();
    assert_eq!(collection.get_indexes().await.len(), 1);
}

#[tokio::test]
async fn test_indexes_do_not_change_results() {
    let plain = seeded_collection().await;
    let indexed = seeded_collection().await;
    indexed
        .create_index(&doc(json!({"major": 1, "gpa": -1})), IndexOptions::default())
        .await
        .unwrap();
    indexed
        .create_index(&doc(json!({"name": 1})), IndexOptions::default())
        .await
        .unwrap();
    indexed
        .create_index(&doc(json!({"courses": 1})), IndexOptions::default())
        .await
        .unwrap();

    let filters = [
        json!({"major": "Physics"}),
        json!({"major": "Physics", "gpa": {"$gt": 3.6}}),
        json!({"major": {"$in": ["Physics", "Chemistry"]}}),
        json!({"name": {"$regex": "^B"}}),
        json!({"name": {"$gte": "Bob", "$lt": "Dan"}}),
        json!({"major": "Mathematics", "gpa": {"$lte": 3.2}}),
        json!({"$or": [{"major": "Chemistry"}, {"gpa": {"$gt": 3.85}}]}),
        json!({"major": {"$exists": false}}),
        json!({"courses": "PHYS101"}),
        json!({"courses": {"$gt": "MATH250", "$lt": "MATH205"}}),
        json!({"courses": {"$gte": "MATH300", "$lte": "PHYS000"}}),
        json!({"courses": {"$size": 0}}),
    ];
    for filter in filters {
        assert_eq!(
            ids(&plain, filter.clone(), FindOptions::new()).await,
            ids(&indexed, filter.clone(), FindOptions::new()).await,
            "filter {}",
            filter
        );
    }

    // Indexes are maintained through writes.
    for collection in [&plain, &indexed] {
        collection
            .update_one(&doc(json!({"_id": 4})), &doc(json!({"$set": {"major": "Physics"}})), false)
            .await
            .unwrap();
        collection.delete_one(&doc(json!({"_id": 1}))).await.unwrap();
    }
    assert_eq!(
        ids(&indexed, json!({"major": "Physics"}), FindOptions::new()).await,
        [json!(3), json!(4)]
    );
    assert_eq!(
        ids(&plain, json!({"major": "Physics"}), FindOptions::new()).await,
        ids(&indexed, json!({"major": "Physics"}), FindOptions::new()).await
    );
}

#[tokio::test]
async fn test_aggregate_match_group_sort() {
    let collection = seeded_collection().await;
    let stages = [
        doc(json!({"$match": {"gpa": {"$gte": 3.0}}})),
        doc(json!({"$group": {"_id": "$major", "count": {"$sum": 1}, "best": {"$max": "$gpa"}}})),
        doc(json!({"$sort": {"count": -1, "_id": 1}})),
    ];
    let output: Vec<JsonValue> = collection
        .aggregate(&stages)
        .await
        .unwrap()
        .iter()
        .map(Document::to_json)
        .collect();
    assert_eq!(
        output,
        [
            json!({"_id": "Mathematics", "count": 2, "best": 3.9}),
            json!({"_id": "Physics", "count": 2, "best": 3.8}),
        ]
    );
}

#[tokio::test]
async fn test_aggregate_rejects_unknown_stage() {
    let collection = seeded_collection().await;
    let err = collection
        .aggregate(&[doc(json!({"$lookup": {}}))])
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::UnsupportedStage { ref stage } if stage == "$lookup"));
}

#[tokio::test]
async fn test_aggregate_honours_cancellation() {
    let collection = seeded_collection().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = collection
        .aggregate_with_cancel(&[doc(json!({"$match": {}}))], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CorvidError::Cancelled { .. }));
}

#[tokio::test]
async fn test_bulk_write_isolates_failures() {
    let collection = seeded_collection().await;
    let requests = vec![
        WriteModel::from_json(json!({"insertOne": {"document": {"_id": 6, "name": "Grace Lee"}}})).unwrap(),
        WriteModel::from_json(json!({"updateOne": {"filter": {"_id": 2}, "update": {"$inc": {"name": 1}}}})).unwrap(),
        WriteModel::from_json(json!({"deleteOne": {"filter": {"_id": 4}}})).unwrap(),
    ];
    let result = collection.bulk_write(requests, BulkOptions::default()).await;

    assert!(!result.is_success());
    let failures: Vec<usize> = result.failures().map(|(index, _)| index).collect();
    assert_eq!(failures, [1]);
    assert!(matches!(
        result.failures().next(),
        Some((_, &CorvidError::TypeMismatch { .. }))
    ));
    assert_eq!((result.inserted_count, result.deleted_count), (1, 1));
    assert!(collection.get(&Value::Int(6)).await.is_some());
    assert!(collection.get(&Value::Int(4)).await.is_none());
    let bob = collection.get(&Value::Int(2)).await.unwrap();
    assert_eq!(bob.get("name"), Some(&Value::from("Bob Smith")));
}

#[tokio::test]
async fn test_ordered_bulk_write_stops_at_first_failure() {
    let collection = seeded_collection().await;
    let requests = vec![
        WriteModel::from_json(json!({"insertOne": {"document": {"_id": 1}}})).unwrap(),
        WriteModel::from_json(json!({"deleteMany": {"filter": {}}})).unwrap(),
    ];
    let result = collection
        .bulk_write(
            requests,
            BulkOptions {
                ordered: true,
            },
        )
        .await;
    assert_eq!(result.items.len(), 2);
    assert!(matches!(result.items[0].status, BulkItemStatus::Failed(CorvidError::DuplicateKey { .. })));
    assert!(matches!(result.items[1].status, BulkItemStatus::NotExecuted));
    assert_eq!(collection.document_count().await, 5);
}

#[tokio::test]
async fn test_concurrent_inserts() {
    let collection = Arc::new(setup_collection().await);
    let mut handles = Vec::new();
    for worker in 0 .. 8 {
        let collection = Arc::clone(&collection);
        handles.push(tokio::spawn(async move {
            for n in 0 .. 25 {
                collection
                    .insert_one(doc(json!({"worker": worker, "n": n})))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(collection.document_count().await, 200);
    assert_eq!(collection.count(&doc(json!({"worker": 3}))).await.unwrap(), 25);
}
