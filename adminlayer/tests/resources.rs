mod common;

use adminlayer::{
    bson::{Bson, Uuid, doc},
    prelude::*,
};
use common::{RecordingDriver, missing, references, seeded, store, store_with};

#[tokio::test]
async fn test_list_filters_through_belongs_to_chain() {
    let (driver, _) = seeded().await;
    let store = store(driver);

    let page = store
        .resource("orders")
        .unwrap()
        .list(
            &ListRequest::new()
                .condition(Condition::equal("customer.company.name", "Acme"))
                .sort(SortSpec::parse("reference")),
        )
        .await
        .unwrap();

    assert_eq!(references(&page), vec!["A-1", "A-2", "A-3"]);
    assert_eq!(page.count(), 3);
    assert!(page.records.iter().all(|record| record.get("__customer").is_none()));
}

#[tokio::test]
async fn test_has_many_filter_does_not_duplicate_parents() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);

    let page = store
        .resource("customers")
        .unwrap()
        .list(&ListRequest::new().condition(Condition::equal("orders.status", "open")))
        .await
        .unwrap();

    assert_eq!(page.count(), 1);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].id(), fixture.ada);
}

#[tokio::test]
async fn test_compilation_is_deterministic() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let request = ListRequest::new()
        .condition(Condition::and([
            Condition::equal("customer.company.name", "Acme"),
            Condition::or([Condition::greater_than("total", 5), Condition::blank("reference")]),
        ]))
        .sort(SortSpec::parse("-customer.name"));

    let first = store.compiler().compile("orders", &request).unwrap();
    let second = store.compiler().compile("orders", &request).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_relation_depth_fails_before_storage() {
    let (driver, _) = seeded().await;
    let driver = RecordingDriver::new(driver);
    let store = store_with(driver.clone(), AdapterConfig::builder().max_relation_depth(1).build());

    let result = store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().condition(Condition::equal("customer.company.name", "Acme")))
        .await;

    assert!(matches!(result, Err(AdapterError::RelationDepth { hops: 2, max: 1, .. })));
    assert_eq!(driver.calls(), 0);
}

#[tokio::test]
async fn test_unknown_field_fails_before_storage() {
    let (driver, _) = seeded().await;
    let driver = RecordingDriver::new(driver);
    let store = store(driver.clone());

    let result = store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().condition(Condition::equal("colour", "red")))
        .await;

    assert!(matches!(result, Err(AdapterError::Schema(_))));
    assert_eq!(driver.calls(), 0);
}

#[tokio::test]
async fn test_empty_branches() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let orders = store.resource("orders").unwrap();

    let everything = orders.list(&ListRequest::new().condition(Condition::and(Vec::new()))).await.unwrap();
    let nothing = orders.list(&ListRequest::new().condition(Condition::or(Vec::new()))).await.unwrap();

    assert_eq!(everything.count(), 4);
    assert_eq!(nothing.count(), 0);
    assert!(nothing.records.is_empty());
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let (driver, _) = seeded().await;
    let store = store_with(driver, AdapterConfig::builder().max_page_size(2).build());

    let page = store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().page(PageSpec::new(0, 50)))
        .await
        .unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.count(), 4);
}

#[tokio::test]
async fn test_sort_and_window() {
    let (driver, _) = seeded().await;
    let store = store(driver);

    let page = store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().sort(SortSpec::parse("-total")).page(PageSpec::from_page(2, 2)))
        .await
        .unwrap();

    assert_eq!(references(&page), vec!["A-1", "A-3"]);
}

#[tokio::test]
async fn test_sort_by_related_field() {
    let (driver, _) = seeded().await;
    let store = store(driver);

    let page = store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().sort(SortSpec::descending("customer.name")))
        .await
        .unwrap();

    assert_eq!(references(&page)[0], "G-1");
}

#[tokio::test]
async fn test_search_and_segment() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let orders = store.resource("orders").unwrap();

    let found = orders
        .list(&ListRequest::new().filter(FilterRequest::new().search("g-1")))
        .await
        .unwrap();
    assert_eq!(references(&found), vec!["G-1"]);
    assert_eq!(found.records[0].search_matches(), ["reference"]);

    let by_total = orders
        .list(&ListRequest::new().filter(FilterRequest::new().search(" 40 ")))
        .await
        .unwrap();
    assert_eq!(references(&by_total), vec!["G-1"]);
    assert_eq!(by_total.records[0].search_matches(), ["total"]);
    assert_eq!(by_total.records[0].to_json().unwrap()["search_matches"], serde_json::json!(["total"]));

    let unsearched = orders.list(&ListRequest::new()).await.unwrap();
    assert!(unsearched.records.iter().all(|record| record.search_matches().is_empty()));

    let open = orders
        .list(&ListRequest::new().filter(FilterRequest::new().segment("open")).sort(SortSpec::parse("reference")))
        .await
        .unwrap();
    assert_eq!(references(&open), vec!["A-1", "A-2"]);

    let unknown = orders
        .list(&ListRequest::new().filter(FilterRequest::new().segment("archived")))
        .await;
    assert!(matches!(unknown, Err(AdapterError::Schema(_))));
}

#[tokio::test]
async fn test_projection_and_hydration() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);

    let page = store
        .resource("customers")
        .unwrap()
        .list(
            &ListRequest::new()
                .condition(Condition::equal("name", "Ada"))
                .fields(["company"])
                .hydrate(true),
        )
        .await
        .unwrap();

    let ada = &page.records[0];
    assert_eq!(ada.id(), fixture.ada);
    assert!(ada.get("name").is_none());
    assert_eq!(ada.related("company").unwrap().get_str("name").unwrap(), "Acme");
}

#[tokio::test]
async fn test_get() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);
    let customers = store.resource("customers").unwrap();

    let grace = customers.get(fixture.grace).await.unwrap();
    assert_eq!(grace.get("name"), Some(&Bson::from("Grace")));
    assert_eq!(grace.related("company").unwrap().get_str("name").unwrap(), "Globex");

    let unknown = customers.get(missing()).await;
    assert!(matches!(unknown, Err(AdapterError::NotFound(_, _))));
}

#[tokio::test]
async fn test_create_rejects_unknown_fields_and_persists_nothing() {
    let (driver, _) = seeded().await;
    let store = store(driver.clone());

    let result = store
        .resource("orders")
        .unwrap()
        .create(doc! { "reference": "X-1", "colour": "red" })
        .await;

    assert!(matches!(result, Err(AdapterError::Validation(_))));
    assert_eq!(driver.len("orders").await, 4);
}

#[tokio::test]
async fn test_create_generates_ids_and_coerces() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);
    let orders = store.resource("orders").unwrap();

    let created = orders
        .create(doc! {
            "reference": "X-1",
            "total": "12.5",
            "customer": fixture.linus.to_string(),
            "items": [ { "sku": "S-1", "quantity": 1 } ],
        })
        .await
        .unwrap();

    assert_eq!(created.id().kind(), IdKind::ObjectId);
    let fetched = orders.get(created.id()).await.unwrap();
    assert_eq!(fetched.get("total"), Some(&Bson::Double(12.5)));
    assert_eq!(fetched.related("customer").unwrap().get_str("name").unwrap(), "Linus");
    let items = fetched.get("items").and_then(Bson::as_array).unwrap();
    assert!(items[0].as_document().unwrap().get_object_id("_id").is_ok());

    let invalid = orders.create(doc! { "status": "archived" }).await;
    assert!(matches!(invalid, Err(AdapterError::Validation(_))));
}

#[tokio::test]
async fn test_update_is_partial() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);
    let customers = store.resource("customers").unwrap();

    let updated = customers.update(fixture.ada, doc! { "name": "Ada L." }).await.unwrap();
    assert_eq!(updated.get("name"), Some(&Bson::from("Ada L.")));
    assert_eq!(updated.get("company"), Some(&Bson::from(fixture.acme)));

    let unknown = customers.update(missing(), doc! { "name": "Nobody" }).await;
    assert!(matches!(unknown, Err(AdapterError::NotFound(_, _))));
}

#[tokio::test]
async fn test_update_embedded_replaces_one_element() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let orders = store.resource("orders").unwrap();
    let (first, second) = (Uuid::new(), Uuid::new());

    let order = orders
        .create(doc! { "reference": "E-1", "items": [
            { "_id": first, "sku": "S-1", "quantity": 1 },
            { "_id": second, "sku": "S-2", "quantity": 2 },
        ] })
        .await
        .unwrap();

    let updated = orders
        .update_embedded(order.id(), "items", second, doc! { "sku": "S-2", "quantity": 5 })
        .await
        .unwrap();

    let items = updated.get("items").and_then(Bson::as_array).unwrap();
    assert_eq!(items[0], Bson::Document(doc! { "_id": first, "sku": "S-1", "quantity": 1 }));
    assert_eq!(items[1], Bson::Document(doc! { "sku": "S-2", "quantity": 5, "_id": second }));

    let missing = orders
        .update_embedded(order.id(), "items", Uuid::new(), doc! { "sku": "S-3" })
        .await;
    assert!(matches!(missing, Err(AdapterError::NotFound(_, _))));
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);
    let customers = store.resource("customers").unwrap();

    assert_eq!(customers.remove([fixture.linus]).await.unwrap(), 1);
    assert_eq!(customers.remove([fixture.linus]).await.unwrap(), 0);
    assert_eq!(customers.remove(Vec::<RecordId>::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_uuid_keyed_collection() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let tags = store.resource("tags").unwrap();

    let urgent = tags.create(doc! { "label": "urgent" }).await.unwrap();
    let RecordId::Uuid(id) = urgent.id() else {
        panic!("tags are keyed by UUID, got {}", urgent.id());
    };

    let fetched = tags.get(id).await.unwrap();
    assert_eq!(fetched.get("label"), Some(&Bson::from("urgent")));
    let by_text = tags.get(RecordId::parse_str(&id.to_string()).unwrap()).await.unwrap();
    assert_eq!(by_text.id(), id);

    let page = tags
        .list(&ListRequest::new().condition(Condition::equal("label", "urgent")))
        .await
        .unwrap();
    assert_eq!(page.records[0].id(), urgent.id());
    assert_eq!(tags.remove([id]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_storage_errors_carry_context() {
    let (driver, fixture) = seeded().await;
    let store = store(RecordingDriver::failing_after(driver, 0));

    let listed = store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().condition(Condition::equal("status", "open")))
        .await;
    let Err(AdapterError::Storage { operation, collection, params, .. }) = listed else {
        panic!("expected a storage error, got {listed:?}");
    };
    assert_eq!((operation, collection.as_str()), ("find", "orders"));
    assert!(params.contains("filter") && params.contains("open"), "{params}");

    let updated = store
        .resource("customers")
        .unwrap()
        .update(fixture.ada, doc! { "name": "Ada L." })
        .await;
    let Err(AdapterError::Storage { operation, collection, params, .. }) = updated else {
        panic!("expected a storage error, got {updated:?}");
    };
    assert_eq!((operation, collection.as_str()), ("update_one", "customers"));
    assert!(params.contains("$set") && params.contains("Ada L."), "{params}");
}

#[tokio::test]
async fn test_embedded_shapes_are_not_resources() {
    let (driver, _) = seeded().await;
    let store = store(driver);

    assert!(matches!(store.resource("orders.items"), Err(AdapterError::Schema(_))));
    assert!(matches!(store.resource("invoices"), Err(AdapterError::Schema(_))));
}

#[tokio::test]
async fn test_list_from_wire_request() {
    let (driver, _) = seeded().await;
    let store = store(driver);

    let request: ListRequest = serde_json::from_value(serde_json::json!({
        "filter": {
            "condition": {
                "aggregator": "or",
                "conditions": [
                    { "field": "status", "operator": "equal", "value": "closed" },
                    { "field": "customer.name", "operator": "starts_with", "value": "Gr" }
                ]
            }
        },
        "sort": { "field": "reference", "direction": "ascending" }
    }))
    .unwrap();

    let page = store.resource("orders").unwrap().list(&request).await.unwrap();

    assert_eq!(references(&page), vec!["A-3", "G-1"]);
}
