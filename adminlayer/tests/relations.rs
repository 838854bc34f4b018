mod common;

use adminlayer::{
    bson::{Bson, doc},
    memory::InMemoryDriver,
    prelude::*,
};
use common::{missing, references, seeded, store, store_with};

async fn order_id<D: StoreDriver>(store: &AdminStore<D>, reference: &str) -> RecordId {
    store
        .resource("orders")
        .unwrap()
        .list(&ListRequest::new().condition(Condition::equal("reference", reference)))
        .await
        .unwrap()
        .records[0]
        .id()
}

async fn create_tag<D: StoreDriver>(store: &AdminStore<D>, label: &str) -> RecordId {
    store
        .resource("tags")
        .unwrap()
        .create(doc! { "label": label })
        .await
        .unwrap()
        .id()
}

#[tokio::test]
async fn test_has_many_list_is_scoped_to_parent() {
    let (driver, fixture) = seeded().await;
    let store = store(driver);
    let orders = store.has_many("customers", "orders").unwrap();

    let all = orders
        .list(fixture.ada, &ListRequest::new().sort(SortSpec::parse("reference")))
        .await
        .unwrap();
    assert_eq!(references(&all), vec!["A-1", "A-2", "A-3"]);

    let open = orders
        .list(fixture.ada, &ListRequest::new().condition(Condition::equal("status", "open")))
        .await
        .unwrap();
    assert_eq!(open.count(), 2);

    let none = orders.list(fixture.linus, &ListRequest::new()).await.unwrap();
    assert_eq!(none.count(), 0);

    let unknown = orders.list(missing(), &ListRequest::new()).await;
    assert!(matches!(unknown, Err(AdapterError::NotFound(_, _))));
}

#[tokio::test]
async fn test_foreign_key_associate_and_unlink() {
    let (driver, fixture) = seeded().await;
    let store = store(driver.clone());
    let orders = store.has_many("customers", "orders").unwrap();
    let g1 = order_id(&store, "G-1").await;

    orders.associate(fixture.linus, [g1]).await.unwrap();
    let linus = orders.list(fixture.linus, &ListRequest::new()).await.unwrap();
    assert_eq!(references(&linus), vec!["G-1"]);

    let unlinked = orders.dissociate(fixture.linus, [g1], DissociateMode::Unlink).await.unwrap();
    assert_eq!(unlinked, 1);
    assert_eq!(orders.list(fixture.linus, &ListRequest::new()).await.unwrap().count(), 0);
    assert_eq!(driver.len("orders").await, 4);

    let order = store.resource("orders").unwrap().get(g1).await.unwrap();
    assert!(order.get("customer").is_none());
}

#[tokio::test]
async fn test_foreign_key_delete_requires_linked_children() {
    let (driver, fixture) = seeded().await;
    let store = store(driver.clone());
    let orders = store.has_many("customers", "orders").unwrap();
    let (a1, g1) = (order_id(&store, "A-1").await, order_id(&store, "G-1").await);

    let result = orders.dissociate(fixture.ada, [a1, g1], DissociateMode::Delete).await;
    assert!(matches!(result, Err(AdapterError::Conflict(message)) if message.contains(&g1.to_string())));
    assert_eq!(driver.len("orders").await, 4);

    let deleted = orders.dissociate(fixture.ada, [a1], DissociateMode::Delete).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(driver.len("orders").await, 3);
}

#[tokio::test]
async fn test_associate_twice_keeps_one_link() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let a1 = order_id(&store, "A-1").await;
    let urgent = create_tag(&store, "urgent").await;
    let tags = store.has_many("orders", "tags").unwrap();

    tags.associate(a1, [urgent]).await.unwrap();
    tags.associate(a1, [urgent, urgent]).await.unwrap();

    let order = store.resource("orders").unwrap().get(a1).await.unwrap();
    assert_eq!(order.get("tags"), Some(&Bson::Array(vec![Bson::from(urgent)])));
    assert_eq!((a1.kind(), urgent.kind()), (IdKind::ObjectId, IdKind::Uuid));

    let tag = store.resource("tags").unwrap().get(urgent).await.unwrap();
    assert_eq!(tag.get("order"), Some(&Bson::from(a1)));

    let linked = tags.list(a1, &ListRequest::new()).await.unwrap();
    assert_eq!(linked.count(), 1);
}

#[tokio::test]
async fn test_associate_missing_records_conflicts() {
    let (driver, _) = seeded().await;
    let store = store(driver);
    let a1 = order_id(&store, "A-1").await;
    let urgent = create_tag(&store, "urgent").await;
    let tags = store.has_many("orders", "tags").unwrap();

    let missing_child = tags.associate(a1, [urgent, missing()]).await;
    assert!(matches!(missing_child, Err(AdapterError::Conflict(_))));

    let missing_parent = tags.associate(missing(), [urgent]).await;
    assert!(matches!(missing_parent, Err(AdapterError::Conflict(_))));

    let order = store.resource("orders").unwrap().get(a1).await.unwrap();
    assert!(order.get("tags").is_none());
}

#[tokio::test]
async fn test_dissociate_missing_records_conflicts() {
    let (driver, fixture) = seeded().await;
    let store = store(driver.clone());
    let a1 = order_id(&store, "A-1").await;
    let (urgent, gift) = (create_tag(&store, "urgent").await, create_tag(&store, "gift").await);
    let tags = store.has_many("orders", "tags").unwrap();
    tags.associate(a1, [urgent]).await.unwrap();

    for mode in [DissociateMode::Unlink, DissociateMode::Delete] {
        let missing_child = tags.dissociate(a1, [urgent, missing()], mode).await;
        assert!(matches!(missing_child, Err(AdapterError::Conflict(_))));

        let unlinked_child = tags.dissociate(a1, [gift], mode).await;
        assert!(matches!(unlinked_child, Err(AdapterError::Conflict(_))));

        let missing_parent = tags.dissociate(missing(), [urgent], mode).await;
        assert!(matches!(missing_parent, Err(AdapterError::Conflict(_))));
    }

    let order = store.resource("orders").unwrap().get(a1).await.unwrap();
    assert_eq!(order.get("tags"), Some(&Bson::Array(vec![Bson::from(urgent)])));
    assert_eq!(driver.len("tags").await, 2);

    tags.associate(a1, [gift]).await.unwrap();
    assert_eq!(store.resource("tags").unwrap().remove([gift]).await.unwrap(), 1);
    let deleted_child = tags.dissociate(a1, [gift], DissociateMode::Unlink).await;
    assert!(matches!(deleted_child, Err(AdapterError::Conflict(_))));

    let orders = store.has_many("customers", "orders").unwrap();
    let missing_order = orders.dissociate(fixture.ada, [missing()], DissociateMode::Unlink).await;
    assert!(matches!(missing_order, Err(AdapterError::Conflict(_))));
    let missing_customer = orders.dissociate(missing(), [a1], DissociateMode::Unlink).await;
    assert!(matches!(missing_customer, Err(AdapterError::Conflict(_))));
    assert_eq!(orders.list(fixture.ada, &ListRequest::new()).await.unwrap().count(), 3);
}

#[tokio::test]
async fn test_unlink_keeps_child_and_back_reference() {
    let (driver, _) = seeded().await;
    let store = store(driver.clone());
    let a1 = order_id(&store, "A-1").await;
    let (urgent, gift) = (create_tag(&store, "urgent").await, create_tag(&store, "gift").await);
    let tags = store.has_many("orders", "tags").unwrap();
    tags.associate(a1, [urgent, gift]).await.unwrap();

    let removed = tags.dissociate(a1, [urgent], DissociateMode::Unlink).await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(driver.len("tags").await, 2);
    let order = store.resource("orders").unwrap().get(a1).await.unwrap();
    assert_eq!(order.get("tags"), Some(&Bson::Array(vec![Bson::from(gift)])));
    let tag = store.resource("tags").unwrap().get(urgent).await.unwrap();
    assert_eq!(tag.get("order"), Some(&Bson::from(a1)));
}

#[tokio::test]
async fn test_unlink_clears_back_reference_when_configured() {
    let (driver, _) = seeded().await;
    let store = store_with(driver, AdapterConfig::builder().clear_back_reference_on_dissociate(true).build());
    let a1 = order_id(&store, "A-1").await;
    let urgent = create_tag(&store, "urgent").await;
    let tags = store.has_many("orders", "tags").unwrap();
    tags.associate(a1, [urgent]).await.unwrap();

    tags.dissociate(a1, [urgent], DissociateMode::Unlink).await.unwrap();

    let tag = store.resource("tags").unwrap().get(urgent).await.unwrap();
    assert!(tag.get("order").is_none());
}

#[tokio::test]
async fn test_delete_removes_children() {
    let (driver, _) = seeded().await;
    let store = store(driver.clone());
    let a1 = order_id(&store, "A-1").await;
    let (urgent, gift) = (create_tag(&store, "urgent").await, create_tag(&store, "gift").await);
    let tags = store.has_many("orders", "tags").unwrap();
    tags.associate(a1, [urgent, gift]).await.unwrap();

    let deleted = tags.dissociate(a1, [urgent], DissociateMode::Delete).await.unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(driver.len("tags").await, 1);
    let order = store.resource("orders").unwrap().get(a1).await.unwrap();
    assert_eq!(order.get("tags"), Some(&Bson::Array(vec![Bson::from(gift)])));
}

#[tokio::test]
async fn test_belongs_to_set_and_clear() {
    let (driver, fixture) = seeded().await;
    let store = store(driver.clone());
    let company = store.belongs_to("customers", "company").unwrap();

    let linus = company.update(fixture.linus, Some(fixture.acme)).await.unwrap();
    assert_eq!(linus.get("company"), Some(&Bson::from(fixture.acme)));

    let linus = company.update(fixture.linus, None).await.unwrap();
    assert_eq!(linus.get("company"), Some(&Bson::Null));
    assert_eq!(driver.len("companies").await, 2);

    let missing_target = company.update(fixture.linus, Some(missing())).await;
    assert!(matches!(missing_target, Err(AdapterError::Conflict(_))));

    let missing_record = company.update(missing(), Some(fixture.acme)).await;
    assert!(matches!(missing_record, Err(AdapterError::NotFound(_, _))));
}

#[tokio::test]
async fn test_relation_services_check_field_kinds() {
    let store = store(InMemoryDriver::new());

    assert!(matches!(store.has_many("customers", "company"), Err(AdapterError::Schema(_))));
    assert!(matches!(store.belongs_to("customers", "orders"), Err(AdapterError::Schema(_))));
    assert!(matches!(store.has_many("customers", "invoices"), Err(AdapterError::Schema(_))));
}
