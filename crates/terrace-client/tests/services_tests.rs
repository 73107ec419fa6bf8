//! Services layer against a mock endpoint: schema discovery, queries,
//! saves, and operations.

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use terrace_client::{ConnectorBuilder, JsonFileStorage, Services};
use terrace_meta::{Oid, Order, Paging, Query};

fn meta_body() -> serde_json::Value {
    json!({
        "assetTypes": [
            {
                "name": "Workitem",
                "attributes": [
                    {"name": "Name", "kind": "text"},
                    {"name": "Scope", "kind": "relation"},
                    {"name": "AssetState", "kind": "numeric", "readOnly": true}
                ],
                "operations": ["Delete"]
            },
            {
                "name": "Story",
                "base": "Workitem",
                "attributes": [
                    {"name": "Estimate", "kind": "numeric"},
                    {"name": "Owners", "kind": "relation", "multiValued": true}
                ],
                "operations": ["Inactivate"]
            },
            {
                "name": "Scope",
                "attributes": [{"name": "Name", "kind": "text"}]
            },
            {
                "name": "Member",
                "attributes": [{"name": "Name", "kind": "text"}]
            }
        ]
    })
}

async fn services_for(server: &MockServer) -> Services {
    Mock::given(method("GET"))
        .and(path("/meta/model"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meta_body()))
        .expect(1)
        .mount(server)
        .await;

    let connector = ConnectorBuilder::new(server.uri())
        .credentials("admin", "admin")
        .secret_storage(JsonFileStorage::new("/nonexistent/client_secrets.json"))
        .build()
        .unwrap();
    Services::new(connector)
}

#[tokio::test]
async fn meta_model_is_fetched_once() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;

    let first = services.meta().await.unwrap();
    let second = services.meta().await.unwrap();
    assert!(first.has_asset_type("Story"));
    assert!(second.has_asset_type("Member"));
    // The mounted mock expects exactly one hit.
}

#[tokio::test]
async fn retrieve_materializes_only_selected_attributes() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let member = meta.get_asset_type("Member").unwrap();
    let name = member.get_attribute_definition("Name").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/query"))
        .and(body_json(json!({"oid": "Member:20", "select": ["Name"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "assets": [{
                "oid": "Member:20",
                "attributes": {"Name": {"value": "Jerry"}}
            }]
        })))
        .mount(&server)
        .await;

    let result = services
        .retrieve(&Query::for_oid(Oid::new("Member", 20)).select(name.clone()))
        .await
        .unwrap();

    assert_eq!(result.total, Some(1));
    let asset = &result.assets[0];
    assert_eq!(asset.oid(), Some(&Oid::new("Member", 20)));
    let loaded = asset.get_attribute(&name).unwrap();
    assert_eq!(loaded.value().as_text(), Some("Jerry"));
}

#[tokio::test]
async fn retrieve_pages_and_reports_total() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();
    let name = story.get_attribute_definition("Name").unwrap();
    let estimate = story.get_attribute_definition("Estimate").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 6,
            "assets": [
                {"oid": "Story:1", "attributes": {"Name": {"value": "a"}, "Estimate": {"value": 1}}},
                {"oid": "Story:2", "attributes": {"Name": {"value": "b"}, "Estimate": {"value": 2}}},
                {"oid": "Story:3", "attributes": {"Name": {"value": "c"}, "Estimate": {"value": 3}}}
            ]
        })))
        .mount(&server)
        .await;

    let result = services
        .retrieve(
            &Query::for_type(story)
                .select(name)
                .select(estimate.clone())
                .order_by(estimate, Order::Ascending)
                .page(Paging::new(0, 3)),
        )
        .await
        .unwrap();

    assert_eq!(result.assets.len(), 3);
    assert_eq!(result.total, Some(6));
}

#[tokio::test]
async fn retrieve_materializes_multi_valued_relations() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();
    let owners = story.get_attribute_definition("Owners").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "assets": [{
                "oid": "Story:1042",
                "attributes": {"Owners": {"values": ["Member:20", "Member:21"]}}
            }]
        })))
        .mount(&server)
        .await;

    let result = services
        .retrieve(&Query::for_oid(Oid::new("Story", 1042)).select(owners.clone()))
        .await
        .unwrap();

    let loaded = result.assets[0].get_attribute(&owners).unwrap();
    let tokens: Vec<String> = loaded
        .values()
        .iter()
        .map(|v| v.as_oid().unwrap().token())
        .collect();
    assert_eq!(tokens, vec!["Member:20", "Member:21"]);
}

#[tokio::test]
async fn save_new_asset_learns_its_oid() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();
    let name = story.get_attribute_definition("Name").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/assets"))
        .and(body_json(json!({
            "assetType": "Story",
            "container": "Scope:0",
            "attributes": {"Name": {"set": "New story"}}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"oid": "Story:1042:563"})),
        )
        .mount(&server)
        .await;

    let mut asset = services
        .new_asset("Story", Some(Oid::new("Scope", 0)))
        .await
        .unwrap();
    asset.set_attribute_value(&name, "New story").unwrap();
    services.save(&mut asset).await.unwrap();

    assert_eq!(asset.oid(), Some(&Oid::with_moment("Story", 1042, 563)));
    assert!(!asset.has_changes());
}

#[tokio::test]
async fn save_against_stale_version_is_a_conflict() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();
    let name = story.get_attribute_definition("Name").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/assets/Story:1042:500"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let mut asset = terrace_meta::Asset::loaded(
        Oid::with_moment("Story", 1042, 500),
        story,
    );
    asset.set_attribute_value(&name, "Renamed").unwrap();

    let err = services.save(&mut asset).await.unwrap_err();
    assert!(err.is_conflict());
    // Buffered changes survive the failed save.
    assert!(asset.has_changes());
}

#[tokio::test]
async fn save_without_changes_is_a_no_op() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();

    // No data mock mounted: a request would fail the test.
    let mut asset = terrace_meta::Asset::loaded(Oid::with_moment("Story", 1042, 500), story);
    services.save(&mut asset).await.unwrap();
}

#[tokio::test]
async fn operations_address_the_momentless_oid() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let delete = meta.get_operation("Story.Delete").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/assets/Story:1042/op/Delete"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"oid": "Story:1042:564"})),
        )
        .mount(&server)
        .await;

    // Version-stamped input; the request path drops the moment.
    let after = services
        .execute_operation(&delete, &Oid::with_moment("Story", 1042, 563))
        .await
        .unwrap();
    assert_eq!(after, Oid::with_moment("Story", 1042, 564));
}

#[tokio::test]
async fn operation_on_unrelated_type_is_rejected_locally() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let inactivate = meta.get_operation("Story.Inactivate").unwrap();

    let err = services
        .execute_operation(&inactivate, &Oid::new("Member", 20))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        terrace_client::Error::Schema(terrace_meta::MetaError::UnknownOperation { .. })
    ));
}

#[tokio::test]
async fn deleted_asset_is_not_found_by_momentless_retrieve() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();
    let name = story.get_attribute_definition("Name").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/query"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = services
        .retrieve(&Query::for_oid(Oid::new("Story", 1042)).select(name))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn history_query_returns_one_asset_per_version() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let story = meta.get_asset_type("Story").unwrap();
    let name = story.get_attribute_definition("Name").unwrap();

    Mock::given(method("POST"))
        .and(path("/data/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "assets": [
                {"oid": "Story:1042:561", "attributes": {"Name": {"value": "v1"}}},
                {"oid": "Story:1042:562", "attributes": {"Name": {"value": "v2"}}},
                {"oid": "Story:1042:563", "attributes": {"Name": {"value": "v3"}}}
            ]
        })))
        .mount(&server)
        .await;

    let result = services
        .retrieve(
            &Query::for_oid(Oid::new("Story", 1042))
                .select(name)
                .with_history(),
        )
        .await
        .unwrap();

    assert_eq!(result.assets.len(), 3);
    let oids: Vec<&Oid> = result.assets.iter().filter_map(|a| a.oid()).collect();
    // Every version shares the momentless identity but carries its own
    // moment.
    assert!(oids.iter().all(|o| o.momentless() == Oid::new("Story", 1042)));
    let moments: Vec<_> = oids.iter().map(|o| o.moment()).collect();
    assert_eq!(moments, vec![Some(561), Some(562), Some(563)]);
}

#[tokio::test]
async fn subtype_results_resolve_inherited_attributes() {
    let server = MockServer::start().await;
    let services = services_for(&server).await;
    let meta = services.meta().await.unwrap();
    let workitem = meta.get_asset_type("Workitem").unwrap();
    let name = workitem.get_attribute_definition("Name").unwrap();

    // Querying the base type returns concrete subtype rows.
    Mock::given(method("POST"))
        .and(path("/data/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "assets": [{
                "oid": "Story:1042",
                "attributes": {"Name": {"value": "inherited"}}
            }]
        })))
        .mount(&server)
        .await;

    let result = services
        .retrieve(&Query::for_type(workitem).select(name.clone()))
        .await
        .unwrap();

    let asset = &result.assets[0];
    assert_eq!(asset.asset_type().name(), "Story");
    let loaded = asset.get_attribute(&name).unwrap();
    assert_eq!(loaded.value().as_text(), Some("inherited"));
}
