mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{
    FakeBackends, Handler, TestFixture, objects_relation, owner_relation, users,
};
use stitchery::{GraphQLRequest, RequestContext};

#[tokio::test]
async fn one_relations_resolve_through_the_target_schema() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute("{ objects(where: { owner_id: 1 }) { id name owner { id name } } }")
        .await;

    assert_eq!(
        response,
        json!({
            "data": {
                "objects": [
                    { "id": 10, "name": "Laptop", "owner": { "id": 1, "name": "Alice" } },
                    { "id": 11, "name": "Keyboard", "owner": { "id": 1, "name": "Alice" } },
                ]
            }
        })
    );

    let calls = fixture.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].service, "objectservice");
    assert_eq!(calls[0].query_name, "objects");
    // The stitched field is stripped from the delegated selection and the
    // connecting key is injected in its place.
    assert_eq!(calls[0].selection, "{ id name owner_id }");
    assert_eq!(calls[1].service, "userservice");
    assert_eq!(calls[1].query_name, "user");
    assert_eq!(calls[1].args, json!({ "where": { "id": 1 } }));
    assert_eq!(calls[1].selection, "{ id name }");
}

#[tokio::test]
async fn many_relations_filter_by_the_parent_key() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute("{ user(where: { id: 1 }) { id name objects { id } } }")
        .await;

    assert_eq!(
        response,
        json!({
            "data": {
                "user": {
                    "id": 1,
                    "name": "Alice",
                    "objects": [{ "id": 10 }, { "id": 11 }]
                }
            }
        })
    );

    let calls = fixture.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].query_name, "user");
    assert_eq!(calls[0].selection, "{ id name }");
    assert_eq!(calls[1].query_name, "objects");
    assert_eq!(calls[1].args, json!({ "where": { "owner_id": 1 } }));
}

#[tokio::test]
async fn many_relations_yield_an_empty_list_for_zero_matches() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute("{ user(where: { id: 3 }) { name objects { id } } }")
        .await;

    // Only requested fields appear, even though the resolver read `id`.
    assert_eq!(
        response,
        json!({ "data": { "user": { "name": "Carol", "objects": [] } } })
    );
    assert_eq!(fixture.calls()[0].selection, "{ name id }");
}

#[tokio::test]
async fn caller_arguments_pass_through_many_relations() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute(
            r#"{ user(where: { id: 1 }) { objects(first: 2, where: { name: "Laptop" }) { name } } }"#,
        )
        .await;

    assert_eq!(
        response,
        json!({ "data": { "user": { "objects": [{ "name": "Laptop" }] } } })
    );
    let calls = fixture.calls();
    assert_eq!(
        calls[1].args,
        json!({ "first": 2, "where": { "name": "Laptop", "owner_id": 1 } })
    );
}

#[tokio::test]
async fn missing_one_relations_error_by_default() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute("{ objects(where: { id: 13 }) { id owner { name } } }")
        .await;

    assert_eq!(response["data"]["objects"][0]["owner"], json!(null));
    let errors = response["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["objects", 0, "owner"]));
    assert!(
        errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("found no `User`")
    );
}

#[tokio::test]
async fn nullable_one_relations_resolve_to_null_silently() {
    let backends = FakeBackends::new()
        .handle("userservice", "user", Handler::Single(users()))
        .handle("objectservice", "objects", Handler::List(common::objects()));
    let mut nullable_owner = owner_relation();
    nullable_owner.nullable = true;
    let fixture = TestFixture::with_backends(backends, vec![nullable_owner], vec![]);

    let response = fixture
        .execute("{ objects(where: { id: 13 }) { id owner { name } } }")
        .await;
    assert_eq!(
        response,
        json!({ "data": { "objects": [{ "id": 13, "owner": null }] } })
    );
}

#[tokio::test]
async fn parents_without_a_key_skip_delegation() {
    let rows = vec![json!({ "id": 14, "name": "Floating", "owner_id": null })];
    let backends = FakeBackends::new()
        .handle("userservice", "user", Handler::Single(users()))
        .handle("objectservice", "objects", Handler::List(rows));
    let fixture = TestFixture::with_backends(backends, vec![owner_relation()], vec![]);

    let response = fixture.execute("{ objects { id owner { name } } }").await;
    assert_eq!(response["data"]["objects"][0]["owner"], json!(null));
    assert_eq!(
        response["errors"][0]["path"],
        json!(["objects", 0, "owner"])
    );
    // No delegated call was worth making without a key.
    assert_eq!(fixture.calls().len(), 1);
}

#[tokio::test]
async fn upstream_failures_stay_local_to_the_field() {
    let backends = FakeBackends::new()
        .handle("userservice", "users", Handler::List(users()))
        .handle(
            "objectservice",
            "objects",
            Handler::Fail("database exploded".to_string()),
        );
    let fixture = TestFixture::with_backends(backends, vec![], vec![]);

    let response = fixture.execute("{ users { id } objects { id } }").await;

    assert_eq!(
        response["data"]["users"],
        json!([{ "id": 1 }, { "id": 2 }, { "id": 3 }])
    );
    assert_eq!(response["data"]["objects"], json!(null));
    let errors = response["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["objects"]));
    assert_eq!(
        errors[0]["extensions"],
        json!({ "service": "objectservice" })
    );
    assert!(
        errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("database exploded")
    );
}

#[tokio::test]
async fn relation_chains_recurse_across_schemas() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute("{ user(where: { id: 1 }) { id objects { id owner { id name } } } }")
        .await;

    assert_eq!(
        response,
        json!({
            "data": {
                "user": {
                    "id": 1,
                    "objects": [
                        { "id": 10, "owner": { "id": 1, "name": "Alice" } },
                        { "id": 11, "owner": { "id": 1, "name": "Alice" } },
                    ]
                }
            }
        })
    );

    // user, objects-for-user, then one owner lookup per object.
    let calls = fixture.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[1].selection, "{ id owner_id }");
    assert_eq!(calls[2].args, json!({ "where": { "id": 1 } }));
    assert_eq!(calls[3].args, json!({ "where": { "id": 1 } }));
}

#[tokio::test]
async fn stitched_fields_can_be_aliased() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute("{ mine: objects(where: { id: 10 }) { id boss: owner { name } } }")
        .await;

    assert_eq!(
        response,
        json!({
            "data": { "mine": [{ "id": 10, "boss": { "name": "Alice" } }] }
        })
    );
}

#[tokio::test]
async fn mutations_route_to_the_owning_service_and_stitch() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute(r#"mutation { createObject(name: "Webcam", owner_id: 2) { id name owner { name } } }"#)
        .await;

    assert_eq!(
        response,
        json!({
            "data": {
                "createObject": { "id": 42, "name": "Webcam", "owner": { "name": "Bob" } }
            }
        })
    );
    let calls = fixture.calls();
    assert_eq!(calls[0].service, "objectservice");
    assert_eq!(calls[0].query_name, "createObject");
    assert_eq!(calls[0].args, json!({ "name": "Webcam", "owner_id": 2 }));
    assert_eq!(calls[1].service, "userservice");
    assert_eq!(calls[1].args, json!({ "where": { "id": 2 } }));
}

#[tokio::test]
async fn variables_flow_into_delegated_filters() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute_with_variables(
            "query($id: ID) { user(where: { id: $id }) { name } }",
            Some(json!({ "id": 2 })),
        )
        .await;

    assert_eq!(response, json!({ "data": { "user": { "name": "Bob" } } }));
    assert_eq!(fixture.calls()[0].args, json!({ "where": { "id": 2 } }));
}

#[tokio::test]
async fn fragments_flatten_into_delegated_selections() {
    let fixture = TestFixture::setup();
    let response = fixture
        .execute(
            "query { user(where: { id: 1 }) { ...info } } fragment info on User { id name }",
        )
        .await;

    assert_eq!(
        response,
        json!({ "data": { "user": { "id": 1, "name": "Alice" } } })
    );
    assert_eq!(fixture.calls()[0].selection, "{ id name }");
}

#[tokio::test]
async fn named_operations_are_selected_by_operation_name() {
    let fixture = TestFixture::setup();
    let document = "query A { user(where: { id: 1 }) { name } } \
                    query B { user(where: { id: 2 }) { name } }";

    let request = GraphQLRequest {
        query: document.to_string(),
        variables: None,
        operation_name: Some("B".to_string()),
    };
    let response = fixture
        .gateway
        .process_request(&request, &RequestContext::default())
        .await;
    assert_eq!(response, json!({ "data": { "user": { "name": "Bob" } } }));

    let ambiguous = GraphQLRequest {
        query: document.to_string(),
        variables: None,
        operation_name: None,
    };
    let response = fixture
        .gateway
        .process_request(&ambiguous, &RequestContext::default())
        .await;
    assert!(
        response["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("operationName")
    );
}

#[tokio::test]
async fn unknown_root_fields_error_cleanly() {
    let fixture = TestFixture::setup();
    let response = fixture.execute("{ widgets { id } }").await;

    assert_eq!(response["data"]["widgets"], json!(null));
    assert_eq!(
        response["errors"][0]["message"],
        json!("cannot query field `widgets` on type `Query`")
    );
}

#[tokio::test]
async fn typename_resolves_locally() {
    let fixture = TestFixture::setup();

    let response = fixture.execute("{ __typename }").await;
    assert_eq!(response, json!({ "data": { "__typename": "Query" } }));
    assert!(fixture.calls().is_empty());

    let response = fixture
        .execute("{ objects(where: { id: 10 }) { __typename id } }")
        .await;
    assert_eq!(
        response["data"]["objects"][0],
        json!({ "__typename": "Object", "id": 10 })
    );
}

#[tokio::test]
async fn parse_errors_return_a_graphql_error() {
    let fixture = TestFixture::setup();
    let response = fixture.execute("{").await;
    assert!(
        response["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("query parse error")
    );
    assert!(fixture.calls().is_empty());
}

#[tokio::test]
async fn relations_survive_composition_with_pushdowns_disabled() {
    let backends = FakeBackends::new()
        .handle("userservice", "user", Handler::Single(users()))
        .handle("objectservice", "objects", Handler::List(common::objects()));
    let fixture = TestFixture::with_backends(
        backends,
        vec![owner_relation(), objects_relation()],
        vec![],
    );

    let response = fixture
        .execute("{ objects(where: { id: 12 }) { owner { email } } }")
        .await;
    assert_eq!(
        response,
        json!({ "data": { "objects": [{ "owner": { "email": "bob@example.com" } }] } })
    );
}
