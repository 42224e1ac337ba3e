mod common;

use common::*;
use ocse_core::ResponseStatusCode;
use ocse_storage::Storage;
use serde_json::json;

async fn make_subscription(cse: &ocse_service::Cse, parent: &str, body: serde_json::Value) -> String {
    let response = cse.process(create(parent, ADMIN, 23, body)).await;
    assert_eq!(response.rsc.code(), 2001, "sub create failed: {:?}", response.pc);
    response.pc.unwrap()["m2m:sub"]["ri"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Child-create notification: the subscriber receives an `m2m:sgn` carrying
/// the subscription reference and the new instance, while the original
/// CREATE answers synchronously.
#[tokio::test]
async fn notify_on_child_create() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    let sub_ri = make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": { "enc": { "net": [3] }, "nu": ["http://host/notify"] } }),
    )
    .await;
    sender.clear(); // drop the verification request

    let response = cse
        .process(create(&cnt, ADMIN, 4, json!({ "m2m:cin": { "con": "v" } })))
        .await;
    assert_eq!(response.rsc.code(), 2001);
    settle().await;

    let sent = sender.sent();
    assert_eq!(sent.len(), 1, "expected exactly one notification");
    let (target, request) = &sent[0];
    assert_eq!(target, "http://host/notify");
    let sgn = &request.pc.as_ref().unwrap()["m2m:sgn"];
    assert_eq!(sgn["sur"], sub_ri.as_str());
    assert_eq!(sgn["nev"]["net"], 3);
    assert_eq!(sgn["nev"]["rep"]["m2m:cin"]["con"], "v");
}

#[tokio::test]
async fn verification_request_precedes_acceptance() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": { "nu": ["http://host/notify"] } }),
    )
    .await;
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.pc.as_ref().unwrap()["m2m:sgn"]["vrq"], true);
}

#[tokio::test]
async fn failed_verification_rejects_subscription() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    sender.respond_with(ResponseStatusCode::TargetNotReachable);
    let response = cse
        .process(create(
            &cnt,
            ADMIN,
            23,
            json!({ "m2m:sub": { "nu": ["http://dead-host/notify"] } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 5203);
    // the subscription must not exist
    sender.respond_with(ResponseStatusCode::Ok);
    let children = cse.storage().children_of(&cnt).await.unwrap();
    assert!(children.is_empty());
}

#[tokio::test]
async fn update_events_respect_attribute_filter() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({ "mni": 100 })).await;
    make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": { "enc": { "net": [1], "atr": ["mbs"] }, "nu": ["http://h/n"] } }),
    )
    .await;
    sender.clear();

    // mni change does not match the atr filter
    cse.process(update(&cnt, ADMIN, json!({ "m2m:cnt": { "mni": 50 } })))
        .await;
    settle().await;
    assert_eq!(sender.sent_count(), 0);

    // mbs change does
    cse.process(update(&cnt, ADMIN, json!({ "m2m:cnt": { "mbs": 4096 } })))
        .await;
    settle().await;
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.pc.as_ref().unwrap()["m2m:sgn"]["nev"]["net"], 1);
}

#[tokio::test]
async fn deleting_parent_deletes_subscription_and_notifies() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "doomed", json!({})).await;
    let sub_ri = make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": { "enc": { "net": [2] }, "nu": ["http://h/n"], "su": "http://h/subscriber" } }),
    )
    .await;
    sender.clear();

    let response = cse.process(delete(&cnt, ADMIN)).await;
    assert_eq!(response.rsc.code(), 2002);
    settle().await;

    assert!(cse
        .storage()
        .resource_by_ri(&sub_ri)
        .await
        .unwrap()
        .is_none());
    // the subscriber got a deletion notice
    let sent = sender.sent();
    assert!(
        sent.iter().any(|(target, request)| {
            target == "http://h/subscriber"
                && request.pc.as_ref().unwrap()["m2m:sgn"]["sud"] == true
        }),
        "expected a sud notice, got {:?}",
        sent.iter().map(|(t, _)| t).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn batch_flushes_on_count() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": {
            "enc": { "net": [3] },
            "nu": ["http://h/batch"],
            "bn": { "num": 3 },
        }}),
    )
    .await;
    sender.clear();

    make_instance(&cse, &cnt, "a").await;
    make_instance(&cse, &cnt, "b").await;
    settle().await;
    assert_eq!(sender.sent_count(), 0, "batch must hold below num");

    make_instance(&cse, &cnt, "c").await;
    settle().await;
    let sent = sender.sent();
    assert_eq!(sent.len(), 1, "one aggregated notification");
    let agn = &sent[0].1.pc.as_ref().unwrap()["m2m:agn"]["m2m:sgn"];
    assert_eq!(agn.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn batch_flushes_on_duration() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": {
            "enc": { "net": [3] },
            "nu": ["http://h/batch"],
            "bn": { "num": 100, "dur": "PT1S" },
        }}),
    )
    .await;
    sender.clear();

    make_instance(&cse, &cnt, "only").await;
    // the flusher worker ticks every second
    tokio::time::sleep(std::time::Duration::from_millis(2600)).await;
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.pc.as_ref().unwrap()["m2m:agn"]["m2m:sgn"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn expiration_counter_deletes_subscription() {
    let (cse, sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    let sub_ri = make_subscription(
        &cse,
        &cnt,
        json!({ "m2m:sub": { "enc": { "net": [3] }, "nu": ["http://h/n"], "exc": 2 } }),
    )
    .await;
    sender.clear();

    make_instance(&cse, &cnt, "one").await;
    settle().await;
    assert!(cse.storage().resource_by_ri(&sub_ri).await.unwrap().is_some());

    make_instance(&cse, &cnt, "two").await;
    settle().await;
    assert!(
        cse.storage().resource_by_ri(&sub_ri).await.unwrap().is_none(),
        "subscription should be gone after its second notification"
    );
    // both notifications were still delivered
    let notifications = sender
        .sent()
        .iter()
        .filter(|(_, request)| request.pc.as_ref().is_some_and(|pc| pc.get("m2m:sgn").is_some()))
        .count();
    assert!(notifications >= 2);
}
