mod common;

use common::*;
use serde_json::json;

/// Quota eviction by mni: three instances through a window of two.
#[tokio::test]
async fn mni_evicts_oldest_fifo() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({ "mni": 2 })).await;

    let ci1 = make_instance(&cse, &cnt, "one").await;
    let ci2 = make_instance(&cse, &cnt, "two").await;
    let ci3 = make_instance(&cse, &cnt, "three").await;

    // la -> newest, ol -> oldest surviving
    let la = cse.process(retrieve(&format!("{cnt}/la"), ADMIN)).await;
    assert_eq!(la.rsc.code(), 2000);
    assert_eq!(la.pc.unwrap()["m2m:cin"]["ri"], ci3.as_str());

    let ol = cse.process(retrieve(&format!("{cnt}/ol"), ADMIN)).await;
    assert_eq!(ol.rsc.code(), 2000);
    assert_eq!(ol.pc.unwrap()["m2m:cin"]["ri"], ci2.as_str());

    // the evicted instance is gone
    let gone = cse.process(retrieve(&ci1, ADMIN)).await;
    assert_eq!(gone.rsc.code(), 4004);

    // bookkeeping
    let cnt_res = cse.process(retrieve(&cnt, ADMIN)).await;
    let body = cnt_res.pc.unwrap();
    assert_eq!(body["m2m:cnt"]["cni"], 2);
    assert_eq!(body["m2m:cnt"]["cbs"], ("two".len() + "three".len()) as u64);
}

#[tokio::test]
async fn mbs_evicts_until_fit() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({ "mbs": 10 })).await;

    make_instance(&cse, &cnt, "aaaa").await; // 4 bytes
    make_instance(&cse, &cnt, "bbbb").await; // 8 total
    make_instance(&cse, &cnt, "cccc").await; // 12 -> evict "aaaa"

    let cnt_res = cse.process(retrieve(&cnt, ADMIN)).await;
    let body = cnt_res.pc.unwrap();
    assert_eq!(body["m2m:cnt"]["cni"], 2);
    assert_eq!(body["m2m:cnt"]["cbs"], 8);
}

/// A single instance larger than mbs can never be stored.
#[tokio::test]
async fn oversized_instance_is_5207() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({ "mbs": 4 })).await;
    let response = cse
        .process(create(
            &cnt,
            ADMIN,
            4,
            json!({ "m2m:cin": { "con": "way too large" } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 5207);
}

#[tokio::test]
async fn shrinking_mni_evicts_immediately() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    for content in ["a", "b", "c", "d"] {
        make_instance(&cse, &cnt, content).await;
    }
    let response = cse
        .process(update(&cnt, ADMIN, json!({ "m2m:cnt": { "mni": 2 } })))
        .await;
    assert_eq!(response.rsc.code(), 2004);
    let body = response.pc.unwrap();
    assert_eq!(body["m2m:cnt"]["cni"], 2);

    let ol = cse.process(retrieve(&format!("{cnt}/ol"), ADMIN)).await;
    assert_eq!(ol.pc.unwrap()["m2m:cin"]["con"], "c");
}

#[tokio::test]
async fn la_on_empty_container_is_4004() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "empty", json!({})).await;
    let response = cse.process(retrieve(&format!("{cnt}/la"), ADMIN)).await;
    assert_eq!(response.rsc.code(), 4004);
}

#[tokio::test]
async fn content_instances_are_immutable() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    let cin = make_instance(&cse, &cnt, "fixed").await;
    let response = cse
        .process(update(&cin, ADMIN, json!({ "m2m:cin": { "con": "changed" } })))
        .await;
    assert_eq!(response.rsc.code(), 4005);
}

#[tokio::test]
async fn delete_la_removes_newest() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({})).await;
    make_instance(&cse, &cnt, "old").await;
    let newest = make_instance(&cse, &cnt, "new").await;

    let response = cse.process(delete(&format!("{cnt}/la"), ADMIN)).await;
    assert_eq!(response.rsc.code(), 2002);
    assert_eq!(cse.process(retrieve(&newest, ADMIN)).await.rsc.code(), 4004);

    let la = cse.process(retrieve(&format!("{cnt}/la"), ADMIN)).await;
    assert_eq!(la.pc.unwrap()["m2m:cin"]["con"], "old");
}

/// Nested containers resolve through structured addressing.
#[tokio::test]
async fn structured_addressing_resolves_nested_resources() {
    let (cse, _sender) = test_cse().await;
    let outer = make_container(&cse, CSE_NAME, "outer", json!({})).await;
    make_container(&cse, &outer, "inner", json!({})).await;

    let response = cse
        .process(retrieve("cse-in/outer/inner", ADMIN))
        .await;
    assert_eq!(response.rsc.code(), 2000);
    assert_eq!(response.pc.unwrap()["m2m:cnt"]["rn"], "inner");

    // hybrid form: ri prefix with structured tail
    let response = cse
        .process(retrieve(&format!("{outer}/inner"), ADMIN))
        .await;
    assert_eq!(response.rsc.code(), 2000);
}

#[tokio::test]
async fn sibling_name_conflict_is_4105() {
    let (cse, _sender) = test_cse().await;
    make_container(&cse, CSE_NAME, "same", json!({})).await;
    let response = cse
        .process(create(CSE_NAME, ADMIN, 3, json!({ "m2m:cnt": { "rn": "same" } })))
        .await;
    assert_eq!(response.rsc.code(), 4105);
}
