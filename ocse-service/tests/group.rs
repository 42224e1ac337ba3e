mod common;

use common::*;
use serde_json::json;

async fn make_group(cse: &ocse_service::Cse, body: serde_json::Value) -> serde_json::Value {
    let response = cse.process(create(CSE_NAME, ADMIN, 9, body)).await;
    assert_eq!(response.rsc.code(), 2001, "group create failed: {:?}", response.pc);
    response.pc.unwrap()["m2m:grp"].clone()
}

/// Fan-out with a dangling member: per-member status preserved, overall 2000.
#[tokio::test]
async fn fanout_aggregates_partial_failure() {
    let (cse, _sender) = test_cse().await;
    let cnt_a = make_container(&cse, CSE_NAME, "cntA", json!({})).await;
    let group = make_group(
        &cse,
        json!({ "m2m:grp": {
            "rn": "pair",
            "mnm": 5,
            "mid": [cnt_a, "missing-cnt"],
        }}),
    )
    .await;
    let grp_ri = group["ri"].as_str().unwrap();

    let response = cse.process(retrieve(&format!("{grp_ri}/fopt"), ADMIN)).await;
    assert_eq!(response.rsc.code(), 2000);
    let rsp = response.pc.unwrap()["m2m:agr"]["m2m:rsp"].clone();
    let entries = rsp.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["rsc"], 2000);
    assert_eq!(entries[0]["pc"]["m2m:cnt"]["rn"], "cntA");
    assert_eq!(entries[1]["rsc"], 4004);
}

#[tokio::test]
async fn fanout_with_all_members_failing_is_5209() {
    let (cse, _sender) = test_cse().await;
    let group = make_group(
        &cse,
        json!({ "m2m:grp": { "rn": "ghosts", "mnm": 5, "mid": ["gone1", "gone2"] } }),
    )
    .await;
    let grp_ri = group["ri"].as_str().unwrap();
    let response = cse.process(retrieve(&format!("{grp_ri}/fopt"), ADMIN)).await;
    assert_eq!(response.rsc.code(), 5209);
}

/// CREATE through fopt lands one child under each member.
#[tokio::test]
async fn fanout_create_reaches_every_member() {
    let (cse, _sender) = test_cse().await;
    let cnt_a = make_container(&cse, CSE_NAME, "cntA", json!({})).await;
    let cnt_b = make_container(&cse, CSE_NAME, "cntB", json!({})).await;
    let group = make_group(
        &cse,
        json!({ "m2m:grp": { "rn": "both", "mnm": 2, "mid": [cnt_a.clone(), cnt_b.clone()] } }),
    )
    .await;
    let grp_ri = group["ri"].as_str().unwrap();

    let response = cse
        .process(create(
            &format!("{grp_ri}/fopt"),
            ADMIN,
            4,
            json!({ "m2m:cin": { "con": "fanned" } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 2000);

    for cnt in [&cnt_a, &cnt_b] {
        let la = cse.process(retrieve(&format!("{cnt}/la"), ADMIN)).await;
        assert_eq!(la.rsc.code(), 2000);
        assert_eq!(la.pc.unwrap()["m2m:cin"]["con"], "fanned");
    }
}

/// The path below fopt is applied to each member.
#[tokio::test]
async fn fanout_suffix_addresses_member_children() {
    let (cse, _sender) = test_cse().await;
    let cnt_a = make_container(&cse, CSE_NAME, "cntA", json!({})).await;
    make_instance(&cse, &cnt_a, "deep").await;
    let group = make_group(
        &cse,
        json!({ "m2m:grp": { "rn": "deepGroup", "mnm": 1, "mid": [cnt_a] } }),
    )
    .await;
    let grp_ri = group["ri"].as_str().unwrap();

    let response = cse
        .process(retrieve(&format!("{grp_ri}/fopt/la"), ADMIN))
        .await;
    assert_eq!(response.rsc.code(), 2000);
    let entries = response.pc.unwrap()["m2m:agr"]["m2m:rsp"].clone();
    assert_eq!(entries[0]["pc"]["m2m:cin"]["con"], "deep");
}

#[tokio::test]
async fn member_count_above_mnm_is_6010() {
    let (cse, _sender) = test_cse().await;
    let response = cse
        .process(create(
            CSE_NAME,
            ADMIN,
            9,
            json!({ "m2m:grp": { "rn": "tiny", "mnm": 1, "mid": ["a", "b"] } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 6010);
}

/// Member type validation: default strategy drops mismatching members,
/// abandon-group fails the creation.
#[tokio::test]
async fn member_type_validation_strategies() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "cntA", json!({})).await;
    let ae = cse
        .process(create(
            CSE_NAME,
            "C",
            2,
            json!({ "m2m:ae": { "rn": "NotACnt", "api": "N.x", "rr": false } }),
        ))
        .await;
    let ae_ri = ae.pc.unwrap()["m2m:ae"]["ri"].as_str().unwrap().to_string();

    // default csy: the AE is silently dropped, cnm reflects it
    let group = make_group(
        &cse,
        json!({ "m2m:grp": {
            "rn": "validated", "mnm": 5, "mt": 3, "mid": [cnt.clone(), ae_ri.clone()],
        }}),
    )
    .await;
    assert_eq!(group["cnm"], 1);
    assert_eq!(group["mtv"], true);
    assert_eq!(group["mid"].as_array().unwrap().len(), 1);

    // csy=2: abandon the whole group
    let response = cse
        .process(create(
            CSE_NAME,
            ADMIN,
            9,
            json!({ "m2m:grp": {
                "rn": "strict", "mnm": 5, "mt": 3, "csy": 2, "mid": [cnt, ae_ri],
            }}),
        ))
        .await;
    assert_eq!(response.rsc.code(), 4110);
}

#[tokio::test]
async fn duplicate_members_dedupe_under_validation() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "cntA", json!({})).await;
    let group = make_group(
        &cse,
        json!({ "m2m:grp": {
            "rn": "dupes", "mnm": 5, "mt": 3, "mid": [cnt.clone(), cnt],
        }}),
    )
    .await;
    assert_eq!(group["cnm"], 1);
}
