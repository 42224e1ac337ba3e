mod common;

use common::*;
use ocse_core::{time, Operation, Request, ResponseType, ResultContent};
use serde_json::json;

#[tokio::test]
async fn missing_rvi_is_4000() {
    let (cse, _sender) = test_cse().await;
    let mut request = retrieve(CSE_NAME, ADMIN);
    request.rvi = None;
    assert_eq!(cse.process(request).await.rsc.code(), 4000);
}

#[tokio::test]
async fn unsupported_rvi_is_4001() {
    let mut config = test_config();
    config.supported_release_versions = vec![ocse_core::ReleaseVersion::R2a];
    config.release_version = ocse_core::ReleaseVersion::R2a;
    let (cse, _sender) = test_cse_with(config).await;
    let request = retrieve(CSE_NAME, ADMIN); // builder defaults to release 4
    assert_eq!(cse.process(request).await.rsc.code(), 4001);
}

#[tokio::test]
async fn expired_request_is_4008() {
    let (cse, _sender) = test_cse().await;
    let past = time::format_timestamp(time::now() - chrono::Duration::seconds(5));
    let request = Request::builder(Operation::Retrieve, CSE_NAME, ADMIN)
        .rqet(past)
        .build();
    assert_eq!(cse.process(request).await.rsc.code(), 4008);
}

#[tokio::test]
async fn unknown_target_is_4004() {
    let (cse, _sender) = test_cse().await;
    assert_eq!(cse.process(retrieve("nope", ADMIN)).await.rsc.code(), 4004);
}

#[tokio::test]
async fn create_without_ty_is_4000() {
    let (cse, _sender) = test_cse().await;
    let mut request = create(CSE_NAME, ADMIN, 3, json!({ "m2m:cnt": {} }));
    request.ty = None;
    assert_eq!(cse.process(request).await.rsc.code(), 4000);
}

#[tokio::test]
async fn invalid_child_type_is_4108() {
    let (cse, _sender) = test_cse().await;
    // a content instance directly under the CSEBase is not admissible
    let response = cse
        .process(create(CSE_NAME, ADMIN, 4, json!({ "m2m:cin": { "con": "x" } })))
        .await;
    assert_eq!(response.rsc.code(), 4108);
}

#[tokio::test]
async fn mismatched_wrapper_is_4000() {
    let (cse, _sender) = test_cse().await;
    let response = cse
        .process(create(CSE_NAME, ADMIN, 3, json!({ "m2m:ae": { "rn": "x" } })))
        .await;
    assert_eq!(response.rsc.code(), 4000);
}

/// Deleting a subtree removes every descendant (I2).
#[tokio::test]
async fn delete_removes_subtree() {
    let (cse, _sender) = test_cse().await;
    let outer = make_container(&cse, CSE_NAME, "outer", json!({})).await;
    let inner = make_container(&cse, &outer, "inner", json!({})).await;
    let cin = make_instance(&cse, &inner, "leaf").await;

    assert_eq!(cse.process(delete(&outer, ADMIN)).await.rsc.code(), 2002);
    for ri in [&outer, &inner, &cin] {
        assert_eq!(cse.process(retrieve(ri, ADMIN)).await.rsc.code(), 4004);
    }
    // structured names are released as well
    assert_eq!(
        cse.process(retrieve("cse-in/outer/inner", ADMIN)).await.rsc.code(),
        4004
    );
}

/// Concurrent updates to the same resource linearize (I6).
#[tokio::test]
async fn concurrent_updates_linearize() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "shared", json!({})).await;

    let mut handles = Vec::new();
    for value in 1..=8u64 {
        let cse = cse.clone();
        let cnt = cnt.clone();
        handles.push(tokio::spawn(async move {
            cse.process(update(&cnt, ADMIN, json!({ "m2m:cnt": { "mni": value } })))
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().rsc.code(), 2004);
    }
    let final_state = cse.process(retrieve(&cnt, ADMIN)).await;
    let mni = final_state.pc.unwrap()["m2m:cnt"]["mni"].as_u64().unwrap();
    assert!((1..=8).contains(&mni));
}

#[tokio::test]
async fn update_null_deletes_attribute() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "data", json!({ "mni": 5 })).await;
    let response = cse
        .process(update(&cnt, ADMIN, json!({ "m2m:cnt": { "mni": null } })))
        .await;
    assert_eq!(response.rsc.code(), 2004);
    assert!(response.pc.unwrap()["m2m:cnt"].get("mni").is_none());
}

#[tokio::test]
async fn rcn_shapes_results() {
    let (cse, _sender) = test_cse().await;
    let cnt = make_container(&cse, CSE_NAME, "shaped", json!({})).await;
    make_instance(&cse, &cnt, "x").await;

    // rcn=0: nothing
    let mut request = retrieve(&cnt, ADMIN);
    request.rcn = Some(ResultContent::Nothing);
    let response = cse.process(request).await;
    assert_eq!(response.rsc.code(), 2000);
    assert!(response.pc.is_none());

    // rcn=2: hierarchical address
    let mut request = retrieve(&cnt, ADMIN);
    request.rcn = Some(ResultContent::HierarchicalAddress);
    let response = cse.process(request).await;
    assert_eq!(response.pc.unwrap()["m2m:uri"], "cse-in/shaped");

    // rcn=4: attributes plus nested child resources
    let mut request = retrieve(&cnt, ADMIN);
    request.rcn = Some(ResultContent::AttributesChildResources);
    let response = cse.process(request).await;
    let body = response.pc.unwrap();
    assert_eq!(body["m2m:cnt"]["rn"], "shaped");
    assert_eq!(body["m2m:cnt"]["m2m:cin"][0]["con"], "x");

    // rcn=6: child references only
    let mut request = retrieve(&cnt, ADMIN);
    request.rcn = Some(ResultContent::ChildReferences);
    let response = cse.process(request).await;
    let refs = response.pc.unwrap()["m2m:rrl"]["rrf"].clone();
    assert_eq!(refs.as_array().unwrap().len(), 1);
    assert_eq!(refs[0]["typ"], 4);

    // rcn=9 on update: modified attributes only
    let mut request = update(&cnt, ADMIN, json!({ "m2m:cnt": { "mni": 9 } }));
    request.rcn = Some(ResultContent::ModifiedAttributes);
    let response = cse.process(request).await;
    let body = response.pc.unwrap();
    assert_eq!(body["m2m:cnt"]["mni"], 9);
    assert!(body["m2m:cnt"].get("rn").is_none());
}

/// Discovery returns exactly the descendants matching the filter (R3).
#[tokio::test]
async fn discovery_filters_by_type_and_label() {
    let (cse, _sender) = test_cse().await;
    let cnt_a = make_container(&cse, CSE_NAME, "a", json!({ "lbl": ["red"] })).await;
    make_container(&cse, CSE_NAME, "b", json!({ "lbl": ["blue"] })).await;
    make_instance(&cse, &cnt_a, "x").await;

    let mut request = Request::builder(Operation::Discovery, CSE_NAME, ADMIN).build();
    request.fc.ty = vec![3];
    let response = cse.process(request).await;
    let uril = response.pc.unwrap()["m2m:uril"].clone();
    let uris: Vec<&str> = uril.as_array().unwrap().iter().map(|u| u.as_str().unwrap()).collect();
    assert_eq!(uris, vec!["cse-in/a", "cse-in/b"]);

    let mut request = Request::builder(Operation::Discovery, CSE_NAME, ADMIN).build();
    request.fc.ty = vec![3];
    request.fc.lbl = vec!["red".to_string()];
    let response = cse.process(request).await;
    let uril = response.pc.unwrap()["m2m:uril"].clone();
    assert_eq!(uril.as_array().unwrap().len(), 1);
    assert_eq!(uril[0], "cse-in/a");
}

#[tokio::test]
async fn discovery_respects_limit_and_offset() {
    let (cse, _sender) = test_cse().await;
    for rn in ["c1", "c2", "c3"] {
        make_container(&cse, CSE_NAME, rn, json!({})).await;
    }
    let mut request = Request::builder(Operation::Discovery, CSE_NAME, ADMIN).build();
    request.fc.ty = vec![3];
    request.fc.lim = Some(1);
    request.fc.ofst = Some(1);
    let response = cse.process(request).await;
    let uril = response.pc.unwrap()["m2m:uril"].clone();
    assert_eq!(uril.as_array().unwrap().len(), 1);
    assert_eq!(uril[0], "cse-in/c2");
}

/// nonBlockingSync: 1001 plus a materialized `<request>` that collects the
/// final outcome.
#[tokio::test]
async fn non_blocking_sync_materializes_request() {
    let (cse, _sender) = test_cse().await;
    let mut request = create(
        CSE_NAME,
        ADMIN,
        3,
        json!({ "m2m:cnt": { "rn": "later" } }),
    );
    request.rt = ResponseType::NonBlockingSync;
    let response = cse.process(request).await;
    assert_eq!(response.rsc.code(), 1001);
    let req_ri = response.pc.unwrap()["m2m:uri"].as_str().unwrap().to_string();

    settle().await;
    // the operation ran
    assert_eq!(
        cse.process(retrieve("cse-in/later", ADMIN)).await.rsc.code(),
        2000
    );
    // and the request resource carries the outcome
    let req_res = cse.process(retrieve(&req_ri, ADMIN)).await;
    let body = req_res.pc.unwrap();
    assert_eq!(body["m2m:req"]["rs"], 1);
    assert_eq!(body["m2m:req"]["ors"]["rsc"], 2001);
}

/// nonBlockingAsync: 1002, with the outcome notified to the rtu targets.
#[tokio::test]
async fn non_blocking_async_notifies_rtu() {
    let (cse, sender) = test_cse().await;
    let mut request = create(
        CSE_NAME,
        ADMIN,
        3,
        json!({ "m2m:cnt": { "rn": "async" } }),
    );
    request.rt = ResponseType::NonBlockingAsync;
    request.rtu = vec!["http://caller/rsp".to_string()];
    let response = cse.process(request).await;
    assert_eq!(response.rsc.code(), 1002);

    settle().await;
    let sent = sender.sent();
    assert!(sent.iter().any(|(target, request)| {
        target == "http://caller/rsp"
            && request.pc.as_ref().is_some_and(|pc| pc["m2m:rsp"]["rsc"] == 2001)
    }));
}

#[tokio::test]
async fn forwarded_response_keeps_original_rqi() {
    let (cse, _sender) = test_cse().await;
    cse.process(create(
        CSE_NAME,
        "/id-mn",
        16,
        json!({ "m2m:csr": { "csi": "/id-mn", "cb": "/id-mn/cse-mn", "poa": ["http://mn:8080"] } }),
    ))
    .await;
    settle().await;

    let mut request = retrieve("/id-mn/cse-mn", ADMIN);
    request.rqi = "my-request-1".to_string();
    let response = cse.process(request).await;
    assert_eq!(response.rqi, "my-request-1");
}

#[tokio::test]
async fn full_request_queue_rejects_with_5000() {
    let mut config = test_config();
    config.max_concurrent_requests = 1;
    config.max_queued_requests = 0;
    config.request_expiration_delta = 2;
    let (cse, _sender) = test_cse_with(config).await;

    // a polling AE whose pcu long-poll occupies the single worker slot
    let ae = cse
        .process(create(
            CSE_NAME,
            "C",
            2,
            json!({ "m2m:ae": { "rn": "Poller", "api": "N.p", "rr": false } }),
        ))
        .await;
    let ae_ri = ae.pc.unwrap()["m2m:ae"]["ri"].as_str().unwrap().to_string();
    let pch = cse
        .process(create(&ae_ri, ADMIN, 15, json!({ "m2m:pch": {} })))
        .await;
    let pch_ri = pch.pc.unwrap()["m2m:pch"]["ri"].as_str().unwrap().to_string();

    let slow = {
        let cse = cse.clone();
        tokio::spawn(async move {
            let mut request = retrieve(&format!("{pch_ri}/pcu"), ADMIN);
            request.origin = ocse_core::Origin::Http;
            cse.process(request).await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // worker busy, queue capacity zero: reject
    let mut request = retrieve(CSE_NAME, ADMIN);
    request.origin = ocse_core::Origin::Http;
    assert_eq!(cse.process(request).await.rsc.code(), 5000);

    // internal primitives bypass admission control
    assert_eq!(cse.process(retrieve(CSE_NAME, ADMIN)).await.rsc.code(), 2000);

    // the long poll eventually times out and frees the slot
    assert_eq!(slow.await.unwrap().rsc.code(), 4008);
    let mut request = retrieve(CSE_NAME, ADMIN);
    request.origin = ocse_core::Origin::Http;
    assert_eq!(cse.process(request).await.rsc.code(), 2000);
}

#[tokio::test]
async fn cse_base_cannot_be_deleted() {
    let (cse, _sender) = test_cse().await;
    assert_eq!(cse.process(delete(CSE_NAME, ADMIN)).await.rsc.code(), 4005);
}
