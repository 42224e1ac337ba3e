mod common;

use common::*;
use ocse_core::{Operation, Request};
use serde_json::json;

async fn register_polling_ae(cse: &ocse_service::Cse) -> (String, String, String) {
    // an AE without a point of access
    let response = cse
        .process(create(
            CSE_NAME,
            "C",
            2,
            json!({ "m2m:ae": { "rn": "Poller", "api": "N.poll", "rr": false } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 2001);
    let ae = response.pc.unwrap()["m2m:ae"].clone();
    let ae_ri = ae["ri"].as_str().unwrap().to_string();
    let aei = ae["aei"].as_str().unwrap().to_string();

    let response = cse
        .process(create(&ae_ri, &aei, 15, json!({ "m2m:pch": { "rn": "channel" } })))
        .await;
    assert_eq!(response.rsc.code(), 2001);
    let pch_ri = response.pc.unwrap()["m2m:pch"]["ri"].as_str().unwrap().to_string();
    (ae_ri, aei, pch_ri)
}

/// A notification for an unreachable AE is parked on its polling channel
/// and handed out on the next pcu retrieve.
#[tokio::test]
async fn notification_is_queued_and_polled() {
    let (cse, _sender) = test_cse().await;
    let (ae_ri, aei, pch_ri) = register_polling_ae(&cse).await;

    let notify = Request::builder(Operation::Notify, ae_ri.as_str(), ADMIN)
        .pc(json!({ "m2m:sgn": { "nev": { "net": 3 } } }))
        .build();
    let response = cse.process(notify).await;
    assert_eq!(response.rsc.code(), 2000);

    let response = cse.process(retrieve(&format!("{pch_ri}/pcu"), &aei)).await;
    assert_eq!(response.rsc.code(), 2000);
    assert_eq!(response.pc.unwrap()["m2m:sgn"]["nev"]["net"], 3);
}

#[tokio::test]
async fn pcu_poll_times_out_when_queue_stays_empty() {
    let mut config = test_config();
    config.request_expiration_delta = 1;
    let (cse, _sender) = test_cse_with(config).await;
    let (_ae_ri, aei, pch_ri) = register_polling_ae(&cse).await;

    let response = cse.process(retrieve(&format!("{pch_ri}/pcu"), &aei)).await;
    assert_eq!(response.rsc.code(), 4008);
}

#[tokio::test]
async fn second_polling_channel_is_rejected() {
    let (cse, _sender) = test_cse().await;
    let (ae_ri, aei, _pch_ri) = register_polling_ae(&cse).await;
    let response = cse
        .process(create(&ae_ri, &aei, 15, json!({ "m2m:pch": { "rn": "another" } })))
        .await;
    assert_eq!(response.rsc.code(), 4105);
}

#[tokio::test]
async fn notify_without_poa_or_channel_is_unreachable() {
    let (cse, _sender) = test_cse().await;
    let response = cse
        .process(create(
            CSE_NAME,
            "C",
            2,
            json!({ "m2m:ae": { "rn": "Deaf", "api": "N.deaf", "rr": false } }),
        ))
        .await;
    let ae_ri = response.pc.unwrap()["m2m:ae"]["ri"].as_str().unwrap().to_string();
    let notify = Request::builder(Operation::Notify, ae_ri.as_str(), ADMIN)
        .pc(json!({ "m2m:sgn": {} }))
        .build();
    assert_eq!(cse.process(notify).await.rsc.code(), 5103);
}
