mod common;

use common::*;
use serde_json::json;

async fn register_peer(cse: &ocse_service::Cse) {
    let response = cse
        .process(create(
            CSE_NAME,
            "/id-mn",
            16,
            json!({ "m2m:csr": {
                "rn": "id-mn",
                "csi": "/id-mn",
                "cb": "/id-mn/cse-mn",
                "poa": ["http://mn:8080"],
            }}),
        ))
        .await;
    assert_eq!(response.rsc.code(), 2001);
    settle().await;
}

fn announcing_config() -> ocse_core::CseConfig {
    let mut config = test_config();
    config.announcements.delay_after_registration = 0;
    config.announcements.check_interval = 1;
    config
}

/// An announceable create is mirrored to the target CSE as an `<..Annc>`
/// CREATE carrying the link and the announced attributes.
#[tokio::test]
async fn create_is_announced_to_peer() {
    let (cse, sender) = test_cse_with(announcing_config()).await;
    register_peer(&cse).await;
    sender.clear();

    let response = cse
        .process(create(
            CSE_NAME,
            ADMIN,
            3,
            json!({ "m2m:cnt": {
                "rn": "announced",
                "lbl": ["shared"],
                "at": ["/id-mn"],
            }}),
        ))
        .await;
    assert_eq!(response.rsc.code(), 2001);
    let cnt_ri = response.pc.unwrap()["m2m:cnt"]["ri"].as_str().unwrap().to_string();
    settle().await;

    let sent = sender.sent();
    let annc = sent
        .iter()
        .find(|(_, request)| request.ty == Some(10003))
        .expect("expected an announcement CREATE");
    assert_eq!(annc.0, "http://mn:8080");
    let body = &annc.1.pc.as_ref().unwrap()["m2m:cntA"];
    assert_eq!(body["lnk"], format!("/id-in/{cnt_ri}"));
    assert_eq!(body["lbl"][0], "shared");
}

/// Updates flow to the existing announced copy; deletes retract it.
#[tokio::test]
async fn update_and_delete_follow_the_announcement() {
    let (cse, sender) = test_cse_with(announcing_config()).await;
    register_peer(&cse).await;

    let response = cse
        .process(create(
            CSE_NAME,
            ADMIN,
            3,
            json!({ "m2m:cnt": { "rn": "mirrored", "at": ["/id-mn"] } }),
        ))
        .await;
    let cnt_ri = response.pc.unwrap()["m2m:cnt"]["ri"].as_str().unwrap().to_string();
    settle().await;
    sender.clear();

    cse.process(update(&cnt_ri, ADMIN, json!({ "m2m:cnt": { "lbl": ["v2"] } })))
        .await;
    settle().await;
    assert!(
        sender.sent().iter().any(|(_, request)| {
            request.op == ocse_core::Operation::Update && request.to.starts_with("/id-mn/")
        }),
        "expected an announcement UPDATE"
    );
    sender.clear();

    cse.process(delete(&cnt_ri, ADMIN)).await;
    settle().await;
    assert!(
        sender.sent().iter().any(|(_, request)| {
            request.op == ocse_core::Operation::Delete && request.to.starts_with("/id-mn/")
        }),
        "expected an announcement DELETE"
    );
}

/// Without a registered peer the announcement stays pending and is retried
/// once the peer appears.
#[tokio::test]
async fn pending_announcement_is_retried_after_registration() {
    let (cse, sender) = test_cse_with(announcing_config()).await;

    let response = cse
        .process(create(
            CSE_NAME,
            ADMIN,
            3,
            json!({ "m2m:cnt": { "rn": "early", "at": ["/id-mn"] } }),
        ))
        .await;
    assert_eq!(response.rsc.code(), 2001);
    settle().await;
    assert!(
        !sender.sent().iter().any(|(_, r)| r.ty == Some(10003)),
        "nothing can be announced before the peer registers"
    );

    register_peer(&cse).await;
    // the announcement checker ticks every second
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    assert!(
        sender.sent().iter().any(|(_, r)| r.ty == Some(10003)),
        "pending announcement should be delivered after registration"
    );
}
