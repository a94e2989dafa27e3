//! End-to-end tests of the LFS protocol over HTTP

mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::{pointer_for, Harness, USER_HEADER};
use futures::channel::mpsc;
use lfs_core::{MetaStore, MEDIA_TYPE};
use lfs_store::ContentStore;
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_health() {
    let h = Harness::spawn().await;
    let res = h.client.get(format!("{}/", h.base)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_upload_verify_download() {
    let h = Harness::spawn().await;
    let data = b"weights and biases, version one".to_vec();
    let pointer = pointer_for(&data);

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({"operation": "upload", "objects": [{"oid": pointer.oid, "size": pointer.size}]}),
        )
        .await;
    assert_eq!(response["transfer"], "basic");
    let object = &response["objects"][0];
    assert_eq!(object["oid"], pointer.oid.as_str());
    let upload = &object["actions"]["upload"];
    let verify = &object["actions"]["verify"];
    assert!(upload["href"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/alice/models.git/info/lfs/objects/{}/{}", pointer.oid, pointer.size)));
    let authorization = upload["header"]["Authorization"].as_str().unwrap().to_string();
    assert!(authorization.starts_with("Bearer "));
    assert_eq!(verify["header"]["Accept"], MEDIA_TYPE);

    let res = h
        .client
        .put(upload["href"].as_str().unwrap())
        .header("Authorization", &authorization)
        .body(data.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], MEDIA_TYPE);
    assert!(h.meta.get(h.models.id, &pointer.oid).await.unwrap().is_some());

    let res = h
        .client
        .post(verify["href"].as_str().unwrap())
        .header("Authorization", &authorization)
        .header("Accept", MEDIA_TYPE)
        .header("Content-Type", MEDIA_TYPE)
        .body(json!({"oid": pointer.oid, "size": pointer.size}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({"operation": "download", "objects": [{"oid": pointer.oid, "size": pointer.size}]}),
        )
        .await;
    let download = &response["objects"][0]["actions"]["download"];
    let res = h
        .client
        .get(download["href"].as_str().unwrap())
        .header("Authorization", download["header"]["Authorization"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-length"], data.len().to_string().as_str());
    assert_eq!(res.bytes().await.unwrap().to_vec(), data);
}

#[tokio::test]
async fn test_download_batch_keeps_request_order() {
    let h = Harness::spawn().await;
    let stored = h.upload(&h.models, &h.alice, b"present").await;
    let missing = pointer_for(b"never uploaded");

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({"operation": "download", "objects": [
                {"oid": missing.oid, "size": missing.size},
                {"oid": stored.oid, "size": stored.size},
                {"oid": "not-a-hash", "size": 3},
            ]}),
        )
        .await;
    let objects = response["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 3);
    assert_eq!(objects[0]["error"]["code"], 404);
    assert!(objects[1]["actions"]["download"]["href"].is_string());
    assert!(objects[1].get("error").is_none());
    assert_eq!(objects[2]["error"]["code"], 422);
}

#[tokio::test]
async fn test_size_mismatch_reported_per_object() {
    let h = Harness::spawn().await;
    let pointer = h.upload(&h.models, &h.alice, b"twelve bytes").await;

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({"operation": "download", "objects": [{"oid": pointer.oid, "size": pointer.size + 1}]}),
        )
        .await;
    assert_eq!(response["objects"][0]["error"]["code"], 422);
}

#[tokio::test]
async fn test_owned_object_upload_has_no_actions() {
    let h = Harness::spawn().await;
    let pointer = h.upload(&h.models, &h.alice, b"already here").await;

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({"operation": "upload", "objects": [{"oid": pointer.oid, "size": pointer.size}]}),
        )
        .await;
    let object = &response["objects"][0];
    assert!(object.get("actions").is_none());
    assert!(object.get("error").is_none());
}

#[tokio::test]
async fn test_max_file_size() {
    let h = Harness::spawn_with(|config| config.max_file_size = 16).await;
    let small = pointer_for(b"small");
    let large = pointer_for(&[7u8; 17]);

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({"operation": "upload", "objects": [
                {"oid": small.oid, "size": small.size},
                {"oid": large.oid, "size": large.size},
            ]}),
        )
        .await;
    assert!(response["objects"][0]["actions"]["upload"].is_object());
    assert_eq!(response["objects"][1]["error"]["code"], 422);
}

#[tokio::test]
async fn test_batch_rejects_bad_requests() {
    let h = Harness::spawn().await;

    let res = h.batch(&h.models, Some(&h.alice), json!({"operation": "delete", "objects": []})).await;
    assert_eq!(res.status(), 400);
    assert_eq!(res.headers()["content-type"], MEDIA_TYPE);

    let res = h
        .client
        .post(h.lfs_url(&h.models, "objects/batch"))
        .header("Accept", MEDIA_TYPE)
        .header(USER_HEADER, h.alice.id.to_string())
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
    let body: Value = res.json().await.unwrap();
    assert!(body["message"].is_string());
    assert!(body["request_id"].is_string());

    let res = h
        .batch(&h.models, Some(&h.alice), json!({"operation": "upload", "objects": []}))
        .await;
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn test_protocol_endpoints_require_media_type() {
    let h = Harness::spawn().await;
    let res = h
        .client
        .post(h.lfs_url(&h.models, "objects/batch"))
        .header("Accept", "application/json")
        .header(USER_HEADER, h.alice.id.to_string())
        .body(json!({"operation": "download", "objects": []}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 415);

    let res = h
        .client
        .post(h.lfs_url(&h.models, "verify"))
        .header(USER_HEADER, h.alice.id.to_string())
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 415);
}

#[tokio::test]
async fn test_unknown_repository() {
    let h = Harness::spawn().await;
    let res = h
        .client
        .post(format!("{}/nobody/nothing.git/info/lfs/objects/batch", h.base))
        .header("Accept", MEDIA_TYPE)
        .header(USER_HEADER, h.alice.id.to_string())
        .body(json!({"operation": "download", "objects": []}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn test_range_download() {
    let h = Harness::spawn().await;
    let data: Vec<u8> = (0..90u8).collect();
    let pointer = h.upload(&h.models, &h.alice, &data).await;
    let url = h.lfs_url(&h.models, &format!("objects/{}", pointer.oid));

    let res = h
        .client
        .get(&url)
        .header(USER_HEADER, h.alice.id.to_string())
        .header("Range", "bytes=10-19")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 10-19/80");
    assert_eq!(res.headers()["content-length"], "10");
    assert_eq!(res.bytes().await.unwrap().to_vec(), data[10..20].to_vec());

    // Open-ended ranges run to the last byte.
    let res = h
        .client
        .get(&url)
        .header(USER_HEADER, h.alice.id.to_string())
        .header("Range", "bytes=85-")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.bytes().await.unwrap().to_vec(), data[85..].to_vec());

    let res = h
        .client
        .get(&url)
        .header(USER_HEADER, h.alice.id.to_string())
        .header("Range", "bytes=90-")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 416);
}

#[tokio::test]
async fn test_named_download() {
    let h = Harness::spawn().await;
    let pointer = h.upload(&h.models, &h.alice, b"named payload").await;
    let name = URL_SAFE_NO_PAD.encode("model.bin");

    let res = h
        .client
        .get(h.lfs_url(&h.models, &format!("objects/{}/{name}", pointer.oid)))
        .header(USER_HEADER, h.alice.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-disposition"], "attachment; filename=\"model.bin\"");
    assert!(res.headers()["access-control-expose-headers"]
        .to_str()
        .unwrap()
        .to_ascii_lowercase()
        .contains("content-disposition"));

    let res = h
        .client
        .get(h.lfs_url(&h.models, &format!("objects/{}/%25%25", pointer.oid)))
        .header(USER_HEADER, h.alice.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn test_download_unknown_object() {
    let h = Harness::spawn().await;
    let pointer = pointer_for(b"ghost");
    let res = h
        .client
        .get(h.lfs_url(&h.models, &format!("objects/{}", pointer.oid)))
        .header(USER_HEADER, h.alice.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = h
        .client
        .get(h.lfs_url(&h.models, "objects/xyz"))
        .header(USER_HEADER, h.alice.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
}

#[tokio::test]
async fn test_upload_with_wrong_bytes_leaves_nothing() {
    let h = Harness::spawn().await;
    let pointer = pointer_for(b"the real content");

    let res = h
        .client
        .put(h.lfs_url(&h.models, &format!("objects/{}/{}", pointer.oid, pointer.size)))
        .header(USER_HEADER, h.alice.id.to_string())
        .body(b"the fake content".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
    assert!(!h.store.exists(&pointer).await.unwrap());
    assert!(h.meta.get(h.models.id, &pointer.oid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_upload_keeps_concurrent_owner() {
    let h = Harness::spawn().await;
    let data = b"racing upload payload".to_vec();
    let pointer = pointer_for(&data);
    let url = h.lfs_url(&h.models, &format!("objects/{}/{}", pointer.oid, pointer.size));

    // Start a bad upload and keep its body open.
    let (tx, rx) = mpsc::unbounded::<Result<Vec<u8>, std::io::Error>>();
    tx.unbounded_send(Ok(b"wrong".to_vec())).unwrap();
    let slow = tokio::spawn(
        h.client
            .put(&url)
            .header(USER_HEADER, h.alice.id.to_string())
            .body(reqwest::Body::wrap_stream(rx))
            .send(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.upload(&h.models, &h.alice, &data).await;
    assert!(h.meta.get(h.models.id, &pointer.oid).await.unwrap().is_some());

    drop(tx);
    let res = slow.await.unwrap().unwrap();
    assert_eq!(res.status(), 422);

    assert!(h.meta.get(h.models.id, &pointer.oid).await.unwrap().is_some());
    assert!(h.store.verify(&pointer).await.unwrap());
}

#[tokio::test]
async fn test_multipart_upload_flow() {
    let h = Harness::spawn().await;
    let data: Vec<u8> = b"twenty bytes of data".to_vec();
    let pointer = pointer_for(&data);

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({
                "operation": "upload",
                "transfers": ["basic", "multipart"],
                "objects": [{"oid": pointer.oid, "size": pointer.size}]
            }),
        )
        .await;
    assert_eq!(response["transfer"], "multipart");
    let actions = &response["objects"][0]["actions"];
    let parts = actions["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[2]["pos"], 16);
    assert_eq!(parts[2]["size"], 4);
    assert_eq!(parts[0]["method"], "PUT");

    let verify = &actions["verify"];
    assert_eq!(verify["method"], "POST");
    assert_eq!(verify["aggregation_params"]["key"], "part_ids");
    let upload_id = verify["params"]["upload_id"].as_str().unwrap().to_string();

    let mut part_ids = Vec::new();
    for part in parts {
        let index = part["index"].as_i64().unwrap() as i32;
        let pos = part["pos"].as_u64().unwrap() as usize;
        let size = part["size"].as_u64().unwrap() as usize;
        let etag = h
            .store
            .upload_part(&upload_id, index, data[pos..pos + size].to_vec())
            .unwrap();
        part_ids.push(json!({"index": index, "etag": etag}));
    }

    let mut request = h
        .client
        .post(verify["href"].as_str().unwrap())
        .header("Content-Type", MEDIA_TYPE)
        .body(json!({"upload_id": upload_id, "part_ids": part_ids}).to_string());
    for (name, value) in verify["header"].as_object().unwrap() {
        request = request.header(name.as_str(), value.as_str().unwrap());
    }
    let res = request.send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(h.meta.get(h.models.id, &pointer.oid).await.unwrap().is_some());

    let res = h
        .client
        .get(h.lfs_url(&h.models, &format!("objects/{}", pointer.oid)))
        .header(USER_HEADER, h.alice.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.bytes().await.unwrap().to_vec(), data);

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({
                "operation": "download",
                "transfers": "multipart",
                "objects": [{"oid": pointer.oid, "size": pointer.size}]
            }),
        )
        .await;
    assert_eq!(response["transfer"], "multipart");
    assert!(response["objects"][0]["actions"]["download"]["href"].is_string());
}

#[tokio::test]
async fn test_multipart_zero_size() {
    let h = Harness::spawn().await;
    let pointer = pointer_for(b"");

    let response = h
        .batch_json(
            &h.models,
            Some(&h.alice),
            json!({
                "operation": "upload",
                "transfers": ["multipart"],
                "objects": [{"oid": pointer.oid, "size": 0}]
            }),
        )
        .await;
    let actions = &response["objects"][0]["actions"];
    assert!(actions.get("parts").is_none());
    assert_eq!(h.store.pending_uploads(), 0);

    let res = h
        .client
        .post(h.lfs_url(&h.models, &format!("multipart-verify?oid={}&size=0", pointer.oid)))
        .header("Accept", MEDIA_TYPE)
        .header(USER_HEADER, h.alice.id.to_string())
        .body(json!({"upload_id": "", "part_ids": []}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(h.store.exists(&pointer).await.unwrap());
    assert!(h.meta.get(h.models.id, &pointer.oid).await.unwrap().is_some());
}

#[tokio::test]
async fn test_multipart_verify_rejects_bad_input() {
    let h = Harness::spawn().await;
    let pointer = pointer_for(b"some bytes");
    let url = |query: String| h.lfs_url(&h.models, &format!("multipart-verify?{query}"));

    let res = h
        .client
        .post(url(format!("oid={}&size=abc", pointer.oid)))
        .header("Accept", MEDIA_TYPE)
        .header(USER_HEADER, h.alice.id.to_string())
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);

    let res = h
        .client
        .post(url(format!("oid={}&size={}", pointer.oid, pointer.size)))
        .header("Accept", MEDIA_TYPE)
        .header(USER_HEADER, h.alice.id.to_string())
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);

    let res = h
        .client
        .post(url(format!("oid={}&size={}", pointer.oid, pointer.size)))
        .header("Accept", MEDIA_TYPE)
        .header(USER_HEADER, h.alice.id.to_string())
        .body(json!({"upload_id": "u", "part_ids": [{"index": 0, "etag": "x"}]}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let h = Harness::spawn().await;
    let res = h
        .client
        .get(format!("{}/", h.base))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-42");

    let res = h.client.get(format!("{}/", h.base)).send().await.unwrap();
    assert!(!res.headers()["x-request-id"].is_empty());
}
