//! Batch protocol wire types
//!
//! JSON shapes exchanged with LFS clients: batch request/response, transfer
//! actions, multipart part lists and the multipart commit manifest.

use chrono::{DateTime, Utc};
use lfs_store::Pointer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media type of every protocol request and response body
pub const MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

pub const TRANSFER_BASIC: &str = "basic";
pub const TRANSFER_MULTIPART: &str = "multipart";

/// A field that may be a single string or a list of strings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(one) => one == value,
            Self::Many(many) => many.iter().any(|v| v == value),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(one) => vec![one],
            Self::Many(many) => many,
        }
    }
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::One(TRANSFER_BASIC.to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operation: String,
    #[serde(default)]
    pub transfers: OneOrMany,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    pub objects: Vec<Pointer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub transfer: String,
    pub objects: Vec<ObjectResponse>,
}

/// A simple transfer step: where to send the request and which headers to add
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

impl ObjectError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Shape of the list the client submits when committing a multipart upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationParams {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub item: String,
}

impl AggregationParams {
    /// `{"key": "part_ids", "type": "array", "item": "index,etag"}`
    pub fn part_ids() -> Self {
        Self {
            key: "part_ids".to_string(),
            kind: "array".to_string(),
            item: "index,etag".to_string(),
        }
    }
}

/// A multipart transfer step
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartEndpoint {
    pub href: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_params: Option<AggregationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

/// One chunk of a multipart upload. Parts already held by the backend carry
/// their etag and no endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartAction {
    /// 1-based part index
    pub index: i32,
    pub pos: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub endpoint: Option<MultipartEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<PartAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<MultipartEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectActions {
    Basic(BTreeMap<String, Link>),
    Multipart(MultipartActions),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectResponse {
    #[serde(flatten)]
    pub pointer: Pointer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ObjectActions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

impl ObjectResponse {
    pub fn new(pointer: Pointer) -> Self {
        Self {
            pointer,
            authenticated: None,
            actions: None,
            error: None,
        }
    }

    pub fn with_error(pointer: Pointer, error: ObjectError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(pointer)
        }
    }

    pub fn with_actions(pointer: Pointer, actions: ObjectActions) -> Self {
        Self {
            actions: Some(actions),
            ..Self::new(pointer)
        }
    }
}

/// One `{index, etag}` entry of a commit manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartId {
    pub index: i32,
    pub etag: String,
}

/// Body of a multipart-verify request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitManifest {
    pub upload_id: String,
    #[serde(default)]
    pub part_ids: Vec<PartId>,
}

/// An entry of the direct download URL listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectUrl {
    pub oid: String,
    pub size: i64,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transfers_one_or_many() {
        let single: BatchRequest = serde_json::from_value(json!({
            "operation": "upload",
            "transfers": "multipart",
            "objects": []
        }))
        .unwrap();
        assert!(single.transfers.contains("multipart"));

        let list: BatchRequest = serde_json::from_value(json!({
            "operation": "upload",
            "transfers": ["basic", "multipart"],
            "objects": [{"oid": "abc", "size": 3}]
        }))
        .unwrap();
        assert_eq!(list.transfers.clone().into_vec(), vec!["basic", "multipart"]);
        assert_eq!(list.objects[0].size, 3);

        let absent: BatchRequest =
            serde_json::from_value(json!({"operation": "download", "objects": []})).unwrap();
        assert_eq!(absent.transfers, OneOrMany::One("basic".to_string()));
    }

    #[test]
    fn test_transfers_rejects_other_shapes() {
        for bad in [json!(5), json!({"a": 1}), json!([1, 2])] {
            let result: Result<BatchRequest, _> = serde_json::from_value(json!({
                "operation": "upload",
                "transfers": bad,
                "objects": []
            }));
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_part_action_flattens_endpoint() {
        let part = PartAction {
            index: 1,
            pos: 0,
            size: 10,
            etag: None,
            endpoint: Some(MultipartEndpoint {
                href: "https://s3/part".to_string(),
                method: "PUT".to_string(),
                expires_in: Some(900),
                ..MultipartEndpoint::default()
            }),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(
            value,
            json!({"index": 1, "pos": 0, "size": 10, "href": "https://s3/part", "method": "PUT", "expires_in": 900})
        );
    }

    #[test]
    fn test_object_response_shape() {
        let response = ObjectResponse::with_error(Pointer::new("abc", 1), ObjectError::new(404, "Object does not exist"));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"oid": "abc", "size": 1, "error": {"code": 404, "message": "Object does not exist"}})
        );
    }

    #[test]
    fn test_commit_manifest() {
        let manifest: CommitManifest = serde_json::from_value(json!({
            "upload_id": "u-1",
            "part_ids": [{"index": 1, "etag": "e1"}, {"index": 2, "etag": "e2"}]
        }))
        .unwrap();
        assert_eq!(manifest.part_ids.len(), 2);
        assert_eq!(
            serde_json::to_value(AggregationParams::part_ids()).unwrap(),
            json!({"key": "part_ids", "type": "array", "item": "index,etag"})
        );
    }
}
