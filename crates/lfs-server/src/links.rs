//! Action link construction for batch responses

use lfs_store::Pointer;
use std::collections::BTreeMap;
use urlencoding::encode;

/// Builds transfer URLs for one repository
#[derive(Clone, Debug)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    /// `app_url` must end with a slash
    pub fn new(app_url: &str, owner: &str, repo: &str) -> Self {
        Self {
            base: format!("{app_url}{}/{}.git/info/lfs", encode(owner), encode(repo)),
        }
    }

    pub fn download(&self, pointer: &Pointer) -> String {
        format!("{}/objects/{}", self.base, encode(&pointer.oid))
    }

    pub fn upload(&self, pointer: &Pointer) -> String {
        format!("{}/objects/{}/{}", self.base, encode(&pointer.oid), pointer.size)
    }

    pub fn verify(&self) -> String {
        format!("{}/verify", self.base)
    }

    pub fn multipart_verify(&self, pointer: &Pointer) -> String {
        format!(
            "{}/multipart-verify?oid={}&size={}",
            self.base,
            encode(&pointer.oid),
            pointer.size
        )
    }
}

/// Headers for action links, with `Authorization` when a credential is known
pub fn auth_header(authorization: Option<&str>) -> BTreeMap<String, String> {
    authorization
        .map(|value| BTreeMap::from([("Authorization".to_string(), value.to_string())]))
        .unwrap_or_default()
}
