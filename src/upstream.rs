//! Upstream API endpoints and response shapes.
//!
//! The thumbnail API answers `GET {thumbnail_url}?assetIds=1,2&size=..&format=..`
//! with `{"data": [{"targetId": 1, "state": "Completed", "imageUrl": ".."}]}`.
//! Items are not guaranteed to come back in request order, and the field
//! carrying the identifier varies, so items are indexed by
//! [`item_id`] rather than by position.

use std::collections::HashMap;

use serde_json::Value;

use crate::{ProxyError, Result};

/// Default thumbnail batch endpoint.
pub const DEFAULT_THUMBNAIL_URL: &str = "https://thumbnails.roblox.com/v1/assets";

/// Default asset-delivery endpoint (the identifier is appended as a path segment).
pub const DEFAULT_ASSET_URL: &str = "https://assetdelivery.roblox.com/v1/assetId";

/// Fields that may carry an item's identifier, in lookup order.
pub const ID_FIELDS: &[&str] = &["targetId", "assetId", "id"];

/// URL templates of the upstream APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamApi {
    thumbnail_url: String,
    asset_url: String,
    size: String,
    format: String,
}

impl Default for UpstreamApi {
    fn default() -> Self {
        Self {
            thumbnail_url: DEFAULT_THUMBNAIL_URL.to_string(),
            asset_url: DEFAULT_ASSET_URL.to_string(),
            size: "420x420".to_string(),
            format: "Png".to_string(),
        }
    }
}

impl UpstreamApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the thumbnail endpoint elsewhere (e.g. a wiremock server).
    pub fn thumbnail_base(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = url.into();
        self
    }

    /// Point the asset-delivery endpoint elsewhere.
    pub fn asset_base(mut self, url: impl Into<String>) -> Self {
        self.asset_url = url.into();
        self
    }

    /// Requested thumbnail size, e.g. `420x420`.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Requested image format, e.g. `Png`.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Thumbnail lookup URL for one or more identifiers.
    pub fn thumbnails_url<S: AsRef<str>>(&self, ids: &[S]) -> String {
        let joined = ids.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");
        format!(
            "{}?assetIds={joined}&size={}&format={}",
            self.thumbnail_url, self.size, self.format
        )
    }

    /// Asset-delivery URL for one identifier.
    pub fn asset_url(&self, id: &str) -> String {
        format!("{}/{id}", self.asset_url.trim_end_matches('/'))
    }
}

/// Reject identifiers that would not survive URL interpolation.
///
/// Identifiers are opaque, but the upstream only issues alphanumeric ones;
/// allowing `-` and `_` keeps room for other schemes.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ProxyError::InvalidRequest("empty identifier".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ProxyError::InvalidRequest(format!(
            "malformed identifier {id:?}"
        )));
    }
    Ok(())
}

/// Identifier of an upstream item, from the first present [`ID_FIELDS`] entry.
///
/// Numbers and strings normalise to the same text, so `42` and `"42"` match.
pub fn item_id(item: &Value) -> Option<String> {
    ID_FIELDS
        .iter()
        .filter_map(|field| item.get(*field))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Index the `data` list of a thumbnail response by identifier.
///
/// A body without a `data` list yields an empty index. When the upstream
/// repeats an identifier, the first item wins.
pub fn index_items(body: &Value) -> HashMap<String, &Value> {
    let mut index = HashMap::new();
    let items = body.get("data").and_then(Value::as_array);
    for item in items.into_iter().flatten() {
        if let Some(id) = item_id(item) {
            index.entry(id).or_insert(item);
        }
    }
    index
}
