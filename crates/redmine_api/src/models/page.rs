//! Offset/limit envelope shared by every Redmine list endpoint.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RedmineError, Result};

/// One page of a list response, normalized from `{"<key>": [...], "offset", "limit", "total_count"}`.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: u32,
    pub limit: u32,
    pub total_count: u32,
}

impl<T> Page<T> {
    /// Another page exists while `total_count > offset + limit`.
    pub fn has_more(&self) -> bool {
        self.limit > 0 && self.total_count > self.offset.saturating_add(self.limit)
    }

    pub fn next_offset(&self) -> u32 {
        self.offset.saturating_add(self.limit)
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Decodes a list response whose items live under `key`.
    ///
    /// Endpoints that are not paginated (statuses, activities) omit the counters;
    /// they are treated as one complete page.
    pub fn from_envelope(mut envelope: Value, key: &str) -> Result<Self> {
        let raw_items = envelope
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| {
                RedmineError::Serialization(format!("missing `{key}` in list response"))
            })?;
        let items: Vec<T> = serde_json::from_value(raw_items)?;

        let counter = |name: &str| {
            envelope
                .get(name)
                .and_then(Value::as_u64)
                .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
        };
        let len = u32::try_from(items.len()).unwrap_or(u32::MAX);
        let offset = counter("offset").unwrap_or(0);
        let limit = counter("limit").unwrap_or(len);
        let total_count = counter("total_count").unwrap_or_else(|| offset.saturating_add(len));

        Ok(Self {
            items,
            offset,
            limit,
            total_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn continuation_follows_total_count() {
        let first: Page<u32> = Page::from_envelope(
            json!({"ids": [1, 2], "offset": 0, "limit": 2, "total_count": 5}),
            "ids",
        )
        .unwrap();
        assert!(first.has_more());
        assert_eq!(first.next_offset(), 2);

        let last: Page<u32> = Page::from_envelope(
            json!({"ids": [5], "offset": 4, "limit": 2, "total_count": 5}),
            "ids",
        )
        .unwrap();
        assert!(!last.has_more());
    }

    #[test]
    fn unpaginated_lists_form_a_single_page() {
        let page: Page<u32> = Page::from_envelope(json!({"ids": [1, 2, 3]}), "ids").unwrap();
        assert_eq!((page.offset, page.limit, page.total_count), (0, 3, 3));
        assert!(!page.has_more());
    }

    #[test]
    fn zero_limit_never_continues() {
        let page: Page<u32> = Page::from_envelope(
            json!({"ids": [], "offset": 0, "limit": 0, "total_count": 9}),
            "ids",
        )
        .unwrap();
        assert!(!page.has_more());
    }

    #[test]
    fn missing_items_key_is_a_serialization_error() {
        let err = Page::<u32>::from_envelope(json!({"other": []}), "ids").unwrap_err();
        assert!(matches!(err, RedmineError::Serialization(_)));
    }
}
