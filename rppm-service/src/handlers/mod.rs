pub mod auth;
pub mod generate;
pub mod health;
pub mod metrics;
pub mod usage;

use axum::http::HeaderMap;
use serde::Deserialize;

pub const OWNER_KEY_HEADER: &str = "x-owner-key";

/// Query parameters accepted alongside the JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct OwnerKeyQuery {
    pub owner_key: Option<String>,
}

/// Owner key from the `x-owner-key` header, else the `owner_key` query
/// parameter.
pub(crate) fn owner_key<'a>(headers: &'a HeaderMap, query: &'a OwnerKeyQuery) -> Option<&'a str> {
    headers
        .get(OWNER_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.owner_key.as_deref())
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(OWNER_KEY_HEADER, "from-header".parse().unwrap());
        let query = OwnerKeyQuery {
            owner_key: Some("from-query".to_string()),
        };
        assert_eq!(owner_key(&headers, &query), Some("from-header"));
        assert_eq!(owner_key(&HeaderMap::new(), &query), Some("from-query"));
        assert_eq!(owner_key(&HeaderMap::new(), &OwnerKeyQuery::default()), None);
    }
}
