//! Wire-format tests for the HTTP remote tier against a mock server

mod common;

#[cfg(test)]
mod tests {
    use super::common::{server_stored_value, setup_http_cache};
    use bytes::Bytes;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;
    use strata_cache::CacheStore;

    #[tokio::test]
    async fn test_set_sends_kv_set_with_ttl() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.set",
                "payload": {
                    "key": "session",
                    "ttl": 60
                }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "payload": {}}"#)
            .create_async()
            .await;

        let stored = cache
            .set("session", Bytes::from_static(b"token"), Some(Duration::from_secs(60)))
            .await;
        assert!(stored);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_without_ttl_uses_tier_default() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.set",
                "payload": { "key": "k", "ttl": 3600 }
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {}}"#)
            .create_async()
            .await;

        assert!(cache.set("k", Bytes::from_static(b"v"), None).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_decodes_stored_envelope() {
        let (cache, mut server) = setup_http_cache(None).await;
        let stored = server_stored_value(b"cached-profile").await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.get",
                "payload": { "key": "user:1" }
            })))
            .with_status(200)
            .with_body(json!({ "success": true, "payload": stored }).to_string())
            .create_async()
            .await;

        let value = cache.get("user:1").await;
        assert_eq!(value, Some(Bytes::from_static(b"cached-profile")));
        assert_eq!(cache.stats().hits, 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_null_payload_is_miss() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(200)
            .with_body(r#"{"success": true, "payload": null}"#)
            .create_async()
            .await;

        assert_eq!(cache.get("missing").await, None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_command_failure_is_absorbed() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(200)
            .with_body(r#"{"success": false, "error": "Out of memory"}"#)
            .expect(2)
            .create_async()
            .await;

        assert_eq!(cache.get("k").await, None);
        assert!(!cache.set("k", Bytes::from_static(b"v"), None).await);

        let stats = cache.stats();
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.misses, 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_status_is_absorbed() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        assert!(!cache.delete("k").await);
        assert_eq!(cache.stats().errors, 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_garbage_value_is_miss() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .with_status(200)
            .with_body(r#"{"success": true, "payload": "!!not base64!!"}"#)
            .create_async()
            .await;

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().errors, 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (cache, mut server) = setup_http_cache(None).await;

        let del = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({
                "command": "kv.del",
                "payload": { "key": "k" }
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"deleted": true}}"#)
            .create_async()
            .await;

        let flush = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::PartialJson(json!({ "command": "kv.flushdb" })))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {}}"#)
            .create_async()
            .await;

        assert!(cache.delete("k").await);
        assert!(cache.clear().await);

        del.assert_async().await;
        flush.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_token_sent_as_bearer() {
        let (cache, mut server) = setup_http_cache(Some("secret-token")).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_body(r#"{"success": true, "payload": {"deleted": false}}"#)
            .create_async()
            .await;

        assert!(!cache.delete("k").await);
        assert_eq!(cache.stats().errors, 0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_request_id_present() {
        let (cache, mut server) = setup_http_cache(None).await;

        let mock = server
            .mock("POST", "/api/v1/command")
            .match_body(Matcher::Regex(r#""request_id":"[0-9a-f-]{36}""#.to_string()))
            .with_status(200)
            .with_body(r#"{"success": true, "payload": null}"#)
            .create_async()
            .await;

        cache.get("k").await;
        mock.assert_async().await;
    }
}
