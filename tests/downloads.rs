//! Image download tests
//!
//! Ordering, per-item timeouts, failure isolation, concurrency bounds and
//! format sniffing against a mock backend.

use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zentao::download::{FetchMode, ImageFormat};
use zentao::prelude::*;

mod common;
use common::{GIF, JPEG, PNG, TEST_TIMEOUT, config_builder, endpoint_path, mount_login};

#[cfg(test)]
mod download_tests {
    use super::*;

    async fn mount_image(server: &MockServer, name: &str, body: &[u8], delay: Duration) {
        Mock::given(method("GET"))
            .and(path(endpoint_path(name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body.to_vec())
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }

    fn client_with(server: &MockServer, timeout_ms: u64, concurrency: usize) -> Zentao {
        common::init_tracing();
        let config = config_builder(server)
            .image_timeout_ms(timeout_ms)
            .image_concurrency(concurrency)
            .build()
            .unwrap();
        Zentao::new(config).unwrap()
    }

    fn url(server: &MockServer, name: &str) -> String {
        format!("{}{}", server.uri(), endpoint_path(name))
    }

    #[tokio::test]
    async fn test_stalled_item_times_out_in_place() {
        let server = MockServer::start().await;
        mount_login(&server, &["sid1"]).await;
        mount_image(&server, "file-read-1.png", PNG, Duration::ZERO).await;
        mount_image(&server, "file-read-2.png", PNG, Duration::from_secs(30)).await;
        mount_image(&server, "file-read-3.jpg", JPEG, Duration::ZERO).await;

        let client = client_with(&server, 500, 8);
        // Log in first so the timing below covers only the downloads.
        client.sessions().ensure_session().await.unwrap();

        let urls = vec![
            url(&server, "file-read-1.png"),
            url(&server, "file-read-2.png"),
            url(&server, "file-read-3.jpg"),
        ];
        let started = Instant::now();
        let results = client.fetch_images(&urls, FetchMode::Parallel).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.url.as_str()).collect::<Vec<_>>(),
            urls.iter().map(String::as_str).collect::<Vec<_>>()
        );
        assert!(results[0].is_success());
        assert!(results[1].timed_out());
        assert!(results[2].is_success());
        assert_eq!(results[2].format(), Some(ImageFormat::Jpeg));
        assert!(elapsed < Duration::from_millis(1_500), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_serial_mode_keeps_order_and_tolerates_failures() {
        let server = MockServer::start().await;
        mount_login(&server, &["sid1"]).await;
        mount_image(&server, "a.gif", GIF, Duration::ZERO).await;
        Mock::given(method("GET"))
            .and(path(endpoint_path("missing.png")))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;
        mount_image(&server, "c.png", PNG, Duration::ZERO).await;

        let client = client_with(&server, 2_000, 8);
        let urls = vec![
            url(&server, "a.gif"),
            url(&server, "missing.png"),
            url(&server, "c.png"),
        ];
        let results = tokio::time::timeout(
            TEST_TIMEOUT,
            client.fetch_images(&urls, FetchMode::Serial),
        )
        .await
        .unwrap();

        assert_eq!(results[0].format(), Some(ImageFormat::Gif));
        assert!(!results[1].is_success());
        assert!(!results[1].timed_out());
        assert!(results[1].error().unwrap().contains("404"));
        assert_eq!(results[2].format(), Some(ImageFormat::Png));
        assert_eq!(results[2].size(), PNG.len());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let server = MockServer::start().await;
        mount_login(&server, &["sid1"]).await;
        for name in ["1.png", "2.png", "3.png"] {
            mount_image(&server, name, PNG, Duration::from_millis(200)).await;
        }

        let client = client_with(&server, 5_000, 1);
        client.sessions().ensure_session().await.unwrap();
        let urls: Vec<String> = ["1.png", "2.png", "3.png"]
            .iter()
            .map(|n| url(&server, n))
            .collect();

        let started = Instant::now();
        let results = client.fetch_images(&urls, FetchMode::Parallel).await;

        assert!(results.iter().all(|r| r.is_success()));
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_duplicate_urls_are_fetched_once() {
        let server = MockServer::start().await;
        mount_login(&server, &["sid1"]).await;
        Mock::given(method("GET"))
            .and(path(endpoint_path("dup.png")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(&server, 2_000, 4);
        let urls = vec![url(&server, "dup.png"), url(&server, "dup.png")];
        let results = client.fetch_images(&urls, FetchMode::Parallel).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
    }

    #[tokio::test]
    async fn test_unknown_signature_defaults_to_png() {
        let server = MockServer::start().await;
        mount_login(&server, &["sid1"]).await;
        mount_image(&server, "file-read-9.webp", b"RIFF\x00\x00\x00\x00WEBPVP8 ", Duration::ZERO).await;

        let client = client_with(&server, 2_000, 4);
        let results = client
            .fetch_images(&[url(&server, "file-read-9.webp")], FetchMode::Parallel)
            .await;

        assert_eq!(results[0].format(), Some(ImageFormat::Png));
        assert_eq!(results[0].format().map(|f| f.mime_type()), Some("image/png"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let server = MockServer::start().await;
        let client = client_with(&server, 2_000, 4);
        assert!(client.fetch_images(&[], FetchMode::Parallel).await.is_empty());
    }
}
