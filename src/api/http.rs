use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::StreamExt;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::wire::{decode_collection, decode_user};
use super::{CollectionPage, FetchError, PageRequest, ResourceFetcher};
use crate::model::{ResourceCategory, StandaloneResource};

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024; // 16MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Base URL of the public API.
pub const DEFAULT_BASE_URL: &str = "https://api.wanikani.com/v2/";
/// API revision pinned through the `Wanikani-Revision` header.
const API_REVISION: &str = "20170710";

/// [`ResourceFetcher`] over HTTPS with bearer-token authentication.
///
/// Rate limiting (429) and server errors (5xx) are retried with exponential
/// backoff; other failures are returned immediately. Continuation pages are
/// only followed when they stay on the configured API origin.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpFetcher {
    pub fn new(base_url: Url, api_key: SecretString) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kanjisync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(client: reqwest::Client, mut base_url: Url, api_key: SecretString) -> Self {
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            api_key,
            retry_delay: DEFAULT_RETRY_DELAY,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Base delay of the exponential backoff (doubled on every retry).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Upper bound on one attempt, from sending the request to the last body byte.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn collection_url(
        &self,
        category: ResourceCategory,
        request: &PageRequest,
    ) -> Result<Url, FetchError> {
        match request {
            PageRequest::First { updated_after } => {
                let mut url = self
                    .base_url
                    .join(category.as_str())
                    .map_err(|e| FetchError::Decode(format!("invalid endpoint: {e}")))?;
                if let Some(after) = updated_after {
                    url.query_pairs_mut().append_pair(
                        "updated_after",
                        &after.to_rfc3339_opts(SecondsFormat::Micros, true),
                    );
                }
                Ok(url)
            }
            PageRequest::Next(next) => {
                let url = Url::parse(next)
                    .map_err(|e| FetchError::Decode(format!("invalid next_url {next:?}: {e}")))?;
                if url.origin() != self.base_url.origin() {
                    return Err(FetchError::Decode(format!(
                        "next_url {next:?} leaves the API origin"
                    )));
                }
                Ok(url)
            }
        }
    }

    async fn get(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let request = self
                .client
                .get(url.clone())
                .bearer_auth(self.api_key.expose_secret())
                .header("Wanikani-Revision", API_REVISION);

            let deadline = tokio::time::Instant::now() + self.request_timeout;
            let response = tokio::time::timeout_at(deadline, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(network_error)?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }
                let delay = self.retry_delay * 2u32.pow(retry_count);
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.retry_delay * 2u32.pow(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(FetchError::InvalidCredential)
                }
                StatusCode::NOT_FOUND => return Err(FetchError::NotFound(url.to_string())),
                s if !s.is_success() => return Err(FetchError::HttpStatus(s.as_u16())),
                _ => {}
            }

            let body =
                tokio::time::timeout_at(deadline, read_limited_bytes(response, MAX_RESPONSE_SIZE))
                    .await
                    .map_err(|_| FetchError::Timeout)?;
            match body {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.retry_delay * 2u32.pow(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch_collection(
        &self,
        category: ResourceCategory,
        request: &PageRequest,
    ) -> Result<CollectionPage, FetchError> {
        if category.is_standalone() {
            return Err(FetchError::Decode(format!("{category} is not a collection")));
        }
        let url = self.collection_url(category, request)?;
        tracing::debug!(category = %category, url = %url, "Fetching collection page");

        let body = self.get(url).await?;
        decode_collection(category, &body)
    }

    async fn fetch_user(&self) -> Result<StandaloneResource, FetchError> {
        let url = self
            .base_url
            .join(ResourceCategory::User.as_str())
            .map_err(|e| FetchError::Decode(format!("invalid endpoint: {e}")))?;
        tracing::debug!(url = %url, "Fetching user");

        let body = self.get(url).await?;
        decode_user(&body)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(network_error)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

fn network_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_PAGE: &str =
        r#"{"object":"collection","pages":{"next_url":null},"data_updated_at":null,"data":[]}"#;

    fn fetcher(server: &MockServer) -> HttpFetcher {
        let base = Url::parse(&format!("{}/v2", server.uri())).unwrap();
        HttpFetcher::new(base, SecretString::from("test-key".to_string()))
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    fn study_material_page(id: i64, next_url: Option<String>) -> String {
        serde_json::json!({
            "object": "collection",
            "pages": {"next_url": next_url},
            "data_updated_at": "2024-03-01T10:00:00.000000Z",
            "data": [{
                "id": id,
                "object": "study_material",
                "url": format!("https://api.example.com/v2/study_materials/{id}"),
                "data_updated_at": "2024-03-01T10:00:00.000000Z",
                "data": {
                    "subject_id": id + 100,
                    "subject_type": "kanji",
                    "meaning_note": "note",
                    "reading_note": null,
                    "meaning_synonyms": ["synonym"]
                }
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_first_page_sends_auth_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/assignments"))
            .and(header("Authorization", "Bearer test-key"))
            .and(header("Wanikani-Revision", API_REVISION))
            .and(query_param("updated_after", "2024-03-01T10:00:00.000000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let request = PageRequest::First {
            updated_after: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
        };
        let page = fetcher(&server)
            .fetch_collection(ResourceCategory::Assignments, &request)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_follows_next_url_on_same_origin() {
        let server = MockServer::start().await;
        let next = format!("{}/v2/study_materials?page_after_id=1", server.uri());
        Mock::given(method("GET"))
            .and(path("/v2/study_materials"))
            .and(query_param("page_after_id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(study_material_page(2, None)))
            .mount(&server)
            .await;

        let page = fetcher(&server)
            .fetch_collection(ResourceCategory::StudyMaterials, &PageRequest::Next(next))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 2);
        assert!(page.next_url.is_none());
    }

    #[tokio::test]
    async fn test_next_url_on_foreign_origin_is_rejected() {
        let server = MockServer::start().await;
        let err = fetcher(&server)
            .fetch_collection(
                ResourceCategory::StudyMaterials,
                &PageRequest::Next("https://elsewhere.example.com/v2/study_materials".into()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                      Content-Length: 512\r\n\r\n{\"object\": \"user\"",
                )
                .await
                .unwrap();
            // Hold the connection open without finishing the body.
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let base = Url::parse(&format!("http://{addr}/v2")).unwrap();
        let fetcher = HttpFetcher::new(base, SecretString::from("test-key".to_string()))
            .unwrap()
            .with_request_timeout(Duration::from_millis(300));

        let started = std::time::Instant::now();
        let err = fetcher.fetch_user().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout), "got {err:?}");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[tokio::test]
    async fn test_unauthorized_is_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(&server).fetch_user().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidCredential));
        assert_eq!(err.kind(), ErrorKind::InvalidCredential);
    }

    #[tokio::test]
    async fn test_not_found_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(&server)
            .fetch_collection(
                ResourceCategory::Subjects,
                &PageRequest::First {
                    updated_after: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_server_error_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&server)
            .await;

        let err = fetcher(&server)
            .fetch_collection(
                ResourceCategory::Subjects,
                &PageRequest::First {
                    updated_after: None,
                },
            )
            .await
            .unwrap_err();
        match err {
            FetchError::HttpStatus(500) => {}
            e => panic!("Expected HttpStatus(500), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(study_material_page(1, None)))
            .mount(&server)
            .await;

        let page = fetcher(&server)
            .fetch_collection(
                ResourceCategory::StudyMaterials,
                &PageRequest::First { updated_after: None },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_user_is_not_a_collection() {
        let server = MockServer::start().await;
        let err = fetcher(&server)
            .fetch_collection(ResourceCategory::User, &PageRequest::First { updated_after: None })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let fetcher = HttpFetcher::new(
            Url::parse(DEFAULT_BASE_URL).unwrap(),
            SecretString::from("super-secret".to_string()),
        )
        .unwrap();
        let debug = format!("{fetcher:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
