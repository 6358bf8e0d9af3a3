//! HTTP API for auxiliary player, party and voting data.
//!
//! [`InfoApi`] is the seam the fetcher and the sync loop call through;
//! [`HttpInfoApi`] implements it over `reqwest` against the Fairmocracy
//! backend:
//!
//! | Method                          | Endpoint                                 |
//! |---------------------------------|------------------------------------------|
//! | [`user_info`](InfoApi::user_info)       | `GET /v1/user/{userId}`                  |
//! | [`parties`](InfoApi::parties)           | `GET /game/{gameId}/parties`             |
//! | [`voting_state`](InfoApi::voting_state) | `GET /v1/voting/current_state/{gameId}`  |

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Id, PartyInfo, UserInfo, VotingState};

/// Read-only access to the backend's auxiliary data.
#[async_trait]
pub trait InfoApi: Send + Sync + 'static {
    /// Personal info for `user_id`.
    async fn user_info(&self, user_id: &Id) -> Result<UserInfo>;

    /// All parties of `game_id`.
    async fn parties(&self, game_id: &Id) -> Result<Vec<PartyInfo>>;

    /// Voting system and reward tables of the current voting event of
    /// `game_id`.
    async fn voting_state(&self, game_id: &Id) -> Result<VotingState>;
}

#[cfg(feature = "http-api")]
pub use http::HttpInfoApi;

#[cfg(feature = "http-api")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::de::DeserializeOwned;
    use tracing::debug;

    use super::InfoApi;
    use crate::error::{Result, SyncError};
    use crate::protocol::{Id, PartyInfo, UserInfo, VotingState};

    /// Per-request timeout used by [`HttpInfoApi::new`].
    const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// [`InfoApi`] backed by the backend's HTTP endpoints.
    #[derive(Debug, Clone)]
    pub struct HttpInfoApi {
        base_url: String,
        http: reqwest::Client,
    }

    impl HttpInfoApi {
        /// Create an API client for the backend at `base_url`.
        ///
        /// # Errors
        ///
        /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            let http = reqwest::Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()?;
            Ok(Self::with_client(base_url, http))
        }

        /// Create an API client that reuses an existing `reqwest` client.
        pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            Self { base_url, http }
        }

        async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
            let url = format!("{}{}", self.base_url, path);
            debug!(url = %url, "requesting");
            let response = self.http.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SyncError::HttpStatus {
                    status: status.as_u16(),
                    url,
                });
            }
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        }
    }

    #[async_trait]
    impl InfoApi for HttpInfoApi {
        async fn user_info(&self, user_id: &Id) -> Result<UserInfo> {
            self.get_json(&format!("/v1/user/{user_id}")).await
        }

        async fn parties(&self, game_id: &Id) -> Result<Vec<PartyInfo>> {
            self.get_json(&format!("/game/{game_id}/parties")).await
        }

        async fn voting_state(&self, game_id: &Id) -> Result<VotingState> {
            self.get_json(&format!("/v1/voting/current_state/{game_id}"))
                .await
        }
    }

    #[cfg(test)]
    #[allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )]
    mod tests {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::sync::oneshot;

        /// Serve a single HTTP response and report the request line.
        async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (line_tx, line_rx) = oneshot::channel();

            tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                let line = text.lines().next().unwrap_or_default().to_string();
                let _ = line_tx.send(line);

                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            });

            (format!("http://{addr}/"), line_rx)
        }

        #[tokio::test]
        async fn user_info_requests_user_endpoint() {
            let (url, line) = serve_once("200 OK", r#"{"extra_info": {"role": "farmer"}}"#).await;
            let api = HttpInfoApi::new(url).unwrap();

            let info = api.user_info(&Id::from("12")).await.unwrap();
            assert_eq!(info.extra_info["role"], "farmer");
            assert_eq!(line.await.unwrap(), "GET /v1/user/12 HTTP/1.1");
        }

        #[tokio::test]
        async fn parties_requests_game_endpoint() {
            let (url, line) =
                serve_once("200 OK", r#"[{"id": 1, "extra_info": {}}, {"id": 2}]"#).await;
            let api = HttpInfoApi::new(url).unwrap();

            let parties = api.parties(&Id::from("3")).await.unwrap();
            assert_eq!(parties.len(), 2);
            assert_eq!(parties[1].id, Id::from("2"));
            assert_eq!(line.await.unwrap(), "GET /game/3/parties HTTP/1.1");
        }

        #[tokio::test]
        async fn voting_state_requests_current_state_endpoint() {
            let (url, line) = serve_once(
                "200 OK",
                r#"{"voting_system": "MAJORITY", "extra_info": {"MAJORITY": {}}}"#,
            )
            .await;
            let api = HttpInfoApi::new(url).unwrap();

            let state = api.voting_state(&Id::from("3")).await.unwrap();
            assert_eq!(state.voting_system.as_deref(), Some("MAJORITY"));
            assert_eq!(
                line.await.unwrap(),
                "GET /v1/voting/current_state/3 HTTP/1.1"
            );
        }

        #[tokio::test]
        async fn non_success_status_is_an_error() {
            let (url, _line) = serve_once("404 Not Found", "{}").await;
            let api = HttpInfoApi::new(url).unwrap();

            let err = api.user_info(&Id::from("1")).await.unwrap_err();
            assert!(matches!(err, SyncError::HttpStatus { status: 404, .. }));
        }

        #[tokio::test]
        async fn malformed_body_is_a_serialization_error() {
            let (url, _line) = serve_once("200 OK", "not json").await;
            let api = HttpInfoApi::new(url).unwrap();

            let err = api.parties(&Id::from("1")).await.unwrap_err();
            assert!(matches!(err, SyncError::Serialization(_)));
        }

        #[tokio::test]
        async fn unreachable_host_is_an_http_error() {
            let api = HttpInfoApi::new("http://127.0.0.1:1").unwrap();
            let err = api.user_info(&Id::from("1")).await.unwrap_err();
            assert!(matches!(err, SyncError::Http(_)));
        }
    }
}
