//! Logical reads against the Vault HTTP API
//!
//! Only one interaction is needed for rotation: `GET /v1/<mount>/creds/<role>`
//! on a database secrets engine. Each call issues a brand new credential with
//! its own lease.

use std::time::Duration;

use common::Secret;
use tracing::debug;

use crate::constants::{API_PREFIX, CREDS_SEGMENT, TOKEN_HEADER};
use crate::credentials::{Credential, Lease, LogicalResponse};
use crate::error::{Error, Result};

/// Build the logical path for a role's dynamic credentials.
///
/// Leading and trailing slashes on either part are ignored, so
/// `"/postgresql/preprod/"` and `"postgresql/preprod"` produce the same path.
pub fn credentials_path(mount_path: &str, role: &str) -> String {
    format!(
        "{}/{}/{}",
        mount_path.trim_matches('/'),
        CREDS_SEGMENT,
        role.trim_matches('/')
    )
}

/// Pre-authenticated Vault client.
pub struct VaultClient {
    http: reqwest::Client,
    address: String,
    token: Secret<String>,
}

impl VaultClient {
    /// Create a client for `address` using an already-issued `token`.
    ///
    /// `address` must be an http(s) URL; a trailing slash is dropped.
    pub fn new(address: &str, token: Secret<String>, timeout: Duration) -> Result<Self> {
        if !address.starts_with("http://") && !address.starts_with("https://") {
            return Err(Error::Config(format!(
                "address must start with http:// or https://, got: {address}"
            )));
        }
        if token.expose().is_empty() {
            return Err(Error::Config("token must not be empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            address: address.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Backend base address, without trailing slash.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Issue a fresh credential for `role` on the database mount `mount_path`.
    pub async fn read_database_credentials(
        &self,
        mount_path: &str,
        role: &str,
    ) -> Result<(Credential, Lease)> {
        self.read_credentials(&credentials_path(mount_path, role))
            .await
    }

    /// Logical read of `path`, expecting a username/password payload.
    pub async fn read_credentials(&self, path: &str) -> Result<(Credential, Lease)> {
        let url = format!(
            "{}/{}/{}",
            self.address,
            API_PREFIX,
            path.trim_start_matches('/')
        );
        debug!(path, "reading credentials from secret backend");

        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, self.token.expose().as_str())
            .send()
            .await
            .map_err(|e| Error::Http(format!("read of {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            return Err(match status.as_u16() {
                401 | 403 => Error::AccessDenied(format!("read of {path} rejected ({status}): {body}")),
                404 => Error::NotFound(path.to_string()),
                code => Error::Status { status: code, body },
            });
        }

        let logical = response
            .json::<LogicalResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("decoding response for {path}: {e}")))?;

        logical.into_parts(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    const TEST_TOKEN: &str = "s.test-token";

    async fn issue_credentials(headers: HeaderMap) -> impl IntoResponse {
        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if token != TEST_TOKEN {
            return (
                StatusCode::FORBIDDEN,
                r#"{"errors":["permission denied"]}"#.to_string(),
            );
        }
        (
            StatusCode::OK,
            serde_json::json!({
                "lease_id": "database/creds/app/xyz",
                "lease_duration": 3600,
                "renewable": true,
                "data": {"username": "v-token-app-123", "password": "A1a-generated"}
            })
            .to_string(),
        )
    }

    /// Start a fake Vault on an ephemeral port.
    async fn start_fake_vault() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/v1/database/creds/app", get(issue_credentials))
            .route(
                "/v1/database/creds/denied",
                get(|| async { (StatusCode::FORBIDDEN, r#"{"errors":["permission denied"]}"#) }),
            )
            .route(
                "/v1/database/creds/sealed",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "Vault is sealed") }),
            )
            .route(
                "/v1/database/creds/garbled",
                get(|| async { (StatusCode::OK, "not json") }),
            );

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }

    fn client(address: &str, token: &str) -> VaultClient {
        VaultClient::new(
            address,
            Secret::new(token.to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn credentials_path_trims_slashes() {
        assert_eq!(
            credentials_path("/postgresql/preprod/", "app-user"),
            "postgresql/preprod/creds/app-user"
        );
        assert_eq!(credentials_path("database", "/app/"), "database/creds/app");
    }

    #[test]
    fn new_rejects_non_http_address() {
        let result = VaultClient::new(
            "vault.internal:8200",
            Secret::new("t".to_string()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn new_rejects_empty_token() {
        let result = VaultClient::new(
            "https://vault.internal:8200",
            Secret::new(String::new()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn new_drops_trailing_slash() {
        let client = client("https://vault.internal:8200/", "t");
        assert_eq!(client.address(), "https://vault.internal:8200");
    }

    #[tokio::test]
    async fn reads_credentials_and_lease() {
        let (address, _server) = start_fake_vault().await;
        let client = client(&address, TEST_TOKEN);

        let (credential, lease) = client
            .read_database_credentials("database", "app")
            .await
            .unwrap();
        assert_eq!(credential.username, "v-token-app-123");
        assert_eq!(credential.password.expose(), "A1a-generated");
        assert_eq!(lease.id, "database/creds/app/xyz");
        assert_eq!(lease.duration, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn wrong_token_is_access_denied() {
        let (address, _server) = start_fake_vault().await;
        let client = client(&address, "s.revoked");

        let err = client
            .read_database_credentials("database", "app")
            .await
            .unwrap_err();
        assert!(err.is_access_denied(), "got {err:?}");
    }

    #[tokio::test]
    async fn forbidden_path_is_access_denied() {
        let (address, _server) = start_fake_vault().await;
        let client = client(&address, TEST_TOKEN);

        let err = client
            .read_database_credentials("database", "denied")
            .await
            .unwrap_err();
        assert!(err.is_access_denied());
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn unknown_role_is_not_found() {
        let (address, _server) = start_fake_vault().await;
        let client = client(&address, TEST_TOKEN);

        let err = client
            .read_database_credentials("database", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let (address, _server) = start_fake_vault().await;
        let client = client(&address, TEST_TOKEN);

        let err = client
            .read_database_credentials("database", "sealed")
            .await
            .unwrap_err();
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "Vault is sealed");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_response() {
        let (address, _server) = start_fake_vault().await;
        let client = client(&address, TEST_TOKEN);

        let err = client
            .read_database_credentials("database", "garbled")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_http_error() {
        // Bind then drop to get a port nobody is listening on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&format!("http://{addr}"), TEST_TOKEN);
        let err = client
            .read_database_credentials("database", "app")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }
}
