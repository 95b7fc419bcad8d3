use super::{with_retry, SbiError, CONNECT_TIMEOUT, READ_TIMEOUT};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Vendor REST driver (§4.1): one `reqwest::Client` per device, a base URL,
/// and bearer-token auth, grounded on the teacher's `netbox::netbox_client`
/// construction.
#[derive(Clone, Debug)]
pub struct RestDriver {
    base_url: String,
    client: reqwest::Client,
}

impl RestDriver {
    pub fn new(base_url: impl Into<String>, token: &str, verify_tls: bool) -> Result<Self, SbiError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SbiError::Misconfigured(format!("invalid token header: {e}")))?;
        headers.insert(AUTHORIZATION, value);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_tls)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| SbiError::Misconfigured(format!("cannot build rest client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Issues one REST call, retried on transport failure, with an optional
    /// typed request body and an optional typed response. A response that
    /// fails to deserialize against the caller-supplied schema is
    /// classified `Misconfigured`, per §4.1.
    pub async fn call<Req: Serialize + Clone, Resp: DeserializeOwned>(
        &self,
        method: RestMethod,
        path: &str,
        body: Option<Req>,
    ) -> Result<Resp, SbiError> {
        let driver = self.clone();
        with_retry(|| {
            let driver = driver.clone();
            let body = body.clone();
            let path = path.to_string();
            async move { driver.call_once(method, &path, body).await }
        })
        .await
    }

    async fn call_once<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: RestMethod,
        path: &str,
        body: Option<Req>,
    ) -> Result<Resp, SbiError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let reqwest_method = match method {
            RestMethod::Get => reqwest::Method::GET,
            RestMethod::Post => reqwest::Method::POST,
            RestMethod::Put => reqwest::Method::PUT,
            RestMethod::Patch => reqwest::Method::PATCH,
            RestMethod::Delete => reqwest::Method::DELETE,
        };
        let mut request = self.client.request(reqwest_method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SbiError::Unauthenticated(format!("{url} returned {status}")));
        }
        if status.is_server_error() {
            return Err(SbiError::Unreachable(format!("{url} returned {status}")));
        }
        let text = response.text().await.map_err(classify_transport_error)?;
        serde_json::from_str(&text)
            .map_err(|e| SbiError::Misconfigured(format!("response schema mismatch on {url}: {e}")))
    }
}

fn classify_transport_error(err: reqwest::Error) -> SbiError {
    if err.is_timeout() || err.is_connect() {
        SbiError::Unreachable(err.to_string())
    } else if err.status().map(|s| s.as_u16()) == Some(401) {
        SbiError::Unauthenticated(err.to_string())
    } else {
        SbiError::Unreachable(err.to_string())
    }
}
