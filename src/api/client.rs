use chunk_upload::TransmitError;
use log::debug;
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::models::ErrorBody;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Authenticated client for the `/api/v1` root
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ClientError::HttpClient)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransmitError> {
        let request = self
            .http
            .get(self.url(path))
            .header(reqwest::header::ACCEPT, "application/json");
        let response = self.send(request).await?;
        decode_json(response).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransmitError> {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        decode_json(response).await
    }

    /// Posts a multipart form and checks the status; the body is left unread
    pub async fn post_form(&self, path: &str, form: Form) -> Result<Response, TransmitError> {
        self.send(self.http.post(self.url(path)).multipart(form)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransmitError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await
    }
}

pub(crate) fn network_error(err: reqwest::Error) -> TransmitError {
    TransmitError::Network(err.to_string())
}

/// Turns a non-2xx response into [`TransmitError::Http`], keeping the server code
async fn check_status(response: Response) -> Result<Response, TransmitError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.code)
        .filter(|code| !code.is_empty());
    debug!(
        "api: {} code={}",
        status,
        code.as_deref().unwrap_or("-")
    );
    Err(TransmitError::Http {
        status: status.as_u16(),
        code,
    })
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, TransmitError> {
    let bytes = response.bytes().await.map_err(network_error)?;
    serde_json::from_slice(&bytes).map_err(|e| TransmitError::Decode(e.to_string()))
}
