//! Default `reqwest`-backed transport
//!
//! Convenience implementation of [`HttpTransport`]. Error statuses are not an
//! error here: the classifier inspects status and body after the call, so
//! this layer only fails on connection-level problems.

use reqwest::Client;

use crate::errors::Result;
use crate::traits::{HttpRequest, HttpResponse, HttpTransport};

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).ok();

        Ok(HttpResponse { status, body })
    }
}
