use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// HTTP client shared by the page backends and the robots.txt cache.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    user_agent: String,
    max_content_size: usize,
}

impl HttpClient {
    pub const DEFAULT_MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;

    pub fn new(user_agent: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_content_limit(user_agent, request_timeout, Self::DEFAULT_MAX_CONTENT_SIZE)
    }

    pub fn with_content_limit(
        user_agent: &str,
        request_timeout: Duration,
        max_content_size: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10).min(request_timeout))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            timeout_duration: request_timeout,
            user_agent: user_agent.to_string(),
            max_content_size,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Issue a GET and read the body, whatever the status code.
    pub async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(url.clone())
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .header("Accept-Language", "en-US,en;q=0.5")
                .send(),
        )
        .await
        .map_err(|_| FetchError::transient(None, "request timed out"))?
        .map_err(Self::classify_error)?;

        let status_code = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        if let Some(length) = response.content_length()
            && length as usize > self.max_content_size
        {
            return Err(FetchError::permanent(
                Some(status_code),
                format!(
                    "content too large: {} bytes (max {})",
                    length, self.max_content_size
                ),
            ));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Self::classify_error)?;
            if body.len() + chunk.len() > self.max_content_size {
                return Err(FetchError::permanent(
                    Some(status_code),
                    format!("content exceeded {} bytes", self.max_content_size),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            final_url,
            status_code,
            content_type,
            body,
        })
    }

    /// GET an HTML page: non-2xx statuses and non-HTML bodies become errors.
    pub async fn get_html(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let response = self.get(url).await?;
        if let Some(error) = FetchError::from_status(response.status_code) {
            return Err(error);
        }
        if !response.is_html() {
            return Err(FetchError::permanent(
                Some(response.status_code),
                format!(
                    "unsupported content type {}",
                    response.content_type.as_deref().unwrap_or("unknown")
                ),
            ));
        }
        Ok(response)
    }

    fn classify_error(error: reqwest::Error) -> FetchError {
        let status = error.status().map(|s| s.as_u16());
        if error.is_builder() || error.is_redirect() {
            return FetchError::permanent(status, error.to_string());
        }
        if let Some(code) = status
            && let Some(classified) = FetchError::from_status(code)
        {
            return classified;
        }
        // Timeouts, refused or reset connections, DNS hiccups and truncated bodies.
        FetchError::transient(status, error.to_string())
    }
}

/// Raw response of one GET.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub final_url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Missing content types are treated as HTML; many static doc hosts omit them.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_none_or(is_html_content_type)
    }

    /// Charset label from the Content-Type header, `utf-8` when absent.
    pub fn charset(&self) -> String {
        self.content_type
            .as_deref()
            .and_then(|ct| {
                ct.split(';')
                    .filter_map(|param| param.trim().split_once('='))
                    .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
                    .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
            })
            .unwrap_or_else(|| "utf-8".to_string())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

/// Why a fetch produced no page. Transient failures may be retried; permanent ones are final.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("{reason}")]
    Transient { status: Option<u16>, reason: String },

    #[error("{reason}")]
    Permanent { status: Option<u16>, reason: String },
}

impl FetchError {
    pub fn transient(status: Option<u16>, reason: impl Into<String>) -> Self {
        FetchError::Transient {
            status,
            reason: reason.into(),
        }
    }

    pub fn permanent(status: Option<u16>, reason: impl Into<String>) -> Self {
        FetchError::Permanent {
            status,
            reason: reason.into(),
        }
    }

    /// Classify an HTTP status. `None` for 2xx.
    ///
    /// 5xx, 429 and 408 are transient; every other non-2xx is permanent.
    pub fn from_status(code: u16) -> Option<Self> {
        if (200..300).contains(&code) {
            return None;
        }
        let reason = format!("HTTP {}", code);
        if code >= 500 || code == 429 || code == 408 {
            Some(Self::transient(Some(code), reason))
        } else {
            Some(Self::permanent(Some(code), reason))
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Transient { status, .. } | FetchError::Permanent { status, .. } => *status,
        }
    }
}
