use crate::config::ConfigError;
use reqwest::Url;

const PROGRESS_PATH: &str = "/ws/progress";

/// Progress stream address derived from the API base URL.
///
/// The WebSocket scheme follows the API's transport security: an `https`
/// base yields `wss`, anything else yields `ws`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEndpoint {
    secure: bool,
    authority: String,
}

impl ProgressEndpoint {
    pub fn from_api_base(api_base_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(api_base_url).map_err(|e| ConfigError::InvalidUrl {
            url: api_base_url.to_string(),
            reason: e.to_string(),
        })?;

        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ConfigError::InvalidUrl {
                    url: api_base_url.to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        };

        let host = url.host_str().ok_or_else(|| ConfigError::InvalidUrl {
            url: api_base_url.to_string(),
            reason: "missing host".to_string(),
        })?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self { secure, authority })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn url_for(&self, session_id: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{}://{}{}/{}",
            scheme,
            self.authority,
            PROGRESS_PATH,
            urlencoding::encode(session_id)
        )
    }
}
