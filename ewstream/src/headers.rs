//! Response header capture
//!
//! The reader snapshots the headers it needs before the first data event:
//! content type feeds the parser's format hint, content length feeds the
//! duration estimate, and the ICY fields identify Icecast/Shoutcast
//! streams the way the station announces itself.

use reqwest::Response;

/// Headers captured from the streaming response
#[derive(Debug, Clone, Default)]
pub struct StreamHeaders {
    /// HTTP status code of the response
    pub status: u16,
    /// `Content-Type` value, if present
    pub content_type: Option<String>,
    /// `Content-Length` of this response body in bytes
    pub content_length: Option<u64>,
    /// Icecast/Shoutcast stream name (`icy-name`)
    pub icy_name: Option<String>,
    /// Nominal bitrate announced by the station (`icy-br`), in kbit/s
    pub icy_bitrate_kbps: Option<u32>,
}

impl StreamHeaders {
    pub(crate) fn from_response(response: &Response) -> Self {
        let headers = response.headers();
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            status: response.status().as_u16(),
            content_type: text("content-type"),
            content_length: response.content_length(),
            icy_name: text("icy-name"),
            icy_bitrate_kbps: text("icy-br").and_then(|v| v.trim().parse().ok()),
        }
    }
}
