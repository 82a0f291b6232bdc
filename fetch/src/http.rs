//! Shared blocking HTTP agent.
//!
//! Non-2xx responses are returned as ordinary responses so callers can keep
//! the status code and diagnostic body in their own error types.

use std::sync::OnceLock;
use std::time::Duration;

/// Time allowed to establish a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Time allowed for the response head to arrive once the request is sent.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared `ureq` agent.
///
/// No global or body timeout is set: archive bodies run to tens of
/// gigabytes and are bounded only by the connection staying alive.
pub(crate) fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(Some(RESPONSE_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Read a response body as text, substituting a placeholder when it cannot
/// be decoded. Used only for diagnostics.
pub(crate) fn diagnostic_body(response: ureq::http::Response<ureq::Body>) -> String {
    response
        .into_body()
        .read_to_string()
        .unwrap_or_else(|err| format!("<unreadable body: {err}>"))
}
