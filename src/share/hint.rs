//! The "share this command" line printed at startup.
//!
//! Looking up the public address is best effort: any failure falls back to a
//! placeholder and never stops the server.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Public IP echo service
pub const IP_ECHO_URL: &str = "https://api.ipify.org?format=json";

/// Shown in place of the address when the lookup fails
pub const PLACEHOLDER_HOST: &str = "<your-ip>";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct IpEcho {
    ip: String,
}

/// Ask `echo_url` for this host's public address.
///
/// Returns `None` on network errors, non-success statuses, timeouts and
/// bodies that are not `{"ip": "..."}`.
pub async fn lookup_public_ip(client: &reqwest::Client, echo_url: &str) -> Option<String> {
    let response = client
        .get(echo_url)
        .timeout(LOOKUP_TIMEOUT)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status);

    let echo = match response {
        Ok(response) => response.json::<IpEcho>().await,
        Err(e) => Err(e),
    };

    match echo {
        Ok(echo) if !echo.ip.trim().is_empty() => Some(echo.ip.trim().to_string()),
        Ok(_) => {
            debug!("Public IP lookup returned an empty address");
            None
        }
        Err(e) => {
            debug!("Public IP lookup failed: {}", e);
            None
        }
    }
}

/// Render the command a guest runs to connect.
pub fn share_command(host: &str, port: u16) -> String {
    if port == 22 {
        format!("ssh {}", host)
    } else {
        format!("ssh -p {} {}", port, host)
    }
}

/// Look up the public address and render the share command, using the
/// placeholder when the lookup fails.
pub async fn share_hint(client: &reqwest::Client, echo_url: &str, port: u16) -> String {
    let host = lookup_public_ip(client, echo_url)
        .await
        .unwrap_or_else(|| PLACEHOLDER_HOST.to_string());
    share_command(&host, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::keys::build_http_client;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one request with `status_line` and a JSON `body`.
    async fn echo_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{}/?format=json", addr)
    }

    mod command {
        use super::*;

        #[test]
        fn test_includes_port() {
            assert_eq!(share_command("203.0.113.7", 2222), "ssh -p 2222 203.0.113.7");
        }

        #[test]
        fn test_omits_default_ssh_port() {
            assert_eq!(share_command("203.0.113.7", 22), "ssh 203.0.113.7");
        }

        #[test]
        fn test_placeholder_host() {
            assert_eq!(
                share_command(PLACEHOLDER_HOST, 2222),
                "ssh -p 2222 <your-ip>"
            );
        }
    }

    mod echo_body {
        use super::*;

        #[test]
        fn test_decodes_ip_field() {
            let echo: IpEcho = serde_json::from_str(r#"{"ip":"198.51.100.4"}"#).unwrap();
            assert_eq!(echo.ip, "198.51.100.4");
        }

        #[test]
        fn test_missing_ip_field_is_error() {
            assert!(serde_json::from_str::<IpEcho>(r#"{"address":"x"}"#).is_err());
        }
    }

    mod lookup {
        use super::*;

        #[tokio::test]
        async fn test_returns_echoed_address() {
            let url = echo_server("200 OK", r#"{"ip":"198.51.100.4"}"#).await;
            let client = build_http_client().unwrap();

            assert_eq!(
                lookup_public_ip(&client, &url).await.as_deref(),
                Some("198.51.100.4")
            );
        }

        #[tokio::test]
        async fn test_error_status_falls_back_to_placeholder() {
            let url = echo_server("503 Service Unavailable", "{}").await;
            let client = build_http_client().unwrap();

            assert_eq!(share_hint(&client, &url, 2222).await, "ssh -p 2222 <your-ip>");
        }

        #[tokio::test]
        async fn test_malformed_body_falls_back_to_placeholder() {
            let url = echo_server("200 OK", "not json").await;
            let client = build_http_client().unwrap();

            assert!(lookup_public_ip(&client, &url).await.is_none());
        }

        #[tokio::test]
        async fn test_unreachable_service_falls_back_to_placeholder() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            let client = build_http_client().unwrap();

            let hint = share_hint(&client, &format!("http://{}", addr), 22).await;

            assert_eq!(hint, "ssh <your-ip>");
        }
    }
}
