use super::{DiscoveredHost, ServiceDiscovery};
use crate::errors::ScanError;
use crate::model::DiscoveryMethod;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

const SSDP_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

/// Largest datagram we bother reading; SSDP replies are a few hundred bytes
const MAX_RESPONSE: usize = 8192;

/// The headers of an SSDP search response that are worth logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpResponse {
    pub search_target: Option<String>,
    pub location: Option<String>,
    pub server: Option<String>,
    pub usn: Option<String>,
}

/// Parse an M-SEARCH reply. Anything other than an HTTP 200 status line
/// (NOTIFY traffic, garbage) is rejected.
pub fn parse_ssdp_response(raw: &str) -> Option<SsdpResponse> {
    let mut lines = raw.lines();
    let status = lines.next()?.trim();
    let mut parts = status.split_whitespace();
    if !parts.next()?.to_ascii_uppercase().starts_with("HTTP/") || parts.next()? != "200" {
        return None;
    }

    let headers: HashMap<String, String> = lines
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();
    let header = |name: &str| headers.get(name).filter(|v| !v.is_empty()).cloned();

    Some(SsdpResponse {
        search_target: header("st"),
        location: header("location"),
        server: header("server"),
        usn: header("usn"),
    })
}

/// UPnP root-device search over SSDP multicast
#[derive(Debug, Clone)]
pub struct SsdpDiscovery {
    listen_window: Duration,
}

impl SsdpDiscovery {
    pub fn new(listen_window: Duration) -> Self {
        Self { listen_window }
    }

    fn search_request(&self) -> String {
        // MX is the responders' random back-off bound, in whole seconds
        let mx = self.listen_window.as_secs().clamp(1, 5);
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             ST: upnp:rootdevice\r\n\
             MX: {}\r\n\r\n",
            SSDP_GROUP, mx
        )
    }
}

#[async_trait]
impl ServiceDiscovery for SsdpDiscovery {
    fn name(&self) -> &'static str {
        "ssdp"
    }

    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Ssdp
    }

    async fn discover(&self) -> Result<Vec<DiscoveredHost>, ScanError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket
            .send_to(self.search_request().as_bytes(), SSDP_GROUP)
            .await?;

        let deadline = Instant::now() + self.listen_window;
        let mut buf = vec![0u8; MAX_RESPONSE];
        let mut hosts = Vec::new();

        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "SSDP receive failed");
                    break;
                }
                Err(_) => break,
            };
            let raw = String::from_utf8_lossy(&buf[..len]);
            let Some(response) = parse_ssdp_response(&raw) else {
                continue;
            };
            tracing::debug!(
                address = %from.ip(),
                st = response.search_target.as_deref().unwrap_or("N/A"),
                server = response.server.as_deref().unwrap_or("N/A"),
                "SSDP responder"
            );
            hosts.push(DiscoveredHost {
                address: from.ip(),
                hostname: None,
            });
        }

        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_response_headers() {
        let raw = "HTTP/1.1 200 OK\r\n\
                   CACHE-CONTROL: max-age=1800\r\n\
                   LOCATION: http://192.168.1.1:49152/rootDesc.xml\r\n\
                   SERVER: Linux/5.4 UPnP/1.1 MiniUPnPd/2.2\r\n\
                   ST: upnp:rootdevice\r\n\
                   USN: uuid:1234::upnp:rootdevice\r\n\
                   EXT:\r\n\r\n";
        let response = parse_ssdp_response(raw).unwrap();
        assert_eq!(response.search_target.as_deref(), Some("upnp:rootdevice"));
        assert_eq!(
            response.location.as_deref(),
            Some("http://192.168.1.1:49152/rootDesc.xml")
        );
        assert_eq!(
            response.server.as_deref(),
            Some("Linux/5.4 UPnP/1.1 MiniUPnPd/2.2")
        );
        assert_eq!(response.usn.as_deref(), Some("uuid:1234::upnp:rootdevice"));
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let raw = "HTTP/1.1 200 OK\r\nst: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        let response = parse_ssdp_response(raw).unwrap();
        assert_eq!(
            response.search_target.as_deref(),
            Some("urn:schemas-upnp-org:device:MediaRenderer:1")
        );
        assert_eq!(response.location, None);
    }

    #[test]
    fn rejects_notify_and_errors() {
        assert!(parse_ssdp_response("NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\n\r\n").is_none());
        assert!(parse_ssdp_response("HTTP/1.1 500 Internal Server Error\r\n\r\n").is_none());
        assert!(parse_ssdp_response("").is_none());
    }

    #[test]
    fn search_request_bounds_mx() {
        let request = SsdpDiscovery::new(Duration::from_secs(30)).search_request();
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MX: 5\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }
}
