// WheelTach — HTTP Transport
//
// One bounded round-trip per call; the engine above classifies outcomes.
// On the device this wraps `EspHttpConnection`, on the host a scripted
// double stands in.

use super::ota::FirmwareInstaller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait HttpTransport {
    /// Perform one request with a bounded timeout.  `Err` means the
    /// exchange never produced an HTTP status (DNS, TCP, TLS, timeout).
    fn request(
        &mut self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> anyhow::Result<Response>;

    /// GET `url` and stream the response body into `installer`.  Returns
    /// the HTTP status; the installer only runs on 200.
    fn download(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        installer: &mut dyn FirmwareInstaller,
    ) -> anyhow::Result<u16>;
}

#[cfg(target_os = "espidf")]
pub use esp::EspTransport;

#[cfg(target_os = "espidf")]
mod esp {
    use std::time::Duration;

    use embedded_svc::http::client::Client;
    use embedded_svc::http::{Headers, Status};
    use embedded_svc::io::{Read, Write};
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

    use super::{FirmwareInstaller, HttpTransport, Method, Response};
    use crate::config::HTTP_TIMEOUT_MS;

    // Responses the controller parses are small JSON documents; anything
    // beyond this is a server fault.
    const MAX_BODY_BYTES: usize = 4096;

    pub struct EspTransport;

    impl EspTransport {
        fn client(&self) -> anyhow::Result<Client<EspHttpConnection>> {
            let config = Configuration {
                timeout: Some(Duration::from_millis(HTTP_TIMEOUT_MS)),
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                ..Default::default()
            };
            Ok(Client::wrap(EspHttpConnection::new(&config)?))
        }
    }

    impl HttpTransport for EspTransport {
        fn request(
            &mut self,
            method: Method,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
        ) -> anyhow::Result<Response> {
            let mut client = self.client()?;
            let svc_method = match method {
                Method::Get => embedded_svc::http::Method::Get,
                Method::Post => embedded_svc::http::Method::Post,
            };

            let mut request = client
                .request(svc_method, url, headers)
                .map_err(|e| anyhow::anyhow!("http request: {e:?}"))?;
            if !body.is_empty() {
                request
                    .write_all(body)
                    .map_err(|e| anyhow::anyhow!("http write: {e:?}"))?;
            }

            let mut response = request
                .submit()
                .map_err(|e| anyhow::anyhow!("http submit: {e:?}"))?;
            let status = response.status();

            let mut collected = Vec::new();
            let mut buf = [0u8; 512];
            while collected.len() < MAX_BODY_BYTES {
                let n = response
                    .read(&mut buf)
                    .map_err(|e| anyhow::anyhow!("http read: {e:?}"))?;
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
            }

            Ok(Response {
                status,
                body: collected,
            })
        }

        fn download(
            &mut self,
            url: &str,
            headers: &[(&str, &str)],
            installer: &mut dyn FirmwareInstaller,
        ) -> anyhow::Result<u16> {
            let mut client = self.client()?;
            let request = client
                .request(embedded_svc::http::Method::Get, url, headers)
                .map_err(|e| anyhow::anyhow!("http request: {e:?}"))?;
            let mut response = request
                .submit()
                .map_err(|e| anyhow::anyhow!("http submit: {e:?}"))?;

            let status = response.status();
            if status != 200 {
                return Ok(status);
            }

            let expected_len = response
                .header("Content-Length")
                .and_then(|v| v.parse::<u64>().ok());
            installer.install(expected_len, &mut |buf| {
                response
                    .read(buf)
                    .map_err(|e| anyhow::anyhow!("firmware read: {e:?}"))
            })?;

            Ok(status)
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted double (host tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;

    use super::{FirmwareInstaller, HttpTransport, Method, Response};

    /// One recorded exchange.
    #[derive(Debug, Clone)]
    pub struct Sent {
        pub method: Method,
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    #[derive(Default)]
    pub struct MockTransport {
        pub replies: VecDeque<anyhow::Result<Response>>,
        pub sent: Vec<Sent>,
        pub download_status: u16,
        pub download_bytes: Vec<u8>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                download_status: 200,
                ..Self::default()
            }
        }

        pub fn push_status(&mut self, status: u16) {
            self.replies.push_back(Ok(Response {
                status,
                body: Vec::new(),
            }));
        }

        pub fn push_json(&mut self, status: u16, body: &str) {
            self.replies.push_back(Ok(Response {
                status,
                body: body.as_bytes().to_vec(),
            }));
        }

        pub fn push_transport_error(&mut self) {
            self.replies.push_back(Err(anyhow::anyhow!("connection reset")));
        }

        pub fn last_url(&self) -> &str {
            &self.sent.last().expect("no request sent").url
        }
    }

    impl HttpTransport for MockTransport {
        fn request(
            &mut self,
            method: Method,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
        ) -> anyhow::Result<Response> {
            self.sent.push(Sent {
                method,
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.to_vec(),
            });
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted reply")))
        }

        fn download(
            &mut self,
            url: &str,
            headers: &[(&str, &str)],
            installer: &mut dyn FirmwareInstaller,
        ) -> anyhow::Result<u16> {
            self.sent.push(Sent {
                method: Method::Get,
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: Vec::new(),
            });
            if self.download_status != 200 {
                return Ok(self.download_status);
            }
            let mut offset = 0;
            let data = self.download_bytes.clone();
            installer.install(Some(data.len() as u64), &mut |buf| {
                let n = (data.len() - offset).min(buf.len());
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                offset += n;
                Ok(n)
            })?;
            Ok(200)
        }
    }
}
