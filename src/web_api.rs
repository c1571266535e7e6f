//! Best-effort calibration push to the local web service.
//!
//! Nothing here can fail a caller: every error is logged and reported as
//! `false`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::json;

use crate::config::LaunchMonitorConfig;

pub const DEFAULT_WEB_URL: &str = "http://localhost:8080";
pub const WEB_URL_ENV: &str = "LAUNCH_MONITOR_WEB_URL";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct WebApi {
    base_url: String,
    agent: ureq::Agent,
}

impl WebApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self { base_url, agent }
    }

    /// Client for the URL resolved by `LaunchMonitorConfig::load`.
    pub fn from_config(cfg: &LaunchMonitorConfig) -> Self {
        Self::new(cfg.web_url.as_str())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn update_calibration(&self, key: &str, value: f64) -> bool {
        self.push(key, json!({ "value": value }))
    }

    pub fn update_calibration_values(&self, key: &str, values: &[f64]) -> bool {
        self.push(key, json!({ "value": values }))
    }

    pub fn is_web_server_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.agent.get(&url).call() {
            Ok(_) => true,
            Err(err) => {
                log::debug!("WebApi: {} unreachable: {}", url, err);
                false
            }
        }
    }

    fn push(&self, key: &str, body: serde_json::Value) -> bool {
        match self.put_config(key, body) {
            Ok(()) => {
                log::info!("WebApi: updated calibration {}", key);
                true
            }
            Err(err) => {
                log::warn!("WebApi: calibration update for {} failed: {:#}", key, err);
                false
            }
        }
    }

    fn put_config(&self, key: &str, body: serde_json::Value) -> Result<()> {
        if key.is_empty() || key.contains('/') {
            return Err(anyhow!("invalid calibration key {:?}", key));
        }
        let url = format!("{}/api/config/{}", self.base_url, key);
        match self.agent.put(&url).send_json(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("{} answered with status {}", url, code))
            }
            Err(err) => Err(err).with_context(|| format!("PUT {}", url)),
        }
    }
}

impl Default for WebApi {
    fn default() -> Self {
        Self::new(DEFAULT_WEB_URL)
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one request with `status`, sending the raw request text back.
    fn one_shot_server(status: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut request = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                request.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("body");
            request.push_str(&String::from_utf8_lossy(&body));
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            )
            .expect("respond");
            let _ = tx.send(request);
        });
        (url, rx)
    }

    #[test]
    fn pushes_scalar_calibration() {
        let (url, rx) = one_shot_server("200 OK");
        let api = WebApi::new(format!("{}/", url));
        assert!(api.update_calibration("kCameraFocalLength", 6.25));
        let request = rx.recv().expect("request");
        assert!(request.starts_with("PUT /api/config/kCameraFocalLength HTTP/1.1"));
        assert!(request.ends_with("{\"value\":6.25}"));
    }

    #[test]
    fn pushes_vector_calibration() {
        let (url, rx) = one_shot_server("200 OK");
        let api = WebApi::new(url);
        assert!(api.update_calibration_values("kCameraAngles", &[1.5, -2.0]));
        let request = rx.recv().expect("request");
        assert!(request.ends_with("{\"value\":[1.5,-2.0]}"));
    }

    #[test]
    fn server_error_is_reported_as_false() {
        let (url, _rx) = one_shot_server("500 Internal Server Error");
        assert!(!WebApi::new(url).update_calibration("kGain", 1.0));
    }

    #[test]
    fn health_check_against_live_and_dead_servers() {
        let (url, rx) = one_shot_server("200 OK");
        assert!(WebApi::new(url).is_web_server_available());
        assert!(rx.recv().expect("request").starts_with("GET /health "));

        let dead = TcpListener::bind("127.0.0.1:0").expect("bind");
        let dead_url = format!("http://{}", dead.local_addr().expect("addr"));
        drop(dead);
        assert!(!WebApi::new(dead_url).is_web_server_available());
    }

    #[test]
    fn configured_url_is_used() {
        let (url, rx) = one_shot_server("200 OK");
        let cfg = LaunchMonitorConfig {
            web_url: url.clone(),
            ..LaunchMonitorConfig::default()
        };
        let api = WebApi::from_config(&cfg);
        assert_eq!(api.base_url(), url);
        assert!(api.update_calibration_values("motion_roi", &[0.25, 0.0, 0.5, 1.0]));
        assert!(rx
            .recv()
            .expect("request")
            .starts_with("PUT /api/config/motion_roi HTTP/1.1"));
    }

    #[test]
    fn slash_in_key_is_rejected_without_a_request() {
        assert!(!WebApi::new("http://127.0.0.1:9").update_calibration("a/b", 1.0));
    }
}
