//! The HTTP boundary. `HttpOps` is everything the client needs from the wire, so tests
//! can swap the reqwest implementation for a scripted one.
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::fs::File;
use std::io::Write;

pub trait HttpOps {
    async fn get_json(self: &Self, url: &str) -> Result<Value>;

    async fn post_json(self: &Self, url: &str, body: &Value) -> Result<Value>;

    /// Fire-and-forget GET, used for activation requests. Any success status is accepted.
    async fn trigger(self: &Self, url: &str) -> Result<StatusCode>;

    /// Stream `url` from `start_byte` into `file`. Returns the file length afterwards.
    async fn fetch_to_file(self: &Self, url: &str, start_byte: u64, file: &mut File) -> Result<u64>;
}

pub struct ReqwestHttp {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestHttp {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn authorized(self: &Self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(self.config.api_key.expose(), Some(""))
    }
}

fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::from_status(status, response.url().as_str()))
    }
}

impl HttpOps for ReqwestHttp {
    async fn get_json(self: &Self, url: &str) -> Result<Value> {
        let response = self.authorized(self.client.get(url)).send().await?;
        let value = checked(response)?.json().await?;
        Ok(value)
    }

    async fn post_json(self: &Self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await?;
        let value = checked(response)?.json().await?;
        Ok(value)
    }

    async fn trigger(self: &Self, url: &str) -> Result<StatusCode> {
        let response = self.authorized(self.client.get(url)).send().await?;
        Ok(checked(response)?.status())
    }

    async fn fetch_to_file(self: &Self, url: &str, start_byte: u64, file: &mut File) -> Result<u64> {
        let mut byte_count = start_byte;
        let mut response = self.ranged_get(url, start_byte).await?;

        if start_byte > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            if unsatisfied_range_length(&response) == Some(start_byte) {
                // an earlier run got everything but did not finish up
                return Ok(start_byte);
            }
            file.set_len(0)?;
            byte_count = 0;
            response = self.ranged_get(url, 0).await?;
        }

        let response = checked(response)?;
        if byte_count > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
            // Range ignored by the server, start over
            file.set_len(0)?;
            byte_count = 0;
        }

        let mut stream = response.bytes_stream();
        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            file.write_all(&bytes)?;
            byte_count += bytes.len() as u64;
        }
        file.flush()?;
        Ok(byte_count)
    }
}

impl ReqwestHttp {
    async fn ranged_get(self: &Self, url: &str, start_byte: u64) -> Result<Response> {
        // Retrieval urls are pre-signed, no credential goes along
        let mut req = self.client.get(url);
        if start_byte > 0 {
            req = req.header(RANGE, format!("bytes={}-", start_byte));
        }
        Ok(req.send().await?)
    }
}

/// Full length reported by a 416 response (`Content-Range: bytes */<length>`).
fn unsatisfied_range_length(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    let length = value.trim().strip_prefix("bytes */")?;
    length.trim().parse().ok()
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted responses keyed by url. The last response for a url repeats once the
    /// queue runs down to it.
    #[derive(Default)]
    pub struct MockHttp {
        responses: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        calls: Mutex<Vec<String>>,
        posted: Mutex<Vec<Value>>,
    }

    impl MockHttp {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self: &Self, url: &str, response: Result<Value>) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
            self
        }

        pub fn serve_bytes(self: &Self, url: &str, body: &[u8]) -> &Self {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_vec());
            self
        }

        pub fn calls_to(self: &Self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }

        pub fn posted(self: &Self) -> Vec<Value> {
            self.posted.lock().unwrap().clone()
        }

        fn next(self: &Self, url: &str) -> Result<Value> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .get_mut(url)
                .ok_or_else(|| Error::NotFound(url.to_string()))?;
            if queue.len() == 1 {
                if let Some(Ok(v)) = queue.front() {
                    return Ok(v.clone());
                }
            }
            queue
                .pop_front()
                .unwrap_or_else(|| Err(Error::NotFound(url.to_string())))
        }
    }

    impl HttpOps for MockHttp {
        async fn get_json(self: &Self, url: &str) -> Result<Value> {
            self.next(url)
        }

        async fn post_json(self: &Self, url: &str, body: &Value) -> Result<Value> {
            self.posted.lock().unwrap().push(body.clone());
            self.next(url)
        }

        async fn trigger(self: &Self, url: &str) -> Result<StatusCode> {
            self.next(url).map(|_| StatusCode::ACCEPTED)
        }

        async fn fetch_to_file(
            self: &Self,
            url: &str,
            start_byte: u64,
            file: &mut File,
        ) -> Result<u64> {
            self.calls.lock().unwrap().push(url.to_string());
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Error::NotFound(url.to_string()))?;
            let start = (start_byte as usize).min(body.len());
            file.write_all(&body[start..])?;
            Ok(body.len() as u64)
        }
    }
}
