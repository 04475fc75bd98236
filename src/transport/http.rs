use super::HttpSink;
use crate::{http_binding, Error, Event, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;

/// An [`HttpSink`] that posts binary-mode events with reqwest
#[derive(Debug, Clone)]
pub struct Http {
    shared: Option<Client>,
    timeout: Option<Duration>,
}

impl Http {
    /// Creates an instance of [`Http`] [`HttpSink`].
    ///
    /// With `reuse_client` unset a fresh client is built for every event.
    pub fn new(reuse_client: bool, timeout: Option<Duration>) -> Result<Self> {
        let shared = if reuse_client {
            Some(Self::client(timeout)?)
        } else {
            None
        };

        Ok(Self { shared, timeout })
    }

    fn client(timeout: Option<Duration>) -> Result<Client> {
        let mut builder = Client::builder();

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        builder.build().map_err(|error| Error::setup("http client", error))
    }
}

#[async_trait]
impl HttpSink for Http {
    async fn send(&self, event: &Event, target: &Url) -> Result<()> {
        let client = match &self.shared {
            Some(client) => client.clone(),
            None => Self::client(self.timeout)?,
        };

        let (headers, body) = http_binding::to_binary(event)?;

        let response = client
            .post(target.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|error| Error::delivery(&event.id, error))?;

        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let status_code = status.as_u16();
        let reason = match response.text().await {
            Ok(body) => format!("{status_code}: {body}"),
            Err(error) => format!("{status_code}: {error}"),
        };

        Err(Error::delivery(&event.id, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_and_without_shared_client() {
        assert!(Http::new(true, Some(Duration::from_secs(1))).unwrap().shared.is_some());
        assert!(Http::new(false, None).unwrap().shared.is_none());
    }

    #[tokio::test]
    async fn unreachable_target_is_a_delivery_error() {
        let sink = Http::new(false, Some(Duration::from_millis(500))).unwrap();
        let target = Url::parse("http://127.0.0.1:9/message").unwrap();

        let error = sink
            .send(&Event::new("e1", "test", "demo"), &target)
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Delivery { ref id, .. } if id == "e1"));
    }
}
