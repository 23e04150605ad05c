use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tracing::debug;

use crate::auth::Credential;
use crate::limits::{MAX_ERROR_BODY_BYTES, MAX_ID_LEN, MAX_RESPONSE_BYTES};

use super::{decode_list, requested_user, NewReservation, ReservationSink, ReservationSource, StoreError};

/// REST client for the club backend's reservation routes.
#[derive(Debug, Clone)]
pub struct HttpReservationStore {
    client: Client,
    base_url: Url,
    max_body_bytes: usize,
}

impl HttpReservationStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url).map_err(|e| StoreError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            max_body_bytes: MAX_RESPONSE_BYTES,
        })
    }

    /// Cap on a successful response body; larger bodies fail with `LimitExceeded`.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        for seg in segments {
            if seg.is_empty() || seg.len() > MAX_ID_LEN {
                return Err(StoreError::InvalidUrl(format!("bad path segment {seg:?}")));
            }
        }
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, credential: &Credential) -> Result<Value, StoreError> {
        let mut response = request
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        if response.content_length().is_some_and(|len| len > self.max_body_bytes as u64) {
            return Err(StoreError::LimitExceeded("response body too large"));
        }
        // Content-Length may be absent (chunked), so the cap is enforced while reading too.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(StoreError::LimitExceeded("response body too large"));
            }
            body.extend_from_slice(&chunk);
        }
        serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transport(e.to_string())
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut cut = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body.trim().to_string()
}

/// Single-record responses may also arrive wrapped in `{ "data": ... }`.
fn unwrap_record(body: Value) -> Value {
    match body {
        Value::Object(mut map)
            if !map.contains_key("_id") && map.get("data").is_some_and(Value::is_object) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl ReservationSource for HttpReservationStore {
    async fn fetch_reservations(
        &self,
        credential: &Credential,
        user_id: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let url = match requested_user(user_id) {
            Some(uid) => self.endpoint(&["reservations", "user", uid])?,
            None => self.endpoint(&["reservations", "me"])?,
        };
        debug!("fetching reservations from {url}");
        let body = self.send(self.client.get(url), credential).await?;
        decode_list(body)
    }
}

#[async_trait]
impl ReservationSink for HttpReservationStore {
    async fn create_reservation(
        &self,
        credential: &Credential,
        reservation: &NewReservation,
    ) -> Result<Value, StoreError> {
        let url = self.endpoint(&["reservations"])?;
        let body = self
            .send(self.client.post(url).json(reservation), credential)
            .await?;
        Ok(unwrap_record(body))
    }

    async fn cancel_reservation(
        &self,
        credential: &Credential,
        reservation_id: &str,
    ) -> Result<Value, StoreError> {
        let url = self.endpoint(&["reservations", reservation_id, "cancel"])?;
        match self.send(self.client.patch(url), credential).await {
            Err(StoreError::Status { status: 404, .. }) => Err(StoreError::NotFound(reservation_id.to_string())),
            other => other.map(unwrap_record),
        }
    }
}
