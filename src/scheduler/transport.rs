use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ClientError;
use crate::models::{
    HeartbeatRequest, HeartbeatResponse, RegisterDeviceRequest, RegisterDeviceResponse,
};

/// Network seam for the engine; tests swap HTTP for a fake.
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn register_device(
        &self,
        req: &RegisterDeviceRequest,
    ) -> Result<RegisterDeviceResponse, ClientError>;

    async fn send_heartbeat(
        &self,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ClientError>;
}

/// JSON client against the backend API. `base_url` includes the `/api`
/// prefix, e.g. `http://localhost:4000/api`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[async_trait]
impl HeartbeatTransport for HttpTransport {
    async fn register_device(
        &self,
        req: &RegisterDeviceRequest,
    ) -> Result<RegisterDeviceResponse, ClientError> {
        self.post_json("/push/register", req).await
    }

    async fn send_heartbeat(
        &self,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ClientError> {
        self.post_json("/location/heartbeat", req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn heartbeat_request() -> HeartbeatRequest {
        HeartbeatRequest {
            device_id: "TRB-0011aabb".into(),
            lat: 42.88,
            lng: -8.54,
            accuracy: Some(9.0),
            ts: None,
            interests: None,
            battery: None,
            power_state: None,
            source: Some("init".into()),
        }
    }

    #[tokio::test]
    async fn parses_heartbeat_ack() {
        let server = MockServer::start().await;
        let saved = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/api/location/heartbeat"))
            .and(body_partial_json(
                json!({"deviceId": "TRB-0011aabb", "source": "init"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "nextPollSec": 60,
                "savedId": saved,
                "offers": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport =
            HttpTransport::new(format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap();
        let ack = transport.send_heartbeat(&heartbeat_request()).await.unwrap();
        assert_eq!(ack.next_poll_sec, 60);
        assert_eq!(ack.saved_id, saved);
        assert!(ack.offers.is_empty());
    }

    #[tokio::test]
    async fn surfaces_structured_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/location/heartbeat"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error": "deviceId required"
            })))
            .mount(&server)
            .await;

        let transport =
            HttpTransport::new(format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap();
        let err = transport
            .send_heartbeat(&heartbeat_request())
            .await
            .unwrap_err();
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "deviceId required");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn registers_device() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/push/register"))
            .and(body_partial_json(json!({"platform": "android"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "device": {
                    "deviceId": "TRB-0011aabb",
                    "platform": "android",
                    "hasPrimaryToken": true,
                    "hasSecondaryToken": false
                }
            })))
            .mount(&server)
            .await;

        let transport =
            HttpTransport::new(format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap();
        let resp = transport
            .register_device(&RegisterDeviceRequest {
                device_id: Some("TRB-0011aabb".into()),
                platform: Some("android".into()),
                primary_token: Some("ExponentPushToken[abc]".into()),
                secondary_token: None,
            })
            .await
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.device.device_id, "TRB-0011aabb");
        assert_eq!(resp.device.platform, Platform::Android);
        assert!(resp.device.has_primary_token);
    }
}
