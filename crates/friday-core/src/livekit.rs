//! LiveKit room server access: agent join tokens and room listing.

use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_api::services::room::RoomClient;
use std::time::Duration;

use crate::config::{LiveKitConfig, ENV_LIVEKIT_API_KEY, ENV_LIVEKIT_API_SECRET, ENV_LIVEKIT_URL};
use crate::error::{Error, Result};

/// Identity used when the caller does not pick one
pub const DEFAULT_AGENT_IDENTITY: &str = "friday-agent";

#[derive(Debug)]
pub struct LiveKitGateway {
    config: LiveKitConfig,
    rooms: Option<RoomClient>,
}

impl LiveKitGateway {
    pub fn new(config: &LiveKitConfig) -> Self {
        let rooms = match (&config.url, &config.api_key, &config.api_secret) {
            (Some(url), Some(key), Some(secret)) => {
                Some(RoomClient::with_api_key(&http_url(url), key, secret))
            }
            _ => None,
        };
        Self {
            config: config.clone(),
            rooms,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub fn url(&self) -> Option<&str> {
        self.config.url.as_deref()
    }

    /// Names of the settings that are not set
    pub fn missing_settings(&self) -> Vec<&'static str> {
        [
            (ENV_LIVEKIT_URL, self.config.url.is_none()),
            (ENV_LIVEKIT_API_KEY, self.config.api_key.is_none()),
            (ENV_LIVEKIT_API_SECRET, self.config.api_secret.is_none()),
        ]
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(name, _)| name)
        .collect()
    }

    /// JWT letting the agent join `room` and publish audio
    pub fn agent_token(&self, room: &str, identity: Option<&str>) -> Result<String> {
        let (Some(key), Some(secret)) = (&self.config.api_key, &self.config.api_secret) else {
            return Err(self.not_configured());
        };
        if room.trim().is_empty() {
            return Err(Error::LiveKit("room name must not be empty".to_string()));
        }
        let identity = identity.unwrap_or(DEFAULT_AGENT_IDENTITY);

        AccessToken::with_api_key(key, secret)
            .with_identity(identity)
            .with_name(identity)
            .with_grants(VideoGrants {
                room_join: true,
                room: room.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_secs))
            .to_jwt()
            .map_err(|e| Error::LiveKit(e.to_string()))
    }

    /// Names of the active rooms
    pub async fn list_rooms(&self) -> Result<Vec<String>> {
        let client = self.rooms.as_ref().ok_or_else(|| self.not_configured())?;
        let rooms = client
            .list_rooms(Vec::new())
            .await
            .map_err(|e| Error::LiveKit(e.to_string()))?;
        Ok(rooms.into_iter().map(|r| r.name).collect())
    }

    fn not_configured(&self) -> Error {
        Error::MissingEnv(self.missing_settings().into_iter().map(String::from).collect())
    }
}

/// The room service speaks HTTP even when the client URL is a websocket one
fn http_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        url.to_string()
    }
}
