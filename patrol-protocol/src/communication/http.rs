use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::ProtocolCodec;
use crate::communication::Communication;
use crate::error::{CodecError, TransportError};
use crate::messages::Message;
use crate::MESSAGE_PATH;

/// Splits a `PEERS` entry into `(id, base url)`. Entries are either
/// `<address>@<url>` or a bare url, which then doubles as the id.
pub fn parse_peer(entry: &str) -> (String, String) {
    let entry = entry.trim();
    match entry.split_once('@') {
        Some((id, url)) if !id.contains("://") => (id.to_string(), url.trim_end_matches('/').to_string()),
        _ => (entry.to_string(), entry.trim_end_matches('/').to_string()),
    }
}

/// POSTs codec bytes to `{peer}/patrol/v1/message` and decodes the reply body.
pub struct HttpCommunication {
    client: reqwest::Client,
    codec: ProtocolCodec,
    peers: BTreeMap<String, String>,
}

impl HttpCommunication {
    pub fn new(
        codec: ProtocolCodec,
        peers: impl IntoIterator<Item = (String, String)>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable {
                peer: "*".into(),
                reason: format!("cannot build http client: {}", e),
            })?;
        Ok(Self {
            client,
            codec,
            peers: peers.into_iter().collect(),
        })
    }
}

#[async_trait]
impl Communication for HttpCommunication {
    fn peers(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    async fn exchange(&self, to: &str, message: &Message) -> Result<Message, TransportError> {
        let base = self
            .peers
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.to_string()))?;
        let bytes = self.codec.encode(message)?;

        let response = self
            .client
            .post(format!("{}{}", base, MESSAGE_PATH))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout { peer: to.to_string() }
                } else {
                    TransportError::Unreachable {
                        peer: to.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                peer: to.to_string(),
                reason: format!("{} {}", status, reason.trim()),
            });
        }
        if let Some(size) = response.content_length() {
            let limit = self.codec.max_message_bytes();
            if size > limit as u64 {
                return Err(CodecError::TooLarge { size: size as usize, limit }.into());
            }
        }
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { peer: to.to_string() }
            } else {
                TransportError::Unreachable {
                    peer: to.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        Ok(self.codec.decode(&body)?)
    }
}
