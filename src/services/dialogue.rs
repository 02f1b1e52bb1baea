//! HTTP client for the dialogue policy service.

use async_trait::async_trait;

use crate::language::Language;
use crate::session::{ConversationHistory, Speaker, SpeakerProfile};
use crate::{Error, Result};

use super::{DialogueReply, DialogueService};

/// Response from the dialogue service `/chat` endpoint.
#[derive(serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    model_used: Option<String>,
}

/// Talks to the dialogue policy service over HTTP.
pub struct DialogueClient {
    client: reqwest::Client,
    base_url: String,
}

impl DialogueClient {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl DialogueService for DialogueClient {
    fn name(&self) -> &str {
        "dialogue-http"
    }

    async fn request(
        &self,
        profile: &SpeakerProfile,
        history: &ConversationHistory,
        user_text: &str,
        include_seed: bool,
        no_reply: bool,
        language: Language,
    ) -> Result<DialogueReply> {
        #[derive(serde::Serialize)]
        struct WireUtterance<'a> {
            sender: Speaker,
            text: &'a str,
        }

        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            name: Option<&'a str>,
            age: Option<u8>,
            mode: Option<&'a str>,
            objective: Option<&'a str>,
            lang: &'a str,
            history: Vec<WireUtterance<'a>>,
            user_text: &'a str,
            include_seed: bool,
            no_reply: bool,
        }

        let request = ChatRequest {
            name: profile.name.as_deref(),
            age: profile.age,
            mode: profile.mode.as_deref(),
            objective: profile.objective.as_deref(),
            lang: language.tag(),
            history: history
                .entries()
                .iter()
                .map(|u| WireUtterance {
                    sender: u.speaker,
                    text: &u.text,
                })
                .collect(),
            user_text,
            include_seed,
            no_reply,
        };

        tracing::debug!(
            history_len = history.len(),
            include_seed,
            no_reply,
            language = %language,
            "dialogue request"
        );

        let url = format!("{}/chat", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "dialogue request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "dialogue service error");
            return Err(Error::Dialogue(format!(
                "dialogue service error {status}: {body}"
            )));
        }

        let result: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse dialogue response");
            e
        })?;

        tracing::debug!(
            reply_chars = result.text.chars().count(),
            model = result.model_used.as_deref().unwrap_or("unknown"),
            "dialogue reply received"
        );

        Ok(DialogueReply {
            text: result.text,
            model: result.model_used,
        })
    }
}
