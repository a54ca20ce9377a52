use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::{CardioRow, NlpRow, PhysiologicalRow, ProductivityRow};

/// Client for the external chat-completion service. Constructed once at
/// startup and shared read-only across requests; a single request/response
/// exchange per advisory, no retry and no streaming.
pub struct Advisor {
    client: reqwest::Client,
    api_url: String,
    auth_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl Advisor {
    pub fn new(api_url: String, auth_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            auth_key,
            model,
        }
    }

    /// Package the four metric collections into one prompt and return the
    /// service's first reply verbatim.
    pub async fn advise(
        &self,
        nlp: &[NlpRow],
        physiological: &[PhysiologicalRow],
        cardio: &[CardioRow],
        productivity: &[ProductivityRow],
    ) -> anyhow::Result<String> {
        let prompt = build_prompt(nlp, physiological, cardio, productivity)?;

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.auth_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
            })
            .send()
            .await
            .context("chat-completion request failed")?
            .error_for_status()
            .context("chat-completion service returned an error status")?
            .json::<ChatResponse>()
            .await
            .context("failed to decode chat-completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("chat-completion response contained no choices")
    }
}

fn build_prompt(
    nlp: &[NlpRow],
    physiological: &[PhysiologicalRow],
    cardio: &[CardioRow],
    productivity: &[ProductivityRow],
) -> anyhow::Result<String> {
    Ok(format!(
        "You are a health advisor for polar expedition participants. Below are \
         one participant's sensor readings for a single expedition, grouped by \
         metric kind. Sessions are coded 1=morning, 2=day, 3=evening and \
         timestamps are epoch milliseconds.\n\n\
         EEG band metrics:\n{}\n\n\
         Physiological metrics:\n{}\n\n\
         Cardio metrics:\n{}\n\n\
         Productivity metrics:\n{}\n\n\
         Give short practical advice on workload, rest and recovery based on \
         these readings.",
        serde_json::to_string(nlp)?,
        serde_json::to_string(physiological)?,
        serde_json::to_string(cardio)?,
        serde_json::to_string(productivity)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_all_four_collections() {
        let nlp = vec![NlpRow {
            individual_number: "P-001".to_string(),
            expedition_id: Some(1),
            session: 1,
            timestamp: 1000,
            alpha: 8.25,
            beta: 14.0,
            theta: 5.0,
            delta: 2.5,
            smr: 11.0,
        }];
        let cardio = vec![CardioRow {
            individual_number: "P-001".to_string(),
            expedition_id: Some(1),
            session: 2,
            timestamp: 2000,
            heart_rate: 72.0,
            stress_index: 130.0,
            kaplan_index: 3.4,
        }];

        let prompt = build_prompt(&nlp, &[], &cardio, &[]).unwrap();
        assert!(prompt.contains("EEG band metrics"));
        assert!(prompt.contains("Physiological metrics"));
        assert!(prompt.contains("Cardio metrics"));
        assert!(prompt.contains("Productivity metrics"));
        assert!(prompt.contains("8.25"));
        assert!(prompt.contains("\"heart_rate\":72.0"));
        // empty collections serialize as empty arrays, not get dropped
        assert!(prompt.contains("[]"));
    }

    #[test]
    fn reply_content_comes_from_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"rest more"}},{"message":{"role":"assistant","content":"ignored"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let first = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap();
        assert_eq!(first, "rest more");
    }
}
