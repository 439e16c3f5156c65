use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::traits::PromptBuilder;

use super::types::*;
use super::Gemini;

pub struct GeminiPromptBuilder {
    agent: Gemini,
    input: String,
    preamble: Option<String>,
    temperature: Option<f32>,
}

impl GeminiPromptBuilder {
    pub(crate) fn new(agent: Gemini, input: String) -> Self {
        Self {
            agent,
            input,
            preamble: None,
            temperature: None,
        }
    }

    fn build_request(&self) -> GenerateRequest {
        let mut request = GenerateRequest::new();

        if let Some(temp) = self.temperature {
            request = request.temperature(temp);
        }

        if let Some(ref preamble) = self.preamble {
            request = request.system(preamble);
        }

        request.content(Content::user(&self.input))
    }
}

#[async_trait]
impl PromptBuilder for GeminiPromptBuilder {
    fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    async fn send(self) -> Result<String> {
        let request = self.build_request();
        let response = self
            .agent
            .client()
            .generate(&self.agent.model, &request)
            .await?;

        debug!(
            finish_reason = response.finish_reason().unwrap_or("unknown"),
            "Gemini prompt completed"
        );

        response
            .text()
            .ok_or_else(|| anyhow!("No text in Gemini response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_carries_preamble_and_temperature() {
        let builder = Gemini::new("k", "gemini-2.0-flash")
            .prompt("current")
            .preamble("system")
            .temperature(0.2);

        let request = builder.build_request();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"].as_array().unwrap().len(), 1);
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "current");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "system");
        assert!(json["systemInstruction"].get("role").is_none());
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }
}
