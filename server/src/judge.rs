use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use toron_core::judgment::SideVerdict;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge unreachable: {0}")]
    Unreachable(String),
    #[error("judge returned status {0}")]
    BadStatus(u16),
    #[error("malformed judge output: {0}")]
    Malformed(String),
    #[error("empty judge response")]
    Empty,
}

/// Structured output of the judge's first pass. `winner` is the raw token
/// from the model ("agree"/"disagree" or a user id); the engine normalises
/// it before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeVerdict {
    pub agree: SideVerdict,
    pub disagree: SideVerdict,
    pub winner: String,
}

/// Two-pass evaluator: a structured verdict, then a prose narration of it.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn evaluate(
        &self,
        subject_title: &str,
        agree_turns: &str,
        disagree_turns: &str,
    ) -> Result<JudgeVerdict, JudgeError>;

    async fn narrate(&self, verdict: &JudgeVerdict) -> Result<String, JudgeError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatTurn>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatTurn {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

const EVALUATE_SYSTEM: &str = "당신은 토론 심판입니다. 주제와 양측의 발언을 읽고 \
각 측을 0~100점으로 평가하세요. 반드시 다음 형태의 JSON만 출력하세요: \
{\"agree\":{\"score\":0,\"good\":\"\",\"bad\":\"\"},\"disagree\":{\"score\":0,\"good\":\"\",\"bad\":\"\"},\"winner\":\"agree|disagree\"}";

const NARRATE_SYSTEM: &str = "당신은 토론 심판입니다. 주어진 판정 JSON을 바탕으로 \
양측의 잘한 점과 아쉬운 점, 승자를 설명하는 한 단락의 심사평을 한국어로 작성하세요.";

/// Chat-completions judge over HTTP.
pub struct HttpJudge {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpJudge {
    #[must_use]
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn complete(&self, system: &str, prompt: String) -> Result<String, JudgeError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: system.to_string(),
                },
                ChatTurn {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| JudgeError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(JudgeError::BadStatus(response.status().as_u16()));
        }
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Malformed(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(JudgeError::Empty);
        }
        Ok(content)
    }
}

/// Strips a markdown code fence if the model wrapped its JSON in one.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl JudgeClient for HttpJudge {
    async fn evaluate(
        &self,
        subject_title: &str,
        agree_turns: &str,
        disagree_turns: &str,
    ) -> Result<JudgeVerdict, JudgeError> {
        let prompt = format!(
            "주제: {subject_title}\n\n[찬성측 발언]\n{agree_turns}\n\n[반대측 발언]\n{disagree_turns}"
        );
        let content = self.complete(EVALUATE_SYSTEM, prompt).await?;
        let verdict: JudgeVerdict = serde_json::from_str(strip_fence(&content))
            .map_err(|e| JudgeError::Malformed(e.to_string()))?;
        if verdict.agree.score > 100 || verdict.disagree.score > 100 {
            return Err(JudgeError::Malformed("score out of range".to_string()));
        }
        Ok(verdict)
    }

    async fn narrate(&self, verdict: &JudgeVerdict) -> Result<String, JudgeError> {
        let json =
            serde_json::to_string(verdict).map_err(|e| JudgeError::Malformed(e.to_string()))?;
        self.complete(NARRATE_SYSTEM, json).await
    }
}

/// Canned judge for development boots and tests.
pub struct MockJudge {
    verdict: Mutex<Option<JudgeVerdict>>,
    fail: bool,
}

impl MockJudge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            verdict: Mutex::new(None),
            fail: false,
        }
    }

    /// Returns the given verdict from the next `evaluate` call.
    #[must_use]
    pub fn with_verdict(verdict: JudgeVerdict) -> Self {
        Self {
            verdict: Mutex::new(Some(verdict)),
            fail: false,
        }
    }

    /// Fails every call, for exercising the `JudgeError` policy.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            verdict: Mutex::new(None),
            fail: true,
        }
    }
}

impl Default for MockJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JudgeClient for MockJudge {
    async fn evaluate(
        &self,
        _subject_title: &str,
        _agree_turns: &str,
        _disagree_turns: &str,
    ) -> Result<JudgeVerdict, JudgeError> {
        if self.fail {
            return Err(JudgeError::Unreachable("mock failure".to_string()));
        }
        Ok(self.verdict.lock().await.clone().unwrap_or(JudgeVerdict {
            agree: SideVerdict {
                score: 75,
                good: "논리적 전개가 안정적이었습니다.".to_string(),
                bad: "구체적 근거가 부족했습니다.".to_string(),
            },
            disagree: SideVerdict {
                score: 65,
                good: "반박의 방향이 명확했습니다.".to_string(),
                bad: "주장이 반복되었습니다.".to_string(),
            },
            winner: "agree".to_string(),
        }))
    }

    async fn narrate(&self, verdict: &JudgeVerdict) -> Result<String, JudgeError> {
        if self.fail {
            return Err(JudgeError::Unreachable("mock failure".to_string()));
        }
        Ok(format!(
            "찬성측 {}점, 반대측 {}점입니다. 양측 모두 수고하셨습니다.",
            verdict.agree.score, verdict.disagree.score
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_stripping() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_fence(fenced), "{\"a\":1}");
        assert_eq!(strip_fence("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_verdict_decodes_from_model_output() {
        let raw = r#"{"agree":{"score":80,"good":"g","bad":"b"},"disagree":{"score":70,"good":"g","bad":"b"},"winner":"agree"}"#;
        let verdict: JudgeVerdict = serde_json::from_str(raw).unwrap();
        assert_eq!(verdict.agree.score, 80);
        assert_eq!(verdict.winner, "agree");
    }
}
