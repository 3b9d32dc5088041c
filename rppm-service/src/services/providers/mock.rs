//! Scripted provider for tests and local development.

use super::{Completion, CompletionProvider, CompletionRequest, ProviderError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Reply(String),
    Fail(String),
    RateLimited,
    /// Refuse whichever key the call carries.
    RejectKey,
    /// Wait, then reply.
    Delay(Duration, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub used_caller_key: bool,
}

pub struct MockProvider {
    default: MockBehavior,
    per_model: Mutex<HashMap<String, MockBehavior>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    /// Replies with a small but complete lesson plan for any model.
    pub fn new() -> Self {
        Self::with_default(MockBehavior::Reply(sample_lesson_plan_json()))
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_default(MockBehavior::Reply(text.into()))
    }

    pub fn with_default(default: MockBehavior) -> Self {
        Self {
            default,
            per_model: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, model: &str, behavior: MockBehavior) {
        if let Ok(mut map) = self.per_model.lock() {
            map.insert(model.to_string(), behavior);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn behavior_for(&self, model: &str) -> MockBehavior {
        self.per_model
            .lock()
            .ok()
            .and_then(|map| map.get(model).cloned())
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                model: model.to_string(),
                system_prompt: request.system_prompt.clone(),
                user_prompt: request.user_prompt.clone(),
                used_caller_key: request.options.api_key_override.is_some(),
            });
        }

        let text = match self.behavior_for(model) {
            MockBehavior::Reply(text) => text,
            MockBehavior::Fail(msg) => return Err(ProviderError::ApiError(msg)),
            MockBehavior::RateLimited => return Err(ProviderError::RateLimited),
            MockBehavior::RejectKey if request.options.api_key_override.is_some() => {
                return Err(ProviderError::CallerKeyRejected)
            }
            MockBehavior::RejectKey => {
                return Err(ProviderError::NotConfigured("server key rejected".to_string()))
            }
            MockBehavior::Delay(wait, text) => {
                tokio::time::sleep(wait).await;
                text
            }
        };

        Ok(Completion {
            input_tokens: (request.system_prompt.len() + request.user_prompt.len()) as i32 / 4,
            output_tokens: text.len() as i32 / 4,
            text,
            model: model.to_string(),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub fn sample_lesson_plan_json() -> String {
    serde_json::json!({
        "learning_objectives": [
            "Murid dapat menjelaskan siklus air dengan bahasa sendiri",
            "Murid dapat menggambar diagram siklus air"
        ],
        "graduate_profile_dimensions": ["Penalaran kritis", "Kolaborasi"],
        "pedagogical_practice": "Pembelajaran berbasis inkuiri",
        "learning_partnerships": "Orang tua membantu pengamatan di rumah",
        "learning_environment": "Kelas dan halaman sekolah",
        "digital_tools": ["Video animasi siklus air"],
        "meetings": [
            {
                "meeting": 1,
                "understand": "Mengamati air yang menguap dari gelas",
                "apply": "Menyusun diagram siklus air berkelompok",
                "reflect": "Menuliskan satu hal baru yang dipelajari"
            }
        ],
        "assessment": {
            "initial": "Pertanyaan pemantik tentang hujan",
            "formative": "Observasi diskusi kelompok",
            "summative": "Tes tertulis singkat"
        }
    })
    .to_string()
}
