//! Lesson-plan (RPPM) request shaping: curriculum phase, prompts, and parsing
//! of the model's JSON reply into a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Phase {
    pub fn for_grade(grade: u8) -> Option<Phase> {
        match grade {
            1..=2 => Some(Phase::A),
            3..=4 => Some(Phase::B),
            5..=6 => Some(Phase::C),
            7..=9 => Some(Phase::D),
            10 => Some(Phase::E),
            11..=12 => Some(Phase::F),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::D => "D",
            Phase::E => "E",
            Phase::F => "F",
        };
        f.write_str(letter)
    }
}

/// Validated inputs for one lesson plan.
#[derive(Debug, Clone)]
pub struct LessonRequest {
    pub teacher_name: String,
    pub school_name: String,
    pub subject: String,
    pub grade: u8,
    pub topic: String,
    pub meetings: u8,
    pub minutes_per_meeting: u16,
    pub learning_model: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "Anda adalah asisten penyusun Rencana Pembelajaran Mendalam (RPPM) \
untuk guru di Indonesia. Gunakan Bahasa Indonesia yang baku dan ringkas. \
Balas HANYA dengan satu objek JSON tanpa teks lain, dengan kunci: \
learning_objectives (array string), graduate_profile_dimensions (array string), \
pedagogical_practice (string), learning_partnerships (string), \
learning_environment (string), digital_tools (array string), \
meetings (array objek {meeting, understand, apply, reflect}, satu per pertemuan), \
assessment (objek {initial, formative, summative}).";

pub fn build_prompts(request: &LessonRequest) -> Prompts {
    let phase = Phase::for_grade(request.grade)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut user = format!(
        "Mata pelajaran: {}\nKelas: {} (Fase {})\nTopik: {}\nJumlah pertemuan: {}\nAlokasi waktu: {} menit per pertemuan",
        request.subject,
        request.grade,
        phase,
        request.topic,
        request.meetings,
        request.minutes_per_meeting,
    );
    if let Some(model) = request.learning_model.as_deref().filter(|m| !m.trim().is_empty()) {
        user.push_str(&format!("\nModel pembelajaran: {}", model.trim()));
    }
    if let Some(notes) = request.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        user.push_str(&format!("\nCatatan guru: {}", notes.trim()));
    }

    Prompts {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Document fields filled in by the server, never by the model.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentHeader {
    pub teacher_name: String,
    pub school_name: String,
    pub subject: String,
    pub grade: u8,
    pub phase: Option<Phase>,
    pub topic: String,
    pub meetings: u8,
    pub minutes_per_meeting: u16,
    pub total_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_model: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl DocumentHeader {
    pub fn new(request: &LessonRequest, generated_at: DateTime<Utc>) -> Self {
        Self {
            teacher_name: request.teacher_name.clone(),
            school_name: request.school_name.clone(),
            subject: request.subject.clone(),
            grade: request.grade,
            phase: Phase::for_grade(request.grade),
            topic: request.topic.clone(),
            meetings: request.meetings,
            minutes_per_meeting: request.minutes_per_meeting,
            total_minutes: request.meetings as u32 * request.minutes_per_meeting as u32,
            learning_model: request.learning_model.clone(),
            generated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingPlan {
    #[serde(default)]
    pub meeting: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub understand: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub apply: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reflect: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(default, deserialize_with = "lenient_text")]
    pub initial: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub formative: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub summative: String,
}

/// Model-authored part of the plan. Unknown keys are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonPlanDocument {
    #[serde(default, deserialize_with = "lenient_list")]
    pub learning_objectives: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub graduate_profile_dimensions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub pedagogical_practice: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub learning_partnerships: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub learning_environment: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub digital_tools: Vec<String>,
    #[serde(default)]
    pub meetings: Vec<MeetingPlan>,
    #[serde(default)]
    pub assessment: Assessment,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Full document returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct LessonPlan {
    pub header: DocumentHeader,
    #[serde(flatten)]
    pub body: LessonPlanDocument,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("model reply contained no JSON object")]
    NoJson,
    #[error("model reply was not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("model reply is missing {0}")]
    Incomplete(&'static str),
}

/// Extract and parse the JSON object in a model reply, tolerating markdown
/// code fences and stray prose around it.
pub fn parse_document(text: &str) -> Result<LessonPlanDocument, DocumentError> {
    let start = text.find('{').ok_or(DocumentError::NoJson)?;
    let end = text.rfind('}').ok_or(DocumentError::NoJson)?;
    if end < start {
        return Err(DocumentError::NoJson);
    }

    let document: LessonPlanDocument = serde_json::from_str(&text[start..=end])?;
    if document.learning_objectives.is_empty() {
        return Err(DocumentError::Incomplete("learning_objectives"));
    }
    Ok(document)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(value_to_text).collect(),
        Value::String(s) => s.lines().map(str::to_string).collect(),
        other => vec![value_to_text(&other)],
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
