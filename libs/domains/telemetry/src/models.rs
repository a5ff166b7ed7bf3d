use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use validator::{Validate, ValidationError};

/// Kind of record carried by a store-raw job (`data_type` in the payload).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    Trace,
    Span,
    Generation,
    Event,
    Score,
}

const SPAN_TYPES: [&str; 7] = ["db", "http", "llm", "cache", "auth", "custom", "compute"];
const EVENT_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];
const SCORE_SOURCES: [&str; 4] = ["human", "llm", "heuristic", "automated"];

fn error(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(error("blank", "is required and cannot be empty"));
    }
    Ok(())
}

fn one_of(value: &str, allowed: &[&str], message: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() || allowed.contains(&value.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(error("one_of", message))
    }
}

fn span_type(value: &str) -> Result<(), ValidationError> {
    one_of(
        value,
        &SPAN_TYPES,
        "type must be one of: db, http, llm, cache, auth, custom, compute",
    )
}

fn event_level(value: &str) -> Result<(), ValidationError> {
    one_of(value, &EVENT_LEVELS, "level must be one of: debug, info, warn, error")
}

fn score_source(value: &str) -> Result<(), ValidationError> {
    one_of(
        value,
        &SCORE_SOURCES,
        "source must be one of: human, llm, heuristic, automated",
    )
}

fn ordered(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(error(
            "end_before_start",
            "end_time cannot be before start_time",
        )),
        _ => Ok(()),
    }
}

fn is_empty(value: &str) -> bool {
    value.is_empty()
}

/// A top-level trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_trace"))]
pub struct TraceRequest {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub project_id: String,
    #[serde(default)]
    #[validate(length(max = 255), custom(function = "not_blank"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

fn validate_trace(trace: &TraceRequest) -> Result<(), ValidationError> {
    ordered(trace.start_time, trace.end_time)?;
    if trace.tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err(error("blank_tag", "tags cannot be empty"));
    }
    Ok(())
}

/// Token usage reported for a generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    #[serde(default)]
    pub prompt_tokens: i32,
    #[serde(default)]
    pub completion_tokens: i32,
    #[serde(default)]
    pub total_tokens: i32,
}

/// A model call within a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_generation"))]
pub struct GenerationRequest {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub name: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub input: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub output: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

fn validate_generation(generation: &GenerationRequest) -> Result<(), ValidationError> {
    ordered(generation.start_time, generation.end_time)
}

/// A timed unit of work within a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_span"))]
pub struct SpanRequest {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub parent_id: String,
    #[serde(default)]
    #[validate(length(max = 255), custom(function = "not_blank"))]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    #[validate(custom(function = "span_type"))]
    pub span_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

fn validate_span(span: &SpanRequest) -> Result<(), ValidationError> {
    ordered(span.start_time, span.end_time)
}

/// A point-in-time log entry attached to a trace or span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct EventRequest {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub span_id: String,
    #[serde(default)]
    #[validate(length(max = 255), custom(function = "not_blank"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    #[validate(custom(function = "event_level"))]
    pub level: String,
    #[serde(default)]
    #[validate(length(max = 10000), custom(function = "not_blank"))]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An evaluation score for a trace or generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_score"))]
pub struct ScoreRequest {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub generation_id: String,
    #[serde(default)]
    #[validate(length(max = 255), custom(function = "not_blank"))]
    pub name: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "is_empty")]
    #[validate(custom(function = "score_source"))]
    pub source: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    #[validate(length(max = 1000))]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn validate_score(score: &ScoreRequest) -> Result<(), ValidationError> {
    if score.trace_id.trim().is_empty() && score.generation_id.trim().is_empty() {
        return Err(error(
            "missing_target",
            "either trace_id or generation_id must be provided",
        ));
    }
    if !score.value.is_finite() || !(0.0..=1.0).contains(&score.value) {
        return Err(error("value_range", "value must be between 0 and 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_data_type_wire_names() {
        assert_eq!(DataType::Generation.to_string(), "generation");
        assert_eq!(DataType::from_str("score").unwrap(), DataType::Score);
        assert!(DataType::from_str("metric").is_err());
        assert_eq!(serde_json::to_value(DataType::Span).unwrap(), json!("span"));
    }

    #[test]
    fn test_trace_name_rules() {
        let mut trace = TraceRequest {
            name: "checkout".into(),
            ..Default::default()
        };
        assert!(trace.validate().is_ok());

        trace.name = "   ".into();
        let errors = trace.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("name"));

        trace.name = "x".repeat(256);
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_trace_end_before_start_rejected() {
        let trace = TraceRequest {
            name: "checkout".into(),
            start_time: Some("2024-01-01T00:00:10Z".parse().unwrap()),
            end_time: Some("2024-01-01T00:00:05Z".parse().unwrap()),
            ..Default::default()
        };
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_span_requires_trace_and_name() {
        let span = SpanRequest::default();
        let errors = span.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("trace_id"));
        assert!(fields.contains_key("name"));
    }

    #[test]
    fn test_span_type_is_restricted() {
        let mut span = SpanRequest {
            trace_id: "t-1".into(),
            name: "query".into(),
            span_type: "DB".into(),
            ..Default::default()
        };
        assert!(span.validate().is_ok());

        span.span_type = "queue".into();
        assert!(span.validate().is_err());
    }

    #[test]
    fn test_generation_required_fields() {
        let generation = GenerationRequest {
            trace_id: "t-1".into(),
            ..Default::default()
        };
        let errors = generation.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("input"));
        assert!(fields.contains_key("model"));
        assert!(!fields.contains_key("trace_id"));
    }

    #[test]
    fn test_event_level_and_message() {
        let event = EventRequest {
            trace_id: "t-1".into(),
            name: "cache-miss".into(),
            level: "fatal".into(),
            ..Default::default()
        };
        let errors = event.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("level"));
        assert!(fields.contains_key("message"));
    }

    #[test]
    fn test_score_needs_target_and_unit_value() {
        let mut score = ScoreRequest {
            name: "accuracy".into(),
            generation_id: "g-1".into(),
            value: 0.75,
            ..Default::default()
        };
        assert!(score.validate().is_ok());

        score.value = 1.5;
        assert!(score.validate().is_err());

        score.value = 0.5;
        score.generation_id.clear();
        assert!(score.validate().is_err());
    }

    #[test]
    fn test_span_type_serializes_as_type() {
        let span: SpanRequest = serde_json::from_value(json!({
            "trace_id": "t-1",
            "name": "llm call",
            "type": "llm"
        }))
        .unwrap();
        assert_eq!(span.span_type, "llm");

        let value = serde_json::to_value(&span).unwrap();
        assert_eq!(value["type"], "llm");
        assert!(value.get("parent_id").is_none());
    }
}
