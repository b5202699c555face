use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

pub const HIGHLIGHT_ID_PREFIX: &str = "highlight-";

/// The fixed highlight palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
}

impl HighlightColor {
    pub fn all() -> &'static [HighlightColor] {
        &[
            HighlightColor::Yellow,
            HighlightColor::Green,
            HighlightColor::Blue,
            HighlightColor::Pink,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "yellow",
            HighlightColor::Green => "green",
            HighlightColor::Blue => "blue",
            HighlightColor::Pink => "pink",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "highlight-yellow",
            HighlightColor::Green => "highlight-green",
            HighlightColor::Blue => "highlight-blue",
            HighlightColor::Pink => "highlight-pink",
        }
    }

    pub fn background(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "rgba(255, 235, 59, 0.4)",
            HighlightColor::Green => "rgba(76, 175, 80, 0.3)",
            HighlightColor::Blue => "rgba(33, 150, 243, 0.3)",
            HighlightColor::Pink => "rgba(233, 30, 99, 0.3)",
        }
    }

    pub fn border(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "#fbc02d",
            HighlightColor::Green => "#388e3c",
            HighlightColor::Blue => "#1976d2",
            HighlightColor::Pink => "#c2185b",
        }
    }

    pub fn inline_style(&self) -> String {
        format!(
            "background-color: {}; border-bottom: 2px solid {}; cursor: pointer;",
            self.background(),
            self.border()
        )
    }
}

/// A backend highlight request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightDescriptor {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub color: HighlightColor,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, alias = "relevance_score")]
    pub relevance_score: f64,
}

impl HighlightDescriptor {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            page: None,
            color: HighlightColor::default(),
            explanation: String::new(),
            relevance_score: 0.0,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_color(mut self, color: HighlightColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>, relevance_score: f64) -> Self {
        self.explanation = explanation.into();
        self.relevance_score = relevance_score;
        self
    }

    /// Stable DOM id of the annotation element.
    pub fn element_id(&self) -> String {
        element_id(&self.id)
    }

    pub fn relevance_percent(&self) -> u32 {
        (self.relevance_score.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

pub fn element_id(highlight_id: &str) -> String {
    format!("{HIGHLIGHT_ID_PREFIX}{highlight_id}")
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HighlightPayload {
    List(Vec<HighlightDescriptor>),
    Wrapped { highlights: Vec<HighlightDescriptor> },
}

/// Parses the highlight list returned by the backend, either a bare array or an
/// object with a `highlights` field.
pub fn parse_highlights(json: &str) -> Result<Vec<HighlightDescriptor>> {
    let payload: HighlightPayload =
        serde_json::from_str(json).context("Failed to parse highlight list")?;
    Ok(match payload {
        HighlightPayload::List(list) => list,
        HighlightPayload::Wrapped { highlights } => highlights,
    })
}
