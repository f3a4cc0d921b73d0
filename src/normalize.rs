use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::gemini::{FunctionDeclaration, Tool};

/// Name under which the extractor is declared to the model.
pub const NORMALIZE_REQUEST: &str = "normalize_request";

const INGREDIENTS_MARKER: &str = "ingredients:";
const MAX_BARE_LIST_CHARS: usize = 200;

pub const MISSING_INGREDIENTS: &str =
    "Missing ingredients. Please include 'ingredients: item1, item2, ...' or a comma-separated list.";

/// Structured view of the user's free-form request.
///
/// `error` is set exactly when `ingredients` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ingredients: Vec<String>,
    pub notes: String,
}

/// Pulls an ingredient list out of free-form text.
///
/// An `ingredients:` marker (any case) wins: the rest of its line is split on
/// commas. Without the marker, short text containing a comma is treated as a
/// bare list. Anything else yields no ingredients and an explanatory error.
pub fn normalize_request(user_text: &str) -> NormalizedRequest {
    let text = user_text.trim();
    // ASCII folding keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();

    let ingredients = if let Some(pos) = lower.find(INGREDIENTS_MARKER) {
        let after = text[pos + INGREDIENTS_MARKER.len()..].trim();
        split_list(first_line(after))
    } else if text.contains(',') && text.chars().count() <= MAX_BARE_LIST_CHARS {
        split_list(text)
    } else {
        Vec::new()
    };

    NormalizedRequest {
        error: ingredients.is_empty().then(|| MISSING_INGREDIENTS.to_string()),
        ingredients,
        notes: text.to_string(),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn first_line(s: &str) -> &str {
    s.split(is_line_break).next().unwrap_or("").trim()
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// The single capability offered to the model.
pub fn normalize_request_tool() -> Tool {
    Tool {
        function_declarations: vec![FunctionDeclaration {
            name: NORMALIZE_REQUEST.to_string(),
            description: "Normalize the user's free-form input into a structured request. \
                Extract ingredients (required) and optional constraints (dietary, meals, cooking_time). \
                If ingredients are missing, return an error field explaining what's missing."
                .to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "user_text": {
                        "type": "string",
                        "description": "Raw user text describing ingredients and optional constraints."
                    }
                },
                "required": ["user_text"]
            })),
        }],
    }
}
