//! Request and response rewriting for OpenAI-compatible chat completions.
//!
//! Requests get their output budget clamped and reasoning ("thinking") mode
//! disabled through the chat template; responses get any `<think>` block that
//! slipped through removed.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"))
}

/// Cap the requested output tokens at `max_output_tokens` and ask the server
/// to render the chat template with thinking disabled.
pub fn clamp_request(body: &mut Value, max_output_tokens: u64) {
    let Some(object) = body.as_object_mut() else {
        return;
    };

    for key in ["max_tokens", "max_completion_tokens"] {
        if let Some(requested) = object.get(key).and_then(Value::as_u64) {
            if requested > max_output_tokens {
                object.insert(key.to_string(), json!(max_output_tokens));
            }
        }
    }

    let chat_kwargs = object
        .entry("chat_template_kwargs")
        .or_insert(Value::Null);
    if !chat_kwargs.is_object() {
        *chat_kwargs = Value::Object(Map::new());
    }
    chat_kwargs["enable_thinking"] = Value::Bool(false);
}

/// Remove every `<think>...</think>` block and the whitespace following it.
pub fn strip_think(text: &str) -> String {
    think_block().replace_all(text, "").into_owned()
}

/// Apply [`strip_think`] to the message content of every choice.
pub fn strip_think_in_response(body: &mut Value) {
    let Some(choices) = body.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        if let Some(content) = choice.pointer_mut("/message/content") {
            if let Some(text) = content.as_str() {
                let cleaned = strip_think(text);
                if cleaned != text {
                    *content = Value::String(cleaned);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_oversized_budgets_only() {
        let mut body = json!({"max_tokens": 32000, "max_completion_tokens": 100});
        clamp_request(&mut body, 4096);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["max_completion_tokens"], 100);
    }

    #[test]
    fn leaves_missing_budget_unset() {
        let mut body = json!({"messages": []});
        clamp_request(&mut body, 4096);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn disables_thinking_and_keeps_other_kwargs() {
        let mut body = json!({
            "top_k": 20,
            "chat_template_kwargs": {"add_generation_prompt": true}
        });
        clamp_request(&mut body, 4096);
        assert_eq!(body["top_k"], 20);
        assert_eq!(body["chat_template_kwargs"]["add_generation_prompt"], true);
        assert_eq!(body["chat_template_kwargs"]["enable_thinking"], false);
    }

    #[test]
    fn replaces_null_template_kwargs() {
        let mut body = json!({"chat_template_kwargs": null});
        clamp_request(&mut body, 10);
        assert_eq!(body["chat_template_kwargs"]["enable_thinking"], false);
    }

    #[test]
    fn strips_multiline_think_blocks() {
        let text = "<think>\nplan\nmore\n</think>\n\nHello <think>x</think> world";
        assert_eq!(strip_think(text), "Hello world");
    }

    #[test]
    fn strips_every_choice() {
        let mut body = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "<think>hmm</think> 42"}},
                {"message": {"role": "assistant", "content": null}}
            ]
        });
        strip_think_in_response(&mut body);
        assert_eq!(body["choices"][0]["message"]["content"], "42");
        assert!(body["choices"][1]["message"]["content"].is_null());
    }
}
