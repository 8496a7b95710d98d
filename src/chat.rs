//! Minimal chat REPL against the OpenAI-compatible endpoint behind the tunnel.

use crate::rewrite::{clamp_request, strip_think_in_response};
use anyhow::{anyhow, Context};
use owo_colors::OwoColorize;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const DEFAULT_CHAT_PORT: u16 = 27347;
pub const DEFAULT_REPLY_TOKENS: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    client: ReqwestClient,
    base_url: String,
    model: String,
    max_tokens: u64,
    max_output_tokens: u64,
}

impl ChatClient {
    /// Look up the served model on `localhost:<port>`.
    pub async fn connect(
        port: u16,
        max_tokens: u64,
        max_output_tokens: u64,
    ) -> anyhow::Result<Self> {
        let client = ReqwestClient::new();
        let base_url = format!("http://localhost:{port}/v1");
        let unreachable =
            || format!("Cannot reach server on localhost:{port}. Is the tunnel open?");

        let models: Value = client
            .get(format!("{base_url}/models"))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(unreachable)?
            .json()
            .await
            .with_context(unreachable)?;
        let model = served_model(&models).with_context(unreachable)?;
        tracing::debug!(%model, %base_url, "connected to chat endpoint");

        Ok(Self {
            client,
            base_url,
            model,
            max_tokens,
            max_output_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the whole conversation and return the assistant reply.
    pub async fn complete(&self, history: &[Message]) -> anyhow::Result<String> {
        let body = request_body(&self.model, history, self.max_tokens, self.max_output_tokens);
        let response: Value = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send chat completion request")?
            .error_for_status()
            .context("Chat completion request was rejected")?
            .json()
            .await
            .context("Failed to decode chat completion response")?;
        extract_reply(response)
    }
}

fn served_model(models: &Value) -> anyhow::Result<String> {
    models
        .pointer("/data/0/id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("server lists no models"))
}

fn request_body(
    model: &str,
    history: &[Message],
    max_tokens: u64,
    max_output_tokens: u64,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": history,
        "max_tokens": max_tokens,
    });
    clamp_request(&mut body, max_output_tokens);
    body
}

fn extract_reply(mut response: Value) -> anyhow::Result<String> {
    strip_think_in_response(&mut response);
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("response has no message content"))
}

/// Run `work` unless `interrupt` resolves first.
async fn until_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = interrupt => None,
        value = work => Some(value),
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Read lines from stdin until EOF or Ctrl-C, keeping the conversation history.
pub async fn run_repl(client: &ChatClient) -> anyhow::Result<()> {
    println!(
        "Connected to {} on {}",
        client.model().bold(),
        client.base_url
    );
    println!("Type your message and press Enter. Ctrl+C to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<Message> = Vec::new();

    loop {
        print!("{} ", "You:".green().bold());
        std::io::stdout().flush()?;

        let line = match until_interrupted(lines.next_line(), ctrl_c()).await {
            Some(line) => line?,
            None => None,
        };
        let Some(line) = line else {
            println!("\nBye!");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        history.push(Message::user(line));
        let Some(result) = until_interrupted(client.complete(&history), ctrl_c()).await else {
            println!("\nBye!");
            return Ok(());
        };
        match result {
            Ok(reply) => {
                println!("{} {reply}\n", "Assistant:".blue().bold());
                history.push(Message::assistant(reply));
            }
            Err(err) => {
                println!("{} {err:#}", "Error:".red().bold());
                history.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_is_clamped_and_thinking_disabled() {
        let history = vec![Message::user("hi")];
        let body = request_body("Qwen/Qwen3-32B", &history, 32000, 4096);
        assert_eq!(body["model"], "Qwen/Qwen3-32B");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["chat_template_kwargs"]["enable_thinking"], false);
    }

    #[test]
    fn reply_has_think_block_removed() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "<think>\n...\n</think>\n\nParis."}}]
        });
        assert_eq!(extract_reply(response).unwrap(), "Paris.");
    }

    #[test]
    fn reply_without_choices_is_an_error() {
        assert!(extract_reply(json!({"object": "error"})).is_err());
    }

    #[tokio::test]
    async fn interrupt_cancels_a_pending_request() {
        let outcome =
            until_interrupted(std::future::pending::<()>(), std::future::ready(())).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn finished_work_is_returned_without_interrupt() {
        let outcome = until_interrupted(std::future::ready(42), std::future::pending()).await;
        assert_eq!(outcome, Some(42));
    }

    #[test]
    fn served_model_is_first_listed() {
        let models = json!({"data": [{"id": "Qwen/Qwen3-32B"}, {"id": "other"}]});
        assert_eq!(served_model(&models).unwrap(), "Qwen/Qwen3-32B");
        assert!(served_model(&json!({"data": []})).is_err());
    }
}
