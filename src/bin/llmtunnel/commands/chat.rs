use llmtunnel::chat::{run_repl, ChatClient};
use std::path::PathBuf;

pub async fn handle_chat(
    config_path: &Option<PathBuf>,
    port: u16,
    max_tokens: u64,
) -> anyhow::Result<()> {
    let config = super::load(config_path)?;
    let client = ChatClient::connect(port, max_tokens, config.chat.max_output_tokens).await?;
    run_repl(&client).await
}
