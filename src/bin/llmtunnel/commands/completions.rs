use crate::cli::LlmTunnel;
use clap::CommandFactory;
use std::io::Write;

pub fn handle_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = LlmTunnel::command();
    let mut buf = Vec::<u8>::new();
    clap_complete::generate(shell, &mut cmd, "llmtunnel", &mut buf);

    match std::io::stdout().write_all(&buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e.into()),
    }
}
