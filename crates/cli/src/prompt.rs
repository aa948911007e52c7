//! Yes/no prompts on the terminal.

use std::io::{IsTerminal, Write};

/// Ask `question` and read a yes/no answer.
///
/// An empty answer, or stdin not being a terminal, yields `default`.
pub async fn confirm(question: &str, default: bool) -> color_eyre::Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(default);
    }

    let hint = if default { "[Y/n]" } else { "[y/N]" };
    let question = format!("{question} {hint} ");
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stdout = std::io::stdout();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await??;

    Ok(parse_answer(&answer, default))
}

fn parse_answer(answer: &str, default: bool) -> bool {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}
