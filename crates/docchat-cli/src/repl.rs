use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use docchat_core::SessionHost;

use crate::{load_document, render};

const HELP: &str = "Commands:
  /load PATH   load another document (clears history)
  /history     show the conversation so far
  /sources     toggle printing retrieved passages
  /reset       clear history, keep the document
  /help        show this help
  quit, exit   leave";

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Quit,
    Load(PathBuf),
    History,
    ToggleSources,
    Reset,
    Help,
    Ask(String),
    Blank,
    Unknown(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Blank;
        }
        if line == "quit" || line == "exit" {
            return Self::Quit;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Ask(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "load" if !arg.is_empty() => Self::Load(PathBuf::from(arg)),
            "history" => Self::History,
            "sources" => Self::ToggleSources,
            "reset" => Self::Reset,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

pub async fn run(host: &SessionHost, document: &Path) -> Result<()> {
    let id = host.create().await;
    load_document(host, &id, document).await?;

    println!("docchat REPL. Type '/help' for commands, 'quit' to exit.");
    println!("---");

    let mut show_sources = false;
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }

        match ReplCommand::parse(&input) {
            ReplCommand::Quit => break,
            ReplCommand::Blank => continue,
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Unknown(cmd) => eprintln!("Unknown command: {cmd} (try /help)"),
            ReplCommand::ToggleSources => {
                show_sources = !show_sources;
                println!("Sources {}.", if show_sources { "on" } else { "off" });
            }
            ReplCommand::History => match host.history(&id).await {
                Ok(turns) => print!("{}", render::history(&turns)),
                Err(err) => eprintln!("Error: {err}"),
            },
            ReplCommand::Reset => match host.reset(&id).await {
                Ok(()) => println!("History cleared."),
                Err(err) => eprintln!("Error: {err}"),
            },
            ReplCommand::Load(path) => {
                if let Err(err) = load_document(host, &id, &path).await {
                    eprintln!("Error: {err:#}");
                }
            }
            ReplCommand::Ask(question) => match host.ask(&id, &question).await {
                Ok(answer) => {
                    println!("{}", answer.text);
                    if show_sources {
                        print!("{}", render::sources(&answer.sources));
                    }
                }
                Err(err) if err.is_retryable() => {
                    eprintln!("Error: {err} (temporary, try again)")
                }
                Err(err) => eprintln!("Error: {err}"),
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_questions() {
        assert_eq!(
            ReplCommand::parse("  what is this?\n"),
            ReplCommand::Ask("what is this?".into())
        );
    }

    #[test]
    fn quit_words_and_blank_lines() {
        assert_eq!(ReplCommand::parse("quit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("exit\n"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Blank);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(
            ReplCommand::parse("/load  docs/report 2024.pdf"),
            ReplCommand::Load(PathBuf::from("docs/report 2024.pdf"))
        );
        assert_eq!(ReplCommand::parse("/history"), ReplCommand::History);
        assert_eq!(ReplCommand::parse("/sources"), ReplCommand::ToggleSources);
        assert_eq!(ReplCommand::parse("/reset"), ReplCommand::Reset);
        assert_eq!(ReplCommand::parse("/help"), ReplCommand::Help);
    }

    #[test]
    fn load_without_path_is_unknown() {
        assert_eq!(
            ReplCommand::parse("/load"),
            ReplCommand::Unknown("/load".into())
        );
        assert_eq!(
            ReplCommand::parse("/bogus x"),
            ReplCommand::Unknown("/bogus x".into())
        );
    }
}
