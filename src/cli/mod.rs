//! Operator-facing surface: the interactive console, the setup wizard and the
//! synthetic test-data tools.

pub mod console;
pub mod testdata;
pub mod wizard;

use anyhow::{Result, bail};
use std::io::Write;
use tokio::sync::mpsc;

/// Line source for interactive prompts.
///
/// Reads stdin on a plain thread so that a pending read never blocks the runtime from
/// shutting down.
pub struct Prompter {
    rx: mpsc::UnboundedReceiver<String>,
    echo: bool,
}

impl Prompter {
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self { rx, echo: true }
    }

    /// Feed a fixed list of lines; input ends after the last one.
    pub fn scripted<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in lines {
            let _ = tx.send(line.into());
        }
        Self { rx, echo: false }
    }

    /// Next raw line, or `None` once input is closed.
    pub async fn line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Like [`Prompter::line`], printing `prompt` first when attached to a terminal.
    pub async fn prompt_line(&mut self, prompt: &str) -> Option<String> {
        if self.echo {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
        }
        self.line().await
    }

    /// Print `label` and read an answer. Surrounding quotes are stripped (paths pasted
    /// from a file manager often carry them); an empty answer yields `default`.
    pub async fn ask(&mut self, label: &str, default: &str) -> Result<String> {
        if self.echo {
            if default.is_empty() {
                print!("{label} > ");
            } else {
                print!("{label} [{default}] > ");
            }
            let _ = std::io::stdout().flush();
        }

        let Some(line) = self.line().await else {
            bail!("Input closed while waiting for: {label}");
        };

        let answer = line.trim().trim_matches('"').trim();
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    /// Ask until `parse` accepts the answer.
    pub async fn ask_parsed<T, F>(&mut self, label: &str, default: &str, parse: F) -> Result<T>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        loop {
            let answer = self.ask(label, default).await?;
            match parse(&answer) {
                Ok(value) => return Ok(value),
                Err(reason) => println!("  {reason}"),
            }
        }
    }

    pub async fn confirm(&mut self, label: &str, default: bool) -> Result<bool> {
        let hint = if default { "y" } else { "n" };
        self.ask_parsed(label, hint, |answer| match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => Ok(true),
            "n" | "no" => Ok(false),
            other => Err(format!("Please answer y or n, not {other:?}")),
        })
        .await
    }
}
