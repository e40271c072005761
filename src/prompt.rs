use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::error::InstallError;

pub struct Prompter {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
    terminal: bool,
}

impl Prompter {
    pub fn stdio() -> Self {
        Self {
            input: Box::new(io::BufReader::new(io::stdin())),
            output: Box::new(io::stdout()),
            terminal: true,
        }
    }

    pub fn scripted(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
            terminal: false,
        }
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{} ", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("failed to read operator input")?;
        if read == 0 {
            return Err(InstallError::InputClosed.into());
        }
        Ok(line.trim().to_string())
    }

    /// Ask until the answer is one of `allowed` (case-insensitive), or anything
    /// when `allowed` is empty.
    pub fn ask(&mut self, prompt: &str, allowed: &[&str]) -> Result<String> {
        loop {
            let answer = self.read_line(prompt)?;
            if allowed.is_empty() || allowed.iter().any(|o| o.eq_ignore_ascii_case(&answer)) {
                return Ok(answer);
            }
            writeln!(
                self.output,
                "{}",
                format!("Invalid input. Expected one of: {}", allowed.join(", ")).yellow()
            )?;
        }
    }

    pub fn ask_or_default(&mut self, prompt: &str, default: &str) -> Result<String> {
        let answer = self.read_line(&format!("{} (default: {}):", prompt, default))?;
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer)
        }
    }

    pub fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = self.ask(&format!("{} (yes/no):", prompt), &["yes", "no"])?;
        Ok(answer.eq_ignore_ascii_case("yes"))
    }

    pub fn secret(&mut self, prompt: &str) -> Result<String> {
        if self.terminal {
            return dialoguer::Password::new()
                .with_prompt(prompt)
                .interact()
                .context("failed to read secret input");
        }
        self.read_line(&format!("{}:", prompt))
    }
}
