// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Confirmation seam.
//!
//! The engine never talks to a terminal directly. Whenever it needs a yes or
//! no from the operator, it hands a [`Prompt`] to a [`Confirm`] implementor
//! and blocks until an answer comes back.

use indicatif::ProgressBar;
use inquire::InquireError;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{info, instrument};

/// Question that needs an operator's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Manifest wants to run an external command.
    RunCommand { command: String, args: Vec<String> },

    /// Build output exists and will be replaced.
    OverwriteBuild { path: PathBuf },

    /// Absolute build output exists without the build sentinel.
    MissingSentinel { path: PathBuf },

    /// Final go-ahead before deleting unmarked build output.
    DeleteUnmarked { path: PathBuf },
}

impl Display for Prompt {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::RunCommand { command, args } => {
                write!(fmt, "Run external command {command:?}")?;
                if !args.is_empty() {
                    write!(fmt, " with arguments {args:?}")?;
                }
                fmt.write_str("?")
            }
            Self::OverwriteBuild { path } => write!(
                fmt,
                "Output folder {:?} already exists. Overwrite it?",
                path.display()
            ),
            Self::MissingSentinel { path } => write!(
                fmt,
                "{:?} was not created by this tool. Continue anyway?",
                path.display()
            ),
            Self::DeleteUnmarked { path } => write!(
                fmt,
                "Everything inside {:?} will be deleted. Are you absolutely sure?",
                path.display()
            ),
        }
    }
}

/// Synchronous yes or no answers.
pub trait Confirm {
    /// Ask operator to confirm prompt.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if no answer could be obtained.
    fn confirm(&mut self, prompt: &Prompt) -> Result<bool, PromptError>;
}

impl<C: Confirm + ?Sized> Confirm for &mut C {
    fn confirm(&mut self, prompt: &Prompt) -> Result<bool, PromptError> {
        (**self).confirm(prompt)
    }
}

impl<C: Confirm + ?Sized> Confirm for Box<C> {
    fn confirm(&mut self, prompt: &Prompt) -> Result<bool, PromptError> {
        (**self).confirm(prompt)
    }
}

/// Answer yes to everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, prompt: &Prompt) -> Result<bool, PromptError> {
        info!("{prompt} yes (assumed)");
        Ok(true)
    }
}

/// Terminal prompter that cooperates with a progress bar.
///
/// Progress bar is suspended while the question is on screen.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar prompter.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Confirm for IndicatifPrompter {
    #[instrument(skip(self), level = "debug")]
    fn confirm(&mut self, prompt: &Prompt) -> Result<bool, PromptError> {
        let message = prompt.to_string();
        let answer = self
            .bar
            .suspend(|| inquire::Confirm::new(&message).with_default(false).prompt());

        match answer {
            Ok(answer) => Ok(answer),
            Err(InquireError::OperationCanceled) => Ok(false),
            Err(error) => Err(PromptError::Inquire(error)),
        }
    }
}

/// Prompt error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error(transparent)]
    Inquire(#[from] InquireError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_command_prompt_lists_arguments() {
        let prompt = Prompt::RunCommand {
            command: "code".into(),
            args: vec!["--install-extension".into(), "neon.vsix".into()],
        };
        assert_eq!(
            prompt.to_string(),
            "Run external command \"code\" with arguments [\"--install-extension\", \"neon.vsix\"]?"
        );
    }

    #[test]
    fn assume_yes_through_box() -> anyhow::Result<()> {
        let mut confirm: Box<dyn Confirm> = Box::new(AssumeYes);
        let prompt = Prompt::OverwriteBuild {
            path: PathBuf::from("dist/neon"),
        };
        assert!(confirm.confirm(&prompt)?);

        Ok(())
    }
}
