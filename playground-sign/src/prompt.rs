// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The workbench reads user intent through this abstraction so the whole interaction can be
//! scripted in tests without a tty.

use crate::error::{self, Result};
use snafu::ResultExt;
use std::io::Write;

pub(crate) trait InputSource {
    /// Displays `prompt` and reads one line of input, without the trailing newline.
    fn read_line(&mut self, prompt: &str) -> Result<String>;
}

/// Reads from the interactive terminal.
#[derive(Debug)]
pub(crate) struct StdinInput;

impl InputSource for StdinInput {
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        print!("{prompt}");
        std::io::stdout().flush().context(error::InputSnafu)?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context(error::InputSnafu)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Replays a fixed script of answers; an exhausted script answers with an empty line, which
/// every menu treats as "continue".
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedInput {
    answers: std::collections::VecDeque<String>,
}

#[cfg(test)]
impl ScriptedInput {
    pub(crate) fn new(answers: &[&str]) -> Self {
        ScriptedInput {
            answers: answers.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[cfg(test)]
impl InputSource for ScriptedInput {
    fn read_line(&mut self, _prompt: &str) -> Result<String> {
        Ok(self.answers.pop_front().unwrap_or_default())
    }
}
