//! Terminal implementation of the core's `UiPort`.

use lockstep_core::ui::{PromptError, PromptResult, UiPort};
use std::io::{self, BufRead, Write};

pub struct TermUi;

impl UiPort for TermUi {
    fn prompt(&mut self, msg: &str) -> PromptResult {
        let mut stdout = io::stdout();
        stdout.write_all(msg.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(PromptError::End);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn prompt_hidden(&mut self, msg: &str) -> PromptResult {
        match rpassword::prompt_password(msg) {
            Ok(input) => Ok(input),
            Err(err) => match err.kind() {
                io::ErrorKind::UnexpectedEof => Err(PromptError::End),
                io::ErrorKind::Interrupted => Err(PromptError::Interrupt),
                _ => Err(PromptError::Io(err)),
            },
        }
    }

    fn info(&mut self, msg: &str) {
        println!("{msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("{msg}");
    }
}
