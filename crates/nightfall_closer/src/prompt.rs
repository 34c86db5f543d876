//! Operator interaction.

use std::io::{self, BufRead, Write};

/// Questions the closer may put to the operator.
pub trait Operator {
    /// Yes/no question. `Ok(false)` keeps the night open.
    fn confirm(&mut self, question: &str) -> io::Result<bool>;

    /// Free-text reason for closing a night without data.
    fn ask_reason(&mut self) -> io::Result<Option<String>>;
}

/// Reads answers line by line from `input`, asks on `output`.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_answer(&mut self, question: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead, W: Write> Operator for TerminalPrompt<R, W> {
    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        loop {
            match self.read_answer(question)?.as_deref().map(str::to_lowercase) {
                // End of input never closes a night.
                None => return Ok(false),
                Some(answer) if answer == "y" || answer == "yes" => return Ok(true),
                Some(answer) if answer == "n" || answer == "no" => return Ok(false),
                Some(_) => writeln!(self.output, "Please answer y or n")?,
            }
        }
    }

    fn ask_reason(&mut self) -> io::Result<Option<String>> {
        Ok(self
            .read_answer("Reason for closing without data: ")?
            .filter(|r| !r.is_empty()))
    }
}

/// Batch mode: every question is answered yes, no reason is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Operator for AutoConfirm {
    fn confirm(&mut self, _question: &str) -> io::Result<bool> {
        Ok(true)
    }

    fn ask_reason(&mut self) -> io::Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn confirm_repeats_until_answered() {
        let mut out = Vec::new();
        let mut prompt = TerminalPrompt::new(Cursor::new("maybe\nY\n"), &mut out);

        assert!(prompt.confirm("Close? ").unwrap());
        let shown = String::from_utf8(out).unwrap();
        assert_eq!(shown.matches("Close? ").count(), 2);
        assert!(shown.contains("Please answer y or n"));
    }

    #[test]
    fn end_of_input_declines() {
        let mut prompt = TerminalPrompt::new(Cursor::new(""), io::sink());
        assert!(!prompt.confirm("Close? ").unwrap());
    }

    #[test]
    fn reason_is_trimmed() {
        let mut prompt = TerminalPrompt::new(Cursor::new("  telescope parked \n"), io::sink());
        assert_eq!(prompt.ask_reason().unwrap().as_deref(), Some("telescope parked"));

        let mut empty = TerminalPrompt::new(Cursor::new("\n"), io::sink());
        assert_eq!(empty.ask_reason().unwrap(), None);
    }
}
