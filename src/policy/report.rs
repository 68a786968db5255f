//! Plain-text diagnostic reports.

use std::fmt::Write as _;

/// Status marker for one report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Mark {
    fn symbol(self) -> &'static str {
        match self {
            Self::Ok => "[ OK ]",
            Self::Warn => "[WARN]",
            Self::Fail => "[FAIL]",
            Self::Info => "[INFO]",
        }
    }
}

/// Incrementally built report, one per run.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    text: String,
    step: usize,
}

impl ReportBuilder {
    pub fn new(title: impl AsRef<str>) -> Self {
        let title = title.as_ref();
        let mut text = String::new();
        let _ = writeln!(text, "{title}");
        let _ = writeln!(text, "{}", "=".repeat(title.chars().count()));
        Self { text, step: 0 }
    }

    /// Start a numbered step.
    pub fn step(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.step += 1;
        let _ = writeln!(self.text, "\n{}. {}", self.step, name.as_ref());
        self
    }

    /// Start an unnumbered section.
    pub fn section(&mut self, name: impl AsRef<str>) -> &mut Self {
        let _ = writeln!(self.text, "\n{}", name.as_ref());
        self
    }

    pub fn line(&mut self, mark: Mark, text: impl AsRef<str>) -> &mut Self {
        let _ = writeln!(self.text, "   {} {}", mark.symbol(), text.as_ref());
        self
    }

    /// Append pre-formatted text, indented.
    pub fn block(&mut self, text: impl AsRef<str>) -> &mut Self {
        for line in text.as_ref().lines() {
            let _ = writeln!(self.text, "   {line}");
        }
        self
    }

    #[must_use]
    pub fn finish(self) -> String {
        self.text
    }
}
