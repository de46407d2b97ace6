//! Diagnostic collection for compilation batches.
//!
//! Diagnostics are parsed from rustc's `--error-format=json` output and
//! accumulated in a per-batch sink. The full list is handed back to the
//! caller whether the batch succeeds or fails; presentation is the
//! caller's concern, with terminal/JSON formatting offered as helpers.

use serde::Deserialize;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
    Help,
}

/// A position in unit source (1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

/// One compiler-emitted message, never mutated after insertion.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub severity: Severity,

    /// Qualified name of the unit the message belongs to.
    pub symbol: String,

    /// Primary position, when the compiler reported one.
    pub position: Option<SourcePosition>,

    /// The message text.
    pub message: String,

    /// Compiler error code (e.g. "E0425"), if any.
    pub code: Option<String>,

    /// Pre-rendered message for display, if the compiler supplied one.
    pub rendered: Option<String>,
}

/// Rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
struct RustcDiagnostic {
    message: String,
    code: Option<RustcCode>,
    level: String,
    spans: Vec<RustcSpan>,
    rendered: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    line_start: usize,
    column_start: usize,
    is_primary: bool,
}

/// Accumulates diagnostics for one compilation batch.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// Parse rustc JSON stderr output for `symbol` and collect every
    /// recognized diagnostic, regardless of compilation outcome.
    ///
    /// `line_offset` is the number of generated lines prepended to the
    /// submitted source; positions are shifted back by it so they point
    /// into the text the caller actually submitted.
    pub fn collect_rustc_output(&mut self, symbol: &str, stderr: &str, line_offset: usize) {
        for line in stderr.lines() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RustcDiagnostic>(line) {
                Ok(raw) => {
                    if let Some(diagnostic) = convert_diagnostic(symbol, &raw, line_offset) {
                        self.entries.push(diagnostic);
                    }
                }
                Err(e) => {
                    // Non-diagnostic stderr lines (e.g. ICE banners) land here
                    tracing::debug!(
                        "Failed to parse rustc JSON: {} (line: {})",
                        e,
                        if line.len() > 100 { &line[..100] } else { line }
                    );
                }
            }
        }
    }

    /// Whether any collected diagnostic has error severity.
    pub fn has_errors(&self) -> bool {
        self.has_errors_since(0)
    }

    /// Whether any diagnostic appended after `mark` has error severity.
    /// `mark` is a previous [`Self::len`] observation.
    pub fn has_errors_since(&self, mark: usize) -> bool {
        self.entries[mark..]
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// The diagnostics collected so far, in insertion order.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Consume the sink, yielding the ordered diagnostics list.
    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map a raw rustc diagnostic into the batch diagnostic model.
fn convert_diagnostic(symbol: &str, raw: &RustcDiagnostic, line_offset: usize) -> Option<Diagnostic> {
    let severity = match raw.level.as_str() {
        "error" | "error: internal compiler error" => Severity::Error,
        "warning" => Severity::Warning,
        "note" => Severity::Note,
        "help" => Severity::Help,
        _ => return None, // Skip unknown levels
    };

    let position = raw
        .spans
        .iter()
        .find(|s| s.is_primary)
        .map(|span| SourcePosition {
            // Reported against the wrapped source; shift back to the
            // submitted text. Anything inside the wrapper clamps to line 1.
            line: span.line_start.saturating_sub(line_offset).max(1),
            column: span.column_start,
        });

    Some(Diagnostic {
        severity,
        symbol: symbol.to_string(),
        position,
        message: raw.message.clone(),
        code: raw.code.as_ref().map(|c| c.code.clone()),
        rendered: raw.rendered.clone(),
    })
}

impl Diagnostic {
    /// Format the diagnostic for terminal display.
    pub fn format_terminal(&self) -> String {
        let mut output = String::new();

        let level_str = match self.severity {
            Severity::Error => "\x1b[1;31merror\x1b[0m",
            Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
            Severity::Note => "\x1b[1;36mnote\x1b[0m",
            Severity::Help => "\x1b[1;32mhelp\x1b[0m",
        };

        if let Some(code) = &self.code {
            output.push_str(&format!("{level_str}[{code}]: {}\n", self.message));
        } else {
            output.push_str(&format!("{level_str}: {}\n", self.message));
        }

        if let Some(pos) = &self.position {
            output.push_str(&format!(
                "  \x1b[1;34m-->\x1b[0m {}:{}:{}\n",
                self.symbol, pos.line, pos.column
            ));
        }

        output
    }

    /// Format the diagnostic for JSON output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "severity": format!("{:?}", self.severity).to_lowercase(),
            "symbol": self.symbol,
            "message": self.message,
            "code": self.code,
            "position": self.position.map(|pos| {
                serde_json::json!({ "line": pos.line, "column": pos.column })
            }),
        })
    }
}
