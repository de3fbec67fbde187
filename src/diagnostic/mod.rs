pub mod ansi;
pub mod json;
pub mod registry;

use crate::assembler::AsmError;
use crate::bytecode::{DecodeError, FormatError};
use crate::listing::{ListingError, Span};
use crate::vm::VmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable registry code, e.g. `ZOE-R005`.
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    /// Listing text the spans point into.
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, ..Diagnostic::error(message) }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Internal diagnostics point at a corrupt program or a producer bug.
    pub fn is_internal(&self) -> bool {
        self.code.is_some_and(|c| c.starts_with("ZOE-I"))
    }
}

// ---- From impls for the error types ----

impl From<&FormatError> for Diagnostic {
    fn from(e: &FormatError) -> Self {
        let code = match e {
            FormatError::TruncatedHeader { .. } => "ZOE-F001",
            FormatError::BadMagic => "ZOE-F002",
            FormatError::BadPoolOffset { .. } => "ZOE-F003",
            FormatError::UnterminatedString { .. }
            | FormatError::InvalidUtf8 { .. }
            | FormatError::TruncatedHash { .. } => "ZOE-F004",
            FormatError::HashMismatch { .. } => "ZOE-F005",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            FormatError::BadMagic => d.with_suggestion("assemble listings first with `zoe asm`"),
            _ => d,
        }
    }
}

impl From<&AsmError> for Diagnostic {
    fn from(e: &AsmError) -> Self {
        let code = match e {
            AsmError::InvalidOperand { .. } => "ZOE-A001",
            AsmError::DuplicateName { .. } => "ZOE-A002",
            AsmError::UnknownName { .. } => "ZOE-A003",
            AsmError::PoolOverflow => "ZOE-A004",
            AsmError::UnresolvedLabel { .. } => "ZOE-A005",
            AsmError::UnknownLabel { .. } => "ZOE-I002",
            AsmError::ScopeUnderflow => "ZOE-I003",
        };
        Diagnostic::error(e.to_string()).with_code(code)
    }
}

impl From<&ListingError> for Diagnostic {
    fn from(e: &ListingError) -> Self {
        match e {
            ListingError::Lex { span, snippet, .. } => {
                Diagnostic::error(format!("unexpected input '{snippet}'"))
                    .with_code("ZOE-L001")
                    .with_span(*span, "here")
            }
            ListingError::Syntax { span, message, .. } => {
                Diagnostic::error(message.clone()).with_code("ZOE-L002").with_span(*span, "here")
            }
            ListingError::DuplicateLabel { span, name, first, .. } => {
                Diagnostic::error(format!("label '{name}' is defined twice"))
                    .with_code("ZOE-L002")
                    .with_span(*span, "defined again here")
                    .with_secondary_span(*first, "first defined here")
            }
            // A dangling label in a listing is a typo, not an assembler bug
            ListingError::Asm {
                span,
                source: AsmError::UnresolvedLabel { name: Some(name), .. },
                ..
            } => {
                Diagnostic::error(format!("label '{name}' is never defined"))
                    .with_code("ZOE-L003")
                    .with_span(*span, "first used here")
                    .with_suggestion(format!("add a line `{name}:` where the jump should land"))
            }
            ListingError::Asm { span, source, .. } => {
                Diagnostic::from(source).with_span(*span, "here")
            }
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let code = match e {
            VmError::Format(f) => return Diagnostic::from(f),
            VmError::Decode(DecodeError::UnknownOpcode { .. }) => "ZOE-I004",
            VmError::Decode(_) => "ZOE-I005",
            VmError::VariableOutOfRange { .. } => "ZOE-I006",
            VmError::InvalidJump { .. } => "ZOE-I007",
            VmError::InvalidStringIndex { .. } => "ZOE-I008",
            VmError::ScopeUnderflow { .. } => "ZOE-I003",
            VmError::StackUnderflow { .. } => "ZOE-R001",
            VmError::StackOverflow { .. } => "ZOE-R002",
            VmError::Type { .. } => "ZOE-R003",
            VmError::Value { .. } => "ZOE-R004",
            VmError::ArityMismatch { .. } => "ZOE-R005",
            VmError::InvalidFlags { .. } => "ZOE-R006",
            VmError::StepLimitExceeded { .. } => "ZOE-R007",
            VmError::Trace(_) => "ZOE-R008",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            VmError::StepLimitExceeded { .. } => {
                d.with_suggestion("raise --max-steps or check for a loop that never exits")
            }
            _ => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueError;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "something went wrong");
        assert!(d.code.is_none());
        assert!(d.labels.is_empty());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
        assert_eq!(Diagnostic::warning("w").severity, Severity::Warning);
    }

    #[test]
    fn diagnostic_with_span() {
        let d = Diagnostic::error("bad token").with_span(Span { start: 5, end: 8 }, "here");
        assert_eq!(d.labels.len(), 1);
        assert_eq!(d.labels[0].span, Span { start: 5, end: 8 });
        assert!(d.labels[0].is_primary);
    }

    #[test]
    fn diagnostic_with_note_and_suggestion() {
        let d = Diagnostic::error("type mismatch")
            .with_note("at 0004  ADD")
            .with_suggestion("push two numbers");
        assert_eq!(d.notes, vec!["at 0004  ADD"]);
        assert_eq!(d.suggestion.as_deref(), Some("push two numbers"));
    }

    #[test]
    fn from_format_error() {
        let d = Diagnostic::from(&FormatError::BadMagic);
        assert_eq!(d.code, Some("ZOE-F002"));
        assert!(d.suggestion.is_some());
        assert!(!d.is_internal());
    }

    #[test]
    fn from_listing_errors() {
        let e = crate::listing::assemble("PNIL\nJMP away").unwrap_err();
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("ZOE-L003"));
        assert!(d.message.contains("away"));
        assert_eq!(d.labels[0].span, Span { start: 9, end: 13 });

        let e = crate::listing::assemble("PINT x").unwrap_err();
        assert_eq!(Diagnostic::from(&e).code, Some("ZOE-L002"));

        let e = crate::listing::assemble("top:\nPNIL\ntop: POP").unwrap_err();
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("ZOE-L002"));
        assert_eq!(d.labels.len(), 2);
        assert_eq!(d.labels[0].span, Span { start: 10, end: 14 });
        assert!(!d.labels[1].is_primary);
        assert_eq!(d.labels[1].span, Span { start: 0, end: 4 });

        let e = crate::listing::assemble("PNIL $").unwrap_err();
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("ZOE-L001"));
        assert_eq!(d.labels[0].span.start, 5);
    }

    #[test]
    fn from_asm_error_marks_internal() {
        let d = Diagnostic::from(&AsmError::UnknownLabel { label: 3 });
        assert!(d.is_internal());
        let d = Diagnostic::from(&AsmError::UnresolvedLabel { label: 0, name: None });
        assert_eq!(d.code, Some("ZOE-A005"));
        assert!(!d.is_internal());
        let d = Diagnostic::from(&AsmError::DuplicateName { name: "x".to_string() });
        assert_eq!(d.code, Some("ZOE-A002"));
        assert!(d.message.contains('x'));
    }

    #[test]
    fn from_vm_error() {
        let e = VmError::ArityMismatch { offset: 4, expected: 2, found: 3 };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("ZOE-R005"));
        assert!(d.labels.is_empty()); // no span for runtime errors

        let source = ValueError::KeyNotFound { key: "k".to_string() };
        let e = VmError::Value { offset: 0, source };
        assert!(Diagnostic::from(&e).message.contains("k"));

        let d = Diagnostic::from(&VmError::ScopeUnderflow { offset: 0 });
        assert!(d.is_internal());

        let d = Diagnostic::from(&VmError::Format(FormatError::BadMagic));
        assert_eq!(d.code, Some("ZOE-F002"));
    }

    #[test]
    fn every_code_is_registered() {
        let errors = [
            Diagnostic::from(&FormatError::TruncatedHeader { len: 0 }),
            Diagnostic::from(&AsmError::PoolOverflow),
            Diagnostic::from(&AsmError::UnresolvedLabel { label: 0, name: None }),
            Diagnostic::from(&VmError::StepLimitExceeded { limit: 1 }),
            Diagnostic::from(&VmError::InvalidStringIndex { offset: 0, index: 9 }),
        ];
        for d in &errors {
            let code = d.code.unwrap();
            assert!(registry::lookup(code).is_some(), "{code} missing from registry");
        }
    }
}
