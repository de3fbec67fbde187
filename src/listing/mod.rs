//! Textual assembly listings.
//!
//! One instruction per line, in the same shape the disassembler prints:
//!
//! ```text
//! ; comment
//! loop:
//!     PNUM 2.5
//!     PSTR "text"
//!     JMPF loop
//! ```
//!
//! Mnemonics are case-insensitive. `U64` operands take a label name or an
//! integer; `F64` operands also accept `inf`, `-inf` and `nan`.

use std::collections::HashMap;

use logos::Logos;

use crate::assembler::{AsmError, Assembler, Immediate, Label};
use crate::bytecode::Program;
use crate::opcode::{Opcode, Operand};

pub mod source_map;
pub use source_map::{SourceMap, Span};

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip(r";[^\n]*", allow_greedy = true))]
pub enum Token {
    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*:", |lex| {
        let s = lex.slice();
        s[..s.len() - 1].to_string()
    })]
    LabelDef(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Kept as text so integer operands are not routed through f64
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    Number(String),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Text(String),

    #[token("-")]
    Minus,

    #[token("\n")]
    Newline,
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }
    Some(out)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListingError {
    #[error("line {line}: unexpected input '{snippet}'")]
    Lex { span: Span, line: usize, snippet: String },
    #[error("line {line}: {message}")]
    Syntax { span: Span, line: usize, message: String },
    #[error("line {line}: label '{name}' is defined twice")]
    DuplicateLabel { span: Span, line: usize, name: String, first: Span },
    #[error("line {line}: {source}")]
    Asm { span: Span, line: usize, source: AsmError },
}

impl ListingError {
    pub fn span(&self) -> Span {
        match self {
            ListingError::Lex { span, .. }
            | ListingError::Syntax { span, .. }
            | ListingError::DuplicateLabel { span, .. }
            | ListingError::Asm { span, .. } => *span,
        }
    }
}

type Spanned = (Token, Span);

/// Lexes a listing into tokens with their byte spans.
pub fn lex(source: &str) -> Result<Vec<Spanned>, ListingError> {
    let map = SourceMap::new(source);
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = Span::from(lexer.span());
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(ListingError::Lex {
                    span,
                    line: map.lookup(span.start).0,
                    snippet: source[span.start..span.end].to_string(),
                });
            }
        }
    }
    Ok(tokens)
}

/// Assembles a listing into a finished program.
pub fn assemble(source: &str) -> Result<Program, ListingError> {
    let tokens = lex(source)?;
    let mut reader = Reader::new(source);
    for line in tokens.split(|(t, _)| *t == Token::Newline) {
        reader.line(line)?;
    }
    reader.finish()
}

struct LabelInfo {
    label: Label,
    defined_at: Option<Span>,
    first_use: Span,
}

struct Reader {
    map: SourceMap,
    asm: Assembler,
    labels: HashMap<String, LabelInfo>,
}

impl Reader {
    fn new(source: &str) -> Self {
        Reader { map: SourceMap::new(source), asm: Assembler::new(), labels: HashMap::new() }
    }

    fn syntax(&self, span: Span, message: impl Into<String>) -> ListingError {
        ListingError::Syntax { span, line: self.map.lookup(span.start).0, message: message.into() }
    }

    fn asm_error(&self, span: Span, source: AsmError) -> ListingError {
        ListingError::Asm { span, line: self.map.lookup(span.start).0, source }
    }

    fn label(&mut self, name: &str, span: Span) -> Label {
        if let Some(info) = self.labels.get(name) {
            return info.label;
        }
        let label = self.asm.create_named_label(name);
        let info = LabelInfo { label, defined_at: None, first_use: span };
        self.labels.insert(name.to_string(), info);
        label
    }

    fn line(&mut self, mut tokens: &[Spanned]) -> Result<(), ListingError> {
        while let Some(((Token::LabelDef(name), span), rest)) = tokens.split_first() {
            let label = self.label(name, *span);
            let earlier = self
                .labels
                .get_mut(name.as_str())
                .and_then(|info| info.defined_at.replace(*span));
            if let Some(first) = earlier {
                return Err(ListingError::DuplicateLabel {
                    span: *span,
                    line: self.map.lookup(span.start).0,
                    name: name.clone(),
                    first,
                });
            }
            self.asm.set_label(label).map_err(|e| self.asm_error(*span, e))?;
            tokens = rest;
        }

        let Some(((first, span), rest)) = tokens.split_first() else {
            return Ok(());
        };
        let Token::Ident(mnemonic) = first else {
            return Err(self.syntax(*span, "expected a mnemonic"));
        };
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| self.syntax(*span, format!("unknown mnemonic '{mnemonic}'")))?;

        let used = self.operand(opcode, *span, rest)?;
        if let Some((_, extra)) = rest.get(used) {
            return Err(self.syntax(*extra, format!("unexpected operand after {opcode}")));
        }
        Ok(())
    }

    /// Emits `opcode` with its operand; returns how many tokens were consumed.
    fn operand(
        &mut self,
        opcode: Opcode,
        at: Span,
        rest: &[Spanned],
    ) -> Result<usize, ListingError> {
        let shape = opcode.operand();
        if shape == Operand::None {
            self.asm.add(opcode).map_err(|e| self.asm_error(at, e))?;
            return Ok(0);
        }
        let Some((token, span)) = rest.first() else {
            return Err(self.syntax(at, format!("{opcode} expects a {shape} operand")));
        };
        let span = *span;
        let mut used = 1;
        let imm: Immediate = match (shape, token) {
            (Operand::U8, Token::Number(n)) => self.integer::<u8>(n, span)?.into(),
            (Operand::U16, Token::Number(n)) => self.integer::<u16>(n, span)?.into(),
            (Operand::U32, Token::Number(n)) => self.integer::<u32>(n, span)?.into(),
            (Operand::U64, Token::Number(n)) => self.integer::<u64>(n, span)?.into(),
            (Operand::U64, Token::Ident(name)) => {
                let label = self.label(name, span);
                self.asm.add_jump(opcode, label).map_err(|e| self.asm_error(at, e))?;
                return Ok(1);
            }
            (Operand::F64, Token::Number(n)) => {
                let v: f64 =
                    n.parse().map_err(|_| self.syntax(span, format!("invalid number '{n}'")))?;
                v.into()
            }
            (Operand::F64, Token::Ident(word)) => self.special_float(word, span)?.into(),
            (Operand::F64, Token::Minus) => {
                let Some((Token::Ident(word), word_span)) = rest.get(1) else {
                    return Err(self.syntax(span, "expected a number after '-'"));
                };
                used = 2;
                (-self.special_float(word, *word_span)?).into()
            }
            (Operand::Str, Token::Text(s)) => s.as_str().into(),
            _ => return Err(self.syntax(span, format!("{opcode} expects a {shape} operand"))),
        };
        self.asm.add_with(opcode, imm).map_err(|e| self.asm_error(at, e))?;
        Ok(used)
    }

    fn integer<T: std::str::FromStr>(&self, text: &str, span: Span) -> Result<T, ListingError> {
        text.parse::<T>().map_err(|_| {
            self.syntax(span, format!("'{text}' is not a valid {}", std::any::type_name::<T>()))
        })
    }

    fn special_float(&self, word: &str, span: Span) -> Result<f64, ListingError> {
        match word {
            "inf" => Ok(f64::INFINITY),
            "nan" | "NaN" => Ok(f64::NAN),
            _ => Err(self.syntax(span, format!("expected a number, got '{word}'"))),
        }
    }

    fn finish(self) -> Result<Program, ListingError> {
        let Reader { map, asm, labels } = self;
        asm.finalize().map_err(|source| {
            let span = match &source {
                AsmError::UnresolvedLabel { label, .. } => labels
                    .values()
                    .find(|info| info.label.index() == *label)
                    .map(|info| info.first_use)
                    .unwrap_or_default(),
                _ => Span::default(),
            };
            ListingError::Asm { span, line: map.lookup(span.start).0, source }
        })
    }
}
