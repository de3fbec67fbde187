//! Human and machine readable views of a program's instruction stream.

use serde::Serialize;

use crate::bytecode::{Arg, DecodeError, Instr, Program};
use crate::opcode::Opcode;
use crate::value::format_number;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub offset: usize,
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    /// Raw immediate: integer, float or pool index, absent for `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<serde_json::Value>,
    /// Rendered line, as printed by [`render`].
    pub text: String,
}

fn operand_text(program: &Program, arg: Arg) -> Option<String> {
    Some(match arg {
        Arg::None => return None,
        Arg::U8(v) => v.to_string(),
        Arg::U16(v) => v.to_string(),
        Arg::U32(v) => v.to_string(),
        Arg::U64(v) => v.to_string(),
        Arg::F64(v) => format_number(v),
        Arg::Str(index) => match program.string(index) {
            Some(s) => format!("#{index} {:?}", s.text),
            None => format!("#{index} <missing>"),
        },
    })
}

fn operand_json(arg: Arg) -> Option<serde_json::Value> {
    match arg {
        Arg::None => None,
        Arg::F64(v) => Some(serde_json::Value::from(v)),
        other => other.as_u64().map(serde_json::Value::from),
    }
}

/// `OFFSET  MNEMONIC [OPERAND]`, offset as four or more hex digits.
pub fn format_instr(program: &Program, instr: &Instr) -> String {
    match operand_text(program, instr.arg) {
        Some(operand) => format!("{:04x}  {} {}", instr.offset, instr.opcode.mnemonic(), operand),
        None => format!("{:04x}  {}", instr.offset, instr.opcode.mnemonic()),
    }
}

/// Decodes every instruction, stopping at the first undecodable byte.
pub fn decode_all(program: &Program) -> Result<Vec<Line>, DecodeError> {
    program
        .instructions()
        .map(|instr| {
            let instr = instr?;
            Ok(Line {
                offset: instr.offset,
                opcode: instr.opcode,
                mnemonic: instr.opcode.mnemonic(),
                operand: operand_json(instr.arg),
                text: format_instr(program, &instr),
            })
        })
        .collect()
}

/// Full listing, one line per instruction.
pub fn render(program: &Program) -> Result<String, DecodeError> {
    let mut out = String::new();
    for line in decode_all(program)? {
        out.push_str(&line.text);
        out.push('\n');
    }
    Ok(out)
}
