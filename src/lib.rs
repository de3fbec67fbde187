//! Bytecode back end for a small dynamically typed scripting language.
//!
//! - [`opcode`]: the fixed instruction set
//! - [`value`] and [`table`]: the runtime value model
//! - [`assembler`] and [`bytecode`]: building programs and the ZB container
//! - [`listing`]: textual assembly listings
//! - [`vm`]: the stack machine, plus disassembly and tracing
//! - [`diagnostic`]: error codes and rendering

pub mod assembler;
pub mod bytecode;
pub mod diagnostic;
pub mod listing;
pub mod opcode;
pub mod table;
pub mod value;
pub mod vm;

pub use assembler::{AsmError, Assembler, Label};
pub use bytecode::{FormatError, Program};
pub use value::Value;
pub use vm::{Vm, VmConfig, VmError};
