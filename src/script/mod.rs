//! Script dialect executed by the harness: a small indentation-based,
//! Python-flavoured language with no ambient builtins besides `print`.

mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use error::{ErrorKind, Resource, ScriptError};
pub use interpreter::{Completion, Host, Interpreter, PRINT};
pub use parser::{parse, Program};
pub use value::{CallArgs, Value};
