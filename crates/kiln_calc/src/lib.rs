//! A toy arithmetic language compiled through the Kiln incremental cache.
//!
//! `.calc` sources hold one `name = expr` definition per line. Building them
//! runs parse, analyze, codegen and link phases as cached steps, so a
//! rebuild after an edit recomputes only what the edit can affect. The
//! language is deliberately trivial; it exists to exercise the cache.

#![warn(missing_docs)]

pub mod ast;
pub mod carve;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod pipeline;

pub use ast::{BinOp, Definition, Expr, Parsed, SyntaxError};
pub use carve::{carve, Carved, SourceFile};
pub use error::CalcError;
pub use pipeline::{compile, Compilation};
