//! Carving source files into input nodes.
//!
//! The carving decides how coarse the dependency tracking is. With
//! [`Granularity::File`] each file is one input and any edit invalidates
//! everything derived from it. With [`Granularity::Item`] each definition
//! is its own input keyed by its name, so an edit only invalidates what
//! reads that definition, and moving it between lines or files is free.

use std::collections::BTreeMap;

use kiln_cache::{Descriptor, InputSet};
use kiln_config::Granularity;

use crate::error::CalcError;
use crate::lexer::{is_identifier, strip_comment};

/// Input query for whole source files.
pub const FILE_INPUT: &str = "file";

/// Input query for single definitions.
pub const ITEM_INPUT: &str = "item";

/// Input query for the list of parse units.
pub const UNITS_INPUT: &str = "units";

/// The input listing every parse unit, one rendered descriptor per line.
///
/// Steps that range over all units read this instead of capturing the
/// list, so adding or removing a unit invalidates them.
pub fn units_input() -> Descriptor {
    Descriptor::input(UNITS_INPUT, "all")
}

/// A source file handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    /// File contents.
    pub text: String,
}

impl SourceFile {
    /// Creates a source file.
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Inputs carved from a set of source files.
#[derive(Debug, Default)]
pub struct Carved {
    /// The session inputs: every unit plus [`units_input`].
    pub inputs: InputSet,
    /// Input descriptors, in key order. Each one becomes a parse unit.
    pub units: Vec<Descriptor>,
}

/// Carves `sources` into inputs according to `granularity`.
///
/// In item mode every non-blank line must start with `name =`, and names
/// must be unique across all files. In file mode lines are not inspected
/// here; that is left to the parse phase.
pub fn carve(sources: &[SourceFile], granularity: Granularity) -> Result<Carved, CalcError> {
    let mut units = BTreeMap::new();
    match granularity {
        Granularity::File => {
            for source in sources {
                units.insert(
                    Descriptor::input(FILE_INPUT, source.path.clone()),
                    source.text.clone(),
                );
            }
        }
        Granularity::Item => {
            let mut seen: BTreeMap<String, String> = BTreeMap::new();
            for source in sources {
                for (idx, raw) in source.text.lines().enumerate() {
                    let line = strip_comment(raw).trim();
                    if line.is_empty() {
                        continue;
                    }
                    let location = format!("{}:{}", source.path, idx + 1);
                    let name = match line.split_once('=') {
                        Some((name, _)) if is_identifier(name.trim()) => name.trim().to_string(),
                        _ => {
                            return Err(CalcError::Carve {
                                unit: source.path.clone(),
                                line: idx + 1,
                                message: "expected `name = expr`".to_string(),
                            })
                        }
                    };
                    if let Some(first) = seen.get(&name) {
                        return Err(CalcError::DuplicateDefinition {
                            name,
                            first: first.clone(),
                            second: location,
                        });
                    }
                    units.insert(Descriptor::input(ITEM_INPUT, name.clone()), line.to_string());
                    seen.insert(name, location);
                }
            }
        }
    }

    let mut carved = Carved::default();
    let mut listing = String::new();
    for (descriptor, text) in units {
        listing.push_str(&descriptor.to_string());
        listing.push('\n');
        carved.inputs.insert(descriptor.clone(), text)?;
        carved.units.push(descriptor);
    }
    carved.inputs.insert(units_input(), listing)?;
    Ok(carved)
}
