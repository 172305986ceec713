//! The four-phase `.calc` build: parse, analyze, codegen, link.
//!
//! Every phase is a set of cached steps:
//!
//! | phase   | node                    | reads                                   |
//! |---------|-------------------------|-----------------------------------------|
//! | parse   | `parse(<unit>)`         | the unit's input                        |
//! | analyze | `symbols(all)`          | the unit list, every `parse` node (file mode only) |
//! | analyze | `value(<name>)`         | its definition, plus each referenced `value` |
//! | codegen | `emit(<name>)`          | `value(<name>)`                         |
//! | link    | `link(program)`         | the unit list, every `parse` and `emit` node |
//!
//! The unit list is the `units:all` input written by [`carve`], so adding
//! or removing a unit invalidates the steps that range over all of them.
//!
//! Name resolution is itself tracked. In item mode a reference to `y`
//! probes the input `item:y`, so a definition appearing or disappearing
//! invalidates its readers. In file mode it goes through `symbols`, which
//! depends on every file.

use std::collections::{BTreeMap, BTreeSet};

use kiln_cache::{
    Descriptor, QueryContext, Session, SessionError, SessionOptions, SessionReport, Step,
    StepError,
};
use kiln_common::InternalError;
use kiln_config::Granularity;

use crate::ast::{Definition, Parsed};
use crate::carve::{carve, units_input, SourceFile, FILE_INPUT, ITEM_INPUT};
use crate::error::CalcError;
use crate::eval::{evaluate, EvalError, Evaluated};
use crate::parser::parse_unit;

/// Name to defining file, built in file mode.
type Symbols = BTreeMap<String, String>;

/// The outcome of a build.
#[derive(Debug)]
pub struct Compilation {
    /// The linked program: one `name = value` line per definition, by name.
    pub program: String,
    /// Syntax errors, one line each. Definitions in a unit with a syntax
    /// error are missing from the program.
    pub syntax_errors: Vec<String>,
    /// What the cache did.
    pub report: SessionReport,
}

/// Builds `sources` through an incremental session configured by `options`.
pub fn compile(
    sources: &[SourceFile],
    granularity: Granularity,
    options: SessionOptions,
) -> Result<Compilation, CalcError> {
    let carved = carve(sources, granularity)?;
    tracing::debug!(
        "carved {} source file(s) into {} unit(s) at {granularity} granularity",
        sources.len(),
        carved.units.len()
    );
    let mut session = Session::start(options, carved.inputs)?;

    session.run_phase("parse", carved.units.iter().map(parse_step).collect())?;

    let mut names = BTreeSet::new();
    let mut syntax_errors = Vec::new();
    for unit in &carved.units {
        let parsed: Parsed = session
            .value_as(&parse_node(unit))?
            .ok_or_else(|| missing(&parse_node(unit)))?;
        if let Err(e) = &parsed {
            syntax_errors.push(match granularity {
                Granularity::Item => format!("definition `{}`: {}", unit.key(), e.message),
                Granularity::File => format!("{}:{}: {}", unit.key(), e.line, e.message),
            });
        }
        names.extend(defined_names(unit, parsed, granularity));
    }

    let mut analyze = Vec::with_capacity(names.len() + 1);
    if granularity == Granularity::File {
        analyze.push(symbols_step());
    }
    analyze.extend(names.iter().map(|name| value_step(name, granularity)));
    session.run_phase("analyze", analyze)?;

    session.run_phase("codegen", names.iter().map(|name| emit_step(name)).collect())?;

    session.run_phase("link", vec![link_step(granularity)])?;

    let program: String = session
        .value_as(&link_node())?
        .ok_or_else(|| missing(&link_node()))?;
    let report = session.finish()?;
    Ok(Compilation {
        program,
        syntax_errors,
        report,
    })
}

/// Names `unit` contributes to the program. In item mode a unit that does
/// not parse still names its definition, so the error gets emitted.
fn defined_names(unit: &Descriptor, parsed: Parsed, granularity: Granularity) -> Vec<String> {
    match parsed {
        Ok(definitions) => definitions.into_iter().map(|d| d.name).collect(),
        Err(_) if granularity == Granularity::Item => vec![unit.key().to_string()],
        Err(_) => Vec::new(),
    }
}

fn read_units(cx: &mut QueryContext<'_>) -> Result<Vec<Descriptor>, StepError> {
    cx.read_text(&units_input())?
        .lines()
        .map(|line| {
            Descriptor::parse(line)
                .ok_or_else(|| StepError::failed(format!("malformed unit `{line}`")))
        })
        .collect()
}

fn missing(node: &Descriptor) -> SessionError {
    InternalError::new(format!("`{node}` was not produced")).into()
}

fn parse_node(unit: &Descriptor) -> Descriptor {
    Descriptor::derived("parse", format!("{}:{}", unit.query(), unit.key()))
}

fn symbols_node() -> Descriptor {
    Descriptor::derived("symbols", "all")
}

fn value_node(name: &str) -> Descriptor {
    Descriptor::derived("value", name)
}

fn emit_node(name: &str) -> Descriptor {
    Descriptor::derived("emit", name)
}

fn link_node() -> Descriptor {
    Descriptor::derived("link", "program")
}

fn parse_step(unit: &Descriptor) -> Step {
    let input = unit.clone();
    Step::new(parse_node(unit), move |cx| -> Result<Parsed, StepError> {
        Ok(parse_unit(cx.read_text(&input)?))
    })
}

fn symbols_step() -> Step {
    Step::new(symbols_node(), |cx| -> Result<Symbols, StepError> {
        let mut symbols = Symbols::new();
        for unit in read_units(cx)? {
            let Ok(definitions) = cx.read::<Parsed>(&parse_node(&unit))? else {
                continue;
            };
            for definition in definitions {
                if let Some(first) = symbols.insert(definition.name.clone(), unit.key().to_string())
                {
                    return Err(StepError::failed(format!(
                        "`{}` is defined more than once ({first} and {})",
                        definition.name,
                        unit.key()
                    )));
                }
            }
        }
        Ok(symbols)
    })
}

/// Where names are looked up while computing a value.
enum Scope {
    /// One input per definition; existence is an input probe.
    Items,
    /// One input per file; existence is a symbol table lookup.
    Files(Symbols),
}

impl Scope {
    fn defines(&self, cx: &mut QueryContext<'_>, name: &str) -> Result<bool, StepError> {
        match self {
            Scope::Items => cx.probe_input(&Descriptor::input(ITEM_INPUT, name)),
            Scope::Files(symbols) => Ok(symbols.contains_key(name)),
        }
    }

    fn definition(
        &self,
        cx: &mut QueryContext<'_>,
        name: &str,
    ) -> Result<Option<Definition>, StepError> {
        let unit = match self {
            Scope::Items => Descriptor::input(ITEM_INPUT, name),
            Scope::Files(symbols) => match symbols.get(name) {
                Some(file) => Descriptor::input(FILE_INPUT, file.as_str()),
                None => return Ok(None),
            },
        };
        let parsed = cx.read::<Parsed>(&parse_node(&unit))?;
        Ok(parsed
            .ok()
            .and_then(|definitions| definitions.into_iter().find(|d| d.name == name)))
    }
}

fn value_step(name: &str, granularity: Granularity) -> Step {
    let name = name.to_string();
    Step::new(value_node(&name), move |cx| compute_value(cx, &name, granularity))
}

fn compute_value(
    cx: &mut QueryContext<'_>,
    name: &str,
    granularity: Granularity,
) -> Result<Evaluated, StepError> {
    let scope = match granularity {
        Granularity::Item => Scope::Items,
        Granularity::File => Scope::Files(cx.read(&symbols_node())?),
    };
    let Some(definition) = scope.definition(cx, name)? else {
        return Ok(Err(format!("`{name}` has no valid definition")));
    };

    let mut lookup = |other: &str| -> Result<i64, EvalError> {
        if !scope.defines(cx, other)? {
            return Err(EvalError::Value(format!("unknown name `{other}`")));
        }
        cx.read::<Evaluated>(&value_node(other))?
            .map_err(|_| EvalError::Value(format!("`{other}` has no value")))
    };
    match evaluate(&definition.expr, &mut lookup) {
        Ok(value) => Ok(Ok(value)),
        Err(EvalError::Value(message)) => Ok(Err(message)),
        Err(EvalError::Step(e)) => Err(e),
    }
}

fn emit_step(name: &str) -> Step {
    let name = name.to_string();
    Step::new(emit_node(&name), move |cx| -> Result<String, StepError> {
        Ok(match cx.read::<Evaluated>(&value_node(&name))? {
            Ok(value) => format!("{name} = {value}"),
            Err(message) => format!("{name} = error: {message}"),
        })
    })
}

fn link_step(granularity: Granularity) -> Step {
    Step::new(link_node(), move |cx| -> Result<String, StepError> {
        let mut names = BTreeSet::new();
        for unit in read_units(cx)? {
            let parsed = cx.read::<Parsed>(&parse_node(&unit))?;
            names.extend(defined_names(&unit, parsed, granularity));
        }
        let mut program = String::new();
        for name in &names {
            program.push_str(&cx.read::<String>(&emit_node(name))?);
            program.push('\n');
        }
        Ok(program)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(dir: &std::path::Path, sources: &[SourceFile], granularity: Granularity) -> Compilation {
        let options = SessionOptions::new(dir).tool_version("test").jobs(2);
        compile(sources, granularity, options).unwrap()
    }

    #[test]
    fn evaluates_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            SourceFile::new("a.calc", "a = 1\nb = 2\nc = 3\n"),
            SourceFile::new("v.calc", "v1 = b * c\nv2 = a + v1\n"),
        ];
        for granularity in [Granularity::File, Granularity::Item] {
            let out = build(dir.path(), &sources, granularity);
            assert_eq!(out.program, "a = 1\nb = 2\nc = 3\nv1 = 6\nv2 = 7\n");
            assert!(out.syntax_errors.is_empty());
        }
    }

    #[test]
    fn value_errors_are_reported_inline() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![SourceFile::new(
            "a.calc",
            "zero = 0\nbad = 1 / zero\nuses_bad = bad + 1\nghost = nowhere\n",
        )];
        let out = build(dir.path(), &sources, Granularity::Item);
        assert_eq!(
            out.program,
            "bad = error: division by zero in 1 / 0\n\
             ghost = error: unknown name `nowhere`\n\
             uses_bad = error: `bad` has no value\n\
             zero = 0\n"
        );
    }

    #[test]
    fn syntax_errors_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            SourceFile::new("ok.calc", "a = 1\n"),
            SourceFile::new("broken.calc", "b = (a\n"),
        ];
        let out = build(dir.path(), &sources, Granularity::File);
        assert_eq!(out.program, "a = 1\n");
        assert_eq!(out.syntax_errors, vec!["broken.calc:1: expected `)`"]);

        let out = build(dir.path(), &sources, Granularity::Item);
        assert_eq!(out.program, "a = 1\nb = error: `b` has no valid definition\n");
        assert_eq!(out.syntax_errors, vec!["definition `b`: expected `)`"]);
    }

    #[test]
    fn cyclic_definitions_abort() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![SourceFile::new("a.calc", "x = y + 1\ny = x\n")];
        let options = SessionOptions::new(dir.path()).tool_version("test");
        let err = compile(&sources, Granularity::Item, options).unwrap_err();
        assert!(matches!(
            err,
            CalcError::Session(SessionError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn duplicate_in_file_mode_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            SourceFile::new("a.calc", "x = 1\n"),
            SourceFile::new("b.calc", "x = 2\n"),
        ];
        let options = SessionOptions::new(dir.path()).tool_version("test");
        let err = compile(&sources, Granularity::File, options).unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn empty_project_links_empty_program() {
        let dir = tempfile::tempdir().unwrap();
        let out = build(dir.path(), &[], Granularity::Item);
        assert_eq!(out.program, "");
    }
}
