//! Front end for candidate programs.
//!
//! `rustpython-parser` reads the source. [`lower`] then turns its tree into
//! the located subset in [`ast`] that the validator and interpreter walk,
//! rejecting constructs the dialect does not have and bounding the nesting
//! depth at [`MAX_NESTING`].

pub mod ast;
mod lower;

pub use ast::Location;

use ast::Program;
use rustpython_parser::{ast as py, Parse};
use thiserror::Error;

/// Deepest statement or expression nesting a program may use
pub const MAX_NESTING: usize = 64;

const PARSE_THREAD: &str = "querysandbox-parse";
// The generated parser keeps its own stack, but dropping its tree recurses
// once per nesting level, so the thread gets room in proportion to the input.
const STACK_PER_SOURCE_BYTE: usize = 1024;
const MIN_PARSE_STACK: usize = 16 * 1024 * 1024;
const MAX_PARSE_STACK: usize = 512 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({loc})")]
pub struct SyntaxError {
    pub message: String,
    pub loc: Location,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, loc: Location) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

/// Parses `src` into a located [`Program`].
///
/// Runs on a short-lived thread of its own so arbitrarily deep input cannot
/// exhaust the caller's stack.
pub fn parse_program(src: &str) -> Result<Program, SyntaxError> {
    let stack = src
        .len()
        .saturating_mul(STACK_PER_SOURCE_BYTE)
        .clamp(MIN_PARSE_STACK, MAX_PARSE_STACK);
    let source = src.to_string();
    let handle = std::thread::Builder::new()
        .name(PARSE_THREAD.to_string())
        .stack_size(stack)
        .spawn(move || parse_here(&source))
        .map_err(|e| {
            SyntaxError::new(format!("parser unavailable: {}", e), Location::new(1, 1))
        })?;
    handle.join().unwrap_or_else(|_| {
        Err(SyntaxError::new(
            "program could not be parsed",
            Location::new(1, 1),
        ))
    })
}

fn parse_here(src: &str) -> Result<Program, SyntaxError> {
    let lines = LineIndex::new(src);
    let suite = py::Suite::parse(src, "<program>")
        .map_err(|err| SyntaxError::new(err.error.to_string(), lines.locate(err.offset)))?;
    lower::program(&suite, &lines)
}

/// Maps byte offsets to 1-based line and character columns
pub(crate) struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { source, starts }
    }

    pub(crate) fn locate(&self, offset: impl Into<usize>) -> Location {
        let offset = offset.into().min(self.source.len());
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line - 1];
        let column = self
            .source
            .get(start..offset)
            .map_or(offset - start, |text| text.chars().count());
        Location::new(line, column + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_map_to_lines_and_columns() {
        let src = "x = 1\ny = 'é' + z\n";
        let lines = LineIndex::new(src);
        assert_eq!(lines.locate(0usize), Location::new(1, 1));
        assert_eq!(lines.locate(6usize), Location::new(2, 1));
        let z = src.find('z').unwrap();
        assert_eq!(lines.locate(z), Location::new(2, 11));
        assert_eq!(lines.locate(src.len()), Location::new(3, 1));
    }

    #[test]
    fn test_parse_errors_are_located() {
        let err = parse_program("x = 1\ny = = 2\n").unwrap_err();
        assert_eq!(err.loc.line, 2);
        assert!(!err.message.is_empty());
    }
}
