//! JavaScript parser using SWC
//!
//! Page scripts are classic scripts, not modules, so they are parsed in script
//! goal (sloppy mode is allowed).

use anyhow::Result;
use swc_common::{sync::Lrc, FileName, SourceFile, SourceMap};
use swc_ecma_ast::{EsVersion, Script};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};

/// Parse a page script into an AST
///
/// The source is registered in `source_map` under `filename` so that spans can
/// later be mapped back to line/column locations.
pub fn parse_script(
    src: &str,
    source_map: &Lrc<SourceMap>,
    filename: &str,
) -> Result<(Script, Lrc<SourceFile>)> {
    let source_file: Lrc<SourceFile> = source_map.new_source_file(
        FileName::Custom(filename.into()).into(),
        src.to_string(),
    );

    let lexer = Lexer::new(
        Syntax::Es(EsSyntax {
            jsx: false,
            decorators: false,
            ..Default::default()
        }),
        EsVersion::Es2022,
        StringInput::from(&*source_file),
        None,
    );

    let mut parser = Parser::new_from(lexer);

    let script = parser.parse_script().map_err(|e| {
        let error_msg = e.kind().msg();
        anyhow::anyhow!("Parse error: {}", error_msg)
            .context(format!("Failed to parse script: {}", filename))
    })?;

    Ok((script, source_file))
}

#[cfg(test)]
#[path = "parser/tests.rs"]
mod tests;
