//! Tests for the script parser

#[cfg(test)]
mod parser_tests {
    use crate::parser;
    use swc_common::{sync::Lrc, SourceMap};

    fn parse_test(src: &str) -> Result<swc_ecma_ast::Script, anyhow::Error> {
        let cm: Lrc<SourceMap> = Default::default();
        parser::parse_script(src, &cm, "test.js").map(|(script, _)| script)
    }

    #[test]
    fn test_parse_function_declaration() {
        let script = parse_test("function foo(a, b) { return a + b; }").unwrap();
        assert_eq!(script.body.len(), 1);
    }

    #[test]
    fn test_parse_sloppy_mode_with_statement() {
        // `with` is a syntax error in modules but legal in classic scripts
        let result = parse_test("with (obj) { run(); }");
        assert!(result.is_ok(), "classic scripts allow with statements");
    }

    #[test]
    fn test_parse_object_literal_methods() {
        let src = "var app = { init: function () {}, run() {} };";
        assert!(parse_test(src).is_ok());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = parse_test("function foo( { return 1; }");
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("test.js"));
    }

    #[test]
    fn test_parse_rejects_jsx() {
        assert!(parse_test("var el = <div>hello</div>;").is_err());
    }
}
