//! Tests for declaration indexing

#[cfg(test)]
mod discover_tests {
    use crate::discover::{index_declarations, DiagnosticKind, DiscoverOptions, Discovery};
    use crate::parser::parse_script;
    use crate::tree::FunctionLeaf;
    use swc_common::{sync::Lrc, SourceMap};

    fn parse_and_index_with(src: &str, options: &DiscoverOptions) -> anyhow::Result<Discovery> {
        let cm: Lrc<SourceMap> = Default::default();
        let (script, _) = parse_script(src, &cm, "test.js")?;
        index_declarations(&script, "test.js", src, &cm, options)
    }

    fn parse_and_index(src: &str) -> Discovery {
        parse_and_index_with(src, &DiscoverOptions::default()).unwrap()
    }

    fn all_paths(root: &FunctionLeaf) -> Vec<String> {
        root.walk()
            .into_iter()
            .skip(1)
            .map(|l| l.path().to_string())
            .collect()
    }

    fn assert_containment(leaf: &FunctionLeaf) {
        for (i, child) in leaf.children.iter().enumerate() {
            assert!(
                leaf.range.contains(&child.range),
                "{} {:?} not inside {} {:?}",
                child.path(),
                child.range,
                leaf.path(),
                leaf.range
            );
            for sibling in &leaf.children[i + 1..] {
                assert!(
                    !child.range.overlaps(&sibling.range),
                    "{} overlaps {}",
                    child.path(),
                    sibling.path()
                );
            }
            assert_containment(child);
        }
    }

    #[test]
    fn test_script_root_spans_whole_file() {
        let src = "function a() {}\nfunction b() {}\n";
        let discovery = parse_and_index(src);
        assert_eq!(discovery.root.path(), "/test.js");
        assert_eq!(discovery.root.range.start, 0);
        assert_eq!(discovery.root.range.end, src.len());
    }

    #[test]
    fn test_function_declaration_range_and_args() {
        let src = "function f(a){return a;}";
        let discovery = parse_and_index(src);
        let f = &discovery.root.children[0];
        assert_eq!(f.path(), "/test.js/f");
        assert_eq!(f.args, vec!["a"]);
        assert_eq!(f.range.start, 0);
        assert_eq!(f.range.end, src.len());
    }

    #[test]
    fn test_nested_declarations_follow_lexical_nesting() {
        let src = r#"
function outer(x) {
    function middle(y) {
        function inner(z) { return z; }
        return inner(y);
    }
    return middle(x);
}
function sibling() {}
"#;
        let discovery = parse_and_index(src);
        assert_eq!(
            all_paths(&discovery.root),
            vec![
                "/test.js/outer",
                "/test.js/outer/middle",
                "/test.js/outer/middle/inner",
                "/test.js/sibling",
            ]
        );
        assert_containment(&discovery.root);
    }

    #[test]
    fn test_variable_function_expression() {
        let src = "var f = function (a, b) { return a; }, other = 2;";
        let discovery = parse_and_index(src);
        let f = &discovery.root.children[0];
        assert_eq!(f.path(), "/test.js/f");
        assert_eq!(f.args, vec!["a", "b"]);
        assert_eq!(&src[f.range.start..f.range.end], "function (a, b) { return a; }");
        // Instrumentation must land after the whole declaration, not inside it
        assert!(f.declaration_end.unwrap() >= src.len() - 1);
    }

    #[test]
    fn test_arrow_function_in_declarator() {
        let discovery = parse_and_index("const add = (a, b) => a + b;");
        let add = &discovery.root.children[0];
        assert_eq!(add.path(), "/test.js/add");
        assert_eq!(add.args, vec!["a", "b"]);
    }

    #[test]
    fn test_property_assignment_uses_member_chain() {
        let discovery = parse_and_index("app.util.run = function (input) { return input; };");
        let run = &discovery.root.children[0];
        assert_eq!(run.path(), "/test.js/app.util.run");
        assert_eq!(run.name(), "app.util.run");
    }

    #[test]
    fn test_chained_assignment_records_aliases() {
        let src = "jQuery.extend = jQuery.fn.extend = function () { return this; };";
        let discovery = parse_and_index(src);
        assert_eq!(discovery.root.children.len(), 1);
        let leaf = &discovery.root.children[0];
        assert_eq!(
            leaf.paths,
            vec!["/test.js/jQuery.extend", "/test.js/jQuery.fn.extend"]
        );
    }

    #[test]
    fn test_object_literal_in_declarator() {
        let src = r#"var app = {
    start: function (config) {},
    views: {
        render: function (node) {}
    },
    stop() {}
};"#;
        let discovery = parse_and_index(src);
        let paths = all_paths(&discovery.root);
        assert_eq!(
            paths,
            vec![
                "/test.js/app.start",
                "/test.js/app.views.render",
                "/test.js/app.stop",
            ]
        );

        let render = &discovery.root.children[1];
        let holder = render.from_object.as_ref().unwrap();
        assert_eq!(holder.name, "app.views");
        assert!(holder.end_index >= src.len() - 1);
        assert_eq!(render.args, vec!["node"]);
        assert_containment(&discovery.root);
    }

    #[test]
    fn test_object_literal_in_assignment() {
        let discovery = parse_and_index("window.api = { fetch: function (url) {} };");
        let fetch = &discovery.root.children[0];
        assert_eq!(fetch.path(), "/test.js/window.api.fetch");
        assert_eq!(fetch.from_object.as_ref().unwrap().name, "window.api");
    }

    #[test]
    fn test_extend_call_with_one_argument() {
        let discovery = parse_and_index("jQuery.fn.extend({ show: function (speed) {} });");
        let show = &discovery.root.children[0];
        assert_eq!(show.path(), "/test.js/jQuery.fn.show");
        assert_eq!(show.from_object.as_ref().unwrap().name, "jQuery.fn");
    }

    #[test]
    fn test_extend_call_with_two_arguments() {
        let discovery = parse_and_index("jQuery.extend(jQuery.fx, { tick: function () {} });");
        assert_eq!(discovery.root.children[0].path(), "/test.js/jQuery.fx.tick");
    }

    #[test]
    fn test_extend_call_with_three_arguments_aborts() {
        let src = "jQuery.extend(true, target, { deep: function () {} });";
        let result = parse_and_index_with(src, &DiscoverOptions::default());
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("extend call"));
    }

    #[test]
    fn test_extend_without_functions_is_ignored() {
        let discovery = parse_and_index("jQuery.extend(true, a, { answer: 42 });");
        assert!(discovery.root.children.is_empty());
        assert!(discovery.diagnostics.is_empty());
    }

    #[test]
    fn test_object_without_root_reports_diagnostic() {
        let discovery = parse_and_index("register({ handler: function (event) {} });");
        assert!(discovery.root.children.is_empty());
        assert_eq!(discovery.diagnostics.len(), 1);
        assert_eq!(
            discovery.diagnostics[0].kind,
            DiagnosticKind::UnresolvedObjectRoot
        );
        assert_eq!(discovery.diagnostics[0].line, 1);
    }

    #[test]
    fn test_computed_assignment_target_is_not_indexed() {
        let discovery = parse_and_index("handlers[name] = function () {};");
        assert!(discovery.root.children.is_empty());
        assert_eq!(
            discovery.diagnostics[0].kind,
            DiagnosticKind::UnsupportedAssignmentTarget
        );
    }

    #[test]
    fn test_anonymous_callbacks_skipped_by_default() {
        let discovery = parse_and_index("setTimeout(function () { tick(); }, 10);");
        assert!(discovery.root.children.is_empty());
    }

    #[test]
    fn test_anonymous_callbacks_indexed_when_enabled() {
        let src = "setTimeout(function (n) { tick(n); }, 10);\nlater();";
        let options = DiscoverOptions {
            index_anonymous_callbacks: true,
        };
        let discovery = parse_and_index_with(src, &options).unwrap();
        let callback = &discovery.root.children[0];
        assert_eq!(callback.path(), "/test.js/AnonymousFunction0");
        assert!(callback.is_anonymous());
        assert_eq!(callback.function_source, vec!["function (n) { tick(n); }"]);
        let marker = callback.anonymous_end.unwrap();
        assert!(src[..marker].ends_with("10);") || src[..marker].ends_with("10)"));
    }

    #[test]
    fn test_iife_body_attaches_to_enclosing_leaf() {
        let src = "(function () { function hidden() {} })();";
        let discovery = parse_and_index(src);
        assert_eq!(all_paths(&discovery.root), vec!["/test.js/hidden"]);
    }

    #[test]
    fn test_functions_inside_methods_nest_under_method() {
        let src = r#"var widget = {
    init: function () {
        function setup() {}
        this.ready = function () {};
    }
};"#;
        let discovery = parse_and_index(src);
        assert_eq!(
            all_paths(&discovery.root),
            vec![
                "/test.js/widget.init",
                "/test.js/widget.init/setup",
                "/test.js/widget.init/this.ready",
            ]
        );
        assert_containment(&discovery.root);
    }

    #[test]
    fn test_destructured_params_keep_source_text() {
        let discovery = parse_and_index("function f({ a, b }, c) {}");
        assert_eq!(discovery.root.children[0].args, vec!["{ a, b }", "c"]);
    }

    #[test]
    fn test_ranges_after_a_bom_point_into_the_raw_text() {
        let src = "\u{feff}function f(a){return a;}\nfunction g(){}";
        let discovery = parse_and_index(src);
        let f = &discovery.root.children[0];
        assert_eq!(&src[f.range.start..f.range.end], "function f(a){return a;}");
        let g = &discovery.root.children[1];
        assert_eq!(&src[g.range.start..g.range.end], "function g(){}");
    }

    #[test]
    fn test_ranges_after_astral_characters() {
        let src = "var s = \"é😀\"; setTimeout(function (n) { tick(n); }, 10); function f(a){return a;}";
        let options = DiscoverOptions {
            index_anonymous_callbacks: true,
        };
        let discovery = parse_and_index_with(src, &options).unwrap();
        let callback = &discovery.root.children[0];
        assert_eq!(callback.function_source, vec!["function (n) { tick(n); }"]);
        let f = discovery
            .root
            .children
            .iter()
            .find(|leaf| leaf.path() == "/test.js/f")
            .unwrap();
        assert_eq!(&src[f.range.start..f.range.end], "function f(a){return a;}");
    }
}
