//! Tests for call attribution and resolution

#[cfg(test)]
mod callgraph_tests {
    use crate::callgraph::{collect_calls, resolve_calls, CallSite, CalleeName, IIFE_NAME};
    use crate::discover::{index_declarations, DiscoverOptions};
    use crate::parser::parse_script;
    use crate::tree::{FunctionLeaf, FunctionTree};
    use swc_common::{sync::Lrc, SourceMap};

    fn build(src: &str) -> (FunctionTree, Vec<CallSite>) {
        let cm: Lrc<SourceMap> = Default::default();
        let (script, _) = parse_script(src, &cm, "app.js").unwrap();
        let discovery =
            index_declarations(&script, "app.js", src, &cm, &DiscoverOptions::default()).unwrap();
        let mut tree = FunctionTree::new("page");
        tree.upsert_script_root(discovery.root);
        let calls = collect_calls(&script, src, &cm);
        (tree, calls)
    }

    fn analysed(src: &str) -> FunctionTree {
        let (mut tree, calls) = build(src);
        resolve_calls(&mut tree, "app.js", &calls);
        tree
    }

    fn leaf<'t>(tree: &'t FunctionTree, path: &str) -> &'t FunctionLeaf {
        tree.find_leaf_from_path(path)
            .unwrap_or_else(|| panic!("missing leaf {}", path))
    }

    fn used_names(leaf: &FunctionLeaf) -> Vec<&str> {
        leaf.used_functions.iter().map(|u| u.name.as_str()).collect()
    }

    #[test]
    fn test_collects_callee_shapes() {
        let (_, calls) = build("a(); b.c.d(1, x); this.e(); (function () {})(); make().run();");
        let callees: Vec<CalleeName> = calls.into_iter().map(|c| c.callee).collect();
        assert_eq!(
            callees,
            vec![
                CalleeName::Named("a".to_string()),
                CalleeName::Named("b.c.d".to_string()),
                CalleeName::ThisMember(".e".to_string()),
                CalleeName::ImmediatelyInvoked,
                CalleeName::Named(".run".to_string()),
                CalleeName::Named("make".to_string()),
            ]
        );
    }

    #[test]
    fn test_arguments_after_astral_characters() {
        let (_, calls) = build("var s = \"😀\"; show(s, \"é\");");
        assert_eq!(calls[0].arguments, vec!["s", "\"é\""]);

        let (_, calls) = build("\u{feff}show(total);");
        assert_eq!(calls[0].arguments, vec!["total"]);
    }

    #[test]
    fn test_arguments_keep_source_text() {
        let (_, calls) = build("send('a,b', 1 + 2, ...rest);");
        assert_eq!(calls[0].arguments, vec!["'a,b'", "1 + 2", "...rest"]);
        assert_eq!(calls[0].line, 1);
    }

    #[test]
    fn test_call_goes_to_innermost_leaf_only() {
        let src = r#"
function outer() {
    before();
    function inner() {
        deep();
    }
    after();
}
top();
"#;
        let tree = analysed(src);
        assert_eq!(used_names(leaf(&tree, "/app.js/outer")), vec!["before", "after"]);
        assert_eq!(used_names(leaf(&tree, "/app.js/outer/inner")), vec!["deep"]);
        assert_eq!(used_names(leaf(&tree, "/app.js")), vec!["top"]);
    }

    #[test]
    fn test_resolves_calls_to_declarations() {
        let src = r#"
function helper(x) { return x; }
var app = {
    start: function () { helper(1); app.stop(); }
};
app.stop = function () {};
"#;
        let tree = analysed(src);
        let start = leaf(&tree, "/app.js/app.start");
        let paths: Vec<Option<&str>> = start
            .used_functions
            .iter()
            .map(|u| u.path.as_deref())
            .collect();
        assert_eq!(paths, vec![Some("/app.js/helper"), Some("/app.js/app.stop")]);
    }

    #[test]
    fn test_this_callee_uses_enclosing_object_name() {
        let src = r#"
var widget = {
    render: function () { this.paint(); },
    paint: function () {}
};
"#;
        let tree = analysed(src);
        let render = leaf(&tree, "/app.js/widget.render");
        assert_eq!(render.used_functions[0].name, "widget.paint");
        assert_eq!(
            render.used_functions[0].path.as_deref(),
            Some("/app.js/widget.paint")
        );
    }

    #[test]
    fn test_this_callee_without_object_uses_leaf_name() {
        let tree = analysed("function Model() { this.load(); }");
        let model = leaf(&tree, "/app.js/Model");
        assert_eq!(model.used_functions[0].name, "Model.load");
    }

    #[test]
    fn test_builtins_stay_unresolved() {
        let tree = analysed("function f() { console.log(1); parseInt('2'); }");
        let f = leaf(&tree, "/app.js/f");
        assert_eq!(f.used_functions.len(), 2);
        assert!(f.used_functions.iter().all(|u| u.path.is_none()));
    }

    #[test]
    fn test_iife_is_recorded_but_never_resolved() {
        let tree = analysed("(function () { setup(); })();\nfunction setup() {}");
        let root = leaf(&tree, "/app.js");
        let iife = root
            .used_functions
            .iter()
            .find(|u| u.immediately_invoked)
            .unwrap();
        assert_eq!(iife.name, IIFE_NAME);
        assert!(iife.path.is_none());
        let setup_call = root.used_functions.iter().find(|u| u.name == "setup").unwrap();
        assert_eq!(setup_call.path.as_deref(), Some("/app.js/setup"));
    }

    #[test]
    fn test_search_depth_is_bounded_by_nesting() {
        let src = r#"
function a() {
    function b() {
        function c() {}
    }
}
b();
c();
"#;
        let tree = analysed(src);
        let root = leaf(&tree, "/app.js");
        let b_call = root.used_functions.iter().find(|u| u.name == "b").unwrap();
        let c_call = root.used_functions.iter().find(|u| u.name == "c").unwrap();
        // The script root reaches two levels of functions, so `c` stays out of scope
        assert_eq!(b_call.path.as_deref(), Some("/app.js/a/b"));
        assert!(c_call.path.is_none());
    }

    #[test]
    fn test_aliases_resolve_to_canonical_path() {
        let src = "jQuery.extend = jQuery.fn.extend = function () {};\njQuery.fn.extend({});";
        let tree = analysed(src);
        let root = leaf(&tree, "/app.js");
        let call = root
            .used_functions
            .iter()
            .find(|u| u.name == "jQuery.fn.extend")
            .unwrap();
        assert_eq!(call.path.as_deref(), Some("/app.js/jQuery.extend"));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let src = r#"
function outer() { inner(); helper(); }
function inner() { helper(); missing(); }
function helper() {}
"#;
        let (mut tree, calls) = build(src);
        let first = resolve_calls(&mut tree, "app.js", &calls);
        assert_eq!(first.attributed, 4);
        assert_eq!(first.resolved, 3);
        let snapshot = tree.clone();

        let second = resolve_calls(&mut tree, "app.js", &calls);
        assert_eq!(second.attributed, 0);
        assert_eq!(second.resolved, 0);
        assert_eq!(tree, snapshot);
    }

    #[test]
    fn test_unknown_script_is_a_no_op() {
        let (mut tree, calls) = build("f();");
        let stats = resolve_calls(&mut tree, "other.js", &calls);
        assert_eq!(stats.attributed, 0);
        assert!(leaf(&tree, "/app.js").used_functions.is_empty());
    }
}
