//! Tests for the function tree model

#[cfg(test)]
mod tree_tests {
    use crate::span::ByteRange;
    use crate::tree::{FromObject, FunctionLeaf, FunctionTree};

    /// /app.js { outer { middle { inner } } helper }
    fn sample_tree() -> FunctionTree {
        let mut inner = FunctionLeaf::new("/app.js/outer/middle/inner", ByteRange::new(30, 40));
        inner.args = vec!["x".to_string()];
        let mut middle = FunctionLeaf::new("/app.js/outer/middle", ByteRange::new(20, 50));
        middle.children.push(inner);
        let mut outer = FunctionLeaf::new("/app.js/outer", ByteRange::new(10, 60));
        outer.children.push(middle);
        let helper = FunctionLeaf::new("/app.js/helper", ByteRange::new(70, 90));

        let mut root = FunctionLeaf::new("/app.js", ByteRange::new(0, 100));
        root.children.push(outer);
        root.children.push(helper);

        let mut tree = FunctionTree::new("http://localhost/index.html");
        tree.upsert_script_root(root);
        tree
    }

    #[test]
    fn test_name_is_last_segment() {
        let leaf = FunctionLeaf::new("/app.js/obj.method", ByteRange::new(0, 1));
        assert_eq!(leaf.name(), "obj.method");
        assert_eq!(leaf.path(), "/app.js/obj.method");
        assert_eq!(leaf.script_name(), "app.js");
    }

    #[test]
    fn test_names_cover_every_alias() {
        let mut leaf = FunctionLeaf::new("/app.js/jQuery.extend", ByteRange::new(0, 1));
        leaf.paths.push("/app.js/jQuery.fn.extend".to_string());
        let names: Vec<&str> = leaf.names().collect();
        assert_eq!(names, vec!["jQuery.extend", "jQuery.fn.extend"]);
    }

    #[test]
    fn test_nested_degree() {
        assert_eq!(FunctionLeaf::new("/app.js", ByteRange::default()).nested_degree(), 1);
        assert_eq!(FunctionLeaf::new("/app.js/f", ByteRange::default()).nested_degree(), 2);
        assert_eq!(FunctionLeaf::new("/app.js/f/g", ByteRange::default()).nested_degree(), 3);
    }

    #[test]
    fn test_find_leaf_from_path() {
        let tree = sample_tree();
        let inner = tree.find_leaf_from_path("/app.js/outer/middle/inner");
        assert_eq!(inner.map(|l| l.args.clone()), Some(vec!["x".to_string()]));
        assert!(tree.find_leaf_from_path("/app.js/helper").is_some());
        assert!(tree.find_leaf_from_path("/app.js").is_some());
    }

    #[test]
    fn test_find_leaf_from_unknown_path_is_none() {
        let tree = sample_tree();
        assert!(tree.find_leaf_from_path("/app.js/outer/missing").is_none());
        assert!(tree.find_leaf_from_path("/other.js/outer").is_none());
        assert!(tree.find_leaf_from_path("/").is_none());
        assert!(tree.find_leaf_from_path("").is_none());
    }

    #[test]
    fn test_dependencies_are_enclosing_leaves_outermost_first() {
        let tree = sample_tree();
        let inner = tree.find_leaf_from_path("/app.js/outer/middle/inner").unwrap();
        let deps: Vec<&str> = inner.dependencies(&tree).iter().map(|l| l.path()).collect();
        assert_eq!(deps, vec!["/app.js/outer", "/app.js/outer/middle"]);
    }

    #[test]
    fn test_top_level_function_has_no_dependencies() {
        let tree = sample_tree();
        let helper = tree.find_leaf_from_path("/app.js/helper").unwrap();
        assert!(helper.dependencies(&tree).is_empty());
    }

    #[test]
    fn test_injection_point_priority() {
        let mut leaf = FunctionLeaf::new("/app.js/f", ByteRange::new(0, 10));
        assert_eq!(leaf.injection_point(), 10);
        leaf.declaration_end = Some(11);
        assert_eq!(leaf.injection_point(), 11);
        leaf.anonymous_end = Some(12);
        assert_eq!(leaf.injection_point(), 12);
        leaf.from_object = Some(FromObject {
            name: "obj".to_string(),
            end_index: 20,
        });
        assert_eq!(leaf.injection_point(), 20);
        assert!(leaf.is_method());
    }

    #[test]
    fn test_upsert_replaces_existing_root() {
        let mut tree = sample_tree();
        tree.upsert_script_root(FunctionLeaf::new("/app.js", ByteRange::new(0, 5)));
        assert_eq!(tree.children.len(), 1);
        assert!(!tree.children[0].has_children());
        tree.upsert_script_root(FunctionLeaf::new("/lib.js", ByteRange::new(0, 5)));
        assert_eq!(tree.children.len(), 2);
        assert!(tree.is_analysed("lib.js"));
    }

    #[test]
    fn test_functions_walk_in_declaration_order() {
        let tree = sample_tree();
        let paths: Vec<&str> = tree.functions().map(|l| l.path()).collect();
        assert_eq!(
            paths,
            vec![
                "/app.js/outer",
                "/app.js/outer/middle",
                "/app.js/outer/middle/inner",
                "/app.js/helper",
            ]
        );
    }

    #[test]
    fn test_tree_serializes_as_single_value() {
        let tree = sample_tree();
        let json = serde_json::to_string(&tree).unwrap();
        let back: FunctionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}
