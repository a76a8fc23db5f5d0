//! Function tree model
//!
//! A [`FunctionTree`] holds every function discovered in one page. Its children
//! are script roots (one per analysed file, path `/<file name>`), and each
//! script root holds the declaration hierarchy found inside that file.
//!
//! Paths are slash-delimited: `/app.js/outer/inner`. `/` can never appear in a
//! JavaScript identifier, so it is safe as a separator. A leaf may carry several
//! paths when the same function is bound to several names; the first one is
//! canonical.
//!
//! Invariants:
//! - Children keep declaration order
//! - A child's range lies inside its parent's range
//! - Sibling ranges never overlap

use crate::span::ByteRange;
use serde::{Deserialize, Serialize};

/// Name prefix given to indexed anonymous callbacks
pub const ANONYMOUS_PREFIX: &str = "AnonymousFunction";

/// A call made directly inside a leaf's body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsedFunction {
    /// Callee name as written (`foo`, `obj.method`), with `this` substituted
    pub name: String,
    /// Byte range of the whole call expression
    pub range: ByteRange,
    /// 1-based line of the call
    pub line: usize,
    /// Source text of each argument
    pub arguments: Vec<String>,
    /// Canonical path of the matched declaration, if resolution found one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Callee is an immediately-invoked function expression
    #[serde(default)]
    pub immediately_invoked: bool,
}

/// Back-reference from a method-like leaf to the object literal holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromObject {
    /// Root identifier of the object (`obj`, `jQuery.fn`)
    pub name: String,
    /// Byte offset where the object's declaration ends
    pub end_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionLeaf {
    pub paths: Vec<String>,
    pub args: Vec<String>,
    pub range: ByteRange,
    #[serde(default)]
    pub children: Vec<FunctionLeaf>,
    #[serde(default)]
    pub used_functions: Vec<UsedFunction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_object: Option<FromObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_source: Vec<String>,
    /// End of the statement that declares an expression-bound function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaration_end: Option<usize>,
    /// Synthetic end marker for anonymous callbacks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_end: Option<usize>,
}

impl FunctionLeaf {
    pub fn new(path: impl Into<String>, range: ByteRange) -> Self {
        FunctionLeaf {
            paths: vec![path.into()],
            args: Vec::new(),
            range,
            children: Vec::new(),
            used_functions: Vec::new(),
            from_object: None,
            function_source: Vec::new(),
            declaration_end: None,
            anonymous_end: None,
        }
    }

    /// Canonical path
    pub fn path(&self) -> &str {
        self.paths.first().map(String::as_str).unwrap_or("")
    }

    /// Last segment of the canonical path
    pub fn name(&self) -> &str {
        last_segment(self.path())
    }

    /// Last segment of every path alias, canonical first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|p| last_segment(p))
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_method(&self) -> bool {
        self.from_object.is_some()
    }

    pub fn is_anonymous(&self) -> bool {
        self.name().starts_with(ANONYMOUS_PREFIX) && !self.function_source.is_empty()
    }

    /// Number of `/` separated components minus one
    ///
    /// `/app.js` is 1, a top-level function `/app.js/f` is 2.
    pub fn nested_degree(&self) -> usize {
        self.path().split('/').count().saturating_sub(1)
    }

    /// Script file name this leaf belongs to
    pub fn script_name(&self) -> &str {
        self.path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or("")
    }

    /// Byte offset after which instrumentation for this leaf is spliced
    ///
    /// Object methods use the end of the enclosing object's declaration,
    /// anonymous callbacks their synthetic marker, and expression-bound
    /// functions the end of their declaring statement.
    pub fn injection_point(&self) -> usize {
        self.from_object
            .as_ref()
            .map(|o| o.end_index)
            .or(self.anonymous_end)
            .or(self.declaration_end)
            .unwrap_or(self.range.end)
    }

    /// Enclosing leaves, outermost first, excluding the script root and self
    ///
    /// Each canonical-path prefix is re-resolved against the tree; prefixes
    /// that no longer resolve are skipped.
    pub fn dependencies<'t>(&self, tree: &'t FunctionTree) -> Vec<&'t FunctionLeaf> {
        let segments: Vec<&str> = self.path().split('/').collect();
        (3..segments.len())
            .filter_map(|i| tree.find_leaf_from_path(&segments[..i].join("/")))
            .collect()
    }

    /// Depth-first lookup of a descendant by canonical path
    pub fn find_leaf_from_path(&self, path: &str) -> Option<&FunctionLeaf> {
        if self.path() == path {
            return Some(self);
        }
        let own_depth = self.path().split('/').count();
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() <= own_depth {
            return None;
        }
        let prefix = segments[..=own_depth].join("/");
        self.children
            .iter()
            .find(|c| c.path() == prefix)
            .and_then(|c| c.find_leaf_from_path(path))
    }

    /// Pre-order walk over this leaf and all descendants
    pub fn walk(&self) -> Vec<&FunctionLeaf> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(leaf) = stack.pop() {
            out.push(leaf);
            stack.extend(leaf.children.iter().rev());
        }
        out
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// All functions discovered in one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionTree {
    pub page: String,
    pub children: Vec<FunctionLeaf>,
}

impl FunctionTree {
    pub fn new(page: impl Into<String>) -> Self {
        FunctionTree {
            page: page.into(),
            children: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        "/"
    }

    pub fn script_root_path(file_name: &str) -> String {
        format!("/{}", file_name)
    }

    pub fn script_root(&self, file_name: &str) -> Option<&FunctionLeaf> {
        let path = Self::script_root_path(file_name);
        self.children.iter().find(|c| c.path() == path)
    }

    pub fn script_root_mut(&mut self, file_name: &str) -> Option<&mut FunctionLeaf> {
        let path = Self::script_root_path(file_name);
        self.children.iter_mut().find(|c| c.path() == path)
    }

    /// Insert a script root, replacing an earlier root for the same file
    pub fn upsert_script_root(&mut self, root: FunctionLeaf) {
        match self.children.iter_mut().find(|c| c.path() == root.path()) {
            Some(existing) => *existing = root,
            None => self.children.push(root),
        }
    }

    pub fn is_analysed(&self, file_name: &str) -> bool {
        self.script_root(file_name).is_some()
    }

    /// Resolve a canonical path to its leaf
    ///
    /// `None` means the path names no indexed declaration, which callers treat
    /// as an unknown or native function.
    pub fn find_leaf_from_path(&self, path: &str) -> Option<&FunctionLeaf> {
        let script = path.trim_start_matches('/').split('/').next()?;
        if script.is_empty() {
            return None;
        }
        self.script_root(script)?.find_leaf_from_path(path)
    }

    /// Every function leaf in the page, script roots excluded
    pub fn functions(&self) -> impl Iterator<Item = &FunctionLeaf> {
        self.children
            .iter()
            .flat_map(|root| root.walk().into_iter().skip(1))
    }
}

#[cfg(test)]
#[path = "tree/tests.rs"]
mod tests;
