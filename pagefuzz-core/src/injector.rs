//! Source injector
//!
//! The injector rewrites the target's script as it streams through the
//! network interception layer. It holds the only mutable state shared between
//! the dispatcher and interception: an `active` flag, the queue of pending
//! tuples and the selected target. The dispatcher drives it through
//! crate-private control methods; the interception layer only receives an
//! [`InterceptionHandle`], which can read chunks but never load or arm the
//! injector.
//!
//! While active, the first chunk of the target script that covers the
//! injection point gets exactly one tuple's harness spliced in, after which
//! the injector disarms itself. Dependency calls of a nested target that lie
//! past that chunk are carried over and spliced into the later chunks of the
//! same response.

use crate::harness::{self, HarnessTarget};
use crate::protocol::Tuple;
use crate::tree::FunctionTree;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

/// Media types treated as script resources
pub const SCRIPT_CONTENT_TYPES: &[&str] = &[
    "application/javascript",
    "text/javascript",
    "application/x-javascript",
    "application/ecmascript",
];

/// One piece of a response body as seen by the interception layer
#[derive(Debug, Clone, Copy)]
pub struct ResponseChunk<'a> {
    pub uri: &'a str,
    pub content_type: &'a str,
    /// Offset of `data` in the complete response body
    pub offset: usize,
    pub data: &'a [u8],
    /// No chunk follows this one
    pub last: bool,
}

impl ResponseChunk<'_> {
    fn covers(&self, point: usize) -> bool {
        let end = self.offset + self.data.len();
        point >= self.offset && (point < end || (self.last && point == end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DependencyCall {
    name: String,
    point: usize,
    args: Vec<String>,
}

#[derive(Debug, Clone)]
struct InjectionTarget {
    path: String,
    script: String,
    point: usize,
    harness: HarnessTarget,
    dependencies: Vec<DependencyCall>,
}

#[derive(Debug, Default)]
struct InjectorState {
    active: bool,
    /// Pending tuples; the next one to inject is at the back
    queue: Vec<Tuple>,
    target: Option<InjectionTarget>,
    /// Insertions of the current injection not yet streamed
    carried: Vec<(usize, String)>,
}

/// Owner side of the injector, held by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct ScriptInjector {
    state: Arc<Mutex<InjectorState>>,
}

/// Interception side of the injector
#[derive(Debug, Clone)]
pub struct InterceptionHandle {
    state: Arc<Mutex<InjectorState>>,
}

impl ScriptInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interception(&self) -> InterceptionHandle {
        InterceptionHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Tuples still waiting for an injection
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn target_path(&self) -> Option<String> {
        self.state.lock().target.as_ref().map(|t| t.path.clone())
    }

    pub(crate) fn activate(&self) {
        let mut state = self.state.lock();
        state.active = true;
        state.carried.clear();
    }

    pub(crate) fn deactivate(&self) {
        self.state.lock().active = false;
    }

    /// Disarm and drop every pending tuple and the target
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.queue.clear();
        state.target = None;
        state.carried.clear();
    }

    /// Select the function whose script gets rewritten
    ///
    /// `dependency_args[i]` holds the source text of the arguments passed to
    /// the `i`-th enclosing function, outermost first. Fails when no harness
    /// can be built for the function.
    pub(crate) fn select_target(
        &self,
        tree: &FunctionTree,
        path: &str,
        dependency_args: &[Vec<String>],
    ) -> Result<()> {
        let leaf = tree
            .find_leaf_from_path(path)
            .with_context(|| format!("unknown function: {}", path))?;
        let harness = HarnessTarget::for_leaf(leaf)?;
        let dependencies = leaf
            .dependencies(tree)
            .into_iter()
            .enumerate()
            .map(|(i, dependency)| DependencyCall {
                name: dependency.name().to_string(),
                point: dependency.injection_point(),
                args: dependency_args.get(i).cloned().unwrap_or_default(),
            })
            .collect();
        let target = InjectionTarget {
            path: path.to_string(),
            script: leaf.script_name().to_string(),
            point: leaf.injection_point(),
            harness,
            dependencies,
        };
        debug!(path, script = %target.script, point = target.point, "injection target selected");

        let mut state = self.state.lock();
        state.active = false;
        state.queue.clear();
        state.carried.clear();
        state.target = Some(target);
        Ok(())
    }

    /// Queue a batch so that tuples are injected in batch order
    pub(crate) fn load_batch(&self, batch: &[Tuple]) {
        let mut state = self.state.lock();
        state.queue = batch.iter().rev().cloned().collect();
    }

    /// Drop the tuple `uuid` if it is still next in line
    ///
    /// A tuple whose execution never fetched the script stays queued; settling
    /// it keeps the queue aligned with the dispatcher's cursor.
    pub(crate) fn settle(&self, uuid: &str) {
        let mut state = self.state.lock();
        if state.queue.last().is_some_and(|t| t.uuid == uuid) {
            state.queue.pop();
            warn!(uuid, "tuple was never injected");
        }
    }
}

impl InterceptionHandle {
    /// Pass one chunk through the injector
    ///
    /// Returns the chunk unchanged unless it belongs to the target script and
    /// either covers the injection point while the injector is active, or
    /// covers an insertion carried over from an earlier chunk.
    pub fn intercept<'c>(&self, chunk: &ResponseChunk<'c>) -> Cow<'c, [u8]> {
        let mut state = self.state.lock();
        let InjectorState {
            active,
            queue,
            target,
            carried,
        } = &mut *state;
        let Some(target) = target.as_ref() else {
            return Cow::Borrowed(chunk.data);
        };
        if !is_script_content_type(chunk.content_type)
            || script_name_from_uri(chunk.uri) != target.script
        {
            return Cow::Borrowed(chunk.data);
        }

        if *active && chunk.covers(target.point) {
            if let Some(tuple) = queue.pop() {
                *carried = insertions(target, &tuple);
                *active = false;
                debug!(uuid = %tuple.uuid, offset = chunk.offset, "harness injected");
            }
        }
        if carried.is_empty() {
            return Cow::Borrowed(chunk.data);
        }

        let mut now = Vec::new();
        carried.retain(|(point, text)| {
            if chunk.covers(*point) {
                now.push((*point, text.clone()));
                false
            } else if *point < chunk.offset {
                warn!(point, offset = chunk.offset, "insertion point already streamed, skipped");
                false
            } else {
                true
            }
        });
        if now.is_empty() {
            return Cow::Borrowed(chunk.data);
        }
        Cow::Owned(apply_insertions(chunk.data, chunk.offset, now))
    }
}

/// Harness and dependency calls to splice for one tuple
fn insertions(target: &InjectionTarget, tuple: &Tuple) -> Vec<(usize, String)> {
    let mut insertions = vec![(target.point, target.harness.render(tuple))];
    if !target.harness.is_top_level() {
        for dependency in &target.dependencies {
            insertions.push((
                dependency.point,
                harness::dependency_call(&dependency.name, &dependency.args),
            ));
        }
    }
    insertions
}

fn apply_insertions(data: &[u8], offset: usize, mut insertions: Vec<(usize, String)>) -> Vec<u8> {
    // Back to front so earlier offsets stay valid. At a shared point the
    // last splice ends up first, hence the reverse before the stable sort.
    insertions.reverse();
    insertions.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = data.to_vec();
    for (point, text) in insertions {
        out = splice(&out, offset, point, &text);
    }
    out
}

/// Insert `text` at file offset `point` of a chunk starting at `offset`
///
/// When the byte at the insertion point is a `;`, the text goes after it so
/// a statement is never separated from its terminator.
pub fn splice(data: &[u8], offset: usize, point: usize, text: &str) -> Vec<u8> {
    let mut at = point.saturating_sub(offset).min(data.len());
    if data.get(at) == Some(&b';') {
        at += 1;
    }
    let mut out = Vec::with_capacity(data.len() + text.len());
    out.extend_from_slice(&data[..at]);
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(&data[at..]);
    out
}

pub fn is_script_content_type(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    SCRIPT_CONTENT_TYPES.contains(&media.as_str())
}

/// Last path segment of a URI, without query or fragment
pub fn script_name_from_uri(uri: &str) -> &str {
    let path = uri.split(|c| c == '?' || c == '#').next().unwrap_or(uri);
    path.rsplit('/').next().unwrap_or(path)
}

/// Rewrite a whole script for one tuple, as the interception layer would
pub fn preview_injection(
    tree: &FunctionTree,
    path: &str,
    dependency_args: &[Vec<String>],
    tuple: &Tuple,
    source: &str,
) -> Result<String> {
    let injector = ScriptInjector::new();
    injector.select_target(tree, path, dependency_args)?;
    injector.load_batch(std::slice::from_ref(tuple));
    injector.activate();

    let script = tree
        .find_leaf_from_path(path)
        .map(|leaf| leaf.script_name().to_string())
        .unwrap_or_default();
    let chunk = ResponseChunk {
        uri: &script,
        content_type: SCRIPT_CONTENT_TYPES[0],
        offset: 0,
        data: source.as_bytes(),
        last: true,
    };
    match injector.interception().intercept(&chunk) {
        Cow::Owned(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Cow::Borrowed(_) => bail!(
            "injection point of {} lies outside the given source",
            path
        ),
    }
}
