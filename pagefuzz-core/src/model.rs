//! Session model and its observers
//!
//! The [`ModelHandler`] owns the state a front end displays: the selected
//! function and its dependencies, the available and selected modules, the
//! fuzzing progress and the detection results. Every change is announced to
//! the subscribed observers.

use crate::config::DEFAULT_BRAIN;
use crate::dispatcher::FuzzRequest;
use crate::protocol::{FuzzRecord, GenerationMap};
use crate::registry::{ModuleDescriptor, ModuleRegistry};
use crate::tree::FunctionTree;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "update", rename_all = "camelCase")]
pub enum ModelUpdate {
    SelectedFunction,
    GenModules,
    DetectModules,
    BrainModules,
    SelectedModules,
    FuzzingInProgress { progress: f64 },
    FuzzingFinished,
}

/// An enclosing function of the selection, with the arguments to call it with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub path: String,
    pub params: Vec<String>,
    /// Argument source text, one entry per parameter the user filled in
    pub concrete_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedModules {
    pub generators: GenerationMap,
    pub brain: Option<String>,
    pub detector: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModel {
    pub selected_function: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub gen_modules: Vec<ModuleDescriptor>,
    pub detect_modules: Vec<ModuleDescriptor>,
    pub brain_modules: Vec<ModuleDescriptor>,
    pub selected_modules: Option<SelectedModules>,
    pub fuzzing_progress: f64,
    pub fuzzing_data: Vec<FuzzRecord>,
}

pub trait SessionObserver: Send + Sync {
    fn notify(&mut self, update: &ModelUpdate, model: &SessionModel);
}

impl<F> SessionObserver for F
where
    F: FnMut(&ModelUpdate, &SessionModel) + Send + Sync,
{
    fn notify(&mut self, update: &ModelUpdate, model: &SessionModel) {
        (*self)(update, model)
    }
}

/// Handle returned by [`ModelHandler::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(usize);

#[derive(Default)]
pub struct ModelHandler {
    model: SessionModel,
    observers: Vec<(ObserverId, Box<dyn SessionObserver>)>,
    next_id: usize,
}

impl std::fmt::Debug for ModelHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandler")
            .field("model", &self.model)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ModelHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &SessionModel {
        &self.model
    }

    pub fn subscribe(&mut self, observer: impl SessionObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        self.observers.retain(|(observer, _)| *observer != id);
    }

    /// Select the function to fuzz; its dependency arguments start empty
    pub fn update_selected_function(&mut self, tree: &FunctionTree, path: &str) -> Result<()> {
        let leaf = tree
            .find_leaf_from_path(path)
            .with_context(|| format!("unknown function: {}", path))?;
        self.model.dependencies = leaf
            .dependencies(tree)
            .into_iter()
            .map(|dependency| Dependency {
                path: dependency.path().to_string(),
                params: dependency.args.clone(),
                concrete_args: Vec::new(),
            })
            .collect();
        self.model.selected_function = Some(leaf.path().to_string());
        self.dispatch_update(ModelUpdate::SelectedFunction);
        Ok(())
    }

    /// Set the arguments of the `index`-th dependency, outermost first
    pub fn set_dependency_args(&mut self, index: usize, args: Vec<String>) -> Result<()> {
        let Some(dependency) = self.model.dependencies.get_mut(index) else {
            bail!("the selected function has no dependency #{}", index);
        };
        dependency.concrete_args = args;
        Ok(())
    }

    /// Publish the modules that passed their integrity checks
    pub fn update_available_modules(&mut self, registry: &ModuleRegistry) {
        if self.model.gen_modules != registry.generators {
            self.model.gen_modules = registry.generators.clone();
            self.dispatch_update(ModelUpdate::GenModules);
        }
        if self.model.detect_modules != registry.detectors {
            self.model.detect_modules = registry.detectors.clone();
            self.dispatch_update(ModelUpdate::DetectModules);
        }
        if self.model.brain_modules != registry.brains {
            self.model.brain_modules = registry.brains.clone();
            self.dispatch_update(ModelUpdate::BrainModules);
        }
    }

    pub fn update_selected_modules(&mut self, modules: SelectedModules) {
        self.model.selected_modules = Some(modules);
        self.dispatch_update(ModelUpdate::SelectedModules);
    }

    /// Progress in percent; 100 announces the end of the run
    pub fn update_fuzzing_progress(&mut self, progress: f64) {
        self.model.fuzzing_progress = progress;
        if progress >= 100.0 {
            self.dispatch_update(ModelUpdate::FuzzingFinished);
        } else {
            self.dispatch_update(ModelUpdate::FuzzingInProgress { progress });
        }
    }

    /// Store detection results; observers learn about them through the
    /// final progress update
    pub fn update_fuzzing_data(&mut self, records: Vec<FuzzRecord>) {
        self.model.fuzzing_data = records;
    }

    /// Build a dispatch request from the current selection
    pub fn fuzz_request(&self, batch_size: usize) -> Result<FuzzRequest> {
        let target = self
            .model
            .selected_function
            .clone()
            .context("no function selected")?;
        let modules = self
            .model
            .selected_modules
            .as_ref()
            .context("no modules selected")?;
        Ok(FuzzRequest {
            target,
            generators: modules.generators.clone(),
            detector: modules.detector.clone(),
            brain: modules
                .brain
                .clone()
                .unwrap_or_else(|| DEFAULT_BRAIN.to_string()),
            batch_size,
            dependency_args: self
                .model
                .dependencies
                .iter()
                .map(|d| d.concrete_args.clone())
                .collect(),
        })
    }

    fn dispatch_update(&mut self, update: ModelUpdate) {
        trace!(?update, observers = self.observers.len(), "model update");
        for (_, observer) in &mut self.observers {
            observer.notify(&update, &self.model);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyse_script, ScriptSource};
    use crate::discover::DiscoverOptions;
    use std::sync::{Arc, Mutex};

    fn tree() -> FunctionTree {
        let mut tree = FunctionTree::new("page");
        analyse_script(
            &mut tree,
            &ScriptSource::new("app.js", "function outer(a, b) { function inner(x) { return x; } }"),
            &DiscoverOptions::default(),
        )
        .unwrap();
        tree
    }

    fn recorder(handler: &mut ModelHandler) -> Arc<Mutex<Vec<ModelUpdate>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handler.subscribe(move |update: &ModelUpdate, _: &SessionModel| {
            sink.lock().unwrap().push(update.clone());
        });
        seen
    }

    #[test]
    fn test_selection_lists_dependencies() {
        let mut handler = ModelHandler::new();
        let seen = recorder(&mut handler);
        handler
            .update_selected_function(&tree(), "/app.js/outer/inner")
            .unwrap();
        let model = handler.model();
        assert_eq!(model.selected_function.as_deref(), Some("/app.js/outer/inner"));
        assert_eq!(model.dependencies.len(), 1);
        assert_eq!(model.dependencies[0].path, "/app.js/outer");
        assert_eq!(model.dependencies[0].params, vec!["a", "b"]);
        assert_eq!(*seen.lock().unwrap(), vec![ModelUpdate::SelectedFunction]);
    }

    #[test]
    fn test_progress_updates() {
        let mut handler = ModelHandler::new();
        let seen = recorder(&mut handler);
        handler.update_fuzzing_progress(50.0);
        handler.update_fuzzing_progress(100.0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ModelUpdate::FuzzingInProgress { progress: 50.0 },
                ModelUpdate::FuzzingFinished
            ]
        );
    }

    #[test]
    fn test_unsubscribed_observer_is_silent() {
        let mut handler = ModelHandler::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let id = handler.subscribe(move |_: &ModelUpdate, _: &SessionModel| {
            *sink.lock().unwrap() += 1;
        });
        handler.update_fuzzing_progress(10.0);
        handler.unsubscribe(id);
        handler.update_fuzzing_progress(20.0);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_fuzz_request_from_selection() {
        let mut handler = ModelHandler::new();
        assert!(handler.fuzz_request(5).is_err());

        handler
            .update_selected_function(&tree(), "/app.js/outer/inner")
            .unwrap();
        handler
            .set_dependency_args(0, vec!["1".into(), "'b'".into()])
            .unwrap();
        assert!(handler.set_dependency_args(3, vec![]).is_err());

        let mut generators = GenerationMap::new();
        generators.insert(0, "HTMLGenModule".to_string());
        handler.update_selected_modules(SelectedModules {
            generators: generators.clone(),
            brain: None,
            detector: "specialCharDetecModule".to_string(),
        });

        let request = handler.fuzz_request(5).unwrap();
        assert_eq!(request.target, "/app.js/outer/inner");
        assert_eq!(request.brain, "noBrainModule");
        assert_eq!(request.generators, generators);
        assert_eq!(request.dependency_args, vec![vec!["1".to_string(), "'b'".to_string()]]);
    }
}
