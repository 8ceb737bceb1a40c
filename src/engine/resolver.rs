use std::collections::HashMap;
use std::sync::Arc;

use super::executer::{CodeExecutor, ImageCache, LanguageExecutor};
use super::sandbox::SandboxManager;
use crate::languages::LanguageRegistry;

/// Maps a language identifier to its executor.
///
/// The set of languages is fixed when the resolver is built; an unknown
/// identifier resolves to `None`.
pub struct ExecutorResolver {
    executors: HashMap<String, Arc<dyn CodeExecutor>>,
}

impl ExecutorResolver {
    pub fn new(registry: &LanguageRegistry, sandbox: Arc<SandboxManager>) -> Self {
        let images = Arc::new(ImageCache::new(sandbox.runtime().clone()));

        let executors = registry
            .iter()
            .map(|(name, config)| {
                let executor: Arc<dyn CodeExecutor> = Arc::new(LanguageExecutor::new(
                    config.clone(),
                    sandbox.clone(),
                    images.clone(),
                ));
                (name.to_string(), executor)
            })
            .collect();

        Self { executors }
    }

    pub fn from_executors<I, S>(executors: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn CodeExecutor>)>,
        S: Into<String>,
    {
        Self {
            executors: executors
                .into_iter()
                .map(|(name, executor)| (name.into().to_lowercase(), executor))
                .collect(),
        }
    }

    pub fn resolve(&self, language: &str) -> Option<Arc<dyn CodeExecutor>> {
        self.executors.get(&language.to_lowercase()).cloned()
    }

    pub fn supported_languages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
