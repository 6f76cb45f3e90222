//! Host hooks invoked inside worker threads.

use talus_registry::Registry;

/// A hook callable from any worker thread.
pub type Hook = Box<dyn Fn(&mut Registry) + Send + Sync>;

/// User hooks run inside every island worker.
///
/// Hooks are fixed when the simulation is built and shared by all workers;
/// they run on worker threads against the worker's private registry, once
/// per step for `pre_step`/`post_step` and once at worker startup for
/// `init`.
#[derive(Default)]
pub struct ExternalHooks {
    /// Runs when a worker initializes its registry.
    pub init: Option<Hook>,
    /// Runs at the beginning of every worker step.
    pub pre_step: Option<Hook>,
    /// Runs at the end of every worker step.
    pub post_step: Option<Hook>,
}

impl std::fmt::Debug for ExternalHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalHooks")
            .field("init", &self.init.is_some())
            .field("pre_step", &self.pre_step.is_some())
            .field("post_step", &self.post_step.is_some())
            .finish()
    }
}

impl ExternalHooks {
    /// No hooks.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the worker-init hook.
    #[must_use]
    pub fn with_init(mut self, hook: impl Fn(&mut Registry) + Send + Sync + 'static) -> Self {
        self.init = Some(Box::new(hook));
        self
    }

    /// Set the pre-step hook.
    #[must_use]
    pub fn with_pre_step(mut self, hook: impl Fn(&mut Registry) + Send + Sync + 'static) -> Self {
        self.pre_step = Some(Box::new(hook));
        self
    }

    /// Set the post-step hook.
    #[must_use]
    pub fn with_post_step(mut self, hook: impl Fn(&mut Registry) + Send + Sync + 'static) -> Self {
        self.post_step = Some(Box::new(hook));
        self
    }
}
