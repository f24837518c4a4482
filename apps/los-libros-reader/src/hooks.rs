//! Chapter display hooks
//!
//! Hooks run after a chapter's content is in the surface and before pages
//! are computed. All hooks for a chapter run concurrently; the renderer
//! continues once every one of them has finished.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::dom::Document;
use crate::error::Result;

/// What a hook gets to see of the chapter being displayed
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub href: &'a str,
    pub spine_pos: usize,
    pub document: &'a Document,
}

/// Middleware run before a chapter is displayed
#[async_trait]
pub trait ChapterHook: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()>;
}

/// Hook backed by a plain function
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookContext<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> ChapterHook for FnHook<F>
where
    F: Fn(&HookContext<'_>) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        (self.f)(ctx)
    }
}

/// Ordered list of hooks
#[derive(Clone, Default)]
pub struct HookList {
    hooks: Vec<Arc<dyn ChapterHook>>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn ChapterHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook and wait for all of them.
    ///
    /// Failures are logged; they never stop the chapter from displaying.
    /// Returns how many hooks succeeded.
    pub async fn run(&self, ctx: &HookContext<'_>) -> usize {
        let results = join_all(self.hooks.iter().map(|hook| hook.run(ctx))).await;

        let mut ok = 0;
        for (hook, result) in self.hooks.iter().zip(results) {
            match result {
                Ok(()) => ok += 1,
                Err(e) => warn!(hook = hook.name(), href = ctx.href, error = %e, "Chapter hook failed"),
            }
        }
        ok
    }
}

impl std::fmt::Debug for HookList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}
