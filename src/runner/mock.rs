//! A scripted [`ToolRunner`] for tests. Outside this crate's own tests it
//! is only built with the `testing` feature.

use super::{ToolOutput, ToolRunner, ToolSpec};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&ToolSpec, &[String]) -> Result<ToolOutput> + Send + Sync>;

/// One recorded call to [`MockRunner::run`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub spec: ToolSpec,
    pub args: Vec<String>,
}

impl Invocation {
    /// The arguments joined by spaces, handy for assertions.
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// Records every invocation and answers with a handler.
pub struct MockRunner {
    handler: Handler,
    invocations: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    /// Runner that answers every call with empty output.
    pub fn new() -> Self {
        Self::with_handler(|_, _| Ok(ToolOutput::default()))
    }

    /// Runner that answers with `handler`. The handler may write files into
    /// the spec's mounted directories to simulate tool outputs.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&ToolSpec, &[String]) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for MockRunner {
    async fn run(&self, spec: &ToolSpec, args: &[String]) -> Result<ToolOutput> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Invocation {
                spec: spec.clone(),
                args: args.to_vec(),
            });
        (self.handler)(spec, args)
    }
}
