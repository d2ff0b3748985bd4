use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use nixload_core::error::Result;
use tokio_util::sync::CancellationToken;

use super::command::{CommandOutput, CommandRunner};

/// Runner returning canned output and recording every invocation.
///
/// Outputs are consumed in order; the last one repeats.
#[derive(Default)]
pub(crate) struct FakeRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeRunner {
    pub(crate) fn with_output(output: CommandOutput) -> Self {
        Self::with_outputs(vec![output])
    }

    pub(crate) fn with_outputs(outputs: Vec<CommandOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));

        let mut outputs = self.outputs.lock().unwrap();
        let output = if outputs.len() > 1 {
            outputs.pop_front()
        } else {
            outputs.front().cloned()
        };
        Ok(output.unwrap_or_default())
    }
}
