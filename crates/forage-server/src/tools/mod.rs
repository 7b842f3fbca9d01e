//! The agent-facing meta-tools, one module each.

mod evaluate;
mod install;
mod search;
mod status;
mod uninstall;

pub use evaluate::{EvaluateInput, EvaluateOutcome, EvaluateReport, EvaluateTool, README_LIMIT};
pub use install::{install_name, InstallInput, InstallReport, InstallTool, ToolSummary};
pub use search::{SearchInput, SearchOutput, SearchTool};
pub use status::{InstalledStatus, RunningStatus, StatusReport, StatusTool};
pub use uninstall::{UninstallInput, UninstallReport, UninstallTool};

use crate::context::Forage;
use forage_core::{ForageError, ForageResult, ToolDescriptor};
use forage_mcp::ToolHandler;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Every meta-tool with the handler that serves it.
pub fn meta_tools(forage: Arc<Forage>) -> Vec<(ToolDescriptor, Arc<dyn ToolHandler>)> {
    vec![
        entry(SearchTool::descriptor(), SearchTool::new(forage.clone())),
        entry(EvaluateTool::descriptor(), EvaluateTool::new(forage.clone())),
        entry(InstallTool::descriptor(), InstallTool::new(forage.clone())),
        entry(UninstallTool::descriptor(), UninstallTool::new(forage.clone())),
        entry(StatusTool::descriptor(), StatusTool::new(forage)),
    ]
}

fn entry<T: ToolHandler + 'static>(
    descriptor: ToolDescriptor,
    handler: T,
) -> (ToolDescriptor, Arc<dyn ToolHandler>) {
    let handler: Arc<dyn ToolHandler> = Arc::new(handler);
    (descriptor, handler)
}

/// Decode tool arguments, treating a missing body as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> ForageResult<T> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ForageError::InvalidArguments(format!("{tool}: {e}")))
}
