//! Built-in tool implementations for reasonflow.
//!
//! Tools give a reasoning session the ability to act: run shell commands
//! and execute code snippets. Both stream partial output while the child
//! process runs.

pub mod code_executor;
mod process;
pub mod shell;

use reasonflow_config::ToolsConfig;
use reasonflow_core::tool::ToolRegistry;

pub use code_executor::CodeExecutorTool;
pub use shell::ShellTool;

/// Create the tool registry described by `config`.
///
/// Returns `None` when tools are disabled, which leaves sessions without a
/// toolkit.
pub fn default_registry(config: &ToolsConfig) -> Option<ToolRegistry> {
    if !config.enabled {
        return None;
    }

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool::new(config.shell_allowlist.clone())));
    registry.register(Box::new(CodeExecutorTool::from_config(&config.code_executor)));
    Some(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_builtins() {
        let registry = default_registry(&ToolsConfig::default()).unwrap();
        assert_eq!(registry.names(), ["code_executor", "shell"]);
    }

    #[test]
    fn disabled_tools_yield_no_registry() {
        let config = ToolsConfig {
            enabled: false,
            ..ToolsConfig::default()
        };
        assert!(default_registry(&config).is_none());
    }
}
