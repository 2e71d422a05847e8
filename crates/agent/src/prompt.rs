//! System prompt rendering.
//!
//! The system message tells the model who it is, what it may do, which
//! tools exist, and how to tag its output so [`TagStreamParser`] can read it.
//!
//! [`TagStreamParser`]: crate::parser::TagStreamParser

use reasonflow_config::IdentityConfig;
use reasonflow_core::tool::ToolDefinition;
use std::fmt::Write;

/// Output-format contract appended to every system prompt.
pub const RESPONSE_FORMAT_PROMPT: &str = r#"Format every response with the following tags so it can be processed:

1. THINKING: reason about the problem first.
   <thinking>
   [step-by-step reasoning]
   </thinking>

2. TOOL USE (only when needed): request exactly one tool call.
   <tool>
   {
     "name": "tool_id",
     "args": {
       "param1": "value1"
     }
   }
   </tool>

3. ANSWER: finish with a clear answer for the user.
   <answer>
   [final response]
   </answer>

Rules:
- Put all output inside one of these tags
- Always begin with <thinking>
- The final response must be inside <answer>
- The body of <tool> must be a valid JSON object
- A requested tool runs immediately and its output is sent back to you

Example:
<thinking>
The user wants the sum of 40 and 2. That is simple arithmetic.
</thinking>
<answer>
The sum is 42.
</answer>"#;

/// Identity section of the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl SystemPrompt {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Render the full system message. `tools` is `None` when no toolkit is
    /// attached, in which case the tool list is omitted.
    pub fn render(&self, tools: Option<&[ToolDefinition]>) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Your name is {}, you are an AI agent charged with:",
            self.name
        );
        let _ = writeln!(out, "{}", self.role);
        out.push_str("You are given the following permissions:\n");
        if self.permissions.is_empty() {
            out.push_str("none\n");
        } else {
            let _ = writeln!(out, "{}", self.permissions.join(", "));
        }

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            out.push_str("\nYou have access to the following tools:\n");
            for tool in tools {
                let _ = writeln!(out, "- tool_id: \"{}\"", tool.name);
                let _ = writeln!(out, "  description: {}", tool.description);
                let _ = writeln!(out, "  input_schema: {}", tool.parameters);
            }
        }

        out.push('\n');
        out.push_str(RESPONSE_FORMAT_PROMPT);
        out
    }
}

impl From<&IdentityConfig> for SystemPrompt {
    fn from(identity: &IdentityConfig) -> Self {
        Self::new(&identity.name, &identity.role).with_permissions(identity.permissions.clone())
    }
}
