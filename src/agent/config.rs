//! Loop configuration. Carried as a plain value into the loop's
//! construction — no process-wide state.

use crate::error::Result;

/// The reasoning/guard reminders and retry budgets are configuration, not
/// constants. Named constructors follow a `gateway()`/`interactive()`
/// convention so callers can pick a profile instead of hand-assembling one.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub max_iterations: u32,
    pub max_retry_on_multiple_tools: u32,
    pub system_prompt: String,
    pub multiple_tools_warning: String,
    pub ready_to_reply_reminder: String,
    pub self_check_reminder: Option<String>,
}

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a careful, tool-using assistant. Use the available tools when they help answer the \
     user's request, and give a clear final answer once you have what you need.";

const DEFAULT_MULTIPLE_TOOLS_WARNING: &str =
    "You called more than one tool in a single turn. Call exactly one tool at a time, then wait \
     for its result before deciding the next step.";

const DEFAULT_READY_TO_REPLY_REMINDER: &str =
    "During your most recent reasoning tool call, you set `ready_to_reply` to false, which means \
     you do not yet have enough information for a final answer. Continue executing your plan, \
     calling tools, or refining the plan instead of replying. If you believe the conversation is \
     ready for a final response, call the reasoning tool again to review the evidence and set \
     `ready_to_reply` to true; otherwise, keep executing the next step.";

impl CoreConfig {
    /// Defaults matching the original service's pinned numeric constants.
    pub fn gateway() -> Self {
        CoreConfig {
            max_iterations: 15,
            max_retry_on_multiple_tools: 3,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            multiple_tools_warning: DEFAULT_MULTIPLE_TOOLS_WARNING.to_string(),
            ready_to_reply_reminder: DEFAULT_READY_TO_REPLY_REMINDER.to_string(),
            self_check_reminder: None,
        }
    }

    /// A tighter ceiling, useful for interactive/CLI-style callers where a
    /// runaway tool loop is more noticeable and costlier to wait out.
    pub fn interactive() -> Self {
        CoreConfig { max_iterations: 8, max_retry_on_multiple_tools: 2, ..Self::gateway() }
    }

    /// Read overrides from the environment, falling back to `gateway()`'s
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let defaults = Self::gateway();

        Ok(CoreConfig {
            max_iterations: settings
                .get_int("max_iterations")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_iterations),
            max_retry_on_multiple_tools: settings
                .get_int("max_retry_on_multiple_tools")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_retry_on_multiple_tools),
            system_prompt: settings.get_string("system_prompt").unwrap_or(defaults.system_prompt),
            multiple_tools_warning: settings
                .get_string("multiple_tools_warning")
                .unwrap_or(defaults.multiple_tools_warning),
            ready_to_reply_reminder: settings
                .get_string("ready_to_reply_reminder")
                .unwrap_or(defaults.ready_to_reply_reminder),
            self_check_reminder: settings.get_string("self_check_reminder").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_defaults_are_nonzero() {
        let config = CoreConfig::gateway();
        assert!(config.max_iterations > 0);
        assert!(config.max_retry_on_multiple_tools > 0);
    }
}
