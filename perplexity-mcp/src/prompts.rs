//! Prompt catalog served through `prompts/list` and `prompts/get`.
//!
//! Every prompt expands to two user messages: a shared answering instruction,
//! then the formatted request.

use chrono::{Local, NaiveDate, TimeDelta};
use std::collections::HashMap;

use crate::error::McpError;
use crate::protocol::{GetPromptResult, McpPrompt, PromptArgument, PromptMessage};

pub const PROMPT_INSTRUCTION: &str = "Concise, factual answers. Cite sources inline.\n\
     State explicitly when information is uncertain or unavailable.";

struct ArgSpec {
    name: &'static str,
    description: &'static str,
    required: bool,
}

const fn required(name: &'static str, description: &'static str) -> ArgSpec {
    ArgSpec {
        name,
        description,
        required: true,
    }
}

const fn optional(name: &'static str, description: &'static str) -> ArgSpec {
    ArgSpec {
        name,
        description,
        required: false,
    }
}

struct PromptSpec {
    name: &'static str,
    description: &'static str,
    arguments: &'static [ArgSpec],
}

const CATALOG: &[PromptSpec] = &[
    PromptSpec {
        name: "research",
        description: "Comprehensive research with current state and key developments",
        arguments: &[
            required("topic", "Topic to research"),
            optional("timeframe", "Time period (e.g., 'last 12 months')"),
        ],
    },
    PromptSpec {
        name: "compare",
        description: "Compare two items with features and tradeoffs",
        arguments: &[
            required("item_a", "First item"),
            required("item_b", "Second item"),
            optional("use_case", "Specific use case"),
        ],
    },
    PromptSpec {
        name: "verify",
        description: "Verify a claim with supporting and contradicting evidence",
        arguments: &[required("claim", "Claim to verify")],
    },
    PromptSpec {
        name: "status",
        description: "Check current status and recent developments",
        arguments: &[
            required("entity", "Entity to check"),
            optional("date", "Start date (YYYY-MM-DD)"),
        ],
    },
    PromptSpec {
        name: "docs",
        description: "Find API reference and examples",
        arguments: &[
            required("library", "Library name"),
            optional("version", "Version"),
            optional("topic", "Specific topic"),
        ],
    },
    PromptSpec {
        name: "error",
        description: "Find causes and solutions for an error",
        arguments: &[
            required("error_message", "Error message"),
            required("technology", "Technology/framework"),
        ],
    },
    PromptSpec {
        name: "security",
        description: "Check for security vulnerabilities",
        arguments: &[
            required("package", "Package name"),
            optional("date", "Start date (YYYY-MM-DD)"),
        ],
    },
    PromptSpec {
        name: "howto",
        description: "Step-by-step guide for a task",
        arguments: &[
            required("task", "Task to accomplish"),
            optional("context", "Context or environment"),
        ],
    },
    PromptSpec {
        name: "news",
        description: "Find recent news and developments",
        arguments: &[required("topic", "News topic")],
    },
    PromptSpec {
        name: "academic",
        description: "Find peer-reviewed research",
        arguments: &[required("topic", "Research topic")],
    },
];

/// Descriptors for every prompt, in catalog order.
pub fn list_prompts() -> Vec<McpPrompt> {
    CATALOG
        .iter()
        .map(|spec| McpPrompt {
            name: spec.name.to_string(),
            description: Some(spec.description.to_string()),
            arguments: spec
                .arguments
                .iter()
                .map(|arg| PromptArgument {
                    name: arg.name.to_string(),
                    description: Some(arg.description.to_string()),
                    required: arg.required,
                })
                .collect(),
        })
        .collect()
}

/// Expand a prompt using today's local date for date defaults.
pub fn get_prompt(
    name: &str,
    arguments: &HashMap<String, String>,
) -> Result<GetPromptResult, McpError> {
    render_prompt(name, arguments, Local::now().date_naive())
}

/// Expand a prompt relative to `today`.
pub fn render_prompt(
    name: &str,
    arguments: &HashMap<String, String>,
    today: NaiveDate,
) -> Result<GetPromptResult, McpError> {
    let spec = CATALOG
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| McpError::PromptNotFound {
            name: name.to_string(),
        })?;

    let args = Args {
        prompt: spec.name,
        values: arguments,
    };
    for arg in spec.arguments.iter().filter(|a| a.required) {
        args.require(arg.name)?;
    }

    let text = match spec.name {
        "research" => format!(
            "{}: current state, key developments since {}, main players, open questions. \
             If information is incomplete, indicate gaps.",
            args.require("topic")?,
            args.get("timeframe").unwrap_or("last 12 months")
        ),
        "compare" => format!(
            "{} vs {}{}: feature comparison, tradeoffs, current recommendations",
            args.require("item_a")?,
            args.require("item_b")?,
            args.suffix("use_case", " for ")
        ),
        "verify" => format!(
            "Verify claim: \"{}\" — find supporting AND contradicting evidence. \
             If sources conflict, note discrepancies.",
            args.require("claim")?
        ),
        "status" => format!(
            "{} current status: latest developments, changes, announcements since {}",
            args.require("entity")?,
            args.date_or("date", today, 30)
        ),
        "docs" => format!(
            "{}{}{}: API reference, examples, common patterns",
            args.require("library")?,
            args.suffix("version", " "),
            args.suffix("topic", " ")
        ),
        "error" => format!(
            "\"{}\" in {}: causes, verified solutions, workarounds",
            args.require("error_message")?,
            args.require("technology")?
        ),
        "security" => format!(
            "{} security vulnerabilities since {}",
            args.require("package")?,
            args.date_or("date", today, 365)
        ),
        "howto" => format!(
            "{} step-by-step{}: current best practice, required tools, common pitfalls",
            args.require("task")?,
            args.suffix("context", " for ")
        ),
        "news" => format!("{} significant developments", args.require("topic")?),
        "academic" => format!(
            "{}: peer-reviewed findings, methodology, key papers",
            args.require("topic")?
        ),
        other => {
            return Err(McpError::PromptNotFound {
                name: other.to_string(),
            });
        }
    };

    Ok(GetPromptResult {
        description: Some(spec.description.to_string()),
        messages: vec![PromptMessage::user(PROMPT_INSTRUCTION), PromptMessage::user(text)],
    })
}

struct Args<'a> {
    prompt: &'static str,
    values: &'a HashMap<String, String>,
}

impl<'a> Args<'a> {
    /// Empty values count as absent.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &str) -> Result<&'a str, McpError> {
        self.get(key).ok_or_else(|| {
            McpError::invalid_params(format!(
                "missing required argument '{}' for prompt '{}'",
                key, self.prompt
            ))
        })
    }

    fn suffix(&self, key: &str, separator: &str) -> String {
        self.get(key)
            .map(|v| format!("{}{}", separator, v))
            .unwrap_or_default()
    }

    fn date_or(&self, key: &str, today: NaiveDate, days_back: i64) -> String {
        match self.get(key) {
            Some(date) => date.to_string(),
            None => (today - TimeDelta::days(days_back))
                .format("%Y-%m-%d")
                .to_string(),
        }
    }
}
