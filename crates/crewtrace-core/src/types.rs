use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh identifier for runs, traces and spans.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Descriptive half of an agent: who it is and what it can do.
///
/// The executing half lives behind [`crate::traits::AgentExecutor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique agent identifier within a run.
    pub id: String,
    /// Role name, e.g. "Senior Researcher".
    pub role: String,
    /// What the agent is trying to achieve.
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub backstory: Option<String>,
    /// Tool names this agent can call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Domain keywords (e.g. "finance", "filings").
    #[serde(default)]
    pub expertise: Vec<String>,
    /// Whether this agent may hand work to other agents.
    #[serde(default)]
    pub allow_delegation: bool,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = Some(backstory.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_expertise(mut self, expertise: Vec<String>) -> Self {
        self.expertise = expertise;
        self
    }

    pub fn with_delegation(mut self, allow: bool) -> Self {
        self.allow_delegation = allow;
        self
    }
}

/// Token accounting reported by an executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// What an agent executor hands back for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The generated text, untouched.
    pub raw: String,
    /// Names of tools invoked while producing the text.
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Reasoning the agent stated alongside its answer, if any.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl AgentResponse {
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}
