use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Test,
    Options,
    Set,
    Get,
    Reboot,
}

impl Command {
    pub fn keyword(self) -> &'static str {
        match self {
            Command::Test => "test",
            Command::Options => "options",
            Command::Set => "set",
            Command::Get => "get",
            Command::Reboot => "reboot",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Per-command data threaded from enqueue to the response handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionContext {
    Test,
    Options,
    Set { name: String },
    Get { index: usize, round: u32 },
    Reboot,
}

impl ActionContext {
    pub fn command(&self) -> Command {
        match self {
            ActionContext::Test => Command::Test,
            ActionContext::Options => Command::Options,
            ActionContext::Set { .. } => Command::Set,
            ActionContext::Get { .. } => Command::Get,
            ActionContext::Reboot => Command::Reboot,
        }
    }
}

/// What a completion sees when its action leaves the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Response(&'a str),
    Cancelled,
}

pub type Completion = Box<dyn FnOnce(Reply<'_>) + Send>;

/// A request for the device, before it gets a completion attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub parameter: Option<String>,
    pub context: ActionContext,
}

impl ActionSpec {
    pub fn test() -> Self {
        Self {
            parameter: None,
            context: ActionContext::Test,
        }
    }

    pub fn options() -> Self {
        Self {
            parameter: None,
            context: ActionContext::Options,
        }
    }

    pub fn get(name: &str, index: usize, round: u32) -> Self {
        Self {
            parameter: Some(name.to_string()),
            context: ActionContext::Get { index, round },
        }
    }

    pub fn set(name: &str, value: &str) -> Self {
        Self {
            parameter: Some(format!("{} {}", name, value)),
            context: ActionContext::Set {
                name: name.to_string(),
            },
        }
    }

    pub fn reboot() -> Self {
        Self {
            parameter: None,
            context: ActionContext::Reboot,
        }
    }

    pub fn command(&self) -> Command {
        self.context.command()
    }
}

/// One queued device command plus its eventual completion.
pub struct Action {
    spec: ActionSpec,
    completion: Option<Completion>,
}

impl Action {
    pub fn new(spec: ActionSpec) -> Self {
        Self {
            spec,
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: impl FnOnce(Reply<'_>) + Send + 'static) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    pub fn command(&self) -> Command {
        self.spec.command()
    }

    pub fn parameter(&self) -> Option<&str> {
        self.spec.parameter.as_deref()
    }

    /// Splits the action so the completion can run after the queue has moved on.
    pub fn into_parts(self) -> (ActionSpec, Option<Completion>) {
        (self.spec, self.completion)
    }
}

impl From<ActionSpec> for Action {
    fn from(spec: ActionSpec) -> Self {
        Action::new(spec)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("spec", &self.spec)
            .field("completion", &self.completion.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOption {
    pub name: String,
    pub description: Option<String>,
    pub value: Option<String>,
    pub modified: bool,
}

impl ConfigOption {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
            value: None,
            modified: false,
        }
    }
}
