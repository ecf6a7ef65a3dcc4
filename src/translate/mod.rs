//! Natural-language query translation.
//!
//! A question is sent to an [`Assistant`] that may answer with a call to the
//! `filterPackets` function or with plain prose. A call maps field-by-field
//! onto [`FilterCriteria`]; prose becomes a single lower-cased free-text
//! term. When a reply carries both, the function call wins.

pub mod gemini;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

use crate::filter;
use crate::packet::{FilterCriteria, Packet};

pub use gemini::GeminiAssistant;

/// Name of the function exposed to the assistant.
pub const FILTER_FUNCTION: &str = "filterPackets";

/// String parameters of [`FILTER_FUNCTION`]; `limit` is the only numeric one.
pub const STRING_PARAMETERS: [&str; 6] = [
    "protocol",
    "src_ip",
    "dst_ip",
    "src_port",
    "dst_port",
    "free_text",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// No assistant has been configured (no API key yet).
    NotConfigured,
    /// Credential or session setup failed. Sticky for a translator instance.
    Init(String),
    /// Network or HTTP failure talking to the assistant.
    Transport(String),
    /// The assistant produced no usable content.
    EmptyResponse,
    /// The assistant replied with something that is neither prose nor a
    /// `filterPackets` call.
    Protocol(String),
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslateError::NotConfigured => write!(f, "Set your API key first."),
            TranslateError::Init(msg) => write!(f, "assistant init failed: {}", msg),
            TranslateError::Transport(msg) => write!(f, "assistant request failed: {}", msg),
            TranslateError::EmptyResponse => write!(f, "assistant returned an empty response"),
            TranslateError::Protocol(msg) => write!(f, "unexpected assistant reply: {}", msg),
        }
    }
}

impl std::error::Error for TranslateError {}

/// One assistant answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    /// The assistant invoked a function with named arguments.
    Call {
        name: String,
        args: Map<String, Value>,
    },
    /// Free-form text with no function call.
    Text(String),
}

/// A connected assistant session.
pub trait Assistant: Send + Sync {
    /// Send `prompt` for a single exchange. `visible` is a read-only
    /// snapshot of the packets currently shown.
    fn ask(&self, prompt: &str, visible: &[Packet]) -> Result<AssistantReply, TranslateError>;
}

type Connect = Box<dyn Fn() -> Result<Box<dyn Assistant>, TranslateError> + Send + Sync>;

/// Turns questions into filter criteria.
///
/// The assistant session is created on the first call, at most once. If that
/// fails, the error is kept and returned by every later call; a new
/// `Translator` is needed to try again.
pub struct Translator {
    connect: Connect,
    session: OnceLock<Result<Box<dyn Assistant>, TranslateError>>,
}

impl Translator {
    pub fn new<F, A>(connect: F) -> Self
    where
        F: Fn() -> Result<A, TranslateError> + Send + Sync + 'static,
        A: Assistant + 'static,
    {
        Translator {
            connect: Box::new(move || connect().map(|a| Box::new(a) as Box<dyn Assistant>)),
            session: OnceLock::new(),
        }
    }

    fn assistant(&self) -> Result<&dyn Assistant, TranslateError> {
        let session = self.session.get_or_init(|| {
            let result = (self.connect)();
            match &result {
                Ok(_) => tracing::info!("assistant session ready"),
                Err(e) => tracing::warn!(error = %e, "assistant init failed"),
            }
            result
        });
        match session {
            Ok(assistant) => Ok(&**assistant),
            Err(e) => Err(e.clone()),
        }
    }

    /// Translate `prompt` into structured criteria.
    pub fn translate(
        &self,
        prompt: &str,
        visible: &[Packet],
    ) -> Result<FilterCriteria, TranslateError> {
        let assistant = self.assistant()?;
        let reply = assistant.ask(prompt, visible)?;
        let criteria = interpret(reply)?;
        tracing::info!(%criteria, "query translated");
        Ok(criteria)
    }

    /// Translate `prompt` and apply the result to `visible`.
    pub fn narrow(&self, prompt: &str, visible: &[Packet]) -> Result<Vec<Packet>, TranslateError> {
        let criteria = self.translate(prompt, visible)?;
        Ok(filter::apply(visible, &criteria))
    }
}

/// Map an assistant reply onto filter criteria.
pub fn interpret(reply: AssistantReply) -> Result<FilterCriteria, TranslateError> {
    match reply {
        AssistantReply::Call { name, args } if name == FILTER_FUNCTION => {
            Ok(criteria_from_args(&args))
        }
        AssistantReply::Call { name, .. } => Err(TranslateError::Protocol(format!(
            "call to unknown function '{}'",
            name
        ))),
        AssistantReply::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(TranslateError::EmptyResponse);
            }
            Ok(FilterCriteria::free_text(text))
        }
    }
}

/// Read `filterPackets` arguments. Values of the wrong type are wildcards;
/// a missing or non-numeric `limit` means unbounded.
pub fn criteria_from_args(args: &Map<String, Value>) -> FilterCriteria {
    let text = |key: &str| match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let limit = args
        .get("limit")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v as usize)
        .unwrap_or(0);

    FilterCriteria {
        protocol: text("protocol"),
        src_ip: text("src_ip"),
        dst_ip: text("dst_ip"),
        src_port: text("src_port"),
        dst_port: text("dst_port"),
        free_text: text("free_text"),
        limit,
    }
}
