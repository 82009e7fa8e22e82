//! Structured errors that survive crossing a process boundary.
//!
//! A worker never ships a native error object to the orchestrator. It
//! captures the failure as an [`ErrorCapsule`]: message, stack frames,
//! type name and the chained cause/context capsules. The orchestrator can
//! render it, compare it, or wrap it again as a `std::error::Error`.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::error::SerdesError;
use crate::serdes::{wire_record, FieldReader, FieldSpec, FieldWriter, Record};

const NO_MESSAGE: &str = "<no message>";
const UNPRINTABLE_PANIC: &str = "<unprintable panic payload>";
const MAX_CHAIN_DEPTH: usize = 64;

const CAUSE_SEPARATOR: &str = "The above exception was caused by the following exception:";
const CONTEXT_SEPARATOR: &str =
    "The above exception occurred during handling of the following exception:";

/// Type name used for spawn timeouts.
pub const TIMEOUT_CLASS: &str = "timeout";
/// Type name used for captured panics.
pub const PANIC_CLASS: &str = "panic";

/// A serializable snapshot of a failure.
///
/// # Examples
///
/// ```
/// use stepwire::types::ErrorCapsule;
///
/// let io = std::io::Error::new(std::io::ErrorKind::NotFound, "repo.py missing");
/// let capsule = ErrorCapsule::capture_typed(&io);
///
/// assert_eq!(capsule.message, "repo.py missing");
/// assert_eq!(capsule.cls_name.as_deref(), Some("Error"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCapsule {
    /// Rendered message.
    pub message: String,
    /// Stack frames, outermost first.
    pub stack: Vec<String>,
    /// Name of the failing type, when known.
    pub cls_name: Option<String>,
    /// Error that directly caused this one.
    pub cause: Option<Box<ErrorCapsule>>,
    /// Error being handled when this one was raised.
    pub context: Option<Box<ErrorCapsule>>,
}

impl ErrorCapsule {
    /// A capsule with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: non_empty(message.into()),
            stack: Vec::new(),
            cls_name: None,
            cause: None,
            context: None,
        }
    }

    /// Capture an error and its `source()` chain.
    ///
    /// Each source becomes the `cause` of the capsule above it. The type
    /// name is unknown through a trait object, so `cls_name` stays `None`.
    pub fn capture(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::capture_at_depth(err, 0)
    }

    /// Like [`capture`](Self::capture), recording the concrete type name.
    ///
    /// A capsule passed in keeps its own `cls_name`.
    pub fn capture_typed<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut capsule = Self::capture(err);
        if (err as &(dyn std::error::Error + 'static)).is::<ErrorCapsule>() {
            return capsule;
        }
        capsule.cls_name = Some(short_type_name(std::any::type_name::<E>()).to_string());
        capsule
    }

    fn capture_at_depth(err: &(dyn std::error::Error + 'static), depth: usize) -> Self {
        if let Some(capsule) = err.downcast_ref::<ErrorCapsule>() {
            return capsule.clone();
        }
        let mut capsule = Self::new(err.to_string());
        if depth < MAX_CHAIN_DEPTH {
            capsule.cause = err
                .source()
                .map(|source| Box::new(Self::capture_at_depth(source, depth + 1)));
        }
        capsule
    }

    /// Capture a panic payload as returned by `catch_unwind` or a failed
    /// task join.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| UNPRINTABLE_PANIC.to_string());
        Self::new(message).with_cls_name(PANIC_CLASS)
    }

    /// Capsule reporting that a worker exceeded `limit`.
    pub fn timeout(limit: Duration) -> Self {
        Self::new(format!(
            "worker did not finish within {} ms",
            limit.as_millis()
        ))
        .with_cls_name(TIMEOUT_CLASS)
    }

    /// Set the type name.
    pub fn with_cls_name(mut self, cls_name: impl Into<String>) -> Self {
        self.cls_name = Some(cls_name.into());
        self
    }

    /// Set the stack frames.
    pub fn with_stack<I, S>(mut self, stack: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stack = stack.into_iter().map(Into::into).collect();
        self
    }

    /// Set the direct cause.
    pub fn with_cause(mut self, cause: ErrorCapsule) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Set the error that was being handled.
    pub fn with_context(mut self, context: ErrorCapsule) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    /// Iterate this capsule followed by its causes.
    pub fn chain(&self) -> impl Iterator<Item = &ErrorCapsule> {
        std::iter::successors(Some(self), |capsule| capsule.cause.as_deref())
    }

    /// Innermost cause.
    pub fn root_cause(&self) -> &ErrorCapsule {
        self.chain().last().unwrap_or(self)
    }
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        NO_MESSAGE.to_string()
    } else {
        message
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl fmt::Display for ErrorCapsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cls_name {
            Some(cls_name) => write!(f, "{cls_name}: {}", self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        for frame in &self.stack {
            write!(f, "\n{}", frame.trim_end())?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n\n{CAUSE_SEPARATOR}\n\n{cause}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\n\n{CONTEXT_SEPARATOR}\n\n{context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorCapsule {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl Record for ErrorCapsule {
    const STORAGE_NAME: &'static str = "SerializableErrorInfo";
    const LEGACY_NAMES: &'static [&'static str] = &["ErrorCapsule"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("message"),
        FieldSpec::required("stack"),
        FieldSpec::optional("cls_name"),
        FieldSpec::optional("cause"),
        FieldSpec::optional("context"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("message", &self.message);
        fields.put("stack", &self.stack);
        fields.put("cls_name", &self.cls_name);
        fields.put("cause", &self.cause);
        fields.put("context", &self.context);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            message: fields.required("message")?,
            stack: fields.required("stack")?,
            cls_name: fields.optional("cls_name")?,
            cause: fields.optional("cause")?,
            context: fields.optional("context")?,
        })
    }
}

wire_record!(ErrorCapsule);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serdes::{deserialize_value, serialize_value};
    use pretty_assertions::assert_eq;

    #[derive(Debug, thiserror::Error)]
    #[error("step `load` failed")]
    struct StepFailed {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn capture_walks_source_chain() {
        let err = StepFailed {
            source: std::io::Error::other("disk full"),
        };
        let capsule = ErrorCapsule::capture_typed(&err);

        assert_eq!(capsule.cls_name.as_deref(), Some("StepFailed"));
        assert_eq!(capsule.message, "step `load` failed");
        let messages: Vec<&str> = capsule.chain().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["step `load` failed", "disk full"]);
        assert_eq!(capsule.root_cause().message, "disk full");
    }

    #[test]
    fn empty_message_gets_placeholder() {
        let err = std::io::Error::other("");
        assert_eq!(ErrorCapsule::capture(&err).message, "<no message>");
    }

    #[test]
    fn panic_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let capsule = ErrorCapsule::from_panic(caught.as_ref());
        assert_eq!(capsule.message, "boom");
        assert_eq!(capsule.cls_name.as_deref(), Some("panic"));

        let formatted = std::panic::catch_unwind(|| panic!("boom {}", 2)).unwrap_err();
        assert_eq!(ErrorCapsule::from_panic(formatted.as_ref()).message, "boom 2");

        let opaque: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(
            ErrorCapsule::from_panic(opaque.as_ref()).message,
            "<unprintable panic payload>"
        );
    }

    #[test]
    fn display_renders_cause_and_context() {
        let capsule = ErrorCapsule::new("outer")
            .with_cls_name("RunFailure")
            .with_stack(["  at run()\n", "  at main()\n"])
            .with_cause(ErrorCapsule::new("inner"))
            .with_context(ErrorCapsule::new("while cleaning up"));

        assert_eq!(
            capsule.to_string(),
            "RunFailure: outer\n  at run()\n  at main()\n\n\
             The above exception was caused by the following exception:\n\n\
             inner\n\n\
             The above exception occurred during handling of the following exception:\n\n\
             while cleaning up"
        );
    }

    #[test]
    fn timeout_capsule() {
        let capsule = ErrorCapsule::timeout(Duration::from_secs(2));
        assert_eq!(capsule.cls_name.as_deref(), Some("timeout"));
        assert!(capsule.message.contains("2000 ms"));
    }

    #[test]
    fn nested_capsule_round_trips() {
        let capsule = ErrorCapsule::new("outer")
            .with_cause(ErrorCapsule::new("inner").with_cls_name("KeyError"));
        let text = serialize_value(&capsule);
        assert!(text.starts_with(r#"{"__class__":"SerializableErrorInfo""#));
        assert_eq!(deserialize_value::<ErrorCapsule>(&text).unwrap(), capsule);
    }

    fn full_capsule() -> ErrorCapsule {
        ErrorCapsule::new("outer")
            .with_cls_name("KeyError")
            .with_stack(["  at run()"])
            .with_cause(ErrorCapsule::new("inner").with_cls_name("IOError"))
            .with_context(ErrorCapsule::new("while cleaning"))
    }

    #[test]
    fn capturing_a_capsule_is_identity() {
        let capsule = full_capsule();
        assert_eq!(ErrorCapsule::capture(&capsule), capsule);
        assert_eq!(ErrorCapsule::capture_typed(&capsule), capsule);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("worker reported failure")]
    struct RemoteFailure {
        #[source]
        source: ErrorCapsule,
    }

    #[test]
    fn capsule_inside_a_chain_is_kept_whole() {
        let err = RemoteFailure {
            source: full_capsule(),
        };
        let capsule = ErrorCapsule::capture_typed(&err);
        assert_eq!(capsule.cls_name.as_deref(), Some("RemoteFailure"));
        assert_eq!(capsule.cause.as_deref(), Some(&full_capsule()));
    }
}
