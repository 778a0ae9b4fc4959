//! Log-annotation severities.
//!
//! `WARNING` and `DEBUG` show up in the legacy surface alongside the eight
//! lifecycle states, but they are not lifecycle states: they only colour log
//! call sites. Keeping them in their own enum avoids ever comparing a
//! [`crate::module::ModuleState`] against a logging concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Warning,
    Debug,
}

impl std::fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Debug => write!(f, "DEBUG"),
        }
    }
}
