//! Crate error taxonomy plus a small `.context()` ergonomic layer built on
//! a `FromMessage`/`impl_context!` convention.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    #[error("topic cache not synchronized")]
    NotSynchronized,

    #[error("server response {code} {text}")]
    ServerResponse {
        code: u16,
        text: String,
        what: Option<String>,
    },

    #[error("failed to encode message: {0}")]
    JsonEncode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    JsonDecode(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn server_response(code: u16, text: impl Into<String>, what: Option<String>) -> Self {
        Self::ServerResponse {
            code,
            text: text.into(),
            what,
        }
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::server_response(504, "timeout", None)
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for a crate's error type, then invoke [`impl_context!`] to
/// get `.context()`/`.with_context()` on `Result`/`Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generates a crate-local `Context` trait with `.context()`/`.with_context()`
/// methods on `Result` and `Option`.
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as FromMessage>::from_message(f().into()))
            }
        }
    };
}

impl_context!();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_504() {
        let err = Error::timeout();
        match err {
            Error::ServerResponse { code, text, what } => {
                assert_eq!(code, 504);
                assert_eq!(text, "timeout");
                assert!(what.is_none());
            },
            _ => panic!("expected ServerResponse"),
        }
    }

    #[test]
    fn context_wraps_result_err() {
        fn fails() -> std::result::Result<(), std::num::ParseIntError> {
            "nope".parse::<i32>().map(|_| ())
        }
        let wrapped: Result<()> = fails().context("parsing count");
        assert!(wrapped.is_err());
        assert!(wrapped.unwrap_err().to_string().contains("parsing count"));
    }

    #[test]
    fn context_wraps_none() {
        let wrapped: Result<i32> = None::<i32>.context("missing value");
        assert!(wrapped.is_err());
    }
}
