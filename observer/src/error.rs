//! Error types for the observer.
//!
//! The public `Observer` surface never fails: malformed registrations are
//! logged and ignored. The fallible steps underneath (pattern compilation,
//! method resolution, option parsing) report through the types in this
//! module so that the reason is still available to callers who ask for it.

use thiserror::Error;

/// Errors that can occur during observer operations.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// A pattern could not be compiled into a matcher.
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// A listener registration could not be completed.
    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// Listener options could not be normalized.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A `before:destroy` listener stopped propagation and vetoed the destroy.
    #[error("Destroy vetoed by a before:destroy listener")]
    Vetoed,
}

/// Errors raised while compiling an event pattern.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The wildcard matcher failed to compile.
    #[error("Pattern compilation failed: {pattern}")]
    Compile {
        /// The pattern that failed to compile.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },
}

/// Errors raised while turning a listener value into a registration.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A method name did not resolve against the given context.
    #[error("Method `{name}` could not be resolved")]
    UnresolvedMethod {
        /// The method name that was looked up.
        name: String,
    },

    /// A batch entry used a key reserved for shared defaults.
    #[error("Key `{key}` is reserved in listener maps")]
    ReservedKey {
        /// The reserved key.
        key: String,
    },

    /// The observer has been destroyed and accepts no more listeners.
    #[error("Observer is destroyed")]
    Destroyed,
}

/// Errors raised while normalizing listener options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The options value was not an object after merging onto the defaults.
    #[error("Listener options must be an object, got {found}")]
    Options {
        /// A short description of the value that was found.
        found: &'static str,
    },

    /// Typed options could not be serialized into an options object.
    #[error("Listener options could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience type alias for observer results.
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Convenience type alias for pattern results.
pub type PatternResult<T> = Result<T, PatternError>;

/// Convenience type alias for registration results.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Convenience type alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl RegistrationError {
    /// Creates a new unresolved method error.
    pub fn unresolved_method<S: Into<String>>(name: S) -> Self {
        Self::UnresolvedMethod { name: name.into() }
    }

    /// Creates a new reserved key error.
    pub fn reserved_key<S: Into<String>>(key: S) -> Self {
        Self::ReservedKey { key: key.into() }
    }
}

impl ConfigError {
    /// Creates an options error describing the JSON value that was found.
    pub fn options(found: &serde_json::Value) -> Self {
        let found = match found {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "a boolean",
            serde_json::Value::Number(_) => "a number",
            serde_json::Value::String(_) => "a string",
            serde_json::Value::Array(_) => "an array",
            serde_json::Value::Object(_) => "an object",
        };
        Self::Options { found }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RegistrationError::unresolved_method("on_save");
        assert_eq!(error.to_string(), "Method `on_save` could not be resolved");

        let error = ConfigError::options(&serde_json::json!([1, 2]));
        assert_eq!(
            error.to_string(),
            "Listener options must be an object, got an array"
        );

        assert_eq!(
            ObserverError::Vetoed.to_string(),
            "Destroy vetoed by a before:destroy listener"
        );
    }

    #[test]
    fn test_error_conversion() {
        let error: ObserverError = RegistrationError::reserved_key("ctx").into();

        match error {
            ObserverError::Registration(RegistrationError::ReservedKey { key }) => {
                assert_eq!(key, "ctx");
            }
            _ => panic!("Expected registration error conversion"),
        }
    }
}
