//!
//! The orthostate error taxonomy.
//!
//! | Condition | Type | Policy |
//! |-----------|------|--------|
//! | Missing client/component, malformed definition | [`ConfigurationError`] | Fatal, never retried |
//! | A user hook returned an error | [`HookError`] | Fatal for the consumer loop |
//! | Anything crossing the scheduler boundary | [`ProcessError`] | Terminates the consumer loop |
//!
//! Events that match no transition, terminal events for a retired scope and
//! request timeouts are not errors.  The first two are diagnostics recorded by
//! the state machine, the last one is an ordinary [`Event`](crate::Event).
//!

use std::borrow::Cow;

use thiserror::Error;

/// A state machine definition or scope that cannot be constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required client was never created by any orthogonal of the scope
    #[error("scope {scope} requires client `{dependency}` but no orthogonal created one")]
    MissingClient {
        /// The mode-state whose scope was being constructed
        scope: String,
        /// The type name of the missing client
        dependency: &'static str,
    },
    /// A required component was never created in the scope
    #[error("scope {scope} requires component `{dependency}` but none was created")]
    MissingComponent {
        /// The mode-state whose scope was being constructed
        scope: String,
        /// The type name of the missing component
        dependency: &'static str,
    },
    /// A dependency key was used after its scope was torn down or in a
    /// different scope than the one that resolved it
    #[error("key for `{dependency}` belongs to generation {key_generation}, live generation is {live_generation}")]
    StaleKey {
        /// The type name of the dependency
        dependency: &'static str,
        /// The generation that resolved the key
        key_generation: u64,
        /// The generation of the scope the key was used against
        live_generation: u64,
    },
    /// Two states or mode-states share an identity
    #[error("state {0} is declared more than once")]
    DuplicateState(String),
    /// A transition targets a state nobody declared
    #[error("state {from} declares a transition to unknown state {target}")]
    UnknownState {
        /// The state declaring the reaction
        from: String,
        /// The undeclared target
        target: String,
    },
    /// A mode-state declared the same orthogonal slot twice
    #[error("mode-state {mode} declares orthogonal `{slot}` more than once")]
    DuplicateOrthogonal {
        /// The mode-state
        mode: String,
        /// The slot name
        slot: &'static str,
    },
    /// A state configures an orthogonal slot its mode-state does not own
    #[error("state {state} configures orthogonal `{slot}` which mode-state {mode} does not declare")]
    UnknownOrthogonal {
        /// The configuring state
        state: String,
        /// The owning mode-state
        mode: String,
        /// The slot name
        slot: &'static str,
    },
    /// A mode-state has no initial inner state
    #[error("mode-state {0} declares no initial state")]
    MissingInitialState(String),
    /// The machine has no initial mode-state
    #[error("state machine declares no initial mode-state")]
    MissingInitialModeState,
}

/// A failure returned by user code running inside a hook.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    /// The hook could not resolve one of its dependencies
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The hook failed for a domain reason
    #[error("{0}")]
    Failed(Cow<'static, str>),
}

impl HookError {
    /// Create a domain failure with the given message
    pub fn failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Failed(message.into())
    }
}

/// An error that escaped event application and must stop the consumer loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// A scope could not be constructed
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// A hook failed while the machine was transitioning
    #[error("{hook} hook failed in {location}: {source}")]
    Hook {
        /// Which hook failed (`on_entry`, `on_exit`, `action`, ...)
        hook: &'static str,
        /// The state, behavior or client that owned the hook
        location: String,
        /// The underlying failure
        #[source]
        source: HookError,
    },
}

impl ProcessError {
    /// Wrap a hook failure with where it happened.
    ///
    /// Configuration failures raised from inside a hook keep their
    /// configuration classification.
    pub fn hook(hook: &'static str, location: impl Into<String>, source: HookError) -> Self {
        match source {
            HookError::Configuration(error) => Self::Configuration(error),
            source => Self::Hook {
                hook,
                location: location.into(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_error_keeps_configuration_classification() {
        let source = HookError::from(ConfigurationError::MissingClient {
            scope: String::from("MsRun"),
            dependency: "NavClient",
        });

        let error = ProcessError::hook("runtime_configure", "StNavigate", source);
        assert!(matches!(error, ProcessError::Configuration(ConfigurationError::MissingClient { .. })));
    }

    #[test]
    fn test_hook_error_display() {
        let error = ProcessError::hook("on_entry", "StRotate", HookError::failed("motor offline"));
        assert_eq!(error.to_string(), "on_entry hook failed in StRotate: motor offline");
    }
}
