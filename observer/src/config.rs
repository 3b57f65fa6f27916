//! Listener option normalization.
//!
//! Registrations accept several shorthand forms for a listener's invocation
//! policy. All of them are reduced here to one [`CallbackConfig`]:
//!
//! | Input                            | Meaning                       |
//! |----------------------------------|-------------------------------|
//! | `ListenerConfig::None`           | all defaults                  |
//! | `ListenerConfig::Single(bool)`   | `single = value`              |
//! | `ListenerConfig::Delay(ms)`      | `delay = ms`                  |
//! | `ListenerConfig::Options(..)`    | typed options object          |
//! | `ListenerConfig::Object(json)`   | options object, merged onto the defaults |

use crate::error::{ConfigError, ConfigResult};
use crate::handler::{Arg, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;

/// Deep-merges `source` into `target`.
///
/// Objects are merged key by key, recursively. Any other source value
/// replaces the target with a deep copy of itself.
pub fn merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Typed listener options.
///
/// Timing values are milliseconds; `0` disables the corresponding policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerOptions {
    /// Arguments prepended to every invocation.
    pub args: Vec<Value>,
    /// Fire at most once.
    pub single: bool,
    /// Throttle window opened after each fire.
    pub buffer: u64,
    /// Delay between a broadcast and the invocation it triggers.
    pub delay: u64,
}

impl ListenerOptions {
    /// Creates options with every policy disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fixed leading arguments.
    pub fn with_args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Makes the listener single-fire.
    pub fn with_single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    /// Sets the throttle window in milliseconds.
    pub fn with_buffer(mut self, ms: u64) -> Self {
        self.buffer = ms;
        self
    }

    /// Sets the delay in milliseconds.
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay = ms;
        self
    }
}

/// The shorthand forms a listener configuration may take.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ListenerConfig {
    /// No configuration: every policy disabled.
    #[default]
    None,
    /// Boolean shorthand for `single`.
    Single(bool),
    /// Numeric shorthand for `delay`, in milliseconds.
    Delay(u64),
    /// Typed options.
    Options(ListenerOptions),
    /// An options object, deep-merged onto the defaults.
    Object(Value),
}

impl ListenerConfig {
    /// Returns the object form of this config with `key` set to `value`.
    ///
    /// Shorthands expand to the option they stand for. Non-object values and
    /// options that fail to serialize are discarded.
    pub(crate) fn with_option(self, key: &str, value: Value) -> Self {
        let mut object = match self {
            ListenerConfig::Single(single) => {
                Map::from_iter([("single".to_string(), Value::Bool(single))])
            }
            ListenerConfig::Delay(ms) => Map::from_iter([("delay".to_string(), Value::from(ms))]),
            ListenerConfig::Options(options) => match serde_json::to_value(options) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            ListenerConfig::Object(Value::Object(map)) => map,
            _ => Map::new(),
        };

        object.insert(key.to_string(), value);
        ListenerConfig::Object(Value::Object(object))
    }
}

impl From<bool> for ListenerConfig {
    fn from(single: bool) -> Self {
        ListenerConfig::Single(single)
    }
}

impl From<u64> for ListenerConfig {
    fn from(delay: u64) -> Self {
        ListenerConfig::Delay(delay)
    }
}

impl From<ListenerOptions> for ListenerConfig {
    fn from(options: ListenerOptions) -> Self {
        ListenerConfig::Options(options)
    }
}

impl From<Value> for ListenerConfig {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(single) => ListenerConfig::Single(single),
            Value::Number(number) => ListenerConfig::Delay(millis(&Value::Number(number))),
            Value::Object(map) => ListenerConfig::Object(Value::Object(map)),
            _ => ListenerConfig::None,
        }
    }
}

impl From<()> for ListenerConfig {
    fn from(_: ()) -> Self {
        ListenerConfig::None
    }
}

/// The canonical registration record every listener is built from.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Arguments prepended to every invocation.
    pub args: Vec<Arg>,
    /// The value the listener executes against.
    pub ctx: Context,
    /// Fire at most once.
    pub single: bool,
    /// The listener is a method of its owning observer.
    pub internal: bool,
    /// Throttle window; zero disables throttling.
    pub buffer: Duration,
    /// Invocation delay; zero invokes synchronously.
    pub delay: Duration,
}

impl CallbackConfig {
    /// Creates a config with every policy disabled.
    pub fn new(ctx: Context) -> Self {
        Self {
            args: Vec::new(),
            ctx,
            single: false,
            internal: false,
            buffer: Duration::ZERO,
            delay: Duration::ZERO,
        }
    }

    /// Normalizes a listener config, falling back to the defaults when the
    /// input cannot be used.
    pub fn normalize(config: &ListenerConfig, ctx: Context, internal: bool) -> Self {
        match Self::try_normalize(config, ctx.clone(), internal) {
            Ok(normalized) => normalized,
            Err(error) => {
                warn!(%error, "ignoring malformed listener options");
                let mut defaults = Self::new(ctx);
                defaults.internal = internal;
                defaults
            }
        }
    }

    /// Normalizes a listener config.
    pub fn try_normalize(
        config: &ListenerConfig,
        ctx: Context,
        internal: bool,
    ) -> ConfigResult<Self> {
        let mut normalized = Self::new(ctx);
        normalized.internal = internal;

        match config {
            ListenerConfig::None => {}
            ListenerConfig::Single(single) => normalized.single = *single,
            ListenerConfig::Delay(ms) => normalized.delay = Duration::from_millis(*ms),
            ListenerConfig::Options(options) => {
                normalized.apply(&serde_json::to_value(options)?)?;
            }
            ListenerConfig::Object(source) => normalized.apply(source)?,
        }

        Ok(normalized)
    }

    /// Sets the fixed leading arguments.
    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.args = args;
        self
    }

    /// Makes the listener single-fire.
    pub fn with_single(mut self, single: bool) -> Self {
        self.single = single;
        self
    }

    /// Sets the throttle window.
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Sets the invocation delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn apply(&mut self, source: &Value) -> ConfigResult<()> {
        let mut merged = defaults();
        merge(&mut merged, source);

        let Value::Object(fields) = &merged else {
            return Err(ConfigError::options(&merged));
        };

        self.args = fields
            .get("args")
            .and_then(Value::as_array)
            .map(|args| args.iter().cloned().map(Arg::Value).collect())
            .unwrap_or_default();
        self.single = fields.get("single").is_some_and(truthy);
        self.buffer = Duration::from_millis(fields.get("buffer").map(millis).unwrap_or(0));
        self.delay = Duration::from_millis(fields.get("delay").map(millis).unwrap_or(0));

        Ok(())
    }
}

fn defaults() -> Value {
    serde_json::json!({
        "args": [],
        "single": false,
        "buffer": 0,
        "delay": 0,
    })
}

/// Reads a flag the way a loose boolean test would: `null`, `false`, zero
/// and the empty string are false, everything else is true.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Reads a millisecond count, clamping negatives and non-numbers to zero.
/// Numeric strings are parsed.
fn millis(value: &Value) -> u64 {
    if let Some(ms) = value.as_u64() {
        return ms;
    }

    let ms = match value {
        Value::String(text) => text.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    };

    match ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => ms.floor() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        Context::value("ctx")
    }

    #[test]
    fn test_merge_is_deep() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "list": [1, 2]});
        merge(&mut target, &json!({"a": {"c": 3}, "list": [9], "d": true}));

        assert_eq!(
            target,
            json!({"a": {"b": 1, "c": 3}, "list": [9], "d": true})
        );
    }

    #[test]
    fn test_shorthands() {
        let single = CallbackConfig::normalize(&true.into(), ctx(), false);
        assert!(single.single);
        assert_eq!(single.delay, Duration::ZERO);

        let delayed = CallbackConfig::normalize(&250_u64.into(), ctx(), false);
        assert!(!delayed.single);
        assert_eq!(delayed.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_defaults_for_missing_config() {
        let config = CallbackConfig::normalize(&ListenerConfig::None, ctx(), false);

        assert!(config.args.is_empty());
        assert!(!config.single);
        assert!(!config.internal);
        assert_eq!(config.buffer, Duration::ZERO);
        assert_eq!(config.delay, Duration::ZERO);
    }

    #[test]
    fn test_object_config() {
        let config = CallbackConfig::normalize(
            &json!({"args": [1, "two"], "buffer": 50, "single": true}).into(),
            ctx(),
            true,
        );

        assert_eq!(config.args, vec![Arg::from(1), Arg::from("two")]);
        assert_eq!(config.buffer, Duration::from_millis(50));
        assert!(config.single);
        assert!(config.internal);
    }

    #[test]
    fn test_args_forced_to_sequence() {
        let config = CallbackConfig::normalize(&json!({"args": "nope"}).into(), ctx(), false);
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_bad_timings_clamp_to_zero() {
        let config = CallbackConfig::normalize(
            &json!({"buffer": -20, "delay": "soon"}).into(),
            ctx(),
            false,
        );
        assert_eq!(config.buffer, Duration::ZERO);
        assert_eq!(config.delay, Duration::ZERO);

        let fractional = CallbackConfig::normalize(&json!({"delay": 12.7}).into(), ctx(), false);
        assert_eq!(fractional.delay, Duration::from_millis(12));
    }

    #[test]
    fn test_loose_values_are_coerced() {
        let config = CallbackConfig::normalize(
            &json!({"single": 1, "delay": "50", "buffer": " 12.5 "}).into(),
            ctx(),
            false,
        );
        assert!(config.single);
        assert_eq!(config.delay, Duration::from_millis(50));
        assert_eq!(config.buffer, Duration::from_millis(12));

        for falsy in [json!(0), json!(""), json!(null), json!(false)] {
            let config = CallbackConfig::normalize(&json!({"single": falsy}).into(), ctx(), false);
            assert!(!config.single);
        }

        let config = CallbackConfig::normalize(&json!({"single": "yes"}).into(), ctx(), false);
        assert!(config.single);
    }

    #[test]
    fn test_typed_options() {
        let options = ListenerOptions::new()
            .with_args([true])
            .with_delay(100)
            .with_buffer(10);
        let config = CallbackConfig::normalize(&options.into(), ctx(), false);

        assert_eq!(config.args, vec![Arg::from(true)]);
        assert_eq!(config.delay, Duration::from_millis(100));
        assert_eq!(config.buffer, Duration::from_millis(10));
    }

    #[test]
    fn test_non_object_falls_back_to_defaults() {
        let result = CallbackConfig::try_normalize(
            &ListenerConfig::Object(json!([1, 2, 3])),
            ctx(),
            false,
        );
        assert!(matches!(result, Err(ConfigError::Options { found: "an array" })));

        let config =
            CallbackConfig::normalize(&ListenerConfig::Object(json!([1, 2, 3])), ctx(), false);
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_with_option_expands_shorthands() {
        let config = ListenerConfig::Single(true).with_option("buffer", json!(5));
        assert_eq!(config, ListenerConfig::Object(json!({"single": true, "buffer": 5})));

        let config = ListenerConfig::Object(json!([1])).with_option("delay", json!(2));
        assert_eq!(config, ListenerConfig::Object(json!({"delay": 2})));

        let config = ListenerConfig::Options(ListenerOptions::new().with_delay(3))
            .with_option("single", json!(true));
        let normalized = CallbackConfig::normalize(&config, ctx(), false);
        assert!(normalized.single);
        assert_eq!(normalized.delay, Duration::from_millis(3));
    }

    #[test]
    fn test_from_json_value_shorthands() {
        assert_eq!(ListenerConfig::from(json!(true)), ListenerConfig::Single(true));
        assert_eq!(ListenerConfig::from(json!(40)), ListenerConfig::Delay(40));
        assert_eq!(ListenerConfig::from(json!("x")), ListenerConfig::None);
        assert_eq!(ListenerConfig::from(()), ListenerConfig::None);
    }
}
