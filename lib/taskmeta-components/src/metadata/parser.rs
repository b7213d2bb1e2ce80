//! Parsing of raw environment strings and orchestrator identifiers.

use std::sync::LazyLock;

use regex::Regex;
use snafu::{ResultExt as _, Snafu};

/// Default pattern for Chronos job names: `<app>-<task_type>-<run>-<epoch>`.
pub const DEFAULT_CHRONOS_TASK_REGEX: &str =
    r"^(?P<app>[a-z0-9]([-a-z0-9.]*[a-z0-9]))-(?P<task_type>[^-]+)-(?P<run>[^-]+)-(?P<epoc>[^-]+)$";

const APP_GROUP: &str = "app";
const TASK_TYPE_GROUP: &str = "task_type";

// The application is the final segment of the Marathon app path, which may end in a single slash.
static MARATHON_APP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?P<app>[a-z0-9](?:[-a-z0-9_.]*[a-z0-9])?)/?$").expect("Marathon app pattern is valid")
});

/// A Chronos job name pattern error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PatternError {
    /// The pattern is not a valid regular expression.
    #[snafu(display("invalid Chronos task pattern '{}': {}", pattern, source))]
    Compile {
        /// The offending pattern.
        pattern: String,

        /// Error source.
        source: regex::Error,
    },

    /// The pattern lacks a required named capture group.
    #[snafu(display("Chronos task pattern '{}' is missing the named capture group '{}'", pattern, group))]
    MissingGroup {
        /// The offending pattern.
        pattern: String,

        /// Name of the missing group.
        group: &'static str,
    },
}

/// A compiled pattern for parsing Chronos job names.
///
/// The pattern must define the named capture groups `app` and `task_type`. Deployments differ in how many
/// dash-delimited segments they append to job names, which is why the pattern is configurable.
#[derive(Clone, Debug)]
pub struct ChronosJobPattern {
    regex: Regex,
}

impl ChronosJobPattern {
    /// Compiles the given pattern.
    ///
    /// # Errors
    ///
    /// If the pattern is not a valid regular expression, or does not define both the `app` and `task_type` named
    /// capture groups, an error is returned.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(pattern).context(Compile { pattern })?;

        for group in [APP_GROUP, TASK_TYPE_GROUP] {
            if !regex.capture_names().flatten().any(|name| name == group) {
                return Err(PatternError::MissingGroup {
                    pattern: pattern.to_string(),
                    group,
                });
            }
        }

        Ok(Self { regex })
    }

    /// Returns the source pattern.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for ChronosJobPattern {
    fn default() -> Self {
        Self::new(DEFAULT_CHRONOS_TASK_REGEX).expect("default Chronos task pattern is valid")
    }
}

/// A Chronos job name split into its application and task type.
#[derive(Debug, Eq, PartialEq)]
pub struct ChronosJob<'a> {
    /// Application name.
    pub app: &'a str,

    /// Task type.
    pub task_type: &'a str,
}

/// Returns the value of a raw `KEY=VALUE` environment string.
///
/// Everything after the first `=` is the value, so values may themselves contain `=`. If there is no `=` at all, the
/// input is returned unchanged.
pub fn parse_key_value(raw: &str) -> &str {
    match raw.split_once('=') {
        Some((_, value)) => value,
        None => raw,
    }
}

/// Extracts the application name from a Marathon app ID, such as `/hello-world` or `/group/hello-world`.
///
/// The application name is the final path segment: a lowercase alphanumeric token which may contain `-`, `_`, and `.`
/// between its first and last characters.
pub fn match_marathon_app(value: &str) -> Option<&str> {
    MARATHON_APP_REGEX
        .captures(value)
        .and_then(|captures| captures.name(APP_GROUP))
        .map(|app| app.as_str())
}

/// Splits a Chronos job name into its application and task type using the given pattern.
///
/// Returns `None` unless the pattern matches and both the `app` and `task_type` groups captured a value.
pub fn match_chronos_job<'a>(value: &'a str, pattern: &ChronosJobPattern) -> Option<ChronosJob<'a>> {
    let captures = pattern.regex.captures(value)?;
    let app = captures.name(APP_GROUP)?.as_str();
    let task_type = captures.name(TASK_TYPE_GROUP)?.as_str();
    Some(ChronosJob { app, task_type })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(parse_key_value("MARATHON_APP_ID=/hello-world"), "/hello-world");
        assert_eq!(parse_key_value("OPTS=-Dfoo=bar -Dbaz=qux"), "-Dfoo=bar -Dbaz=qux");
        assert_eq!(parse_key_value("EMPTY="), "");
        assert_eq!(parse_key_value("NO_SEPARATOR"), "NO_SEPARATOR");
    }

    #[test]
    fn marathon_app() {
        assert_eq!(match_marathon_app("/hello-world"), Some("hello-world"));
        assert_eq!(match_marathon_app("/prod/payments/api.v2"), Some("api.v2"));
        assert_eq!(match_marathon_app("/a"), Some("a"));
        assert_eq!(match_marathon_app("/snake_case-app"), Some("snake_case-app"));

        assert_eq!(match_marathon_app("hello-world"), None);
        assert_eq!(match_marathon_app("/Hello-World"), None);
        assert_eq!(match_marathon_app("/-leading"), None);
        assert_eq!(match_marathon_app("/trailing-"), None);
    }

    #[test]
    fn marathon_app_with_trailing_slash() {
        assert_eq!(match_marathon_app("/hello-world/"), Some("hello-world"));
        assert_eq!(match_marathon_app("/prod/hello-world/"), Some("hello-world"));
        assert_eq!(match_marathon_app("/hello-world//"), None);
        assert_eq!(match_marathon_app("/"), None);
    }

    #[test]
    fn chronos_job_default_pattern() {
        let pattern = ChronosJobPattern::default();

        assert_eq!(
            match_chronos_job("some-task-app2-deployTasks-1-1448508194", &pattern),
            Some(ChronosJob {
                app: "some-task-app2",
                task_type: "deployTasks",
            })
        );
        assert_eq!(
            match_chronos_job("etl.v2-nightly-7-1448508194", &pattern),
            Some(ChronosJob {
                app: "etl.v2",
                task_type: "nightly",
            })
        );

        assert_eq!(match_chronos_job("recurring-transaction3", &pattern), None);
        assert_eq!(match_chronos_job("Upper-deployTasks-1-1448508194", &pattern), None);
    }

    #[test]
    fn chronos_job_custom_pattern() {
        // Six dash-delimited segments: app, date, time, task type, run, epoch.
        let pattern = ChronosJobPattern::new(
            r"(?P<app>[a-z0-9]([-a-z0-9]*[a-z0-9]))-(?P<date>[^-]+)-(?P<time>[^-]+)-(?P<task_type>[^-]+)-(?P<run>[^-]+)-(?P<epoc>[^-]+)",
        )
        .unwrap();

        assert_eq!(
            match_chronos_job("billing-20151126-0309-deployTasks-1-1448508194", &pattern),
            Some(ChronosJob {
                app: "billing",
                task_type: "deployTasks",
            })
        );
    }

    #[test]
    fn chronos_pattern_validation() {
        assert!(matches!(
            ChronosJobPattern::new("(?P<app>[a-z]+"),
            Err(PatternError::Compile { .. })
        ));
        assert!(matches!(
            ChronosJobPattern::new("^(?P<app>[a-z]+)-(?P<kind>[^-]+)$"),
            Err(PatternError::MissingGroup {
                group: "task_type",
                ..
            })
        ));

        let pattern = ChronosJobPattern::new("^(?<app>[a-z]+)-(?<task_type>[^-]+)$").unwrap();
        assert_eq!(pattern.as_str(), "^(?<app>[a-z]+)-(?<task_type>[^-]+)$");
    }

    proptest! {
        #[test]
        fn property_test_key_value_keeps_everything_after_first_equals(
            key in "[A-Z_]{1,16}",
            value in "[ -~]{0,32}",
        ) {
            let raw = format!("{}={}", key, value);
            prop_assert_eq!(parse_key_value(&raw), value.as_str());
        }

        #[test]
        fn property_test_key_value_without_separator_is_identity(raw in "[^=]{0,32}") {
            prop_assert_eq!(parse_key_value(&raw), raw.as_str());
        }
    }
}
