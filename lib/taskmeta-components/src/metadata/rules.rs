use super::{
    parser::{match_chronos_job, match_marathon_app, parse_key_value, ChronosJobPattern},
    Framework, TaskMetadata,
};

/// An update to [`TaskMetadata`] produced by classifying a single environment string.
///
/// The task ID is tracked on its own. The framework, app, and Chronos task type describe one framework marker and are
/// always replaced together, so a later marker never inherits fields from an earlier one.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum MetadataUpdate {
    TaskId(String),
    Framework {
        framework: Framework,
        app: Option<String>,
        chronos_task_type: Option<String>,
    },
}

impl MetadataUpdate {
    pub(super) fn apply_to(self, metadata: &mut TaskMetadata) {
        match self {
            Self::TaskId(task_id) => metadata.task_id = Some(task_id),
            Self::Framework {
                framework,
                app,
                chronos_task_type,
            } => {
                metadata.framework = Some(framework);
                metadata.app = app;
                metadata.chronos_task_type = chronos_task_type;
            }
        }
    }
}

/// A rule that recognizes one family of environment variables and extracts metadata from it.
pub(super) struct ClassifierRule {
    pub(super) name: &'static str,
    pub(super) matches: fn(&str) -> bool,
    pub(super) classify: fn(&str, &ChronosJobPattern) -> MetadataUpdate,
}

/// Classifier rules, in priority order.
///
/// An environment string is classified by the first rule that matches it.
pub(super) const RULES: [ClassifierRule; 3] = [
    ClassifierRule {
        name: "mesos_task_id",
        matches: is_task_id,
        classify: classify_task_id,
    },
    ClassifierRule {
        name: "marathon_app_id",
        matches: is_marathon_app_id,
        classify: classify_marathon_app_id,
    },
    ClassifierRule {
        name: "chronos_job_name",
        matches: is_chronos_job_name,
        classify: classify_chronos_job_name,
    },
];

// Chronos reports the task ID variable in lowercase, Marathon in uppercase.
fn is_task_id(raw: &str) -> bool {
    raw.to_ascii_uppercase().contains("MESOS_TASK_ID")
}

fn classify_task_id(raw: &str, _: &ChronosJobPattern) -> MetadataUpdate {
    MetadataUpdate::TaskId(parse_key_value(raw).to_string())
}

fn is_marathon_app_id(raw: &str) -> bool {
    raw.contains("MARATHON_APP_ID")
}

fn classify_marathon_app_id(raw: &str, _: &ChronosJobPattern) -> MetadataUpdate {
    MetadataUpdate::Framework {
        framework: Framework::Marathon,
        app: match_marathon_app(parse_key_value(raw)).map(str::to_string),
        chronos_task_type: None,
    }
}

fn is_chronos_job_name(raw: &str) -> bool {
    raw.contains("CHRONOS_JOB_NAME")
}

fn classify_chronos_job_name(raw: &str, pattern: &ChronosJobPattern) -> MetadataUpdate {
    let job = match_chronos_job(parse_key_value(raw), pattern);
    MetadataUpdate::Framework {
        framework: Framework::Chronos,
        app: job.as_ref().map(|job| job.app.to_string()),
        chronos_task_type: job.map(|job| job.task_type.to_string()),
    }
}

/// Classifies a single environment string, returning the name of the matching rule and its update.
pub(super) fn classify(raw: &str, chronos_pattern: &ChronosJobPattern) -> Option<(&'static str, MetadataUpdate)> {
    RULES
        .iter()
        .find(|rule| (rule.matches)(raw))
        .map(|rule| (rule.name, (rule.classify)(raw, chronos_pattern)))
}
