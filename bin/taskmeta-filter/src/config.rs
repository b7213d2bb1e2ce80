use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use taskmeta_config::{ConfigurationLoader, GenericConfiguration};

/// Prefix of environment variables that override configuration values.
const ENVIRONMENT_PREFIX: &str = "TASKMETA";

/// Enriches newline-delimited JSON log events with Mesos task metadata.
#[derive(Clone, Debug, Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// Files with a `.json` extension are read as JSON, anything else as YAML.
    ///
    /// Every setting has a default, so the file is optional. Settings can also be overridden with environment
    /// variables prefixed by `TASKMETA_`, such as `TASKMETA_CACHE_TTL`.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Path to a JSON file mapping container IDs to their environment variables.
    ///
    /// When set, container environments are read from this file instead of from the Docker Engine API.
    #[arg(long)]
    pub environment_file: Option<PathBuf>,
}

/// Loads the configuration from the given file, if any, and the environment.
pub fn load_configuration(config_path: Option<&PathBuf>) -> Result<GenericConfiguration, anyhow::Error> {
    let mut loader = ConfigurationLoader::default();
    if let Some(path) = config_path {
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let result = if is_json {
            loader.from_json(path)
        } else {
            loader.from_yaml(path)
        };
        loader = result.with_context(|| format!("Failed to load configuration file '{}'.", path.display()))?;
    }

    let config = loader
        .from_environment(ENVIRONMENT_PREFIX)
        .context("Failed to load configuration from environment variables.")?
        .into_generic();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn cli_arguments() {
        let cli = Cli::parse_from(["taskmeta-filter", "-c", "/etc/taskmeta.yaml", "--environment-file", "envs.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/taskmeta.yaml")));
        assert_eq!(cli.environment_file, Some(PathBuf::from("envs.json")));

        let cli = Cli::parse_from(["taskmeta-filter"]);
        assert_eq!(cli.config, None);
        assert_eq!(cli.environment_file, None);
    }

    #[test]
    fn configuration_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"cache_size: 10\nnamespace_env_var: ns\n").unwrap();

        let config = load_configuration(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.get_typed::<usize>("cache_size").unwrap(), 10);
        assert_eq!(config.get_typed::<String>("namespace_env_var").unwrap(), "ns");
    }

    #[test]
    fn json_configuration_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"cache_size": 20, "merge_json_log": false}"#).unwrap();

        let config = load_configuration(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.get_typed::<usize>("cache_size").unwrap(), 20);
        assert!(!config.get_typed::<bool>("merge_json_log").unwrap());
    }

    #[test]
    fn missing_configuration_file() {
        let result = load_configuration(Some(&PathBuf::from("/nonexistent/taskmeta.yaml")));
        assert!(result.is_err());
    }
}
