//! Layered configuration loading for the PMem planner.
//!
//! Sources are merged in the order they are added, with later sources taking precedence over earlier ones. The merged
//! result is deserialized into whatever typed configuration the caller asks for.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{borrow::Cow, collections::HashSet, path::Path};

use figment::{
    error::Kind,
    providers::{Env, Serialized},
    Figment, Provider,
};
use pmem_error::GenericError;
use serde::Deserialize;
use snafu::Snafu;
use tracing::debug;

mod provider;
use self::provider::ResolvedProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A required field was missing from every configured source.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text describing the keys that would satisfy the missing field.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// A field held a value of the wrong type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Any other failure while reading or extracting configuration.
    #[snafu(display("Failed to load configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum LookupSource {
    Environment { prefix: String },
}

impl LookupSource {
    fn transform_key(&self, key: &str) -> String {
        match self {
            // The prefix is stored uppercased with its trailing underscore already attached.
            LookupSource::Environment { prefix } => format!("{}{}", prefix, key.replace('.', "_").to_uppercase()),
        }
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// A configuration loader that can pull from YAML files, JSON files, and prefixed environment variables.
///
/// Sources added later take precedence over sources added earlier, so the usual pattern is to add the configuration
/// file first and the environment last, allowing individual settings to be overridden without editing the file.
#[derive(Default)]
pub struct ConfigurationLoader {
    lookup_sources: HashSet<LookupSource>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let resolved_provider = ResolvedProvider::from_yaml(&path)
            .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
        self.providers.push(BoxedProvider(Box::new(resolved_provider)));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match ResolvedProvider::from_yaml(&path) {
            Ok(resolved_provider) => self.providers.push(BoxedProvider(Box::new(resolved_provider))),
            Err(e) => {
                debug!(
                    error = %e,
                    file_path = %path.as_ref().to_string_lossy(),
                    "Unable to read YAML configuration file. Ignoring."
                );
            }
        }
        self
    }

    /// Loads the given JSON configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or is not valid JSON, an error will be returned.
    pub fn from_json<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let resolved_provider = ResolvedProvider::from_json(&path)
            .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
        self.providers.push(BoxedProvider(Box::new(resolved_provider)));
        Ok(self)
    }

    /// Loads configuration from environment variables.
    ///
    /// An underscore is appended to the prefix if it does not already end with one, so a prefix of `pmem` matches
    /// `PMEM_DEFAULT_NAMESPACE_NAME_PREFIX`. Matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, or the environment could not be read, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // `Env` is not `Send + Sync`, so snapshot its values into a serialized provider.
        let values = Env::prefixed(&prefix)
            .data()
            .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
        if let Some(default_dict) = values.get(&figment::Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
            self.lookup_sources.insert(LookupSource::Environment { prefix });
        }
        Ok(self)
    }

    /// Consumes the loader, deserializing the merged configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let lookup_sources = self.lookup_sources;
        self.providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider))
            .extract()
            .map_err(|e| from_figment_error(&lookup_sources, e))
    }
}

fn from_figment_error(lookup_sources: &HashSet<LookupSource>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = lookup_sources
                .iter()
                .map(|source| source.transform_key(&field))
                .collect::<Vec<_>>();
            valid_keys.insert(0, field.to_string());

            let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));
            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::{ConfigurationError, ConfigurationLoader};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Settings {
        name_prefix: String,
        #[serde(default)]
        disabled: Vec<String>,
    }

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_then_json_later_source_wins() {
        let yaml = write_file(".yaml", "name_prefix: FromYaml\ndisabled: [grow_namespace]\n");
        let json = write_file(".json", r#"{ "name_prefix": "FromJson" }"#);

        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(yaml.path())
            .unwrap()
            .from_json(json.path())
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(
            settings,
            Settings {
                name_prefix: "FromJson".to_string(),
                disabled: vec!["grow_namespace".to_string()],
            }
        );
    }

    #[test]
    fn missing_yaml_is_ignored_by_try_variant() {
        let json = write_file(".json", r#"{ "name_prefix": "Vol" }"#);
        let settings: Settings = ConfigurationLoader::default()
            .try_from_yaml("/nonexistent/pmem-planner.yaml")
            .from_json(json.path())
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(settings.name_prefix, "Vol");
    }

    #[test]
    fn missing_yaml_is_an_error() {
        let result = ConfigurationLoader::default().from_yaml("/nonexistent/pmem-planner.yaml");
        assert!(matches!(result, Err(ConfigurationError::Generic { .. })));
    }

    #[test]
    fn empty_environment_prefix_rejected() {
        let result = ConfigurationLoader::default().from_environment("");
        assert!(matches!(result, Err(ConfigurationError::EmptyPrefix)));
    }

    #[test]
    fn environment_overrides_file() {
        let yaml = write_file(".yaml", "name_prefix: FromYaml\n");
        std::env::set_var("PMEM_CONFIG_TEST_OVERRIDE_NAME_PREFIX", "FromEnv");

        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(yaml.path())
            .unwrap()
            .from_environment("pmem_config_test_override")
            .unwrap()
            .into_typed()
            .unwrap();

        std::env::remove_var("PMEM_CONFIG_TEST_OVERRIDE_NAME_PREFIX");
        assert_eq!(settings.name_prefix, "FromEnv");
    }

    #[test]
    fn missing_field_mentions_environment_key() {
        std::env::set_var("PMEM_CONFIG_TEST_MISSING_UNRELATED", "1");

        let result = ConfigurationLoader::default()
            .from_environment("pmem_config_test_missing")
            .unwrap()
            .into_typed::<Settings>();

        std::env::remove_var("PMEM_CONFIG_TEST_MISSING_UNRELATED");
        match result {
            Err(ConfigurationError::MissingField { help_text, field }) => {
                assert_eq!(field, "name_prefix");
                assert!(help_text.contains("PMEM_CONFIG_TEST_MISSING_NAME_PREFIX"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
