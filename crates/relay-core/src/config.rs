use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Trait for loading service configuration from environment variables.
///
/// Implementors derive `serde::Deserialize`, pick a variable prefix and call
/// `Config::from_env()` at startup. Missing required variables and values that
/// fail to deserialize or validate are reported as [`ConfigError`].
pub trait Config: Sized + DeserializeOwned {
    /// Prefix stripped from variable names, e.g. `RELAY_`.
    const PREFIX: &'static str;

    fn from_env() -> Result<Self, ConfigError> {
        let config: Self = envy::prefixed(Self::PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`Config::from_env`] but reads from an explicit variable set.
    fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(Self::PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}
