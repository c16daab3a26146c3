//! Deployment environment of a service, selected through `APP_ENVIRONMENT`.

use std::{env, fmt, io, str::FromStr};

const APP_ENVIRONMENT: &str = "APP_ENVIRONMENT";

/// Picks the configuration file layered over `base.yaml` and the log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Staging,
    Dev,
}

impl Environment {
    const ALL: [Environment; 3] = [Environment::Prod, Environment::Staging, Environment::Dev];

    /// Name used in `APP_ENVIRONMENT` and as the configuration file stem.
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }

    /// Reads `APP_ENVIRONMENT`, falling back to [`Environment::Prod`] when it is unset.
    pub fn load() -> io::Result<Environment> {
        match env::var(APP_ENVIRONMENT) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::Prod),
        }
    }

    pub fn set(&self) {
        unsafe { env::set_var(APP_ENVIRONMENT, self.name()) }
    }

    /// Staging runs with the production log setup.
    pub fn is_prod(&self) -> bool {
        !matches!(self, Environment::Dev)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_lowercase();

        Environment::ALL
            .into_iter()
            .find(|environment| environment.name() == name)
            .ok_or_else(|| {
                io::Error::other(format!(
                    "unsupported environment `{s}`, expected one of prod, staging or dev"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_names_case_insensitively() {
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(
            "staging".parse::<Environment>().unwrap(),
            Environment::Staging
        );
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn only_dev_logs_to_the_terminal() {
        assert!(Environment::Staging.is_prod());
        assert!(Environment::Prod.is_prod());
        assert!(!Environment::Dev.is_prod());
    }
}
