//! The migration command vocabulary accepted by the runner.

use std::fmt;

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    Up,
    UpByOne,
    UpTo(i64),
    Down,
    DownTo(i64),
    Redo,
    Reset,
    Status,
    Version,
    Validate,
}

impl MigrationCommand {
    pub const NAMES: [&'static str; 10] = [
        "up", "up-by-one", "up-to", "down", "down-to", "redo", "reset", "status", "version",
        "validate",
    ];

    /// Parse a command keyword and its trailing arguments.
    pub fn parse(name: &str, args: &[String]) -> Result<Self, RunError> {
        let name = name.trim();
        let command = match name {
            "up" => Self::Up,
            "up-by-one" => Self::UpByOne,
            "up-to" => Self::UpTo(Self::version_arg(name, args)?),
            "down" => Self::Down,
            "down-to" => Self::DownTo(Self::version_arg(name, args)?),
            "redo" => Self::Redo,
            "reset" => Self::Reset,
            "status" => Self::Status,
            "version" => Self::Version,
            "validate" => Self::Validate,
            other => return Err(RunError::UnknownCommand(other.to_string())),
        };

        if !matches!(command, Self::UpTo(_) | Self::DownTo(_)) && !args.is_empty() {
            return Err(RunError::InvalidArguments {
                command: name.to_string(),
                reason: format!("takes no arguments, got {}", args.len()),
            });
        }

        Ok(command)
    }

    fn version_arg(name: &str, args: &[String]) -> Result<i64, RunError> {
        let invalid = |reason: String| RunError::InvalidArguments {
            command: name.to_string(),
            reason,
        };

        match args {
            [version] => {
                let version: i64 = version
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("{:?} is not a migration version", version)))?;
                if version < 0 {
                    return Err(invalid(format!("version {} is negative", version)));
                }
                Ok(version)
            }
            [] => Err(invalid("missing target version".to_string())),
            _ => Err(invalid(format!("expected one version, got {}", args.len()))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::UpByOne => "up-by-one",
            Self::UpTo(_) => "up-to",
            Self::Down => "down",
            Self::DownTo(_) => "down-to",
            Self::Redo => "redo",
            Self::Reset => "reset",
            Self::Status => "status",
            Self::Version => "version",
            Self::Validate => "validate",
        }
    }

    /// Commands that only read the ledger and never touch the schema.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Status | Self::Version | Self::Validate)
    }
}

impl fmt::Display for MigrationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpTo(version) | Self::DownTo(version) => write!(f, "{} {}", self.name(), version),
            _ => f.write_str(self.name()),
        }
    }
}
