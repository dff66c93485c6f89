use colored::Colorize;
use config::{ConfigError, SourceError};

#[derive(Debug)]
pub struct UxError {
    pub what: String,
    pub why: Option<String>,
    pub how_to_fix: Vec<String>,
    pub suggested_command: Option<String>,
}

impl UxError {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: None,
            how_to_fix: Vec::new(),
            suggested_command: None,
        }
    }

    pub fn why(mut self, reason: impl Into<String>) -> Self {
        self.why = Some(reason.into());
        self
    }

    pub fn fix(mut self, suggestion: impl Into<String>) -> Self {
        self.how_to_fix.push(suggestion.into());
        self
    }

    pub fn suggest(mut self, cmd: impl Into<String>) -> Self {
        self.suggested_command = Some(cmd.into());
        self
    }

    pub fn display(&self) {
        eprintln!();
        eprintln!("{} {}", "error:".red().bold(), self.what.white().bold());

        if let Some(why) = &self.why {
            eprintln!("       {}", why.dimmed());
        }

        if !self.how_to_fix.is_empty() {
            eprintln!();
            eprintln!("{}", "How to fix:".yellow().bold());
            for (i, fix) in self.how_to_fix.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, fix);
            }
        }

        if let Some(cmd) = &self.suggested_command {
            eprintln!();
            eprintln!("{}", "Try this:".green().bold());
            eprintln!("  $ {}", cmd.cyan());
        }
        eprintln!();
    }
}

impl std::fmt::Display for UxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.what)
    }
}

impl std::error::Error for UxError {}

pub fn missing_required(names: &[String]) -> UxError {
    names.iter().fold(
        UxError::new(format!("Missing required config parameters: {}", names.join(", ")))
            .why("Required attributes must resolve to a non-empty value")
            .suggest("layerconf trace <name> --attr <attr> --flat"),
        |err, name| err.fix(format!("Provide `{name}` in the config file, an env variable or --set")),
    )
}

pub fn source_failed(id: &str, source: &SourceError) -> UxError {
    let err = UxError::new(format!("Config source `{id}` failed"))
        .why(source.to_string());
    match source {
        SourceError::MissingToken { var } => err.fix(format!("Export {var}")),
        SourceError::Parse { path, .. } => {
            err.fix(format!("Fix the syntax of {}", path.display()))
        }
        SourceError::Remote { .. } | SourceError::Transport { .. } => err
            .fix("Check the service token and network access")
            .fix("Unset DOPPLER_TOKEN to skip remote secrets"),
        _ => err,
    }
}

/// Explain `err` on stderr.
pub fn report(err: &anyhow::Error) {
    let ux = match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::Source { id, source }) => source_failed(id, source),
        Some(config_err) => match config_err.missing_attributes() {
            Some(names) => missing_required(names),
            None => UxError::new(config_err.to_string()),
        },
        None => {
            let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
            let ux = UxError::new(err.to_string());
            if causes.is_empty() {
                ux
            } else {
                ux.why(causes.join(": "))
            }
        }
    };
    ux.display();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_ux_error_builder_chain() {
        let err = UxError::new("test error")
            .why("because reasons")
            .fix("try this")
            .fix("or this")
            .suggest("run command");

        assert_eq!(err.what, "test error");
        assert_eq!(err.why, Some("because reasons".to_string()));
        assert_eq!(err.how_to_fix, vec!["try this", "or this"]);
        assert_eq!(err.suggested_command, Some("run command".to_string()));
        assert_eq!(format!("{err}"), "test error");
    }

    #[test]
    fn test_missing_required_has_one_fix_per_name() {
        let err = missing_required(&["host".to_string(), "port".to_string()]);
        assert!(err.what.ends_with("host, port"));
        assert_eq!(err.how_to_fix.len(), 2);
    }

    #[test]
    fn test_source_failed_parse_error() {
        let source = SourceError::Parse {
            path: PathBuf::from("config/app.yml"),
            format: "YAML".to_string(),
            reason: "bad indent".to_string(),
        };
        let err = source_failed("yml", &source);
        assert!(err.what.contains("`yml`"));
        assert_eq!(err.how_to_fix, vec!["Fix the syntax of config/app.yml"]);
    }

    #[test]
    fn test_report_does_not_panic() {
        report(&anyhow::anyhow!("plain failure").context("while resolving"));
        report(&anyhow::Error::new(ConfigError::UnknownAttribute {
            name: "x".to_string(),
        }));
    }
}
