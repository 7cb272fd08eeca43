use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use valuation_core::DataSource;

pub const USAGE: &str = "usage:
  equity-analyst start <fixture.json> [--strategy ID]
  equity-analyst batch <fixture.json>...
  equity-analyst resume <run-id> <corrections.json>
  equity-analyst choose <run-id> filing|user
  equity-analyst approve <run-id>
  equity-analyst revise <run-id> <note>...
  equity-analyst recalculate <run-id>
  equity-analyst abandon <run-id>
  equity-analyst show <run-id>
  equity-analyst pending";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start {
        fixture: PathBuf,
        strategy: Option<String>,
    },
    Batch {
        fixtures: Vec<PathBuf>,
    },
    Resume {
        run_id: String,
        corrections: PathBuf,
    },
    /// Settle a data conflict
    Choose {
        run_id: String,
        source: DataSource,
    },
    Approve {
        run_id: String,
    },
    Revise {
        run_id: String,
        note: String,
    },
    /// Re-value a drafted report under the thresholds now in the environment
    Recalculate {
        run_id: String,
    },
    Abandon {
        run_id: String,
    },
    Show {
        run_id: String,
    },
    Pending,
}

/// Parse `args` without the program name.
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.first() else {
        bail!("missing command\n{}", USAGE);
    };
    let positional = |index: usize, name: &str| -> Result<String> {
        args.get(index)
            .filter(|a| !a.starts_with("--"))
            .cloned()
            .with_context(|| format!("{} requires <{}>\n{}", command, name, USAGE))
    };

    match command.as_str() {
        "start" => {
            let strategy = match args.iter().position(|a| a == "--strategy") {
                Some(i) => Some(
                    args.get(i + 1)
                        .cloned()
                        .context("--strategy requires a strategy id")?,
                ),
                None => None,
            };
            Ok(Command::Start {
                fixture: PathBuf::from(positional(1, "fixture.json")?),
                strategy,
            })
        }
        "batch" => {
            let fixtures: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();
            if fixtures.is_empty() {
                bail!("batch requires at least one fixture\n{}", USAGE);
            }
            Ok(Command::Batch { fixtures })
        }
        "resume" => Ok(Command::Resume {
            run_id: positional(1, "run-id")?,
            corrections: PathBuf::from(positional(2, "corrections.json")?),
        }),
        "choose" => Ok(Command::Choose {
            run_id: positional(1, "run-id")?,
            source: positional(2, "filing|user")?.parse()?,
        }),
        "approve" => Ok(Command::Approve {
            run_id: positional(1, "run-id")?,
        }),
        "revise" => {
            let run_id = positional(1, "run-id")?;
            let note = args.get(2..).unwrap_or_default().join(" ");
            if note.trim().is_empty() {
                bail!("revise requires <note>\n{}", USAGE);
            }
            Ok(Command::Revise { run_id, note })
        }
        "recalculate" => Ok(Command::Recalculate {
            run_id: positional(1, "run-id")?,
        }),
        "abandon" => Ok(Command::Abandon {
            run_id: positional(1, "run-id")?,
        }),
        "show" => Ok(Command::Show {
            run_id: positional(1, "run-id")?,
        }),
        "pending" => Ok(Command::Pending),
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_start_with_strategy() {
        let cmd = parse_args(&args(&["start", "o.json", "--strategy", "REIT_NAV"])).unwrap();
        assert_eq!(
            cmd,
            Command::Start {
                fixture: PathBuf::from("o.json"),
                strategy: Some("REIT_NAV".to_string()),
            }
        );
    }

    #[test]
    fn test_start_requires_fixture() {
        assert!(parse_args(&args(&["start"])).is_err());
        assert!(parse_args(&args(&["start", "--strategy", "BANK_DDM"])).is_err());
        assert!(parse_args(&args(&["start", "a.json", "--strategy"])).is_err());
    }

    #[test]
    fn test_resume_and_abandon() {
        assert_eq!(
            parse_args(&args(&["resume", "abc", "fix.json"])).unwrap(),
            Command::Resume {
                run_id: "abc".to_string(),
                corrections: PathBuf::from("fix.json"),
            }
        );
        assert!(parse_args(&args(&["resume", "abc"])).is_err());
        assert_eq!(
            parse_args(&args(&["abandon", "abc"])).unwrap(),
            Command::Abandon { run_id: "abc".to_string() }
        );
    }

    #[test]
    fn test_feedback_commands() {
        assert_eq!(
            parse_args(&args(&["choose", "abc", "USER"])).unwrap(),
            Command::Choose {
                run_id: "abc".to_string(),
                source: DataSource::User,
            }
        );
        assert!(parse_args(&args(&["choose", "abc", "average"])).is_err());
        assert_eq!(
            parse_args(&args(&["approve", "abc"])).unwrap(),
            Command::Approve { run_id: "abc".to_string() }
        );
        assert_eq!(
            parse_args(&args(&["revise", "abc", "more", "cautious"])).unwrap(),
            Command::Revise {
                run_id: "abc".to_string(),
                note: "more cautious".to_string(),
            }
        );
        assert!(parse_args(&args(&["revise", "abc"])).is_err());
        assert_eq!(
            parse_args(&args(&["recalculate", "abc"])).unwrap(),
            Command::Recalculate { run_id: "abc".to_string() }
        );
    }

    #[test]
    fn test_batch_and_misc() {
        assert_eq!(
            parse_args(&args(&["batch", "a.json", "b.json"])).unwrap(),
            Command::Batch {
                fixtures: vec![PathBuf::from("a.json"), PathBuf::from("b.json")],
            }
        );
        assert!(parse_args(&args(&["batch"])).is_err());
        assert_eq!(parse_args(&args(&["pending"])).unwrap(), Command::Pending);
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["trade"])).is_err());
    }
}
