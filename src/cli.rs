use clap::{ArgAction, Parser, Subcommand};
use compdb_config::LogLevel;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "compdb", version)]
#[command(about = "Keeps compile_commands.json fresh for packages built in the ChromiumOS chroot")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// More logging; repeat for even more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Generate the compilation database of the packages owning FILES
    Generate {
        /// Rebuild even if the database is up to date or the last attempt failed
        #[arg(short, long)]
        force: bool,
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// Show what each generator would do for FILES
    Status {
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
}

impl Cli {
    /// `-v` overrides the configured level.
    pub fn log_level(&self, configured: Option<LogLevel>) -> tracing::Level {
        match self.verbose {
            0 => configured.unwrap_or_default().into(),
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from(["compdb", "-c", "compdb.yaml", "generate", "--force", "a.cc", "b.c"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("compdb.yaml")));
        assert_eq!(cli.command, Command::Generate { force: true, files: vec!["a.cc".into(), "b.c".into()] });
    }

    #[test]
    fn test_files_are_required() {
        assert!(Cli::try_parse_from(["compdb", "status"]).is_err());
        assert!(Cli::try_parse_from(["compdb", "generate", "--force"]).is_err());
    }

    #[rstest]
    #[case(&["compdb", "status", "a.cc"], None, tracing::Level::INFO)]
    #[case(&["compdb", "status", "a.cc"], Some(LogLevel::Warn), tracing::Level::WARN)]
    #[case(&["compdb", "-v", "status", "a.cc"], Some(LogLevel::Error), tracing::Level::DEBUG)]
    #[case(&["compdb", "status", "-vvv", "a.cc"], None, tracing::Level::TRACE)]
    fn test_log_level(#[case] args: &[&str], #[case] configured: Option<LogLevel>, #[case] expected: tracing::Level) {
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.log_level(configured), expected);
    }
}
