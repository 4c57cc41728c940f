use std::env;

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Background-job limit the shell has always had.
pub const DEFAULT_MAX_JOBS: usize = 10;

/// A small Unix shell with signal-driven job control.
#[derive(Parser, Debug)]
#[command(name = "jobsh", version, about)]
pub struct Cli {
    /// Run a single command line and exit with its status.
    #[arg(short = 'c', long = "command", value_name = "LINE")]
    pub command: Option<String>,

    /// Most jobs tracked at once, finished-but-unreported ones included.
    #[arg(long, default_value_t = DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Log more (-v info, -vv debug, -vvv trace). Logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// `USER@MACHINE:PWD>` from the environment; missing variables are blank.
pub fn prompt() -> String {
    let var = |name: &str| env::var(name).unwrap_or_default();
    format_prompt(&var("USER"), &var("MACHINE"), &var("PWD"))
}

fn format_prompt(user: &str, machine: &str, working_directory: &str) -> String {
    format!("{}@{}:{}>", user, machine, working_directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["jobsh"]);
        assert_eq!(cli.max_jobs, DEFAULT_MAX_JOBS);
        assert_eq!(cli.command, None);
        assert_eq!(cli.log_level(), LevelFilter::WARN);
    }

    #[test]
    fn flags() {
        let cli = Cli::parse_from(["jobsh", "-vv", "--max-jobs", "3", "-c", "sleep 1 &"]);
        assert_eq!(cli.max_jobs, 3);
        assert_eq!(cli.command.as_deref(), Some("sleep 1 &"));
        assert_eq!(cli.log_level(), LevelFilter::DEBUG);
    }

    #[test]
    fn prompt_layout() {
        assert_eq!(format_prompt("ann", "box", "/tmp"), "ann@box:/tmp>");
        assert_eq!(format_prompt("", "", ""), "@:>");
    }
}
