use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "depscope",
    about = "Discover package managers in a project tree and resolve their dependency graphs",
    version
)]
pub struct Cli {
    /// Project path to analyze
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Global config file [default: ~/.config/depscope/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Repository config file [default: <PATH>/.depscope.toml]
    #[arg(long, value_name = "FILE")]
    pub repository_config: Option<PathBuf>,

    /// TOML file of package curations
    #[arg(long, value_name = "FILE")]
    pub curations: Option<PathBuf>,

    /// Only run these package managers (repeatable)
    #[arg(long = "enable", value_name = "NAME")]
    pub enable: Vec<String>,

    /// Do not run these package managers (repeatable)
    #[arg(long = "disable", value_name = "NAME")]
    pub disable: Vec<String>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Write the JSON report to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Show all packages and info-level logs
    #[arg(short, long)]
    pub verbose: bool,

    /// Skip version-control lookups
    #[arg(long)]
    pub no_vcs: bool,

    /// Only print summary line
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

impl Cli {
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from([
            "depscope",
            "/work/project",
            "--enable",
            "npm",
            "--enable",
            "cargo",
            "--disable",
            "gradle",
            "--report",
            "json",
            "-v",
        ]);
        assert_eq!(cli.path, PathBuf::from("/work/project"));
        assert_eq!(cli.enable, vec!["npm", "cargo"]);
        assert_eq!(cli.disable, vec!["gradle"]);
        assert_eq!(cli.report, ReportFormat::Json);
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["depscope"]);
        assert_eq!(cli.path, PathBuf::from("."));
        assert_eq!(cli.report, ReportFormat::Terminal);
        assert_eq!(cli.log_level(), "warn");
        assert!(!cli.no_vcs);
    }

    #[test]
    fn test_no_vcs_flag() {
        let cli = Cli::parse_from(["depscope", "--no-vcs", "-q"]);
        assert!(cli.no_vcs);
        assert_eq!(cli.log_level(), "error");
    }
}
