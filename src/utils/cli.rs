//! Command-line argument parsing and help for fbrowse.
//!
//! When invoked with no args, fbrowse opens the home directory.

use crate::config::Config;

#[derive(Debug, PartialEq, Eq)]
pub enum CliAction {
    Run,
    RunAtPath(String),
    Exit,
}

pub fn handle_args() -> CliAction {
    let args: Vec<String> = std::env::args().collect();
    parse_args(&args)
}

fn parse_args(args: &[String]) -> CliAction {
    if args.len() < 2 {
        return CliAction::Run;
    }

    if args.len() > 2 {
        eprintln!("Error: fbrowse accepts only one argument at a time.");
        eprintln!("Usage: fbrowse [PATH] or fbrowse [OPTION]");
        return CliAction::Exit;
    }

    match args[1].as_str() {
        "--version" | "-v" => {
            print_version();
            CliAction::Exit
        }
        "-h" | "--help" => {
            print_help();
            CliAction::Exit
        }
        "--init" => {
            if let Err(e) = Config::generate_default(&Config::default_path()) {
                eprintln!("Error: {}", e);
            }
            CliAction::Exit
        }
        arg if !arg.starts_with('-') && !arg.trim().is_empty() => {
            CliAction::RunAtPath(arg.to_string())
        }
        arg => {
            eprintln!("Unknown argument: {}", arg);
            eprintln!("Try --help for available options");
            CliAction::Exit
        }
    }
}

fn print_version() {
    println!("fbrowse {}", env!("CARGO_PKG_VERSION"));
}

fn print_help() {
    println!(
        r#"fbrowse - live directory listing with background file operations

USAGE:
  fbrowse [PATH]

PATH:
  Directory to open (falls back to the home directory, then the current directory)

OPTIONS:
      --init              Generate the default configuration
  -h, --help              Print help information
  -v, --version           Display the installed version of fbrowse

ENVIRONMENT:
  FBROWSE_CONFIG          Override the default config path
  FBROWSE_LOG             Log filter, e.g. "debug" or "fbrowse=trace" (default: info)
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_path_and_flags() {
        assert_eq!(parse_args(&args(&["fbrowse"])), CliAction::Run);
        assert_eq!(
            parse_args(&args(&["fbrowse", "/sdcard"])),
            CliAction::RunAtPath("/sdcard".into())
        );
        assert_eq!(parse_args(&args(&["fbrowse", "--version"])), CliAction::Exit);
        assert_eq!(parse_args(&args(&["fbrowse", "--bogus"])), CliAction::Exit);
        assert_eq!(parse_args(&args(&["fbrowse", "a", "b"])), CliAction::Exit);
    }
}
