//! Command dispatcher for the interactive shell.
//!
//! Maps tokenized command lines to filesystem operations and renders the
//! results as `(current directory, message)` replies.

use std::io;

use crate::fs::{self, Filesystem};

/// Result of one executed command line.
pub struct Reply {
    /// Current working directory after the command.
    pub cwd: String,
    /// Message to print; may be empty.
    pub message: String,
    /// Whether the shell should terminate.
    pub exit: bool,
}

enum Outcome {
    Message(String),
    Exit,
}

/// Dispatches command lines against one mounted filesystem.
pub struct Shell {
    fs: Filesystem,
}

impl Shell {
    pub fn new(fs: Filesystem) -> Self {
        Self { fs }
    }

    /// Executes a single command line.
    pub fn execute(&mut self, line: &str) -> Reply {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Reply {
                cwd: self.cwd(),
                message: String::new(),
                exit: false,
            };
        };
        let args: Vec<&str> = tokens.collect();

        if !self.fs.is_formatted() && !matches!(command, "format" | "load" | "exit") {
            return Reply {
                cwd: "/".to_string(),
                message: "Filesystem not formated".to_string(),
                exit: false,
            };
        }

        match self.dispatch(command, &args) {
            Ok(Outcome::Exit) => Reply {
                cwd: self.cwd(),
                message: String::new(),
                exit: true,
            },
            Ok(Outcome::Message(message)) => Reply {
                cwd: self.cwd(),
                message,
                exit: false,
            },
            Err(e) => Reply {
                cwd: self.cwd(),
                message: format!("Error: {e}"),
                exit: false,
            },
        }
    }

    fn cwd(&mut self) -> String {
        match self.fs.current_path() {
            Ok(parts) if parts.is_empty() => "/".to_string(),
            Ok(parts) => format!("/{}", parts.join("/")),
            Err(_) => "/".to_string(),
        }
    }

    fn dispatch(&mut self, command: &str, args: &[&str]) -> Result<Outcome> {
        let msg = |text: &str| Ok(Outcome::Message(text.to_string()));
        match (command, args) {
            ("format", [size]) => {
                let bytes = parse_size(size)?;
                let bytes = u32::try_from(bytes).map_err(|_| Error::Size(SizeError::Overflow))?;
                self.fs.format(bytes)?;
                msg("Filesystem formatted")
            }
            ("format", _) => msg("Usage: format <size>"),
            ("mkdir", [path]) => {
                self.fs.create_directory(path)?;
                msg("Directory created")
            }
            ("mkdir", _) => msg("Usage: mkdir <dir>"),
            ("rmdir", [path]) => {
                self.fs.remove_directory(path)?;
                msg("Directory removed")
            }
            ("rmdir", _) => msg("Usage: rmdir <dir>"),
            ("ls", args) if args.len() <= 1 => {
                let path = args.first().copied().unwrap_or(".");
                let mut out = String::new();
                for (name, is_dir) in self.fs.subdirectories(path)? {
                    out.push_str(if is_dir { "[D] " } else { "[F] " });
                    out.push_str(&name);
                    out.push('\n');
                }
                Ok(Outcome::Message(out))
            }
            ("ls", _) => msg("Usage: ls [dir]"),
            ("cat", [path]) => {
                let data = self.fs.read_file(path)?;
                Ok(Outcome::Message(
                    String::from_utf8_lossy(&data).into_owned(),
                ))
            }
            ("cat", _) => msg("Usage: cat <file>"),
            ("cd", [path]) => {
                self.fs.change_directory(path)?;
                msg("")
            }
            ("cd", _) => msg("Usage: cd <dir>"),
            ("pwd", _) => Ok(Outcome::Message(self.cwd())),
            ("info", [path]) => Ok(Outcome::Message(self.fs.node_info(path)?)),
            ("info", _) => msg("Usage: info <path>"),
            ("statfs", _) => Ok(Outcome::Message(self.fs.stats()?)),
            ("cp", [src, dst]) => {
                self.fs.copy_file(src, dst)?;
                msg("Copied successfully")
            }
            ("cp", _) => msg("Usage: cp <src> <dst>"),
            ("mv", [src, dst]) => {
                self.fs.move_file(src, dst)?;
                msg("Moved successfully")
            }
            ("mv", _) => msg("Usage: mv <src> <dst>"),
            ("rm", [path]) => {
                self.fs.remove_file(path)?;
                msg("File removed")
            }
            ("rm", _) => msg("Usage: rm <file>"),
            ("ln", [target, link]) => {
                self.fs.link_file(target, link)?;
                msg("Link created")
            }
            ("ln", _) => msg("Usage: ln <target> <link>"),
            ("incp", [host, path]) => {
                let data = std::fs::read(host)?;
                self.fs.write_file(path, &data)?;
                msg("Imported file")
            }
            ("incp", _) => msg("Usage: incp <host_file> <fs_path>"),
            ("outcp", [path, host]) => {
                let data = self.fs.read_file(path)?;
                std::fs::write(host, data)?;
                msg("Exported file")
            }
            ("outcp", _) => msg("Usage: outcp <fs_file> <host_path>"),
            ("load", [script]) => self.load(script),
            ("load", _) => msg("Usage: load <script_file>"),
            ("exit", _) => Ok(Outcome::Exit),
            _ => msg("Unknown command"),
        }
    }

    /// Executes a host-side script line by line, stopping at `exit` and
    /// aborting on the first failed command.
    fn load(&mut self, script: &str) -> Result<Outcome> {
        let content = std::fs::read_to_string(script)?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let reply = self.execute(line);
            if reply.exit {
                break;
            }
            if reply.message.starts_with("Error") || reply.message == "Unknown command" {
                return Ok(Outcome::Message(reply.message));
            }
        }
        Ok(Outcome::Message("OK".to_string()))
    }
}

/// Parses a human-readable size string (`"123"`, `"10KB"`, `"5MB"`,
/// `"1GB"`) into bytes. The suffix is case-insensitive and 1024-based.
pub fn parse_size(input: &str) -> std::result::Result<u64, SizeError> {
    let digits = input.len() - input.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Err(SizeError::Invalid);
    }
    let value: u64 = input[..digits].parse().map_err(|_| SizeError::Invalid)?;

    let multiplier = match input[digits..].to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        _ => return Err(SizeError::Invalid),
    };

    value.checked_mul(multiplier).ok_or(SizeError::Overflow)
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] fs::Error),
    #[error(transparent)]
    Size(#[from] SizeError),
    #[error("host file error: {0}")]
    Host(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SizeError {
    #[error("invalid size string")]
    Invalid,
    #[error("size out of range")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numbers_are_bytes() {
        assert_eq!(parse_size("123").unwrap(), 123);
        assert_eq!(parse_size("123B").unwrap(), 123);
    }

    #[test]
    fn suffixes_are_powers_of_1024() {
        assert_eq!(parse_size("10KB").unwrap(), 10 * 1024);
        assert_eq!(parse_size("5MB").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn suffix_is_case_insensitive() {
        assert_eq!(parse_size("2mb").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("2Mb").unwrap(), 2 * 1024 * 1024);
    }

    #[test]
    fn junk_is_rejected() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("12TB").is_err());
        assert!(parse_size("1.5MB").is_err());
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(parse_size("99999999999999999999").is_err());
        assert!(matches!(
            parse_size(&format!("{}GB", u64::MAX / 2)),
            Err(SizeError::Overflow)
        ));
    }
}
