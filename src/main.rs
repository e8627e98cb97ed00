use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use imgfs::fs::Filesystem;
use imgfs::shell::Shell;

#[derive(Parser)]
#[command(about = "Interactive shell over a filesystem image")]
struct Cli {
    /// Path to the filesystem image file
    image: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let fs = match Filesystem::open(&cli.image) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("imgfs: failed to open image {}: {e}", cli.image.display());
            return ExitCode::FAILURE;
        }
    };
    let mut shell = Shell::new(fs);

    let mut cwd = "/".to_string();
    loop {
        print!("{cwd} > ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            // End-of-file (Ctrl+D)
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("imgfs: failed to read input: {e}");
                return ExitCode::FAILURE;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let reply = shell.execute(line.trim());
        if reply.exit {
            break;
        }
        if !reply.message.is_empty() {
            println!("{}", reply.message);
        }
        cwd = reply.cwd;
    }
    ExitCode::SUCCESS
}
