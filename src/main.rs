use std::io::{stdin, stdout, Write};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use jobsh::config::{prompt, Cli};
use jobsh::executor::{execute_command, exit_status, notify_completed, Flow};
use jobsh::signals;
use tracing::{error, info};

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level())
        .init();

    jobsh::init(cli.max_jobs).context("setting up job control")?;

    if let Some(line) = cli.command.as_deref() {
        let code = match execute_command(line)? {
            Flow::Continue(code) | Flow::Exit(code) => code,
        };
        return Ok(exit_code(code));
    }

    signals::ignore_job_control_signals().context("ignoring job control signals")?;
    info!(max_jobs = cli.max_jobs, "interactive shell started");

    loop {
        if let Err(e) = notify_completed() {
            error!("{e}");
        }
        create_prompt();

        let mut input = String::new();
        let read = stdin().read_line(&mut input).context("reading command line")?;
        if read == 0 {
            // EOF behaves like `exit`
            let code = match execute_command("exit")? {
                Flow::Continue(code) | Flow::Exit(code) => code,
            };
            return Ok(exit_code(code));
        }

        match execute_command(input.trim()) {
            Ok(Flow::Continue(_)) => {}
            Ok(Flow::Exit(code)) => return Ok(exit_code(code)),
            Err(e) => eprintln!("jobsh: {e}"),
        }
    }
}

fn create_prompt() {
    print!("{}", prompt());
    if stdout().flush().is_err() {
        eprint!("Error Flushing");
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status(code))
}
