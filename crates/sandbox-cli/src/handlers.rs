//! Handlers for the unary subcommands (`ps`, `kill`).

use std::sync::Arc;

use sandbox_common::Colors;
use sandbox_rpc::ControlClient;
use sandbox_rpc::Pid;
use sandbox_rpc::ProcessInfo;
use sandbox_rpc::Signal;
use sandbox_rpc::UnixTransport;
use sandbox_rpc::socket_path;

use crate::error::CliError;

fn connect(sandbox_id: &str) -> Result<Arc<ControlClient<UnixTransport>>, CliError> {
    let transport = UnixTransport::connect(socket_path(sandbox_id))?;
    Ok(Arc::new(ControlClient::new(transport)))
}

pub fn handle_ps(sandbox_id: &str) -> Result<(), CliError> {
    let client = connect(sandbox_id)?;
    let processes = client.list()?;

    if processes.is_empty() {
        println!("{}", Colors::dim("No processes running."));
        return Ok(());
    }

    println!(
        "{}",
        Colors::bold(&format!("{:<8} {:<12} {:<24} COMMAND", "PID", "TAG", "CWD"))
    );
    for process in &processes {
        println!("{}", format_process_row(process));
    }
    Ok(())
}

fn format_process_row(process: &ProcessInfo) -> String {
    let tag = process.tag.as_deref().unwrap_or("-");
    let cwd = process.cwd.as_deref().unwrap_or("-");
    // Width formatting counts escape bytes, so the pid column is padded on
    // the plain digits and colored afterwards.
    let pad = 8usize.saturating_sub(process.pid.to_string().len());
    format!(
        "{}{} {:<12} {:<24} {}",
        Colors::pid(process.pid),
        " ".repeat(pad),
        tag,
        cwd,
        process.cmd
    )
}

pub fn handle_kill(sandbox_id: &str, pid: Pid) -> Result<(), CliError> {
    let client = connect(sandbox_id)?;
    match client.send_signal(pid, Signal::Sigkill) {
        Ok(()) => {
            println!("{} process {}.", Colors::success("Killed"), Colors::pid(pid));
            Ok(())
        }
        Err(err) if err.is_not_found() => {
            println!("Process {} already exited.", Colors::pid(pid));
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for inner in chars.by_ref() {
                    if inner == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn row_for(pid: u32) -> ProcessInfo {
        ProcessInfo {
            pid,
            cmd: "sleep 60".to_string(),
            cwd: None,
            envs: Default::default(),
            tag: None,
        }
    }

    #[test]
    fn test_process_row_shows_placeholders_for_missing_fields() {
        let row = format_process_row(&row_for(42));
        assert!(row.contains("42"));
        assert!(row.contains("sleep 60"));
        assert!(row.contains('-'));
    }

    #[test]
    fn test_pid_column_width_ignores_escape_codes() {
        // Regardless of pid length, the tag cell starts at visible column 9.
        for pid in [7, 4211, 99999999] {
            let visible = strip_ansi(&format_process_row(&row_for(pid)));
            assert_eq!(visible[..9].trim_end(), pid.to_string());
            assert_eq!(&visible[9..10], "-");
        }
    }
}
