use clap::CommandFactory;
use clap::Parser;

use sandbox_common::Colors;
use sandbox_common::color_init;
use sandbox_cli::commands::Cli;
use sandbox_cli::commands::Commands;
use sandbox_cli::error::CliError;
use sandbox_cli::exec;
use sandbox_cli::exec::EXIT_FATAL;
use sandbox_cli::exec::ExecArgs;
use sandbox_cli::handlers;
use sandbox_cli::telemetry;

fn main() {
    let cli = Cli::parse();
    color_init(cli.no_color);
    let _telemetry = telemetry::init_tracing("warn");

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {}", Colors::error("sandbox:"), err);
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Commands::Exec {
            sandbox_id,
            cwd,
            env,
            command,
        } => exec::run_exec(ExecArgs {
            sandbox_id,
            cwd,
            env,
            command,
        }),
        Commands::Ps { sandbox_id } => handlers::handle_ps(&sandbox_id).map(|()| 0),
        Commands::Attach { sandbox_id, pid } => exec::run_attach(&sandbox_id, pid),
        Commands::Kill { sandbox_id, pid } => handlers::handle_kill(&sandbox_id, pid).map(|()| 0),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(0)
        }
    }
}
