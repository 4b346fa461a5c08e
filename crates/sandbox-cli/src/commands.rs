use clap::Parser;
use clap::Subcommand;
pub use clap_complete::Shell;

const LONG_ABOUT: &str = r#"sandbox runs commands inside a remote sandbox and streams their output back.

WORKFLOW:
    1. Execute a command with 'sandbox exec'
    2. Piped input is forwarded automatically when stdin is not a terminal
    3. Inspect running processes with 'sandbox ps'
    4. Attach to or kill long-running processes

EXAMPLES:
    # Run a command and exit with its remote exit code
    sandbox exec my-box -- ls -la /srv

    # A single token after -- is passed to the shell verbatim
    sandbox exec my-box -- 'du -sh * | sort -h'

    # Pipe data through a remote command
    cat report.csv | sandbox exec my-box -- 'wc -l'

    # Inspect and control running processes
    sandbox ps my-box
    sandbox attach my-box 4211
    sandbox kill my-box 4211"#;

#[derive(Parser)]
#[command(name = "sandbox")]
#[command(author, version)]
#[command(about = "Run and control commands inside a remote sandbox")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output (the NO_COLOR env var is honored separately,
    /// whatever its value)
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a command inside a sandbox
    #[command(long_about = r#"Execute a command inside a sandbox.

Everything after -- is the command. A single token is treated as a complete
shell line and passed through verbatim; multiple tokens are independently
shell-quoted and joined. When the local stdin is a pipe its contents are
forwarded to the remote command automatically.

Exits with the remote command's exit code, or 125 on a transport failure.

EXAMPLES:
    sandbox exec my-box -- uname -a
    sandbox exec my-box --cwd /srv -- 'ls | head'
    sandbox exec my-box --env RUST_LOG=debug -- ./server --check
    printf 'hello' | sandbox exec my-box -- 'wc -c'"#)]
    Exec {
        /// Sandbox to run in
        sandbox_id: String,

        /// Working directory for the remote process
        #[arg(short = 'd', long)]
        cwd: Option<String>,

        /// Environment overrides for the remote process (repeatable)
        #[arg(short, long = "env", value_name = "K=V", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Command to execute (after --)
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List processes running inside a sandbox
    Ps {
        /// Sandbox to inspect
        sandbox_id: String,
    },

    /// Attach to a running process and stream its output
    #[command(long_about = r#"Attach to a running process and stream its output.

Relays the process's stdout/stderr until it ends, then exits with its exit
code. Detaching does not affect the remote process."#)]
    Attach {
        /// Sandbox the process runs in
        sandbox_id: String,

        /// Remote process id (see 'sandbox ps')
        pid: u32,
    },

    /// Send SIGKILL to a remote process
    Kill {
        /// Sandbox the process runs in
        sandbox_id: String,

        /// Remote process id
        pid: u32,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected K=V, got '{}'", s))
}
