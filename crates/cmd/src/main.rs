// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fs::File,
    io::{self, BufReader, Write as _},
    path::PathBuf,
    time::Duration,
};

use clap::{CommandFactory, Parser, error::ErrorKind};
use partfetch::{
    Config, Credentials, DownloadError, EntryPoint, Headers, Orchestrator, Prompter,
    UserAgentProfile, install_signal_handler, read_lines,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "partfetch",
about = "Part-parallel HTTP download manager with resume support",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
#[command(override_usage = "partfetch [OPTIONS] url")]
struct Cli {
    /// number of parts; 0 disables part planning
    #[arg(short, long, value_name = "n", default_value_t = 2)]
    parts: u32,

    /// max retries per each part
    #[arg(short = 'r', long = "max-retry", value_name = "n", default_value_t = 10)]
    max_retry: u32,

    /// base per-attempt timeout
    #[arg(short, long, value_name = "sec", default_value_t = 15)]
    timeout: u64,

    /// user defined output filename
    #[arg(short, long, value_name = "filename")]
    output: Option<String>,

    /// resume download from the last session
    #[arg(short = 'c', long = "continue", value_name = "state.json")]
    continue_from: Option<PathBuf>,

    /// User-Agent header
    #[arg(
        short = 'a',
        long = "user-agent",
        value_name = "agent",
        default_value = "chrome",
        value_parser = ["chrome", "firefox", "safari"],
    )]
    user_agent: String,

    /// pick up the fastest mirror from listed files or stdin
    #[arg(short = 'b', long = "best-mirror")]
    best_mirror: bool,

    /// quiet mode, no progress bars
    #[arg(short, long)]
    quiet: bool,

    /// basic http auth username
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// basic http auth password
    #[arg(long)]
    password: Option<String>,

    /// arbitrary http header, repeatable
    #[arg(short = 'H', long = "header", value_name = "key:value")]
    header: Vec<String>,

    /// don't validate the server's certificate
    #[arg(long = "no-check-cert")]
    no_check_cert: bool,

    /// enable debug output to stderr
    #[arg(long)]
    debug: bool,

    /// url to download; with --best-mirror, files listing candidate urls
    #[arg(value_name = "url")]
    args: Vec<String>,
}

/// Exit codes: 0 success (help and version included), 1 expected error,
/// 2 usage error (clap's default), 3 unexpected error.
fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    if cli.args.is_empty() && cli.continue_from.is_none() && !cli.best_mirror {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "url is required unless --continue or --best-mirror is given",
            )
            .exit();
    }

    let headers = match parse_headers(&cli.header) {
        Ok(headers) => headers,
        Err(message) => {
            Cli::command().error(ErrorKind::InvalidValue, message).exit();
        }
    };

    let credentials = match collect_credentials(&cli) {
        Ok(credentials) => credentials,
        Err(e) => {
            eprintln!("unexpected error: {e}");
            return 3;
        }
    };

    let entry = if let Some(path) = cli.continue_from.clone() {
        EntryPoint::Resume(path)
    } else if cli.best_mirror {
        match collect_mirror_candidates(&cli.args) {
            Ok(candidates) => EntryPoint::Mirrors(candidates),
            Err(e) => {
                eprintln!("unexpected error: {e}");
                return 3;
            }
        }
    } else {
        EntryPoint::Url(cli.args[0].clone())
    };

    let config = Config {
        parts: cli.parts,
        max_retry: cli.max_retry,
        timeout: Duration::from_secs(cli.timeout),
        output: cli.output.clone(),
        user_agent: cli.user_agent.parse().unwrap_or(UserAgentProfile::Chrome),
        quiet: cli.quiet,
        insecure_skip_verify: cli.no_check_cert,
        credentials,
        headers,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("unexpected error: {e}");
            return 3;
        }
    };

    let result = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        install_signal_handler(cancel.clone());
        let orchestrator = Orchestrator::new(config, cancel, Box::new(TerminalPrompter));
        orchestrator.run(entry).await
    });

    match result {
        Ok(outcome) => {
            debug!(?outcome, "finished");
            0
        }
        Err(e) if e.is_expected() => {
            report("exit error", &e, cli.debug);
            1
        }
        Err(e) => {
            report("unexpected error", &e, cli.debug);
            3
        }
    }
}

fn report(kind: &str, error: &DownloadError, debug: bool) {
    if debug {
        eprintln!("{kind}: {error:?}");
    } else {
        eprintln!("{kind}: {error}");
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "partfetch=debug,partfetch_cmd=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// `-H key:value` entries become the frozen header map.
fn parse_headers(raw: &[String]) -> Result<Headers, String> {
    let mut headers = Headers::default();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            return Err(format!("invalid header {entry:?}, expected key:value"));
        };
        headers.insert(name.trim(), value.trim());
    }
    Ok(headers)
}

/// Prompt for the password when a username came without one.
fn collect_credentials(cli: &Cli) -> io::Result<Option<Credentials>> {
    let Some(username) = cli.username.clone() else {
        return Ok(None);
    };
    let password = match cli.password.clone() {
        Some(password) => password,
        None => rpassword::prompt_password("Enter Password: ")?,
    };
    Ok(Some(Credentials { username, password }))
}

/// Mirror candidates come from the positional files, or stdin when none of
/// them can be read.
fn collect_mirror_candidates(files: &[String]) -> io::Result<Vec<String>> {
    let mut candidates = Vec::new();
    let mut any_file = false;
    for name in files {
        match File::open(name) {
            Ok(file) => {
                any_file = true;
                candidates.extend(read_lines(BufReader::new(file))?);
            }
            Err(e) => debug!("skipping mirror list {name:?}: {e}"),
        }
    }
    if !any_file {
        candidates = read_lines(io::stdin().lock())?;
    }
    Ok(candidates)
}

struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm_overwrite(&self, file_name: &str) -> io::Result<bool> {
        print!("File {file_name:?} already exists, overwrite? [y/n] ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        let answer = answer.trim().to_ascii_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}
