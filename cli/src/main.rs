/*
 *   Copyright (c) 2022 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! CLI surface (section 6). Empty argv prints help and exits zero.
//! Recognized pre-declared options (`-f` foreground, `-d` daemonize,
//! `-l <bitmask>` log level) select server mode; anything else is
//! forwarded to the command client as a request against the locally
//! running server. More info on this pattern:
//! <https://docs.rs/clap/latest/clap/_derive/_tutorial/chapter_2/index.html>

use clap::Parser;
use instaworks_core::value::parse_base0_i32;
use instaworks_core::{cfg, Supervisor};
use miette::IntoDiagnostic;

const EXIT_SUCCESS: i32 = 0;
const EXIT_INVALID_PARAMETER: i32 = 1;
const EXIT_STARTUP_FAILURE: i32 = 2;
const EXIT_CLIENT_TRANSPORT_FAILURE: i32 = 3;

/// More info: <https://docs.rs/clap/latest/clap/_derive/_tutorial/chapter_2/index.html>
#[derive(Debug, Parser)]
#[command(bin_name = "instaworks")]
#[command(about = "Embeddable operations substrate: run as a server, or send a command to one")]
#[command(version)]
#[command(arg_required_else_help(true))]
struct CliArgs {
    /// Run in the foreground as a server.
    #[arg(short = 'f', long = "foreground")]
    foreground: bool,

    /// Run as a server, detached (daemonize).
    #[arg(short = 'd', long = "daemonize")]
    daemonize: bool,

    /// Set the log-level bitmask. Accepts decimal, `0x`-prefixed hex, or
    /// `0`-prefixed octal, the same way `log lvl` does.
    #[arg(short = 'l', long = "loglevel", value_parser = loglevel_value)]
    loglevel: Option<i32>,

    /// Forwarded verbatim to the command client when not running as a server.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn loglevel_value(s: &str) -> Result<i32, String> {
    parse_base0_i32(s).ok_or_else(|| format!("invalid bitmask: {s}"))
}

fn main() {
    // Empty argv should print help and exit zero, not an error --
    // `arg_required_else_help` alone would exit nonzero, so check first.
    if std::env::args().len() <= 1 {
        let _ = <CliArgs as clap::CommandFactory>::command().print_help();
        std::process::exit(EXIT_SUCCESS);
    }

    let cli = match CliArgs::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_INVALID_PARAMETER);
        }
    };

    let exit_code = match run(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(AppError::Startup(report)) => {
            eprintln!("{report:?}");
            EXIT_STARTUP_FAILURE
        }
        Err(AppError::Transport(report)) => {
            eprintln!("{report:?}");
            EXIT_CLIENT_TRANSPORT_FAILURE
        }
    };
    std::process::exit(exit_code);
}

enum AppError {
    Startup(miette::Report),
    Transport(miette::Report),
}

fn run(cli: CliArgs) -> Result<(), AppError> {
    if cli.foreground || cli.daemonize {
        let loglevel = cli.loglevel;
        Supervisor::start(
            cfg::defaults::PRG_NAME,
            env!("CARGO_PKG_VERSION"),
            move |store| {
                if let Some(bitmask) = loglevel {
                    let _ = store.set_number(cfg::LOGLEVEL, bitmask);
                }
            },
            Box::new(|_sv| {}),
        )
        .into_diagnostic()
        .map_err(AppError::Startup)
    } else {
        let port = cfg::defaults::CMD_PORT as u16;
        let mut out = std::io::stdout();
        instaworks_core::cmd_clnt::run(port, &cli.command, &mut out)
            .into_diagnostic()
            .map_err(AppError::Transport)
    }
}
