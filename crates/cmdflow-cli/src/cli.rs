//! Command-line surface

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

fn script_type_arg() -> Arg {
    Arg::new("type")
        .long("type")
        .short('t')
        .value_parser(["bash", "sh", "powershell", "pwsh", "ps1"])
        .help("Script type (default: workflow's, then config)")
}

fn output_arg() -> Arg {
    Arg::new("output")
        .long("output")
        .short('o')
        .value_parser(value_parser!(PathBuf))
        .help("Write the script to a file instead of stdout")
}

fn id_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .required(true)
        .value_parser(value_parser!(u64))
        .help(help)
}

/// The `cmdflow` command tree
#[must_use]
pub fn build_cli() -> Command {
    Command::new("cmdflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Command registry and workflow script generator with an execution log")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Data directory (default: $CMDFLOW_HOME, then ~/.cmdflow)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Run a registered command; parts joined by the separator run as a batch")
                .arg(Arg::new("name").required(true).help("Registered command name"))
                .arg(
                    Arg::new("args")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Arguments appended to the command"),
                ),
        )
        .subcommand(
            Command::new("exec")
                .about("Run an arbitrary command line and log it")
                .arg(
                    Arg::new("command")
                        .required(true)
                        .num_args(1..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                ),
        )
        .subcommand(
            Command::new("logs")
                .about("Read or search the execution log")
                .args_conflicts_with_subcommands(true)
                .arg(
                    Arg::new("last")
                        .long("last")
                        .short('n')
                        .value_parser(value_parser!(usize))
                        .help("Only the newest N records (0 for all)"),
                )
                .arg(Arg::new("search").long("search").short('s').help("Case-insensitive text"))
                .arg(
                    Arg::new("regex")
                        .long("regex")
                        .requires("search")
                        .action(ArgAction::SetTrue)
                        .help("Treat --search as a regular expression"),
                )
                .arg(
                    Arg::new("session")
                        .long("session")
                        .value_parser(value_parser!(u32))
                        .help("Only records of this session pid"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                )
                .subcommand(Command::new("clear").about("Delete the log and its id counter")),
        )
        .subcommand(
            Command::new("events")
                .about("Inspect recorded events")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list")
                        .about("List event and batch start records")
                        .arg(
                            Arg::new("last")
                                .long("last")
                                .short('n')
                                .value_parser(value_parser!(usize)),
                        )
                        .arg(
                            Arg::new("batches")
                                .long("batches")
                                .action(ArgAction::SetTrue)
                                .conflicts_with("scripts")
                                .help("Only batches"),
                        )
                        .arg(
                            Arg::new("scripts")
                                .long("scripts")
                                .action(ArgAction::SetTrue)
                                .help("Only script events"),
                        ),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show an event with its steps and end")
                        .arg(id_arg("id", "Start record id")),
                )
                .subcommand(
                    Command::new("rerun")
                        .about("Run an event's stored script again as a new event")
                        .arg(id_arg("id", "Start record id")),
                ),
        )
        .subcommand(
            Command::new("step")
                .about("Inspect recorded steps")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show one event step and its code")
                        .arg(id_arg("id", "Step record id")),
                ),
        )
        .subcommand(
            Command::new("workflow")
                .about("List, build and run workflows")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List workflow definitions"))
                .subcommand(
                    Command::new("show")
                        .about("Show a workflow and its execution order")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(
                    Command::new("build")
                        .about("Assemble a workflow into a script")
                        .arg(Arg::new("name").required(true))
                        .arg(script_type_arg())
                        .arg(output_arg()),
                )
                .subcommand(
                    Command::new("run")
                        .about("Assemble and execute a workflow under an event")
                        .arg(Arg::new("name").required(true))
                        .arg(script_type_arg()),
                ),
        )
        .subcommand(
            Command::new("build-from-steps")
                .about("Concatenate the code of recorded steps into a script")
                .arg(
                    Arg::new("ids")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(u64)),
                )
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("event")
                .about("Event API for generated scripts; prints the new record id")
                .subcommand_required(true)
                .subcommand(
                    Command::new("start")
                        .arg(Arg::new("name").required(true))
                        .arg(script_type_arg())
                        .arg(
                            Arg::new("total")
                                .long("total")
                                .value_parser(value_parser!(u32))
                                .default_value("0"),
                        )
                        .arg(
                            Arg::new("script-file")
                                .long("script-file")
                                .value_parser(value_parser!(PathBuf))
                                .help("Store this file's content with the event"),
                        ),
                )
                .subcommand(
                    Command::new("step")
                        .arg(id_arg("parent", "Event start id"))
                        .arg(
                            Arg::new("number")
                                .required(true)
                                .value_parser(value_parser!(u32)),
                        )
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("code").long("code")),
                )
                .subcommand(
                    Command::new("end")
                        .arg(id_arg("parent", "Event start id"))
                        .arg(
                            Arg::new("exit-code")
                                .long("exit-code")
                                .value_parser(value_parser!(i32))
                                .allow_negative_numbers(true)
                                .default_value("0"),
                        )
                        .arg(
                            Arg::new("duration")
                                .long("duration")
                                .value_parser(value_parser!(u64))
                                .default_value("0")
                                .help("Duration in milliseconds"),
                        )
                        .arg(Arg::new("name").long("name").help("Defaults to the start's name")),
                ),
        )
}
