use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use wellflow_cli::{parse_model, App, AppConfig, AutoPolicy, ConsoleOperator, DriveOutcome, Operator};

fn user_arg() -> Arg {
    Arg::new("user")
        .long("user")
        .short('u')
        .required(true)
        .help("Account name")
}

fn password_arg() -> Arg {
    Arg::new("password")
        .long("password")
        .short('p')
        .required(true)
        .help("Account password")
}

fn cli() -> Command {
    Command::new("wellflow")
        .version(wellflow_core::VERSION)
        .about("AI production command assistant for oilfield analysis workflows")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: ./wellflow.toml)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory with data files and stores"),
        )
        .arg(
            Arg::new("fast")
                .long("fast")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Skip simulated delays"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Plan and run an analysis request")
                .arg(Arg::new("request").required(true).help("Free-text request, e.g. 七月的风险预测"))
                .arg(user_arg())
                .arg(
                    Arg::new("auto")
                        .long("auto")
                        .value_parser(value_parser!(AutoPolicy))
                        .help("Answer checkpoints automatically: save, once, direct or finetune"),
                ),
        )
        .subcommand(
            Command::new("approvals")
                .about("Approval queue")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("Show the queue"))
                .subcommand(
                    Command::new("approve")
                        .about("Approve a pending report")
                        .arg(Arg::new("id").required(true))
                        .arg(user_arg())
                        .arg(password_arg()),
                )
                .subcommand(
                    Command::new("reject")
                        .about("Reject a pending report")
                        .arg(Arg::new("id").required(true))
                        .arg(user_arg())
                        .arg(password_arg())
                        .arg(Arg::new("feedback").long("feedback").help("Message to the submitter")),
                )
                .subcommand(
                    Command::new("inbox")
                        .about("Show rejection notices of a user")
                        .arg(user_arg())
                        .arg(
                            Arg::new("clear")
                                .long("clear")
                                .action(ArgAction::SetTrue)
                                .help("Clear the notices after showing them"),
                        ),
                ),
        )
        .subcommand(
            Command::new("models")
                .about("Model library")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list")
                        .about("Public and private tools of a user")
                        .arg(user_arg())
                        .arg(Arg::new("search").long("search").help("Name filter")),
                )
                .subcommand(
                    Command::new("tune")
                        .about("Fine-tune a model: trend, risk or water")
                        .arg(Arg::new("model").required(true))
                        .arg(user_arg())
                        .arg(
                            Arg::new("dataset")
                                .long("dataset")
                                .default_value("calibration.csv")
                                .help("Dataset name"),
                        ),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Saved sessions")
                .subcommand_required(true)
                .subcommand(Command::new("list").arg(user_arg()))
                .subcommand(
                    Command::new("show")
                        .arg(Arg::new("id").required(true))
                        .arg(user_arg()),
                ),
        )
        .subcommand(
            Command::new("register")
                .about("Create an account")
                .arg(Arg::new("user").required(true))
                .arg(Arg::new("password").required(true)),
        )
        .subcommand(
            Command::new("login")
                .about("Check credentials")
                .arg(Arg::new("user").required(true))
                .arg(Arg::new("password").required(true)),
        )
}

fn string<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing argument: {name}"))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config = config.with_data_dir(dir);
    }
    if matches.get_flag("fast") {
        config = config.immediate();
    }
    if matches.get_flag("log-json") {
        config.log.json = true;
    }
    Ok(config)
}

async fn dispatch(app: &App, matches: &ArgMatches) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    match matches.subcommand() {
        Some(("run", args)) => {
            let user = string(args, "user")?;
            let request = string(args, "request")?;
            let mut console;
            let mut policy;
            let operator: &mut dyn Operator = match args.get_one::<AutoPolicy>("auto") {
                Some(auto) => {
                    policy = *auto;
                    &mut policy
                }
                None => {
                    console = ConsoleOperator::stdio();
                    &mut console
                }
            };
            let summary = app.run(user, request, operator, &mut out).await?;
            if let DriveOutcome::Failed { index, message } = summary.outcome {
                anyhow::bail!("workflow halted at step {}: {message}", index + 1);
            }
        }
        Some(("approvals", args)) => match args.subcommand() {
            Some(("list", _)) => app.approvals_list(&mut out)?,
            Some(("approve", sub)) => app.approve(
                string(sub, "user")?,
                string(sub, "password")?,
                string(sub, "id")?,
                &mut out,
            )?,
            Some(("reject", sub)) => app.reject(
                string(sub, "user")?,
                string(sub, "password")?,
                string(sub, "id")?,
                sub.get_one::<String>("feedback").map(String::as_str),
                &mut out,
            )?,
            Some(("inbox", sub)) => app.inbox(string(sub, "user")?, sub.get_flag("clear"), &mut out)?,
            _ => unreachable!("subcommand required"),
        },
        Some(("models", args)) => match args.subcommand() {
            Some(("list", sub)) => app.models_list(
                string(sub, "user")?,
                sub.get_one::<String>("search").map(String::as_str),
                &mut out,
            )?,
            Some(("tune", sub)) => {
                let model = parse_model(string(sub, "model")?)?;
                app.models_tune(string(sub, "user")?, model, string(sub, "dataset")?, &mut out)
                    .await?;
            }
            _ => unreachable!("subcommand required"),
        },
        Some(("history", args)) => match args.subcommand() {
            Some(("list", sub)) => app.history_list(string(sub, "user")?, &mut out)?,
            Some(("show", sub)) => app.history_show(string(sub, "user")?, string(sub, "id")?, &mut out)?,
            _ => unreachable!("subcommand required"),
        },
        Some(("register", args)) => {
            app.register(string(args, "user")?, string(args, "password")?, &mut out)?;
        }
        Some(("login", args)) => {
            app.login(string(args, "user")?, string(args, "password")?, &mut out)?;
        }
        _ => unreachable!("subcommand required"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    wellflow_cli::init_tracing(&config.log);

    let app = App::open(config)?;
    dispatch(&app, &matches).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tree_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn run_parses_policy() {
        let matches = cli()
            .try_get_matches_from(["wellflow", "run", "7月注水", "--user", "user", "--auto", "once", "--fast"])
            .unwrap();
        assert!(matches.get_flag("fast"));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(args.get_one::<AutoPolicy>("auto"), Some(&AutoPolicy::Once));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(cli()
            .try_get_matches_from(["wellflow", "run", "x", "--user", "u", "--auto", "later"])
            .is_err());
    }
}
