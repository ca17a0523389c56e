mod shell;

use crate::shell::{new_shell, ShellWrite};
use ansi_term::Colour::{Fixed, Green, Red, Yellow};
use clap::{ArgAction, Parser, Subcommand};
use log::{debug, error, info, LevelFilter};
use minecraft_rcon_client::r#async::AsyncClient;
use minecraft_rcon_client::{Config, Error, Options, Score, DEFAULT_PORT};
use rpassword::read_password;
use serde::Deserialize;
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Host name or IP address of the Minecraft server.
    #[clap(long)]
    host: Option<String>,

    /// RCON port, `25575` unless configured otherwise.
    #[clap(long, short)]
    port: Option<u16>,

    /// RCON password. Prompted for when not given.
    #[clap(long, env = "MINECRAFT_RCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// TOML file with `host`, `port`, `password` and `timeout` keys.
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Seconds to wait for a response before giving up.
    #[clap(long)]
    timeout: Option<u64>,

    /// Log more. Repeat for packet traces.
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a console command and print its output.
    Exec {
        #[clap(required = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List the players tracked by the scoreboard.
    Players,
    /// Print the number of players online.
    Count,
    /// Print the scores of one player.
    Scores { player: String },
    /// Print the player count and every tracked player's scores.
    Stats,
    /// Start an interactive console.
    Shell {
        /// Read plain lines from stdin even on a terminal.
        #[clap(long)]
        no_interactive: bool,
    },
}

#[derive(Deserialize, Default, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    timeout: Option<u64>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("Cannot read {}: {}", path.display(), err))?;
        toml::from_str(&text).map_err(|err| format!("Invalid config {}: {}", path.display(), err))
    }
}

/// Command line values take precedence over the config file.
fn merge(args: &Args, file: FileConfig) -> (Config, bool) {
    let host = args
        .host
        .clone()
        .or(file.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args
        .port
        .or(file.port)
        .map_or_else(|| DEFAULT_PORT.to_string(), |port| port.to_string());
    let timeout = args.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT_SECS);
    let password = args.password.clone().or(file.password);
    let has_password = password.is_some();

    let config = Config::new(host, port, password.unwrap_or_default()).with_options(Options {
        read_timeout: Some(Duration::from_secs(timeout)),
        write_timeout: Some(Duration::from_secs(timeout)),
        ..Options::default()
    });
    (config, has_password)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ! {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(err) = TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Cannot start logging: {}", err);
    }

    let file = match &args.config {
        Some(path) => match FileConfig::load(path) {
            Ok(file) => file,
            Err(err) => {
                error!("{}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        },
        None => FileConfig::default(),
    };
    let (mut config, has_password) = merge(&args, file);
    let address = config.address();

    let client = loop {
        if !has_password {
            config.password = prompt_password(&address);
        }

        let client = match AsyncClient::new(config.clone()) {
            Ok(client) => client,
            Err(err) => {
                error!("{}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        };

        match client.connect().await {
            Ok(()) => break client,
            Err(Error::AuthenticationFailed) if !has_password => println!("Invalid password."),
            Err(err) => {
                error!("Connection failed: {}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        }
    };
    info!("Connected to {}", address);

    let result = match args.command {
        Command::Exec { command } => client
            .execute(&command.join(" "))
            .await
            .map(|output| println!("{}", output)),
        Command::Players => client.players().await.map(|players| {
            for player in players {
                println!("{}", player);
            }
        }),
        Command::Count => client.player_count().await.map(|count| println!("{}", count)),
        Command::Scores { player } => client
            .scores(&player)
            .await
            .map(|scores| print!("{}", format_scores(&scores))),
        Command::Stats => stats(&client).await.map(|stats| print!("{}", stats)),
        Command::Shell { no_interactive } => shell_loop(&client, &address, no_interactive).await,
    };

    client.close();
    match result {
        Ok(()) => proc_exit::Code::SUCCESS.process_exit(),
        Err(err) => {
            error!("{}", err);
            proc_exit::Code::FAILURE.process_exit()
        }
    }
}

fn prompt_password(address: &str) -> String {
    print!("{}'s password: ", address);
    let _ = std::io::stdout().flush();
    match read_password() {
        Ok(password) => password,
        Err(err) => {
            error!("Cannot read password: {}", err);
            proc_exit::Code::FAILURE.process_exit();
        }
    }
}

fn format_scores(scores: &[Score]) -> String {
    if scores.is_empty() {
        return format!("{}\n", Fixed(8).paint("no scores"));
    }

    let mut text = String::new();
    for score in scores {
        let _ = writeln!(text, "{}: {}", Yellow.paint(&score.name), score.value);
    }
    text
}

async fn stats(client: &AsyncClient) -> minecraft_rcon_client::Result<String> {
    let count = client.player_count().await?;
    let players = client.players().await?;

    let mut text = format!("{} online\n", Green.paint(count.to_string()));
    for player in players {
        let scores = client.scores(&player).await?;
        let scores: Vec<_> = scores
            .iter()
            .map(|score| format!("{}={}", Yellow.paint(&score.name), score.value))
            .collect();
        let _ = writeln!(text, "{} {}", Green.paint(player), scores.join(" "));
    }
    Ok(text)
}

async fn shell_loop(
    client: &AsyncClient,
    address: &str,
    disable_interactive: bool,
) -> minecraft_rcon_client::Result<()> {
    let prompt = format!("{}> ", Fixed(10).paint(address));
    let (mut read, mut write) = new_shell(prompt, disable_interactive);

    let _ = writeln!(
        write.out(),
        "Connected. View builtins with `!help`. {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    loop {
        let line = read.read_line().await;

        let result = if let Some(builtin) = line.strip_prefix('!') {
            match builtin.trim() {
                "help" => {
                    print_help(&mut write);
                    Ok(())
                }
                "quit" | "exit" => return Ok(()),
                "players" => client.players().await.map(|players| {
                    let _ = writeln!(write.out(), "{}", players.join(", "));
                }),
                "count" => client.player_count().await.map(|count| {
                    let _ = writeln!(write.out(), "{} online", count);
                }),
                "stats" => stats(client).await.map(|stats| {
                    let _ = write!(write.out(), "{}", stats);
                }),
                "reconnect" => client.connect().await.map(|()| {
                    let _ = writeln!(write.out(), "Reconnected.");
                }),
                other => match other.strip_prefix("scores ") {
                    Some(player) => client.scores(player.trim()).await.map(|scores| {
                        let _ = write!(write.out(), "{}", format_scores(&scores));
                    }),
                    None => {
                        let _ = writeln!(write.err(), "Unknown builtin.");
                        Ok(())
                    }
                },
            }
        } else {
            debug!("running {:?}", line);
            client.execute(&line).await.map(|output| {
                if !output.is_empty() {
                    let _ = writeln!(write.out(), "{}", output);
                }
            })
        };

        if let Err(err) = result {
            let _ = writeln!(write.err(), "{} {}", Red.paint("An error occurred:"), err);
            if err.is_terminal() {
                let _ = writeln!(write.err(), "Connection lost. Use `!reconnect` to log in again.");
            }
        }
    }
}

fn print_help(write: &mut ShellWrite) {
    let out = write.out();
    let _ = writeln!(
        out,
        "{} {}",
        Green.paint(env!("CARGO_PKG_NAME")),
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", Yellow.paint("BUILTINS"));
    let _ = writeln!(out, "    !help                View this help listing");
    let _ = writeln!(out, "    !players             List players tracked by the scoreboard");
    let _ = writeln!(out, "    !count               Show the number of players online");
    let _ = writeln!(
        out,
        "    !scores {}      Show a player's scores",
        Green.paint("<PLAYER>")
    );
    let _ = writeln!(out, "    !stats               Show every tracked player's scores");
    let _ = writeln!(out, "    !reconnect           Log in again after the connection was lost");
    let _ = writeln!(out, "    !quit                Leave the console");
    let _ = writeln!(
        out,
        "    {}  Run a command on the server",
        Green.paint("<COMMAND> [ARGS...]")
    );
}
