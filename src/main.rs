use std::error::Error;
use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use tomate_toggl::dates::{DateRange, lookback_from_days};
use tomate_toggl::storage::{self, JsonConfigStore, Settings};
use tomate_toggl::toggl::DEFAULT_API_URL;
use tomate_toggl::{
    Catalog, EntrySelector, HostEvent, ReqwestTransport, Selection, TaskKind, TogglPlugin,
    TrackingClient, logging,
};

#[derive(Debug, Parser)]
#[command(name = "tomate-toggl", version, about = "Toggl Track integration for Tomate")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Toggl API base URL
    #[arg(long, env = "TOGGL_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check an API token and optionally save it
    CheckToken {
        token: String,
        #[arg(long)]
        save: bool,
    },
    /// List workspaces
    Workspaces,
    /// List recent distinct entry descriptions of a workspace
    Entries {
        #[arg(short, long)]
        workspace: u64,
        /// Lookback in days (defaults to the saved setting)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=31))]
        days: Option<u32>,
    },
    /// Start a running time entry
    Start {
        #[arg(short, long)]
        workspace: u64,
        #[arg(short, long)]
        description: String,
    },
    /// Stop a running time entry
    Stop { entry_id: u64 },
    /// Save the lookback window used for description suggestions
    SetLookback { days: u32 },
    /// Read host lifecycle events from stdin: `started <kind>`, `stopped`, `finished`
    Emulate,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let transport = ReqwestTransport::new(cli.api_url.clone())?;
    let mut store = JsonConfigStore::open_default()?;

    match cli.command {
        Command::CheckToken { token, save } => {
            let mut plugin = TogglPlugin::new(transport, store, Box::new(PromptSelector));
            println!("{}", plugin.check_token(&token));
            if save {
                match plugin.apply_preferences()? {
                    Some(profile) => println!("Saved token for {}", profile.email),
                    None => return Err("Token invalid, nothing saved.".into()),
                }
            }
        }
        Command::Workspaces => {
            let client = connect(transport, &store)?;
            for workspace in client.list_workspaces()? {
                println!("{:>10}  {}", workspace.id, workspace.name);
            }
        }
        Command::Entries { workspace, days } => {
            let settings = Settings::load(&store);
            let lookback = lookback_from_days(days.unwrap_or(settings.lookback_days));
            let client = connect(transport, &store)?;
            let range = DateRange::trailing_from_now(lookback)?;
            println!("{}", range.label());
            for entry in client.list_recent_entries(workspace, lookback)? {
                println!("{}", entry.description.unwrap_or_default());
            }
        }
        Command::Start {
            workspace,
            description,
        } => {
            let mut client = connect(transport, &store)?;
            let entry_id = client.start_timer(workspace, &description)?;
            println!("{entry_id}");
        }
        Command::Stop { entry_id } => {
            let mut client = connect(transport, &store)?;
            client.stop_timer(entry_id)?;
            println!("Stopped {entry_id}");
        }
        Command::SetLookback { days } => {
            storage::write_lookback_days(&mut store, days)?;
        }
        Command::Emulate => emulate(transport, store)?,
    }

    Ok(())
}

fn connect(
    transport: ReqwestTransport,
    store: &JsonConfigStore,
) -> Result<TrackingClient<ReqwestTransport>, Box<dyn Error>> {
    let token = Settings::load(store)
        .token
        .ok_or("No token saved. Run `tomate-toggl check-token <TOKEN> --save`.")?;
    let mut client = TrackingClient::new(transport);
    client.validate_token(&token)?;
    Ok(client)
}

fn emulate(transport: ReqwestTransport, store: JsonConfigStore) -> Result<(), Box<dyn Error>> {
    let mut plugin = TogglPlugin::new(transport, store, Box::new(PromptSelector));
    plugin.activate();

    loop {
        let line = match read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                eprintln!("Could not read event: {err}");
                break;
            }
        };
        let event = match parse_event(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        plugin.handle(event);
        if let Some(status) = plugin.status() {
            println!("{status}");
        }
    }

    plugin.deactivate();
    if let Some(status) = plugin.status() {
        println!("{status}");
    }
    Ok(())
}

fn parse_event(line: &str) -> Result<Option<HostEvent>, String> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("started"), kind) => {
            let task = kind.unwrap_or("pomodoro").parse::<TaskKind>()?;
            Ok(Some(HostEvent::SessionStarted { task }))
        }
        (Some("stopped"), _) => Ok(Some(HostEvent::SessionStopped)),
        (Some("finished"), _) => Ok(Some(HostEvent::SessionFinished)),
        (None, _) => Ok(None),
        (Some(other), _) => Err(format!("Unknown event: {other}")),
    }
}

/// Terminal stand-in for the selection dialog.
struct PromptSelector;

impl EntrySelector for PromptSelector {
    fn select(&mut self, catalog: &mut dyn Catalog) -> Option<Selection> {
        let workspaces = catalog.workspaces().ok()?;
        for (index, workspace) in workspaces.iter().enumerate() {
            println!("[{index}] {}", workspace.name);
        }
        let choice = prompt("Workspace (empty to cancel): ")?;
        let workspace = workspaces.get(choice.parse::<usize>().ok()?)?;

        let entries = catalog.recent_entries(workspace.id).unwrap_or_default();
        for (index, entry) in entries.iter().enumerate() {
            println!("[{index}] {}", entry.description.as_deref().unwrap_or(""));
        }
        let answer = prompt("Description (number or text): ")?;
        let description = answer
            .parse::<usize>()
            .ok()
            .and_then(|index| entries.get(index))
            .and_then(|entry| entry.description.clone())
            .unwrap_or(answer);

        Some(Selection {
            workspace_id: workspace.id,
            description,
        })
    }
}

fn prompt(label: &str) -> Option<String> {
    print!("{label}");
    io::stdout().flush().ok()?;
    read_line().ok().flatten().filter(|line| !line.is_empty())
}

fn read_line() -> Result<Option<String>, io::Error> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
