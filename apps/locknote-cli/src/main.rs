use anyhow::{anyhow, bail, Context};
use locknote_core::app::{open_configured_session, Session};
use locknote_core::config::ConfigStore;
use locknote_core::gate::GateState;
use locknote_core::models::{ChecklistItem, Note};
use locknote_core::telemetry::TracingTelemetry;
use locknote_core::vault::SecurityOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const VIEW_TIMEOUT: Duration = Duration::from_secs(5);
const USAGE: &str = "Usage: locknote [--db <path>] <command>
  status
  list [--archived] [--query <text>] [--private] [--passcode <code>]
  add --title <text> [--content <text> | --item <text>...] [--pinned] [--private] [--passcode <code>]
  delete --id <n> [--passcode <code>]
  archive --id <n> [--private] [--passcode <code>]
  enable-security [--passcode <code>] [--biometric] [--private-notes]
  disable-security --passcode <code>";

#[derive(Debug, PartialEq)]
enum Command {
    Status,
    List {
        archived: bool,
        query: Option<String>,
        private: bool,
    },
    Add {
        title: String,
        content: Option<String>,
        items: Vec<String>,
        pinned: bool,
        private: bool,
    },
    Delete {
        id: i64,
    },
    Archive {
        id: i64,
        private: bool,
    },
    EnableSecurity {
        biometric: bool,
        private_notes: bool,
    },
    DisableSecurity,
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    db_path: Option<PathBuf>,
    passcode: Option<String>,
    command: Command,
}

fn take_value<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<String, String> {
    iter.next()
        .map(|value| value.to_string())
        .ok_or_else(|| format!("Missing {flag} value"))
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut db_path: Option<PathBuf> = None;
    let mut passcode: Option<String> = None;
    let mut command: Option<String> = None;
    let mut archived = false;
    let mut query: Option<String> = None;
    let mut private = false;
    let mut title: Option<String> = None;
    let mut content: Option<String> = None;
    let mut items: Vec<String> = Vec::new();
    let mut pinned = false;
    let mut id: Option<i64> = None;
    let mut biometric = false;
    let mut private_notes = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => db_path = Some(PathBuf::from(take_value(&mut iter, "--db")?)),
            "--passcode" => passcode = Some(take_value(&mut iter, "--passcode")?),
            "--archived" => archived = true,
            "--query" => query = Some(take_value(&mut iter, "--query")?),
            "--private" => private = true,
            "--title" => title = Some(take_value(&mut iter, "--title")?),
            "--content" => content = Some(take_value(&mut iter, "--content")?),
            "--item" => items.push(take_value(&mut iter, "--item")?),
            "--pinned" => pinned = true,
            "--id" => {
                let value = take_value(&mut iter, "--id")?;
                id = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid --id value: {value}"))?,
                );
            }
            "--biometric" => biometric = true,
            "--private-notes" => private_notes = true,
            "--help" | "-h" => return Err(String::new()),
            value if value.starts_with("--") => return Err(format!("Unknown argument: {value}")),
            value => {
                if command.is_some() {
                    return Err(format!("Unexpected argument: {value}"));
                }
                command = Some(value.to_string());
            }
        }
    }

    let command = match command.as_deref() {
        Some("status") => Command::Status,
        Some("list") => Command::List {
            archived,
            query,
            private,
        },
        Some("add") => {
            if content.is_some() && !items.is_empty() {
                return Err("Use either --content or --item, not both".to_string());
            }
            Command::Add {
                title: title.ok_or_else(|| "Missing --title".to_string())?,
                content,
                items,
                pinned,
                private,
            }
        }
        Some("delete") => Command::Delete {
            id: id.ok_or_else(|| "Missing --id".to_string())?,
        },
        Some("archive") => Command::Archive {
            id: id.ok_or_else(|| "Missing --id".to_string())?,
            private,
        },
        Some("enable-security") => Command::EnableSecurity {
            biometric,
            private_notes,
        },
        Some("disable-security") => Command::DisableSecurity,
        Some(other) => return Err(format!("Unknown command: {other}")),
        None => return Err("Missing command".to_string()),
    };

    Ok(CliArgs {
        db_path,
        passcode,
        command,
    })
}

fn unlock(session: &Session, passcode: Option<&str>) -> anyhow::Result<()> {
    if session.manager().gate_state() != GateState::Locked {
        return Ok(());
    }
    let passcode = passcode.ok_or_else(|| anyhow!("notes are locked; pass --passcode"))?;
    session.manager().unlock_with_passcode(passcode)?;
    Ok(())
}

fn enter_private_mode(session: &Session) -> anyhow::Result<()> {
    if !session.manager().toggle_private_mode() {
        bail!("private notes are not enabled");
    }
    Ok(())
}

fn format_note(note: &Note) -> String {
    let mut flags = Vec::new();
    if note.pinned {
        flags.push("pinned");
    }
    if note.private {
        flags.push("private");
    }
    if note.encrypted {
        flags.push("encrypted");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    let content = note.content().replace('\n', " | ");
    format!("{:>4}  {}{}  {}", note.id, note.title, flags, content)
}

fn execute(session: &Session, args: &CliArgs) -> anyhow::Result<String> {
    let passcode = args.passcode.as_deref();
    match &args.command {
        Command::Status => {
            let status = session.manager().status();
            let lines = [
                format!("database: {}", session.db_path().display()),
                format!("security: {}", status.security_enabled),
                format!("biometric: {}", status.biometric_enabled),
                format!("private notes: {}", status.private_notes_enabled),
                format!(
                    "key version: {}",
                    status
                        .key_version
                        .map(|version| version.to_string())
                        .unwrap_or_else(|| "-".to_string())
                ),
                format!("gate: {:?}", status.gate),
            ];
            Ok(lines.join("\n"))
        }
        Command::List {
            archived,
            query,
            private,
        } => {
            unlock(session, passcode)?;
            if *private {
                enter_private_mode(session)?;
            }
            if let Some(query) = query {
                session.manager().set_search_query(query.clone());
            }
            let view = session.manager().notes()?;
            let notes = view
                .wait_for(VIEW_TIMEOUT, |notes| notes.revision > 0)?
                .ok_or_else(|| anyhow!("timed out waiting for notes"))?;
            let list = if *archived {
                &notes.archived
            } else {
                &notes.active
            };
            if list.is_empty() {
                return Ok("no notes".to_string());
            }
            Ok(list.iter().map(format_note).collect::<Vec<_>>().join("\n"))
        }
        Command::Add {
            title,
            content,
            items,
            pinned,
            private,
        } => {
            unlock(session, passcode)?;
            if *private {
                enter_private_mode(session)?;
            }
            let note = if items.is_empty() {
                Note::text(title.clone(), content.clone().unwrap_or_default())
            } else {
                Note::checklist(
                    title.clone(),
                    items.iter().map(ChecklistItem::new).collect(),
                )
            };
            let saved = session.manager().save_note(Note {
                pinned: *pinned,
                ..note
            })?;
            Ok(format!(
                "saved note {}{}",
                saved.id,
                if saved.encrypted { " (encrypted)" } else { "" }
            ))
        }
        Command::Delete { id } => {
            unlock(session, passcode)?;
            match session.manager().delete_note(*id)? {
                0 => Ok(format!("note {id} not found")),
                _ => Ok(format!("deleted note {id}")),
            }
        }
        Command::Archive { id, private } => {
            unlock(session, passcode)?;
            if *private {
                enter_private_mode(session)?;
            }
            let note = session
                .manager()
                .get_note(*id)?
                .ok_or_else(|| anyhow!("note {id} not found"))?;
            session.manager().archive_note(note)?;
            Ok(format!("archived note {id}"))
        }
        Command::EnableSecurity {
            biometric,
            private_notes,
        } => {
            let version = session.manager().enable_security(&SecurityOptions {
                passcode: passcode.map(str::to_string),
                biometric: *biometric,
                private_notes: *private_notes,
            })?;
            Ok(format!("security enabled (key v{version})"))
        }
        Command::DisableSecurity => {
            unlock(session, passcode)?;
            let report = session.manager().disable_security()?;
            Ok(format!(
                "security disabled, {} note(s) decrypted",
                report.migrated
            ))
        }
    }
}

fn run(args: CliArgs) -> anyhow::Result<String> {
    let config_store = ConfigStore::default_store()?;
    let config = config_store
        .load_or_init()
        .with_context(|| format!("loading {}", config_store.config_path().display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let session = open_configured_session(
        &config_store,
        &config,
        args.db_path.as_deref(),
        Arc::new(TracingTelemetry),
    )
    .context("opening notes database")?;
    tracing::debug!(db = %session.db_path().display(), "session opened");
    execute(&session, &args)
}

fn main() {
    let args = std::env::args().collect::<Vec<_>>();
    let parsed = match parse_args(&args) {
        Ok(value) => value,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    match run(parsed) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{execute, parse_args, CliArgs, Command};
    use locknote_core::app::open_session;
    use locknote_core::telemetry::RecordingTelemetry;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn args(raw: &[&str]) -> Vec<String> {
        std::iter::once("locknote")
            .chain(raw.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn command(raw: &[&str]) -> CliArgs {
        parse_args(&args(raw)).expect("parse args")
    }

    #[test]
    fn parses_add_with_checklist_items() {
        let parsed = command(&["add", "--title", "Trip", "--item", "passport", "--item", "tickets", "--pinned"]);
        assert_eq!(
            parsed.command,
            Command::Add {
                title: "Trip".to_string(),
                content: None,
                items: vec!["passport".to_string(), "tickets".to_string()],
                pinned: true,
                private: false,
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["add"])).is_err());
        assert!(parse_args(&args(&["delete", "--id", "abc"])).is_err());
        assert!(parse_args(&args(&["list", "--bogus"])).is_err());
        assert!(parse_args(&args(&["add", "--title", "x", "--content", "y", "--item", "z"])).is_err());
        assert_eq!(parse_args(&args(&["--help"])), Err(String::new()));
    }

    #[test]
    fn parses_archive_with_private_flag() {
        assert_eq!(
            command(&["archive", "--id", "7", "--private"]).command,
            Command::Archive {
                id: 7,
                private: true,
            }
        );
        assert_eq!(
            command(&["archive", "--id", "7"]).command,
            Command::Archive {
                id: 7,
                private: false,
            }
        );
    }

    #[test]
    fn global_options_can_come_first() {
        let parsed = command(&["--db", "/tmp/notes.db", "--passcode", "1234", "disable-security"]);
        assert_eq!(parsed.command, Command::DisableSecurity);
        assert_eq!(parsed.passcode.as_deref(), Some("1234"));
        assert!(parsed.db_path.is_some());
    }

    #[test]
    fn private_workflow_through_commands() {
        let dir = tempdir().expect("tempdir");
        let session = open_session(
            &dir.path().join("locknote.db"),
            Duration::from_millis(50),
            Arc::new(RecordingTelemetry::new()),
        )
        .expect("open session");

        let enabled = execute(
            &session,
            &command(&["enable-security", "--passcode", "1234", "--private-notes"]),
        )
        .expect("enable");
        assert!(enabled.contains("security enabled"));

        let added = execute(
            &session,
            &command(&["add", "--title", "Secret", "--content", "x", "--private"]),
        )
        .expect("add");
        assert!(added.contains("(encrypted)"));

        let listed = execute(&session, &command(&["list"])).expect("list");
        assert!(listed.contains("Secret"));

        let disabled = execute(
            &session,
            &command(&["disable-security", "--passcode", "1234"]),
        )
        .expect("disable");
        assert!(disabled.contains("1 note(s) decrypted"));
    }

    #[test]
    fn archiving_a_private_note_in_a_new_process_keeps_it_private() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("locknote.db");
        let open = || {
            open_session(
                &db_path,
                Duration::from_millis(50),
                Arc::new(RecordingTelemetry::new()),
            )
            .expect("open session")
        };

        {
            let session = open();
            execute(
                &session,
                &command(&["enable-security", "--passcode", "1234", "--private-notes"]),
            )
            .expect("enable");
            let added = execute(
                &session,
                &command(&["add", "--title", "Secret", "--content", "x", "--private"]),
            )
            .expect("add");
            assert_eq!(added, "saved note 1 (encrypted)");
        }

        {
            let session = open();
            let archived = execute(
                &session,
                &command(&["archive", "--id", "1", "--passcode", "1234"]),
            )
            .expect("archive");
            assert_eq!(archived, "archived note 1");
        }

        let regular = execute(
            &open(),
            &command(&["list", "--archived", "--passcode", "1234"]),
        )
        .expect("list regular");
        assert_eq!(regular, "no notes");

        let private = execute(
            &open(),
            &command(&["list", "--archived", "--private", "--passcode", "1234"]),
        )
        .expect("list private");
        assert!(private.contains("Secret"));
        assert!(private.contains("private"));
    }
}
