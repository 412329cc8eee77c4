//! Foreground presenter: renders engine snapshots to a terminal and turns
//! typed lines into triggers.

use std::fmt::Write as _;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::engine::EngineHandle;
use crate::engine::Snapshot;
use crate::engine::Trigger;

const HELP: &str = "<n> toggle | r rescan | v voice | s show | h hide | q quit";

/// Render a snapshot as the text block printed after every change.
pub fn render(snapshot: &Snapshot, voice_enabled: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "== {} ==", snapshot.title);
    if !snapshot.visible {
        let _ = writeln!(out, "(hidden) press s to show");
        return out;
    }

    let _ = writeln!(out, "{}", snapshot.status);
    if let Some(hub) = &snapshot.hub {
        let _ = writeln!(out, "hub: {}", hub);
    }

    let width = snapshot
        .devices
        .iter()
        .map(|d| d.name.chars().count())
        .max()
        .unwrap_or(0);
    for (i, device) in snapshot.devices.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}. {:<width$}  {:<8} {}",
            i + 1,
            device.name,
            device.state,
            device.entity_id,
            width = width,
        );
    }

    if voice_enabled {
        let _ = writeln!(out, "{}", HELP);
    } else {
        let _ = writeln!(out, "{}", HELP.replace(" | v voice", ""));
    }
    out
}

/// Map one input line to a trigger. Device numbers refer to the listing in
/// `snapshot`.
pub fn parse_input(line: &str, snapshot: &Snapshot) -> Result<Trigger, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Trigger::Interact);
    }

    if let Ok(n) = line.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| snapshot.devices.get(i))
            .map(|d| Trigger::Toggle(d.entity_id.clone()))
            .ok_or_else(|| format!("No device {}", n));
    }

    match line.to_lowercase().as_str() {
        "r" | "rescan" => Ok(Trigger::Scan),
        "v" | "voice" => Ok(Trigger::Voice),
        "s" | "show" => Ok(Trigger::Show),
        "h" | "hide" => Ok(Trigger::Hide),
        "q" | "quit" => Ok(Trigger::Quit),
        other => Err(format!("Unknown command '{}' ({})", other, HELP)),
    }
}

/// Drive the engine from `input` and print every published snapshot to
/// `output`. Returns when the user quits, input ends, or the engine stops.
pub async fn run<R, W>(
    handle: EngineHandle,
    input: R,
    mut output: W,
    voice_enabled: bool,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut snapshots = handle.subscribe();
    let mut lines = input.lines();

    let first = render(&snapshots.borrow_and_update(), voice_enabled);
    output.write_all(first.as_bytes()).await?;
    output.flush().await?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    tracing::debug!("Engine stopped, leaving console");
                    return Ok(());
                }
                let text = render(&snapshots.borrow_and_update(), voice_enabled);
                output.write_all(text.as_bytes()).await?;
                output.flush().await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!("Console input closed");
                    handle.send(Trigger::Quit).await;
                    return Ok(());
                };

                let snapshot = handle.snapshot();
                match parse_input(&line, &snapshot) {
                    Ok(trigger) => {
                        let quit = trigger == Trigger::Quit;
                        if !handle.send(trigger).await || quit {
                            return Ok(());
                        }
                    }
                    Err(message) => {
                        output.write_all(format!("{}\n", message).as_bytes()).await?;
                        output.flush().await?;
                        handle.send(Trigger::Interact).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DeviceView;
    use crate::engine::RoomView;
    use crate::engine::Status;

    fn snapshot() -> Snapshot {
        let device = |id: &str, name: &str, state: &str| DeviceView {
            entity_id: id.to_string(),
            name: name.to_string(),
            domain: id.split('.').next().unwrap_or_default().to_string(),
            state: state.to_string(),
        };
        Snapshot {
            title: "roomctl".to_string(),
            status: Status::Ready {
                area: "Cucina".to_string(),
            },
            visible: true,
            hub: Some("http://ha.local:8123".to_string()),
            room: Some(RoomView {
                id: "cucina".to_string(),
                name: "Cucina".to_string(),
            }),
            devices: vec![
                device("light.ceiling", "Ceiling", "on"),
                device("switch.coffee_machine", "Coffee machine", "off"),
            ],
            last_voice: None,
        }
    }

    #[test]
    fn test_render_room() {
        insta::assert_snapshot!(render(&snapshot(), true), @r"
        == roomctl ==
        Area: Cucina - Ready
        hub: http://ha.local:8123
          1. Ceiling         on       light.ceiling
          2. Coffee machine  off      switch.coffee_machine
        <n> toggle | r rescan | v voice | s show | h hide | q quit
        ");
    }

    #[test]
    fn test_render_hidden() {
        let snapshot = Snapshot {
            visible: false,
            ..snapshot()
        };
        insta::assert_snapshot!(render(&snapshot, false), @r"
        == roomctl ==
        (hidden) press s to show
        ");
    }

    #[test]
    fn test_render_without_voice() {
        let text = render(&snapshot(), false);
        assert!(!text.contains("voice"));
        assert!(text.contains("r rescan | s show"));
    }

    #[test]
    fn test_parse_input() {
        let snapshot = snapshot();
        assert_eq!(parse_input("", &snapshot), Ok(Trigger::Interact));
        assert_eq!(
            parse_input(" 2 ", &snapshot),
            Ok(Trigger::Toggle("switch.coffee_machine".to_string()))
        );
        assert_eq!(parse_input("R", &snapshot), Ok(Trigger::Scan));
        assert_eq!(parse_input("q", &snapshot), Ok(Trigger::Quit));
        assert_eq!(parse_input("v", &snapshot), Ok(Trigger::Voice));
        assert_eq!(parse_input("3", &snapshot), Err("No device 3".to_string()));
        assert_eq!(parse_input("0", &snapshot), Err("No device 0".to_string()));
        assert!(parse_input("dance", &snapshot).is_err());
    }
}
