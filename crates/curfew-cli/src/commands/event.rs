//! Browser bridge commands: forward events, fetch queued actions

use anyhow::{bail, Result};
use curfew_core::{
    config::CurfewConfig,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    BrowserEvent, HostCommand,
};
use std::path::Path;

pub async fn send_event(data_dir: &Path, config: &CurfewConfig, event: BrowserEvent) -> Result<()> {
    let client = IpcClient::new(&config.socket_path(data_dir));
    log::debug!("Sending {event:?}");
    match client.send_command(IpcRequest::Event(event)).await? {
        IpcResponse::EventAccepted => Ok(()),
        IpcResponse::Error(e) => bail!("Daemon rejected event: {e}"),
        other => bail!("Unexpected response from daemon: {other:?}"),
    }
}

/// Print pending host commands as JSON lines, oldest first
pub async fn drain_commands(data_dir: &Path, config: &CurfewConfig) -> Result<()> {
    let client = IpcClient::new(&config.socket_path(data_dir));
    let commands = match client.send_command(IpcRequest::DrainCommands).await? {
        IpcResponse::Commands(commands) => commands,
        other => bail!("Unexpected response from daemon: {other:?}"),
    };
    for command in &commands {
        println!("{}", command_json(command));
    }
    Ok(())
}

fn command_json(command: &HostCommand) -> serde_json::Value {
    match command {
        HostCommand::Redirect { tab_id, url } => serde_json::json!({
            "type": "redirect",
            "tabId": tab_id,
            "url": url,
        }),
        HostCommand::ShowNotification { id, title, body } => serde_json::json!({
            "type": "showNotification",
            "id": id,
            "title": title,
            "message": body,
        }),
        HostCommand::ClearNotification { id } => serde_json::json!({
            "type": "clearNotification",
            "id": id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_json() {
        let json = command_json(&HostCommand::Redirect {
            tab_id: 12,
            url: "blocked.html".to_string(),
        });
        assert_eq!(json["type"], "redirect");
        assert_eq!(json["tabId"], 12);
        assert_eq!(json["url"], "blocked.html");
    }

    #[test]
    fn test_notification_json() {
        let json = command_json(&HostCommand::ShowNotification {
            id: 3,
            title: "Time Limits".to_string(),
            body: "5 minutes of social media time remaining".to_string(),
        });
        assert_eq!(json["type"], "showNotification");
        assert_eq!(json["message"], "5 minutes of social media time remaining");
        assert_eq!(
            command_json(&HostCommand::ClearNotification { id: 3 })["id"],
            3
        );
    }
}
