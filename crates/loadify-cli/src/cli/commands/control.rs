//! Pause, resume and cancel: forwarded to a running `loadify get`.

use anyhow::{bail, Result};
use loadify_core::{config, ItemId};

use crate::cli::control_socket::{self, ControlAction};

pub async fn run_control(action: ControlAction, id: ItemId) -> Result<()> {
    let socket_path = config::control_socket_path()?;
    let line = format!("{} {}", action.verb(), id);
    let replies = control_socket::request(&socket_path, &line).await?;
    match replies.first() {
        Some(reply) if reply.starts_with("ok ") => {
            println!("{}", &reply[3..]);
            Ok(())
        }
        Some(reply) => bail!("{}", reply.strip_prefix("error: ").unwrap_or(reply)),
        None => bail!("no reply from control socket"),
    }
}
