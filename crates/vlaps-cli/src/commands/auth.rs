use clap::Subcommand;
use vlaps_core::{Config, RemoteStore};

use super::{runtime, sheets, CmdResult};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Authorize with Google in the browser and provision the spreadsheet
    Login,
    /// Remove the stored token
    Logout,
    /// Check authentication status
    Status,
    /// Store the OAuth client credentials in the OS keyring
    Credentials {
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
    },
}

pub fn run(action: AuthAction) -> CmdResult {
    let config = Config::load()?;
    let store = sheets(&config)?;
    match action {
        AuthAction::Login => {
            runtime()?.block_on(store.reauthorize())?;
            let id = store.spreadsheet_id()?.unwrap_or_default();
            println!("Google authenticated, spreadsheet {id}");
        }
        AuthAction::Logout => {
            store.logout()?;
            println!("Google disconnected");
        }
        AuthAction::Status => {
            let authenticated = store.is_authenticated()?;
            println!(
                "{}",
                if authenticated {
                    "authenticated"
                } else {
                    "not authenticated"
                }
            );
            if let Some(id) = store.spreadsheet_id()? {
                println!("spreadsheet: {id}");
            }
        }
        AuthAction::Credentials {
            client_id,
            client_secret,
        } => {
            store.set_client_credentials(&client_id, &client_secret)?;
            println!("client credentials stored");
        }
    }
    Ok(())
}
