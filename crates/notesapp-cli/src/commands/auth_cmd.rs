use notesapp_core::{SessionUser, SignUpOutcome};

use crate::cli::AuthCommands;
use crate::commands::common::AppContext;
use crate::error::CliError;

pub async fn run_auth(app: &AppContext, command: AuthCommands) -> Result<(), CliError> {
    match command {
        AuthCommands::Signin { email, password } => {
            let user = app.auth.sign_in(&email, &password).await?;
            println!("Signed in as {}", user.email);
        }
        AuthCommands::Signup { email, password } => {
            match app.auth.sign_up(&email, &password).await? {
                SignUpOutcome::SignedIn(user) => println!("Signed up and signed in as {}", user.email),
                SignUpOutcome::ConfirmationRequired => {
                    println!("Check {email} for a confirmation link, then run `notesapp auth signin`.");
                }
            }
        }
        AuthCommands::Signout => {
            let was_signed_in = app.auth.user().is_some();
            app.auth.sign_out().await?;
            if was_signed_in {
                println!("Signed out");
            } else {
                println!("Not signed in");
            }
        }
        AuthCommands::Status => println!("{}", describe_status(app.auth.user().as_ref(), app)),
    }
    Ok(())
}

pub fn describe_status(user: Option<&SessionUser>, app: &AppContext) -> String {
    let mode = if app.backend.is_configured() {
        "remote backend"
    } else {
        "offline"
    };
    user.map_or_else(
        || format!("Not signed in ({mode})"),
        |user| format!("Signed in as {} [{}] ({mode})", user.email, user.id),
    )
}
