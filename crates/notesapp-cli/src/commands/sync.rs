use notesapp_core::RemoteSync;

use crate::commands::common::AppContext;
use crate::error::CliError;

pub async fn run_sync(app: &AppContext) -> Result<usize, CliError> {
    if app.backend.get_client().is_none() {
        return Err(CliError::BackendNotConfigured);
    }
    if app.auth.user().is_none() {
        return Err(CliError::NotSignedIn);
    }

    match app.notes.sync_from_remote().await {
        RemoteSync::Replaced(count) => {
            println!("Synced {count} notes");
            Ok(count)
        }
        RemoteSync::Skipped => Err(CliError::NotSignedIn),
        RemoteSync::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}
