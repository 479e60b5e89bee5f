//! Editor launcher - opens the config file in a separate, detached process
//! The editor keeps running on its own after the grid window closes

use std::path::Path;
#[cfg(windows)]
use std::process::{Command, Stdio};
use tracing::info;

/// Open `path` in a text editor.
///
/// Windows always uses Notepad; other platforms use the desktop's default
/// handler for the file.
pub fn launch_editor(path: &Path) -> Result<(), String> {
    // The editor needs a file to open
    if !path.exists() {
        return Err(format!("Config not found: {}", path.display()));
    }

    info!("[Launcher] Opening {}", path.display());

    #[cfg(windows)]
    {
        Command::new("notepad.exe")
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("Failed to spawn notepad: {}", e))?;
    }

    #[cfg(not(windows))]
    {
        open::that(path).map_err(|e| format!("Failed to open editor: {}", e))?;
    }

    Ok(())
}
