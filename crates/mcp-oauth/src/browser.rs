use crate::error::{OAuthError, Result};
use std::process::Command;
use tracing::{debug, info, warn};

/// Cross-platform launcher for the system browser.
///
/// Callers are expected to pass URLs through [`crate::sanitize::sanitize_url`]
/// first; this module only handles the platform dispatch and the
/// paste-it-yourself fallback.
pub struct BrowserLauncher;

impl BrowserLauncher {
    /// Open `url` in the default browser. If no launcher works, the URL
    /// is printed to stderr (stdout carries the MCP stream) so the user
    /// can open it manually, and the call still succeeds.
    pub fn launch(url: &str) -> Result<()> {
        info!("Opening browser for authorization");

        let result = if cfg!(target_os = "windows") {
            Self::launch_windows(url)
        } else if cfg!(target_os = "macos") {
            Self::launch_macos(url)
        } else {
            Self::launch_linux(url)
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Failed to launch browser: {}", e);
                eprintln!("Please open the following URL in your browser to authorize:");
                eprintln!("  {}", url);
                Ok(())
            }
        }
    }

    fn launch_windows(url: &str) -> Result<()> {
        let output = Command::new("cmd")
            .args(["/c", "start", "", url])
            .output()
            .map_err(|e| OAuthError::BrowserLaunch(format!("cmd start failed: {}", e)))?;

        if !output.status.success() {
            return Err(OAuthError::BrowserLaunch(format!(
                "cmd start exited with {}",
                output.status
            )));
        }
        Ok(())
    }

    fn launch_macos(url: &str) -> Result<()> {
        let output = Command::new("open")
            .arg(url)
            .output()
            .map_err(|e| OAuthError::BrowserLaunch(format!("open failed: {}", e)))?;

        if !output.status.success() {
            return Err(OAuthError::BrowserLaunch(format!(
                "open exited with {}",
                output.status
            )));
        }
        Ok(())
    }

    fn launch_linux(url: &str) -> Result<()> {
        let launchers = ["xdg-open", "gnome-open", "kde-open"];

        for launcher in &launchers {
            match Command::new(launcher).arg(url).output() {
                Ok(output) if output.status.success() => {
                    debug!("Launched browser with {}", launcher);
                    return Ok(());
                }
                Ok(output) => {
                    debug!("{} exited with {}", launcher, output.status);
                }
                Err(e) => {
                    debug!("{} not available: {}", launcher, e);
                }
            }
        }

        Err(OAuthError::BrowserLaunch(
            "no suitable browser launcher found".to_string(),
        ))
    }
}
