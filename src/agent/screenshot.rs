//! Screen capture for questions about what is on screen
//!
//! A query mentioning a screenshot asks the user to select a region with the
//! platform's capture tool. The PNG is then read by a vision model before the
//! text model answers.

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::{Error, Result};

/// Instructions for the vision model
pub const VISION_EXTRACTION_PROMPT: &str = "Analyze this image and provide:
1. ALL TEXT visible in the image (extract exactly as written)
2. A brief description of what the image shows

Format:
TEXT IN IMAGE:
<extracted text or \"No text visible\">

IMAGE DESCRIPTION:
<brief description>";

/// Whether a query asks about the screen
#[must_use]
pub fn wants_screenshot(query: &str) -> bool {
    query.to_lowercase().contains("screenshot")
}

/// Source of screenshots
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture a PNG
    ///
    /// `Ok(None)` means nothing was captured: the user cancelled the
    /// selection or no capture tool is available.
    ///
    /// # Errors
    ///
    /// Returns error if the capture tool could not be run or failed
    async fn capture(&self) -> Result<Option<Vec<u8>>>;
}

/// Interactive region capture tools, in order of preference on Linux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTool {
    /// macOS `screencapture`
    Screencapture,
    /// Flameshot, which writes the PNG to stdout
    Flameshot,
    /// KDE Spectacle
    Spectacle,
    /// GNOME Screenshot
    GnomeScreenshot,
    /// scrot
    Scrot,
    /// `import` from the `ImageMagick` suite
    Import,
}

const LINUX_TOOLS: [CaptureTool; 5] = [
    CaptureTool::Flameshot,
    CaptureTool::Spectacle,
    CaptureTool::GnomeScreenshot,
    CaptureTool::Scrot,
    CaptureTool::Import,
];

impl CaptureTool {
    /// Executable name
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Screencapture => "screencapture",
            Self::Flameshot => "flameshot",
            Self::Spectacle => "spectacle",
            Self::GnomeScreenshot => "gnome-screenshot",
            Self::Scrot => "scrot",
            Self::Import => "import",
        }
    }

    /// First tool usable on this platform
    #[must_use]
    pub fn detect() -> Option<Self> {
        match std::env::consts::OS {
            "macos" => Some(Self::Screencapture),
            "linux" => LINUX_TOOLS
                .into_iter()
                .find(|tool| which::which(tool.program()).is_ok()),
            _ => None,
        }
    }

    /// Command capturing a region into `path` (Flameshot writes to stdout)
    fn command(self, path: &Path) -> Command {
        let mut cmd = Command::new(self.program());
        match self {
            Self::Screencapture => cmd.arg("-i").arg(path),
            Self::Flameshot => cmd.args(["gui", "--raw"]),
            Self::Spectacle => cmd.args(["-r", "-b", "-o"]).arg(path),
            Self::GnomeScreenshot => cmd.args(["-a", "-f"]).arg(path),
            Self::Scrot => cmd.arg("-s").arg(path),
            Self::Import => cmd.arg(path),
        };
        cmd
    }
}

/// Captures with whatever tool the platform offers
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeScreenCapture;

#[async_trait]
impl ScreenCapture for NativeScreenCapture {
    async fn capture(&self) -> Result<Option<Vec<u8>>> {
        let Some(tool) = CaptureTool::detect() else {
            tracing::warn!(os = std::env::consts::OS, "no screenshot tool found");
            return Ok(None);
        };

        let path = std::env::temp_dir().join(format!("jarvis-screenshot-{}.png", Uuid::new_v4()));
        let result = capture_with(tool, &path).await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "screenshot cleanup failed"),
        }

        result
    }
}

async fn capture_with(tool: CaptureTool, path: &Path) -> Result<Option<Vec<u8>>> {
    tracing::info!(tool = tool.program(), "capturing screenshot");

    let output = tool
        .command(path)
        .output()
        .await
        .map_err(|e| Error::Agent(format!("failed to run {}: {e}", tool.program())))?;

    if tool == CaptureTool::Flameshot {
        // Non-zero exit or no output means the selection was cancelled
        return Ok((output.status.success() && !output.stdout.is_empty()).then_some(output.stdout));
    }

    if !output.status.success() {
        return Err(Error::Agent(format!(
            "{} exited with {}: {}",
            tool.program(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    match tokio::fs::read(path).await {
        Ok(png) if png.is_empty() => Ok(None),
        Ok(png) => Ok(Some(png)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
