/// Configuration module for the grid application.
///
/// This module provides functionality for managing application configuration,
/// including:
/// - The persisted `Config` record (grid size, client size, colors)
/// - Its line-based `key=value` text format
/// - The `ConfigStore` persistence seam and the file-backed implementation
/// - Startup flags that override stored values
/// - Determining the appropriate data directory for the application
///
/// The configuration is saved to and loaded from a `config.txt` file located
/// in the platform-specific application data directory
/// (%APPDATA%/IpcGrid/ on Windows).
///
/// # Example
///
/// ```no_run
/// use ipc_grid::config::{ConfigStore, FileConfigStore};
///
/// let store = FileConfigStore::at_default_location().expect("no data directory");
/// let mut config = store.load().unwrap_or_default();
/// config.client_width = 640;
/// store.save(&config).expect("Failed to save config");
/// ```
use crate::color::Rgb;
use crate::error::GridError;
use crate::grid::GridSize;
use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_WIN_WIDTH: u32 = 320;
pub const DEFAULT_WIN_HEIGHT: u32 = 240;
pub const CONFIG_FILE_NAME: &str = "config.txt";

/// Persisted application configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub grid_size: GridSize,
    /// Client area width in physical pixels
    pub client_width: u32,
    /// Client area height in physical pixels
    pub client_height: u32,
    pub background: Rgb,
    pub grid_color: Rgb,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            grid_size: GridSize::default(),
            client_width: DEFAULT_WIN_WIDTH,
            client_height: DEFAULT_WIN_HEIGHT,
            background: Rgb::BLUE,
            grid_color: Rgb::RED,
        }
    }
}

impl Config {
    /// Serialize to the `key=value` text format
    pub fn to_text(&self) -> String {
        format!(
            "GridSize={}\nWindowWidth={}\nWindowHeight={}\nBackgroundColor={}\nGridColor={}\n",
            self.grid_size, self.client_width, self.client_height, self.background, self.grid_color
        )
    }

    /// Parse the text format. Fields that fail to parse keep their default;
    /// every problem is returned alongside the result.
    pub fn parse(text: &str) -> (Config, Vec<GridError>) {
        let mut config = Config::default();
        let mut issues = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let issue = |reason: String| GridError::ConfigFormat {
                line: line_no,
                reason,
            };

            let Some((key, value)) = line.split_once('=') else {
                issues.push(issue(format!("expected key=value, got `{}`", line)));
                continue;
            };
            let value = value.trim();

            let parsed = match key.trim() {
                "GridSize" => value
                    .parse::<i64>()
                    .map_err(|e| format!("GridSize: {}", e))
                    .and_then(|n| GridSize::new(n).map_err(|e| e.to_string()))
                    .map(|size| config.grid_size = size),
                "WindowWidth" => {
                    parse_dimension(value).map(|w| config.client_width = w)
                }
                "WindowHeight" => {
                    parse_dimension(value).map(|h| config.client_height = h)
                }
                "BackgroundColor" => parse_rgb(value).map(|c| config.background = c),
                "GridColor" => parse_rgb(value).map(|c| config.grid_color = c),
                other => Err(format!("unknown key `{}`", other)),
            };

            if let Err(reason) = parsed {
                issues.push(issue(reason));
            }
        }

        (config, issues)
    }
}

fn parse_dimension(value: &str) -> std::result::Result<u32, String> {
    match value.parse::<u32>() {
        Ok(0) => Err("dimension must be positive".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("`{}`: {}", value, e)),
    }
}

/// Parse `r;g;b` with each channel in 0..=255
pub fn parse_rgb(value: &str) -> std::result::Result<Rgb, String> {
    let channels: Vec<&str> = value.split(';').map(str::trim).collect();
    let [r, g, b] = channels.as_slice() else {
        return Err(format!("expected r;g;b, got `{}`", value));
    };
    let channel = |s: &str| {
        s.parse::<u8>()
            .map_err(|_| format!("color channel `{}` is not in 0..=255", s))
    };
    Ok(Rgb::new(channel(r)?, channel(g)?, channel(b)?))
}

/// Persistence backend for `Config`
pub trait ConfigStore {
    /// Load the stored config; a missing store yields the defaults
    fn load(&self) -> Result<Config>;

    fn save(&self, config: &Config) -> Result<()>;

    /// File backing this store, if any
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Plain text file store
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `config.txt` in the application data directory
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(get_data_directory()?.join(CONFIG_FILE_NAME)))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config> {
        // If file doesn't exist, return default config
        if !self.path.exists() {
            info!("No config at {}, using defaults", self.path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let (config, issues) = Config::parse(&contents);
        for issue in &issues {
            warn!("{}: {} (default kept)", self.path.display(), issue);
        }

        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        fs::write(&self.path, config.to_text())
            .map_err(|e| anyhow!("Failed to write {}: {}", self.path.display(), e))?;

        info!("Saved config to {}", self.path.display());
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Command-line overrides, applied on top of the stored config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupFlags {
    pub grid_size: Option<GridSize>,
    pub client_width: Option<u32>,
    pub client_height: Option<u32>,
    pub config_path: Option<PathBuf>,
    /// Legacy persistence selector (`-m1` .. `-m4`)
    pub legacy_method: Option<u8>,
}

impl StartupFlags {
    /// Parse flags, excluding the program name. Flags are case-insensitive;
    /// unknown ones are skipped with a warning.
    pub fn parse<I>(args: I) -> crate::error::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = StartupFlags::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let flag = arg.to_ascii_lowercase();
            match flag.as_str() {
                "-m1" | "-m2" | "-m3" | "-m4" => {
                    let method = flag.as_bytes()[2] - b'0';
                    debug!("Persistence selector -m{} uses the file store", method);
                    flags.legacy_method = Some(method);
                }
                "-grid" => {
                    let value = flag_value(&arg, args.next())?;
                    let n = value.parse::<i64>().map_err(|e| GridError::InvalidArgument {
                        flag: arg.clone(),
                        reason: format!("`{}`: {}", value, e),
                    })?;
                    flags.grid_size = Some(GridSize::new(n)?);
                }
                "-width" => {
                    let value = flag_value(&arg, args.next())?;
                    flags.client_width = Some(flag_dimension(&arg, &value)?);
                }
                "-height" => {
                    let value = flag_value(&arg, args.next())?;
                    flags.client_height = Some(flag_dimension(&arg, &value)?);
                }
                "-config" => {
                    let value = flag_value(&arg, args.next())?;
                    flags.config_path = Some(PathBuf::from(value));
                }
                _ => warn!("Ignoring unknown argument `{}`", arg),
            }
        }

        Ok(flags)
    }

    /// Overwrite the fields of `config` that were given on the command line
    pub fn apply(&self, config: &mut Config) {
        if let Some(size) = self.grid_size {
            config.grid_size = size;
        }
        if let Some(width) = self.client_width {
            config.client_width = width;
        }
        if let Some(height) = self.client_height {
            config.client_height = height;
        }
    }

    pub fn store(&self) -> Result<FileConfigStore> {
        match &self.config_path {
            Some(path) => Ok(FileConfigStore::new(path)),
            None => FileConfigStore::at_default_location(),
        }
    }
}

fn flag_value(flag: &str, value: Option<String>) -> crate::error::Result<String> {
    value.ok_or_else(|| GridError::InvalidArgument {
        flag: flag.to_string(),
        reason: "missing value".to_string(),
    })
}

fn flag_dimension(flag: &str, value: &str) -> crate::error::Result<u32> {
    parse_dimension(value).map_err(|reason| GridError::InvalidArgument {
        flag: flag.to_string(),
        reason,
    })
}

/// Get the application's data directory
/// Returns %APPDATA%/IpcGrid/ on Windows
/// Creates directory if it doesn't exist
pub fn get_data_directory() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "IpcGrid")
        .ok_or_else(|| anyhow!("Failed to determine user data directory"))?;

    let data_dir = project_dirs.data_dir();

    // Create directory if it doesn't exist
    fs::create_dir_all(data_dir)
        .map_err(|e| anyhow!("Failed to create data directory: {}", e))?;

    Ok(data_dir.to_path_buf())
}
