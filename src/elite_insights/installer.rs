use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::catalog::{Release, ReleaseCatalog};
use super::version::ToolVersion;
use crate::settings::{EliteInsightsSettings, UpdateChannel};

const EXECUTABLE_NAME: &str = if cfg!(target_os = "windows") {
    "GuildWars2EliteInsights-CLI.exe"
} else {
    "GuildWars2EliteInsights-CLI"
};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no valid Elite Insights version to install: {0}")]
    NoTargetVersion(String),
    #[error("failed to download Elite Insights from {url}: {message}")]
    Download { url: String, message: String },
    #[error("failed to open Elite Insights archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("failed to extract {0} files or directories")]
    Extraction(usize),
    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProvisionError + '_ {
    move |source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Locations of the installed tool and the reports it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub installation_directory: PathBuf,
    pub output_directory: PathBuf,
    pub executable_file: PathBuf,
    pub config_file: PathBuf,
    pub version_file: PathBuf,
}

impl ToolPaths {
    pub fn new(installation_directory: PathBuf, output_directory: PathBuf) -> Self {
        Self {
            executable_file: installation_directory.join(EXECUTABLE_NAME),
            config_file: installation_directory.join("Settings").join("settings.conf"),
            version_file: installation_directory.join(".version"),
            installation_directory,
            output_directory,
        }
    }

    pub fn local_version(&self) -> Option<ToolVersion> {
        let tag_name = fs::read_to_string(&self.version_file).ok()?;
        ToolVersion::parse(&tag_name)
    }

    pub fn is_installed(&self) -> bool {
        self.executable_file.exists() && self.config_file.exists() && self.local_version().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Auto update is off and an installation exists.
    Skipped,
    UpToDate(ToolVersion),
    Installed {
        previous: Option<ToolVersion>,
        version: ToolVersion,
    },
    /// No release information was reachable; the existing installation is used.
    KeptExisting(ToolVersion),
}

/// Makes sure a usable Elite Insights installation exists, updating it when
/// the configured channel has a newer release.
pub fn provision(
    paths: &ToolPaths,
    catalog: &dyn ReleaseCatalog,
    settings: &EliteInsightsSettings,
) -> Result<ProvisionOutcome, ProvisionError> {
    let installed_version = paths.is_installed().then(|| paths.local_version()).flatten();

    if !settings.auto_update {
        tracing::info!("Elite Insights auto update is disabled");
        if installed_version.is_some() {
            return Ok(ProvisionOutcome::Skipped);
        }
    }

    let target = match resolve_target(catalog, settings.update_channel) {
        Ok(target) => target,
        Err(message) => {
            return match installed_version {
                Some(installed_version) => {
                    tracing::warn!(
                        installed_version = %installed_version,
                        "Could not determine latest Elite Insights version, keeping installed version: {message}"
                    );
                    Ok(ProvisionOutcome::KeptExisting(installed_version))
                }
                None => Err(ProvisionError::NoTargetVersion(message)),
            };
        }
    };

    if let Some(installed_version) = &installed_version {
        if *installed_version >= target.version {
            tracing::info!(version = %installed_version, "Elite Insights is up-to-date");
            return Ok(ProvisionOutcome::UpToDate(installed_version.clone()));
        }
        tracing::info!(
            from = %installed_version,
            to = %target.version,
            "Updating Elite Insights"
        );
    } else {
        tracing::info!(version = %target.version, "Installing Elite Insights");
    }

    install_release(paths, catalog, &target)?;

    Ok(ProvisionOutcome::Installed {
        previous: installed_version,
        version: target.version,
    })
}

fn resolve_target(catalog: &dyn ReleaseCatalog, channel: UpdateChannel) -> Result<Release, String> {
    match channel {
        UpdateChannel::Latest => catalog.latest_release(),
        UpdateChannel::LatestWingman => {
            let wingman_release = catalog
                .wingman_version()
                .and_then(|version| catalog.release_by_tag(version.tag_name()));

            wingman_release.or_else(|error| {
                tracing::warn!(
                    "Wingman required Elite Insights version is not available, using latest: {error}"
                );
                catalog.latest_release()
            })
        }
    }
}

/// Downloads and unpacks the release next to the installation, then swaps it in.
fn install_release(
    paths: &ToolPaths,
    catalog: &dyn ReleaseCatalog,
    release: &Release,
) -> Result<(), ProvisionError> {
    let archive = catalog
        .download(&release.download_url)
        .map_err(|message| ProvisionError::Download {
            url: release.download_url.clone(),
            message,
        })?;

    let staging_directory = staging_directory(&paths.installation_directory);
    if staging_directory.exists() {
        fs::remove_dir_all(&staging_directory).map_err(io_error(&staging_directory))?;
    }
    fs::create_dir_all(&staging_directory).map_err(io_error(&staging_directory))?;

    if let Err(error) = extract_archive(&archive, &staging_directory) {
        let _ = fs::remove_dir_all(&staging_directory);
        return Err(error);
    }

    if paths.installation_directory.exists() {
        fs::remove_dir_all(&paths.installation_directory)
            .map_err(io_error(&paths.installation_directory))?;
    }
    fs::rename(&staging_directory, &paths.installation_directory)
        .map_err(io_error(&paths.installation_directory))?;

    write_tool_config(paths)?;
    fs::write(&paths.version_file, release.version.tag_name())
        .map_err(io_error(&paths.version_file))?;

    Ok(())
}

fn staging_directory(installation_directory: &Path) -> PathBuf {
    let mut name = installation_directory
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".staging");
    installation_directory.with_file_name(name)
}

/// Unpacks every entry below `destination`. Any failed entry fails the whole
/// extraction after all entries were attempted.
fn extract_archive(archive: &[u8], destination: &Path) -> Result<(), ProvisionError> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    let mut extraction_errors = 0usize;

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(index, "Failed to read archive entry: {error}");
                extraction_errors += 1;
                continue;
            }
        };

        let Some(relative_path) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Archive entry has an unsafe path");
            extraction_errors += 1;
            continue;
        };
        let output_path = destination.join(relative_path);

        if entry.is_dir() {
            if let Err(error) = fs::create_dir_all(&output_path) {
                tracing::warn!(path = %output_path.display(), "Failed to create directory: {error}");
                extraction_errors += 1;
            }
            continue;
        }

        if let Some(parent_directory) = output_path.parent() {
            if let Err(error) = fs::create_dir_all(parent_directory) {
                tracing::warn!(path = %parent_directory.display(), "Failed to create directory: {error}");
                extraction_errors += 1;
                continue;
            }
        }

        let written = File::create(&output_path)
            .and_then(|mut file| std::io::copy(&mut entry, &mut file));
        if let Err(error) = written {
            tracing::warn!(path = %output_path.display(), "Failed to extract file: {error}");
            extraction_errors += 1;
            continue;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&output_path, fs::Permissions::from_mode(mode));
        }
    }

    if extraction_errors > 0 {
        tracing::error!(extraction_errors, "Failed to extract Elite Insights archive");
        return Err(ProvisionError::Extraction(extraction_errors));
    }

    Ok(())
}

pub fn tool_config_contents(output_directory: &Path) -> String {
    let out_location = output_directory.to_string_lossy().replace('\\', "\\\\");
    format!(
        "# generated by log-uploader\n\
         SaveOutJSON=true\n\
         IndentJSON=false\n\
         SaveOutHTML=true\n\
         SaveOutTrace=false\n\
         SaveAtOut=false\n\
         ParseCombatReplay=true\n\
         SingleThreaded=false\n\
         OutLocation={out_location}\n"
    )
}

pub fn write_tool_config(paths: &ToolPaths) -> Result<(), ProvisionError> {
    if let Some(settings_directory) = paths.config_file.parent() {
        fs::create_dir_all(settings_directory).map_err(io_error(settings_directory))?;
    }

    fs::write(&paths.config_file, tool_config_contents(&paths.output_directory))
        .map_err(io_error(&paths.config_file))
}
