//! Installer app metadata
//!
//! VMs created from an installer are named after the macOS version the
//! installer carries, read from `Contents/Info.plist` inside the app bundle.

use crate::error::{ProvisionError, Result};
use serde::Deserialize;
use std::path::Path;

/// Reads the version tag of an installer app
pub trait InstallerMetadata: Send + Sync {
    /// `<platform version>-<short version>`, e.g. `13.0-18.5.01`
    fn extract_version_tag(&self, path: &Path) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct InstallerInfo {
    #[serde(rename = "DTPlatformVersion")]
    platform_version: String,

    #[serde(rename = "CFBundleShortVersionString")]
    short_version: String,
}

/// Reads the installer's `Info.plist` from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct PlistInstaller;

impl InstallerMetadata for PlistInstaller {
    fn extract_version_tag(&self, path: &Path) -> Result<String> {
        let installer_error = |reason: String| ProvisionError::Installer {
            path: path.to_path_buf(),
            reason,
        };

        match path.try_exists() {
            Ok(true) => {}
            Ok(false) => return Err(installer_error("installer app does not exist".into())),
            Err(e) => return Err(installer_error(format!("failed to stat installer: {}", e))),
        }

        let plist_path = path.join("Contents").join("Info.plist");
        match plist_path.try_exists() {
            Ok(true) => {}
            Ok(false) => {
                return Err(installer_error(format!(
                    "installer app info plist did not exist at {:?}",
                    plist_path
                )))
            }
            Err(e) => {
                return Err(installer_error(format!(
                    "failed to stat installer app info plist at {:?}: {}",
                    plist_path, e
                )))
            }
        }

        let info: InstallerInfo = plist::from_file(&plist_path)
            .map_err(|e| installer_error(format!("failed to read {:?}: {}", plist_path, e)))?;

        Ok(format!("{}-{}", info.platform_version, info.short_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INFO_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CFBundleIdentifier</key>
	<string>com.apple.InstallAssistant.macOSVentura</string>
	<key>CFBundleShortVersionString</key>
	<string>18.5.01</string>
	<key>DTPlatformVersion</key>
	<string>13.0</string>
</dict>
</plist>
"#;

    fn installer_with(plist: Option<&str>) -> TempDir {
        let dir = TempDir::new().unwrap();
        let contents = dir.path().join("Contents");
        std::fs::create_dir_all(&contents).unwrap();
        if let Some(plist) = plist {
            std::fs::write(contents.join("Info.plist"), plist).unwrap();
        }
        dir
    }

    #[test]
    fn test_version_tag_from_info_plist() {
        let app = installer_with(Some(INFO_PLIST));
        let tag = PlistInstaller.extract_version_tag(app.path()).unwrap();
        assert_eq!(tag, "13.0-18.5.01");
    }

    #[test]
    fn test_missing_installer() {
        let err = PlistInstaller
            .extract_version_tag(Path::new("/nonexistent/Install macOS.app"))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_missing_info_plist() {
        let app = installer_with(None);
        let err = PlistInstaller.extract_version_tag(app.path()).unwrap_err();
        assert!(err.to_string().contains("info plist did not exist"));
    }

    #[test]
    fn test_plist_without_version_keys() {
        let app = installer_with(Some(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>CFBundleIdentifier</key><string>x</string></dict></plist>"#,
        ));
        assert!(PlistInstaller.extract_version_tag(app.path()).is_err());
    }
}
