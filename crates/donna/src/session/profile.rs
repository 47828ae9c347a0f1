//! The user's data directory.
//!
//! Donna keeps everything it knows about the user as Markdown under one
//! directory. Two files matter to the session: the preferences file, whose YAML
//! frontmatter names the user, and the current-context file.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const PREFERENCES_FILE: &str = "user_info_and_preferences.md";
pub const CONTEXT_FILE: &str = "current_context.md";

/// How the user is addressed when no name is stored.
pub const DEFAULT_USER_NAME: &str = "there";

/// Frontmatter of the preferences file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub communication_style: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl UserPreferences {
    /// The stored name, if it is non-blank.
    pub fn name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Parse the YAML frontmatter of a preferences document.
///
/// Anything that is not a `---` delimited YAML mapping yields empty preferences.
pub fn parse_frontmatter(content: &str) -> UserPreferences {
    if !content.starts_with("---") {
        return UserPreferences::default();
    }
    let mut parts = content.splitn(3, "---");
    let (Some(_), Some(yaml), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        return UserPreferences::default();
    };
    if yaml.trim().is_empty() {
        return UserPreferences::default();
    }

    match serde_yaml::from_str(yaml) {
        Ok(prefs) => prefs,
        Err(err) => {
            debug!("Ignoring malformed preferences frontmatter: {err}");
            UserPreferences::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    data_dir: PathBuf,
}

impl ProfileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE)
    }

    pub fn context_path(&self) -> PathBuf {
        self.data_dir.join(CONTEXT_FILE)
    }

    /// Raw preferences document, `None` if missing or empty.
    pub fn preferences_raw(&self) -> Option<String> {
        read_optional(&self.preferences_path()).filter(|content| !content.trim().is_empty())
    }

    pub fn preferences(&self) -> UserPreferences {
        self.preferences_raw()
            .map(|content| parse_frontmatter(&content))
            .unwrap_or_default()
    }

    pub fn user_name(&self) -> String {
        self.preferences()
            .name()
            .unwrap_or(DEFAULT_USER_NAME)
            .to_string()
    }

    pub fn stored_timezone(&self) -> Option<String> {
        self.preferences().timezone
    }

    /// Current-context document, empty if missing.
    pub fn current_context(&self) -> String {
        read_optional(&self.context_path()).unwrap_or_default()
    }

    /// No usable preferences file, or one without a name.
    pub fn is_new_user(&self) -> bool {
        self.preferences().name().is_none()
    }

    /// Seed an empty or missing data directory from `template`.
    ///
    /// Returns whether anything was copied. The data directory exists afterwards.
    pub fn ensure_initialized(&self, template: Option<&Path>) -> io::Result<bool> {
        let needs_seed = match fs::read_dir(&self.data_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => return Err(err),
        };
        fs::create_dir_all(&self.data_dir)?;

        let Some(template) = template.filter(|_| needs_seed) else {
            return Ok(false);
        };
        if !template.is_dir() {
            warn!("Template directory {} does not exist", template.display());
            return Ok(false);
        }

        for entry in WalkDir::new(template) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(template)
                .map_err(io::Error::other)?;
            let target = self.data_dir.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        info!(
            "Initialized {} from template {}",
            self.data_dir.display(),
            template.display()
        );
        Ok(true)
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!("Failed to read {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_frontmatter() {
        let prefs = parse_frontmatter(
            "---\nname: Ada\ntimezone: Europe/London\ncommunication_style: dry wit\npets: 2\n---\n# Notes\n",
        );
        assert_eq!(prefs.name(), Some("Ada"));
        assert_eq!(prefs.timezone.as_deref(), Some("Europe/London"));
        assert_eq!(prefs.communication_style.as_deref(), Some("dry wit"));
        assert!(prefs.extra.contains_key("pets"));
    }

    #[test]
    fn test_parse_frontmatter_degrades_to_empty() {
        assert_eq!(parse_frontmatter("# no frontmatter"), UserPreferences::default());
        assert_eq!(parse_frontmatter("---\nname: [unclosed\n---\n"), UserPreferences::default());
        assert_eq!(parse_frontmatter("---\n---\nbody"), UserPreferences::default());
        assert_eq!(parse_frontmatter("---\nname: Ada\n"), UserPreferences::default());
    }

    #[test]
    fn test_new_user_detection() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.is_new_user());
        assert_eq!(store.user_name(), DEFAULT_USER_NAME);

        fs::write(store.preferences_path(), "").unwrap();
        assert!(store.is_new_user());

        fs::write(store.preferences_path(), "---\ntimezone: TBD\n---\n").unwrap();
        assert!(store.is_new_user());

        fs::write(store.preferences_path(), "---\nname: Grace\n---\n").unwrap();
        assert!(!store.is_new_user());
        assert_eq!(store.user_name(), "Grace");
    }

    #[test]
    fn test_current_context_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        assert_eq!(store.current_context(), "");
        fs::write(store.context_path(), "- garden plans\n").unwrap();
        assert_eq!(store.current_context(), "- garden plans\n");
    }

    #[test]
    fn test_ensure_initialized_copies_template_once() {
        let template = TempDir::new().unwrap();
        fs::create_dir_all(template.path().join("journal")).unwrap();
        fs::write(template.path().join(CONTEXT_FILE), "").unwrap();
        fs::write(template.path().join("journal").join("README.md"), "hi").unwrap();

        let root = TempDir::new().unwrap();
        let store = ProfileStore::new(root.path().join("donna-data"));
        assert!(store.ensure_initialized(Some(template.path())).unwrap());
        assert!(store.context_path().exists());
        assert!(store.data_dir().join("journal").join("README.md").exists());

        // Non-empty directory is left alone.
        assert!(!store.ensure_initialized(Some(template.path())).unwrap());
    }

    #[test]
    fn test_ensure_initialized_without_template_creates_dir() {
        let root = TempDir::new().unwrap();
        let store = ProfileStore::new(root.path().join("data"));
        assert!(!store.ensure_initialized(None).unwrap());
        assert!(store.data_dir().is_dir());
    }
}
