//! Runtime and application version selection, and where to fetch them.

use pressbox_shared::constants::defaults;
use serde_json::Value;

const WORDPRESS_RELEASES: &str = "https://wordpress.org";

/// Integration plugin letting the application run on SQLite.
pub const SQLITE_INTEGRATION_URL: &str =
    "https://github.com/WordPress/sqlite-database-integration/archive/refs/heads/develop.tar.gz";

pub const SQLITE_INTEGRATION_CACHE_KEY: &str = "sqlite.tar.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredVersions {
    pub php: String,
    pub wp: String,
}

impl PreferredVersions {
    /// Blueprint `preferredVersions` first, then the explicit choice, then
    /// the defaults.
    pub fn resolve(blueprint: Option<&Value>, php: Option<&str>, wp: Option<&str>) -> Self {
        let preferred = blueprint.and_then(|b| b.get("preferredVersions"));
        let pick = |key: &str| {
            preferred
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
        };

        Self {
            php: pick("php")
                .or(php)
                .unwrap_or(defaults::PREFERRED_PHP_VERSION)
                .to_string(),
            wp: pick("wp")
                .or(wp)
                .unwrap_or(defaults::PREFERRED_WP_VERSION)
                .to_string(),
        }
    }

    /// Release tarball of the chosen application version.
    pub fn application_url(&self) -> String {
        if self.wp == defaults::PREFERRED_WP_VERSION {
            format!("{}/latest.tar.gz", WORDPRESS_RELEASES)
        } else {
            format!("{}/wordpress-{}.tar.gz", WORDPRESS_RELEASES, self.wp)
        }
    }

    pub fn application_cache_key(&self) -> String {
        format!("wp-{}.tar.gz", self.wp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let versions = PreferredVersions::resolve(None, None, None);
        assert_eq!(versions.php, "8.2");
        assert_eq!(versions.wp, "latest");
        assert_eq!(versions.application_url(), "https://wordpress.org/latest.tar.gz");
        assert_eq!(versions.application_cache_key(), "wp-latest.tar.gz");
    }

    #[test]
    fn test_blueprint_overrides_explicit_choice() {
        let blueprint = json!({"preferredVersions": {"wp": "6.4"}, "steps": []});
        let versions = PreferredVersions::resolve(Some(&blueprint), Some("8.1"), Some("6.2"));
        assert_eq!(versions.php, "8.1");
        assert_eq!(versions.wp, "6.4");
        assert_eq!(
            versions.application_url(),
            "https://wordpress.org/wordpress-6.4.tar.gz"
        );
    }
}
