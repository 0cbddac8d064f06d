//! Constants shared between the host and the worker.

/// Wire-level constants.
pub mod protocol {
    /// Literal readiness message a worker sends before any capability exchange.
    pub const READY_MESSAGE: &str = "worker-script-initialized";
}

/// Paths inside the guest filesystem view.
pub mod guest_paths {
    /// Document root of the guest application.
    pub const DOCUMENT_ROOT: &str = "/wordpress";

    /// Where the integration package is installed.
    pub const SQLITE_PLUGIN_DIR: &str = "/wordpress/wp-content/plugins/sqlite-database-integration";

    /// Shared internal directory for runtime support files.
    pub const INTERNAL_SHARED: &str = "/internal/shared";

    /// CA bundle handed to the guest runtime.
    pub const CA_BUNDLE: &str = "/internal/shared/ca-bundle.crt";

    /// Ini file materialized from the boot ini entries.
    pub const PHP_INI: &str = "/internal/shared/php.ini";

    /// Application constants materialized from the boot constants.
    pub const CONSTANTS: &str = "/internal/shared/constants.json";

    /// Database directory of the integration package.
    pub const DATABASE_DIR: &str = "/wordpress/wp-content/database";

    /// Seed dump imported by a fresh install.
    pub const DATA_SQL: &str = "/wordpress/wp-content/database/data.sql";
}

/// Defaults applied when the caller leaves a boot setting out.
pub mod defaults {
    /// Runtime version used by the worker when the boot parameters omit one.
    pub const PHP_VERSION: &str = "8.0";

    /// Runtime version preferred by the host bootstrap.
    pub const PREFERRED_PHP_VERSION: &str = "8.2";

    /// Application version preferred by the host bootstrap.
    pub const PREFERRED_WP_VERSION: &str = "latest";

    /// Site URL used when the caller does not serve over HTTP.
    pub const SITE_URL: &str = "http://localhost";

    /// SAPI name reported to the guest framework.
    pub const SAPI_NAME: &str = "cli";

    /// Upper bound on redirect hops followed by the request relay.
    pub const MAX_REDIRECTS: usize = 20;
}

/// Environment variables understood by pressbox binaries.
pub mod env {
    /// Overrides the pressbox home directory.
    pub const HOME: &str = "PRESSBOX_HOME";

    /// Overrides the worker binary location.
    pub const WORKER_PATH: &str = "PRESSBOX_WORKER_PATH";

    /// Log filter forwarded to the worker.
    pub const RUST_LOG: &str = "RUST_LOG";
}
