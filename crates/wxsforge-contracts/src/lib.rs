//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings that
//! appear in machine-readable I/O, and for the fixed literals the downstream WiX
//! compiler expects verbatim.

pub const WXSFORGE_DOCUMENT_SCHEMA_VERSION: &str = "wxsforge.document@0.1.0";
pub const WXSFORGE_CONFIG_SCHEMA_VERSION: &str = "wxsforge.config@0.1.0";
pub const WXSFORGE_REPORT_SCHEMA_VERSION: &str = "wxsforge.report@0.1.0";

pub const WIX_NAMESPACE: &str = "http://schemas.microsoft.com/wix/2006/wi";

/// Base value of the GUID allocator when the configuration does not pin one.
pub const DEFAULT_GUID_BASE: u128 = 0x6f330b47_2577_43ad_9095_1861ba25889b;

pub const TARGET_DIR_ID: &str = "TARGETDIR";
pub const INSTALL_DIR_ID: &str = "INSTALLDIR";
pub const DEFAULT_FEATURE_ID: &str = "Complete";

pub const USER_PROFILE_REGISTRY_ROOT: &str = "HKCU";
pub const USER_PROFILE_REGISTRY_KEY: &str = r"Software\WxsForge\Used";

pub const EMPTY_DIRECTORY_COMPONENT_SUFFIX: &str = ".EmptyDirectory";
