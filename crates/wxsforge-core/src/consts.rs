//! Symbolic folder vocabulary of the target installer format.

use wxsforge_contracts::TARGET_DIR_ID;

/// `%TOKEN%` spellings accepted in directory names and paths, with the folder
/// property each one maps to.
pub const ENVIRONMENT_CONSTANTS: &[(&str, &str)] = &[
    ("%AdminToolsFolder%", "AdminToolsFolder"),
    ("%AppDataFolder%", "AppDataFolder"),
    ("%CommonAppDataFolder%", "CommonAppDataFolder"),
    ("%CommonFiles64Folder%", "CommonFiles64Folder"),
    ("%CommonFilesFolder%", "CommonFilesFolder"),
    ("%DesktopFolder%", "DesktopFolder"),
    ("%FavoritesFolder%", "FavoritesFolder"),
    ("%FontsFolder%", "FontsFolder"),
    ("%LocalAppDataFolder%", "LocalAppDataFolder"),
    ("%MyPicturesFolder%", "MyPicturesFolder"),
    ("%PersonalFolder%", "PersonalFolder"),
    ("%ProgramFiles64Folder%", "ProgramFiles64Folder"),
    ("%ProgramFilesFolder%", "ProgramFilesFolder"),
    ("%ProgramMenuFolder%", "ProgramMenuFolder"),
    ("%SendToFolder%", "SendToFolder"),
    ("%StartMenuFolder%", "StartMenuFolder"),
    ("%StartupFolder%", "StartupFolder"),
    ("%System16Folder%", "System16Folder"),
    ("%System64Folder%", "System64Folder"),
    ("%SystemFolder%", "SystemFolder"),
    ("%TempFolder%", "TempFolder"),
    ("%TemplateFolder%", "TemplateFolder"),
    ("%WindowsFolder%", "WindowsFolder"),
    ("%WindowsVolume%", "WindowsVolume"),
    ("%AdminTools%", "AdminToolsFolder"),
    ("%AppData%", "AppDataFolder"),
    ("%CommonAppData%", "CommonAppDataFolder"),
    ("%CommonFiles64%", "CommonFiles64Folder"),
    ("%CommonFiles%", "CommonFilesFolder"),
    ("%Desktop%", "DesktopFolder"),
    ("%Favorites%", "FavoritesFolder"),
    ("%Fonts%", "FontsFolder"),
    ("%LocalAppData%", "LocalAppDataFolder"),
    ("%MyPictures%", "MyPicturesFolder"),
    ("%Personal%", "PersonalFolder"),
    ("%ProgramFiles64%", "ProgramFiles64Folder"),
    ("%ProgramFiles%", "ProgramFilesFolder"),
    ("%ProgramMenu%", "ProgramMenuFolder"),
    ("%SendTo%", "SendToFolder"),
    ("%StartMenu%", "StartMenuFolder"),
    ("%Startup%", "StartupFolder"),
    ("%System16%", "System16Folder"),
    ("%System64%", "System64Folder"),
    ("%System%", "SystemFolder"),
    ("%Temp%", "TempFolder"),
    ("%Template%", "TemplateFolder"),
    ("%Windows%", "WindowsFolder"),
];

/// Well-known per-user folders. Everything installed below one of these is
/// removed per user at uninstall and must be anchored by an HKCU key path.
pub const USER_PROFILE_FOLDERS: &[&str] = &[
    "ProgramMenuFolder",
    "AppDataFolder",
    "LocalAppDataFolder",
    "TempFolder",
    "PersonalFolder",
    "DesktopFolder",
    "StartupFolder",
];

pub fn env_constant(token: &str) -> Option<&'static str> {
    ENVIRONMENT_CONSTANTS
        .iter()
        .find(|(k, _)| *k == token)
        .map(|(_, v)| *v)
}

/// True for folder ids owned by the installer itself (`ProgramFilesFolder`, ...).
pub fn is_env_folder_id(id: &str) -> bool {
    ENVIRONMENT_CONSTANTS.iter().any(|(_, v)| *v == id)
}

/// Directories the placeholder-component chain must never climb past.
pub fn is_protected_root(id: &str) -> bool {
    id == TARGET_DIR_ID || is_env_folder_id(id)
}

pub fn is_user_profile_folder(name: &str) -> bool {
    USER_PROFILE_FOLDERS.contains(&name)
}

/// `%ProgramFiles%\My Company` -> `ProgramFilesFolder\My Company`.
///
/// Bracketed references to a mapped folder (`[ProgramFilesFolder]`) lose their
/// brackets as well.
pub fn expand_env_consts(path: &str) -> String {
    let mut out = path.to_string();
    for (key, value) in ENVIRONMENT_CONSTANTS {
        if out.contains(key) {
            out = out.replace(key, value);
        }
        let bracketed = format!("[{value}]");
        if out.contains(&bracketed) {
            out = out.replace(&bracketed, value);
        }
    }
    out
}

/// `%ProgramFiles%\My Company` -> `[ProgramFilesFolder]\My Company`.
pub fn bracket_env_consts(path: &str) -> String {
    let mut out = path.to_string();
    for (key, value) in ENVIRONMENT_CONSTANTS {
        if out.contains(key) {
            out = out.replace(key, &format!("[{value}]"));
        }
    }
    out.replace("%INSTALLDIR%", "[INSTALLDIR]")
}

/// Rooted-path test with Windows semantics, independent of the host platform.
pub fn is_path_rooted(path: &str) -> bool {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some('\\'), _) | (Some('/'), _) => true,
        (Some(drive), Some(':')) => drive.is_ascii_alphabetic(),
        _ => false,
    }
}

/// Last segment of a path using either separator.
pub fn path_leaf(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tokens_and_bracketed_folders() {
        assert_eq!(
            expand_env_consts(r"%ProgramFiles%\My Company"),
            r"ProgramFilesFolder\My Company"
        );
        assert_eq!(
            expand_env_consts(r"%ProgramFiles64%\App"),
            r"ProgramFiles64Folder\App"
        );
        assert_eq!(expand_env_consts("[DesktopFolder]"), "DesktopFolder");
        assert_eq!(
            bracket_env_consts(r"%AppData%\Tool"),
            r"[AppDataFolder]\Tool"
        );
        assert_eq!(bracket_env_consts(r"%INSTALLDIR%\bin"), r"[INSTALLDIR]\bin");
    }

    #[test]
    fn rooted_paths_follow_windows_rules() {
        assert!(is_path_rooted(r"C:\Program Files\App"));
        assert!(is_path_rooted(r"\\server\share"));
        assert!(is_path_rooted("/opt/app"));
        assert!(!is_path_rooted("ProgramFilesFolder"));
        assert!(!is_path_rooted(r"%ProgramFiles%\App"));
        assert!(!is_path_rooted("1:"));
    }

    #[test]
    fn protected_roots_cover_target_dir_and_env_folders() {
        assert!(is_protected_root("TARGETDIR"));
        assert!(is_protected_root("ProgramFilesFolder"));
        assert!(!is_protected_root("INSTALLDIR"));
        assert_eq!(path_leaf(r"a\b/c.txt"), "c.txt");
        assert_eq!(path_leaf("c.txt"), "c.txt");
    }
}
