use crate::Platform;

/// Installer lifecycle action the process was launched for.
///
/// On Windows the native installer starts the application with one of
/// these flags on first install, after an update, before uninstall, and
/// when a version becomes obsolete. Such runs must not enter the normal
/// update flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallerEvent {
    Install,
    Updated,
    Uninstall,
    Obsolete,
}

impl InstallerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerEvent::Install => "squirrel-install",
            InstallerEvent::Updated => "squirrel-updated",
            InstallerEvent::Uninstall => "squirrel-uninstall",
            InstallerEvent::Obsolete => "squirrel-obsolete",
        }
    }

    /// Parse a single command line argument, with or without leading dashes
    pub fn from_arg(arg: &str) -> Option<Self> {
        match arg.trim().trim_start_matches('-') {
            "squirrel-install" => Some(InstallerEvent::Install),
            "squirrel-updated" => Some(InstallerEvent::Updated),
            "squirrel-uninstall" => Some(InstallerEvent::Uninstall),
            "squirrel-obsolete" => Some(InstallerEvent::Obsolete),
            _ => None,
        }
    }

    /// Detect an installer action from the process arguments (program name excluded).
    ///
    /// Only the first argument is inspected, and only on Win32.
    pub fn detect<I, S>(platform: &Platform, args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if *platform != Platform::Win32 {
            return None;
        }
        args.into_iter()
            .next()
            .and_then(|arg| Self::from_arg(arg.as_ref()))
    }
}
