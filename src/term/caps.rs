//! Terminal capability detection
//!
//! The runtime sniffs the host terminal from environment variables at
//! session open: which emulator is hosting us, and what it can do
//! (color depth, mouse reporting, title setting). Detection is
//! advisory; drawing always goes through the backend regardless.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CapFlags: u8 {
        const COLOR_16   = 0b0000_0001;
        const COLOR_256  = 0b0000_0010;
        const TRUE_COLOR = 0b0000_0100;
        const MOUSE      = 0b0000_1000;
        const TITLE      = 0b0001_0000;
    }
}

/// What the host terminal reports about itself
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Host terminal name ("Windows Terminal", "Alacritty", ...)
    pub host: String,
    pub flags: CapFlags,
}

impl Capabilities {
    /// Detect capabilities from the process environment
    pub fn detect() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = detect_host(&var);
        let flags = detect_flags(&var);
        Self { host, flags }
    }

    pub fn supports(&self, flags: CapFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Detect the host terminal environment
fn detect_host<F>(var: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    // Check Windows Terminal
    if var("WT_SESSION").is_some() {
        return "Windows Terminal".to_string();
    }

    // Check VSCode terminal
    if var("VSCODE_INJECTION").is_some()
        || var("TERM_PROGRAM").map(|v| v == "vscode").unwrap_or(false)
    {
        return "VSCode Terminal".to_string();
    }

    // Check ConEmu
    if var("ConEmuPID").is_some() {
        return "ConEmu".to_string();
    }

    // Check Cmder
    if var("CMDER_ROOT").is_some() {
        return "Cmder".to_string();
    }

    // Check Hyper
    if var("TERM_PROGRAM").map(|v| v == "Hyper").unwrap_or(false) {
        return "Hyper".to_string();
    }

    // Check Alacritty
    if var("ALACRITTY_LOG").is_some() || var("ALACRITTY_SOCKET").is_some() {
        return "Alacritty".to_string();
    }

    // Check mintty (Git Bash, Cygwin, MSYS2)
    if var("MSYSTEM").is_some() {
        return "MSYS2/MinGW".to_string();
    }

    if let Some(program) = var("TERM_PROGRAM") {
        return program;
    }

    if let Some(term) = var("TERM") {
        return term;
    }

    // Default: native console
    "Console".to_string()
}

fn detect_flags<F>(var: &F) -> CapFlags
where
    F: Fn(&str) -> Option<String>,
{
    let term = var("TERM").unwrap_or_default();
    if term == "dumb" {
        return CapFlags::empty();
    }

    let mut flags = CapFlags::MOUSE | CapFlags::TITLE;

    if var("NO_COLOR").is_some() {
        return flags;
    }

    flags |= CapFlags::COLOR_16;

    let colorterm = var("COLORTERM").unwrap_or_default();
    if colorterm.contains("truecolor") || colorterm.contains("24bit") || var("WT_SESSION").is_some()
    {
        flags |= CapFlags::COLOR_256 | CapFlags::TRUE_COLOR;
    } else if term.contains("256color") {
        flags |= CapFlags::COLOR_256;
    }

    flags
}
