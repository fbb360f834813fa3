//! Target script languages

use crate::error::UnknownScriptType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language an assembled script is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// POSIX shell run through bash
    #[default]
    Bash,
    /// Windows PowerShell / pwsh
    #[serde(alias = "pwsh")]
    Powershell,
}

impl ScriptType {
    /// Name used in catalogs and on the `Script-Type:` line
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ScriptType::Bash => "bash",
            ScriptType::Powershell => "powershell",
        }
    }

    /// File extension without the dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            ScriptType::Bash => "sh",
            ScriptType::Powershell => "ps1",
        }
    }

    /// Single-line comment
    #[must_use]
    pub fn comment(self, text: &str) -> String {
        // Both languages use `#`; newlines would end the comment early.
        format!("# {}", text.replace(['\r', '\n'], " "))
    }

    /// Fixed preamble placed before the first node
    #[must_use]
    pub fn header(self, title: &str) -> String {
        match self {
            ScriptType::Bash => format!(
                "#!/usr/bin/env bash\n{}\nset -e\n",
                self.comment(&format!("Generated by cmdflow: {title}"))
            ),
            ScriptType::Powershell => format!(
                "{}\n$ErrorActionPreference = 'Stop'\n",
                self.comment(&format!("Generated by cmdflow: {title}"))
            ),
        }
    }

    /// Quote one argument for this shell if it needs quoting
    #[must_use]
    pub fn quote(self, value: &str) -> String {
        let plain = !value.is_empty()
            && value.chars().all(|c| {
                c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '+' | '@')
            });
        if plain {
            return value.to_string();
        }
        match self {
            ScriptType::Bash => format!("'{}'", value.replace('\'', r"'\''")),
            ScriptType::Powershell => format!("'{}'", value.replace('\'', "''")),
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = UnknownScriptType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bash" | "sh" => Ok(ScriptType::Bash),
            "powershell" | "pwsh" | "ps1" => Ok(ScriptType::Powershell),
            _ => Err(UnknownScriptType(s.trim().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!("BASH".parse::<ScriptType>(), Ok(ScriptType::Bash));
        assert_eq!("pwsh".parse::<ScriptType>(), Ok(ScriptType::Powershell));
        assert!("python".parse::<ScriptType>().is_err());
    }

    #[test]
    fn quoting() {
        assert_eq!(ScriptType::Bash.quote("release"), "release");
        assert_eq!(ScriptType::Bash.quote("two words"), "'two words'");
        assert_eq!(ScriptType::Bash.quote("it's"), r"'it'\''s'");
        assert_eq!(ScriptType::Powershell.quote("it's"), "'it''s'");
        assert_eq!(ScriptType::Bash.quote(""), "''");
    }

    #[test]
    fn headers() {
        let bash = ScriptType::Bash.header("deploy");
        assert!(bash.starts_with("#!/usr/bin/env bash\n"));
        assert!(bash.contains("set -e"));
        let ps = ScriptType::Powershell.header("deploy");
        assert!(ps.contains("$ErrorActionPreference = 'Stop'"));
        assert_eq!(ScriptType::Bash.comment("a\nb"), "# a b");
    }
}
