//! Migration targets as typed on the command line

use crate::migration::MigrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static RELATIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([+-])(\d+)$").expect("valid regex"));
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Za-z_]+$").expect("valid regex"));

/// Where a run should end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The single head of the chain
    Head,
    /// Nothing applied
    Base,
    /// A full token or a unique token prefix
    Revision(String),
    /// `+N` or `-N` steps from the current state
    Relative(i64),
}

impl FromStr for Target {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "head" | "heads" => return Ok(Target::Head),
            "base" => return Ok(Target::Base),
            _ => {}
        }

        if let Some(caps) = RELATIVE.captures(s) {
            let steps: i64 = caps[2]
                .parse()
                .map_err(|_| MigrationError::InvalidTarget(format!("'{s}' is too many steps")))?;
            if steps == 0 {
                return Err(MigrationError::InvalidTarget(format!(
                    "'{s}' is zero steps"
                )));
            }
            return Ok(Target::Relative(if &caps[1] == "-" { -steps } else { steps }));
        }

        if TOKEN.is_match(s) {
            Ok(Target::Revision(s.to_string()))
        } else {
            Err(MigrationError::InvalidTarget(format!(
                "'{s}' is not a revision token, a prefix, 'head', 'base', +N or -N"
            )))
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => write!(f, "head"),
            Target::Base => write!(f, "base"),
            Target::Revision(token) => write!(f, "{token}"),
            Target::Relative(n) if *n > 0 => write!(f, "+{n}"),
            Target::Relative(n) => write!(f, "{n}"),
        }
    }
}
