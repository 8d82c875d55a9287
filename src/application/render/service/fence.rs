//! Fence info-string parsing shared by the fence extensions.

use std::collections::BTreeSet;

/// Parsed form of a fenced code block's info string, e.g. `js run` or
/// `html {demo,wide}`.
///
/// The first whitespace-separated token is the language; every following
/// token is a flag. A token of the form `{a,b,c}` expands to one flag per
/// comma-separated piece. Languages and flags are compared case-insensitively,
/// so both are lowercased here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceInfo {
    pub lang: String,
    pub flags: BTreeSet<String>,
}

impl FenceInfo {
    /// Parses an info string. Never fails; unknown or malformed tokens are
    /// kept as literal flags.
    pub fn parse(info: &str) -> Self {
        let info = info.trim();
        let mut tokens = info.split_whitespace();
        let lang = tokens.next().unwrap_or_default().to_lowercase();
        let mut flags = BTreeSet::new();
        for token in tokens {
            match braced_flag_list(token) {
                Some(list) => {
                    for flag in list.split(',') {
                        flags.insert(flag.to_lowercase());
                    }
                }
                None => {
                    flags.insert(token.to_lowercase());
                }
            }
        }
        Self { lang, flags }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// Returns the interior of a `{...}` token with at least one character inside,
/// or `None` when the token is not a brace list (`{}` stays a literal flag).
fn braced_flag_list(token: &str) -> Option<&str> {
    let interior = token.strip_prefix('{')?.strip_suffix('}')?;
    if interior.is_empty() { None } else { Some(interior) }
}

/// True when a raw info string belongs to one of the fence extensions rather
/// than the default code-block renderer. Deliberately a coarse substring
/// check: `demo` and `run` anywhere in the info line cede the fence, matching
/// the extensions' own claim rules closely enough that no fence is ever
/// claimed twice.
pub fn claimed_by_extension(info: &str) -> bool {
    info.contains("demo") || info.contains("run")
}
