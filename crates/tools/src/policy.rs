//! Tool policy: profile selection, allow/deny filtering, elevation.

use std::collections::HashSet;

use crate::registry::ToolMeta;

/// Authorization level a tool requires beyond plain availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    None,
    Elevated,
    Dangerous,
}

/// Base tool set for a named profile. Unknown profiles behave as `full`.
fn profile_set(profile: &str) -> HashSet<&'static str> {
    match profile {
        "minimal" => ["memory", "read_file", "list_files"].into(),
        "coding" => [
            "shell",
            "read_file",
            "write_file",
            "list_files",
            "file_search",
            "memory",
            "spawn",
            "spawn_status",
        ]
        .into(),
        "messaging" => ["web_fetch", "web_search", "memory", "agent_message"].into(),
        _ => [
            "web_fetch",
            "web_search",
            "shell",
            "memory",
            "cron",
            "read_file",
            "write_file",
            "list_files",
            "file_search",
            "agent_message",
            "spawn",
            "spawn_status",
        ]
        .into(),
    }
}

/// Apply profile → allow → deny, excluding optional tools the allow list
/// does not name.
pub fn filter_tools(
    tools: Vec<ToolMeta>,
    profile: &str,
    allow: Option<&[String]>,
    deny: &[String],
) -> Vec<ToolMeta> {
    let base = profile_set(profile);
    tools
        .into_iter()
        .filter(|t| base.contains(t.name))
        .filter(|t| {
            let explicitly_allowed =
                allow.is_some_and(|a| a.iter().any(|name| name == t.name));
            if t.optional && !explicitly_allowed {
                return false;
            }
            match allow {
                Some(allow) => allow.iter().any(|name| name == t.name),
                None => true,
            }
        })
        .filter(|t| !deny.iter().any(|name| name == t.name))
        .collect()
}

/// Elevation gate for one call.
///
/// - `None`: always admitted.
/// - `Elevated`: admitted when pre-authorized or approved; otherwise
///   admitted anyway but the caller must audit it.
/// - `Dangerous`: rejected unless pre-authorized or approved.
///
/// Returns `(admitted, needs_audit)`.
pub fn elevation_admits(
    elevation: Elevation,
    tool: &str,
    elevated_tools: &[String],
    has_approval: bool,
) -> (bool, bool) {
    let authorized = elevated_tools.iter().any(|t| t == tool) || has_approval;
    match elevation {
        Elevation::None => (true, false),
        Elevation::Elevated => (true, !authorized),
        Elevation::Dangerous => (authorized, !authorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::builtin_tools;

    fn names(tools: &[ToolMeta]) -> Vec<&str> {
        tools.iter().map(|t| t.name).collect()
    }

    #[test]
    fn minimal_profile_is_small() {
        let tools = filter_tools(builtin_tools(), "minimal", None, &[]);
        let names = names(&tools);
        assert_eq!(names, vec!["memory", "read_file", "list_files"]);
    }

    #[test]
    fn optional_tools_need_explicit_allow() {
        // coding profile contains shell, but shell is optional.
        let tools = filter_tools(builtin_tools(), "coding", None, &[]);
        assert!(!names(&tools).contains(&"shell"));

        let allow = vec![
            "shell".to_string(),
            "read_file".to_string(),
            "memory".to_string(),
        ];
        let tools = filter_tools(builtin_tools(), "coding", Some(&allow), &[]);
        let names = names(&tools);
        assert!(names.contains(&"shell"));
        // allow also restricts: file_search was in the profile but not allowed.
        assert!(!names.contains(&"file_search"));
    }

    #[test]
    fn deny_subtracts() {
        let deny = vec!["web_search".to_string()];
        let tools = filter_tools(builtin_tools(), "full", None, &deny);
        assert!(!names(&tools).contains(&"web_search"));
        assert!(names(&tools).contains(&"web_fetch"));
    }

    #[test]
    fn unknown_profile_behaves_as_full() {
        let tools = filter_tools(builtin_tools(), "everything", None, &[]);
        assert!(names(&tools).contains(&"cron"));
    }

    #[test]
    fn dangerous_requires_authorization() {
        let (admitted, audit) =
            elevation_admits(Elevation::Dangerous, "nuke", &[], false);
        assert!(!admitted);
        assert!(audit);

        let elevated = vec!["nuke".to_string()];
        let (admitted, audit) =
            elevation_admits(Elevation::Dangerous, "nuke", &elevated, false);
        assert!(admitted);
        assert!(!audit);

        let (admitted, _) = elevation_admits(Elevation::Dangerous, "nuke", &[], true);
        assert!(admitted);
    }

    #[test]
    fn elevated_proceeds_but_audits() {
        let (admitted, audit) = elevation_admits(Elevation::Elevated, "shell", &[], false);
        assert!(admitted);
        assert!(audit);

        let elevated = vec!["shell".to_string()];
        let (admitted, audit) =
            elevation_admits(Elevation::Elevated, "shell", &elevated, false);
        assert!(admitted);
        assert!(!audit);
    }
}
