//! System prompt assembly and the fixed session instructions.

use std::fs;
use std::path::Path;

use tracing::warn;

use super::profile::{CONTEXT_FILE, PREFERENCES_FILE, ProfileStore};

pub const BUILTIN_SYSTEM_PROMPT: &str = include_str!("../../prompts/system.md");

/// The configured prompt file, or the built-in prompt if unset or unreadable.
pub fn load_base_prompt(prompt_file: Option<&Path>) -> String {
    let Some(path) = prompt_file else {
        return BUILTIN_SYSTEM_PROMPT.to_string();
    };
    match fs::read_to_string(path) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(
                "Failed to read prompt file {}: {err}; using built-in prompt",
                path.display()
            );
            BUILTIN_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Base instructions, date context, preferences, then current focus.
pub fn build_system_prompt(
    base: &str,
    date_context: &str,
    preferences: Option<&str>,
    current_context: &str,
) -> String {
    let mut prompt = String::with_capacity(base.len() + date_context.len() + 1024);
    prompt.push_str(base);
    prompt.push_str(&format!("\n\n{date_context}\n"));

    if let Some(prefs) = preferences.filter(|p| !p.is_empty()) {
        prompt.push_str(&format!(
            "\n\n## User Info and Preferences (from {PREFERENCES_FILE})\n\n\
             IMPORTANT: Use the `name` from frontmatter when addressing the user. \
             Use the `communication_style` to adjust your personality.\n\n{prefs}\n"
        ));
    }

    if current_context.trim().is_empty() {
        prompt.push_str(
            "\n\n## Current Active Context\n\n\
             No active context items. This may be a new user or a fresh start.\n",
        );
    } else {
        prompt.push_str(&format!(
            "\n\n## Current Active Context (from {CONTEXT_FILE})\n\n\
             These are the topics/items the user is currently focused on. \
             Reference these when relevant:\n\n{current_context}\n"
        ));
    }

    prompt
}

/// Opening instruction for a returning user.
pub fn greeting_prompt(name: &str) -> String {
    format!(
        "[SYSTEM - GREETING]\n\
         Start this conversation by greeting {name} naturally and asking what's on their mind.\n\
         \n\
         Keep it conversational and brief - just a friendly opener that acknowledges their context.\n\
         You can suggest a few things they might want to talk about based on their active context\n\
         (from {CONTEXT_FILE}, already loaded in your system prompt), or offer to do a check-in,\n\
         capture something new, or just chat. Make it feel natural, not like a menu. One or two sentences max.\n\
         \n\
         Don't use bullet points or numbered lists - just speak naturally."
    )
}

/// Opening instruction for a user without a profile.
pub fn onboarding_prompt(profile: &ProfileStore) -> String {
    format!(
        "[SYSTEM - ONBOARDING]\n\
         This is a new user. The {} folder structure has been initialized.\n\
         Use the new-user-onboarding skill to guide them through a natural introduction. \
         I am now going to invoke the new-user-onboarding skill.",
        profile.data_dir().display()
    )
}

/// Sent when the user ends a session so the agent refreshes the context file.
pub fn context_update_prompt(profile: &ProfileStore) -> String {
    format!(
        "[SYSTEM] The user is ending this session. Please update {} based on this conversation. \
         Add any new topics discussed, update last_mentioned dates for existing items, and remove \
         any items that are no longer relevant. Keep it focused on 5-7 items max. \
         Do this silently without explaining what you're doing.",
        profile.context_path().display()
    )
}

/// The onboarding instruction for a new user, otherwise the greeting.
///
/// `new_user` must be decided before the data directory is seeded.
pub fn opening_prompt(profile: &ProfileStore, new_user: bool) -> String {
    if new_user {
        onboarding_prompt(profile)
    } else {
        greeting_prompt(&profile.user_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prompt_sections_in_order() {
        let prompt = build_system_prompt(
            "BASE",
            "DATE",
            Some("---\nname: Ada\n---"),
            "- finish the shed",
        );
        let base = prompt.find("BASE").unwrap();
        let date = prompt.find("\n\nDATE\n").unwrap();
        let prefs = prompt
            .find("## User Info and Preferences (from user_info_and_preferences.md)")
            .unwrap();
        let context = prompt
            .find("## Current Active Context (from current_context.md)")
            .unwrap();
        assert!(base < date && date < prefs && prefs < context);
        assert!(prompt.contains("IMPORTANT: Use the `name` from frontmatter"));
        assert!(prompt.ends_with("- finish the shed\n"));
    }

    #[test]
    fn test_prompt_without_profile() {
        let prompt = build_system_prompt("BASE", "DATE", None, "  \n");
        assert!(!prompt.contains("User Info and Preferences"));
        assert!(prompt.ends_with(
            "\n\n## Current Active Context\n\nNo active context items. This may be a new user or a fresh start.\n"
        ));
        assert!(prompt.starts_with("BASE\n\nDATE\n"));
    }

    #[test]
    fn test_greeting_mentions_name() {
        let greeting = greeting_prompt("Ada");
        assert!(greeting.starts_with("[SYSTEM - GREETING]\nStart this conversation by greeting Ada naturally"));
        assert!(greeting.ends_with("Don't use bullet points or numbered lists - just speak naturally."));
    }

    #[test]
    fn test_opening_prompt_follows_new_user_flag() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        std::fs::write(store.preferences_path(), "---\nname: Ada\n---\n").unwrap();

        assert!(opening_prompt(&store, true).starts_with("[SYSTEM - ONBOARDING]"));
        assert!(opening_prompt(&store, false).contains("greeting Ada"));
    }

    #[test]
    fn test_missing_prompt_file_falls_back() {
        let prompt = load_base_prompt(Some(Path::new("/nonexistent/donna/prompt.md")));
        assert_eq!(prompt, BUILTIN_SYSTEM_PROMPT);
        assert!(!BUILTIN_SYSTEM_PROMPT.is_empty());
    }
}
