//! Prompt resource texts, loaded at compile time and keyed by name.

pub const ROLE_RULES: &str = include_str!("resources/role_rules.md");
pub const LANG_MULTI_TURN: &str = include_str!("resources/lang_multi_turn.md");
pub const LANG_SINGLE_SHOT: &str = include_str!("resources/lang_single_shot.md");
pub const JSON_USER_MESSAGE: &str = include_str!("resources/json_user_message.md");

/// Language-spec text by key.
pub fn language_spec(key: &str) -> Option<&'static str> {
    match key {
        "single_shot" => Some(LANG_SINGLE_SHOT),
        "multi_turn" => Some(LANG_MULTI_TURN),
        "json" => Some(JSON_USER_MESSAGE),
        _ => None,
    }
}
