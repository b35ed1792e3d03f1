use std::collections::HashMap;

/// Prompt templates used by the joke and music components.
///
/// Templates use `{name}` placeholders filled with [`render`]. The built-in set
/// is compiled into the binary; a directory of `<key>.md` files can override
/// any of them by key.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub should_respond: String,
    pub generate_joke: String,
    pub polly_persona: String,
    pub parse_music: String,
    pub music_system: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            should_respond: include_str!("../prompts/should_respond.md").to_string(),
            generate_joke: include_str!("../prompts/generate_joke.md").to_string(),
            polly_persona: include_str!("../prompts/polly_persona.md").to_string(),
            parse_music: include_str!("../prompts/parse_music.md").to_string(),
            music_system: include_str!("../prompts/music_system.md").to_string(),
        }
    }
}

impl PromptSet {
    /// Builds a prompt set from `overrides`, falling back to the built-in
    /// template for every key that is missing.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut prompts = Self::default();
        for (key, slot) in [
            ("should_respond", &mut prompts.should_respond),
            ("generate_joke", &mut prompts.generate_joke),
            ("polly_persona", &mut prompts.polly_persona),
            ("parse_music", &mut prompts.parse_music),
            ("music_system", &mut prompts.music_system),
        ] {
            if let Some(content) = overrides.get(key) {
                *slot = content.clone();
            }
        }
        prompts
    }
}

/// Substitutes every `{key}` in `template` with its value.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}
