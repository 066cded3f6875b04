//! Request shaping for the two generation workflows.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::GenerationSpec;

const STORY_SNIPPET_CHARS: usize = 150;

/// Check-in mood selecting the background music of a daily nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NudgeMood {
    Hurting,
    Confidence,
    Angry,
    #[default]
    Unstoppable,
}

impl NudgeMood {
    pub const ALL: [NudgeMood; 4] = [
        NudgeMood::Hurting,
        NudgeMood::Confidence,
        NudgeMood::Angry,
        NudgeMood::Unstoppable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeMood::Hurting => "hurting",
            NudgeMood::Confidence => "confidence",
            NudgeMood::Angry => "angry",
            NudgeMood::Unstoppable => "unstoppable",
        }
    }

    pub fn background_style(&self) -> &'static str {
        match self {
            NudgeMood::Hurting => "warm lo-fi ambient with gentle pads",
            NudgeMood::Confidence => "bright indie acoustic with an uplifting rhythm",
            NudgeMood::Angry => "hard trap beat with punchy drums",
            NudgeMood::Unstoppable => "anthemic synth with driving bass",
        }
    }

    /// Spoken line used when the caller supplies none.
    pub fn default_motivation(&self) -> &'static str {
        match self {
            NudgeMood::Hurting => "It is okay to hurt. It does not get to define you. Keep choosing yourself.",
            NudgeMood::Confidence => "You are doing better than you think. Every day you pick yourself is a win.",
            NudgeMood::Angry => "Turn that heat into fuel. Every win from here is yours.",
            NudgeMood::Unstoppable => "That is the energy. You are not moving on, you are moving up.",
        }
    }
}

impl FromStr for NudgeMood {
    type Err = String;

    /// Unknown moods fall back to [`NudgeMood::Unstoppable`]; only blank input is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err("mood must not be empty".into());
        }
        Ok(NudgeMood::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .unwrap_or_default())
    }
}

fn snippet(story: &str) -> &str {
    let story = story.trim();
    match story.char_indices().nth(STORY_SNIPPET_CHARS) {
        Some((idx, _)) => &story[..idx],
        None => story,
    }
}

/// Music request for a song job.
pub fn song_spec(prompt: &str, style: Option<&str>, title: Option<&str>, callback_url: Option<String>) -> GenerationSpec {
    let mut spec = GenerationSpec::new(prompt.trim()).with_callback_url(callback_url);
    if let Some(style) = style.map(str::trim).filter(|s| !s.is_empty()) {
        spec = spec.with_style(style);
    }
    if let Some(title) = title.map(str::trim).filter(|s| !s.is_empty()) {
        spec = spec.with_title(title);
    }
    spec
}

/// Voice request for a daily nudge.
pub fn nudge_spec(mood: NudgeMood, story: &str, motivation: Option<&str>) -> GenerationSpec {
    let line = motivation
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| mood.default_motivation());
    let prompt = format!(
        "A 15 to 20 second spoken motivational voiceover, no singing. \
         Background: {}. Context from the listener: \"{}\". \
         The narrator says: \"{}\". End on a short beat.",
        mood.background_style(),
        snippet(story),
        line,
    );
    GenerationSpec::new(prompt)
        .with_title(format!("Daily Nudge - {}", mood.as_str()))
        .with_tags("voiceover, motivational, short-nudge")
        .with_style(mood.background_style())
}
