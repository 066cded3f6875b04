//! Provider-neutral request/response shapes.

use serde::{Deserialize, Serialize};

/// What to generate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// Where a callback-capable provider should notify us. Without it the
    /// provider is driven by polling only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl GenerationSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }
}

/// How a provider signals completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    Polling,
    /// Notifies a callback URL; falls back to polling when none was given.
    Callback,
}

/// A generated artifact as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Provider-side item id (needed by some packaging steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Artifact {
    pub fn audio(url: impl Into<String>) -> Self {
        Self {
            audio_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_video(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn has_media(&self) -> bool {
        self.audio_url.is_some() || self.video_url.is_some()
    }

    /// Full-quality URL: the muxed video when present, otherwise the audio.
    pub fn full_url(&self) -> Option<&str> {
        self.video_url.as_deref().or(self.audio_url.as_deref())
    }

    /// Preview URL: the audio when present, otherwise the video.
    pub fn preview_url(&self) -> Option<&str> {
        self.audio_url.as_deref().or(self.video_url.as_deref())
    }
}

/// Result of [`crate::ProviderAdapter::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub correlation_id: String,
    /// Set when the provider finished synchronously.
    pub immediate: Option<Artifact>,
}

impl Submission {
    pub fn pending(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            immediate: None,
        }
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Complete(Artifact),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_wins_for_full_url_and_audio_for_preview() {
        let a = Artifact::audio("https://cdn/a.mp3").with_video("https://cdn/a.mp4");
        assert_eq!(a.full_url(), Some("https://cdn/a.mp4"));
        assert_eq!(a.preview_url(), Some("https://cdn/a.mp3"));

        let audio_only = Artifact::audio("https://cdn/b.mp3");
        assert_eq!(audio_only.full_url(), Some("https://cdn/b.mp3"));
        assert!(!Artifact::default().has_media());
    }
}
