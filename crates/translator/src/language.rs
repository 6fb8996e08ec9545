// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Language and voice registries for the translation service.
//!
//! The service speaks two-letter language codes and opaque voice tokens;
//! both are mapped 1:1 from internal enums. The input (producer) side may
//! be left unset, which the control plane spells `auto`.

use serde_json::json;

/// Languages the translation service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    English,
    Italian,
    Spanish,
    Thai,
    French,
    German,
    Russian,
    Arabic,
    Farsi,
}

impl Language {
    pub const ALL: [Self; 9] = [
        Self::English,
        Self::Italian,
        Self::Spanish,
        Self::Thai,
        Self::French,
        Self::German,
        Self::Russian,
        Self::Arabic,
        Self::Farsi,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Italian => "it",
            Self::Spanish => "es",
            Self::Thai => "th",
            Self::French => "fr",
            Self::German => "de",
            Self::Russian => "ru",
            Self::Arabic => "ar",
            Self::Farsi => "fa",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|language| language.code() == code)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The code used on the wire for an optional input language.
///
/// `auto` is permitted only on the `from` side of the control message.
pub fn input_language_code(language: Option<Language>) -> &'static str {
    language.map_or("auto", Language::code)
}

/// Output voices, mapped 1:1 to service tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Voice {
    #[default]
    Abdul,
    JesusRodriguez,
    TestIrina,
    Serena,
    Ryan,
}

impl Voice {
    pub const ALL: [Self; 5] =
        [Self::Abdul, Self::JesusRodriguez, Self::TestIrina, Self::Serena, Self::Ryan];

    /// Opaque service token for this voice.
    pub const fn service_token(self) -> &'static str {
        match self {
            Self::Abdul => "YkxA6GRXs4A6i5cwfm1E",
            // shares a token with TestIrina on the service side
            Self::JesusRodriguez | Self::TestIrina => "ovxyZ1ldY23QpYBvkKx5",
            Self::Serena => "pMsXgVXv3BLzUgSXRplE",
            Self::Ryan => "wViXBPUzp2ZZixB1xQuM",
        }
    }

    pub fn from_service_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|voice| voice.service_token() == token)
    }
}

/// Control message selecting the translation target.
///
/// `{"type":"set_target_language","cmd":{"from","to","voiceID"}}`
pub fn target_language_cmd(to: Language, voice: Voice, from: Option<Language>) -> serde_json::Value {
    json!({
        "type": "set_target_language",
        "cmd": {
            "from": input_language_code(from),
            "to": to.code(),
            "voiceID": voice.service_token(),
        },
    })
}
