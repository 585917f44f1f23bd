//! Style presets appended to text prompts

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StylePreset {
    pub id: &'static str,
    pub name: &'static str,
    pub prompt: &'static str,
}

pub const BUILTIN_STYLES: &[StylePreset] = &[
    StylePreset {
        id: "none",
        name: "Natural / None",
        prompt: "",
    },
    StylePreset {
        id: "byzantine",
        name: "Byzantine Icon",
        prompt: "Byzantine icon style, gold leaf background, flat perspective, sacred art, elongated features, tempera texture",
    },
    StylePreset {
        id: "stained-glass",
        name: "Stained Glass",
        prompt: "Gothic stained glass window style, vibrant jewel tones, intricate lead lines, illuminated by sunlight, sacred atmosphere",
    },
    StylePreset {
        id: "renaissance",
        name: "Renaissance",
        prompt: "High Renaissance oil painting masterpiece, realistic anatomical detail, soft sfumato lighting, dramatic composition",
    },
    StylePreset {
        id: "baroque",
        name: "Baroque",
        prompt: "Baroque art style, dramatic chiaroscuro lighting, deep shadows, emotional intensity, dynamic movement",
    },
    StylePreset {
        id: "fresco",
        name: "Ancient Fresco",
        prompt: "Ancient worn fresco wall painting, cracked plaster texture, muted earth tones, historical sacred art",
    },
    StylePreset {
        id: "manuscript",
        name: "Illuminated",
        prompt: "Medieval illuminated manuscript style, intricate gold leaf borders, calligraphy, vellum texture, detailed miniatures",
    },
    StylePreset {
        id: "sketch",
        name: "Charcoal Sketch",
        prompt: "Vintage charcoal sketch on rough paper, artistic study, expressive lines, shading, old master drawing",
    },
    StylePreset {
        id: "oil",
        name: "Classic Oil",
        prompt: "Traditional oil painting on canvas, visible brushstrokes, rich texture, classical religious art",
    },
];

/// Style presets plus an optional suffix added to every text prompt
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    base_enhancement: Option<String>,
    presets: Vec<StylePreset>,
}

impl StyleCatalog {
    pub fn new(base_enhancement: Option<String>) -> Self {
        Self {
            base_enhancement: base_enhancement.filter(|b| !b.trim().is_empty()),
            presets: BUILTIN_STYLES.to_vec(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StylePreset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn presets(&self) -> &[StylePreset] {
        &self.presets
    }

    /// `prompt, <base enhancement>, <style prompt>`; unknown styles add nothing
    pub fn enhance(&self, prompt: &str, style: Option<&str>) -> String {
        let mut parts = vec![prompt.trim()];
        if let Some(base) = self.base_enhancement.as_deref() {
            parts.push(base.trim());
        }
        if let Some(preset) = style.and_then(|id| self.get(id)) {
            if !preset.prompt.is_empty() {
                parts.push(preset.prompt);
            }
        }
        parts.join(", ")
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}
