//! Brand tokens applied to transactional emails.
//!
//! Email clients ignore CSS variables, so every colour is resolved to a hex
//! string before rendering. Tokens may be given as hex or as the design
//! system's HSL triplets (`"39 100% 54%"` or `"hsl(39, 100%, 54%)"`).

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailColors {
    pub primary: String,
    pub primary_foreground: String,
    pub background: String,
    pub foreground: String,
    pub muted: String,
    pub muted_foreground: String,
    pub success: String,
    pub border: String,
    pub card_background: String,
}

impl Default for EmailColors {
    fn default() -> Self {
        Self {
            primary: "#ff9500".into(),
            primary_foreground: "#171717".into(),
            background: "#fafafa".into(),
            foreground: "#171717".into(),
            muted: "#f0f0f0".into(),
            muted_foreground: "#6b7280".into(),
            success: "#22c55e".into(),
            border: "#d6dee6".into(),
            card_background: "#ffffff".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DesignTokens {
    pub colors: EmailColors,
    pub font_family: String,
    pub border_radius: String,
    pub brand_name: String,
}

impl Default for DesignTokens {
    fn default() -> Self {
        Self {
            colors: EmailColors::default(),
            font_family: "-apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Helvetica, Arial, sans-serif"
                .into(),
            border_radius: "8px".into(),
            brand_name: "Marketing".into(),
        }
    }
}

impl DesignTokens {
    /// Resolve every colour to `#rrggbb`, falling back to the default palette
    /// for values that cannot be parsed.
    pub fn resolved(&self) -> DesignTokens {
        let defaults = EmailColors::default();
        let pick = |value: &str, fallback: &str| {
            to_hex(value).unwrap_or_else(|| fallback.to_string())
        };
        let c = &self.colors;
        DesignTokens {
            colors: EmailColors {
                primary: pick(&c.primary, &defaults.primary),
                primary_foreground: pick(&c.primary_foreground, &defaults.primary_foreground),
                background: pick(&c.background, &defaults.background),
                foreground: pick(&c.foreground, &defaults.foreground),
                muted: pick(&c.muted, &defaults.muted),
                muted_foreground: pick(&c.muted_foreground, &defaults.muted_foreground),
                success: pick(&c.success, &defaults.success),
                border: pick(&c.border, &defaults.border),
                card_background: pick(&c.card_background, &defaults.card_background),
            },
            font_family: sanitize_css(&self.font_family),
            border_radius: sanitize_css(&self.border_radius),
            brand_name: self.brand_name.clone(),
        }
    }
}

/// Strip characters that could close a `style` attribute or a declaration.
fn sanitize_css(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '"' | '<' | '>' | ';' | '{' | '}'))
        .collect()
}

fn to_hex(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let valid = matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
        return valid.then(|| format!("#{}", hex.to_ascii_lowercase()));
    }
    hsl_to_hex(value)
}

/// Convert an HSL token to `#rrggbb`.
pub fn hsl_to_hex(hsl: &str) -> Option<String> {
    let hsl = hsl.trim();
    let parts: Vec<&str> = if let Some(start) = hsl.find('(') {
        let end = hsl.rfind(')')?;
        hsl.get(start + 1..end)?.split(',').map(str::trim).collect()
    } else {
        hsl.split_whitespace().collect()
    };
    if parts.len() < 3 {
        return None;
    }

    let number = |part: &str| part.trim_end_matches('%').trim().parse::<f64>().ok();
    let h = number(parts[0])? / 360.0;
    let s = number(parts[1])? / 100.0;
    let l = number(parts[2])? / 100.0;

    let (r, g, b) = if s == 0.0 {
        (l, l, l)
    } else {
        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        (
            hue_to_rgb(p, q, h + 1.0 / 3.0),
            hue_to_rgb(p, q, h),
            hue_to_rgb(p, q, h - 1.0 / 3.0),
        )
    };

    let channel = |x: f64| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
    Some(format!(
        "#{:02x}{:02x}{:02x}",
        channel(r),
        channel(g),
        channel(b)
    ))
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsl_triplets_convert() {
        assert_eq!(hsl_to_hex("0 0% 100%").as_deref(), Some("#ffffff"));
        assert_eq!(hsl_to_hex("0 0% 0%").as_deref(), Some("#000000"));
        assert_eq!(hsl_to_hex("0 100% 50%").as_deref(), Some("#ff0000"));
        assert_eq!(hsl_to_hex("hsl(120, 100%, 50%)").as_deref(), Some("#00ff00"));
        assert_eq!(hsl_to_hex("240 100% 50%").as_deref(), Some("#0000ff"));
        assert_eq!(hsl_to_hex("nonsense"), None);
    }

    #[test]
    fn resolve_falls_back_per_colour() {
        let mut tokens = DesignTokens::default();
        tokens.colors.primary = "0 100% 50%".into();
        tokens.colors.border = "red; background:url(x)".into();
        tokens.font_family = "Inter\"><script>".into();

        let resolved = tokens.resolved();
        assert_eq!(resolved.colors.primary, "#ff0000");
        assert_eq!(resolved.colors.border, EmailColors::default().border);
        assert_eq!(resolved.font_family, "Interscript");
    }

    #[test]
    fn hex_values_are_normalised() {
        assert_eq!(to_hex("#ABC").as_deref(), Some("#abc"));
        assert_eq!(to_hex("#12345g"), None);
    }
}
