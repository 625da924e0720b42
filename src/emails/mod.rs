//! Transactional email rendering.
//!
//! Templates are plain Rust functions from typed data to HTML. Every value
//! that comes from the caller goes through [`escape_html`].

pub mod order_confirmation;
pub mod tokens;
pub mod welcome;

pub use order_confirmation::{OrderConfirmation, OrderItem, render_order_confirmation};
pub use tokens::DesignTokens;
pub use welcome::{WelcomeEmail, render_welcome};

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Tr,
}

impl Locale {
    /// Pick the string for this locale.
    pub fn pick<'a>(self, en: &'a str, tr: &'a str) -> &'a str {
        match self {
            Locale::En => en,
            Locale::Tr => tr,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEmail {
    pub subject: String,
    pub preview: String,
    pub html: String,
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Format an amount with the locale's currency symbol and separators:
/// `$1,234.50` or `₺1.234,50`.
pub fn format_currency(amount: f64, locale: Locale) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let (whole, fraction) = (cents / 100, cents % 100);
    let (symbol, group, decimal) = match locale {
        Locale::En => ("$", ',', '.'),
        Locale::Tr => ("₺", '.', ','),
    };

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(group);
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{}{}{}{:02}", sign, symbol, grouped, decimal, fraction)
}

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Outer document shared by every template. `body` must already be escaped.
pub(crate) fn layout(
    tokens: &DesignTokens,
    locale: Locale,
    preview: &str,
    body: &str,
    footer: &str,
) -> String {
    let c = &tokens.colors;
    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{brand}</title>
</head>
<body style="margin:0;padding:0;background-color:{background};font-family:{font};color:{foreground};">
<div style="display:none;max-height:0;overflow:hidden;">{preview}</div>
<table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:{background};">
<tr><td align="center" style="padding:24px 12px;">
<table role="presentation" width="600" cellpadding="0" cellspacing="0" style="max-width:600px;background-color:{card};border:1px solid {border};border-radius:{radius};">
<tr><td style="padding:24px;background-color:{primary};color:{primary_fg};border-radius:{radius} {radius} 0 0;font-size:20px;font-weight:bold;">{brand}</td></tr>
<tr><td style="padding:24px;">{body}</td></tr>
<tr><td style="padding:16px 24px;font-size:12px;color:{muted_fg};border-top:1px solid {border};">{footer}</td></tr>
</table>
</td></tr>
</table>
</body>
</html>"#,
        lang = locale.pick("en", "tr"),
        brand = escape_html(&tokens.brand_name),
        background = c.background,
        font = tokens.font_family,
        foreground = c.foreground,
        preview = escape_html(preview),
        card = c.card_background,
        border = c.border,
        radius = tokens.border_radius,
        primary = c.primary,
        primary_fg = c.primary_foreground,
        body = body,
        muted_fg = c.muted_foreground,
        footer = footer,
    )
}

/// Call-to-action link styled as a button.
pub(crate) fn button(tokens: &DesignTokens, href: &str, label: &str) -> String {
    format!(
        r#"<a href="{href}" style="display:inline-block;padding:12px 32px;background-color:{bg};color:{fg};text-decoration:none;border-radius:{radius};font-weight:bold;">{label}</a>"#,
        href = escape_html(href),
        bg = tokens.colors.primary,
        fg = tokens.colors.primary_foreground,
        radius = tokens.border_radius,
        label = escape_html(label),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn currency_uses_locale_separators() {
        assert_eq!(format_currency(1234.5, Locale::En), "$1,234.50");
        assert_eq!(format_currency(1234.5, Locale::Tr), "₺1.234,50");
        assert_eq!(format_currency(0.0, Locale::En), "$0.00");
        assert_eq!(format_currency(999.999, Locale::En), "$1,000.00");
        assert_eq!(format_currency(1_000_000.0, Locale::En), "$1,000,000.00");
        assert_eq!(format_currency(-5.25, Locale::En), "-$5.25");
    }

    #[test]
    fn urls_join_cleanly() {
        assert_eq!(join_url("https://app.test/", "/dashboard"), "https://app.test/dashboard");
        assert_eq!(join_url("https://app.test", "docs"), "https://app.test/docs");
        assert_eq!(join_url("https://app.test", "https://other.test/x"), "https://other.test/x");
    }
}
