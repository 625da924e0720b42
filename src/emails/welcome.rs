use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{DesignTokens, Locale, RenderedEmail, button, escape_html, join_url, layout};

fn default_dashboard_url() -> String {
    "/dashboard".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeEmail {
    pub user_name: String,
    pub user_email: String,
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Marketing email, so an unsubscribe link is shown when a token is given.
    pub unsubscribe_token: Option<String>,
    #[serde(default)]
    pub locale: Locale,
}

pub fn render_welcome(email: &WelcomeEmail, tokens: &DesignTokens) -> RenderedEmail {
    let tokens = tokens.resolved();
    let locale = email.locale;
    let name = escape_html(&email.user_name);

    let subject = match locale {
        Locale::En => format!("Welcome {}!", email.user_name),
        Locale::Tr => format!("Hoş Geldiniz {}!", email.user_name),
    };
    let preview = locale.pick("Welcome aboard!", "Aramıza hoş geldiniz!");

    let steps = [
        (
            locale.pick("Complete Your Profile", "Profilinizi Tamamlayın"),
            locale.pick(
                "Update your profile for a personalized experience",
                "Kişiselleştirilmiş deneyim için profilinizi güncelleyin",
            ),
        ),
        (
            locale.pick("Create Your First Project", "İlk Projenizi Oluşturun"),
            locale.pick(
                "Start working by creating your first project",
                "Hemen ilk projenizi oluşturup çalışmaya başlayın",
            ),
        ),
        (
            locale.pick("Invite Your Team", "Ekibinizi Davet Edin"),
            locale.pick(
                "Collaborate by inviting your team members",
                "Ekip arkadaşlarınızı davet ederek birlikte çalışın",
            ),
        ),
    ];
    let steps_html: String = steps
        .iter()
        .enumerate()
        .map(|(i, (title, desc))| {
            format!(
                r#"<tr><td style="padding:8px 0;"><strong style="color:{primary};">{n}.</strong> <strong>{title}</strong><br><span style="color:{muted};">{desc}</span></td></tr>"#,
                primary = tokens.colors.primary,
                n = i + 1,
                title = escape_html(title),
                muted = tokens.colors.muted_foreground,
                desc = escape_html(desc),
            )
        })
        .collect();

    let body = format!(
        r#"<h1 style="margin:0 0 16px;font-size:24px;">{title}</h1>
<p style="margin:0 0 8px;">{greeting} {name},</p>
<p style="margin:0 0 24px;">{intro}</p>
<h2 style="margin:0 0 8px;font-size:18px;">{getting_started}</h2>
<table role="presentation" width="100%" cellpadding="0" cellspacing="0">{steps}</table>
<p style="margin:24px 0;text-align:center;">{cta}</p>
<p style="margin:0;color:{muted};">{help}</p>"#,
        title = escape_html(locale.pick("Welcome to Our Community!", "Aramıza Hoş Geldiniz!")),
        greeting = escape_html(locale.pick("Hello", "Merhaba")),
        name = name,
        intro = escape_html(locale.pick(
            "We're thrilled to have you join our family! Ready to explore the features we've prepared for you?",
            "Ailemize katıldığınız için çok mutluyuz! Sizin için hazırladığımız özellikleri keşfetmeye hazır mısınız?",
        )),
        getting_started = escape_html(locale.pick("Getting Started", "Başlangıç Rehberi")),
        steps = steps_html,
        cta = button(
            &tokens,
            &join_url(&email.base_url, &email.dashboard_url),
            locale.pick("Go to Dashboard", "Dashboard'a Git"),
        ),
        muted = tokens.colors.muted_foreground,
        help = escape_html(locale.pick(
            "Feel free to contact us with any questions or suggestions.",
            "Sorularınız veya önerileriniz için bizimle iletişime geçebilirsiniz.",
        )),
    );

    let mut footer = format!(
        "{} {}",
        escape_html(locale.pick("This email was sent to", "Bu e-posta şu adrese gönderildi:")),
        escape_html(&email.user_email)
    );
    if let Some(token) = &email.unsubscribe_token {
        let href = join_url(&email.base_url, &format!("/unsubscribe?token={}", token));
        footer.push_str(&format!(
            r#" &middot; <a href="{}" style="color:{};">{}</a>"#,
            escape_html(&href),
            tokens.colors.muted_foreground,
            escape_html(locale.pick("Unsubscribe", "Abonelikten çık")),
        ));
    }

    RenderedEmail {
        subject,
        preview: preview.to_string(),
        html: layout(&tokens, locale, preview, &body, &footer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WelcomeEmail {
        WelcomeEmail {
            user_name: "Ada <Admin>".into(),
            user_email: "ada@example.com".into(),
            dashboard_url: default_dashboard_url(),
            base_url: "https://app.example.com".into(),
            unsubscribe_token: None,
            locale: Locale::En,
        }
    }

    #[test]
    fn renders_escaped_name_and_dashboard_link() {
        let rendered = render_welcome(&sample(), &DesignTokens::default());
        assert_eq!(rendered.subject, "Welcome Ada <Admin>!");
        assert!(rendered.html.contains("Hello Ada &lt;Admin&gt;,"));
        assert!(!rendered.html.contains("<Admin>"));
        assert!(rendered.html.contains(r#"href="https://app.example.com/dashboard""#));
        assert!(!rendered.html.contains("Unsubscribe"));
    }

    #[test]
    fn unsubscribe_link_and_locale() {
        let mut email = sample();
        email.unsubscribe_token = Some("tok&1".into());
        email.locale = Locale::Tr;
        let rendered = render_welcome(&email, &DesignTokens::default());
        assert!(rendered.subject.starts_with("Hoş Geldiniz"));
        assert!(rendered.html.contains("unsubscribe?token=tok&amp;1"));
        assert!(rendered.html.contains(r#"<html lang="tr">"#));
    }

    #[test]
    fn applies_token_colours() {
        let mut tokens = DesignTokens::default();
        tokens.colors.primary = "#123456".into();
        let rendered = render_welcome(&sample(), &tokens);
        assert!(rendered.html.contains("background-color:#123456"));
    }
}
