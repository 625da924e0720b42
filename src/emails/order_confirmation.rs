use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{DesignTokens, Locale, RenderedEmail, button, escape_html, format_currency, layout};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    /// Unit price.
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    pub order_id: String,
    pub order_date: String,
    pub customer_name: String,
    pub customer_email: String,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub shipping: f64,
    pub total: f64,
    pub shipping_address: Option<ShippingAddress>,
    pub estimated_delivery: Option<String>,
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub locale: Locale,
}

pub fn render_order_confirmation(order: &OrderConfirmation, tokens: &DesignTokens) -> RenderedEmail {
    let tokens = tokens.resolved();
    let locale = order.locale;
    let c = &tokens.colors;
    let money = |amount: f64| escape_html(&format_currency(amount, locale));

    let subject = locale
        .pick("Your Order is Confirmed!", "Siparişiniz Onaylandı!")
        .to_string();
    let preview = match locale {
        Locale::En => format!("Order #{} confirmed", order.order_id),
        Locale::Tr => format!("Sipariş #{} onaylandı", order.order_id),
    };

    let rows: String = order
        .items
        .iter()
        .map(|item| {
            format!(
                r#"<tr style="border-bottom:1px solid {border};"><td style="padding:8px 0;">{name}</td><td style="padding:8px 0;text-align:center;">{qty}</td><td style="padding:8px 0;text-align:right;">{price}</td></tr>"#,
                border = c.border,
                name = escape_html(&item.name),
                qty = item.quantity,
                price = money(item.price * f64::from(item.quantity)),
            )
        })
        .collect();

    let shipping_cost = if order.shipping == 0.0 {
        escape_html(locale.pick("Free", "Ücretsiz"))
    } else {
        money(order.shipping)
    };
    let summary_row = |label: &str, value: &str| {
        format!(
            r#"<tr><td colspan="2" style="padding:4px 0;">{}:</td><td style="padding:4px 0;text-align:right;">{}</td></tr>"#,
            escape_html(label),
            value
        )
    };

    let mut body = format!(
        r#"<h1 style="margin:0 0 8px;font-size:24px;color:{success};">{title}</h1>
<p style="margin:0 0 8px;font-weight:bold;">{thanks} {name}</p>
<p style="margin:0 0 24px;">{intro}</p>
<table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:{muted};border-radius:{radius};margin-bottom:24px;">
<tr><td style="padding:12px;"><span style="font-size:12px;color:{muted_fg};">{order_number_label}</span><br><strong>#{order_id}</strong></td>
<td style="padding:12px;"><span style="font-size:12px;color:{muted_fg};">{order_date_label}</span><br><strong>{order_date}</strong></td></tr>
</table>
<h2 style="margin:0 0 8px;font-size:18px;">{summary_label}</h2>
<table role="presentation" width="100%" cellpadding="0" cellspacing="0">
<tr><th align="left">{product}</th><th>{qty}</th><th align="right">{price}</th></tr>
{rows}
{subtotal}{tax}{shipping}
<tr><td colspan="2" style="padding:8px 0;font-weight:bold;font-size:18px;">{total_label}:</td><td style="padding:8px 0;text-align:right;font-weight:bold;font-size:18px;color:{primary};">{total}</td></tr>
</table>"#,
        success = c.success,
        title = escape_html(locale.pick("Order Confirmed!", "Siparişiniz Onaylandı!")),
        thanks = escape_html(locale.pick("Thank you,", "Teşekkür ederiz,")),
        name = escape_html(&order.customer_name),
        intro = escape_html(locale.pick(
            "We've received your order and it's being processed. Find your order details below.",
            "Siparişinizi aldık ve hazırlanmaya başladı. Aşağıda sipariş detaylarınızı bulabilirsiniz.",
        )),
        muted = c.muted,
        radius = tokens.border_radius,
        muted_fg = c.muted_foreground,
        order_number_label = escape_html(locale.pick("Order Number", "Sipariş Numarası")),
        order_id = escape_html(&order.order_id),
        order_date_label = escape_html(locale.pick("Order Date", "Sipariş Tarihi")),
        order_date = escape_html(&order.order_date),
        summary_label = escape_html(locale.pick("Order Summary", "Sipariş Özeti")),
        product = escape_html(locale.pick("Product", "Ürün")),
        qty = escape_html(locale.pick("Qty", "Adet")),
        price = escape_html(locale.pick("Price", "Fiyat")),
        rows = rows,
        subtotal = summary_row(locale.pick("Subtotal", "Ara Toplam"), &money(order.subtotal)),
        tax = summary_row(locale.pick("Tax", "KDV"), &money(order.tax)),
        shipping = summary_row(locale.pick("Shipping", "Kargo"), &shipping_cost),
        total_label = escape_html(locale.pick("Total", "Toplam")),
        primary = c.primary,
        total = money(order.total),
    );

    if let Some(address) = &order.shipping_address {
        let mut lines = vec![escape_html(&address.name), escape_html(&address.line1)];
        if let Some(line2) = &address.line2 {
            lines.push(escape_html(line2));
        }
        lines.push(format!(
            "{} {}",
            escape_html(&address.postal_code),
            escape_html(&address.city)
        ));
        lines.push(escape_html(&address.country));
        body.push_str(&format!(
            r#"<h2 style="margin:24px 0 8px;font-size:18px;">{}</h2><p style="margin:0;">{}</p>"#,
            escape_html(locale.pick("Shipping Address", "Teslimat Adresi")),
            lines.join("<br>")
        ));
    }
    if let Some(delivery) = &order.estimated_delivery {
        body.push_str(&format!(
            r#"<p style="margin:16px 0 0;"><strong>{}:</strong> {}</p>"#,
            escape_html(locale.pick("Estimated Delivery", "Tahmini Teslimat")),
            escape_html(delivery)
        ));
    }
    if let Some(url) = &order.tracking_url {
        body.push_str(&format!(
            r#"<p style="margin:24px 0 0;text-align:center;">{}</p>"#,
            button(&tokens, url, locale.pick("Track Order", "Siparişimi Takip Et"))
        ));
    }

    let footer = format!(
        "{} {}",
        escape_html(locale.pick(
            "Need help? Contact our customer service. This receipt was sent to",
            "Yardıma mı ihtiyacınız var? Müşteri hizmetlerimizle iletişime geçin. Bu makbuz şu adrese gönderildi:",
        )),
        escape_html(&order.customer_email)
    );

    RenderedEmail {
        subject,
        html: layout(&tokens, locale, &preview, &body, &footer),
        preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> OrderConfirmation {
        OrderConfirmation {
            order_id: "A-1001".into(),
            order_date: "2024-05-01".into(),
            customer_name: "Grace".into(),
            customer_email: "grace@example.com".into(),
            items: vec![
                OrderItem {
                    name: "Widget <XL>".into(),
                    quantity: 2,
                    price: 10.0,
                },
                OrderItem {
                    name: "Gadget".into(),
                    quantity: 1,
                    price: 1250.0,
                },
            ],
            subtotal: 1270.0,
            tax: 0.0,
            shipping: 0.0,
            total: 1270.0,
            shipping_address: None,
            estimated_delivery: None,
            tracking_url: None,
            locale: Locale::En,
        }
    }

    #[test]
    fn renders_lines_and_totals() {
        let rendered = render_order_confirmation(&order(), &DesignTokens::default());
        assert_eq!(rendered.subject, "Your Order is Confirmed!");
        assert_eq!(rendered.preview, "Order #A-1001 confirmed");
        assert!(rendered.html.contains("Widget &lt;XL&gt;"));
        assert!(rendered.html.contains("$20.00"));
        assert!(rendered.html.contains("$1,270.00"));
        assert!(rendered.html.contains(">Free<"));
    }

    #[test]
    fn optional_sections_render_when_present() {
        let mut o = order();
        o.locale = Locale::Tr;
        o.shipping = 15.5;
        o.tracking_url = Some("https://track.example.com/A-1001".into());
        o.estimated_delivery = Some("3-5 gün".into());
        o.shipping_address = Some(ShippingAddress {
            name: "Grace".into(),
            line1: "1 Main St".into(),
            line2: None,
            city: "Istanbul".into(),
            postal_code: "34000".into(),
            country: "TR".into(),
        });

        let rendered = render_order_confirmation(&o, &DesignTokens::default());
        assert!(rendered.html.contains("₺15,50"));
        assert!(rendered.html.contains("34000 Istanbul"));
        assert!(rendered.html.contains("Siparişimi Takip Et"));
        assert!(rendered.html.contains("3-5 gün"));
    }
}
