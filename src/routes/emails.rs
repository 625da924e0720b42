//! Email preview endpoint.

use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiResult;
use crate::auth::AuthUser;
use crate::emails::{
    DesignTokens, OrderConfirmation, RenderedEmail, WelcomeEmail, render_order_confirmation,
    render_welcome,
};
use crate::error::ApiError;
use crate::models::ApiResponse;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    /// Template data, shaped like the chosen template's input.
    pub data: Value,
    /// Brand overrides; defaults apply when omitted.
    #[serde(default)]
    pub tokens: Option<DesignTokens>,
}

fn template_data<T: DeserializeOwned>(data: Value, template: &str) -> Result<T, ApiError> {
    serde_json::from_value(data)
        .map_err(|e| ApiError::BadRequest(format!("Invalid data for '{}': {}", template, e)))
}

pub fn render_preview(template: &str, request: PreviewRequest) -> Result<RenderedEmail, ApiError> {
    let tokens = request.tokens.unwrap_or_default();
    match template {
        "welcome" => {
            let email: WelcomeEmail = template_data(request.data, template)?;
            Ok(render_welcome(&email, &tokens))
        }
        "order_confirmation" | "order-confirmation" => {
            let order: OrderConfirmation = template_data(request.data, template)?;
            Ok(render_order_confirmation(&order, &tokens))
        }
        other => Err(ApiError::NotFound(format!("Unknown email template '{}'", other))),
    }
}

/// Render a transactional email without sending it.
#[openapi(tag = "Emails")]
#[post("/emails/preview/<template>", data = "<request>")]
pub async fn preview_email(
    _user: AuthUser,
    template: &str,
    request: Json<PreviewRequest>,
) -> ApiResult<RenderedEmail> {
    Ok(Json(ApiResponse::ok(render_preview(
        template,
        request.into_inner(),
    )?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_preview_escapes_user_values() {
        let rendered = render_preview(
            "welcome",
            PreviewRequest {
                data: json!({"userName": "<b>Ada</b>", "userEmail": "ada@example.com"}),
                tokens: None,
            },
        )
        .unwrap();
        assert!(rendered.html.contains("&lt;b&gt;Ada&lt;/b&gt;"));
        assert!(!rendered.html.contains("<b>Ada</b>"));
    }

    #[test]
    fn unknown_template_is_not_found() {
        let result = render_preview(
            "invoice",
            PreviewRequest {
                data: json!({}),
                tokens: None,
            },
        );
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[test]
    fn malformed_data_is_a_bad_request() {
        let result = render_preview(
            "order_confirmation",
            PreviewRequest {
                data: json!({"orderNumber": 5}),
                tokens: None,
            },
        );
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
