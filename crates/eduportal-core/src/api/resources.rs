//! Typed clients for the admin dashboard's resources: site content
//! sections, pricing plans, and student/teacher accounts.
//!
//! These are thin wrappers over [`ApiGateway::call_json`]; authentication,
//! refresh and retry all happen in the gateway.

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::endpoints;
use super::gateway::ApiGateway;
use super::transport::{CallOptions, FormPart};
use super::ApiError;

/// List endpoints answer either with a bare array or a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Paged { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> ListResponse<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            ListResponse::Paged { results } => results,
            ListResponse::Plain(items) => items,
        }
    }
}

/// An editable block of marketing-site content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ContentSection {
    pub id: i64,
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentSectionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_published: Option<bool>,
}

/// Image attached to a content section upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PricingPlan {
    pub id: i64,
    pub name: String,
    /// Decimal amount as sent by the backend, e.g. "19.99"
    pub price: String,
    #[serde(default)]
    pub billing_period: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanInput {
    pub name: String,
    pub price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_period: Option<String>,
    pub features: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
}

impl Member {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemberUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

async fn list<T: DeserializeOwned>(
    gateway: &ApiGateway,
    endpoint: &str,
    options: CallOptions,
) -> Result<Vec<T>, ApiError> {
    let response: ListResponse<T> = gateway.call_json(endpoint, options).await?;
    Ok(response.into_items())
}

pub struct ContentApi<'a> {
    gateway: &'a ApiGateway,
}

impl ContentApi<'_> {
    pub async fn list(&self) -> Result<Vec<ContentSection>, ApiError> {
        list(self.gateway, endpoints::CONTENT_SECTIONS, CallOptions::get()).await
    }

    pub async fn get(&self, id: i64) -> Result<ContentSection, ApiError> {
        self.gateway
            .call_json(&endpoints::content_section(id), CallOptions::get())
            .await
    }

    pub async fn update(
        &self,
        id: i64,
        update: &ContentSectionUpdate,
    ) -> Result<ContentSection, ApiError> {
        self.gateway
            .call_json(&endpoints::content_section(id), CallOptions::patch(to_body(update)?))
            .await
    }

    /// Update text fields and replace the section image in one multipart
    /// submission.
    pub async fn update_with_image(
        &self,
        id: i64,
        update: &ContentSectionUpdate,
        image: ImageUpload,
    ) -> Result<ContentSection, ApiError> {
        let mut parts = Vec::new();
        if let Some(ref title) = update.title {
            parts.push(FormPart::text("title", title.clone()));
        }
        if let Some(ref body) = update.body {
            parts.push(FormPart::text("body", body.clone()));
        }
        if let Some(published) = update.is_published {
            parts.push(FormPart::text("is_published", published.to_string()));
        }
        parts.push(FormPart::file("image", image.file_name, image.bytes).with_mime(image.mime));

        self.gateway
            .call_json(
                &endpoints::content_section(id),
                CallOptions::new(Method::PATCH).multipart(parts),
            )
            .await
    }
}

pub struct PlansApi<'a> {
    gateway: &'a ApiGateway,
}

impl PlansApi<'_> {
    pub async fn list(&self) -> Result<Vec<PricingPlan>, ApiError> {
        list(self.gateway, endpoints::PLANS, CallOptions::get()).await
    }

    pub async fn create(&self, input: &PlanInput) -> Result<PricingPlan, ApiError> {
        self.gateway
            .call_json(endpoints::PLANS, CallOptions::post(to_body(input)?))
            .await
    }

    pub async fn update(&self, id: i64, input: &PlanInput) -> Result<PricingPlan, ApiError> {
        self.gateway
            .call_json(
                &endpoints::plan(id),
                CallOptions::new(Method::PUT).json(to_body(input)?),
            )
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.gateway
            .call(&endpoints::plan(id), CallOptions::delete())
            .await?;
        Ok(())
    }
}

pub struct UsersApi<'a> {
    gateway: &'a ApiGateway,
}

impl UsersApi<'_> {
    pub async fn students(&self, search: Option<&str>) -> Result<Vec<Member>, ApiError> {
        list(self.gateway, endpoints::STUDENTS, Self::search(search)).await
    }

    pub async fn teachers(&self, search: Option<&str>) -> Result<Vec<Member>, ApiError> {
        list(self.gateway, endpoints::TEACHERS, Self::search(search)).await
    }

    pub async fn get(&self, id: i64) -> Result<Member, ApiError> {
        self.gateway
            .call_json(&endpoints::user(id), CallOptions::get())
            .await
    }

    pub async fn update(&self, id: i64, update: &MemberUpdate) -> Result<Member, ApiError> {
        self.gateway
            .call_json(&endpoints::user(id), CallOptions::patch(to_body(update)?))
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.gateway
            .call(&endpoints::user(id), CallOptions::delete())
            .await?;
        Ok(())
    }

    fn search(search: Option<&str>) -> CallOptions {
        match search {
            Some(term) if !term.trim().is_empty() => CallOptions::get().query("search", term.trim()),
            _ => CallOptions::get(),
        }
    }
}

impl ApiGateway {
    pub fn content(&self) -> ContentApi<'_> {
        ContentApi { gateway: self }
    }

    pub fn plans(&self) -> PlansApi<'_> {
        PlansApi { gateway: self }
    }

    pub fn users(&self) -> UsersApi<'_> {
        UsersApi { gateway: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_accepts_both_shapes() {
        let plain: ListResponse<Member> =
            serde_json::from_str(r#"[{"id": 1, "email": "s@example.edu"}]"#).unwrap();
        assert_eq!(plain.into_items().len(), 1);

        let paged: ListResponse<Member> = serde_json::from_str(
            r#"{"count": 2, "next": null, "previous": null, "results": [
                {"id": 1, "email": "a@example.edu", "first_name": "Ana"},
                {"id": 2, "email": "b@example.edu"}
            ]}"#,
        )
        .unwrap();
        let items = paged.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].full_name(), "Ana");
    }

    #[test]
    fn test_plan_parses_with_defaults() {
        let plan: PricingPlan =
            serde_json::from_str(r#"{"id": 3, "name": "Pro", "price": "19.99"}"#).unwrap();
        assert!(plan.features.is_empty());
        assert!(!plan.is_active);
    }

    #[test]
    fn test_search_trims_blank_terms() {
        assert!(UsersApi::search(Some("   ")).query.is_empty());
        assert_eq!(
            UsersApi::search(Some(" ada ")).query,
            vec![("search".to_string(), "ada".to_string())]
        );
    }
}
