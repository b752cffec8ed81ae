use askama::Template;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};

use super::{HtmlTemplate, PageError, SignedIn};
use crate::{
    auth::AuthContext,
    catalog::{ItemFilters, Scope},
    error::AppError,
    models::{Availability, Category, CommunityItem, Condition, Item, TradeType},
    server::AppState,
    uploads::ItemSubmission,
    validation::{ItemForm, validate_item},
};

struct SelectOption {
    value: &'static str,
    selected: bool,
}

fn options(values: impl Iterator<Item = &'static str>, selected: &str) -> Vec<SelectOption> {
    values
        .map(|value| SelectOption {
            value,
            selected: value.eq_ignore_ascii_case(selected.trim()),
        })
        .collect()
}

fn labels<T: Copy>(all: &'static [T], label: fn(&T) -> &'static str) -> impl Iterator<Item = &'static str> {
    all.iter().map(move |v| label(v))
}

#[derive(Template)]
#[template(path = "items/index.html")]
struct ItemsTemplate {
    viewer: Option<String>,
    errors: Vec<String>,
    items: Vec<Item>,
    search: String,
    show_all: bool,
    categories: Vec<SelectOption>,
    conditions: Vec<SelectOption>,
    availabilities: Vec<SelectOption>,
}

/// Field values echoed back into the item form.
#[derive(Default)]
struct ItemFormView {
    name: String,
    description: String,
    category: String,
    condition: String,
    trade_type: String,
    estimated_value: String,
    provenance: String,
    technical_details: String,
}

impl From<ItemForm> for ItemFormView {
    fn from(form: ItemForm) -> Self {
        Self {
            name: form.name.unwrap_or_default(),
            description: form.description.unwrap_or_default(),
            category: form.category.unwrap_or_default(),
            condition: form.condition.unwrap_or_default(),
            trade_type: form.trade_type.unwrap_or_default(),
            estimated_value: form.estimated_value.unwrap_or_default(),
            provenance: form.provenance.unwrap_or_default(),
            technical_details: form.technical_details.unwrap_or_default(),
        }
    }
}

impl From<&Item> for ItemFormView {
    fn from(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            description: item.description.clone(),
            category: item.category.to_string(),
            condition: item.condition.to_string(),
            trade_type: item.trade_type.to_string(),
            estimated_value: item.estimated_value.to_string(),
            provenance: item.provenance.clone(),
            technical_details: item.technical_details.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "items/form.html")]
struct ItemFormTemplate {
    viewer: Option<String>,
    errors: Vec<String>,
    title: String,
    action: String,
    values: ItemFormView,
    images: Vec<String>,
    categories: Vec<SelectOption>,
    conditions: Vec<SelectOption>,
    trade_types: Vec<SelectOption>,
}

impl ItemFormTemplate {
    fn new(viewer: &AuthContext, values: ItemFormView, errors: Vec<String>) -> Self {
        let trade_type = if values.trade_type.is_empty() {
            TradeType::Share.as_str().to_string()
        } else {
            values.trade_type.clone()
        };
        Self {
            viewer: Some(viewer.username.clone()),
            errors,
            title: "Document a new item".to_string(),
            action: "/items".to_string(),
            categories: options(labels(Category::ALL, Category::as_str), &values.category),
            conditions: options(labels(Condition::ALL, Condition::as_str), &values.condition),
            trade_types: options(labels(TradeType::ALL, TradeType::as_str), &trade_type),
            images: Vec::new(),
            values,
        }
    }

    fn editing(mut self, item: &Item) -> Self {
        self.title = format!("Edit {}", item.name);
        self.action = format!("/items/{}?_method=PUT", item.id);
        self.images = item.images.clone();
        self
    }
}

#[derive(Template)]
#[template(path = "items/show.html")]
struct ItemTemplate {
    viewer: Option<String>,
    item: Item,
    is_owner: bool,
}

#[derive(Template)]
#[template(path = "items/community.html")]
struct CommunityTemplate {
    viewer: Option<String>,
    items: Vec<CommunityItem>,
}

async fn index(
    State(state): State<AppState>,
    ctx: Option<AuthContext>,
    Query(filters): Query<ItemFilters>,
) -> Response {
    let viewer_id = ctx.as_ref().map(|c| c.user_id);
    let (items, errors) = match state.catalog.list(viewer_id, &filters).await {
        Ok(items) => (items, Vec::new()),
        Err(e @ AppError::Validation(_)) => (Vec::new(), e.messages()),
        Err(e) => return PageError::new(e, ctx.as_ref()).into_response(),
    };

    let selected = |raw: &Option<String>| raw.clone().unwrap_or_default();
    let page = ItemsTemplate {
        show_all: filters.scope(ctx.is_some()) == Scope::All,
        viewer: ctx.map(|c| c.username),
        errors,
        items,
        search: selected(&filters.search),
        categories: options(labels(Category::ALL, Category::as_str), &selected(&filters.category)),
        conditions: options(labels(Condition::ALL, Condition::as_str), &selected(&filters.condition)),
        availabilities: options(
            labels(Availability::ALL, Availability::as_str),
            &selected(&filters.availability),
        ),
    };
    HtmlTemplate(page).into_response()
}

async fn new_item(SignedIn(ctx): SignedIn) -> impl IntoResponse {
    HtmlTemplate(ItemFormTemplate::new(&ctx, ItemFormView::default(), Vec::new()))
}

async fn create_item(
    State(state): State<AppState>,
    SignedIn(ctx): SignedIn,
    submission: Result<ItemSubmission, AppError>,
) -> Response {
    let submission = match submission {
        Ok(submission) => submission,
        Err(e) => {
            let page = ItemFormTemplate::new(&ctx, ItemFormView::default(), e.messages());
            return (e.status_code(), HtmlTemplate(page)).into_response();
        }
    };

    let result = match validate_item(&submission.form) {
        Ok(draft) => state.catalog.create(ctx.user_id, draft, &submission.images).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(item) => Redirect::to(&format!("/items/{}", item.id)).into_response(),
        Err(e) if e.status_code() == StatusCode::BAD_REQUEST => {
            let page = ItemFormTemplate::new(&ctx, submission.form.into(), e.messages());
            (StatusCode::BAD_REQUEST, HtmlTemplate(page)).into_response()
        }
        Err(e) => PageError::new(e, Some(&ctx)).into_response(),
    }
}

async fn show_item(
    State(state): State<AppState>,
    ctx: Option<AuthContext>,
    Path(id): Path<i64>,
) -> Response {
    let viewer_id = ctx.as_ref().map(|c| c.user_id);
    match state.catalog.show(id, viewer_id).await {
        Ok(item) => HtmlTemplate(ItemTemplate {
            is_owner: viewer_id == Some(item.owner_id),
            viewer: ctx.map(|c| c.username),
            item,
        })
        .into_response(),
        Err(e) => PageError::new(e, ctx.as_ref()).into_response(),
    }
}

async fn edit_item(
    State(state): State<AppState>,
    SignedIn(ctx): SignedIn,
    Path(id): Path<i64>,
) -> Response {
    match state.catalog.owned(id, ctx.user_id).await {
        Ok(item) => {
            let page = ItemFormTemplate::new(&ctx, ItemFormView::from(&item), Vec::new()).editing(&item);
            HtmlTemplate(page).into_response()
        }
        Err(e) => PageError::new(e, Some(&ctx)).into_response(),
    }
}

async fn update_item(
    State(state): State<AppState>,
    SignedIn(ctx): SignedIn,
    Path(id): Path<i64>,
    submission: Result<ItemSubmission, AppError>,
) -> Response {
    let item = match state.catalog.owned(id, ctx.user_id).await {
        Ok(item) => item,
        Err(e) => return PageError::new(e, Some(&ctx)).into_response(),
    };

    let submission = match submission {
        Ok(submission) => submission,
        Err(e) => {
            let page = ItemFormTemplate::new(&ctx, ItemFormView::from(&item), e.messages()).editing(&item);
            return (e.status_code(), HtmlTemplate(page)).into_response();
        }
    };

    let result = match validate_item(&submission.form) {
        Ok(draft) => state.catalog.update(id, ctx.user_id, draft, &submission.images).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(item) => Redirect::to(&format!("/items/{}", item.id)).into_response(),
        Err(e) if e.status_code() == StatusCode::BAD_REQUEST => {
            let page = ItemFormTemplate::new(&ctx, submission.form.into(), e.messages()).editing(&item);
            (StatusCode::BAD_REQUEST, HtmlTemplate(page)).into_response()
        }
        Err(e) => PageError::new(e, Some(&ctx)).into_response(),
    }
}

async fn delete_item(
    State(state): State<AppState>,
    SignedIn(ctx): SignedIn,
    Path(id): Path<i64>,
) -> Response {
    match state.catalog.delete(id, ctx.user_id).await {
        Ok(()) => Redirect::to("/items").into_response(),
        Err(e) => PageError::new(e, Some(&ctx)).into_response(),
    }
}

async fn community(State(state): State<AppState>, ctx: Option<AuthContext>) -> Response {
    match state.catalog.community().await {
        Ok(items) => HtmlTemplate(CommunityTemplate {
            viewer: ctx.map(|c| c.username),
            items,
        })
        .into_response(),
        Err(e) => PageError::new(e, ctx.as_ref()).into_response(),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/items", get(index).post(create_item))
        .route("/items/new", get(new_item))
        .route("/items/community", get(community))
        .route(
            "/items/{id}",
            get(show_item).put(update_item).delete(delete_item),
        )
        .route("/items/{id}/edit", get(edit_item))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::Request,
        http::{self, Method, header},
    };

    use crate::{
        catalog::fixtures::draft,
        models::Availability,
        server::fixtures::{TestApp, body_text, get},
    };

    use super::*;

    fn form(method: Method, uri: &str, cookie: &str, body: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, cookie)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn owner_id(app: &TestApp, name: &str) -> i64 {
        sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
            .bind(name)
            .fetch_one(app.db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_redirects_to_the_new_item() {
        let app = TestApp::new().await;
        let cookie = app.sign_in("alice").await;

        let response = app
            .send(form(
                Method::POST,
                "/items",
                &cookie,
                "name=Walkman&description=Cassette+player&category=Audio+Equipment&condition=Good&estimatedValue=80",
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("/items/"));

        let page = body_text(app.send(get(&location, Some(&cookie))).await).await;
        assert!(page.contains("Walkman"));
        assert!(page.contains("Audio Equipment"));
    }

    #[tokio::test]
    async fn bad_category_rerenders_the_form() {
        let app = TestApp::new().await;
        let cookie = app.sign_in("alice").await;

        let response = app
            .send(form(
                Method::POST,
                "/items",
                &cookie,
                "name=Walkman&description=Player&category=Zebra&condition=Good",
            ))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let page = body_text(response).await;
        assert!(page.contains("Category must be one of the following:"));
        assert!(page.contains("value=\"Walkman\""));
    }

    #[tokio::test]
    async fn only_the_owner_updates_and_deletes() {
        let app = TestApp::new().await;
        let alice = app.sign_in("alice").await;
        let mallory = app.sign_in("mallory").await;
        let item = app
            .state
            .catalog
            .create(owner_id(&app, "alice").await, draft("Tape deck"), &[])
            .await
            .unwrap();
        let uri = format!("/items/{}?_method=PUT", item.id);
        let body = "name=Deck&description=Serviced&category=Records&condition=Fair";

        let response = app.send(form(Method::POST, &uri, &mallory, body)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.send(form(Method::POST, &uri, &alice, body)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let updated = app.state.catalog.get(item.id).await.unwrap();
        assert_eq!(updated.name, "Deck");
        assert_eq!(updated.availability_status, Availability::Available);

        let delete = format!("/items/{}?_method=DELETE", item.id);
        let response = app.send(form(Method::POST, &delete, &mallory, "")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = app.send(form(Method::POST, &delete, &alice, "")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(app.state.catalog.get(item.id).await.is_err());
    }

    #[tokio::test]
    async fn visits_by_others_are_counted() {
        let app = TestApp::new().await;
        let alice = app.sign_in("alice").await;
        let bob = app.sign_in("bob").await;
        let item = app
            .state
            .catalog
            .create(owner_id(&app, "alice").await, draft("Slide projector"), &[])
            .await
            .unwrap();
        let uri = format!("/items/{}", item.id);

        app.send(get(&uri, Some(&alice))).await;
        app.send(get(&uri, Some(&bob))).await;
        app.send(get(&uri, None)).await;

        assert_eq!(app.state.catalog.get(item.id).await.unwrap().view_count, 2);
    }

    #[tokio::test]
    async fn community_lists_owners() {
        let app = TestApp::new().await;
        app.sign_in("alice").await;
        app.state
            .catalog
            .create(owner_id(&app, "alice").await, draft("Typewriter"), &[])
            .await
            .unwrap();

        let response = app.send(get("/items/community", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_text(response).await;
        assert!(page.contains("Typewriter"));
        assert!(page.contains("alice"));
    }
}
