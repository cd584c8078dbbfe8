use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    auth::CurrentUser,
    checklist::links::linked_trip_id,
    db::DbPool,
    error::AppError,
    models::{
        item::{Item, NewItem},
        trip::{Trip, TripLink},
    },
    policy::AccessPolicy,
    state::AppState,
};

use super::trips::{fetch_trip, insert_items};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:trip_id", get(checklist_page))
        .route("/:trip_id/items", post(add_item))
        .route("/:trip_id/items/:item_id/delete", post(delete_item))
        .route("/:trip_id/items/:item_id/toggle", post(toggle_item))
        .route("/:trip_id/items/:item_id/quantity", post(update_quantity))
        .route("/:trip_id/hide-completed", post(update_hide_completed))
        .route("/:trip_id/suggestions", post(ai_suggestions))
        .route("/:trip_id/suggestions/add", post(add_suggested_items))
}

/// JSON surface, mounted under /api/checklist.
pub fn api_router() -> Router<AppState> {
    Router::new().route("/:trip_id/items", get(items_json))
}

async fn fetch_items(db: &DbPool, trip_id: i64) -> Result<Vec<Item>, AppError> {
    let items = sqlx::query_as::<_, Item>(
        r#"SELECT item_id, trip_id, item_name, quantity, is_checked, created_at
           FROM items WHERE trip_id = ?1 ORDER BY item_id ASC"#,
    )
    .bind(trip_id)
    .fetch_all(db)
    .await?;
    Ok(items)
}

/// Resolves trip, access and the linked counterpart for the current viewer.
async fn load_accessible_trip(
    state: &AppState,
    user_id: i64,
    trip_id: i64,
) -> Result<Option<(Trip, Option<Trip>)>, AppError> {
    let Some(trip) = fetch_trip(&state.db, trip_id).await? else {
        return Ok(None);
    };
    if !state.policy().can_view_trip(user_id, &trip).await? {
        return Ok(None);
    }

    let links = sqlx::query_as::<_, TripLink>(
        r#"SELECT link_id, group_trip_id, personal_trip_id, user_id, created_at
           FROM trip_links WHERE user_id = ?1"#,
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await?;

    let linked = match linked_trip_id(&trip, &links) {
        Some(id) => fetch_trip(&state.db, id).await?,
        None => None,
    };

    Ok(Some((trip, linked)))
}

#[derive(Clone)]
struct ItemRow {
    item_id: i64,
    item_name: String,
    quantity: i64,
    is_checked: bool,
    next_checked: bool,
}

impl From<Item> for ItemRow {
    fn from(item: Item) -> Self {
        Self {
            item_id: item.item_id,
            item_name: item.item_name,
            quantity: item.quantity,
            is_checked: item.is_checked,
            next_checked: !item.is_checked,
        }
    }
}

#[derive(Template)]
#[template(path = "checklist/page.html")]
struct ChecklistTemplate {
    trip_id: i64,
    location_name: String,
    period: String,
    items: Vec<ItemRow>,
    has_linked: bool,
    linked_label: String,
    linked_items: Vec<ItemRow>,
    hide_completed: bool,
}

async fn checklist_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };
    // Unknown trip and denied access both bounce back to the list.
    let Some((trip, linked)) = load_accessible_trip(&state, user.id, trip_id).await? else {
        return Ok(Redirect::to("/trips").into_response());
    };

    let hide_completed: bool =
        sqlx::query_scalar("SELECT hide_completed FROM user_setting WHERE user_id = ?1")
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?
            .unwrap_or(false);

    let items = visible_rows(fetch_items(&state.db, trip.trip_id).await?, hide_completed);
    let linked_items = match &linked {
        Some(linked) => visible_rows(fetch_items(&state.db, linked.trip_id).await?, hide_completed),
        None => Vec::new(),
    };

    Ok(AskamaTemplateResponse::into_response(ChecklistTemplate {
        trip_id: trip.trip_id,
        location_name: trip.location_name.clone(),
        period: format!(
            "{} 〜 {}",
            trip.start_date.format("%Y/%m/%d"),
            trip.end_date.format("%Y/%m/%d")
        ),
        items,
        has_linked: linked.is_some(),
        linked_label: linked
            .as_ref()
            .map(|linked| {
                if linked.is_group() {
                    "グループのチェックリスト".to_string()
                } else {
                    "個人のチェックリスト".to_string()
                }
            })
            .unwrap_or_default(),
        linked_items,
        hide_completed,
    }))
}

fn visible_rows(items: Vec<Item>, hide_completed: bool) -> Vec<ItemRow> {
    items
        .into_iter()
        .filter(|item| !(hide_completed && item.is_checked))
        .map(ItemRow::from)
        .collect()
}

async fn require_item_access(
    state: &AppState,
    user_id: i64,
    trip_id: i64,
) -> Result<Trip, AppError> {
    let trip = fetch_trip(&state.db, trip_id)
        .await?
        .ok_or(AppError::NotFound)?;
    state.policy().require_trip_access(user_id, &trip).await?;
    Ok(trip)
}

#[derive(Deserialize)]
struct AddItemForm {
    item_name: String,
    quantity: Option<i64>,
}

async fn add_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Form(form): Form<AddItemForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    require_item_access(&state, user.id, trip_id).await?;

    let name = form.item_name.trim();
    if name.is_empty() {
        return Ok(Redirect::to(&format!("/checklist/{trip_id}")));
    }

    sqlx::query(
        r#"INSERT INTO items (trip_id, item_name, quantity, is_checked, created_at)
           VALUES (?1, ?2, ?3, 0, ?4)"#,
    )
    .bind(trip_id)
    .bind(name)
    .bind(form.quantity.unwrap_or(1).max(1))
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    Ok(Redirect::to(&format!("/checklist/{trip_id}")))
}

async fn delete_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((trip_id, item_id)): Path<(i64, i64)>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    require_item_access(&state, user.id, trip_id).await?;

    sqlx::query("DELETE FROM items WHERE item_id = ?1 AND trip_id = ?2")
        .bind(item_id)
        .bind(trip_id)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to(&format!("/checklist/{trip_id}")))
}

#[derive(Deserialize)]
struct ToggleForm {
    is_checked: bool,
}

async fn toggle_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((trip_id, item_id)): Path<(i64, i64)>,
    Form(form): Form<ToggleForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    require_item_access(&state, user.id, trip_id).await?;

    sqlx::query("UPDATE items SET is_checked = ?1 WHERE item_id = ?2 AND trip_id = ?3")
        .bind(form.is_checked)
        .bind(item_id)
        .bind(trip_id)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to(&format!("/checklist/{trip_id}")))
}

#[derive(Deserialize)]
struct QuantityForm {
    quantity: i64,
}

async fn update_quantity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((trip_id, item_id)): Path<(i64, i64)>,
    Form(form): Form<QuantityForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    require_item_access(&state, user.id, trip_id).await?;

    // Below one is ignored, not an error.
    if form.quantity >= 1 {
        sqlx::query("UPDATE items SET quantity = ?1 WHERE item_id = ?2 AND trip_id = ?3")
            .bind(form.quantity)
            .bind(item_id)
            .bind(trip_id)
            .execute(&state.db)
            .await?;
    }

    Ok(Redirect::to(&format!("/checklist/{trip_id}")))
}

#[derive(Deserialize)]
struct HideCompletedForm {
    hide_completed: bool,
}

async fn update_hide_completed(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Form(form): Form<HideCompletedForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    sqlx::query("UPDATE user_setting SET hide_completed = ?1 WHERE user_id = ?2")
        .bind(form.hide_completed)
        .bind(user.id)
        .execute(&state.db)
        .await?;
    Ok(Redirect::to(&format!("/checklist/{trip_id}")))
}

#[derive(Serialize)]
struct ItemDto {
    item_id: i64,
    item_name: String,
    quantity: i64,
    is_checked: bool,
}

async fn items_json(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<Vec<ItemDto>>, AppError> {
    let user = current.require_user()?;
    let trip = fetch_trip(&state.db, trip_id)
        .await?
        .ok_or(AppError::NotFound)?;
    state.policy().require_trip_access(user.id, &trip).await?;

    let items = fetch_items(&state.db, trip_id)
        .await?
        .into_iter()
        .map(|item| ItemDto {
            item_id: item.item_id,
            item_name: item.item_name,
            quantity: item.quantity,
            is_checked: item.is_checked,
        })
        .collect();
    Ok(Json(items))
}

#[derive(Serialize)]
struct SuggestionResponse {
    suggestions: Vec<String>,
    ai_suggestion_counts: Option<i64>,
}

async fn ai_suggestions(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<SuggestionResponse>, AppError> {
    let user = current.require_user()?;
    let trip = require_item_access(&state, user.id, trip_id).await?;

    // Mock mode answers without touching the quota.
    if state.suggestions.is_mock() {
        return Ok(Json(SuggestionResponse {
            suggestions: state.suggestions.mock_suggestions(),
            ai_suggestion_counts: None,
        }));
    }

    let used: i64 =
        sqlx::query_scalar("SELECT ai_suggestion_counts FROM user_setting WHERE user_id = ?1")
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?
            .unwrap_or(0);
    let limit = state.config.ai_daily_limit;
    if used >= limit {
        return Err(AppError::BadRequest(format!(
            "AI提案の利用は1日{limit}回までです。明日またお試しください。"
        )));
    }

    let existing: Vec<String> =
        sqlx::query_scalar("SELECT item_name FROM items WHERE trip_id = ?1")
            .bind(trip_id)
            .fetch_all(&state.db)
            .await?;

    let suggestions = state
        .suggestions
        .request_suggestions(&trip.location_name, trip.start_date, trip.end_date, &existing)
        .await?;

    sqlx::query("UPDATE user_setting SET ai_suggestion_counts = ?1 WHERE user_id = ?2")
        .bind(used + 1)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(SuggestionResponse {
        suggestions,
        ai_suggestion_counts: Some(used + 1),
    }))
}

#[derive(Deserialize)]
struct SelectedItem {
    item_name: String,
    quantity: i64,
}

async fn add_suggested_items(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Json(selected): Json<Vec<SelectedItem>>,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    require_item_access(&state, user.id, trip_id).await?;

    if selected.is_empty() {
        return Ok(StatusCode::NO_CONTENT);
    }

    let rows: Vec<NewItem> = selected
        .into_iter()
        .filter(|item| !item.item_name.trim().is_empty())
        .map(|item| NewItem {
            trip_id,
            item_name: item.item_name.trim().to_string(),
            quantity: item.quantity.max(1),
            is_checked: false,
        })
        .collect();
    insert_items(&state.db, &rows).await?;

    Ok(StatusCode::NO_CONTENT)
}
