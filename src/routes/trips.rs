use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_with::{serde_as, NoneAsEmptyString};
use tracing::error;

use crate::{
    auth::CurrentUser,
    checklist::{days::calculate_trip_days, links::resolve_trip_list, template::generate_checklist},
    db::DbPool,
    error::AppError,
    models::{
        item::NewItem,
        trip::{Trip, TripLink, TripType},
    },
    policy::AccessPolicy,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(trips_list))
        .route("/new", get(trip_new_form).post(trip_new_submit))
        .route("/:trip_id/delete", post(trip_delete))
        .route("/link", post(link_trips))
        .route("/unlink", post(unlink_trips))
}

pub async fn fetch_trip(db: &DbPool, trip_id: i64) -> Result<Option<Trip>, AppError> {
    let trip = sqlx::query_as::<_, Trip>(
        r#"SELECT trip_id, user_id, location_name, latitude, longitude,
                  start_date, end_date, trip_type, group_id, created_at
           FROM trips WHERE trip_id = ?1"#,
    )
    .bind(trip_id)
    .fetch_optional(db)
    .await?;
    Ok(trip)
}

pub async fn insert_items(db: &DbPool, rows: &[NewItem]) -> Result<(), AppError> {
    let now = Utc::now();
    for row in rows {
        sqlx::query(
            r#"INSERT INTO items (trip_id, item_name, quantity, is_checked, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(row.trip_id)
        .bind(&row.item_name)
        .bind(row.quantity)
        .bind(row.is_checked)
        .bind(now)
        .execute(db)
        .await?;
    }
    Ok(())
}

/// Own trips plus group trips of every group the user belongs to.
async fn fetch_visible_trips(db: &DbPool, user_id: i64) -> Result<Vec<Trip>, AppError> {
    let trips = sqlx::query_as::<_, Trip>(
        r#"SELECT DISTINCT t.trip_id, t.user_id, t.location_name, t.latitude, t.longitude,
                  t.start_date, t.end_date, t.trip_type, t.group_id, t.created_at
           FROM trips t
           LEFT JOIN group_members gm ON gm.group_id = t.group_id AND gm.user_id = ?1
           WHERE t.user_id = ?1 OR gm.user_id IS NOT NULL
           ORDER BY t.start_date ASC"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(trips)
}

async fn fetch_user_links(db: &DbPool, user_id: i64) -> Result<Vec<TripLink>, AppError> {
    let links = sqlx::query_as::<_, TripLink>(
        r#"SELECT link_id, group_trip_id, personal_trip_id, user_id, created_at
           FROM trip_links WHERE user_id = ?1"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(links)
}

#[derive(Clone)]
struct TripRow {
    trip_id: i64,
    location_name: String,
    period: String,
    is_group: bool,
    group_name: String,
    is_linked: bool,
    linked_trip_id: i64,
}

#[derive(Clone)]
struct TripOption {
    trip_id: i64,
    label: String,
}

#[derive(Template)]
#[template(path = "trips/list.html")]
struct TripsListTemplate {
    trips: Vec<TripRow>,
    personal_options: Vec<TripOption>,
    group_options: Vec<TripOption>,
}

async fn trips_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };

    let trips = fetch_visible_trips(&state.db, user.id).await?;
    let links = fetch_user_links(&state.db, user.id).await?;

    // Trips that ended before yesterday drop off the list.
    let cutoff = Utc::now().date_naive() - Duration::days(1);
    let upcoming: Vec<Trip> = trips
        .into_iter()
        .filter(|trip| trip.end_date >= cutoff)
        .collect();

    let entries = resolve_trip_list(&upcoming, &links);

    let group_names = fetch_group_names(&state.db, user.id).await?;
    let rows = entries
        .iter()
        .map(|entry| {
            let trip = &entry.trip;
            let shown_group = entry.linked_trip.as_ref().unwrap_or(trip);
            TripRow {
                trip_id: trip.trip_id,
                location_name: trip.location_name.clone(),
                period: format_period(trip.start_date, trip.end_date),
                is_group: shown_group.is_group(),
                group_name: shown_group
                    .group_id
                    .and_then(|id| {
                        group_names
                            .iter()
                            .find(|(group_id, _)| *group_id == id)
                            .map(|(_, name)| name.clone())
                    })
                    .unwrap_or_default(),
                is_linked: entry.is_linked(),
                linked_trip_id: entry
                    .linked_trip
                    .as_ref()
                    .map(|linked| linked.trip_id)
                    .unwrap_or_default(),
            }
        })
        .collect();

    // Unlinked halves feed the link form's dropdowns.
    let personal_options = entries
        .iter()
        .filter(|entry| !entry.is_linked() && !entry.trip.is_group() && entry.trip.user_id == user.id)
        .map(|entry| trip_option(&entry.trip))
        .collect();
    let group_options = entries
        .iter()
        .filter(|entry| !entry.is_linked() && entry.trip.is_group())
        .map(|entry| trip_option(&entry.trip))
        .collect();

    Ok(AskamaTemplateResponse::into_response(TripsListTemplate {
        trips: rows,
        personal_options,
        group_options,
    }))
}

fn trip_option(trip: &Trip) -> TripOption {
    TripOption {
        trip_id: trip.trip_id,
        label: format!(
            "{} ({})",
            trip.location_name,
            format_period(trip.start_date, trip.end_date)
        ),
    }
}

async fn fetch_group_names(db: &DbPool, user_id: i64) -> Result<Vec<(i64, String)>, AppError> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        r#"SELECT g.group_id, g.group_name
           FROM groups g JOIN group_members gm ON gm.group_id = g.group_id
           WHERE gm.user_id = ?1"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[derive(Clone)]
struct GroupChoice {
    group_id: i64,
    group_name: String,
}

#[derive(Template)]
#[template(path = "trips/new.html")]
struct TripNewTemplate {
    show_error: bool,
    error_message: String,
    location: String,
    start_date: String,
    end_date: String,
    groups: Vec<GroupChoice>,
}

async fn trip_new_form(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };
    let groups = fetch_group_choices(&state.db, user.id).await?;
    Ok(AskamaTemplateResponse::into_response(TripNewTemplate {
        show_error: false,
        error_message: String::new(),
        location: String::new(),
        start_date: String::new(),
        end_date: String::new(),
        groups,
    }))
}

async fn fetch_group_choices(db: &DbPool, user_id: i64) -> Result<Vec<GroupChoice>, AppError> {
    Ok(fetch_group_names(db, user_id)
        .await?
        .into_iter()
        .map(|(group_id, group_name)| GroupChoice {
            group_id,
            group_name,
        })
        .collect())
}

#[serde_as]
#[derive(Deserialize)]
struct TripForm {
    location: String,
    start_date: String,
    end_date: String,
    #[serde_as(as = "NoneAsEmptyString")]
    group_id: Option<String>,
}

async fn trip_new_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<TripForm>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };

    match create_trip(&state, user.id, &form).await {
        Ok(trip_id) => Ok(Redirect::to(&format!("/checklist/{trip_id}")).into_response()),
        Err(AppError::BadRequest(msg)) | Err(AppError::Upstream(msg)) => {
            let groups = fetch_group_choices(&state.db, user.id).await?;
            Ok((
                StatusCode::BAD_REQUEST,
                AskamaTemplateResponse::into_response(TripNewTemplate {
                    show_error: true,
                    error_message: msg,
                    location: form.location,
                    start_date: form.start_date,
                    end_date: form.end_date,
                    groups,
                }),
            )
                .into_response())
        }
        Err(err) => Err(err),
    }
}

async fn create_trip(state: &AppState, user_id: i64, form: &TripForm) -> Result<i64, AppError> {
    let location = form.location.trim();
    if location.is_empty() || form.start_date.trim().is_empty() || form.end_date.trim().is_empty() {
        return Err(AppError::BadRequest(
            "すべての必須フィールドを入力してください".into(),
        ));
    }

    let start_date = parse_date(&form.start_date)?;
    let end_date = parse_date(&form.end_date)?;
    if end_date < start_date {
        return Err(AppError::BadRequest(
            "終了日は開始日以降にしてください".into(),
        ));
    }

    let group_id = match form.group_id.as_deref() {
        Some(raw) => {
            let group_id: i64 = raw
                .parse()
                .map_err(|_| AppError::BadRequest("グループの指定が正しくありません".into()))?;
            state
                .policy()
                .require_group_member(user_id, group_id)
                .await?;
            Some(group_id)
        }
        None => None,
    };
    let trip_type = if group_id.is_some() {
        TripType::Group
    } else {
        TripType::Personal
    };

    let coords = state.geocoder.lookup(location).await?;

    let trip_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO trips (user_id, location_name, latitude, longitude, start_date,
                              end_date, trip_type, group_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING trip_id"#,
    )
    .bind(user_id)
    .bind(location)
    .bind(coords.lat)
    .bind(coords.lng)
    .bind(start_date)
    .bind(end_date)
    .bind(trip_type.as_str())
    .bind(group_id)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    let days = calculate_trip_days(start_date, end_date);
    let rows = generate_checklist(trip_id, coords.lat, coords.lng, days, trip_type);
    if let Err(err) = insert_items(&state.db, &rows).await {
        // The trip row stays; only the default checklist is missing.
        error!("checklist template insert failed for trip {trip_id}: {err}");
        return Err(AppError::BadRequest(
            "チェックリストの作成に失敗しました".into(),
        ));
    }

    Ok(trip_id)
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest("日付の形式が正しくありません".into()))
}

async fn trip_delete(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    let trip = fetch_trip(&state.db, trip_id)
        .await?
        .ok_or(AppError::NotFound)?;
    state.policy().require_trip_delete(user.id, &trip).await?;

    // Child rows first; each delete is best-effort sequential.
    sqlx::query("DELETE FROM items WHERE trip_id = ?1")
        .bind(trip_id)
        .execute(&state.db)
        .await?;
    sqlx::query("DELETE FROM trip_links WHERE group_trip_id = ?1 OR personal_trip_id = ?1")
        .bind(trip_id)
        .execute(&state.db)
        .await?;
    sqlx::query("DELETE FROM trips WHERE trip_id = ?1")
        .bind(trip_id)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to("/trips"))
}

#[derive(Deserialize)]
struct LinkForm {
    personal_trip_id: i64,
    group_trip_id: i64,
}

async fn link_trips(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<LinkForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;

    let personal = fetch_trip(&state.db, form.personal_trip_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if personal.user_id != user.id || personal.is_group() {
        return Err(AppError::Forbidden);
    }
    let group = fetch_trip(&state.db, form.group_trip_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !group.is_group() {
        return Err(AppError::BadRequest("グループ旅行を選択してください".into()));
    }
    state.policy().require_trip_access(user.id, &group).await?;

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT link_id FROM trip_links WHERE group_trip_id = ?1 AND user_id = ?2",
    )
    .bind(form.group_trip_id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("既に紐付けされています".into()));
    }

    sqlx::query(
        r#"INSERT INTO trip_links (group_trip_id, personal_trip_id, user_id, created_at)
           VALUES (?1, ?2, ?3, ?4)"#,
    )
    .bind(form.group_trip_id)
    .bind(form.personal_trip_id)
    .bind(user.id)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    Ok(Redirect::to("/trips"))
}

async fn unlink_trips(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<LinkForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    sqlx::query(
        r#"DELETE FROM trip_links
           WHERE personal_trip_id = ?1 AND group_trip_id = ?2 AND user_id = ?3"#,
    )
    .bind(form.personal_trip_id)
    .bind(form.group_trip_id)
    .bind(user.id)
    .execute(&state.db)
    .await?;
    Ok(Redirect::to("/trips"))
}

fn format_period(start: NaiveDate, end: NaiveDate) -> String {
    format!("{} 〜 {}", start.format("%Y/%m/%d"), end.format("%Y/%m/%d"))
}
